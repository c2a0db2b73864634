//! Public error type of the compile and launch API.

use thiserror::Error;

use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::runtime::Fault;

#[derive(Error, Debug)]
pub enum Error {
    /// The kernel failed to compile for this signature.
    #[error("compilation failed: {}", first_message(.0))]
    Compile(Vec<Diagnostic>),
    /// The launch itself is malformed (grid, argument count, buffers).
    #[error("invalid launch: {0}")]
    Launch(String),
    #[error("memory fault: {0}")]
    Fault(#[from] Fault),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Kind of the first compile diagnostic, if this is a compile error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Compile(diags) => diags.first().map(|d| d.kind),
            _ => None,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Error::Compile(diags) => diags,
            _ => &[],
        }
    }
}

impl From<Vec<Diagnostic>> for Error {
    fn from(diags: Vec<Diagnostic>) -> Self {
        Error::Compile(diags)
    }
}

fn first_message(diags: &[Diagnostic]) -> String {
    match diags {
        [] => "no diagnostics".to_string(),
        [d] => d.to_string(),
        [d, rest @ ..] => format!("{} (and {} more)", d, rest.len()),
    }
}
