//! Tessel: a JIT compiler for tile-based GPU kernels.
//!
//! ```text
//! .tsl source ─ syntax ─→ AST ─ typecheck ─→ checked module
//!   ─ trace (per launch signature) ─→ KIR ─┬→ PTX text
//!                                          └→ runtime (grid executor)
//! ```
//!
//! `jit::Module` and `jit::Kernel` are the entry points; see
//! `Kernel::launch`.

pub mod ast;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod jit;
pub mod kir;
pub mod runtime;
pub mod syntax;
pub mod testing;
pub mod trace;
pub mod typecheck;

// Re-exports: short paths for the front end
pub use syntax::lexeme;
pub use syntax::lexer;
pub use syntax::parser;
pub use syntax::span;
pub use typecheck::types;

// Re-exports: public API
pub use config::JitConfig;
pub use diagnostic::{Diagnostic, ErrorKind};
pub use error::{Error, Result};
pub use jit::{ArgKey, CompiledKernel, Kernel, LaunchOptions, Module, Signature};
pub use runtime::{Arg, Device, DeviceBuffer, Grid};
pub use trace::ConstValue;
pub use types::DType;

use lexer::Lexer;
use parser::Parser;

/// Lex and parse one source file (file id 0).
pub fn parse_source(source: &str) -> std::result::Result<ast::File, Vec<Diagnostic>> {
    let (tokens, lex_errors) = Lexer::new(source, 0).tokenize();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    Parser::new(tokens).parse_file()
}
