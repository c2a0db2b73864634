pub mod build;
pub mod check;

use std::path::Path;
use std::process;

use tessel::diagnostic::render_diagnostics;
use tessel::{Error, Module};

/// Load and check a `.tsl` file, rendering diagnostics and exiting on
/// failure.
pub fn load_module(input: &Path) -> Module {
    if !input.extension().is_some_and(|e| e == "tsl") {
        eprintln!("error: input must be a .tsl file");
        process::exit(1);
    }
    let source = match std::fs::read_to_string(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", input.display(), e);
            process::exit(1);
        }
    };
    match Module::parse(&source) {
        Ok(m) => m,
        Err(e) => exit_with(e, input, &source),
    }
}

/// Report an error against `source` and exit with status 1.
pub fn exit_with(err: Error, input: &Path, source: &str) -> ! {
    let filename = input.display().to_string();
    match &err {
        Error::Compile(diags) => render_diagnostics(diags, &filename, source),
        other => eprintln!("error: {}", other),
    }
    process::exit(1);
}

/// Split `NAME=VALUE`.
pub fn split_binding(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_binding() {
        assert_eq!(
            split_binding("X=*f32:16"),
            Ok(("X".to_string(), "*f32:16".to_string()))
        );
        assert_eq!(
            split_binding("n=i32=1"),
            Ok(("n".to_string(), "i32=1".to_string()))
        );
        assert!(split_binding("=3").is_err());
        assert!(split_binding("BLOCK").is_err());
    }
}
