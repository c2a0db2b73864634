//! Source-language frontend: spans, lexemes, lexer and parser.

pub mod lexeme;
pub mod lexer;
pub mod parser;
pub mod span;
