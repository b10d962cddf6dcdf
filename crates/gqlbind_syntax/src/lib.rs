//! Syntax layer for gqlbind.
//!
//! This crate provides:
//! - `token`: Token kinds and token structures
//! - `lexer`: Tokenization
//! - `ast`: Owned syntax tree for executable documents
//! - `parser`: Recursive descent parser
//! - `printer`: Pretty and compact document printing

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod token;

pub use ast::*;
pub use lexer::Lexer;
pub use parser::{parse, ParseResult};
pub use printer::{print, print_compact, print_with_options, PrintOptions, Printer};
pub use token::{Token, TokenKind};
