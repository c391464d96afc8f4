//! # Syntax tree contract
//!
//! The lexer/parser front end lives outside this crate. This module fixes
//! what it must hand over: a [`File`] of [`Stmt`]/[`Expr`] nodes whose
//! [`Pos`] values resolve through a [`FileSet`].
//!
//! Trees can also be assembled directly with the [`build`] helpers.

pub mod build;
pub mod node;
pub mod pos;
pub mod program;
pub mod token;

pub use node::*;
pub use pos::{FileSet, Pos, SourceFile, SourceFilePos};
pub use program::{File, Parse, ParseError};
pub use token::Token;
