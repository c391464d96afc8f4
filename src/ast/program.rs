use super::pos::{Pos, SourceFile};
use super::Stmt;

/// A parsed source file: the root of the tree handed to the compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub stmts: Vec<Stmt>,
}

impl File {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }
}

/// A syntax error reported by the external parser.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at {pos:?}")]
pub struct ParseError {
    pub message: String,
    pub pos: Pos,
}

impl ParseError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

/// Boundary contract for the external lexer/parser front end.
///
/// The parser receives the [`SourceFile`] registered for `src` and is
/// expected to record line starts in it, so positions in the returned tree
/// resolve to `file:line:column`.
pub trait Parse: Send + Sync {
    fn parse(&self, file: &mut SourceFile, src: &[u8]) -> Result<File, ParseError>;
}
