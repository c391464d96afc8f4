use thiserror::Error;

use crate::ast::{SourceFilePos, Token};

/// Errors recorded before compilation gives up.
pub const MAX_COMPILE_ERRORS: usize = 10;

/// One compile error with its resolved source position.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Compile Error: {message}\n\tat {pos}")]
pub struct CompileError {
    pub message: String,
    pub pos: SourceFilePos,
}

impl CompileError {
    pub fn new(message: impl Into<String>, pos: SourceFilePos) -> Self {
        CompileError {
            message: message.into(),
            pos,
        }
    }

    pub fn unresolved_reference(name: &str, pos: SourceFilePos) -> Self {
        Self::new(format!("unresolved reference '{}'", name), pos)
    }

    pub fn redeclared(name: &str, pos: SourceFilePos) -> Self {
        Self::new(format!("'{}' redeclared in this block", name), pos)
    }

    pub fn outside_function(what: &str, pos: SourceFilePos) -> Self {
        Self::new(format!("{} not allowed outside function", what), pos)
    }

    pub fn outside_loop(token: Token, pos: SourceFilePos) -> Self {
        Self::new(format!("{} not allowed outside loop", token), pos)
    }

    pub fn module_not_found(name: &str, pos: SourceFilePos) -> Self {
        Self::new(format!("module '{}' not found", name), pos)
    }

    pub fn cyclic_import(name: &str, pos: SourceFilePos) -> Self {
        Self::new(format!("cyclic module import: {}", name), pos)
    }

    pub fn invalid_operator(token: Token, pos: SourceFilePos) -> Self {
        Self::new(format!("invalid operator: {}", token), pos)
    }
}

/// Every error a compilation produced, first one first.
#[derive(Debug, Clone, Default, PartialEq, Error)]
#[error("{}", summary(.errors))]
pub struct CompileErrors {
    errors: Vec<CompileError>,
}

impl CompileErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err`; returns false once the cap is reached and compilation
    /// should stop.
    pub fn push(&mut self, err: CompileError) -> bool {
        if self.errors.len() < MAX_COMPILE_ERRORS {
            self.errors.push(err);
        }
        self.errors.len() < MAX_COMPILE_ERRORS
    }

    pub fn first(&self) -> Option<&CompileError> {
        self.errors.first()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.errors.len() >= MAX_COMPILE_ERRORS
    }
}

impl From<CompileError> for CompileErrors {
    fn from(err: CompileError) -> Self {
        CompileErrors { errors: vec![err] }
    }
}

/// The first error, plus how many more were recorded.
fn summary(errors: &[CompileError]) -> String {
    match errors {
        [] => "no errors".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more errors)", first, rest.len()),
    }
}
