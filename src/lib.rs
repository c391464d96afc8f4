//! # vvc
//!
//! An embeddable compiler and virtual machine for a small dynamically-typed
//! scripting language.
//!
//! The host hands the compiler an AST (produced by an external parser that
//! implements [`ast::Parse`], or built directly with [`ast::build`]), gets
//! back a [`Program`], and runs it as often as it likes. Programs can be
//! cloned for concurrent execution and marshaled into a portable binary
//! artifact.
//!
//! ## Layout
//!
//! - [`ast`]: syntax tree contract and source positions.
//! - [`lang`]: runtime object model, builtin functions, module registry.
//! - [`bytecode`]: instruction encoding, symbol table, compiler, disassembler.
//! - [`runtime`]: virtual machine, cancellation tree, routines, channels.
//! - [`encoding`]: binary serialization of bytecode and programs.
//! - [`script`]: the host-facing `Script` / `Program` API.

pub mod ast;
pub mod bytecode;
pub mod encoding;
pub mod lang;
pub mod runtime;
pub mod script;

use thiserror::Error;

pub use bytecode::{Bytecode, CompileErrors};
pub use encoding::{DecodeError, EncodeError};
pub use lang::Object;
pub use runtime::{Context, RuntimeError};
pub use script::{Program, Script, Variable};

/// Crate-level result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the host embedding surface can report.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileErrors),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("parse error: {0}")]
    Parse(#[from] ast::ParseError),

    /// The external cancellation source fired before the program finished.
    #[error("context cancelled")]
    Cancelled,

    /// The deadline attached to the run context passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("'{0}' is not defined")]
    UnknownVariable(String),

    #[error("exceeding constant objects limit: {0}")]
    ConstObjectsLimit(usize),

    #[error("source text given but no parser configured")]
    NoParser,
}
