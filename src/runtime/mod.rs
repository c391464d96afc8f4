//! # Runtime
//!
//! The stack VM, its errors, and the concurrency layer around it: a tree
//! of abort tokens, routines started with `start`, channels made with
//! `makechan`, and context-driven runs.

pub mod abort;
pub mod channel;
pub mod context;
pub mod routine;
pub mod runtime_error;
pub mod vm;

pub use abort::AbortToken;
pub use context::{Context, run_with_context};
pub use runtime_error::{ErrorKind, RuntimeError};
pub use vm::{CallContext, Globals, Vm, VmConfig};
