//! Runtime object model.
//!
//! [`Object`] is the one value type scripts manipulate. Operator dispatch
//! lives in [`ops`], indexing and slicing in `index`, conversions in
//! `convert`; callables in [`function`]; the builtin table and module
//! registry are explicit values handed to the compiler and VM.

pub mod builtins;
mod convert;
pub mod function;
mod index;
pub mod iter;
pub mod limits;
pub mod modules;
pub mod ops;
pub mod value;

pub use builtins::Builtins;
pub use function::{BuiltinFunction, CompiledFunction, ObjectPtr, UserFunction};
pub use iter::ObjectIterator;
pub use modules::{Importable, ModuleMap, MODULE_NAME_KEY};
pub use value::{MapData, Object};
