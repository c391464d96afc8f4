use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Object;
use crate::ast::Pos;
use crate::runtime::{CallContext, ErrorKind};

/// Signature of builtin functions: plain function pointers so the table
/// can be built at compile time.
pub type BuiltinFn = fn(&CallContext<'_>, &[Object]) -> Result<Object, ErrorKind>;

/// Signature of host closures exposed to scripts.
pub type HostFn = dyn Fn(&CallContext<'_>, &[Object]) -> Result<Object, ErrorKind> + Send + Sync;

// =============================================================================
// Compiled functions
// =============================================================================

/// A function body produced by the compiler.
///
/// Immutable once it sits in a constant pool. `CLOSURE` builds a copy with
/// `free` filled in; the instruction stream and source map are shared.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Arc<[u8]>,
    pub num_locals: usize,
    pub num_parameters: usize,
    pub varargs: bool,
    /// Instruction offset → source position of the node that emitted it.
    pub source_map: Arc<BTreeMap<usize, Pos>>,
    pub free: Vec<ObjectPtr>,
}

impl Default for CompiledFunction {
    fn default() -> Self {
        CompiledFunction {
            instructions: Arc::from(Vec::new()),
            num_locals: 0,
            num_parameters: 0,
            varargs: false,
            source_map: Arc::new(BTreeMap::new()),
            free: Vec::new(),
        }
    }
}

impl CompiledFunction {
    pub fn new(instructions: Vec<u8>) -> Self {
        CompiledFunction {
            instructions: instructions.into(),
            ..Default::default()
        }
    }

    /// Source position of the instruction at `ip`, falling back to the
    /// closest mapped instruction before it.
    pub fn source_pos(&self, ip: usize) -> Pos {
        self.source_map
            .range(..=ip)
            .next_back()
            .map(|(_, pos)| *pos)
            .unwrap_or(Pos::NONE)
    }

    /// Same body, bound to a set of captured cells.
    pub fn with_free(&self, free: Vec<ObjectPtr>) -> Self {
        CompiledFunction {
            free,
            ..self.clone()
        }
    }
}

// =============================================================================
// Builtin and host functions
// =============================================================================

#[derive(Clone, Copy)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl BuiltinFunction {
    pub const fn new(name: &'static str, func: BuiltinFn) -> Self {
        BuiltinFunction { name, func }
    }

    pub fn call(&self, ctx: &CallContext<'_>, args: &[Object]) -> Result<Object, ErrorKind> {
        (self.func)(ctx, args)
    }
}

impl PartialEq for BuiltinFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltinFunction({})", self.name)
    }
}

/// A host closure callable from scripts.
pub struct UserFunction {
    pub name: String,
    func: Arc<HostFn>,
}

impl UserFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Object]) -> Result<Object, ErrorKind> + Send + Sync + 'static,
    {
        UserFunction {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Wrap a host closure into a callable object.
    pub fn object<F>(name: impl Into<String>, func: F) -> Object
    where
        F: Fn(&CallContext<'_>, &[Object]) -> Result<Object, ErrorKind> + Send + Sync + 'static,
    {
        Object::UserFunction(Arc::new(UserFunction::new(name, func)))
    }

    pub fn call(&self, ctx: &CallContext<'_>, args: &[Object]) -> Result<Object, ErrorKind> {
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserFunction({})", self.name)
    }
}

// =============================================================================
// Captured variable cells
// =============================================================================

/// A shared, mutable cell. A local captured by a closure moves into one of
/// these so every closure and the defining frame see the same value.
#[derive(Clone, Default)]
pub struct ObjectPtr(Arc<Mutex<Object>>);

impl ObjectPtr {
    pub fn new(value: Object) -> Self {
        ObjectPtr(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> Object {
        self.0.lock().clone()
    }

    pub fn set(&self, value: Object) {
        *self.0.lock() = value;
    }

    pub fn ptr_eq(&self, other: &ObjectPtr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ObjectPtr {
    fn eq(&self, other: &Self) -> bool {
        // the same cell must not be locked twice
        self.ptr_eq(other) || self.get() == other.get()
    }
}

impl fmt::Debug for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectPtr({:?})", self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_pos_falls_back_to_previous_entry() {
        let mut f = CompiledFunction::new(vec![0; 10]);
        f.source_map = Arc::new(BTreeMap::from([(0, Pos(4)), (6, Pos(9))]));
        assert_eq!(f.source_pos(0), Pos(4));
        assert_eq!(f.source_pos(5), Pos(4));
        assert_eq!(f.source_pos(8), Pos(9));
    }

    #[test]
    fn cells_are_shared_between_clones() {
        let cell = ObjectPtr::new(Object::Int(1));
        let alias = cell.clone();
        alias.set(Object::Int(2));
        assert_eq!(cell.get(), Object::Int(2));
        assert_eq!(cell, alias);
    }

    #[test]
    fn closures_compare_by_captured_values() {
        let body = CompiledFunction::new(vec![1, 2, 3]);
        let a = body.with_free(vec![ObjectPtr::new(Object::Int(1))]);
        let b = body.with_free(vec![ObjectPtr::new(Object::Int(1))]);
        let c = body.with_free(vec![ObjectPtr::new(Object::Int(2))]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
