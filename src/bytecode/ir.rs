use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::op::{Opcode, read_u16};
use crate::ast::FileSet;
use crate::lang::{CompiledFunction, ModuleMap, Object};

/// A compiled unit: entry function, constant pool, and the source files
/// positions refer to.
///
/// Every `CONST`/`CLOSURE` operand is an index into `constants`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub file_set: FileSet,
    pub main_function: Arc<CompiledFunction>,
    pub constants: Vec<Object>,
}

impl Bytecode {
    /// Objects held by the constant pool, container elements included.
    pub fn count_objects(&self) -> usize {
        self.constants.iter().map(Object::count_objects).sum()
    }

    /// Collapse equal constants into one pool slot and rewrite every
    /// constant operand to match.
    ///
    /// Ints, floats, chars, strings and compiled functions dedupe by value;
    /// imported builtin modules by module name. Other constants are kept
    /// as they are. Runs until no more slots merge, so a second call is a
    /// no-op.
    pub fn remove_duplicates(&mut self) {
        let before = self.constants.len();
        loop {
            let len = self.constants.len();
            self.dedupe_once();
            if self.constants.len() == len {
                break;
            }
        }
        debug!(
            before,
            after = self.constants.len(),
            "removed duplicate constants"
        );
    }

    fn dedupe_once(&mut self) {
        let mut deduped: Vec<Object> = Vec::with_capacity(self.constants.len());
        let mut index_map = Vec::with_capacity(self.constants.len());

        let mut ints: FxHashMap<i64, usize> = FxHashMap::default();
        let mut floats: FxHashMap<u64, usize> = FxHashMap::default();
        let mut chars: FxHashMap<char, usize> = FxHashMap::default();
        let mut strings: FxHashMap<Arc<str>, usize> = FxHashMap::default();
        let mut modules: FxHashMap<String, usize> = FxHashMap::default();
        let mut fns: Vec<usize> = Vec::new();

        for constant in std::mem::take(&mut self.constants) {
            let existing = match &constant {
                Object::Int(v) => ints.get(v).copied(),
                Object::Float(v) => floats.get(&v.to_bits()).copied(),
                Object::Char(v) => chars.get(v).copied(),
                Object::String(v) => strings.get(v).copied(),
                Object::ImmutableMap(_) => {
                    ModuleMap::module_name_of(&constant).and_then(|name| modules.get(name).copied())
                }
                Object::CompiledFunction(f) => fns.iter().copied().find(
                    |&j| matches!(&deduped[j], Object::CompiledFunction(g) if g == f),
                ),
                _ => None,
            };
            let idx = match existing {
                Some(idx) => idx,
                None => {
                    let idx = deduped.len();
                    match &constant {
                        Object::Int(v) => {
                            ints.insert(*v, idx);
                        }
                        Object::Float(v) => {
                            floats.insert(v.to_bits(), idx);
                        }
                        Object::Char(v) => {
                            chars.insert(*v, idx);
                        }
                        Object::String(v) => {
                            strings.insert(v.clone(), idx);
                        }
                        Object::ImmutableMap(_) => {
                            if let Some(name) = ModuleMap::module_name_of(&constant) {
                                modules.insert(name.to_string(), idx);
                            }
                        }
                        Object::CompiledFunction(_) => fns.push(idx),
                        _ => {}
                    }
                    deduped.push(constant);
                    idx
                }
            };
            index_map.push(idx);
        }

        self.constants = deduped;
        remap_function(&mut self.main_function, &index_map);
        for constant in &mut self.constants {
            if let Object::CompiledFunction(f) = constant {
                remap_function(f, &index_map);
            }
        }
    }
}

fn remap_function(f: &mut Arc<CompiledFunction>, index_map: &[usize]) {
    if let Some(ins) = remap_const_indexes(&f.instructions, index_map) {
        Arc::make_mut(f).instructions = ins.into();
    }
}

/// Rewrite the pool operand of every `CONST` and `CLOSURE`. Returns `None`
/// when nothing changes.
fn remap_const_indexes(ins: &[u8], index_map: &[usize]) -> Option<Vec<u8>> {
    let mut out: Option<Vec<u8>> = None;
    let mut ip = 0;
    while ip < ins.len() {
        let Some(op) = Opcode::from_u8(ins[ip]) else {
            break;
        };
        if ip + op.width() > ins.len() {
            break;
        }
        if matches!(op, Opcode::Const | Opcode::Closure) {
            let old = read_u16(ins, ip + 1);
            if let Some(&new) = index_map.get(old) {
                if new != old {
                    let buf = out.get_or_insert_with(|| ins.to_vec());
                    buf[ip + 1..ip + 3].copy_from_slice(&(new as u16).to_be_bytes());
                }
            }
        }
        ip += op.width();
    }
    out
}
