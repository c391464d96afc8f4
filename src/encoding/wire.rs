//! Serializable mirror of the object model.
//!
//! Live values (host closures, iterators) have no wire form. Builtin
//! modules travel by name and are re-bound against a [`ModuleMap`] when
//! decoded.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{DecodeError, EncodeError};
use crate::ast::{FileSet, Pos};
use crate::bytecode::Bytecode;
use crate::bytecode::op::{MAX_LOCALS, Opcode, read_u16};
use crate::lang::value::unix_parts;
use crate::lang::{CompiledFunction, Importable, MapData, ModuleMap, Object, ObjectPtr};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum WireObject {
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
    /// Nanoseconds since the Unix epoch.
    /// Seconds since the Unix epoch and the sub-second nanoseconds.
    Time(i64, u32),
    Array(Vec<WireObject>),
    ImmutableArray(Vec<WireObject>),
    Map(Vec<(String, WireObject)>),
    ImmutableMap(Vec<(String, WireObject)>),
    /// An imported builtin module, by registry name.
    Module(String),
    Error(Box<WireObject>),
    Function(Box<WireFunction>),
    /// Only valid inside a module; a bare one fails to decode.
    Builtin(String),
    /// Cell contents of a captured variable.
    Cell(Box<WireObject>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WireFunction {
    instructions: Vec<u8>,
    num_locals: usize,
    num_parameters: usize,
    varargs: bool,
    source_map: Vec<(usize, Pos)>,
    free: Vec<WireObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WireBytecode {
    file_set: FileSet,
    main_function: WireFunction,
    constants: Vec<WireObject>,
}

// =============================================================================
// Encoding
// =============================================================================

impl WireObject {
    pub(crate) fn encode(value: &Object) -> Result<WireObject, EncodeError> {
        Ok(match value {
            Object::Undefined => WireObject::Undefined,
            Object::Bool(b) => WireObject::Bool(*b),
            Object::Int(i) => WireObject::Int(*i),
            Object::Float(f) => WireObject::Float(*f),
            Object::Char(c) => WireObject::Char(*c),
            Object::String(s) => WireObject::String(s.to_string()),
            Object::Bytes(b) => WireObject::Bytes(b.to_vec()),
            Object::Time(t) => {
                let (secs, nanos) = unix_parts(*t);
                WireObject::Time(secs, nanos)
            }
            Object::Array(items) => WireObject::Array(encode_all(&items.read())?),
            Object::ImmutableArray(items) => WireObject::ImmutableArray(encode_all(items)?),
            Object::Map(entries) => WireObject::Map(encode_entries(&entries.read())?),
            Object::ImmutableMap(entries) => match ModuleMap::module_name_of(value) {
                Some(name) => WireObject::Module(name.to_string()),
                None => WireObject::ImmutableMap(encode_entries(entries)?),
            },
            Object::Error(inner) => WireObject::Error(Box::new(WireObject::encode(inner)?)),
            Object::CompiledFunction(f) => WireObject::Function(Box::new(WireFunction::encode(f)?)),
            Object::BuiltinFunction(f) => WireObject::Builtin(f.name.to_string()),
            Object::ObjectPtr(cell) => WireObject::Cell(Box::new(WireObject::encode(&cell.get())?)),
            Object::UserFunction(f) => return Err(EncodeError::Unsupported(format!("user-function '{}'", f.name))),
            Object::Iterator(it) => return Err(EncodeError::Unsupported(it.type_name().to_string())),
        })
    }

    pub(crate) fn decode(self, modules: &ModuleMap) -> Result<Object, DecodeError> {
        Ok(match self {
            WireObject::Undefined => Object::Undefined,
            WireObject::Bool(b) => Object::Bool(b),
            WireObject::Int(i) => Object::Int(i),
            WireObject::Float(f) => Object::Float(f),
            WireObject::Char(c) => Object::Char(c),
            WireObject::String(s) => Object::string(s),
            WireObject::Bytes(b) => Object::bytes(b),
            WireObject::Time(secs, nanos) => {
                Object::time_from_unix(secs, nanos).ok_or(DecodeError::TimeOutOfRange(secs))?
            }
            WireObject::Array(items) => Object::array(decode_all(items, modules)?),
            WireObject::ImmutableArray(items) => Object::immutable_array(decode_all(items, modules)?),
            WireObject::Map(entries) => Object::map(decode_entries(entries, modules)?),
            WireObject::ImmutableMap(entries) => Object::immutable_map(decode_entries(entries, modules)?),
            WireObject::Module(name) => match modules.get(&name) {
                Some(module @ Importable::Builtin(_)) => module
                    .as_module_object(&name)
                    .ok_or(DecodeError::UnknownModule(name))?,
                _ => return Err(DecodeError::UnknownModule(name)),
            },
            WireObject::Error(inner) => Object::error(inner.decode(modules)?),
            WireObject::Function(f) => Object::CompiledFunction(Arc::new(f.decode(modules)?)),
            WireObject::Builtin(name) => return Err(DecodeError::BuiltinValue(name)),
            WireObject::Cell(inner) => Object::ObjectPtr(ObjectPtr::new(inner.decode(modules)?)),
        })
    }
}

fn encode_all(items: &[Object]) -> Result<Vec<WireObject>, EncodeError> {
    items.iter().map(WireObject::encode).collect()
}

fn encode_entries(entries: &MapData) -> Result<Vec<(String, WireObject)>, EncodeError> {
    entries
        .iter()
        .map(|(k, v)| Ok((k.clone(), WireObject::encode(v)?)))
        .collect()
}

fn decode_all(items: Vec<WireObject>, modules: &ModuleMap) -> Result<Vec<Object>, DecodeError> {
    items.into_iter().map(|item| item.decode(modules)).collect()
}

fn decode_entries(entries: Vec<(String, WireObject)>, modules: &ModuleMap) -> Result<MapData, DecodeError> {
    entries
        .into_iter()
        .map(|(k, v)| Ok((k, v.decode(modules)?)))
        .collect()
}

impl WireFunction {
    fn encode(f: &CompiledFunction) -> Result<WireFunction, EncodeError> {
        Ok(WireFunction {
            instructions: f.instructions.to_vec(),
            num_locals: f.num_locals,
            num_parameters: f.num_parameters,
            varargs: f.varargs,
            source_map: f.source_map.iter().map(|(ip, pos)| (*ip, *pos)).collect(),
            free: f
                .free
                .iter()
                .map(|cell| WireObject::encode(&cell.get()))
                .collect::<Result<_, _>>()?,
        })
    }

    fn decode(self, modules: &ModuleMap) -> Result<CompiledFunction, DecodeError> {
        if self.num_locals > MAX_LOCALS {
            return Err(DecodeError::TooManyLocals(self.num_locals));
        }
        if self.num_parameters > self.num_locals {
            return Err(DecodeError::ParametersExceedLocals {
                parameters: self.num_parameters,
                locals: self.num_locals,
            });
        }
        if self.varargs && self.num_parameters == 0 {
            return Err(DecodeError::VarargsWithoutParameters);
        }
        let free = self
            .free
            .into_iter()
            .map(|value| Ok(ObjectPtr::new(value.decode(modules)?)))
            .collect::<Result<_, DecodeError>>()?;
        Ok(CompiledFunction {
            instructions: self.instructions.into(),
            num_locals: self.num_locals,
            num_parameters: self.num_parameters,
            varargs: self.varargs,
            source_map: Arc::new(self.source_map.into_iter().collect::<BTreeMap<_, _>>()),
            free,
        })
    }
}

impl WireBytecode {
    pub(crate) fn encode(bc: &Bytecode) -> Result<WireBytecode, EncodeError> {
        Ok(WireBytecode {
            file_set: bc.file_set.clone(),
            main_function: WireFunction::encode(&bc.main_function)?,
            constants: encode_all(&bc.constants)?,
        })
    }

    pub(crate) fn decode(self, modules: &ModuleMap) -> Result<Bytecode, DecodeError> {
        let bc = Bytecode {
            file_set: self.file_set,
            main_function: Arc::new(self.main_function.decode(modules)?),
            constants: decode_all(self.constants, modules)?,
        };
        check_const_operands(&bc)?;
        Ok(bc)
    }
}

/// Every `CONST`/`CLOSURE` operand must index the constant pool.
fn check_const_operands(bc: &Bytecode) -> Result<(), DecodeError> {
    let functions = std::iter::once(&bc.main_function).chain(bc.constants.iter().filter_map(|c| match c {
        Object::CompiledFunction(f) => Some(f),
        _ => None,
    }));
    for f in functions {
        let ins = &f.instructions;
        let mut ip = 0;
        while ip < ins.len() {
            let Some(op) = Opcode::from_u8(ins[ip]) else {
                return Err(DecodeError::InvalidInstruction(ip));
            };
            if ip + op.width() > ins.len() {
                return Err(DecodeError::InvalidInstruction(ip));
            }
            if matches!(op, Opcode::Const | Opcode::Closure) {
                let idx = read_u16(ins, ip + 1);
                if idx >= bc.constants.len() {
                    return Err(DecodeError::ConstIndex(idx));
                }
            }
            ip += op.width();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{Builtins, UserFunction};
    use pretty_assertions::assert_eq;

    fn modules() -> ModuleMap {
        let mut modules = ModuleMap::new();
        let mut attrs = MapData::new();
        attrs.insert("pi".to_string(), Object::Float(3.5));
        modules.add_builtin_module("math", attrs);
        modules
    }

    fn roundtrip(value: &Object) -> Object {
        WireObject::encode(value)
            .expect("encodes")
            .decode(&modules())
            .expect("decodes")
    }

    #[test]
    fn test_module_travels_by_name() {
        let math = modules().get("math").and_then(|m| m.as_module_object("math")).expect("module");
        let wire = WireObject::encode(&math).expect("encodes");
        assert_eq!(wire, WireObject::Module("math".to_string()));
        assert_eq!(roundtrip(&math), math);
    }

    #[test]
    fn test_unknown_module_fails() {
        let err = WireObject::Module("os".to_string()).decode(&modules()).expect_err("unknown");
        assert!(matches!(err, DecodeError::UnknownModule(name) if name == "os"));
    }

    #[test]
    fn test_bare_builtin_fails_to_decode() {
        let len = *Builtins::standard().get(0).expect("len");
        let wire = WireObject::encode(&Object::BuiltinFunction(len)).expect("encodes");
        let err = wire.decode(&modules()).expect_err("bare builtin");
        assert!(matches!(err, DecodeError::BuiltinValue(name) if name == "len"));
    }

    #[test]
    fn test_user_function_does_not_encode() {
        let f = UserFunction::object("host", |_, _| Ok(Object::Undefined));
        assert!(matches!(WireObject::encode(&f), Err(EncodeError::Unsupported(_))));
    }

    #[test]
    fn test_times_keep_seconds_and_nanos() {
        let zero = Object::time_from_unix(-62_135_596_800, 0).expect("year 1");
        assert!(zero.is_falsy());
        assert_eq!(roundtrip(&zero), zero);

        let t = Object::time_from_unix(-3, 250).expect("in range");
        assert_eq!(WireObject::encode(&t).expect("encodes"), WireObject::Time(-3, 250));
        assert_eq!(roundtrip(&t), t);

        let err = WireObject::Time(0, 1_000_000_000).decode(&modules()).expect_err("bad nanos");
        assert!(matches!(err, DecodeError::TimeOutOfRange(0)));
    }

    #[test]
    fn test_captured_cells_keep_their_values() {
        let f = CompiledFunction::new(vec![Opcode::Suspend as u8]).with_free(vec![ObjectPtr::new(Object::Int(4))]);
        let Object::CompiledFunction(back) = roundtrip(&Object::CompiledFunction(Arc::new(f))) else {
            panic!("function");
        };
        assert_eq!(back.free[0].get(), Object::Int(4));
    }

    #[test]
    fn test_out_of_range_const_is_rejected() {
        let wire = WireBytecode {
            file_set: FileSet::new(),
            main_function: WireFunction::encode(&CompiledFunction::new(vec![Opcode::Const as u8, 0, 3]))
                .expect("encodes"),
            constants: vec![WireObject::Int(1)],
        };
        assert!(matches!(wire.decode(&modules()), Err(DecodeError::ConstIndex(3))));
    }

    fn shaped(num_locals: usize, num_parameters: usize, varargs: bool) -> WireObject {
        WireObject::Function(Box::new(WireFunction {
            instructions: vec![Opcode::Suspend as u8],
            num_locals,
            num_parameters,
            varargs,
            source_map: Vec::new(),
            free: Vec::new(),
        }))
    }

    #[test]
    fn test_function_shape_is_checked() {
        assert!(shaped(2, 2, true).decode(&modules()).is_ok());
        assert!(shaped(MAX_LOCALS, 0, false).decode(&modules()).is_ok());

        let err = shaped(0, 2, false).decode(&modules()).expect_err("parameters beyond locals");
        assert!(matches!(err, DecodeError::ParametersExceedLocals { parameters: 2, locals: 0 }));

        let err = shaped(1, 0, true).decode(&modules()).expect_err("variadic without parameter");
        assert!(matches!(err, DecodeError::VarargsWithoutParameters));

        let err = shaped(MAX_LOCALS + 1, 0, false).decode(&modules()).expect_err("too many locals");
        assert!(matches!(err, DecodeError::TooManyLocals(n) if n == MAX_LOCALS + 1));
    }

    #[test]
    fn test_bad_function_inside_containers_is_rejected() {
        let nested = WireObject::Array(vec![WireObject::Cell(Box::new(shaped(0, 1, false)))]);
        assert!(matches!(
            nested.decode(&modules()),
            Err(DecodeError::ParametersExceedLocals { .. })
        ));
    }
}
