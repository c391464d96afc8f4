//! # Binary serialization
//!
//! Bytecode and program state are mirrored into serde types (`wire`) and
//! written with postcard. A marshaled program is the zstd-compressed
//! postcard payload inside the artifact frame:
//!
//! ```text
//! MAGIC "VVC\0" | SIZE (u32 LE) | PAYLOAD (SIZE bytes) | CRC64 (u64 LE)
//! ```

pub mod artifact;
mod wire;

use thiserror::Error;

use crate::bytecode::Bytecode;
use crate::lang::ModuleMap;

pub use artifact::{MAGIC, ProgramImage, frame, unframe};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot encode {0}")]
    Unsupported(String),

    #[error("payload too large: {0} bytes")]
    TooLarge(usize),

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid magic")]
    BadMagic,

    #[error("truncated artifact: {0} bytes")]
    Truncated(usize),

    #[error("size mismatch: header says {declared} bytes, found {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: expected {expected:#018x}, computed {actual:#018x}")]
    Checksum { expected: u64, actual: u64 },

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("module '{0}' not found")]
    UnknownModule(String),

    #[error("builtin function '{0}' cannot be decoded outside a module")]
    BuiltinValue(String),

    #[error("invalid instruction at offset {0}")]
    InvalidInstruction(usize),

    #[error("constant index {0} out of range")]
    ConstIndex(usize),

    #[error("time {0}s from the epoch is out of range")]
    TimeOutOfRange(i64),

    #[error("function declares {parameters} parameters but only {locals} locals")]
    ParametersExceedLocals { parameters: usize, locals: usize },

    #[error("variadic function without parameters")]
    VarargsWithoutParameters,

    #[error("function declares {0} locals, more than local operands can address")]
    TooManyLocals(usize),

    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Uncompressed postcard encoding of one compiled unit.
pub fn encode_bytecode(bc: &Bytecode) -> Result<Vec<u8>, EncodeError> {
    let wire = wire::WireBytecode::encode(bc)?;
    Ok(postcard::to_allocvec(&wire)?)
}

/// Inverse of [`encode_bytecode`]; builtin modules are re-bound against
/// `modules`.
pub fn decode_bytecode(bytes: &[u8], modules: &ModuleMap) -> Result<Bytecode, DecodeError> {
    let wire: wire::WireBytecode = postcard::from_bytes(bytes)?;
    wire.decode(modules)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::ast::FileSet;
    use crate::bytecode::op::{Opcode, make_instruction};
    use crate::lang::{CompiledFunction, MapData, Object};
    use pretty_assertions::assert_eq;

    fn modules() -> ModuleMap {
        let mut modules = ModuleMap::new();
        modules.add_builtin_module("fmt", MapData::new());
        modules
    }

    fn scalar() -> impl Strategy<Value = Object> {
        prop_oneof![
            Just(Object::Undefined),
            any::<bool>().prop_map(Object::Bool),
            any::<i64>().prop_map(Object::Int),
            any::<f64>().prop_map(Object::Float),
            any::<char>().prop_map(Object::Char),
            ".{0,12}".prop_map(Object::string),
            proptest::collection::vec(any::<u8>(), 0..8).prop_map(Object::bytes),
        ]
    }

    fn constant() -> impl Strategy<Value = Object> {
        scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Object::array),
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Object::immutable_array),
                proptest::collection::btree_map("[a-z]{1,4}", inner.clone(), 0..4).prop_map(Object::map),
                inner.clone().prop_map(Object::error),
                proptest::collection::vec(any::<u8>(), 0..6).prop_map(|ins| {
                    Object::CompiledFunction(Arc::new(CompiledFunction {
                        num_locals: ins.len() % 3,
                        ..CompiledFunction::new(ins.into_iter().map(|b| b % 3 + 1).collect())
                    }))
                }),
            ]
        })
    }

    fn unit(constants: Vec<Object>) -> Bytecode {
        let mut main = Vec::new();
        for idx in 0..constants.len() {
            main.extend(make_instruction(Opcode::Const, &[idx]));
            main.extend(make_instruction(Opcode::Pop, &[]));
        }
        main.extend(make_instruction(Opcode::Suspend, &[]));
        let mut file_set = FileSet::new();
        file_set.add_file("main.vv", None, 40).add_line(12);
        Bytecode {
            file_set,
            main_function: Arc::new(CompiledFunction::new(main)),
            constants,
        }
    }

    proptest! {
        #[test]
        fn bytecode_roundtrips(constants in proptest::collection::vec(constant(), 0..6)) {
            let bc = unit(constants);
            let bytes = encode_bytecode(&bc).expect("encodes");
            let back = decode_bytecode(&bytes, &modules()).expect("decodes");
            prop_assert_eq!(&back, &bc);
            prop_assert_eq!(encode_bytecode(&back).expect("re-encodes"), bytes);
        }
    }

    #[test]
    fn test_module_constant_rebinds() {
        let fmt = modules().get("fmt").and_then(|m| m.as_module_object("fmt")).expect("module");
        let bc = unit(vec![fmt.clone()]);
        let back = decode_bytecode(&encode_bytecode(&bc).expect("encodes"), &modules()).expect("decodes");
        assert_eq!(back.constants, vec![fmt]);

        let err = decode_bytecode(&encode_bytecode(&bc).expect("encodes"), &ModuleMap::new()).expect_err("unbound");
        assert!(matches!(err, DecodeError::UnknownModule(_)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_bytecode(&[0xff, 0xff, 0xff], &modules()).is_err());
    }
}
