//! Program artifacts: framing, checksum and compressed payload.

use crc::{CRC_64_XZ, Crc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::wire::{WireBytecode, WireObject};
use super::{DecodeError, EncodeError};
use crate::bytecode::Bytecode;
use crate::lang::{ModuleMap, Object};

pub const MAGIC: [u8; 4] = *b"VVC\0";

const HEADER_LEN: usize = 8;
const CHECKSUM_LEN: usize = 8;
const ZSTD_LEVEL: i32 = 3;

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Everything a compiled program needs to run again.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramImage {
    /// Host-visible global names and their slots.
    pub names: Vec<(String, usize)>,
    pub globals: Vec<Object>,
    pub max_allocs: i64,
    pub bytecode: Bytecode,
}

#[derive(Serialize, Deserialize)]
struct WireProgram {
    names: Vec<(String, usize)>,
    globals: Vec<WireObject>,
    max_allocs: i64,
    bytecode: WireBytecode,
}

impl ProgramImage {
    pub fn marshal(&self) -> Result<Vec<u8>, EncodeError> {
        let wire = WireProgram {
            names: self.names.clone(),
            globals: self.globals.iter().map(WireObject::encode).collect::<Result<_, _>>()?,
            max_allocs: self.max_allocs,
            bytecode: WireBytecode::encode(&self.bytecode)?,
        };
        let raw = postcard::to_allocvec(&wire)?;
        let payload = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL).map_err(|e| EncodeError::Compress(e.to_string()))?;
        let framed = frame(&payload)?;
        debug!(raw = raw.len(), compressed = payload.len(), "program marshaled");
        Ok(framed)
    }

    pub fn unmarshal(bytes: &[u8], modules: &ModuleMap) -> Result<ProgramImage, DecodeError> {
        let payload = unframe(bytes)?;
        let raw = zstd::decode_all(payload).map_err(|e| DecodeError::Decompress(e.to_string()))?;
        let wire: WireProgram = postcard::from_bytes(&raw)?;
        debug!(compressed = payload.len(), raw = raw.len(), "program unmarshaled");
        Ok(ProgramImage {
            names: wire.names,
            globals: wire
                .globals
                .into_iter()
                .map(|g| g.decode(modules))
                .collect::<Result<_, _>>()?,
            max_allocs: wire.max_allocs,
            bytecode: wire.bytecode.decode(modules)?,
        })
    }
}

/// Wrap `payload` as `MAGIC | SIZE | PAYLOAD | CRC64`.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let size = u32::try_from(payload.len()).map_err(|_| EncodeError::TooLarge(payload.len()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&CRC64.checksum(payload).to_le_bytes());
    Ok(out)
}

/// Check magic, declared size and checksum; return the payload.
pub fn unframe(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(DecodeError::Truncated(bytes.len()));
    }
    if bytes[..4] != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let declared = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let actual = bytes.len() - HEADER_LEN - CHECKSUM_LEN;
    if declared != actual {
        return Err(DecodeError::SizeMismatch { declared, actual });
    }
    let (payload, tail) = bytes[HEADER_LEN..].split_at(declared);
    let mut sum = [0u8; CHECKSUM_LEN];
    sum.copy_from_slice(tail);
    let expected = u64::from_le_bytes(sum);
    let actual = CRC64.checksum(payload);
    if expected != actual {
        return Err(DecodeError::Checksum { expected, actual });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ast::FileSet;
    use crate::bytecode::op::{Opcode, make_instruction};
    use crate::lang::CompiledFunction;
    use pretty_assertions::assert_eq;

    fn image() -> ProgramImage {
        ProgramImage {
            names: vec![("a".to_string(), 0), ("b".to_string(), 1)],
            globals: vec![Object::Int(5), Object::string("x")],
            max_allocs: 100,
            bytecode: Bytecode {
                file_set: FileSet::new(),
                main_function: Arc::new(CompiledFunction::new(make_instruction(Opcode::Suspend, &[]))),
                constants: vec![Object::Float(1.5)],
            },
        }
    }

    #[test]
    fn test_frame_layout() {
        let framed = frame(b"abc").expect("frames");
        assert_eq!(&framed[..4], b"VVC\0");
        assert_eq!(&framed[4..8], &3u32.to_le_bytes());
        assert_eq!(&framed[8..11], b"abc");
        assert_eq!(framed.len(), 8 + 3 + 8);
        assert_eq!(unframe(&framed).expect("unframes"), b"abc");
    }

    #[test]
    fn test_crc_matches_check_value() {
        // CRC-64/XZ check value for "123456789"
        assert_eq!(CRC64.checksum(b"123456789"), 0x995d_c9bb_df19_39fa);
    }

    #[test]
    fn test_corruption_is_detected() {
        let framed = frame(b"payload").expect("frames");

        let mut bad_magic = framed.clone();
        bad_magic[0] = b'X';
        assert!(matches!(unframe(&bad_magic), Err(DecodeError::BadMagic)));

        let mut flipped = framed.clone();
        flipped[9] ^= 0x01;
        assert!(matches!(unframe(&flipped), Err(DecodeError::Checksum { .. })));

        let short = &framed[..framed.len() - 1];
        assert!(matches!(unframe(short), Err(DecodeError::SizeMismatch { declared: 7, actual: 6 })));

        assert!(matches!(unframe(b"VVC"), Err(DecodeError::Truncated(3))));
    }

    #[test]
    fn test_program_roundtrip() {
        let img = image();
        let bytes = img.marshal().expect("marshals");
        let back = ProgramImage::unmarshal(&bytes, &ModuleMap::new()).expect("unmarshals");
        assert_eq!(back, img);
        assert_eq!(back.marshal().expect("re-marshals"), bytes);
    }
}
