//! Lenient conversions used by the conversion builtins and host accessors.

use super::Object;

impl Object {
    /// Integer view: ints, floats (truncated), chars, bools and numeric
    /// strings convert.
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            Object::Float(f) => Some(*f as i64),
            Object::Char(c) => Some(*c as i64),
            Object::Bool(b) => Some(*b as i64),
            Object::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_float(&self) -> Option<f64> {
        match self {
            Object::Float(f) => Some(*f),
            Object::Int(i) => Some(*i as f64),
            Object::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text form without quoting; `None` for undefined.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Object::Undefined => None,
            Object::String(s) => Some(s.to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn to_char(&self) -> Option<char> {
        match self {
            Object::Char(c) => Some(*c),
            Object::Int(i) => u32::try_from(*i).ok().and_then(char::from_u32),
            Object::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn to_byte_vec(&self) -> Option<Vec<u8>> {
        match self {
            Object::Bytes(b) => Some(b.to_vec()),
            Object::String(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }
}
