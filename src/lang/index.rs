//! `INDEX`, `SETINDEX` and `SLICEINDEX` semantics.

use super::Object;
use crate::runtime::ErrorKind;

impl Object {
    /// `self[index]`.
    ///
    /// Sequences fail on out-of-range indices; maps yield `Undefined` for
    /// missing keys.
    pub fn index_get(&self, index: &Object) -> Result<Object, ErrorKind> {
        match self {
            Object::Array(a) => {
                let i = seq_index(index)?;
                a.read().get(i).cloned().ok_or(ErrorKind::IndexOutOfBounds)
            }
            Object::ImmutableArray(a) => {
                let i = seq_index(index)?;
                a.get(i).cloned().ok_or(ErrorKind::IndexOutOfBounds)
            }
            Object::String(s) => {
                let i = seq_index(index)?;
                s.chars()
                    .nth(i)
                    .map(Object::Char)
                    .ok_or(ErrorKind::IndexOutOfBounds)
            }
            Object::Bytes(b) => {
                let i = seq_index(index)?;
                b.get(i)
                    .map(|v| Object::Int(*v as i64))
                    .ok_or(ErrorKind::IndexOutOfBounds)
            }
            Object::Map(m) => {
                let key = map_key(index)?;
                Ok(m.read().get(key).cloned().unwrap_or_default())
            }
            Object::ImmutableMap(m) => {
                let key = map_key(index)?;
                Ok(m.get(key).cloned().unwrap_or_default())
            }
            Object::Error(e) => match index {
                Object::String(s) if &**s == "value" => Ok(e.as_ref().clone()),
                _ => Err(ErrorKind::InvalidIndexOnError),
            },
            Object::Undefined => Ok(Object::Undefined),
            other => Err(ErrorKind::NotIndexable(other.type_name())),
        }
    }

    /// `self[index] = value`. Only mutable arrays and maps accept it.
    pub fn index_set(&self, index: &Object, value: Object) -> Result<(), ErrorKind> {
        match self {
            Object::Array(a) => {
                let i = seq_index(index)?;
                let mut items = a.write();
                let slot = items.get_mut(i).ok_or(ErrorKind::IndexOutOfBounds)?;
                *slot = value;
                Ok(())
            }
            Object::Map(m) => {
                let key = map_key(index)?;
                m.write().insert(key.to_string(), value);
                Ok(())
            }
            other => Err(ErrorKind::NotIndexAssignable(other.type_name())),
        }
    }

    /// `self[low:high]`. `None` bounds are open; explicit bounds must lie
    /// within `0..=len` with `low <= high`.
    pub fn slice(&self, low: Option<i64>, high: Option<i64>) -> Result<Object, ErrorKind> {
        let len = match self {
            Object::Array(a) => a.read().len(),
            Object::ImmutableArray(a) => a.len(),
            Object::String(s) => s.chars().count(),
            Object::Bytes(b) => b.len(),
            other => return Err(ErrorKind::NotIndexable(other.type_name())),
        };
        let lo = low.unwrap_or(0);
        let hi = high.unwrap_or(len as i64);
        if lo > hi {
            return Err(ErrorKind::InvalidSliceIndex { low: lo, high: hi });
        }
        if lo < 0 || hi > len as i64 {
            return Err(ErrorKind::IndexOutOfBounds);
        }
        let (lo, hi) = (lo as usize, hi as usize);
        Ok(match self {
            Object::Array(a) => Object::array(a.read()[lo..hi].to_vec()),
            Object::ImmutableArray(a) => Object::immutable_array(a[lo..hi].to_vec()),
            Object::String(s) => Object::string(s.chars().skip(lo).take(hi - lo).collect::<String>()),
            Object::Bytes(b) => Object::bytes(b[lo..hi].to_vec()),
            _ => Object::Undefined,
        })
    }
}

fn seq_index(index: &Object) -> Result<usize, ErrorKind> {
    match index {
        Object::Int(i) => usize::try_from(*i).map_err(|_| ErrorKind::IndexOutOfBounds),
        other => Err(ErrorKind::InvalidIndexType(other.type_name())),
    }
}

fn map_key(index: &Object) -> Result<&str, ErrorKind> {
    match index {
        Object::String(s) => Ok(&**s),
        other => Err(ErrorKind::InvalidIndexType(other.type_name())),
    }
}
