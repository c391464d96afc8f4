use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::Object;
use super::value::MapData;

#[derive(Debug)]
enum Source {
    Array(Arc<RwLock<Vec<Object>>>),
    ImmutableArray(Arc<Vec<Object>>),
    /// Keys are snapshotted when iteration starts.
    Map { keys: Vec<String>, entries: MapSource },
    String(Vec<char>),
    Bytes(Arc<[u8]>),
}

#[derive(Debug)]
enum MapSource {
    Mutable(Arc<RwLock<MapData>>),
    Immutable(Arc<MapData>),
}

#[derive(Debug)]
struct IterState {
    source: Source,
    /// Number of successful `next` calls; the current element is `pos - 1`.
    pos: usize,
}

/// Cursor over an array, map, string or bytes value.
#[derive(Debug, Clone)]
pub struct ObjectIterator(Arc<Mutex<IterState>>);

impl ObjectIterator {
    /// Start iterating `value`, or `None` if it is not iterable.
    pub fn new(value: &Object) -> Option<Self> {
        let source = match value {
            Object::Array(a) => Source::Array(a.clone()),
            Object::ImmutableArray(a) => Source::ImmutableArray(a.clone()),
            Object::Map(m) => Source::Map {
                keys: m.read().keys().cloned().collect(),
                entries: MapSource::Mutable(m.clone()),
            },
            Object::ImmutableMap(m) => Source::Map {
                keys: m.keys().cloned().collect(),
                entries: MapSource::Immutable(m.clone()),
            },
            Object::String(s) => Source::String(s.chars().collect()),
            Object::Bytes(b) => Source::Bytes(b.clone()),
            _ => return None,
        };
        Some(ObjectIterator(Arc::new(Mutex::new(IterState { source, pos: 0 }))))
    }

    pub fn type_name(&self) -> &'static str {
        match self.0.lock().source {
            Source::Array(_) | Source::ImmutableArray(_) => "array-iterator",
            Source::Map { .. } => "map-iterator",
            Source::String(_) => "string-iterator",
            Source::Bytes(_) => "bytes-iterator",
        }
    }

    /// Advance; returns false once the source is exhausted.
    pub fn next(&self) -> bool {
        let mut state = self.0.lock();
        let len = match &state.source {
            Source::Array(a) => a.read().len(),
            Source::ImmutableArray(a) => a.len(),
            Source::Map { keys, .. } => keys.len(),
            Source::String(s) => s.len(),
            Source::Bytes(b) => b.len(),
        };
        if state.pos < len {
            state.pos += 1;
            true
        } else {
            false
        }
    }

    /// Index (or map key) of the current element.
    pub fn key(&self) -> Object {
        let state = self.0.lock();
        let Some(idx) = state.pos.checked_sub(1) else {
            return Object::Undefined;
        };
        match &state.source {
            Source::Map { keys, .. } => keys
                .get(idx)
                .map_or(Object::Undefined, |k| Object::string(k.as_str())),
            _ => Object::Int(idx as i64),
        }
    }

    pub fn value(&self) -> Object {
        let state = self.0.lock();
        let Some(idx) = state.pos.checked_sub(1) else {
            return Object::Undefined;
        };
        let value = match &state.source {
            Source::Array(a) => a.read().get(idx).cloned(),
            Source::ImmutableArray(a) => a.get(idx).cloned(),
            Source::Map { keys, entries } => keys.get(idx).and_then(|k| match entries {
                MapSource::Mutable(m) => m.read().get(k).cloned(),
                MapSource::Immutable(m) => m.get(k).cloned(),
            }),
            Source::String(s) => s.get(idx).map(|c| Object::Char(*c)),
            Source::Bytes(b) => b.get(idx).map(|v| Object::Int(*v as i64)),
        };
        value.unwrap_or(Object::Undefined)
    }

    pub fn ptr_eq(&self, other: &ObjectIterator) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
