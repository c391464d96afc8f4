use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use super::function::{BuiltinFunction, CompiledFunction, ObjectPtr, UserFunction};
use super::iter::ObjectIterator;

/// Backing store of map objects. Ordered so that display, iteration and
/// serialization are deterministic.
pub type MapData = BTreeMap<String, Object>;

// =============================================================================
// OBJECT - runtime values
// =============================================================================

/// A runtime value.
///
/// Scalars are stored inline. Containers are reference types: cloning an
/// `Object::Array` shares the same backing vector, as assignment does in
/// scripts. [`Object::copy`] makes an independent deep copy.
#[derive(Debug, Clone, Default)]
pub enum Object {
    #[default]
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
    Time(SystemTime),

    // ─── Containers ───
    Array(Arc<RwLock<Vec<Object>>>),
    ImmutableArray(Arc<Vec<Object>>),
    Map(Arc<RwLock<MapData>>),
    ImmutableMap(Arc<MapData>),

    /// Wraps a payload. Compared by identity.
    Error(Arc<Object>),

    // ─── Callables ───
    CompiledFunction(Arc<CompiledFunction>),
    BuiltinFunction(BuiltinFunction),
    UserFunction(Arc<UserFunction>),

    /// Shared cell holding a captured variable.
    ObjectPtr(ObjectPtr),

    /// Transient iterator pushed by `for .. in`.
    Iterator(ObjectIterator),
}

impl Object {
    pub fn string(s: impl Into<Arc<str>>) -> Object {
        Object::String(s.into())
    }

    pub fn bytes(b: impl Into<Arc<[u8]>>) -> Object {
        Object::Bytes(b.into())
    }

    pub fn array(items: Vec<Object>) -> Object {
        Object::Array(Arc::new(RwLock::new(items)))
    }

    pub fn immutable_array(items: Vec<Object>) -> Object {
        Object::ImmutableArray(Arc::new(items))
    }

    pub fn map(entries: MapData) -> Object {
        Object::Map(Arc::new(RwLock::new(entries)))
    }

    pub fn immutable_map(entries: MapData) -> Object {
        Object::ImmutableMap(Arc::new(entries))
    }

    pub fn error(value: Object) -> Object {
        Object::Error(Arc::new(value))
    }

    /// An `Error` object carrying a string message.
    pub fn error_message(message: impl Into<Arc<str>>) -> Object {
        Object::error(Object::string(message))
    }

    /// Time `nanos` nanoseconds after the Unix epoch (negative goes back).
    pub fn time_from_unix_nanos(nanos: i64) -> Option<Object> {
        offset_time(UNIX_EPOCH, nanos).map(Object::Time)
    }

    /// Time `secs` seconds plus `nanos` after the Unix epoch; `None` when
    /// `nanos` is not a sub-second value or the platform cannot hold it.
    pub fn time_from_unix(secs: i64, nanos: u32) -> Option<Object> {
        if nanos >= NANOS_PER_SEC {
            return None;
        }
        let whole = Duration::from_secs(secs.unsigned_abs());
        let base = if secs >= 0 {
            UNIX_EPOCH.checked_add(whole)
        } else {
            UNIX_EPOCH.checked_sub(whole)
        };
        base?.checked_add(Duration::from_nanos(nanos.into())).map(Object::Time)
    }

    pub fn type_name(&self) -> String {
        match self {
            Object::Undefined => "undefined".into(),
            Object::Bool(_) => "bool".into(),
            Object::Int(_) => "int".into(),
            Object::Float(_) => "float".into(),
            Object::Char(_) => "char".into(),
            Object::String(_) => "string".into(),
            Object::Bytes(_) => "bytes".into(),
            Object::Time(_) => "time".into(),
            Object::Array(_) => "array".into(),
            Object::ImmutableArray(_) => "immutable-array".into(),
            Object::Map(_) => "map".into(),
            Object::ImmutableMap(_) => "immutable-map".into(),
            Object::Error(_) => "error".into(),
            Object::CompiledFunction(_) => "compiled-function".into(),
            Object::BuiltinFunction(f) => format!("builtin-function:{}", f.name),
            Object::UserFunction(f) => format!("user-function:{}", f.name),
            Object::ObjectPtr(_) => "<free-var>".into(),
            Object::Iterator(it) => it.type_name().into(),
        }
    }

    pub fn is_falsy(&self) -> bool {
        match self {
            Object::Undefined => true,
            Object::Bool(b) => !b,
            Object::Int(i) => *i == 0,
            Object::Float(f) => f.is_nan(),
            Object::Char(c) => *c == '\0',
            Object::String(s) => s.is_empty(),
            Object::Bytes(b) => b.is_empty(),
            Object::Time(t) => zero_time() == Some(*t),
            Object::Array(a) => a.read().is_empty(),
            Object::ImmutableArray(a) => a.is_empty(),
            Object::Map(m) => m.read().is_empty(),
            Object::ImmutableMap(m) => m.is_empty(),
            Object::Error(_) => true,
            Object::Iterator(_) => true,
            Object::CompiledFunction(_)
            | Object::BuiltinFunction(_)
            | Object::UserFunction(_)
            | Object::ObjectPtr(_) => false,
        }
    }

    /// Script-level equality (`==`).
    ///
    /// Numbers only equal numbers of the same type; arrays and maps compare
    /// element-wise across their mutable and immutable forms; errors,
    /// functions and iterators compare by identity.
    pub fn equals(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Undefined, Object::Undefined) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::Char(a), Object::Char(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Bytes(a), Object::Bytes(b)) => a == b,
            (Object::Time(a), Object::Time(b)) => a == b,
            (
                Object::Array(_) | Object::ImmutableArray(_),
                Object::Array(_) | Object::ImmutableArray(_),
            ) => {
                if self.same_ref(other) {
                    return true;
                }
                let (a, b) = (self.array_items(), other.array_items());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (
                Object::Map(_) | Object::ImmutableMap(_),
                Object::Map(_) | Object::ImmutableMap(_),
            ) => {
                if self.same_ref(other) {
                    return true;
                }
                let (a, b) = (self.map_entries(), other.map_entries());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.equals(w)))
            }
            _ => self.same_ref(other),
        }
    }

    /// Whether both values point at the same heap object.
    pub fn same_ref(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Array(a), Object::Array(b)) => Arc::ptr_eq(a, b),
            (Object::ImmutableArray(a), Object::ImmutableArray(b)) => Arc::ptr_eq(a, b),
            (Object::Map(a), Object::Map(b)) => Arc::ptr_eq(a, b),
            (Object::ImmutableMap(a), Object::ImmutableMap(b)) => Arc::ptr_eq(a, b),
            (Object::Error(a), Object::Error(b)) => Arc::ptr_eq(a, b),
            (Object::CompiledFunction(a), Object::CompiledFunction(b)) => Arc::ptr_eq(a, b),
            (Object::BuiltinFunction(a), Object::BuiltinFunction(b)) => a == b,
            (Object::UserFunction(a), Object::UserFunction(b)) => Arc::ptr_eq(a, b),
            (Object::ObjectPtr(a), Object::ObjectPtr(b)) => a.ptr_eq(b),
            (Object::Iterator(a), Object::Iterator(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Deep copy: containers get fresh backing storage, recursively.
    pub fn copy(&self) -> Object {
        match self {
            Object::Array(a) => Object::array(a.read().iter().map(Object::copy).collect()),
            Object::ImmutableArray(a) => Object::immutable_array(a.iter().map(Object::copy).collect()),
            Object::Map(m) => Object::map(copy_entries(&m.read())),
            Object::ImmutableMap(m) => Object::immutable_map(copy_entries(m)),
            Object::Error(e) => Object::error(e.copy()),
            Object::CompiledFunction(f) => Object::CompiledFunction(Arc::new(CompiledFunction::clone(f))),
            other => other.clone(),
        }
    }

    /// Snapshot of the elements of an array of either kind; empty otherwise.
    pub fn array_items(&self) -> Vec<Object> {
        match self {
            Object::Array(a) => a.read().clone(),
            Object::ImmutableArray(a) => a.as_ref().clone(),
            _ => Vec::new(),
        }
    }

    /// Snapshot of the entries of a map of either kind; empty otherwise.
    pub fn map_entries(&self) -> MapData {
        match self {
            Object::Map(m) => m.read().clone(),
            Object::ImmutableMap(m) => m.as_ref().clone(),
            _ => MapData::new(),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Object::CompiledFunction(_) | Object::BuiltinFunction(_) | Object::UserFunction(_)
        )
    }

    pub fn is_iterable(&self) -> bool {
        matches!(
            self,
            Object::Array(_)
                | Object::ImmutableArray(_)
                | Object::Map(_)
                | Object::ImmutableMap(_)
                | Object::String(_)
                | Object::Bytes(_)
        )
    }

    /// Number of objects this value accounts for against a constant budget,
    /// counting container elements.
    pub fn count_objects(&self) -> usize {
        match self {
            Object::Array(a) => 1 + a.read().iter().map(Object::count_objects).sum::<usize>(),
            Object::ImmutableArray(a) => 1 + a.iter().map(Object::count_objects).sum::<usize>(),
            Object::Map(m) => 1 + m.read().values().map(Object::count_objects).sum::<usize>(),
            Object::ImmutableMap(m) => 1 + m.values().map(Object::count_objects).sum::<usize>(),
            Object::Error(e) => 1 + e.count_objects(),
            _ => 1,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Object::Undefined)
    }
}

fn copy_entries(m: &MapData) -> MapData {
    m.iter().map(|(k, v)| (k.clone(), v.copy())).collect()
}

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Seconds from the zero time, 0001-01-01T00:00:00Z, to the Unix epoch.
const ZERO_TIME_BEFORE_EPOCH_SECS: u64 = 62_135_596_800;

/// The zero time, the only falsy time; `None` where the platform clock
/// cannot reach year 1.
pub fn zero_time() -> Option<SystemTime> {
    UNIX_EPOCH.checked_sub(Duration::from_secs(ZERO_TIME_BEFORE_EPOCH_SECS))
}

/// `t` moved by `nanos`; `None` when the result leaves the platform range.
pub(crate) fn offset_time(t: SystemTime, nanos: i64) -> Option<SystemTime> {
    let d = Duration::from_nanos(nanos.unsigned_abs());
    if nanos >= 0 { t.checked_add(d) } else { t.checked_sub(d) }
}

/// Whole seconds since the epoch (floored) and the non-negative
/// nanosecond remainder.
pub(crate) fn unix_parts(t: SystemTime) -> (i64, u32) {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (i64::try_from(d.as_secs()).unwrap_or(i64::MAX), d.subsec_nanos()),
        Err(e) => {
            let d = e.duration();
            let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
            match d.subsec_nanos() {
                0 => (-secs, 0),
                n => (-secs - 1, NANOS_PER_SEC - n),
            }
        }
    }
}

// ─── Structural equality ───

/// Deep structural equality, used to compare compiled artifacts. Unlike
/// [`Object::equals`] it descends into errors, treats NaN bit patterns as
/// equal, and compares compiled functions by content.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Undefined, Object::Undefined) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a.to_bits() == b.to_bits(),
            (Object::Char(a), Object::Char(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Bytes(a), Object::Bytes(b)) => a == b,
            (Object::Time(a), Object::Time(b)) => a == b,
            (Object::Array(a), Object::Array(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Object::ImmutableArray(a), Object::ImmutableArray(b)) => a == b,
            (Object::Map(a), Object::Map(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Object::ImmutableMap(a), Object::ImmutableMap(b)) => a == b,
            (Object::Error(a), Object::Error(b)) => a == b,
            (Object::CompiledFunction(a), Object::CompiledFunction(b)) => a == b,
            (Object::BuiltinFunction(a), Object::BuiltinFunction(b)) => a == b,
            (Object::UserFunction(a), Object::UserFunction(b)) => Arc::ptr_eq(a, b),
            (Object::ObjectPtr(a), Object::ObjectPtr(b)) => a == b,
            (Object::Iterator(a), Object::Iterator(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

// ─── Display ───

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Undefined => write!(f, "<undefined>"),
            Object::Bool(b) => write!(f, "{}", b),
            Object::Int(i) => write!(f, "{}", i),
            Object::Float(x) => write!(f, "{}", x),
            Object::Char(c) => write!(f, "{}", c),
            Object::String(s) => write!(f, "{:?}", s),
            Object::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Object::Time(t) => {
                let (secs, nanos) = unix_parts(*t);
                write!(f, "time({}.{:09})", secs, nanos)
            }
            Object::Array(a) => write_seq(f, &a.read()),
            Object::ImmutableArray(a) => write_seq(f, a),
            Object::Map(m) => write_entries(f, &m.read()),
            Object::ImmutableMap(m) => write_entries(f, m),
            Object::Error(e) => write!(f, "error: {}", e),
            Object::CompiledFunction(_) => write!(f, "<compiled-function>"),
            Object::BuiltinFunction(_) => write!(f, "<builtin-function>"),
            Object::UserFunction(_) => write!(f, "<user-function>"),
            Object::ObjectPtr(_) => write!(f, "<free-var>"),
            Object::Iterator(_) => write!(f, "<iterator>"),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Object]) -> fmt::Result {
    write!(f, "[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "]")
}

fn write_entries(f: &mut fmt::Formatter<'_>, entries: &MapData) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (k, v)) in entries.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {}", k, v)?;
    }
    write!(f, "}}")
}

// ─── Conversions from host values ───

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Object::Bool(v)
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Object::Int(v)
    }
}

impl From<i32> for Object {
    fn from(v: i32) -> Self {
        Object::Int(v as i64)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Object::Float(v)
    }
}

impl From<char> for Object {
    fn from(v: char) -> Self {
        Object::Char(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Object::string(v)
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Object::string(v)
    }
}

impl From<Vec<Object>> for Object {
    fn from(v: Vec<Object>) -> Self {
        Object::array(v)
    }
}

impl From<MapData> for Object {
    fn from(v: MapData) -> Self {
        Object::map(v)
    }
}

impl From<SystemTime> for Object {
    fn from(v: SystemTime) -> Self {
        Object::Time(v)
    }
}

impl<T: Into<Object>> From<Option<T>> for Object {
    fn from(v: Option<T>) -> Self {
        v.map_or(Object::Undefined, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map_of(entries: &[(&str, Object)]) -> MapData {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // =========================================================================
    // Truthiness and type names
    // =========================================================================

    #[test]
    fn falsy_values() {
        assert!(Object::Undefined.is_falsy());
        assert!(Object::Int(0).is_falsy());
        assert!(Object::Float(f64::NAN).is_falsy());
        assert!(Object::string("").is_falsy());
        assert!(Object::array(vec![]).is_falsy());
        assert!(Object::error(Object::Int(1)).is_falsy());
        assert!(!Object::Float(0.0).is_falsy());
        assert!(!Object::string("x").is_falsy());
        assert!(!Object::Char('a').is_falsy());
    }

    #[test]
    fn type_names() {
        assert_eq!(Object::Undefined.type_name(), "undefined");
        assert_eq!(Object::immutable_array(vec![]).type_name(), "immutable-array");
        assert_eq!(Object::map(MapData::new()).type_name(), "map");
    }

    // =========================================================================
    // Equality
    // =========================================================================

    #[test]
    fn numbers_only_equal_same_type() {
        assert!(Object::Int(1).equals(&Object::Int(1)));
        assert!(!Object::Int(1).equals(&Object::Float(1.0)));
        assert!(!Object::Undefined.equals(&Object::Bool(false)));
    }

    #[test]
    fn arrays_compare_across_mutability() {
        let a = Object::array(vec![Object::Int(1), Object::string("x")]);
        let b = Object::immutable_array(vec![Object::Int(1), Object::string("x")]);
        assert!(a.equals(&b));
        assert!(b.equals(&a));
        assert!(!a.equals(&Object::array(vec![Object::Int(1)])));
    }

    #[test]
    fn maps_compare_by_entries() {
        let a = Object::map(map_of(&[("k", Object::Int(1))]));
        let b = Object::immutable_map(map_of(&[("k", Object::Int(1))]));
        assert!(a.equals(&b));
        assert!(!a.equals(&Object::map(map_of(&[("k", Object::Int(2))]))));
    }

    #[test]
    fn errors_compare_by_identity() {
        let e = Object::error(Object::string("boom"));
        let same_message = Object::error(Object::string("boom"));
        assert!(e.equals(&e.clone()));
        assert!(!e.equals(&same_message));
        // structural equality still sees them as equal
        assert_eq!(e, same_message);
    }

    // =========================================================================
    // Copy and display
    // =========================================================================

    #[test]
    fn copy_detaches_containers() {
        let inner = Object::array(vec![Object::Int(1)]);
        let outer = Object::array(vec![inner.clone()]);
        let copied = outer.copy();
        if let Object::Array(a) = &inner {
            a.write().push(Object::Int(2));
        }
        assert_eq!(outer.to_string(), "[[1, 2]]");
        assert_eq!(copied.to_string(), "[[1]]");
    }

    #[test]
    fn display_forms() {
        let m = Object::map(map_of(&[("a", Object::string("x")), ("b", Object::Char('y'))]));
        assert_eq!(m.to_string(), "{a: \"x\", b: y}");
        assert_eq!(Object::error(Object::Int(3)).to_string(), "error: 3");
        assert_eq!(Object::Undefined.to_string(), "<undefined>");
        assert_eq!(Object::Float(2.5).to_string(), "2.5");
    }

    #[test]
    fn count_objects_descends_into_containers() {
        let v = Object::array(vec![Object::Int(1), Object::immutable_array(vec![Object::Int(2)])]);
        assert_eq!(v.count_objects(), 4);
    }

    #[test]
    fn time_offsets_roundtrip_through_nanos() {
        let t = Object::time_from_unix_nanos(-1_500).expect("in range");
        match t {
            Object::Time(t) => assert_eq!(unix_parts(t), (-1, 999_998_500)),
            other => panic!("expected time, got {other:?}"),
        }
    }

    #[test]
    fn only_the_zero_time_is_falsy() {
        assert!(!Object::Time(UNIX_EPOCH).is_falsy());
        assert!(!Object::time_from_unix(-1, 0).expect("in range").is_falsy());
        assert!(Object::time_from_unix(-62_135_596_800, 0).expect("year 1").is_falsy());
        assert_eq!(Object::time_from_unix(0, NANOS_PER_SEC), None);
    }

    #[test]
    fn far_times_keep_whole_seconds() {
        let far = Object::time_from_unix(-62_135_596_800, 0).expect("year 1");
        let Object::Time(far) = far else { panic!("time") };
        assert_eq!(unix_parts(far), (-62_135_596_800, 0));
    }
}
