//! The builtin function table.
//!
//! Builtins are resolved by index at compile time (`GETBUILTIN n`), so a
//! compiled program must run against the same table it was compiled with.

use super::function::BuiltinFunction;
use super::limits::{MAX_BYTES_LEN, MAX_STRING_LEN};
use super::Object;
use crate::runtime::{channel, routine, CallContext, ErrorKind};

/// An ordered table of builtin functions.
#[derive(Debug, Clone, PartialEq)]
pub struct Builtins {
    funcs: Vec<BuiltinFunction>,
}

impl Default for Builtins {
    fn default() -> Self {
        Self::standard()
    }
}

impl Builtins {
    /// Every builtin the language ships with, concurrency included.
    pub fn standard() -> Self {
        Builtins {
            funcs: STANDARD.to_vec(),
        }
    }

    pub fn empty() -> Self {
        Builtins { funcs: Vec::new() }
    }

    /// Add `func`, replacing a builtin of the same name in place.
    pub fn with(mut self, func: BuiltinFunction) -> Self {
        match self.funcs.iter_mut().find(|f| f.name == func.name) {
            Some(slot) => *slot = func,
            None => self.funcs.push(func),
        }
        self
    }

    /// Drop the builtin called `name`. Later builtins shift down one index.
    pub fn without(mut self, name: &str) -> Self {
        self.funcs.retain(|f| f.name != name);
        self
    }

    pub fn get(&self, idx: usize) -> Option<&BuiltinFunction> {
        self.funcs.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.funcs.iter().position(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuiltinFunction> {
        self.funcs.iter()
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

const STANDARD: &[BuiltinFunction] = &[
    BuiltinFunction::new("len", builtin_len),
    BuiltinFunction::new("copy", builtin_copy),
    BuiltinFunction::new("append", builtin_append),
    BuiltinFunction::new("delete", builtin_delete),
    BuiltinFunction::new("splice", builtin_splice),
    BuiltinFunction::new("type_name", builtin_type_name),
    BuiltinFunction::new("string", builtin_string),
    BuiltinFunction::new("int", builtin_int),
    BuiltinFunction::new("float", builtin_float),
    BuiltinFunction::new("bool", builtin_bool),
    BuiltinFunction::new("char", builtin_char),
    BuiltinFunction::new("bytes", builtin_bytes),
    BuiltinFunction::new("is_int", builtin_is_int),
    BuiltinFunction::new("is_float", builtin_is_float),
    BuiltinFunction::new("is_string", builtin_is_string),
    BuiltinFunction::new("is_bool", builtin_is_bool),
    BuiltinFunction::new("is_char", builtin_is_char),
    BuiltinFunction::new("is_bytes", builtin_is_bytes),
    BuiltinFunction::new("is_array", builtin_is_array),
    BuiltinFunction::new("is_map", builtin_is_map),
    BuiltinFunction::new("is_immutable_array", builtin_is_immutable_array),
    BuiltinFunction::new("is_immutable_map", builtin_is_immutable_map),
    BuiltinFunction::new("is_error", builtin_is_error),
    BuiltinFunction::new("is_undefined", builtin_is_undefined),
    BuiltinFunction::new("is_function", builtin_is_function),
    BuiltinFunction::new("is_callable", builtin_is_callable),
    BuiltinFunction::new("is_iterable", builtin_is_iterable),
    BuiltinFunction::new("range", builtin_range),
    BuiltinFunction::new("start", routine::builtin_start),
    BuiltinFunction::new("makechan", channel::builtin_makechan),
    BuiltinFunction::new("sleep", routine::builtin_sleep),
];

type BuiltinResult = Result<Object, ErrorKind>;

fn single(args: &[Object]) -> Result<&Object, ErrorKind> {
    match args {
        [arg] => Ok(arg),
        _ => Err(ErrorKind::wrong_args("1", args.len())),
    }
}

/// Value plus optional fallback, as taken by the conversion builtins.
fn value_and_default(args: &[Object]) -> Result<(&Object, Option<&Object>), ErrorKind> {
    match args {
        [v] => Ok((v, None)),
        [v, d] => Ok((v, Some(d))),
        _ => Err(ErrorKind::wrong_args("1 or 2", args.len())),
    }
}

fn fallback(default: Option<&Object>) -> Object {
    default.cloned().unwrap_or_default()
}

// =============================================================================
// Containers
// =============================================================================

fn builtin_len(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let n = match single(args)? {
        Object::Array(a) => a.read().len(),
        Object::ImmutableArray(a) => a.len(),
        Object::String(s) => s.chars().count(),
        Object::Bytes(b) => b.len(),
        Object::Map(m) => m.read().len(),
        Object::ImmutableMap(m) => m.len(),
        other => {
            return Err(ErrorKind::invalid_arg(
                "first",
                "array/string/bytes/map",
                &other.type_name(),
            ));
        }
    };
    Ok(Object::Int(n as i64))
}

fn builtin_copy(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    Ok(single(args)?.copy())
}

fn builtin_append(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let Some((first, rest)) = args.split_first().filter(|_| args.len() >= 2) else {
        return Err(ErrorKind::wrong_args(">= 2", args.len()));
    };
    let mut items = match first {
        Object::Array(_) | Object::ImmutableArray(_) => first.array_items(),
        Object::Undefined => Vec::new(),
        other => return Err(ErrorKind::invalid_arg("first", "array", &other.type_name())),
    };
    items.extend_from_slice(rest);
    Ok(Object::array(items))
}

fn builtin_delete(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let [target, key] = args else {
        return Err(ErrorKind::wrong_args("2", args.len()));
    };
    let Object::Map(m) = target else {
        return Err(ErrorKind::invalid_arg("first", "map", &target.type_name()));
    };
    let Object::String(key) = key else {
        return Err(ErrorKind::invalid_arg("second", "string", &key.type_name()));
    };
    m.write().remove(&**key);
    Ok(Object::Undefined)
}

/// `splice(array, start, count, items...)`: remove `count` elements at
/// `start`, insert `items` there, and return the removed elements.
fn builtin_splice(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let Some(target) = args.first() else {
        return Err(ErrorKind::wrong_args(">= 1", 0));
    };
    let Object::Array(array) = target else {
        return Err(ErrorKind::invalid_arg("first", "array", &target.type_name()));
    };
    let mut items = array.write();
    let len = items.len();

    let start = match args.get(1) {
        None => 0,
        Some(Object::Int(i)) => usize::try_from(*i)
            .ok()
            .filter(|s| *s <= len)
            .ok_or(ErrorKind::IndexOutOfBounds)?,
        Some(other) => return Err(ErrorKind::invalid_arg("second", "int", &other.type_name())),
    };
    let count = match args.get(2) {
        None => len,
        Some(Object::Int(i)) => usize::try_from(*i).map_err(|_| ErrorKind::IndexOutOfBounds)?,
        Some(other) => return Err(ErrorKind::invalid_arg("third", "int", &other.type_name())),
    };
    let end = start + count.min(len - start);
    let inserted = args.get(3..).unwrap_or_default().iter().cloned();
    let removed: Vec<Object> = items.splice(start..end, inserted).collect();
    Ok(Object::array(removed))
}

fn builtin_range(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    if !(2..=3).contains(&args.len()) {
        return Err(ErrorKind::wrong_args("2 or 3", args.len()));
    }
    let int_arg = |idx: usize, name: &str| match &args[idx] {
        Object::Int(i) => Ok(*i),
        other => Err(ErrorKind::invalid_arg(name, "int", &other.type_name())),
    };
    let start = int_arg(0, "start")?;
    let stop = int_arg(1, "stop")?;
    let step = if args.len() == 3 { int_arg(2, "step")? } else { 1 };
    if step <= 0 {
        return Err(ErrorKind::InvalidRangeStep(step));
    }

    let mut items = Vec::new();
    let mut i = start;
    if start <= stop {
        while i < stop {
            items.push(Object::Int(i));
            i = match i.checked_add(step) {
                Some(n) => n,
                None => break,
            };
        }
    } else {
        while i > stop {
            items.push(Object::Int(i));
            i = match i.checked_sub(step) {
                Some(n) => n,
                None => break,
            };
        }
    }
    Ok(Object::array(items))
}

// =============================================================================
// Conversions
// =============================================================================

fn builtin_type_name(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    Ok(Object::string(single(args)?.type_name()))
}

fn builtin_string(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let (value, default) = value_and_default(args)?;
    if let Object::String(_) = value {
        return Ok(value.clone());
    }
    match value.to_text() {
        Some(s) if s.len() > MAX_STRING_LEN => Err(ErrorKind::StringLimit),
        Some(s) => Ok(Object::string(s)),
        None => Ok(fallback(default)),
    }
}

fn builtin_int(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let (value, default) = value_and_default(args)?;
    Ok(value.to_int().map_or_else(|| fallback(default), Object::Int))
}

fn builtin_float(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let (value, default) = value_and_default(args)?;
    Ok(value.to_float().map_or_else(|| fallback(default), Object::Float))
}

fn builtin_bool(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let value = single(args)?;
    Ok(Object::Bool(match value {
        Object::Bool(b) => *b,
        other => !other.is_falsy(),
    }))
}

fn builtin_char(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let (value, default) = value_and_default(args)?;
    Ok(value.to_char().map_or_else(|| fallback(default), Object::Char))
}

fn builtin_bytes(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
    let (value, default) = value_and_default(args)?;
    let bytes = match value {
        Object::Int(n) => match usize::try_from(*n) {
            Ok(n) if n > MAX_BYTES_LEN => return Err(ErrorKind::BytesLimit),
            Ok(n) => Some(vec![0u8; n]),
            Err(_) => None,
        },
        other => other.to_byte_vec(),
    };
    Ok(bytes.map_or_else(|| fallback(default), Object::bytes))
}

// =============================================================================
// Type predicates
// =============================================================================

macro_rules! type_predicates {
    ($($name:ident => $check:expr;)*) => {
        $(
            fn $name(_: &CallContext<'_>, args: &[Object]) -> BuiltinResult {
                let check: fn(&Object) -> bool = $check;
                Ok(Object::Bool(check(single(args)?)))
            }
        )*
    };
}

type_predicates! {
    builtin_is_int => |o| matches!(o, Object::Int(_));
    builtin_is_float => |o| matches!(o, Object::Float(_));
    builtin_is_string => |o| matches!(o, Object::String(_));
    builtin_is_bool => |o| matches!(o, Object::Bool(_));
    builtin_is_char => |o| matches!(o, Object::Char(_));
    builtin_is_bytes => |o| matches!(o, Object::Bytes(_));
    builtin_is_array => |o| matches!(o, Object::Array(_));
    builtin_is_map => |o| matches!(o, Object::Map(_));
    builtin_is_immutable_array => |o| matches!(o, Object::ImmutableArray(_));
    builtin_is_immutable_map => |o| matches!(o, Object::ImmutableMap(_));
    builtin_is_error => |o| matches!(o, Object::Error(_));
    builtin_is_undefined => |o| matches!(o, Object::Undefined);
    builtin_is_function => |o| matches!(o, Object::CompiledFunction(_));
    builtin_is_callable => Object::is_callable;
    builtin_is_iterable => Object::is_iterable;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::AbortToken;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: &[Object]) -> BuiltinResult {
        let builtins = Builtins::standard();
        let idx = builtins.index_of(name).expect("builtin exists");
        let token = AbortToken::new();
        let ctx = CallContext::detached(&token);
        builtins.get(idx).unwrap().call(&ctx, args)
    }

    fn ints(items: &[i64]) -> Object {
        Object::array(items.iter().map(|i| Object::Int(*i)).collect())
    }

    // =========================================================================
    // Table
    // =========================================================================

    #[test]
    fn with_replaces_by_name() {
        fn zero(_: &CallContext<'_>, _: &[Object]) -> BuiltinResult {
            Ok(Object::Int(0))
        }
        let b = Builtins::standard().with(BuiltinFunction::new("len", zero));
        assert_eq!(b.len(), Builtins::standard().len());
        assert_eq!(b.index_of("len"), Some(0));
        let b = b.with(BuiltinFunction::new("zero", zero));
        assert_eq!(b.index_of("zero"), Some(b.len() - 1));
    }

    // =========================================================================
    // Containers
    // =========================================================================

    #[test]
    fn len_counts_elements_and_chars() {
        assert_eq!(call("len", &[ints(&[1, 2, 3])]), Ok(Object::Int(3)));
        assert_eq!(call("len", &[Object::string("hé")]), Ok(Object::Int(2)));
        assert!(call("len", &[Object::Int(1)]).is_err());
        assert!(call("len", &[]).is_err());
    }

    #[test]
    fn append_returns_new_array() {
        let a = ints(&[1]);
        let b = call("append", &[a.clone(), Object::Int(2), Object::Int(3)]).unwrap();
        assert_eq!(b.to_string(), "[1, 2, 3]");
        assert_eq!(a.to_string(), "[1]");
    }

    #[test]
    fn splice_removes_and_inserts_in_place() {
        let a = ints(&[1, 2, 3, 4]);
        let removed = call("splice", &[a.clone(), Object::Int(1), Object::Int(2), Object::string("x")]).unwrap();
        assert_eq!(removed.to_string(), "[2, 3]");
        assert_eq!(a.to_string(), "[1, \"x\", 4]");

        let tail = call("splice", &[a.clone(), Object::Int(1)]).unwrap();
        assert_eq!(tail.to_string(), "[\"x\", 4]");
        assert_eq!(a.to_string(), "[1]");

        assert_eq!(call("splice", &[a, Object::Int(5)]), Err(ErrorKind::IndexOutOfBounds));
    }

    #[test]
    fn delete_removes_map_key() {
        let m = Object::map([("a".to_string(), Object::Int(1))].into_iter().collect());
        call("delete", &[m.clone(), Object::string("a")]).unwrap();
        assert_eq!(m.to_string(), "{}");
        assert!(call("delete", &[ints(&[1]), Object::string("a")]).is_err());
    }

    #[test]
    fn range_steps_both_directions() {
        assert_eq!(call("range", &[Object::Int(0), Object::Int(5), Object::Int(2)]).unwrap().to_string(), "[0, 2, 4]");
        assert_eq!(call("range", &[Object::Int(3), Object::Int(0)]).unwrap().to_string(), "[3, 2, 1]");
        assert_eq!(
            call("range", &[Object::Int(0), Object::Int(3), Object::Int(0)]),
            Err(ErrorKind::InvalidRangeStep(0))
        );
    }

    // =========================================================================
    // Conversions and predicates
    // =========================================================================

    #[test]
    fn conversions_fall_back_to_default() {
        assert_eq!(call("int", &[Object::string("12")]), Ok(Object::Int(12)));
        assert_eq!(call("int", &[Object::string("x")]), Ok(Object::Undefined));
        assert_eq!(call("int", &[Object::string("x"), Object::Int(-1)]), Ok(Object::Int(-1)));
        assert_eq!(call("string", &[Object::Int(7)]), Ok(Object::string("7")));
        assert_eq!(call("string", &[Object::Undefined]), Ok(Object::Undefined));
        assert_eq!(call("char", &[Object::Int(65)]), Ok(Object::Char('A')));
        assert_eq!(call("bool", &[Object::Int(0)]), Ok(Object::Bool(false)));
        assert_eq!(call("bytes", &[Object::Int(2)]), Ok(Object::bytes(vec![0, 0])));
    }

    #[test]
    fn type_predicates_match_variants() {
        assert_eq!(call("is_int", &[Object::Int(1)]), Ok(Object::Bool(true)));
        assert_eq!(call("is_int", &[Object::Float(1.0)]), Ok(Object::Bool(false)));
        assert_eq!(call("is_iterable", &[Object::string("s")]), Ok(Object::Bool(true)));
        assert_eq!(call("type_name", &[ints(&[])]), Ok(Object::string("array")));
    }
}
