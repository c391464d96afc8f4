//! Operator dispatch for `BINARYOP` and the unary opcodes.

use std::cmp::Ordering;
use std::time::SystemTime;

use super::limits::{MAX_BYTES_LEN, MAX_STRING_LEN};
use super::value::{offset_time, unix_parts};
use super::Object;
use crate::ast::Token;
use crate::runtime::ErrorKind;

/// Apply binary operator `op` to `lhs` and `rhs`.
pub fn binary_op(lhs: &Object, op: Token, rhs: &Object) -> Result<Object, ErrorKind> {
    use Object::*;

    let result = match (lhs, rhs) {
        (Int(a), Int(b)) => int_op(*a, op, *b)?,
        (Int(a), Float(b)) => float_op(*a as f64, op, *b),
        (Float(a), Float(b)) => float_op(*a, op, *b),
        (Float(a), Int(b)) => float_op(*a, op, *b as f64),

        (Char(a), Char(b)) => char_op(*a, op, *b as i64)?,
        (Char(a), Int(b)) => char_op(*a, op, *b)?,
        (Int(a), Char(b)) => match op {
            Token::Add | Token::Sub => int_to_char(int_op(*a, op, *b as i64).ok().and_then(|o| o.as_int()))?,
            _ => compare(a.cmp(&(*b as i64)), op),
        },

        (String(a), String(b)) => match op {
            Token::Add => concat_str(a, b)?,
            _ => compare(a.cmp(b), op),
        },
        (String(a), other) if op == Token::Add => match other {
            Char(c) => concat_str(a, c.encode_utf8(&mut [0; 4]))?,
            _ => concat_str(a, &other.to_string())?,
        },

        (Bytes(a), Bytes(b)) if op == Token::Add => {
            if a.len() + b.len() > MAX_BYTES_LEN {
                return Err(ErrorKind::BytesLimit);
            }
            let mut v = Vec::with_capacity(a.len() + b.len());
            v.extend_from_slice(a);
            v.extend_from_slice(b);
            Object::bytes(v)
        }

        (Array(_) | ImmutableArray(_), Array(_) | ImmutableArray(_) | Undefined)
            if op == Token::Add =>
        {
            let mut items = lhs.array_items();
            items.extend(rhs.array_items());
            Object::array(items)
        }
        (Undefined, Array(_) | ImmutableArray(_)) if op == Token::Add => {
            Object::array(rhs.array_items())
        }

        (Time(a), Int(b)) => {
            let moved = match op {
                Token::Add => offset_time(*a, *b),
                Token::Sub => b.checked_neg().and_then(|back| offset_time(*a, back)),
                _ => return Err(unsupported(lhs, op, rhs)),
            };
            Time(moved.ok_or(ErrorKind::TimeOutOfRange)?)
        }
        (Time(a), Time(b)) => match op {
            Token::Sub => Int(time_diff_nanos(*a, *b)?),
            _ => compare(cmp_time(a, b), op),
        },

        _ => Undefined,
    };

    match result {
        Undefined => Err(unsupported(lhs, op, rhs)),
        v => Ok(v),
    }
}

fn int_op(a: i64, op: Token, b: i64) -> Result<Object, ErrorKind> {
    let v = match op {
        Token::Add => a.wrapping_add(b),
        Token::Sub => a.wrapping_sub(b),
        Token::Mul => a.wrapping_mul(b),
        Token::Quo => {
            if b == 0 {
                return Err(ErrorKind::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        Token::Rem => {
            if b == 0 {
                return Err(ErrorKind::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        Token::And => a & b,
        Token::Or => a | b,
        Token::Xor => a ^ b,
        Token::AndNot => a & !b,
        Token::Shl => u32::try_from(b)
            .ok()
            .and_then(|s| a.checked_shl(s))
            .unwrap_or(0),
        Token::Shr => u32::try_from(b)
            .ok()
            .and_then(|s| a.checked_shr(s))
            .unwrap_or(if a < 0 { -1 } else { 0 }),
        _ => return Ok(compare(a.cmp(&b), op)),
    };
    Ok(Object::Int(v))
}

fn float_op(a: f64, op: Token, b: f64) -> Object {
    match op {
        Token::Add => Object::Float(a + b),
        Token::Sub => Object::Float(a - b),
        Token::Mul => Object::Float(a * b),
        Token::Quo => Object::Float(a / b),
        _ => match a.partial_cmp(&b) {
            Some(ord) => compare(ord, op),
            // every ordering against NaN is false
            None if is_comparison(op) => Object::Bool(false),
            None => Object::Undefined,
        },
    }
}

fn char_op(a: char, op: Token, b: i64) -> Result<Object, ErrorKind> {
    match op {
        Token::Add => int_to_char(Some((a as i64).wrapping_add(b))),
        Token::Sub => int_to_char(Some((a as i64).wrapping_sub(b))),
        _ => Ok(compare((a as i64).cmp(&b), op)),
    }
}

fn int_to_char(v: Option<i64>) -> Result<Object, ErrorKind> {
    let v = v.ok_or(ErrorKind::InvalidOperator)?;
    u32::try_from(v)
        .ok()
        .and_then(char::from_u32)
        .map(Object::Char)
        .ok_or(ErrorKind::InvalidChar(v))
}

fn concat_str(a: &str, b: &str) -> Result<Object, ErrorKind> {
    if a.len() + b.len() > MAX_STRING_LEN {
        return Err(ErrorKind::StringLimit);
    }
    let mut s = String::with_capacity(a.len() + b.len());
    s.push_str(a);
    s.push_str(b);
    Ok(Object::string(s))
}

/// `a - b` in nanoseconds.
fn time_diff_nanos(a: SystemTime, b: SystemTime) -> Result<i64, ErrorKind> {
    let nanos = |t| {
        let (secs, sub) = unix_parts(t);
        i128::from(secs) * 1_000_000_000 + i128::from(sub)
    };
    i64::try_from(nanos(a) - nanos(b)).map_err(|_| ErrorKind::TimeOutOfRange)
}

fn cmp_time(a: &SystemTime, b: &SystemTime) -> Ordering {
    a.cmp(b)
}

fn is_comparison(op: Token) -> bool {
    matches!(
        op,
        Token::Less | Token::Greater | Token::LessEq | Token::GreaterEq
    )
}

/// Map an ordering onto a relational operator; `Undefined` for anything else.
fn compare(ord: Ordering, op: Token) -> Object {
    match op {
        Token::Less => Object::Bool(ord == Ordering::Less),
        Token::Greater => Object::Bool(ord == Ordering::Greater),
        Token::LessEq => Object::Bool(ord != Ordering::Greater),
        Token::GreaterEq => Object::Bool(ord != Ordering::Less),
        _ => Object::Undefined,
    }
}

fn unsupported(lhs: &Object, op: Token, rhs: &Object) -> ErrorKind {
    ErrorKind::UnsupportedBinaryOp {
        lhs: lhs.type_name(),
        op: op.as_str().to_string(),
        rhs: rhs.type_name(),
    }
}

// ─── Unary ───

/// `-x`
pub fn negate(value: &Object) -> Result<Object, ErrorKind> {
    match value {
        Object::Int(i) => Ok(Object::Int(i.wrapping_neg())),
        Object::Float(f) => Ok(Object::Float(-f)),
        other => Err(ErrorKind::UnsupportedBinaryOp {
            lhs: String::new(),
            op: "-".into(),
            rhs: other.type_name(),
        }),
    }
}

/// `^x`
pub fn complement(value: &Object) -> Result<Object, ErrorKind> {
    match value {
        Object::Int(i) => Ok(Object::Int(!i)),
        other => Err(ErrorKind::UnsupportedBinaryOp {
            lhs: String::new(),
            op: "^".into(),
            rhs: other.type_name(),
        }),
    }
}
