//! Operators on built-in values.

use std::cmp::Ordering;

use crate::ast::{BinOp, UnaryOp};
use crate::error::{
    ExceptionKind, ExecResult, Unwind, index_error, memory_error, overflow_error, type_error,
    value_error,
};
use crate::interrupt::InterruptHandle;
use crate::value::{Value, float_repr};

use super::Interpreter;

/// An evaluated subscript.
pub(crate) enum Index {
    Item(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

fn zero_division(message: &str) -> Unwind {
    Unwind::new(ExceptionKind::ZeroDivisionError, message)
}

fn unsupported(op: &str, left: &Value, right: &Value) -> Unwind {
    type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn is_intlike(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Bool(_))
}

fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Bool(_) | Value::Float(_))
}

fn floor_mod_int(a: i64, b: i64) -> ExecResult<i64> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let rem = a.checked_rem(b).ok_or_else(overflow_error)?;
    Ok(if rem != 0 && (rem < 0) != (b < 0) {
        rem + b
    } else {
        rem
    })
}

fn floor_div_int(a: i64, b: i64) -> ExecResult<i64> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let quotient = a.checked_div(b).ok_or_else(overflow_error)?;
    Ok(if a % b != 0 && (a < 0) != (b < 0) {
        quotient - 1
    } else {
        quotient
    })
}

fn floor_mod_float(a: f64, b: f64) -> ExecResult<f64> {
    if b == 0.0 {
        return Err(zero_division("float modulo"));
    }
    let rem = a % b;
    Ok(if rem != 0.0 && (rem < 0.0) != (b < 0.0) {
        rem + b
    } else {
        rem
    })
}

/// Largest sequence one operation may build, in bytes.
pub(crate) const MAX_SEQUENCE_BYTES: usize = 1 << 30;

/// Iterations of a native loop between interrupt polls.
pub(crate) const INTERRUPT_POLL: usize = 4096;

fn poll(interrupt: &InterruptHandle, iteration: usize) -> ExecResult<()> {
    if iteration % INTERRUPT_POLL == 0 && interrupt.is_interrupted() {
        return Err(Unwind::Interrupt);
    }
    Ok(())
}

/// Reserve room for `count` more items, refusing sequences over
/// [`MAX_SEQUENCE_BYTES`].
pub(crate) fn reserve<T>(out: &mut Vec<T>, count: usize) -> ExecResult<()> {
    let bytes = count
        .checked_mul(std::mem::size_of::<T>().max(1))
        .ok_or_else(memory_error)?;
    if bytes > MAX_SEQUENCE_BYTES {
        return Err(memory_error());
    }
    out.try_reserve_exact(count).map_err(|_| memory_error())
}

fn repeat_count(n: &Value) -> usize {
    n.as_int().and_then(|n| usize::try_from(n).ok()).unwrap_or(0)
}

fn repeat<T: Clone>(items: &[T], count: usize, interrupt: &InterruptHandle) -> ExecResult<Vec<T>> {
    if items.is_empty() || count == 0 {
        return Ok(Vec::new());
    }
    let total = items.len().checked_mul(count).ok_or_else(overflow_error)?;
    let mut out = Vec::new();
    reserve(&mut out, total)?;
    for i in 0..count {
        poll(interrupt, i)?;
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn repeat_str(s: &str, count: usize, interrupt: &InterruptHandle) -> ExecResult<String> {
    if s.is_empty() || count == 0 {
        return Ok(String::new());
    }
    let total = s.len().checked_mul(count).ok_or_else(overflow_error)?;
    if total > MAX_SEQUENCE_BYTES {
        return Err(memory_error());
    }
    let mut out = String::new();
    out.try_reserve_exact(total).map_err(|_| memory_error())?;
    for i in 0..count {
        poll(interrupt, i)?;
        out.push_str(s);
    }
    Ok(out)
}

/// Apply a binary operator to two built-in values. Long repetitions poll
/// `interrupt`.
pub(crate) fn binary(
    interrupt: &InterruptHandle,
    op: BinOp,
    left: &Value,
    right: &Value,
) -> ExecResult<Value> {
    let symbol = op.symbol();
    if is_intlike(left) && is_intlike(right) {
        let (Some(a), Some(b)) = (left.as_int(), right.as_int()) else {
            return Err(unsupported(symbol, left, right));
        };
        return int_binary(op, a, b, left, right);
    }
    if is_numeric(left) && is_numeric(right) {
        let (Some(a), Some(b)) = (left.as_float(), right.as_float()) else {
            return Err(unsupported(symbol, left, right));
        };
        return float_binary(op, a, b, left, right);
    }
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::from(joined))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.snapshot();
            items.extend(b.snapshot());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.to_vec();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if is_intlike(n) => {
            Ok(Value::from(repeat_str(s, repeat_count(n), interrupt)?))
        }
        (BinOp::Mul, Value::List(list), n) | (BinOp::Mul, n, Value::List(list))
            if is_intlike(n) =>
        {
            Ok(Value::list(repeat(&list.snapshot(), repeat_count(n), interrupt)?))
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
            if is_intlike(n) =>
        {
            Ok(Value::tuple(repeat(items, repeat_count(n), interrupt)?))
        }
        (BinOp::Add, Value::Str(_), _) => Err(type_error(format!(
            "cannot concatenate 'str' and '{}' objects",
            right.type_name()
        ))),
        _ => Err(unsupported(symbol, left, right)),
    }
}

fn int_binary(op: BinOp, a: i64, b: i64, left: &Value, right: &Value) -> ExecResult<Value> {
    let result = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow_error)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow_error)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow_error)?,
        BinOp::Div | BinOp::FloorDiv => floor_div_int(a, b)?,
        BinOp::TrueDiv => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::Mod => floor_mod_int(a, b)?,
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow_error())?;
            a.checked_pow(exp).ok_or_else(overflow_error)?
        }
        BinOp::LShift => {
            if b < 0 {
                return Err(value_error("negative shift count"));
            }
            if a == 0 {
                0
            } else {
                let shift = u32::try_from(b).map_err(|_| overflow_error())?;
                let shifted = a.checked_shl(shift).ok_or_else(overflow_error)?;
                if shifted >> shift != a {
                    return Err(overflow_error());
                }
                shifted
            }
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(value_error("negative shift count"));
            }
            if b >= 64 {
                if a < 0 { -1 } else { 0 }
            } else {
                a >> b
            }
        }
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            let value = match op {
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                _ => a ^ b,
            };
            if matches!((left, right), (Value::Bool(_), Value::Bool(_))) {
                return Ok(Value::Bool(value != 0));
            }
            value
        }
    };
    Ok(Value::Int(result))
}

fn float_binary(op: BinOp, a: f64, b: f64, left: &Value, right: &Value) -> ExecResult<Value> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::TrueDiv => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float divmod()"));
            }
            (a / b).floor()
        }
        BinOp::Mod => floor_mod_float(a, b)?,
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
        _ => return Err(unsupported(op.symbol(), left, right)),
    };
    Ok(Value::Float(result))
}

pub(crate) fn unary(op: UnaryOp, operand: &Value) -> ExecResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, value) if is_intlike(value) => value
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow_error),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Pos, value) if is_intlike(value) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (UnaryOp::Invert, value) if is_intlike(value) => Ok(Value::Int(!value.as_int().unwrap_or(0))),
        (op, value) => {
            let symbol = match op {
                UnaryOp::Neg => "unary -",
                UnaryOp::Pos => "unary +",
                _ => "unary ~",
            };
            Err(type_error(format!(
                "bad operand type for {symbol}: '{}'",
                value.type_name()
            )))
        }
    }
}

/// Total order used by `<`, `sorted`, `min` and `max`.
pub(crate) fn order(left: &Value, right: &Value) -> ExecResult<Ordering> {
    if is_numeric(left) && is_numeric(right) {
        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            return Ok(a.cmp(&b));
        }
        let (Some(a), Some(b)) = (left.as_float(), right.as_float()) else {
            return Err(unorderable(left, right));
        };
        return Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal));
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Tuple(a), Value::Tuple(b)) => order_sequences(a, b),
        (Value::List(a), Value::List(b)) => order_sequences(&a.snapshot(), &b.snapshot()),
        (Value::None, Value::None) => Ok(Ordering::Equal),
        _ => Err(unorderable(left, right)),
    }
}

fn order_sequences(a: &[Value], b: &[Value]) -> ExecResult<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        if !x.equals(y) {
            return order(x, y);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn unorderable(left: &Value, right: &Value) -> Unwind {
    type_error(format!(
        "unorderable types: {}() < {}()",
        left.type_name(),
        right.type_name()
    ))
}

/// Membership test (`item in container`) for built-in containers.
pub(crate) fn contains(container: &Value, item: &Value) -> ExecResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            _ => Err(type_error("'in <string>' requires string as left operand")),
        },
        Value::List(list) => Ok(list.snapshot().iter().any(|v| v.equals(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.equals(item))),
        Value::Dict(dict) => Ok(dict.read().contains_key(item)),
        other => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: i64, len: usize, what: &str) -> ExecResult<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    if resolved < 0 || resolved >= len {
        return Err(index_error(format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

fn int_index(index: &Value, what: &str) -> ExecResult<i64> {
    index.as_int().ok_or_else(|| {
        type_error(format!(
            "{what} indices must be integers, not {}",
            index.type_name()
        ))
    })
}

/// Positions selected by a slice over a sequence of `len` elements.
pub(crate) fn slice_positions(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> ExecResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |value: i64, low: i64, high: i64| {
        let value = if value < 0 { value + len } else { value };
        value.clamp(low, high)
    };
    let mut positions = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |v| clamp(v, 0, len));
        let stop = upper.map_or(len, |v| clamp(v, 0, len));
        let mut i = start;
        while i < stop {
            positions.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |v| clamp(v, -1, len - 1));
        let stop = upper.map_or(-1, |v| clamp(v, -1, len - 1));
        let mut i = start;
        while i > stop {
            positions.push(i as usize);
            i += step;
        }
    }
    Ok(positions)
}

/// Range replaced by a step-1 slice assignment.
fn slice_bounds(len: usize, lower: Option<i64>, upper: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |value: i64| {
        let value = if value < 0 { value + len } else { value };
        value.clamp(0, len) as usize
    };
    let start = lower.map_or(0, clamp);
    let stop = upper.map_or(len as usize, clamp).max(start);
    (start, stop)
}

pub(crate) fn get_item(container: &Value, index: &Index) -> ExecResult<Value> {
    match (container, index) {
        (Value::List(list), Index::Item(i)) => {
            let items = list.read();
            let pos = normalize_index(int_index(i, "list")?, items.len(), "list")?;
            Ok(items[pos].clone())
        }
        (Value::Tuple(items), Index::Item(i)) => {
            let pos = normalize_index(int_index(i, "tuple")?, items.len(), "tuple")?;
            Ok(items[pos].clone())
        }
        (Value::Str(s), Index::Item(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let pos = normalize_index(int_index(i, "string")?, chars.len(), "string")?;
            Ok(Value::from(chars[pos].to_string()))
        }
        (Value::Dict(dict), Index::Item(key)) => {
            key.check_hashable()?;
            dict.get(key)
                .ok_or_else(|| Unwind::new(ExceptionKind::KeyError, key.repr()))
        }
        (Value::List(list), Index::Slice(lower, upper, step)) => {
            let items = list.read();
            let positions = slice_positions(items.len(), *lower, *upper, *step)?;
            Ok(Value::list(positions.into_iter().map(|p| items[p].clone()).collect()))
        }
        (Value::Tuple(items), Index::Slice(lower, upper, step)) => {
            let positions = slice_positions(items.len(), *lower, *upper, *step)?;
            Ok(Value::tuple(positions.into_iter().map(|p| items[p].clone()).collect()))
        }
        (Value::Str(s), Index::Slice(lower, upper, step)) => {
            let chars: Vec<char> = s.chars().collect();
            let positions = slice_positions(chars.len(), *lower, *upper, *step)?;
            Ok(Value::from(positions.into_iter().map(|p| chars[p]).collect::<String>()))
        }
        (other, _) => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(crate) fn set_item(container: &Value, index: &Index, value: Value, items: Option<Vec<Value>>) -> ExecResult<()> {
    match (container, index) {
        (Value::List(list), Index::Item(i)) => {
            let mut guard = list.write();
            let pos = normalize_index(int_index(i, "list")?, guard.len(), "list assignment")?;
            guard[pos] = value;
            Ok(())
        }
        (Value::List(list), Index::Slice(lower, upper, step)) => {
            let replacement = items.ok_or_else(|| type_error("can only assign an iterable"))?;
            let mut guard = list.write();
            if step.unwrap_or(1) == 1 {
                let (start, stop) = slice_bounds(guard.len(), *lower, *upper);
                guard.splice(start..stop, replacement);
                return Ok(());
            }
            let positions = slice_positions(guard.len(), *lower, *upper, *step)?;
            if positions.len() != replacement.len() {
                return Err(value_error(format!(
                    "attempt to assign sequence of size {} to extended slice of size {}",
                    replacement.len(),
                    positions.len()
                )));
            }
            for (pos, item) in positions.into_iter().zip(replacement) {
                guard[pos] = item;
            }
            Ok(())
        }
        (Value::Dict(dict), Index::Item(key)) => {
            key.check_hashable()?;
            dict.insert(key.clone(), value);
            Ok(())
        }
        (other, _) => Err(type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub(crate) fn del_item(container: &Value, index: &Index) -> ExecResult<()> {
    match (container, index) {
        (Value::List(list), Index::Item(i)) => {
            let mut guard = list.write();
            let pos = normalize_index(int_index(i, "list")?, guard.len(), "list assignment")?;
            guard.remove(pos);
            Ok(())
        }
        (Value::List(list), Index::Slice(lower, upper, step)) => {
            let mut guard = list.write();
            let mut positions = slice_positions(guard.len(), *lower, *upper, *step)?;
            positions.sort_unstable();
            for pos in positions.into_iter().rev() {
                guard.remove(pos);
            }
            Ok(())
        }
        (Value::Dict(dict), Index::Item(key)) => {
            key.check_hashable()?;
            dict.write()
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| Unwind::new(ExceptionKind::KeyError, key.repr()))
        }
        (other, _) => Err(type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

/// `format % args` string interpolation.
pub(crate) fn percent_format(interp: &mut Interpreter, format: &str, args: &Value) -> ExecResult<String> {
    let (positional, mapping) = match args {
        Value::Tuple(items) => (items.to_vec(), None),
        Value::Dict(dict) => (vec![args.clone()], Some(dict.clone())),
        other => (vec![other.clone()], None),
    };
    let mut next = 0usize;
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some(')') => break,
                    Some(c) => name.push(c),
                    None => return Err(value_error("incomplete format key")),
                }
            }
            key = Some(name);
        }
        let mut left_align = false;
        let mut zero_pad = false;
        let mut sign = None;
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left_align = true,
                '0' => zero_pad = true,
                '+' => sign = Some('+'),
                ' ' => {
                    if sign.is_none() {
                        sign = Some(' ');
                    }
                }
                '#' => {}
                _ => break,
            }
            chars.next();
        }
        let mut width = 0usize;
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width.saturating_mul(10).saturating_add(digit as usize);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p.saturating_mul(10).saturating_add(digit as usize);
                chars.next();
            }
            precision = Some(p);
        }
        if width > MAX_SEQUENCE_BYTES || precision.is_some_and(|p| p > MAX_SEQUENCE_BYTES) {
            return Err(memory_error());
        }
        let conversion = chars
            .next()
            .ok_or_else(|| value_error("incomplete format"))?;
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let value = match (&key, &mapping) {
            (Some(name), Some(dict)) => dict
                .get(&Value::str(name))
                .ok_or_else(|| Unwind::new(ExceptionKind::KeyError, Value::str(name).repr()))?,
            (Some(_), None) => return Err(type_error("format requires a mapping")),
            (None, _) => {
                let value = positional
                    .get(next)
                    .cloned()
                    .ok_or_else(|| type_error("not enough arguments for format string"))?;
                next += 1;
                value
            }
        };
        let numeric = matches!(conversion, 'd' | 'i' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o');
        let mut body = match conversion {
            's' => interp.str(&value)?,
            'r' => interp.repr(&value)?,
            'c' => match &value {
                Value::Str(s) if s.chars().count() == 1 => s.to_string(),
                v => {
                    let code = v
                        .as_int()
                        .and_then(|n| u32::try_from(n).ok())
                        .and_then(char::from_u32)
                        .ok_or_else(|| type_error("%c requires int or char"))?;
                    code.to_string()
                }
            },
            'd' | 'i' => {
                let n = match &value {
                    Value::Float(f) => f.trunc() as i64,
                    v => v.as_int().ok_or_else(|| number_required(conversion, v))?,
                };
                n.to_string()
            }
            'x' | 'X' | 'o' => {
                let n = value.as_int().ok_or_else(|| number_required(conversion, &value))?;
                let digits = match conversion {
                    'x' => format!("{:x}", n.unsigned_abs()),
                    'X' => format!("{:X}", n.unsigned_abs()),
                    _ => format!("{:o}", n.unsigned_abs()),
                };
                if n < 0 { format!("-{digits}") } else { digits }
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let f = value
                    .as_float()
                    .ok_or_else(|| number_required(conversion, &value))?;
                let precision = precision.unwrap_or(6);
                match conversion {
                    'f' | 'F' => format!("{f:.precision$}"),
                    'e' => exponent_format(f, precision),
                    'E' => exponent_format(f, precision).to_uppercase(),
                    'g' => general_format(f, precision),
                    _ => general_format(f, precision).to_uppercase(),
                }
            }
            other => {
                return Err(value_error(format!(
                    "unsupported format character '{other}'"
                )));
            }
        };
        if conversion == 's' || conversion == 'r' {
            if let Some(p) = precision {
                body = body.chars().take(p).collect();
            }
        }
        if numeric {
            if let Some(sign) = sign {
                if !body.starts_with('-') {
                    body.insert(0, sign);
                }
            }
        }
        let len = body.chars().count();
        if len < width {
            let fill = width - len;
            if left_align {
                body.push_str(&" ".repeat(fill));
            } else if zero_pad && numeric {
                let split = usize::from(body.starts_with(|c| matches!(c, '-' | '+' | ' ')));
                body.insert_str(split, &"0".repeat(fill));
            } else {
                body.insert_str(0, &" ".repeat(fill));
            }
        }
        out.push_str(&body);
    }
    if mapping.is_none() && next < positional.len() {
        return Err(type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

fn number_required(conversion: char, value: &Value) -> Unwind {
    type_error(format!(
        "%{conversion} format: a number is required, not {}",
        value.type_name()
    ))
}

fn exponent_format(f: f64, precision: usize) -> String {
    let formatted = format!("{f:.precision$e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

fn general_format(f: f64, precision: usize) -> String {
    if f == 0.0 || !f.is_finite() {
        return float_repr(f).trim_end_matches(".0").to_string();
    }
    let precision = precision.max(1);
    let exponent = f.abs().log10().floor() as i64;
    if exponent < -4 || exponent >= precision as i64 {
        let formatted = exponent_format(f, precision - 1);
        match formatted.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{exp}", strip_zeros(mantissa)),
            None => formatted,
        }
    } else {
        let decimals = (precision as i64 - 1 - exponent).max(0) as usize;
        strip_zeros(&format!("{f:.decimals$}")).to_string()
    }
}

fn strip_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}
