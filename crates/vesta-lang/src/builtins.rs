//! Built-in functions and methods of built-in types.

use std::cmp::Ordering;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use crate::ast::BinOp;
use crate::error::{
    ExceptionKind, ExecResult, Unwind, attribute_error, index_error, overflow_error, type_error,
    value_error,
};
use crate::interp::Interpreter;
use crate::interp::ops;
use crate::value::{Args, Dict, List, Value};

type BuiltinFn = fn(&mut Interpreter, Args) -> ExecResult<Value>;

static BUILTINS: OnceLock<FxHashMap<&'static str, Value>> = OnceLock::new();

const FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("abs", abs),
    ("all", all),
    ("any", any),
    ("bool", bool_),
    ("callable", callable),
    ("chr", chr),
    ("dict", dict),
    ("divmod", divmod),
    ("enumerate", enumerate),
    ("filter", filter),
    ("float", float),
    ("getattr", getattr),
    ("hasattr", hasattr),
    ("int", int),
    ("isinstance", isinstance),
    ("len", len),
    ("list", list),
    ("map", map),
    ("max", max),
    ("min", min),
    ("ord", ord),
    ("range", range),
    ("repr", repr),
    ("reversed", reversed),
    ("round", round),
    ("setattr", setattr),
    ("sorted", sorted),
    ("str", str_),
    ("sum", sum),
    ("tuple", tuple),
    ("xrange", range),
    ("zip", zip),
];

fn table() -> &'static FxHashMap<&'static str, Value> {
    BUILTINS.get_or_init(|| {
        let mut table = FxHashMap::default();
        for (name, func) in FUNCTIONS {
            table.insert(*name, Value::native(name, *func));
        }
        for kind in ExceptionKind::ALL {
            table.insert(kind.name(), Value::ExceptionType(kind));
        }
        table
    })
}

/// Resolve a built-in name.
pub fn lookup(name: &str) -> Option<Value> {
    table().get(name).cloned()
}

/// Every built-in function and exception name, sorted.
pub fn builtin_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = table().keys().copied().collect();
    names.sort_unstable();
    names
}

// =============================================================================
// Functions
// =============================================================================

fn len(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("len", 1, 1)?;
    let value = &args.positional[0];
    let n = match value {
        Value::Str(s) => s.chars().count(),
        Value::List(list) => list.len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => dict.read().len(),
        Value::Instance(_) => {
            let method = interp.get_attr(value, "__len__").map_err(|_| no_len(value))?;
            return interp.call(&method, Args::default());
        }
        other => return Err(no_len(other)),
    };
    Ok(Value::Int(n as i64))
}

fn no_len(value: &Value) -> Unwind {
    type_error(format!("object of type '{}' has no len()", value.type_name()))
}

fn int_arg(value: &Value, func: &str) -> ExecResult<i64> {
    value.as_int().ok_or_else(|| {
        type_error(format!(
            "{func}() integer argument expected, got {}",
            value.type_name()
        ))
    })
}

/// Number of items in `range(start, stop, step)`.
fn range_len(start: i64, stop: i64, step: i64) -> u128 {
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let len = if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / -step + 1
    } else {
        0
    };
    len.unsigned_abs()
}

fn range(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("range", 1, 3)?;
    let values = args
        .positional
        .iter()
        .map(|v| int_arg(v, "range"))
        .collect::<ExecResult<Vec<i64>>>()?;
    let (start, stop, step) = match values.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step, ..] => (*start, *stop, *step),
        [] => (0, 0, 1),
    };
    if step == 0 {
        return Err(value_error("range() step argument must not be zero"));
    }
    let len = usize::try_from(range_len(start, stop, step))
        .map_err(|_| overflow_error())?;
    let mut items = Vec::new();
    ops::reserve(&mut items, len)?;
    let mut i = start;
    for n in 0..len {
        if n % ops::INTERRUPT_POLL == 0 {
            interp.check_interrupt()?;
        }
        items.push(Value::Int(i));
        i = i.wrapping_add(step);
    }
    Ok(Value::list(items))
}

fn str_(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("str", 0, 1)?;
    match args.get(0) {
        Some(value) => interp.str(value).map(Value::from),
        None => Ok(Value::str("")),
    }
}

fn repr(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("repr", 1, 1)?;
    interp.repr(&args.positional[0]).map(Value::from)
}

fn int(_: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("int", 0, 2)?;
    let Some(value) = args.get(0) else {
        return Ok(Value::Int(0));
    };
    if let Some(base) = args.get(1) {
        let base = int_arg(base, "int")?;
        let Value::Str(text) = value else {
            return Err(type_error("int() can't convert non-string with explicit base"));
        };
        return parse_int(text, base as u32);
    }
    match value {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) => float_to_int(*f).map(Value::Int),
        Value::Str(text) => parse_int(text, 10),
        other => Err(type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> ExecResult<i64> {
    if f.is_nan() {
        return Err(value_error("cannot convert float NaN to integer"));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(Unwind::new(
            ExceptionKind::OverflowError,
            "cannot convert float to integer",
        ));
    }
    Ok(truncated as i64)
}

fn parse_int(text: &str, base: u32) -> ExecResult<Value> {
    let invalid = || {
        value_error(format!(
            "invalid literal for int() with base {base}: {}",
            Value::str(text).repr()
        ))
    };
    if !(2..=36).contains(&base) {
        return Err(value_error("int() base must be >= 2 and <= 36"));
    }
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = if base == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };
    if digits.is_empty() {
        return Err(invalid());
    }
    let magnitude = i64::from_str_radix(digits, base).map_err(|_| invalid())?;
    Ok(Value::Int(if negative { -magnitude } else { magnitude }))
}

fn float(_: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("float", 0, 1)?;
    match args.get(0) {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(text)) => text.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            value_error(format!("could not convert string to float: {text}"))
        }),
        Some(value) => value.as_float().map(Value::Float).ok_or_else(|| {
            type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                value.type_name()
            ))
        }),
    }
}

fn bool_(_: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("bool", 0, 1)?;
    Ok(Value::Bool(args.get(0).is_some_and(Value::truthy)))
}

fn list(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("list", 0, 1)?;
    match args.get(0) {
        Some(value) => Ok(Value::list(interp.iterate(value)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn tuple(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("tuple", 0, 1)?;
    match args.get(0) {
        Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
        Some(value) => Ok(Value::tuple(interp.iterate(value)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn dict(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("dict", 0, 1)?;
    let result = Dict::new();
    if let Some(source) = args.get(0) {
        update_dict(interp, &result, source)?;
    }
    for (key, value) in args.keywords {
        result.insert(Value::from(key), value);
    }
    Ok(Value::Dict(result))
}

fn update_dict(interp: &mut Interpreter, target: &Dict, source: &Value) -> ExecResult<()> {
    if let Value::Dict(source) = source {
        for (key, value) in source.items() {
            target.insert(key, value);
        }
        return Ok(());
    }
    for (i, pair) in interp.iterate(source)?.into_iter().enumerate() {
        let items = interp.iterate(&pair)?;
        let [key, value] = <[Value; 2]>::try_from(items).map_err(|items| {
            value_error(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                items.len()
            ))
        })?;
        key.check_hashable()?;
        target.insert(key, value);
    }
    Ok(())
}

fn abs(_: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("abs", 1, 1)?;
    match &args.positional[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        value => value
            .as_int()
            .ok_or_else(|| {
                type_error(format!(
                    "bad operand type for abs(): '{}'",
                    value.type_name()
                ))
            })?
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Unwind::new(ExceptionKind::OverflowError, "integer overflow")),
    }
}

/// Elements of `min`/`max`: a single iterable argument or the arguments.
fn extremum_items(interp: &mut Interpreter, name: &str, args: &Args) -> ExecResult<Vec<Value>> {
    let items = match args.positional.as_slice() {
        [] => return Err(type_error(format!("{name} expected 1 arguments, got 0"))),
        [single] => interp.iterate(single)?,
        many => many.to_vec(),
    };
    if items.is_empty() {
        return Err(value_error(format!("{name}() arg is an empty sequence")));
    }
    Ok(items)
}

fn extremum(interp: &mut Interpreter, name: &str, args: Args, wanted: Ordering) -> ExecResult<Value> {
    let items = extremum_items(interp, name, &args)?;
    let key = args.keyword("key").filter(|k| !k.is_none()).cloned();
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let item_key = match &key {
            Some(key) => interp.call(key, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((_, best_key)) => ops::order(&item_key, best_key)? == wanted,
        };
        if replace {
            best = Some((item, item_key));
        }
    }
    best.map(|(item, _)| item)
        .ok_or_else(|| value_error(format!("{name}() arg is an empty sequence")))
}

fn min(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    extremum(interp, "min", args, Ordering::Less)
}

fn max(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    extremum(interp, "max", args, Ordering::Greater)
}

fn sum(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("sum", 1, 2)?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    for item in interp.iterate(&args.positional[0])? {
        total = interp.binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

/// Stable sort shared by `sorted` and `list.sort`.
pub(crate) fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> ExecResult<Vec<Value>> {
    let keys = match key {
        Some(key) if !key.is_none() => items
            .iter()
            .map(|item| interp.call(key, Args::new(vec![item.clone()])))
            .collect::<ExecResult<Vec<Value>>>()?,
        _ => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut error = None;
    order.sort_by(|&a, &b| {
        if error.is_some() {
            return Ordering::Equal;
        }
        match ops::order(&keys[a], &keys[b]) {
            Ok(ordering) if reverse => ordering.reverse(),
            Ok(ordering) => ordering,
            Err(err) => {
                error = Some(err);
                Ordering::Equal
            }
        }
    });
    if let Some(err) = error {
        return Err(err);
    }
    let mut slots: Vec<Option<Value>> = items.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

fn sort_options(args: &Args) -> (Option<Value>, bool) {
    let key = args.keyword("key").cloned();
    let reverse = args.keyword("reverse").is_some_and(Value::truthy);
    (key, reverse)
}

fn sorted(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("sorted", 1, 1)?;
    let items = interp.iterate(&args.positional[0])?;
    let (key, reverse) = sort_options(&args);
    Ok(Value::list(sort_values(interp, items, key.as_ref(), reverse)?))
}

fn reversed(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("reversed", 1, 1)?;
    let mut items = interp.iterate(&args.positional[0])?;
    items.reverse();
    Ok(Value::list(items))
}

fn enumerate(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("enumerate", 1, 2)?;
    let start = match args.get(1).or_else(|| args.keyword("start")) {
        Some(start) => int_arg(start, "enumerate")?,
        None => 0,
    };
    let items = interp.iterate(&args.positional[0])?;
    Ok(Value::list(
        items
            .into_iter()
            .zip(start..)
            .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
            .collect(),
    ))
}

fn zip(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    let sequences = args
        .positional
        .iter()
        .map(|seq| interp.iterate(seq))
        .collect::<ExecResult<Vec<Vec<Value>>>>()?;
    let shortest = sequences.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::list(
        (0..shortest)
            .map(|i| Value::tuple(sequences.iter().map(|seq| seq[i].clone()).collect()))
            .collect(),
    ))
}

fn map(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    if args.len() < 2 {
        return Err(type_error("map() requires at least two args"));
    }
    let func = args.positional[0].clone();
    let sequences = args.positional[1..]
        .iter()
        .map(|seq| interp.iterate(seq))
        .collect::<ExecResult<Vec<Vec<Value>>>>()?;
    let longest = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::with_capacity(longest);
    for i in 0..longest {
        let row: Vec<Value> = sequences
            .iter()
            .map(|seq| seq.get(i).cloned().unwrap_or(Value::None))
            .collect();
        let value = if func.is_none() {
            if row.len() == 1 {
                row.into_iter().next().unwrap_or(Value::None)
            } else {
                Value::tuple(row)
            }
        } else {
            interp.call(&func, Args::new(row))?
        };
        out.push(value);
    }
    Ok(Value::list(out))
}

fn filter(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("filter", 2, 2)?;
    let func = &args.positional[0];
    let mut out = Vec::new();
    for item in interp.iterate(&args.positional[1])? {
        let keep = if func.is_none() {
            item.truthy()
        } else {
            interp.call(func, Args::new(vec![item.clone()]))?.truthy()
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn any(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("any", 1, 1)?;
    Ok(Value::Bool(interp.iterate(&args.positional[0])?.iter().any(Value::truthy)))
}

fn all(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("all", 1, 1)?;
    Ok(Value::Bool(interp.iterate(&args.positional[0])?.iter().all(Value::truthy)))
}

fn attr_name(value: &Value, func: &str) -> ExecResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| type_error(format!("{func}(): attribute name must be string")))
}

fn hasattr(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("hasattr", 2, 2)?;
    let name = attr_name(&args.positional[1], "hasattr")?;
    match interp.get_attr(&args.positional[0], &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(Unwind::Error(exc)) if exc.kind == ExceptionKind::AttributeError => Ok(Value::Bool(false)),
        Err(other) => Err(other),
    }
}

fn getattr(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("getattr", 2, 3)?;
    let name = attr_name(&args.positional[1], "getattr")?;
    match (interp.get_attr(&args.positional[0], &name), args.get(2)) {
        (Ok(value), _) => Ok(value),
        (Err(Unwind::Error(exc)), Some(default)) if exc.kind == ExceptionKind::AttributeError => {
            Ok(default.clone())
        }
        (Err(err), _) => Err(err),
    }
}

fn setattr(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("setattr", 3, 3)?;
    let name = attr_name(&args.positional[1], "setattr")?;
    interp.set_attr(&args.positional[0], &name, args.positional[2].clone())?;
    Ok(Value::None)
}

fn callable(_: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("callable", 1, 1)?;
    let result = match &args.positional[0] {
        Value::Function(_)
        | Value::Builtin(_)
        | Value::Method(_)
        | Value::Class(_)
        | Value::ExceptionType(_) => true,
        Value::Instance(inst) => inst.class.lookup("__call__").is_some(),
        _ => false,
    };
    Ok(Value::Bool(result))
}

fn round(_: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("round", 1, 2)?;
    let x = args.positional[0]
        .as_float()
        .ok_or_else(|| type_error("a float is required"))?;
    let digits = match args.get(1) {
        Some(n) => int_arg(n, "round")?,
        None => 0,
    };
    let factor = 10f64.powi(digits.clamp(-308, 308) as i32);
    Ok(Value::Float((x * factor).round() / factor))
}

fn divmod(interp: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("divmod", 2, 2)?;
    let (a, b) = (&args.positional[0], &args.positional[1]);
    let quotient = ops::binary(interp.interrupt_handle(), BinOp::FloorDiv, a, b)?;
    let remainder = ops::binary(interp.interrupt_handle(), BinOp::Mod, a, b)?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

fn chr(_: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("chr", 1, 1)?;
    let code = int_arg(&args.positional[0], "chr")?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::from(c.to_string()))
        .ok_or_else(|| value_error("chr() arg not in range(0x110000)"))
}

fn ord(_: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("ord", 1, 1)?;
    let Value::Str(s) = &args.positional[0] else {
        return Err(type_error(format!(
            "ord() expected string of length 1, but {} found",
            args.positional[0].type_name()
        )));
    };
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(type_error(format!(
            "ord() expected a character, but string of length {} found",
            s.chars().count()
        ))),
    }
}

fn isinstance(_: &mut Interpreter, args: Args) -> ExecResult<Value> {
    args.check("isinstance", 2, 2)?;
    instance_of(&args.positional[0], &args.positional[1]).map(Value::Bool)
}

fn instance_of(object: &Value, class: &Value) -> ExecResult<bool> {
    match class {
        Value::Class(class) => Ok(matches!(object, Value::Instance(inst) if inst.class.is_subclass_of(class))),
        Value::ExceptionType(kind) => {
            Ok(matches!(object, Value::Exception(exc) if exc.kind.is_subclass_of(*kind)))
        }
        Value::Builtin(builtin) => Ok(match &*builtin.name {
            "int" => matches!(object, Value::Int(_) | Value::Bool(_)),
            "float" => matches!(object, Value::Float(_)),
            "str" => matches!(object, Value::Str(_)),
            "bool" => matches!(object, Value::Bool(_)),
            "list" => matches!(object, Value::List(_)),
            "tuple" => matches!(object, Value::Tuple(_)),
            "dict" => matches!(object, Value::Dict(_)),
            _ => false,
        }),
        Value::Tuple(options) => {
            for option in options.iter() {
                if instance_of(object, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(type_error(
            "isinstance() arg 2 must be a class, type, or tuple of classes and types",
        )),
    }
}

// =============================================================================
// Methods
// =============================================================================

const LIST_METHODS: &[&str] = &[
    "append", "count", "extend", "index", "insert", "pop", "remove", "reverse", "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "has_key", "items", "iteritems", "iterkeys", "itervalues", "keys",
    "pop", "setdefault", "update", "values",
];

const STR_METHODS: &[&str] = &[
    "count", "endswith", "find", "format", "isalpha", "isdigit", "isspace", "join", "lower",
    "lstrip", "replace", "rstrip", "split", "splitlines", "startswith", "strip", "upper",
];

/// Built-in method names of `receiver`'s type.
pub(crate) fn method_names(receiver: &Value) -> &'static [&'static str] {
    match receiver {
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Str(_) => STR_METHODS,
        _ => &[],
    }
}

/// The static name of a built-in method of `receiver`, if it has one.
pub(crate) fn method_name(receiver: &Value, name: &str) -> Option<&'static str> {
    method_names(receiver).iter().copied().find(|method| *method == name)
}

pub(crate) fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> ExecResult<Value> {
    match receiver {
        Value::List(list) => list_method(interp, list, name, args),
        Value::Dict(dict) => dict_method(interp, dict, name, args),
        Value::Str(s) => str_method(interp, s, name, args),
        other => Err(attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

fn list_method(interp: &mut Interpreter, list: &List, name: &str, args: Args) -> ExecResult<Value> {
    match name {
        "append" => {
            args.check("append", 1, 1)?;
            list.write().push(args.positional[0].clone());
        }
        "extend" => {
            args.check("extend", 1, 1)?;
            let items = interp.iterate(&args.positional[0])?;
            list.write().extend(items);
        }
        "insert" => {
            args.check("insert", 2, 2)?;
            let index = int_arg(&args.positional[0], "insert")?;
            let mut items = list.write();
            let len = items.len() as i64;
            let at = if index < 0 { index + len } else { index }.clamp(0, len) as usize;
            items.insert(at, args.positional[1].clone());
        }
        "pop" => {
            args.check("pop", 0, 1)?;
            let index = match args.get(0) {
                Some(index) => int_arg(index, "pop")?,
                None => -1,
            };
            let mut items = list.write();
            if items.is_empty() {
                return Err(index_error("pop from empty list"));
            }
            let len = items.len() as i64;
            let at = if index < 0 { index + len } else { index };
            if at < 0 || at >= len {
                return Err(index_error("pop index out of range"));
            }
            return Ok(items.remove(at as usize));
        }
        "remove" => {
            args.check("remove", 1, 1)?;
            let position = list
                .snapshot()
                .iter()
                .position(|item| item.equals(&args.positional[0]))
                .ok_or_else(|| value_error("list.remove(x): x not in list"))?;
            list.write().remove(position);
        }
        "index" => {
            args.check("index", 1, 1)?;
            let target = &args.positional[0];
            return list
                .snapshot()
                .iter()
                .position(|item| item.equals(target))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| value_error(format!("{} is not in list", target.repr())));
        }
        "count" => {
            args.check("count", 1, 1)?;
            let target = &args.positional[0];
            let n = list.snapshot().iter().filter(|item| item.equals(target)).count();
            return Ok(Value::Int(n as i64));
        }
        "sort" => {
            args.check("sort", 0, 0)?;
            let (key, reverse) = sort_options(&args);
            let sorted = sort_values(interp, list.snapshot(), key.as_ref(), reverse)?;
            *list.write() = sorted;
        }
        "reverse" => {
            args.check("reverse", 0, 0)?;
            list.write().reverse();
        }
        _ => return Err(attribute_error(format!("'list' object has no attribute '{name}'"))),
    }
    Ok(Value::None)
}

fn dict_method(interp: &mut Interpreter, dict: &Dict, name: &str, args: Args) -> ExecResult<Value> {
    let key_error = |key: &Value| Unwind::new(ExceptionKind::KeyError, key.repr());
    match name {
        "get" => {
            args.check("get", 1, 2)?;
            let key = &args.positional[0];
            key.check_hashable()?;
            Ok(dict
                .get(key)
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::None))
        }
        "keys" | "iterkeys" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(dict.keys()))
        }
        "values" | "itervalues" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(dict.items().into_iter().map(|(_, v)| v).collect()))
        }
        "items" | "iteritems" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(
                dict.items()
                    .into_iter()
                    .map(|(k, v)| Value::tuple(vec![k, v]))
                    .collect(),
            ))
        }
        "pop" => {
            args.check("pop", 1, 2)?;
            let key = &args.positional[0];
            key.check_hashable()?;
            let removed = dict.write().remove(key);
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(key_error(key)),
            }
        }
        "update" => {
            args.check("update", 0, 1)?;
            if let Some(source) = args.get(0) {
                update_dict(interp, dict, source)?;
            }
            for (key, value) in args.keywords {
                dict.insert(Value::from(key), value);
            }
            Ok(Value::None)
        }
        "setdefault" => {
            args.check("setdefault", 1, 2)?;
            let key = &args.positional[0];
            key.check_hashable()?;
            if let Some(existing) = dict.get(key) {
                return Ok(existing);
            }
            let value = args.get(1).cloned().unwrap_or(Value::None);
            dict.insert(key.clone(), value.clone());
            Ok(value)
        }
        "has_key" => {
            args.check("has_key", 1, 1)?;
            Ok(Value::Bool(dict.read().contains_key(&args.positional[0])))
        }
        "copy" => {
            args.check("copy", 0, 0)?;
            Ok(Value::Dict(Dict::from_entries(dict.items())))
        }
        "clear" => {
            args.check("clear", 0, 0)?;
            dict.write().clear();
            Ok(Value::None)
        }
        _ => Err(attribute_error(format!("'dict' object has no attribute '{name}'"))),
    }
}

fn str_arg<'a>(args: &'a Args, index: usize, method: &str) -> ExecResult<&'a str> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(type_error(format!(
            "{method}() argument {} must be str, not {}",
            index + 1,
            other.type_name()
        ))),
        None => Err(type_error(format!("{method}() missing argument {}", index + 1))),
    }
}

fn optional_chars<'a>(args: &'a Args, method: &str) -> ExecResult<Option<&'a str>> {
    match args.get(0) {
        None | Some(Value::None) => Ok(None),
        Some(_) => str_arg(args, 0, method).map(Some),
    }
}

fn str_method(interp: &mut Interpreter, s: &str, name: &str, args: Args) -> ExecResult<Value> {
    match name {
        "join" => {
            args.check("join", 1, 1)?;
            let mut parts = Vec::new();
            for (i, item) in interp.iterate(&args.positional[0])?.iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => {
                        return Err(type_error(format!(
                            "sequence item {i}: expected string, {} found",
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Value::from(parts.join(s)))
        }
        "split" => {
            args.check("split", 0, 2)?;
            let maxsplit = match args.get(1) {
                Some(n) => int_arg(n, "split")?,
                None => -1,
            };
            let parts: Vec<Value> = match optional_chars(&args, "split")? {
                None => split_whitespace(s, maxsplit),
                Some("") => return Err(value_error("empty separator")),
                Some(sep) if maxsplit < 0 => s.split(sep).map(Value::from).collect(),
                Some(sep) => s
                    .splitn(maxsplit as usize + 1, sep)
                    .map(Value::from)
                    .collect(),
            };
            Ok(Value::list(parts))
        }
        "strip" | "lstrip" | "rstrip" => {
            args.check(name, 0, 1)?;
            let chars = optional_chars(&args, name)?;
            let matches = |c: char| match chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let result = match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Ok(Value::str(result))
        }
        "upper" => Ok(Value::from(s.to_uppercase())),
        "lower" => Ok(Value::from(s.to_lowercase())),
        "replace" => {
            args.check("replace", 2, 3)?;
            let old = str_arg(&args, 0, "replace")?;
            let new = str_arg(&args, 1, "replace")?;
            let count = match args.get(2) {
                Some(n) => int_arg(n, "replace")?,
                None => -1,
            };
            Ok(Value::from(if count < 0 {
                s.replace(old, new)
            } else {
                s.replacen(old, new, count as usize)
            }))
        }
        "startswith" | "endswith" => {
            args.check(name, 1, 1)?;
            let candidates: Vec<Value> = match &args.positional[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let Value::Str(affix) = candidate else {
                    return Err(type_error(format!(
                        "{name} first arg must be str or a tuple of str, not {}",
                        candidate.type_name()
                    )));
                };
                let hit = if name == "startswith" {
                    s.starts_with(&**affix)
                } else {
                    s.ends_with(&**affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" => {
            args.check("find", 1, 1)?;
            let needle = str_arg(&args, 0, "find")?;
            let index = s
                .find(needle)
                .map_or(-1, |byte| s[..byte].chars().count() as i64);
            Ok(Value::Int(index))
        }
        "count" => {
            args.check("count", 1, 1)?;
            let needle = str_arg(&args, 0, "count")?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(n as i64))
        }
        "format" => format_method(interp, s, &args).map(Value::from),
        "splitlines" => {
            args.check("splitlines", 0, 0)?;
            Ok(Value::list(s.lines().map(Value::from).collect()))
        }
        "isdigit" | "isalpha" | "isspace" => {
            args.check(name, 0, 0)?;
            let test: fn(char) -> bool = match name {
                "isdigit" => |c| c.is_ascii_digit(),
                "isalpha" => char::is_alphabetic,
                _ => char::is_whitespace,
            };
            Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
        }
        _ => Err(attribute_error(format!("'str' object has no attribute '{name}'"))),
    }
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(Value::str(rest));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(Value::str(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    parts
}

/// `str.format` with positional, numbered and keyword fields, `!r`/`!s`
/// conversions, and `%`-style format specs.
fn format_method(interp: &mut Interpreter, template: &str, args: &Args) -> ExecResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(value_error("Single '{' encountered in format string")),
                    }
                }
                let (field, spec) = match field.split_once(':') {
                    Some((field, spec)) => (field.to_string(), Some(spec.to_string())),
                    None => (field, None),
                };
                let (field, conversion) = match field.split_once('!') {
                    Some((field, conversion)) => (field.to_string(), Some(conversion.to_string())),
                    None => (field, None),
                };
                let value = if field.is_empty() {
                    let value = args.get(auto_index).cloned();
                    auto_index += 1;
                    value.ok_or_else(|| index_error("tuple index out of range"))?
                } else if let Ok(index) = field.parse::<usize>() {
                    args.get(index)
                        .cloned()
                        .ok_or_else(|| index_error("tuple index out of range"))?
                } else {
                    args.keyword(&field)
                        .cloned()
                        .ok_or_else(|| Unwind::new(ExceptionKind::KeyError, Value::str(&field).repr()))?
                };
                let text = match (conversion.as_deref(), spec.as_deref()) {
                    (Some("r"), _) => interp.repr(&value)?,
                    (_, Some(spec)) if spec.ends_with(|c: char| c.is_ascii_alphabetic()) => {
                        ops::percent_format(interp, &format!("%{spec}"), &Value::tuple(vec![value]))?
                    }
                    _ => interp.str(&value)?,
                };
                out.push_str(&text);
            }
            '}' => return Err(value_error("Single '}' encountered in format string")),
            c => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_contains_exceptions_and_functions() {
        assert!(table().contains_key("len"));
        assert!(table().contains_key("ValueError"));
        assert!(matches!(lookup("KeyError"), Some(Value::ExceptionType(ExceptionKind::KeyError))));
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn test_builtin_names_are_sorted() {
        let names = builtin_names();
        assert!(names.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(names.contains(&"len"));
        assert!(names.contains(&"MemoryError"));
    }

    #[test]
    fn test_method_names() {
        let list = Value::list(vec![]);
        assert_eq!(method_name(&list, "append"), Some("append"));
        assert_eq!(method_name(&list, "join"), None);
        assert_eq!(method_name(&Value::str(""), "join"), Some("join"));
        assert_eq!(method_name(&Value::Int(1), "append"), None);
    }

    #[test]
    fn test_split_whitespace() {
        let parts: Vec<String> = split_whitespace("  a b  c ", -1).iter().map(Value::repr).collect();
        assert_eq!(parts, ["'a'", "'b'", "'c'"]);
        let parts: Vec<String> = split_whitespace("a b  c ", 1).iter().map(Value::repr).collect();
        assert_eq!(parts, ["'a'", "'b  c '"]);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(" 42 ", 10).unwrap().repr(), "42");
        assert_eq!(parse_int("-ff", 16).unwrap().repr(), "-255");
        assert!(parse_int("4x", 10).is_err());
    }
}
