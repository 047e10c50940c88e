//! Runtime values.
//!
//! Scalars are stored inline; containers, functions, classes and instances
//! are reference counted so that aliasing behaves like the language expects:
//! two names bound to the same list observe each other's mutations, and a
//! shallow copy produces a new container holding the same elements.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;

use crate::ast::FunctionDef;
use crate::builtins;
use crate::error::{ExceptionKind, ExecResult, Unwind, type_error};
use crate::interp::Interpreter;

/// Signature of functions implemented by the host.
pub type NativeFn = Arc<dyn Fn(&mut Interpreter, Args) -> ExecResult<Value> + Send + Sync>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
    List(List),
    Dict(Dict),
    Function(Arc<Function>),
    Builtin(Arc<Builtin>),
    Method(Arc<BoundMethod>),
    Class(Arc<Class>),
    Instance(Arc<Instance>),
    Module(Arc<Module>),
    ExceptionType(ExceptionKind),
    Exception(Arc<ExceptionValue>),
    Host(Arc<dyn HostObject>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::from(items))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(List::new(items))
    }

    /// Wrap a host closure as a callable value.
    pub fn native(
        name: &str,
        func: impl Fn(&mut Interpreter, Args) -> ExecResult<Value> + Send + Sync + 'static,
    ) -> Value {
        Value::Builtin(Arc::new(Builtin {
            name: Arc::from(name),
            func: Arc::new(func),
        }))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::List(_) => "list".into(),
            Value::Dict(_) => "dict".into(),
            Value::Function(_) => "function".into(),
            Value::Builtin(_) => "builtin_function_or_method".into(),
            Value::Method(_) => "instancemethod".into(),
            Value::Class(_) => "classobj".into(),
            Value::Instance(inst) => inst.class.name.to_string(),
            Value::Module(_) => "module".into(),
            Value::ExceptionType(_) => "type".into(),
            Value::Exception(exc) => exc.kind.name().into(),
            Value::Host(obj) => obj.type_name().into(),
        }
    }

    /// Attribute names reachable without running code: instance and class
    /// attributes, module globals and built-in methods. Sorted.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self {
            Value::Instance(inst) => {
                let mut names: Vec<String> = inst.attrs.read().keys().cloned().collect();
                class_attribute_names(&inst.class, &mut names);
                names
            }
            Value::Class(class) => {
                let mut names = Vec::new();
                class_attribute_names(class, &mut names);
                names
            }
            Value::Module(module) => module.namespace.names(),
            Value::Exception(_) => vec!["args".to_string(), "message".to_string()],
            other => builtins::method_names(other)
                .iter()
                .map(|name| name.to_string())
                .collect(),
        };
        names.sort();
        names.dedup();
        names
    }

    /// Look up an attribute without running code. Methods defined in
    /// classes come back unbound.
    pub fn static_attr(&self, name: &str) -> Option<Value> {
        match self {
            Value::Instance(inst) => {
                let own = inst.attrs.read().get(name).cloned();
                own.or_else(|| inst.class.lookup(name))
            }
            Value::Class(class) => class.lookup(name),
            Value::Module(module) => module.namespace.get(name),
            Value::Host(host) => host.get_attr(name),
            Value::List(_) | Value::Dict(_) | Value::Str(_) => {
                builtins::method_name(self, name).map(|method| {
                    Value::Method(Arc::new(BoundMethod {
                        receiver: self.clone(),
                        target: MethodTarget::Builtin(method),
                    }))
                })
            }
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::List(list) => !list.read().is_empty(),
            Value::Dict(dict) => !dict.read().is_empty(),
            _ => true,
        }
    }

    /// Numeric view used by arithmetic; bools count as integers.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Structural equality (`==`).
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                match (self.as_float(), other.as_float()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                self.as_int() == other.as_int()
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::List(a), Value::List(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.snapshot(), b.snapshot());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.items(), b.items());
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter()
                            .any(|(other_key, other_value)| key.equals(other_key) && value.equals(other_value))
                    })
            }
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            _ => self.is(other),
        }
    }

    /// Identity (`is`).
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Dict(a), Value::Dict(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => Arc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Whether the value may be used as a dictionary key.
    pub fn check_hashable(&self) -> ExecResult<()> {
        match self {
            Value::List(_) | Value::Dict(_) => {
                Err(type_error(format!("unhashable type: '{}'", self.type_name())))
            }
            Value::Tuple(items) => items.iter().try_for_each(Value::check_hashable),
            _ => Ok(()),
        }
    }

    /// Shallow copy, as performed by `copy.copy`.
    ///
    /// Containers and instances are duplicated one level deep. Immutable
    /// values, functions, classes and modules are returned as-is. Host
    /// objects decide for themselves.
    pub fn shallow_copy(&self) -> ExecResult<Value> {
        match self {
            Value::List(list) => Ok(Value::List(List::new(list.snapshot()))),
            Value::Dict(dict) => Ok(Value::Dict(Dict::from_entries(dict.items()))),
            Value::Instance(inst) => Ok(Value::Instance(Arc::new(Instance {
                class: inst.class.clone(),
                attrs: RwLock::new(inst.attrs.read().clone()),
            }))),
            Value::Host(obj) => match obj.try_copy() {
                Some(copy) => Ok(Value::Host(copy)),
                None => Err(type_error(format!(
                    "un(shallow)copyable object of type {}",
                    obj.type_name()
                ))),
            },
            other => Ok(other.clone()),
        }
    }

    /// Default `repr()`, ignoring user-defined `__repr__`.
    pub fn repr(&self) -> String {
        let mut seen = Vec::new();
        self.repr_inner(&mut seen)
    }

    fn repr_inner(&self, seen: &mut Vec<usize>) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => str_repr(s),
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.repr_inner(seen)).collect();
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Value::List(list) => {
                let id = list.id();
                if seen.contains(&id) {
                    return "[...]".into();
                }
                seen.push(id);
                let parts: Vec<String> = list.snapshot().iter().map(|v| v.repr_inner(seen)).collect();
                seen.pop();
                format!("[{}]", parts.join(", "))
            }
            Value::Dict(dict) => {
                let id = dict.id();
                if seen.contains(&id) {
                    return "{...}".into();
                }
                seen.push(id);
                let parts: Vec<String> = dict
                    .items()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr_inner(seen), v.repr_inner(seen)))
                    .collect();
                seen.pop();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Function(func) => format!("<function {}>", func.name),
            Value::Builtin(builtin) => format!("<built-in function {}>", builtin.name),
            Value::Method(method) => format!(
                "<bound method {}.{}>",
                method.receiver.type_name(),
                method.target.name()
            ),
            Value::Class(class) => format!("<class {}>", class.name),
            Value::Instance(inst) => format!("<{} instance>", inst.class.name),
            Value::Module(module) => format!("<module '{}'>", module.name),
            Value::ExceptionType(kind) => format!("<type '{}'>", kind.name()),
            Value::Exception(exc) => {
                if exc.message.is_empty() {
                    format!("{}()", exc.kind.name())
                } else {
                    format!("{}({})", exc.kind.name(), str_repr(&exc.message))
                }
            }
            Value::Host(obj) => obj.repr(),
        }
    }

    /// Default `str()`: strings are unquoted, everything else is `repr`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(exc) => exc.message.clone(),
            other => other.repr(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

/// Format a float the way the language prints it: shortest round-trip
/// digits, always with a decimal point or exponent.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let formatted = format!("{f:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Quote a string, preferring single quotes.
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

// =============================================================================
// Containers
// =============================================================================

/// A shared, mutable list.
#[derive(Clone, Default)]
pub struct List(Arc<RwLock<Vec<Value>>>);

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.0.write()
    }

    /// Copy of the current elements. Iterate over this rather than holding
    /// a guard while running user code.
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// Insertion-ordered dictionary storage.
#[derive(Clone, Default)]
pub struct DictMap {
    entries: Vec<(Value, Value)>,
}

impl DictMap {
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.equals(key))
            .map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k.equals(&key)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k.equals(key))?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

/// A shared, mutable dictionary.
#[derive(Clone, Default)]
pub struct Dict(Arc<RwLock<DictMap>>);

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(Value, Value)>) -> Self {
        let mut map = DictMap::default();
        for (key, value) in entries {
            map.insert(key, value);
        }
        Self(Arc::new(RwLock::new(map)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, DictMap> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, DictMap> {
        self.0.write()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    pub fn insert(&self, key: Value, value: Value) {
        self.0.write().insert(key, value);
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.0.read().entries.clone()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.0.read().entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn ptr_eq(&self, other: &Dict) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// A name → value mapping shared by reference.
///
/// Unit-level code runs against a namespace; a statement's result scope is
/// one. [`Namespace::shallow_copy`] gives a new mapping holding the same
/// values, which is how scopes are inherited without being shared.
#[derive(Clone, Default)]
pub struct Namespace(Arc<RwLock<FxHashMap<String, Value>>>);

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.write().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.read().contains_key(name)
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = self
            .0
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn shallow_copy(&self) -> Namespace {
        Namespace(Arc::new(RwLock::new(self.0.read().clone())))
    }

    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

// =============================================================================
// Callables and objects
// =============================================================================

/// Local variables of one function activation, chained to the enclosing
/// function's frame for closures.
pub struct Env {
    vars: RwLock<FxHashMap<String, Value>>,
    pub(crate) parent: Option<Arc<Env>>,
}

impl Env {
    pub(crate) fn new(parent: Option<Arc<Env>>) -> Arc<Env> {
        Arc::new(Env {
            vars: RwLock::new(FxHashMap::default()),
            parent,
        })
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.read().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub(crate) fn set(&self, name: &str, value: Value) {
        self.vars.write().insert(name.to_string(), value);
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Value> {
        self.vars.write().remove(name)
    }

    pub(crate) fn take_vars(&self) -> FxHashMap<String, Value> {
        std::mem::take(&mut *self.vars.write())
    }
}

pub struct Function {
    pub name: Arc<str>,
    pub def: Arc<FunctionDef>,
    pub defaults: Vec<Value>,
    pub globals: Namespace,
    pub(crate) closure: Option<Arc<Env>>,
    /// Unit the function was defined in, for tracebacks.
    pub unit: Arc<str>,
}

pub struct Builtin {
    pub name: Arc<str>,
    pub func: NativeFn,
}

#[derive(Clone)]
pub enum MethodTarget {
    Function(Arc<Function>),
    /// Built-in method of a list, dict, or str.
    Builtin(&'static str),
    /// Method resolved by a host object.
    Host(Arc<str>),
}

impl MethodTarget {
    pub fn name(&self) -> &str {
        match self {
            MethodTarget::Function(func) => &func.name,
            MethodTarget::Builtin(name) => name,
            MethodTarget::Host(name) => name,
        }
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub target: MethodTarget,
}

pub struct Class {
    pub name: Arc<str>,
    pub bases: Vec<Arc<Class>>,
    pub attrs: RwLock<FxHashMap<String, Value>>,
}

impl Class {
    /// Look up an attribute on the class or its bases, depth first.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attrs.read().get(name) {
            return Some(value.clone());
        }
        self.bases.iter().find_map(|base| base.lookup(name))
    }

    pub fn is_subclass_of(self: &Arc<Self>, other: &Arc<Class>) -> bool {
        Arc::ptr_eq(self, other) || self.bases.iter().any(|base| base.is_subclass_of(other))
    }
}

pub struct Instance {
    pub class: Arc<Class>,
    pub attrs: RwLock<FxHashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Arc<Class>) -> Self {
        Self {
            class,
            attrs: RwLock::new(FxHashMap::default()),
        }
    }
}

pub struct Module {
    pub name: Arc<str>,
    pub namespace: Namespace,
}

pub struct ExceptionValue {
    pub kind: ExceptionKind,
    pub message: String,
}

/// An object implemented by the embedding application.
pub trait HostObject: Send + Sync {
    fn type_name(&self) -> &str;

    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }

    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, _args: Args) -> ExecResult<Value> {
        Err(Unwind::new(
            ExceptionKind::AttributeError,
            format!("'{}' object has no attribute '{}'", self.type_name(), name),
        ))
    }

    /// A shallow copy, or `None` if the object cannot be copied.
    fn try_copy(&self) -> Option<Arc<dyn HostObject>> {
        None
    }
}

// =============================================================================
// Call arguments
// =============================================================================

/// Evaluated arguments of a call.
#[derive(Clone, Default, Debug)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    /// Check the positional count against `min..=max` and reject keywords
    /// the callee does not accept.
    pub fn check(&self, name: &str, min: usize, max: usize) -> ExecResult<()> {
        let count = self.positional.len();
        if count < min || count > max {
            let expected = if min == max {
                format!("exactly {min}")
            } else if count < min {
                format!("at least {min}")
            } else {
                format!("at most {max}")
            };
            let plural = if min == max && min == 1 { "" } else { "s" };
            return Err(type_error(format!(
                "{name}() takes {expected} argument{plural} ({count} given)"
            )));
        }
        Ok(())
    }

    pub fn no_keywords(&self, name: &str) -> ExecResult<()> {
        if self.keywords.is_empty() {
            Ok(())
        } else {
            Err(type_error(format!("{name}() takes no keyword arguments")))
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

fn class_attribute_names(class: &Class, names: &mut Vec<String>) {
    names.extend(class.attrs.read().keys().cloned());
    for base in &class.bases {
        class_attribute_names(base, names);
    }
}
