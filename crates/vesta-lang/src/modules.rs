//! Module registry.
//!
//! Imports resolve first to native modules built into the interpreter, then
//! to source modules registered by the host. Loaded modules are cached until
//! [`ModuleRegistry::reset`] drops them, after which the next import executes
//! the module source again.
//!
//! The registry is shared between threads: a worksheet registers and resets
//! modules from the host side while a worker thread imports them.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::compile::{FeatureSet, compile};
use crate::error::{ExceptionKind, ExecResult, Unwind, type_error, value_error};
use crate::interp::Interpreter;
use crate::parser::parse;
use crate::value::{Args, Dict, HostObject, Instance, List, Module, Namespace, Value};

/// Names of the modules built into the interpreter.
pub const NATIVE_MODULES: &[&str] = &["__future__", "copy", "math", "sys", "time"];

#[derive(Default)]
pub struct ModuleRegistry {
    sources: RwLock<FxHashMap<String, Arc<str>>>,
    loaded: RwLock<FxHashMap<String, Arc<Module>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `source` importable as `name`, replacing any earlier source.
    ///
    /// A cached module of the same name is dropped.
    pub fn register_source(&self, name: impl Into<String>, source: impl Into<Arc<str>>) {
        let name = name.into();
        self.sources.write().insert(name.clone(), source.into());
        self.reset(&name);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.sources.write().remove(name).is_some();
        self.reset(name);
        removed
    }

    /// Whether `name` can be imported.
    pub fn is_registered(&self, name: &str) -> bool {
        NATIVE_MODULES.contains(&name)
            || self.sources.read().contains_key(name)
            || self.is_package(name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().contains_key(name)
    }

    /// Drop `name` and its submodules from the cache.
    ///
    /// Returns whether anything was cached.
    pub fn reset(&self, name: &str) -> bool {
        let prefix = format!("{name}.");
        let mut loaded = self.loaded.write();
        let before = loaded.len();
        loaded.retain(|key, _| key != name && !key.starts_with(&prefix));
        let removed = loaded.len() != before;
        if removed {
            debug!(module = name, "module reset");
        }
        removed
    }

    fn is_package(&self, name: &str) -> bool {
        let prefix = format!("{name}.");
        self.sources.read().keys().any(|key| key.starts_with(&prefix))
    }

    /// Import a possibly dotted module name, returning the innermost module.
    ///
    /// Each parent package is imported first and the child is bound as an
    /// attribute of its parent.
    pub fn import(&self, interp: &mut Interpreter, name: &str) -> ExecResult<Arc<Module>> {
        let mut parent: Option<Arc<Module>> = None;
        let mut end = 0;
        for component in name.split('.') {
            if component.is_empty() {
                return Err(import_error(format!("No module named {name}")));
            }
            end += component.len();
            let qualified = &name[..end];
            end += 1;
            let cached = self.loaded.read().get(qualified).cloned();
            let module = match cached {
                Some(module) => module,
                None => self.load(interp, qualified)?,
            };
            if let Some(parent) = &parent {
                parent
                    .namespace
                    .set(component, Value::Module(module.clone()));
            }
            parent = Some(module);
        }
        parent.ok_or_else(|| import_error("Empty module name"))
    }

    fn load(&self, interp: &mut Interpreter, name: &str) -> ExecResult<Arc<Module>> {
        let namespace = Namespace::new();
        namespace.set("__name__", Value::str(name));
        if let Some(init) = native(name) {
            init(&namespace);
        } else {
            let source = self.sources.read().get(name).cloned();
            match source {
                Some(source) => {
                    debug!(module = name, "executing module source");
                    let program = parse(&source)
                        .and_then(|module| compile(module, name, &FeatureSet::new()))
                        .map_err(|err| {
                            import_error(format!(
                                "error compiling module {name}: {} (line {})",
                                err.message, err.line
                            ))
                        })?;
                    interp.run(&program, &namespace)?;
                }
                None if self.is_package(name) => {}
                None => return Err(import_error(format!("No module named {name}"))),
            }
        }
        let module = Arc::new(Module {
            name: Arc::from(name),
            namespace,
        });
        Ok(self
            .loaded
            .write()
            .entry(name.to_string())
            .or_insert(module)
            .clone())
    }
}

fn import_error(message: impl Into<String>) -> Unwind {
    Unwind::new(ExceptionKind::ImportError, message)
}

fn native(name: &str) -> Option<fn(&Namespace)> {
    Some(match name {
        "__future__" => init_future,
        "copy" => init_copy,
        "math" => init_math,
        "sys" => init_sys,
        "time" => init_time,
        _ => return None,
    })
}

fn init_future(ns: &Namespace) {
    for feature in crate::compile::FUTURE_FEATURES {
        ns.set(*feature, Value::str(feature));
    }
}

// =============================================================================
// copy
// =============================================================================

fn init_copy(ns: &Namespace) {
    ns.set(
        "copy",
        Value::native("copy", |_, args| {
            args.check("copy", 1, 1)?;
            args.positional[0].shallow_copy()
        }),
    );
    ns.set(
        "deepcopy",
        Value::native("deepcopy", |_, args| {
            args.check("deepcopy", 1, 1)?;
            let mut memo = FxHashMap::default();
            deep_copy(&args.positional[0], &mut memo)
        }),
    );
}

/// Recursive copy; `memo` maps already copied containers to their copies so
/// shared and cyclic structure is preserved.
pub fn deep_copy(value: &Value, memo: &mut FxHashMap<usize, Value>) -> ExecResult<Value> {
    match value {
        Value::List(list) => {
            if let Some(copy) = memo.get(&list.id()) {
                return Ok(copy.clone());
            }
            let copy = List::new(Vec::new());
            memo.insert(list.id(), Value::List(copy.clone()));
            let mut items = Vec::new();
            for item in list.snapshot() {
                items.push(deep_copy(&item, memo)?);
            }
            *copy.write() = items;
            Ok(Value::List(copy))
        }
        Value::Dict(dict) => {
            if let Some(copy) = memo.get(&dict.id()) {
                return Ok(copy.clone());
            }
            let copy = Dict::new();
            memo.insert(dict.id(), Value::Dict(copy.clone()));
            for (key, item) in dict.items() {
                copy.insert(deep_copy(&key, memo)?, deep_copy(&item, memo)?);
            }
            Ok(Value::Dict(copy))
        }
        Value::Tuple(items) => {
            let mut copied = Vec::with_capacity(items.len());
            for item in items.iter() {
                copied.push(deep_copy(item, memo)?);
            }
            Ok(Value::tuple(copied))
        }
        Value::Instance(inst) => {
            let id = Arc::as_ptr(inst) as usize;
            if let Some(copy) = memo.get(&id) {
                return Ok(copy.clone());
            }
            let copy = Arc::new(Instance::new(inst.class.clone()));
            memo.insert(id, Value::Instance(copy.clone()));
            let attrs: Vec<(String, Value)> = inst
                .attrs
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, item) in attrs {
                let item = deep_copy(&item, memo)?;
                copy.attrs.write().insert(key, item);
            }
            Ok(Value::Instance(copy))
        }
        other => other.shallow_copy(),
    }
}

// =============================================================================
// math
// =============================================================================

fn float_arg(args: &Args, index: usize, func: &str) -> ExecResult<f64> {
    args.get(index)
        .and_then(Value::as_float)
        .ok_or_else(|| type_error(format!("{func}() requires a float argument")))
}

fn math_fn(ns: &Namespace, name: &'static str, f: fn(f64) -> f64) {
    ns.set(
        name,
        Value::native(name, move |_, args| {
            args.check(name, 1, 1)?;
            let result = f(float_arg(&args, 0, name)?);
            if result.is_nan() {
                return Err(value_error("math domain error"));
            }
            Ok(Value::Float(result))
        }),
    );
}

fn init_math(ns: &Namespace) {
    ns.set("pi", Value::Float(std::f64::consts::PI));
    ns.set("e", Value::Float(std::f64::consts::E));
    math_fn(ns, "sqrt", f64::sqrt);
    math_fn(ns, "floor", f64::floor);
    math_fn(ns, "ceil", f64::ceil);
    math_fn(ns, "fabs", f64::abs);
    math_fn(ns, "exp", f64::exp);
    math_fn(ns, "sin", f64::sin);
    math_fn(ns, "cos", f64::cos);
    math_fn(ns, "tan", f64::tan);
    math_fn(ns, "asin", f64::asin);
    math_fn(ns, "acos", f64::acos);
    math_fn(ns, "atan", f64::atan);
    math_fn(ns, "log10", f64::log10);
    ns.set(
        "log",
        Value::native("log", |_, args| {
            args.check("log", 1, 2)?;
            let x = float_arg(&args, 0, "log")?;
            if x <= 0.0 {
                return Err(value_error("math domain error"));
            }
            Ok(Value::Float(match args.get(1) {
                Some(_) => x.ln() / float_arg(&args, 1, "log")?.ln(),
                None => x.ln(),
            }))
        }),
    );
    ns.set(
        "pow",
        Value::native("pow", |_, args| {
            args.check("pow", 2, 2)?;
            Ok(Value::Float(
                float_arg(&args, 0, "pow")?.powf(float_arg(&args, 1, "pow")?),
            ))
        }),
    );
    ns.set(
        "atan2",
        Value::native("atan2", |_, args| {
            args.check("atan2", 2, 2)?;
            Ok(Value::Float(
                float_arg(&args, 0, "atan2")?.atan2(float_arg(&args, 1, "atan2")?),
            ))
        }),
    );
    ns.set(
        "hypot",
        Value::native("hypot", |_, args| {
            args.check("hypot", 2, 2)?;
            Ok(Value::Float(
                float_arg(&args, 0, "hypot")?.hypot(float_arg(&args, 1, "hypot")?),
            ))
        }),
    );
}

// =============================================================================
// time
// =============================================================================

fn init_time(ns: &Namespace) {
    ns.set(
        "time",
        Value::native("time", |_, args| {
            args.check("time", 0, 0)?;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            Ok(Value::Float(now.as_secs_f64()))
        }),
    );
    ns.set(
        "sleep",
        Value::native("sleep", |interp, args| {
            args.check("sleep", 1, 1)?;
            let seconds = float_arg(&args, 0, "sleep")?;
            if !(0.0..=1e9).contains(&seconds) {
                return Err(value_error("sleep length must be non-negative"));
            }
            if interp
                .interrupt_handle()
                .sleep(Duration::from_secs_f64(seconds))
            {
                Ok(Value::None)
            } else {
                Err(Unwind::Interrupt)
            }
        }),
    );
}

// =============================================================================
// sys
// =============================================================================

/// File-like object forwarding writes to the interpreter's stdout sink.
struct StreamWriter {
    name: &'static str,
}

impl HostObject for StreamWriter {
    fn type_name(&self) -> &str {
        "file"
    }

    fn repr(&self) -> String {
        format!("<open file '<{}>', mode 'w'>", self.name)
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "write" | "flush")
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, args: Args) -> ExecResult<Value> {
        match name {
            "write" => {
                args.check("write", 1, 1)?;
                let text = interp.str(&args.positional[0])?;
                interp.write_stdout(&text);
                Ok(Value::None)
            }
            "flush" => Ok(Value::None),
            other => Err(Unwind::new(
                ExceptionKind::AttributeError,
                format!("'file' object has no attribute '{other}'"),
            )),
        }
    }
}

fn init_sys(ns: &Namespace) {
    ns.set("stdout", Value::Host(Arc::new(StreamWriter { name: "stdout" })));
    ns.set("stderr", Value::Host(Arc::new(StreamWriter { name: "stderr" })));
    ns.set("version", Value::str(concat!("vesta ", env!("CARGO_PKG_VERSION"))));
    ns.set("maxint", Value::Int(i64::MAX));
}
