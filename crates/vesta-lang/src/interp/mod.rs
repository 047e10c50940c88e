//! Tree-walking interpreter.
//!
//! The interpreter executes a [`Program`] against a global [`Namespace`].
//! Function activations get an [`Env`] chained to the environment they were
//! defined in, so closures see enclosing locals while class bodies stay
//! invisible to the methods defined inside them.
//!
//! # Name resolution
//!
//! ```text
//! locals (Env chain) ──► globals (Namespace) ──► hooks ──► builtins
//! ```
//!
//! Hooks are per-interpreter values installed by the embedder, used to route
//! captured output back to whoever is running the program.

pub(crate) mod ops;

use std::io::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::ast::*;
use crate::builtins;
use crate::compile::Program;
use crate::error::{
    Exception, ExceptionKind, ExecResult, TraceFrame, Unwind, attribute_error, type_error,
    value_error,
};
use crate::interrupt::InterruptHandle;
use crate::modules::ModuleRegistry;
use crate::stack::ensure_sufficient_stack;
use crate::value::{
    Args, BoundMethod, Class, Dict, Env, ExceptionValue, Function, Instance, MethodTarget,
    Namespace, Value,
};

use ops::Index;

/// Default maximum call depth.
pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

type StdoutSink = Box<dyn FnMut(&str) + Send>;

/// Lexical context of the code being executed.
#[derive(Clone)]
struct Context {
    globals: Namespace,
    locals: Option<Arc<Env>>,
    /// Executing a class body; functions defined here skip `locals`.
    class_body: bool,
    unit: Arc<str>,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Executes compiled programs.
///
/// An interpreter is cheap to create and is meant to be used for one
/// execution: hooks and the stdout sink belong to whoever runs the program.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vesta_lang::{FeatureSet, Interpreter, InterruptHandle, ModuleRegistry, Namespace, compile, parse};
///
/// let program = compile(parse("x = 6 * 7").unwrap(), "<doc>", &FeatureSet::new()).unwrap();
/// let globals = Namespace::new();
/// let mut interp = Interpreter::new(Arc::new(ModuleRegistry::new()), InterruptHandle::new());
/// interp.run(&program, &globals).unwrap();
/// assert_eq!(globals.get("x").unwrap().repr(), "42");
/// ```
pub struct Interpreter {
    modules: Arc<ModuleRegistry>,
    interrupt: InterruptHandle,
    stdout: Option<StdoutSink>,
    hooks: FxHashMap<String, Value>,
    frames: Vec<TraceFrame>,
    recursion_limit: usize,
    /// Exceptions currently being handled, innermost last.
    handling: Vec<Exception>,
}

impl Interpreter {
    pub fn new(modules: Arc<ModuleRegistry>, interrupt: InterruptHandle) -> Self {
        Self {
            modules,
            interrupt,
            stdout: None,
            hooks: FxHashMap::default(),
            frames: Vec::new(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            handling: Vec::new(),
        }
    }

    /// Route `print` output and `sys.stdout` writes to `sink`.
    pub fn with_stdout(mut self, sink: impl FnMut(&str) + Send + 'static) -> Self {
        self.stdout = Some(Box::new(sink));
        self
    }

    /// Make `value` resolvable as `name` after globals and before builtins.
    pub fn set_hook(&mut self, name: impl Into<String>, value: Value) {
        self.hooks.insert(name.into(), value);
    }

    pub fn set_recursion_limit(&mut self, limit: usize) {
        self.recursion_limit = limit.max(1);
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    pub fn interrupt_handle(&self) -> &InterruptHandle {
        &self.interrupt
    }

    pub fn check_interrupt(&self) -> ExecResult<()> {
        if self.interrupt.is_interrupted() {
            Err(Unwind::Interrupt)
        } else {
            Ok(())
        }
    }

    pub fn write_stdout(&mut self, text: &str) {
        match &mut self.stdout {
            Some(sink) => sink(text),
            None => {
                let _ = std::io::stdout().lock().write_all(text.as_bytes());
            }
        }
    }

    /// Execute `program` with `globals` as its global namespace.
    pub fn run(&mut self, program: &Program, globals: &Namespace) -> ExecResult<()> {
        if self.frames.len() >= self.recursion_limit {
            return Err(recursion_error());
        }
        let ctx = Context {
            globals: globals.clone(),
            locals: None,
            class_body: false,
            unit: program.name.clone(),
        };
        self.frames.push(TraceFrame {
            unit: program.name.clone(),
            function: Arc::from("<module>"),
            line: program.body.first().map_or(1, |stmt| stmt.line),
        });
        let body = program.body.clone();
        let result = self.exec_body(&body, &ctx);
        self.frames.pop();
        result.map(|_| ())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn exec_body(&mut self, body: &[Stmt], ctx: &Context) -> ExecResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, ctx)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn set_line(&mut self, line: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt, ctx: &Context) -> ExecResult<Flow> {
        self.check_interrupt()?;
        self.set_line(stmt.line);
        ensure_sufficient_stack(|| self.exec_stmt_kind(stmt, ctx)).map_err(|unwind| match unwind {
            Unwind::Error(mut exc) if exc.traceback.is_empty() => {
                exc.traceback = self.frames.clone();
                Unwind::Error(exc)
            }
            other => other,
        })
    }

    fn exec_stmt_kind(&mut self, stmt: &Stmt, ctx: &Context) -> ExecResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, ctx)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, ctx)?;
                for target in targets {
                    self.assign(target, value.clone(), ctx)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, ctx)?,
            StmtKind::Print {
                dest,
                values,
                newline,
            } => self.print(dest.as_ref(), values, *newline, ctx)?,
            StmtKind::If { test, body, orelse } => {
                let test = self.eval(test, ctx)?;
                return if test.truthy() {
                    self.exec_body(body, ctx)
                } else {
                    self.exec_body(orelse, ctx)
                };
            }
            StmtKind::While { test, body, orelse } => loop {
                self.check_interrupt()?;
                self.set_line(stmt.line);
                if !self.eval(test, ctx)?.truthy() {
                    return self.exec_body(orelse, ctx);
                }
                match self.exec_body(body, ctx)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, ctx)?;
                let items = self.iterate(&iterable)?;
                let mut broke = false;
                for item in items {
                    self.check_interrupt()?;
                    self.set_line(stmt.line);
                    self.assign(target, item, ctx)?;
                    match self.exec_body(body, ctx)? {
                        Flow::Break => {
                            broke = true;
                            break;
                        }
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                if !broke {
                    return self.exec_body(orelse, ctx);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody, ctx),
            StmtKind::With {
                context,
                target,
                body,
            } => return self.exec_with(context, target.as_ref(), body, ctx),
            StmtKind::FunctionDef(def) => {
                let mut function = self.make_function(def, ctx)?;
                for decorator in def.decorators.iter().rev() {
                    let decorator = self.eval(decorator, ctx)?;
                    function = self.call(&decorator, Args::new(vec![function]))?;
                }
                self.store(&def.name, function, ctx);
            }
            StmtKind::ClassDef(class) => self.exec_class(class, ctx)?,
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, ctx)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Raise(value) => return Err(self.raise(value.as_ref(), ctx)?),
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.import(alias, ctx)?;
                }
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => self.import_from(module, names, *level, ctx)?,
            StmtKind::Global(_) => {}
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target, ctx)?;
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test, ctx)?.truthy() {
                    let message = match msg {
                        Some(msg) => {
                            let msg = self.eval(msg, ctx)?;
                            self.str(&msg)?
                        }
                        None => String::new(),
                    };
                    return Err(Unwind::new(ExceptionKind::AssertionError, message));
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn print(
        &mut self,
        dest: Option<&Expr>,
        values: &[Expr],
        newline: bool,
        ctx: &Context,
    ) -> ExecResult<()> {
        let dest = match dest {
            Some(expr) => Some(self.eval(expr, ctx)?),
            None => None,
        };
        let mut parts = Vec::with_capacity(values.len());
        for value in values {
            let value = self.eval(value, ctx)?;
            parts.push(self.str(&value)?);
        }
        let mut text = parts.join(" ");
        if newline {
            text.push('\n');
        } else if !text.is_empty() {
            text.push(' ');
        }
        match dest {
            Some(dest) if !dest.is_none() => {
                let write = self.get_attr(&dest, "write")?;
                self.call(&write, Args::new(vec![Value::from(text)]))?;
            }
            _ => self.write_stdout(&text),
        }
        Ok(())
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        ctx: &Context,
    ) -> ExecResult<Flow> {
        let outcome = match self.exec_body(body, ctx) {
            Ok(Flow::Normal) => self.exec_body(orelse, ctx),
            Ok(flow) => Ok(flow),
            Err(Unwind::Error(exc)) => self.handle_exception(*exc, handlers, ctx),
            Err(Unwind::Interrupt) => Err(Unwind::Interrupt),
        };
        if finalbody.is_empty() || matches!(outcome, Err(Unwind::Interrupt)) {
            return outcome;
        }
        match self.exec_body(finalbody, ctx)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle_exception(
        &mut self,
        exc: Exception,
        handlers: &[ExceptHandler],
        ctx: &Context,
    ) -> ExecResult<Flow> {
        for handler in handlers {
            let matches = match &handler.kind {
                None => true,
                Some(kind) => {
                    let kind = self.eval(kind, ctx)?;
                    exception_matches(exc.kind, &kind)?
                }
            };
            if !matches {
                continue;
            }
            if let Some(name) = &handler.name {
                let value = Value::Exception(Arc::new(ExceptionValue {
                    kind: exc.kind,
                    message: exc.message.clone(),
                }));
                self.store(name, value, ctx);
            }
            self.handling.push(exc);
            let result = self.exec_body(&handler.body, ctx);
            self.handling.pop();
            return result;
        }
        Err(Unwind::Error(Box::new(exc)))
    }

    fn exec_with(
        &mut self,
        context: &Expr,
        target: Option<&Expr>,
        body: &[Stmt],
        ctx: &Context,
    ) -> ExecResult<Flow> {
        let manager = self.eval(context, ctx)?;
        let enter = self
            .get_attr(&manager, "__enter__")
            .map_err(|_| attribute_error("__enter__"))?;
        let exit = self
            .get_attr(&manager, "__exit__")
            .map_err(|_| attribute_error("__exit__"))?;
        let entered = self.call(&enter, Args::default())?;
        if let Some(target) = target {
            self.assign(target, entered, ctx)?;
        }
        match self.exec_body(body, ctx) {
            Ok(flow) => {
                self.call(
                    &exit,
                    Args::new(vec![Value::None, Value::None, Value::None]),
                )?;
                Ok(flow)
            }
            Err(Unwind::Error(exc)) => {
                let value = Value::Exception(Arc::new(ExceptionValue {
                    kind: exc.kind,
                    message: exc.message.clone(),
                }));
                let suppress = self.call(
                    &exit,
                    Args::new(vec![Value::ExceptionType(exc.kind), value, Value::None]),
                )?;
                if suppress.truthy() {
                    Ok(Flow::Normal)
                } else {
                    Err(Unwind::Error(exc))
                }
            }
            Err(Unwind::Interrupt) => Err(Unwind::Interrupt),
        }
    }

    fn exec_class(&mut self, class: &ClassDef, ctx: &Context) -> ExecResult<()> {
        let mut bases = Vec::with_capacity(class.bases.len());
        for base in &class.bases {
            match self.eval(base, ctx)? {
                Value::Class(base) => bases.push(base),
                other => {
                    return Err(type_error(format!(
                        "class bases must be classes, not '{}'",
                        other.type_name()
                    )));
                }
            }
        }
        let env = Env::new(ctx.locals.clone());
        let body_ctx = Context {
            globals: ctx.globals.clone(),
            locals: Some(env.clone()),
            class_body: true,
            unit: ctx.unit.clone(),
        };
        self.exec_body(&class.body, &body_ctx)?;
        let mut attrs = env.take_vars();
        attrs
            .entry("__name__".to_string())
            .or_insert_with(|| Value::str(&class.name));
        let mut value = Value::Class(Arc::new(Class {
            name: Arc::from(class.name.as_str()),
            bases,
            attrs: RwLock::new(attrs),
        }));
        for decorator in class.decorators.iter().rev() {
            let decorator = self.eval(decorator, ctx)?;
            value = self.call(&decorator, Args::new(vec![value]))?;
        }
        self.store(&class.name, value, ctx);
        Ok(())
    }

    fn raise(&mut self, value: Option<&Expr>, ctx: &Context) -> ExecResult<Unwind> {
        let Some(expr) = value else {
            return Ok(match self.handling.last() {
                Some(exc) => Unwind::Error(Box::new(exc.clone())),
                None => Unwind::new(ExceptionKind::RuntimeError, "No active exception to reraise"),
            });
        };
        Ok(match self.eval(expr, ctx)? {
            Value::ExceptionType(kind) => Unwind::new(kind, ""),
            Value::Exception(exc) => Unwind::new(exc.kind, exc.message.clone()),
            other => type_error(format!(
                "exceptions must be derived from Exception, not {}",
                other.type_name()
            )),
        })
    }

    fn import(&mut self, alias: &Alias, ctx: &Context) -> ExecResult<()> {
        let registry = self.modules.clone();
        let leaf = registry.import(self, &alias.name)?;
        match &alias.asname {
            Some(asname) => self.store(asname, Value::Module(leaf), ctx),
            None => {
                let top = alias.name.split('.').next().unwrap_or(&alias.name);
                let module = registry.import(self, top)?;
                self.store(top, Value::Module(module), ctx);
            }
        }
        Ok(())
    }

    fn import_from(
        &mut self,
        module: &str,
        names: &[Alias],
        level: usize,
        ctx: &Context,
    ) -> ExecResult<()> {
        if level > 0 {
            return Err(Unwind::new(
                ExceptionKind::ImportError,
                "relative imports are not supported",
            ));
        }
        if module == "__future__" {
            return Ok(());
        }
        let registry = self.modules.clone();
        let source = registry.import(self, module)?;
        for alias in names {
            if alias.name == "*" {
                for (name, value) in source.namespace.entries() {
                    if !name.starts_with('_') {
                        self.store(&name, value, ctx);
                    }
                }
                continue;
            }
            let value = match source.namespace.get(&alias.name) {
                Some(value) => value,
                None => match registry.import(self, &format!("{module}.{}", alias.name)) {
                    Ok(submodule) => Value::Module(submodule),
                    Err(Unwind::Error(exc)) if exc.kind == ExceptionKind::ImportError => {
                        return Err(Unwind::new(
                            ExceptionKind::ImportError,
                            format!("cannot import name {}", alias.name),
                        ));
                    }
                    Err(other) => return Err(other),
                },
            };
            let name = alias.asname.as_deref().unwrap_or(&alias.name);
            self.store(name, value, ctx);
        }
        Ok(())
    }

    // =========================================================================
    // Names and targets
    // =========================================================================

    fn store(&self, name: &str, value: Value, ctx: &Context) {
        match &ctx.locals {
            Some(env) => env.set(name, value),
            None => ctx.globals.set(name, value),
        }
    }

    fn lookup(&self, name: &str, ctx: &Context) -> ExecResult<Value> {
        if let Some(value) = ctx.locals.as_ref().and_then(|env| env.lookup(name)) {
            return Ok(value);
        }
        if let Some(value) = ctx.globals.get(name) {
            return Ok(value);
        }
        if let Some(value) = self.hooks.get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name).ok_or_else(|| {
            Unwind::new(
                ExceptionKind::NameError,
                format!("name '{name}' is not defined"),
            )
        })
    }

    fn assign(&mut self, target: &Expr, value: Value, ctx: &Context) -> ExecResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.store(name, value, ctx);
                Ok(())
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let items = self.iterate(&value)?;
                if items.len() > targets.len() {
                    return Err(value_error("too many values to unpack"));
                }
                if items.len() < targets.len() {
                    return Err(value_error(format!(
                        "need more than {} value{} to unpack",
                        items.len(),
                        if items.len() == 1 { "" } else { "s" }
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, ctx)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object, ctx)?;
                self.set_attr(&object, attr, value)
            }
            ExprKind::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container, ctx)?;
                let index = self.eval_index(index, ctx)?;
                self.set_item(&container, index, value)
            }
            _ => Err(type_error("invalid assignment target")),
        }
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr, ctx: &Context) -> ExecResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.lookup(name, ctx)?;
                let rhs = self.eval(value, ctx)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.store(name, result, ctx);
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object, ctx)?;
                let current = self.get_attr(&object, attr)?;
                let rhs = self.eval(value, ctx)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.set_attr(&object, attr, result)?;
            }
            ExprKind::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container, ctx)?;
                let Index::Item(key) = self.eval_index(index, ctx)? else {
                    return Err(type_error("augmented assignment to a slice is not supported"));
                };
                let current = self.get_item(&container, Index::Item(key.clone()))?;
                let rhs = self.eval(value, ctx)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.set_item(&container, Index::Item(key), result)?;
            }
            _ => return Err(type_error("illegal expression for augmented assignment")),
        }
        Ok(())
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn inplace_op(&mut self, op: BinOp, current: Value, rhs: Value) -> ExecResult<Value> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let items = self.iterate(&rhs)?;
            list.write().extend(items);
            return Ok(current);
        }
        self.binary_op(op, &current, &rhs)
    }

    fn delete(&mut self, target: &Expr, ctx: &Context) -> ExecResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let removed = match &ctx.locals {
                    Some(env) => env.remove(name),
                    None => ctx.globals.remove(name),
                };
                removed.map(|_| ()).ok_or_else(|| {
                    Unwind::new(
                        ExceptionKind::NameError,
                        format!("name '{name}' is not defined"),
                    )
                })
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                for target in targets {
                    self.delete(target, ctx)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, ctx)?;
                self.del_attr(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.eval(value, ctx)?;
                let index = self.eval_index(index, ctx)?;
                if let Value::Instance(inst) = &container {
                    if let Some(method) = inst.class.lookup("__delitem__") {
                        self.call_bound(&container, method, vec![index_value(index)?])?;
                        return Ok(());
                    }
                }
                ops::del_item(&container, &index)
            }
            _ => Err(type_error("can't delete this expression")),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn eval(&mut self, expr: &Expr, ctx: &Context) -> ExecResult<Value> {
        ensure_sufficient_stack(|| self.eval_kind(expr, ctx))
    }

    fn eval_kind(&mut self, expr: &Expr, ctx: &Context) -> ExecResult<Value> {
        match &expr.kind {
            ExprKind::Name(name) => self.lookup(name, ctx),
            ExprKind::Int(n) => Ok(Value::Int(*n)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => Ok(Value::str(s)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::None => Ok(Value::None),
            ExprKind::List(items) => Ok(Value::list(self.eval_all(items, ctx)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(items, ctx)?)),
            ExprKind::Dict(entries) => {
                let dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key, ctx)?;
                    key.check_hashable()?;
                    let value = self.eval(value, ctx)?;
                    dict.insert(key, value);
                }
                Ok(Value::Dict(dict))
            }
            ExprKind::ListComp { elt, generators } => {
                let scope = Context {
                    globals: ctx.globals.clone(),
                    locals: Some(Env::new(ctx.locals.clone())),
                    class_body: false,
                    unit: ctx.unit.clone(),
                };
                let mut out = Vec::new();
                self.comprehension(elt, generators, &scope, &mut out)?;
                Ok(Value::list(out))
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, ctx)?;
                self.get_attr(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.eval(value, ctx)?;
                let index = self.eval_index(index, ctx)?;
                self.get_item(&container, index)
            }
            ExprKind::Slice { .. } => Err(type_error("slice is only valid as a subscript")),
            ExprKind::Call { func, args } => {
                let func = self.eval(func, ctx)?;
                let args = self.eval_args(args, ctx)?;
                self.call(&func, args)
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                self.binary_op(*op, &left, &right)
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval(operand, ctx)?;
                ops::unary(*op, &operand)
            }
            ExprKind::BoolOp { op, values } => {
                let mut result = Value::None;
                for value in values {
                    result = self.eval(value, ctx)?;
                    let done = match op {
                        BoolOp::And => !result.truthy(),
                        BoolOp::Or => result.truthy(),
                    };
                    if done {
                        break;
                    }
                }
                Ok(result)
            }
            ExprKind::Compare { left, ops } => {
                let mut left = self.eval(left, ctx)?;
                for (op, right) in ops {
                    let right = self.eval(right, ctx)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test, ctx)?.truthy() {
                    self.eval(body, ctx)
                } else {
                    self.eval(orelse, ctx)
                }
            }
            ExprKind::Lambda(def) => self.make_function(def, ctx),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], ctx: &Context) -> ExecResult<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr, ctx)).collect()
    }

    fn eval_args(&mut self, args: &[Arg], ctx: &Context) -> ExecResult<Args> {
        let mut out = Args::default();
        for arg in args {
            match arg {
                Arg::Positional(expr) => out.positional.push(self.eval(expr, ctx)?),
                Arg::Keyword(name, expr) => {
                    let value = self.eval(expr, ctx)?;
                    out.keywords.push((name.clone(), value));
                }
                Arg::Star(expr) => {
                    let value = self.eval(expr, ctx)?;
                    out.positional.extend(self.iterate(&value)?);
                }
                Arg::DoubleStar(expr) => match self.eval(expr, ctx)? {
                    Value::Dict(dict) => {
                        for (key, value) in dict.items() {
                            let Value::Str(key) = key else {
                                return Err(type_error("keywords must be strings"));
                            };
                            out.keywords.push((key.to_string(), value));
                        }
                    }
                    other => {
                        return Err(type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )));
                    }
                },
            }
        }
        Ok(out)
    }

    fn eval_index(&mut self, index: &Expr, ctx: &Context) -> ExecResult<Index> {
        let ExprKind::Slice { lower, upper, step } = &index.kind else {
            return Ok(Index::Item(self.eval(index, ctx)?));
        };
        let mut bound = |part: &Option<Box<Expr>>| -> ExecResult<Option<i64>> {
            match part {
                None => Ok(None),
                Some(expr) => match self.eval(expr, ctx)? {
                    Value::None => Ok(None),
                    value => value
                        .as_int()
                        .map(Some)
                        .ok_or_else(|| type_error("slice indices must be integers or None")),
                },
            }
        };
        let lower = bound(lower)?;
        let upper = bound(upper)?;
        let step = bound(step)?;
        Ok(Index::Slice(lower, upper, step))
    }

    fn comprehension(
        &mut self,
        elt: &Expr,
        generators: &[Comprehension],
        ctx: &Context,
        out: &mut Vec<Value>,
    ) -> ExecResult<()> {
        let Some((generator, rest)) = generators.split_first() else {
            out.push(self.eval(elt, ctx)?);
            return Ok(());
        };
        let iterable = self.eval(&generator.iter, ctx)?;
        'items: for item in self.iterate(&iterable)? {
            self.check_interrupt()?;
            self.assign(&generator.target, item, ctx)?;
            for cond in &generator.ifs {
                if !self.eval(cond, ctx)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(elt, rest, ctx, out)?;
        }
        Ok(())
    }

    fn make_function(&mut self, def: &Arc<FunctionDef>, ctx: &Context) -> ExecResult<Value> {
        let mut defaults = Vec::new();
        for param in &def.params.args {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default, ctx)?);
            }
        }
        let closure = if ctx.class_body {
            ctx.locals.as_ref().and_then(|env| env.parent.clone())
        } else {
            ctx.locals.clone()
        };
        Ok(Value::Function(Arc::new(Function {
            name: Arc::from(def.name.as_str()),
            def: def.clone(),
            defaults,
            globals: ctx.globals.clone(),
            closure,
            unit: ctx.unit.clone(),
        })))
    }

    // =========================================================================
    // Operators
    // =========================================================================

    pub(crate) fn binary_op(&mut self, op: BinOp, left: &Value, right: &Value) -> ExecResult<Value> {
        if let Value::Instance(inst) = left {
            if let Some(method) = inst.class.lookup(dunder(op)) {
                return self.call_bound(left, method, vec![right.clone()]);
            }
        }
        if let (BinOp::Mod, Value::Str(format)) = (op, left) {
            return ops::percent_format(self, format, right).map(Value::from);
        }
        ops::binary(&self.interrupt, op, left, right)
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> ExecResult<bool> {
        Ok(match op {
            CmpOp::Eq => self.equals(left, right)?,
            CmpOp::NotEq => !self.equals(left, right)?,
            CmpOp::Lt => ops::order(left, right)?.is_lt(),
            CmpOp::LtE => ops::order(left, right)?.is_le(),
            CmpOp::Gt => ops::order(left, right)?.is_gt(),
            CmpOp::GtE => ops::order(left, right)?.is_ge(),
            CmpOp::In => self.contains(right, left)?,
            CmpOp::NotIn => !self.contains(right, left)?,
            CmpOp::Is => left.is(right),
            CmpOp::IsNot => !left.is(right),
        })
    }

    pub(crate) fn equals(&mut self, left: &Value, right: &Value) -> ExecResult<bool> {
        if let Value::Instance(inst) = left {
            if let Some(method) = inst.class.lookup("__eq__") {
                return Ok(self.call_bound(left, method, vec![right.clone()])?.truthy());
            }
        }
        Ok(left.equals(right))
    }

    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> ExecResult<bool> {
        if let Value::Instance(inst) = container {
            if let Some(method) = inst.class.lookup("__contains__") {
                return Ok(self.call_bound(container, method, vec![item.clone()])?.truthy());
            }
        }
        ops::contains(container, item)
    }

    fn get_item(&mut self, container: &Value, index: Index) -> ExecResult<Value> {
        if let Value::Instance(inst) = container {
            if let Some(method) = inst.class.lookup("__getitem__") {
                return self.call_bound(container, method, vec![index_value(index)?]);
            }
        }
        ops::get_item(container, &index)
    }

    fn set_item(&mut self, container: &Value, index: Index, value: Value) -> ExecResult<()> {
        if let Value::Instance(inst) = container {
            if let Some(method) = inst.class.lookup("__setitem__") {
                self.call_bound(container, method, vec![index_value(index)?, value])?;
                return Ok(());
            }
        }
        let items = match (&index, container) {
            (Index::Slice(..), Value::List(_)) => Some(self.iterate(&value)?),
            _ => None,
        };
        ops::set_item(container, &index, value, items)
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    pub fn get_attr(&mut self, object: &Value, name: &str) -> ExecResult<Value> {
        let found = match object {
            Value::Instance(inst) => {
                let own = inst.attrs.read().get(name).cloned();
                match own {
                    Some(value) => Some(value),
                    None if name == "__class__" => Some(Value::Class(inst.class.clone())),
                    None => inst.class.lookup(name).map(|value| bind(object, value)),
                }
            }
            Value::Class(class) => class.lookup(name),
            Value::Module(module) => module.namespace.get(name),
            Value::Exception(exc) => match name {
                "message" => Some(Value::str(&exc.message)),
                "args" if exc.message.is_empty() => Some(Value::tuple(Vec::new())),
                "args" => Some(Value::tuple(vec![Value::str(&exc.message)])),
                _ => None,
            },
            Value::Function(func) if name == "__name__" => Some(Value::Str(func.name.clone())),
            Value::Builtin(builtin) if name == "__name__" => Some(Value::Str(builtin.name.clone())),
            Value::Host(host) => host.get_attr(name).or_else(|| {
                host.has_method(name).then(|| {
                    Value::Method(Arc::new(BoundMethod {
                        receiver: object.clone(),
                        target: MethodTarget::Host(Arc::from(name)),
                    }))
                })
            }),
            Value::List(_) | Value::Dict(_) | Value::Str(_) => builtins::method_name(object, name)
                .map(|method| {
                    Value::Method(Arc::new(BoundMethod {
                        receiver: object.clone(),
                        target: MethodTarget::Builtin(method),
                    }))
                }),
            _ => None,
        };
        found.ok_or_else(|| match object {
            Value::Instance(inst) => attribute_error(format!(
                "{} instance has no attribute '{name}'",
                inst.class.name
            )),
            Value::Class(class) => {
                attribute_error(format!("class {} has no attribute '{name}'", class.name))
            }
            other => attribute_error(format!(
                "'{}' object has no attribute '{name}'",
                other.type_name()
            )),
        })
    }

    pub fn set_attr(&mut self, object: &Value, name: &str, value: Value) -> ExecResult<()> {
        match object {
            Value::Instance(inst) => {
                inst.attrs.write().insert(name.to_string(), value);
            }
            Value::Class(class) => {
                class.attrs.write().insert(name.to_string(), value);
            }
            Value::Module(module) => module.namespace.set(name, value),
            other => {
                return Err(attribute_error(format!(
                    "'{}' object has no attribute '{name}'",
                    other.type_name()
                )));
            }
        }
        Ok(())
    }

    fn del_attr(&mut self, object: &Value, name: &str) -> ExecResult<()> {
        let removed = match object {
            Value::Instance(inst) => inst.attrs.write().remove(name),
            Value::Class(class) => class.attrs.write().remove(name),
            Value::Module(module) => module.namespace.remove(name),
            _ => None,
        };
        removed
            .map(|_| ())
            .ok_or_else(|| attribute_error(name.to_string()))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Call any callable value.
    pub fn call(&mut self, func: &Value, args: Args) -> ExecResult<Value> {
        self.check_interrupt()?;
        ensure_sufficient_stack(|| self.call_value(func, args))
    }

    fn call_value(&mut self, func: &Value, args: Args) -> ExecResult<Value> {
        match func {
            Value::Function(function) => self.call_function(function, args),
            Value::Builtin(builtin) => (builtin.func)(self, args),
            Value::Method(method) => match &method.target {
                MethodTarget::Function(function) => {
                    let mut args = args;
                    args.positional.insert(0, method.receiver.clone());
                    self.call_function(function, args)
                }
                MethodTarget::Builtin(name) => {
                    builtins::call_method(self, &method.receiver, name, args)
                }
                MethodTarget::Host(name) => match &method.receiver {
                    Value::Host(host) => host.call_method(self, name, args),
                    other => Err(type_error(format!(
                        "'{}' object is not a host object",
                        other.type_name()
                    ))),
                },
            },
            Value::Class(class) => self.instantiate(class, args),
            Value::ExceptionType(kind) => {
                args.no_keywords(kind.name())?;
                let message = match args.positional.len() {
                    0 => String::new(),
                    1 => self.str(&args.positional[0])?,
                    _ => self.repr(&Value::tuple(args.positional))?,
                };
                Ok(Value::Exception(Arc::new(ExceptionValue {
                    kind: *kind,
                    message,
                })))
            }
            Value::Instance(inst) => match inst.class.lookup("__call__") {
                Some(method) => self.call_bound(func, method, args.positional),
                None => Err(type_error(format!(
                    "{} instance has no __call__ method",
                    inst.class.name
                ))),
            },
            other => Err(type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    /// Call a class attribute as a method of `receiver`.
    fn call_bound(&mut self, receiver: &Value, method: Value, args: Vec<Value>) -> ExecResult<Value> {
        let bound = bind(receiver, method);
        self.call(&bound, Args::new(args))
    }

    fn instantiate(&mut self, class: &Arc<Class>, args: Args) -> ExecResult<Value> {
        let instance = Value::Instance(Arc::new(Instance::new(class.clone())));
        match class.lookup("__init__") {
            Some(init) => {
                let init = bind(&instance, init);
                let result = self.call(&init, args)?;
                if !result.is_none() {
                    return Err(type_error("__init__() should return None"));
                }
            }
            None if !args.positional.is_empty() || !args.keywords.is_empty() => {
                return Err(type_error("this constructor takes no arguments"));
            }
            None => {}
        }
        Ok(instance)
    }

    fn call_function(&mut self, function: &Arc<Function>, args: Args) -> ExecResult<Value> {
        if self.frames.len() >= self.recursion_limit {
            return Err(recursion_error());
        }
        let env = Env::new(function.closure.clone());
        bind_params(function, &env, args)?;
        self.frames.push(TraceFrame {
            unit: function.unit.clone(),
            function: function.name.clone(),
            line: function.def.line,
        });
        let ctx = Context {
            globals: function.globals.clone(),
            locals: Some(env),
            class_body: false,
            unit: function.unit.clone(),
        };
        let def = function.def.clone();
        let result = self.exec_body(&def.body, &ctx);
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Materialize an iterable into its elements.
    pub fn iterate(&mut self, value: &Value) -> ExecResult<Vec<Value>> {
        match value {
            Value::List(list) => Ok(list.snapshot()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            Value::Dict(dict) => Ok(dict.keys()),
            Value::Instance(inst) => match inst.class.lookup("__iter__") {
                Some(method) => {
                    let iterable = self.call_bound(value, method, Vec::new())?;
                    self.iterate(&iterable)
                }
                None => Err(not_iterable(value)),
            },
            other => Err(not_iterable(other)),
        }
    }

    /// `repr()`, honouring `__repr__` on instances.
    pub fn repr(&mut self, value: &Value) -> ExecResult<String> {
        let mut seen = Vec::new();
        self.repr_inner(value, &mut seen)
    }

    fn repr_inner(&mut self, value: &Value, seen: &mut Vec<usize>) -> ExecResult<String> {
        match value {
            Value::Instance(inst) => match inst.class.lookup("__repr__") {
                Some(method) => match self.call_bound(value, method, Vec::new())? {
                    Value::Str(s) => Ok(s.to_string()),
                    other => Err(type_error(format!(
                        "__repr__ returned non-string (type {})",
                        other.type_name()
                    ))),
                },
                None => Ok(value.repr()),
            },
            Value::List(list) => {
                let id = list.id();
                if seen.contains(&id) {
                    return Ok("[...]".into());
                }
                seen.push(id);
                let mut parts = Vec::new();
                for item in list.snapshot() {
                    parts.push(self.repr_inner(&item, seen)?);
                }
                seen.pop();
                Ok(format!("[{}]", parts.join(", ")))
            }
            Value::Tuple(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items.iter() {
                    parts.push(self.repr_inner(item, seen)?);
                }
                Ok(if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                })
            }
            Value::Dict(dict) => {
                let id = dict.id();
                if seen.contains(&id) {
                    return Ok("{...}".into());
                }
                seen.push(id);
                let mut parts = Vec::new();
                for (key, item) in dict.items() {
                    let key = self.repr_inner(&key, seen)?;
                    let item = self.repr_inner(&item, seen)?;
                    parts.push(format!("{key}: {item}"));
                }
                seen.pop();
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            other => Ok(other.repr()),
        }
    }

    /// `str()`, honouring `__str__` and `__repr__` on instances.
    pub fn str(&mut self, value: &Value) -> ExecResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Exception(exc) => Ok(exc.message.clone()),
            Value::Instance(inst) => match inst.class.lookup("__str__") {
                Some(method) => match self.call_bound(value, method, Vec::new())? {
                    Value::Str(s) => Ok(s.to_string()),
                    other => Err(type_error(format!(
                        "__str__ returned non-string (type {})",
                        other.type_name()
                    ))),
                },
                None => self.repr(value),
            },
            other => self.repr(other),
        }
    }
}

fn recursion_error() -> Unwind {
    Unwind::new(
        ExceptionKind::RecursionError,
        "maximum recursion depth exceeded",
    )
}

fn not_iterable(value: &Value) -> Unwind {
    type_error(format!("'{}' object is not iterable", value.type_name()))
}

/// Bind functions found on a class to `receiver`.
fn bind(receiver: &Value, value: Value) -> Value {
    match value {
        Value::Function(function) => Value::Method(Arc::new(BoundMethod {
            receiver: receiver.clone(),
            target: MethodTarget::Function(function),
        })),
        other => other,
    }
}

fn index_value(index: Index) -> ExecResult<Value> {
    match index {
        Index::Item(value) => Ok(value),
        Index::Slice(..) => Err(type_error("slicing is not supported on instances")),
    }
}

fn dunder(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "__add__",
        BinOp::Sub => "__sub__",
        BinOp::Mul => "__mul__",
        BinOp::Div => "__div__",
        BinOp::TrueDiv => "__truediv__",
        BinOp::FloorDiv => "__floordiv__",
        BinOp::Mod => "__mod__",
        BinOp::Pow => "__pow__",
        BinOp::LShift => "__lshift__",
        BinOp::RShift => "__rshift__",
        BinOp::BitAnd => "__and__",
        BinOp::BitOr => "__or__",
        BinOp::BitXor => "__xor__",
    }
}

fn exception_matches(kind: ExceptionKind, handler: &Value) -> ExecResult<bool> {
    match handler {
        Value::ExceptionType(expected) => Ok(kind.is_subclass_of(*expected)),
        Value::Tuple(options) => {
            for option in options.iter() {
                if exception_matches(kind, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(type_error(format!(
            "catching '{}' that does not inherit from Exception is not allowed",
            other.type_name()
        ))),
    }
}

fn bind_params(function: &Function, env: &Env, args: Args) -> ExecResult<()> {
    let params = &function.def.params;
    let name = &function.name;
    let given = args.positional.len() + args.keywords.len();
    let mut positional = args.positional.into_iter();
    let mut slots: Vec<Option<Value>> = params.args.iter().map(|_| positional.next()).collect();
    let extra: Vec<Value> = positional.collect();
    let required = params.args.iter().filter(|p| p.default.is_none()).count();
    let arity = |qualifier: &str, count: usize| {
        type_error(format!(
            "{name}() takes {qualifier} {count} argument{} ({given} given)",
            if count == 1 { "" } else { "s" }
        ))
    };
    if !extra.is_empty() && params.vararg.is_none() {
        let qualifier = if required == params.args.len() {
            "exactly"
        } else {
            "at most"
        };
        return Err(arity(qualifier, params.args.len()));
    }
    let kwargs = Dict::new();
    for (key, value) in args.keywords {
        match params.args.iter().position(|p| p.name == key) {
            Some(index) if slots[index].is_some() => {
                return Err(type_error(format!(
                    "{name}() got multiple values for keyword argument '{key}'"
                )));
            }
            Some(index) => slots[index] = Some(value),
            None if params.kwarg.is_some() => kwargs.insert(Value::from(key), value),
            None => {
                return Err(type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            }
        }
    }
    let mut defaults = function.defaults.iter();
    for (param, slot) in params.args.iter().zip(slots) {
        let default = if param.default.is_some() {
            defaults.next()
        } else {
            None
        };
        let value = match (slot, default) {
            (Some(value), _) => value,
            (None, Some(default)) => default.clone(),
            (None, None) => {
                let qualifier = if required == params.args.len() && params.vararg.is_none() {
                    "exactly"
                } else {
                    "at least"
                };
                return Err(arity(qualifier, required));
            }
        };
        env.set(&param.name, value);
    }
    if let Some(vararg) = &params.vararg {
        env.set(vararg, Value::tuple(extra));
    }
    if let Some(kwarg) = &params.kwarg {
        env.set(kwarg, Value::Dict(kwargs));
    }
    Ok(())
}
