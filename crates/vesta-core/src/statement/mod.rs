//! Statement compilation and execution.
//!
//! A [`Statement`] wraps the source of one statement chunk. It compiles
//! against the features of its parent, and executes against a shallow copy
//! of its parent's result scope (or of the worksheet's root scope), so that
//! running it never disturbs the scope its parent captured.
//!
//! ```text
//!   New ──compile──► CompileSuccess ──begin_execute──► Executing
//!    │                    ▲                               │
//!    └──► CompileError    └──────mark_for_execute─────────┤
//!                                                         ├─► ExecuteSuccess
//!                                                         ├─► ExecuteError
//!                                                         └─► Interrupted
//! ```
//!
//! Execution is split in three so the executor can run a statement without
//! holding its lock: [`Statement::begin_execute`] snapshots what is needed
//! into an [`Execution`], [`Execution::run`] does the work, and
//! [`Statement::finish_execute`] records the outcome.

mod hooks;
mod traceback;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};
use vesta_lang::{
    Exception, ExceptionKind, FeatureSet, InterruptHandle, Interpreter, ModuleRegistry, Namespace,
    Program, Unwind, Value,
};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::rewrite::{ImportSet, Mutation, Rewriter, Rewritten};

use hooks::{Capture, SharedCapture};

/// A statement shared between the host and the executor's worker.
pub type StatementRef = Arc<Mutex<Statement>>;

static NEXT_UNIT: AtomicUsize = AtomicUsize::new(0);

/// What every statement of a worksheet shares: configuration, the
/// rewriter, the module registry and the root scope.
#[derive(Clone)]
pub struct Environment {
    config: Arc<EngineConfig>,
    rewriter: Arc<Rewriter>,
    modules: Arc<ModuleRegistry>,
    root_scope: Namespace,
}

impl Environment {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_modules(config, Arc::new(ModuleRegistry::new()))
    }

    pub fn with_modules(config: EngineConfig, modules: Arc<ModuleRegistry>) -> Self {
        Self {
            rewriter: Arc::new(Rewriter::new(&config)),
            config: Arc::new(config),
            modules,
            root_scope: Namespace::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    /// Scope the first statement of a worksheet starts from. Statements
    /// copy it; they never write to it.
    pub fn root_scope(&self) -> &Namespace {
        &self.root_scope
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("root_scope", &self.root_scope)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementState {
    New,
    CompileSuccess,
    CompileError,
    Executing,
    ExecuteSuccess,
    ExecuteError,
    Interrupted,
}

impl StatementState {
    /// Whether the statement holds a compiled program.
    pub fn is_compiled(self) -> bool {
        !matches!(self, StatementState::New | StatementState::CompileError)
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            StatementState::CompileError
                | StatementState::ExecuteError
                | StatementState::Interrupted
        )
    }
}

impl fmt::Display for StatementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementState::New => "new",
            StatementState::CompileSuccess => "compiled",
            StatementState::CompileError => "compile error",
            StatementState::Executing => "executing",
            StatementState::ExecuteSuccess => "executed",
            StatementState::ExecuteError => "execute error",
            StatementState::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// One displayable result entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultItem {
    /// `repr` of a value passed to the output hook.
    Value(String),
    /// One line written to stdout.
    Output(String),
    /// A non-fatal problem, such as a value that could not be copied.
    Warning(String),
}

impl ResultItem {
    pub fn text(&self) -> &str {
        match self {
            ResultItem::Value(text) | ResultItem::Output(text) | ResultItem::Warning(text) => text,
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, ResultItem::Warning(_))
    }
}

impl fmt::Display for ResultItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Why a statement failed to compile or execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementError {
    /// The error message; a formatted traceback for execution errors.
    pub message: String,
    /// 1-based line within the statement.
    pub line: Option<u32>,
    /// 1-based column, for syntax errors.
    pub column: Option<u32>,
}

/// The compiled form of one statement chunk and its last execution.
pub struct Statement {
    text: String,
    unit: String,
    env: Environment,
    state: StatementState,
    parent: Option<StatementRef>,
    compiled: Option<Rewritten>,
    /// Inherited features the current compilation used.
    compiled_with: Option<FeatureSet>,
    result_scope: Option<Namespace>,
    results: Option<Vec<ResultItem>>,
    error: Option<StatementError>,
}

impl Statement {
    pub fn new(text: impl Into<String>, env: Environment) -> Self {
        let unit = format!("<statement{}>", NEXT_UNIT.fetch_add(1, Ordering::Relaxed));
        Self {
            text: text.into(),
            unit,
            env,
            state: StatementState::New,
            parent: None,
            compiled: None,
            compiled_with: None,
            result_scope: None,
            results: None,
            error: None,
        }
    }

    /// A new statement wrapped for sharing.
    pub fn new_ref(text: impl Into<String>, env: Environment) -> StatementRef {
        Arc::new(Mutex::new(Self::new(text, env)))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Unit name the statement's program runs as.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    pub fn parent(&self) -> Option<&StatementRef> {
        self.parent.as_ref()
    }

    /// Set the statement whose result scope this one starts from.
    ///
    /// Takes effect on the next `compile`/execution; recompiles only if the
    /// new parent's features differ.
    pub fn set_parent(&mut self, parent: Option<StatementRef>) {
        self.parent = parent;
    }

    /// Features for statements that follow this one. `None` until compiled.
    pub fn features(&self) -> Option<&FeatureSet> {
        self.compiled.as_ref().map(|c| &c.features)
    }

    pub fn imports(&self) -> Option<&ImportSet> {
        self.compiled.as_ref().map(|c| &c.imports)
    }

    /// Paths copied before each execution.
    pub fn mutations(&self) -> &[Mutation] {
        self.compiled.as_ref().map_or(&[], |c| c.mutations.as_slice())
    }

    /// Scope after the last successful execution.
    pub fn result_scope(&self) -> Option<&Namespace> {
        self.result_scope.as_ref()
    }

    /// Results of the last successful execution.
    pub fn results(&self) -> Option<&[ResultItem]> {
        self.results.as_deref()
    }

    pub fn error(&self) -> Option<&StatementError> {
        self.error.as_ref()
    }

    /// Compile the statement if needed. Returns whether it is compiled.
    pub fn compile(&mut self) -> bool {
        let inherited = match &self.parent {
            Some(parent) => parent.lock().features().cloned().unwrap_or_default(),
            None => FeatureSet::new(),
        };
        if self.compiled_with.as_ref() == Some(&inherited) && self.state != StatementState::New {
            return self.state != StatementState::CompileError;
        }

        self.error = None;
        self.result_scope = None;
        self.results = None;
        let outcome = self.env.rewriter.rewrite(&self.text, &self.unit, &inherited);
        self.compiled_with = Some(inherited);
        match outcome {
            Ok(rewritten) => {
                debug!("Compiled {} ({} mutation(s))", self.unit, rewritten.mutations.len());
                self.compiled = Some(rewritten);
                self.state = StatementState::CompileSuccess;
                true
            }
            Err(e) => {
                debug!("Failed to compile {}: {}", self.unit, e);
                self.error = Some(StatementError {
                    message: e.message(),
                    line: e.line(),
                    column: e.column(),
                });
                self.compiled = None;
                self.state = StatementState::CompileError;
                false
            }
        }
    }

    /// Mark a compiled statement as needing execution again, keeping its
    /// program.
    pub fn mark_for_execute(&mut self) {
        if self.state.is_compiled() {
            self.state = StatementState::CompileSuccess;
        }
    }

    /// Enter `Executing` and snapshot what the run needs.
    pub fn begin_execute(&mut self, interrupt: InterruptHandle) -> Result<Execution> {
        let Some(compiled) = self.compiled.as_ref().filter(|_| self.state.is_compiled()) else {
            return Err(Error::InvalidState(format!(
                "{} cannot execute in state '{}'",
                self.unit, self.state
            )));
        };
        let scope = match &self.parent {
            Some(parent) => match parent.lock().result_scope() {
                Some(scope) => scope.shallow_copy(),
                None => {
                    return Err(Error::InvalidState(format!(
                        "the parent of {} has no result scope",
                        self.unit
                    )));
                }
            },
            None => self.env.root_scope.shallow_copy(),
        };

        self.state = StatementState::Executing;
        self.error = None;
        self.results = None;
        self.result_scope = None;
        trace!("Executing {}", self.unit);
        Ok(Execution {
            unit: self.unit.clone(),
            program: compiled.program.clone(),
            mutations: compiled.mutations.clone(),
            scope,
            env: self.env.clone(),
            interrupt,
        })
    }

    /// Record the outcome of an execution started by `begin_execute`.
    pub fn finish_execute(&mut self, finished: Finished) {
        if self.state != StatementState::Executing {
            debug!("Ignoring outcome for {} in state '{}'", self.unit, self.state);
            return;
        }
        match finished.outcome {
            Outcome::Success => {
                self.state = StatementState::ExecuteSuccess;
                self.result_scope = Some(finished.scope);
                self.results = Some(finished.results);
            }
            Outcome::Error(exc) => {
                let formatted = traceback::format(
                    &exc,
                    &self.unit,
                    &self.text,
                    &self.env.config.traceback,
                );
                self.error = Some(StatementError {
                    message: formatted.message,
                    line: formatted.line,
                    column: None,
                });
                self.state = StatementState::ExecuteError;
            }
            Outcome::Interrupted => {
                self.state = StatementState::Interrupted;
            }
        }
        debug!("{} finished: {}", self.unit, self.state);
    }

    /// Execute synchronously. Returns whether execution succeeded.
    pub fn execute(&mut self) -> Result<bool> {
        let execution = self.begin_execute(InterruptHandle::new())?;
        let finished = execution.run();
        self.finish_execute(finished);
        Ok(self.state == StatementState::ExecuteSuccess)
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("unit", &self.unit)
            .field("state", &self.state)
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

/// A statement execution in progress, detached from the statement lock.
pub struct Execution {
    unit: String,
    program: Program,
    mutations: Vec<Mutation>,
    scope: Namespace,
    env: Environment,
    interrupt: InterruptHandle,
}

/// How an execution ended.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Error(Box<Exception>),
    Interrupted,
}

/// The result of [`Execution::run`], handed to [`Statement::finish_execute`].
#[derive(Debug)]
pub struct Finished {
    outcome: Outcome,
    scope: Namespace,
    results: Vec<ResultItem>,
}

impl Finished {
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }
}

impl Execution {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Copy mutated values, then run the program. Never panics; a panic in
    /// the interpreter is reported as an execution error.
    pub fn run(self) -> Finished {
        let capture: SharedCapture = Arc::new(Mutex::new(Capture::default()));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_guarded(&capture)))
            .unwrap_or_else(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Outcome::Error(Box::new(Exception::new(
                    ExceptionKind::RuntimeError,
                    format!("internal error: {reason}"),
                )))
            });
        let results = capture.lock().finish();
        Finished {
            outcome,
            scope: self.scope,
            results,
        }
    }

    fn run_guarded(&self, capture: &SharedCapture) -> Outcome {
        let config = &self.env.config;
        let sink = capture.clone();
        let mut interp = Interpreter::new(self.env.modules.clone(), self.interrupt.clone())
            .with_stdout(move |text| sink.lock().write(text));
        interp.set_recursion_limit(config.recursion_limit);
        hooks::install(&mut interp, &config.hooks, &self.scope, capture);

        for mutation in &self.mutations {
            match self.scope.get(&mutation.root) {
                None | Some(Value::Module(_)) => continue,
                Some(_) => {}
            }
            let copied = match &mutation.copy {
                Some(copy) => interp.run(copy, &self.scope),
                None => Err(Unwind::new(ExceptionKind::TypeError, "no copy procedure")),
            };
            match copied {
                Ok(()) => {}
                Err(Unwind::Interrupt) => return Outcome::Interrupted,
                Err(Unwind::Error(_)) => {
                    capture.lock().push(ResultItem::Warning(format!(
                        "'{}' apparently modified, but can't copy it",
                        mutation.description
                    )));
                }
            }
        }

        match interp.run(&self.program, &self.scope) {
            Ok(()) => Outcome::Success,
            Err(Unwind::Interrupt) => Outcome::Interrupted,
            Err(Unwind::Error(exc)) => Outcome::Error(exc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(statement: &Statement) -> Vec<String> {
        statement
            .results()
            .unwrap_or_default()
            .iter()
            .map(|r| r.text().to_string())
            .collect()
    }

    fn run(text: &str, parent: Option<&StatementRef>, env: &Environment) -> StatementRef {
        let statement = Statement::new_ref(text, env.clone());
        {
            let mut s = statement.lock();
            s.set_parent(parent.cloned());
            assert!(s.compile(), "{text:?}: {:?}", s.error());
            s.execute().unwrap();
        }
        statement
    }

    #[test]
    fn test_unit_names_are_unique() {
        let env = Environment::default();
        let a = Statement::new("1", env.clone());
        let b = Statement::new("1", env);
        assert_ne!(a.unit(), b.unit());
        assert!(a.unit().starts_with("<statement"));
    }

    #[test]
    fn test_compile_error_fields() {
        let mut statement = Statement::new("a = (", Environment::default());
        assert!(!statement.compile());
        assert_eq!(statement.state(), StatementState::CompileError);
        let error = statement.error().unwrap();
        assert_eq!(error.line, Some(1));
        // Stable until the text changes.
        assert!(!statement.compile());
    }

    #[test]
    fn test_execute_requires_compile() {
        let mut statement = Statement::new("1", Environment::default());
        assert!(matches!(statement.execute(), Err(Error::InvalidState(_))));
        assert_eq!(statement.state(), StatementState::New);
    }

    #[test]
    fn test_output_and_underscore() {
        let env = Environment::default();
        let s = run("a = 3\na", None, &env);
        assert_eq!(texts(&s.lock()), ["3"]);
        let scope = s.lock().result_scope().cloned().unwrap();
        assert_eq!(scope.get("_").unwrap().repr(), "3");
    }

    #[test]
    fn test_none_is_not_shown() {
        let env = Environment::default();
        let s = run("None", None, &env);
        assert!(texts(&s.lock()).is_empty());
    }

    #[test]
    fn test_print_is_captured() {
        let env = Environment::default();
        let s = run("print 'a', 1\nprint 'b'", None, &env);
        assert_eq!(
            s.lock().results().unwrap(),
            [ResultItem::Output("a 1".into()), ResultItem::Output("b".into())]
        );
    }

    #[test]
    fn test_unterminated_stdout_is_flushed() {
        let env = Environment::default();
        let s = run("import sys\nsys.stdout.write('partial')", None, &env);
        assert_eq!(texts(&s.lock()), ["partial"]);
    }

    #[test]
    fn test_root_scope_is_not_written() {
        let env = Environment::default();
        run("x = 1", None, &env);
        assert!(!env.root_scope().contains("x"));
    }

    #[test]
    fn test_mark_for_execute_keeps_program() {
        let env = Environment::default();
        let s = run("1", None, &env);
        let mut s = s.lock();
        s.mark_for_execute();
        assert_eq!(s.state(), StatementState::CompileSuccess);
        assert!(s.compile());
        assert!(s.execute().unwrap());
    }

    #[test]
    fn test_execute_error_discards_results() {
        let env = Environment::default();
        let statement = Statement::new_ref("print 'x'\n1/0", env);
        let mut s = statement.lock();
        assert!(s.compile());
        assert!(!s.execute().unwrap());
        assert_eq!(s.state(), StatementState::ExecuteError);
        assert!(s.results().is_none());
        assert!(s.result_scope().is_none());
        let error = s.error().unwrap();
        assert_eq!(error.line, Some(2));
        assert_eq!(
            error.message,
            "ZeroDivisionError: integer division or modulo by zero"
        );
    }

    #[test]
    fn test_features_are_inherited() {
        let env = Environment::default();
        let first = run("from __future__ import division", None, &env);
        assert!(first.lock().features().unwrap().contains("division"));
        let second = run("1/2", Some(&first), &env);
        assert_eq!(texts(&second.lock()), ["0.5"]);
    }

    #[test]
    fn test_parent_feature_change_recompiles() {
        let env = Environment::default();
        let plain = run("x = 1", None, &env);
        let future = run("from __future__ import division", None, &env);
        let child = run("1/2", Some(&plain), &env);
        assert_eq!(texts(&child.lock()), ["0"]);

        let mut c = child.lock();
        c.set_parent(Some(future.clone()));
        assert!(c.compile());
        assert!(c.execute().unwrap());
        assert_eq!(texts(&c), ["0.5"]);
    }
}
