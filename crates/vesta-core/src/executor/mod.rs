//! Background execution of statement batches.
//!
//! A [`ThreadExecutor`] runs an ordered batch of compiled statements on one
//! worker thread, created per batch. The worker never calls back into the
//! host directly: it records progress under a lock and asks the host's
//! [`EventLoop`] for a dispatch, and the host then calls
//! [`ThreadExecutor::dispatch`] on its own thread to deliver notifications.
//!
//! ```text
//!   host thread                          worker thread
//!   ───────────                          ─────────────
//!   compile()
//!   execute() ──────── spawn ──────────► for each statement:
//!                                          begin_execute   (locks)
//!                                          run             (no locks)
//!   dispatch() ◄──── queue_dispatch ─────  finish_execute  (locks)
//!     on_statement_executing               stop unless ExecuteSuccess
//!     on_statement_complete ...          complete = true
//!     on_complete           ◄──── queue_dispatch
//! ```

mod event_loop;

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use vesta_lang::InterruptHandle;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::statement::{StatementRef, StatementState};

pub use event_loop::{EventLoop, IdleQueue};

/// Receives batch progress on the host thread.
pub trait ExecutorCallback {
    /// A statement is about to execute, or is executing.
    fn on_statement_executing(&self, _statement: &StatementRef) {}

    /// The executor is done with a statement. Statements after a failure
    /// are reported complete without having run.
    fn on_statement_complete(&self, _statement: &StatementRef) {}

    /// The batch is done. Always the last notification.
    fn on_complete(&self) {}
}

/// Progress shared between the worker and the host.
#[derive(Debug, Default)]
struct Progress {
    /// Index of the statement the worker most recently began.
    started: Option<usize>,
    /// Number of statements the worker is done with.
    completed: usize,
    complete: bool,
    interrupted: bool,
    launched: bool,
}

/// Runs a batch of statements on a background thread.
pub struct ThreadExecutor {
    parent: Option<StatementRef>,
    statements: Vec<StatementRef>,
    progress: Arc<Mutex<Progress>>,
    event_loop: Arc<dyn EventLoop>,
    interrupt: InterruptHandle,
    thread_name: String,
    stack_size: usize,
    /// Host side: completions delivered so far.
    signalled_complete: usize,
    /// Host side: last statement reported as executing.
    signalled_executing: Option<usize>,
    signalled_done: bool,
}

impl ThreadExecutor {
    /// An empty batch whose first statement starts from `parent`'s result
    /// scope, or from the root scope when there is none.
    pub fn new(
        parent: Option<StatementRef>,
        event_loop: Arc<dyn EventLoop>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            parent,
            statements: Vec::new(),
            progress: Arc::new(Mutex::new(Progress::default())),
            event_loop,
            interrupt: InterruptHandle::new(),
            thread_name: config.worker_thread_name.clone(),
            stack_size: config.worker_stack_size,
            signalled_complete: 0,
            signalled_executing: None,
            signalled_done: false,
        }
    }

    pub fn add_statement(&mut self, statement: StatementRef) {
        self.statements.push(statement);
    }

    pub fn statements(&self) -> &[StatementRef] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Whether the worker has finished the batch.
    pub fn is_complete(&self) -> bool {
        self.progress.lock().complete
    }

    /// Chain each statement to its predecessor and compile the batch.
    ///
    /// If any statement fails to compile nothing will run: every statement
    /// is reported complete and then the batch, before this returns.
    pub fn compile(&mut self, callback: &dyn ExecutorCallback) -> bool {
        let mut parent = self.parent.clone();
        let mut success = true;
        for statement in &self.statements {
            let mut locked = statement.lock();
            locked.set_parent(parent.take());
            if !locked.compile() {
                success = false;
            }
            parent = Some(statement.clone());
        }
        if !success {
            info!("Batch of {} failed to compile", self.statements.len());
            {
                let mut progress = self.progress.lock();
                progress.complete = true;
                progress.completed = self.statements.len();
            }
            self.dispatch(callback);
        }
        success
    }

    /// Start the worker thread.
    pub fn execute(&mut self) -> Result<()> {
        {
            let mut progress = self.progress.lock();
            if progress.launched || progress.complete {
                return Err(Error::InvalidState(
                    "executor batch already started".to_string(),
                ));
            }
            progress.launched = true;
        }
        let worker = Worker {
            statements: self.statements.clone(),
            progress: self.progress.clone(),
            event_loop: self.event_loop.clone(),
            interrupt: self.interrupt.clone(),
        };
        info!("Executing batch of {} statement(s)", self.statements.len());
        thread::Builder::new()
            .name(self.thread_name.clone())
            .stack_size(self.stack_size)
            .spawn(move || worker.run())
            .map_err(|e| {
                self.progress.lock().launched = false;
                Error::Spawn(e)
            })?;
        Ok(())
    }

    /// Ask the running statement to stop, once. Has no effect when the
    /// batch is complete or was already interrupted.
    pub fn interrupt(&self) {
        let mut progress = self.progress.lock();
        if progress.complete || progress.interrupted {
            return;
        }
        progress.interrupted = true;
        warn!("Interrupting batch");
        self.interrupt.interrupt();
    }

    /// Deliver pending notifications. Call on the host thread after the
    /// event loop was asked for a dispatch. Returns `true` once the batch
    /// is complete.
    pub fn dispatch(&mut self, callback: &dyn ExecutorCallback) -> bool {
        let (started, completed, complete) = {
            let progress = self.progress.lock();
            (progress.started, progress.completed, progress.complete)
        };

        for statement in &self.statements[self.signalled_complete..completed] {
            callback.on_statement_complete(statement);
        }
        self.signalled_complete = self.signalled_complete.max(completed);

        if complete {
            if !self.signalled_done {
                self.signalled_done = true;
                callback.on_complete();
            }
            return true;
        }

        if let Some(index) = started.filter(|&i| i >= self.signalled_complete) {
            if self.signalled_executing.is_none_or(|last| last < index) {
                self.signalled_executing = Some(index);
                callback.on_statement_executing(&self.statements[index]);
            }
        }
        false
    }
}

/// What the worker thread owns.
struct Worker {
    statements: Vec<StatementRef>,
    progress: Arc<Mutex<Progress>>,
    event_loop: Arc<dyn EventLoop>,
    interrupt: InterruptHandle,
}

impl Worker {
    fn run(self) {
        for (index, statement) in self.statements.iter().enumerate() {
            let execution = {
                let mut progress = self.progress.lock();
                let begun = statement.lock().begin_execute(self.interrupt.clone());
                match begun {
                    Ok(execution) => {
                        progress.started = Some(index);
                        self.event_loop.queue_dispatch();
                        execution
                    }
                    Err(e) => {
                        warn!("Cannot execute statement {}: {}", index, e);
                        break;
                    }
                }
            };

            debug!("Running {}", execution.unit());
            let finished = execution.run();

            let state = {
                let mut progress = self.progress.lock();
                let mut locked = statement.lock();
                locked.finish_execute(finished);
                progress.completed = index + 1;
                self.event_loop.queue_dispatch();
                locked.state()
            };
            if state != StatementState::ExecuteSuccess {
                break;
            }
        }

        let mut progress = self.progress.lock();
        progress.complete = true;
        progress.completed = self.statements.len();
        self.event_loop.queue_dispatch();
        info!("Batch complete");
    }
}
