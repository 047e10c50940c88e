//! Integration tests for background batch execution.
//!
//! Tests notification ordering, interruption and compile failures of
//! `ThreadExecutor` batches driven from an `IdleQueue` host loop.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use vesta_core::{
    EngineConfig, Environment, Error, EventLoop, ExecutorCallback, IdleQueue, Statement,
    StatementRef, StatementState, ThreadExecutor,
};

// =============================================================================
// Test Helpers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Executing(usize),
    Complete(usize),
    Done,
}

/// Records notifications by statement index.
struct Recorder {
    statements: Vec<StatementRef>,
    events: RefCell<Vec<Event>>,
}

impl Recorder {
    fn new(statements: &[StatementRef]) -> Self {
        Self {
            statements: statements.to_vec(),
            events: RefCell::new(Vec::new()),
        }
    }

    fn index(&self, statement: &StatementRef) -> usize {
        self.statements
            .iter()
            .position(|s| Arc::ptr_eq(s, statement))
            .expect("unknown statement")
    }

    fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    fn saw(&self, event: Event) -> bool {
        self.events.borrow().contains(&event)
    }
}

impl ExecutorCallback for Recorder {
    fn on_statement_executing(&self, statement: &StatementRef) {
        let index = self.index(statement);
        self.events.borrow_mut().push(Event::Executing(index));
    }

    fn on_statement_complete(&self, statement: &StatementRef) {
        let index = self.index(statement);
        self.events.borrow_mut().push(Event::Complete(index));
    }

    fn on_complete(&self) {
        self.events.borrow_mut().push(Event::Done);
    }
}

struct Batch {
    executor: ThreadExecutor,
    queue: Arc<IdleQueue>,
    statements: Vec<StatementRef>,
    recorder: Recorder,
}

impl Batch {
    fn new(sources: &[&str], parent: Option<StatementRef>, env: &Environment) -> Self {
        let queue = Arc::new(IdleQueue::new());
        let event_loop: Arc<dyn EventLoop> = queue.clone();
        let mut executor = ThreadExecutor::new(parent, event_loop, env.config());
        let statements: Vec<StatementRef> = sources
            .iter()
            .map(|source| Statement::new_ref(*source, env.clone()))
            .collect();
        for statement in &statements {
            executor.add_statement(statement.clone());
        }
        let recorder = Recorder::new(&statements);
        Self {
            executor,
            queue,
            statements,
            recorder,
        }
    }

    fn compile(&mut self) -> bool {
        self.executor.compile(&self.recorder)
    }

    /// Dispatch until `until` holds or the batch completes.
    fn drive_until(&mut self, until: impl Fn(&Recorder) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if self.executor.dispatch(&self.recorder) || until(&self.recorder) {
                return;
            }
            assert!(Instant::now() < deadline, "batch did not progress");
            self.queue.wait_timeout(Duration::from_millis(50));
        }
    }

    fn finish(&mut self) {
        self.drive_until(|_| false);
    }

    fn state(&self, index: usize) -> StatementState {
        self.statements[index].lock().state()
    }

    fn texts(&self, index: usize) -> Vec<String> {
        self.statements[index]
            .lock()
            .results()
            .unwrap_or_default()
            .iter()
            .map(|r| r.text().to_string())
            .collect()
    }
}

/// No statement is reported executing after it was reported complete, and
/// the batch completion is the single last event.
fn check_ordering(events: &[Event]) {
    for (i, event) in events.iter().enumerate() {
        if let Event::Complete(index) = event {
            assert!(
                !events[i..].contains(&Event::Executing(*index)),
                "statement {index} executing after complete: {events:?}"
            );
        }
    }
    assert_eq!(events.iter().filter(|e| **e == Event::Done).count(), 1);
    assert_eq!(events.last(), Some(&Event::Done));
}

fn completions(events: &[Event]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Complete(index) => Some(*index),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Execution
// =============================================================================

#[test]
fn test_batch_runs_in_order() {
    let env = Environment::default();
    let mut batch = Batch::new(&["a = 1", "b = a + 1", "a + b"], None, &env);
    assert!(batch.compile());
    batch.executor.execute().unwrap();
    batch.finish();

    let events = batch.recorder.events();
    check_ordering(&events);
    assert_eq!(completions(&events), [0, 1, 2]);
    for index in 0..3 {
        assert_eq!(batch.state(index), StatementState::ExecuteSuccess);
    }
    assert_eq!(batch.texts(2), ["3"]);
    assert!(batch.executor.is_complete());
}

#[test]
fn test_compile_chains_parents() {
    let env = Environment::default();
    let mut batch = Batch::new(&["x = 1", "x"], None, &env);
    assert!(batch.compile());
    let second = batch.statements[1].lock();
    assert!(Arc::ptr_eq(second.parent().unwrap(), &batch.statements[0]));
}

#[test]
fn test_initial_parent_scope() {
    let env = Environment::default();
    let parent = Statement::new_ref("base = 40", env.clone());
    {
        let mut p = parent.lock();
        assert!(p.compile());
        assert!(p.execute().unwrap());
    }
    let mut batch = Batch::new(&["base + 2"], Some(parent), &env);
    assert!(batch.compile());
    batch.executor.execute().unwrap();
    batch.finish();
    assert_eq!(batch.texts(0), ["42"]);
}

#[test]
fn test_execute_twice_is_rejected() {
    let env = Environment::default();
    let mut batch = Batch::new(&["1"], None, &env);
    assert!(batch.compile());
    batch.executor.execute().unwrap();
    assert!(matches!(batch.executor.execute(), Err(Error::InvalidState(_))));
    batch.finish();
}

#[test]
fn test_error_halts_batch() {
    let env = Environment::default();
    let mut batch = Batch::new(&["x = 1", "1/0", "x"], None, &env);
    assert!(batch.compile());
    batch.executor.execute().unwrap();
    batch.finish();

    let events = batch.recorder.events();
    check_ordering(&events);
    assert_eq!(completions(&events), [0, 1, 2]);
    assert_eq!(batch.state(0), StatementState::ExecuteSuccess);
    assert_eq!(batch.state(1), StatementState::ExecuteError);
    assert_eq!(batch.state(2), StatementState::CompileSuccess);
    assert!(batch.statements[2].lock().results().is_none());
}

#[test]
fn test_worker_settings_come_from_config() {
    let mut config = EngineConfig::default();
    config.worker_thread_name = "sheet-runner".to_string();
    config.worker_stack_size = 8 * 1024 * 1024;
    let env = Environment::new(config);
    let mut batch = Batch::new(&["def f(n):\n    return n and f(n - 1)\nf(50)"], None, &env);
    assert!(batch.compile());
    batch.executor.execute().unwrap();
    batch.finish();
    assert_eq!(batch.texts(0), ["0"]);
}

// =============================================================================
// Compile failures
// =============================================================================

#[test]
fn test_compile_failure_short_circuits() {
    let env = Environment::default();
    let mut batch = Batch::new(&["a = 1", "b = (", "c = 3"], None, &env);
    assert!(!batch.compile());

    // Everything was reported before compile returned.
    assert_eq!(
        batch.recorder.events(),
        [
            Event::Complete(0),
            Event::Complete(1),
            Event::Complete(2),
            Event::Done
        ]
    );
    assert!(batch.executor.is_complete());
    assert_eq!(batch.state(0), StatementState::CompileSuccess);
    assert_eq!(batch.state(1), StatementState::CompileError);
    for statement in &batch.statements {
        assert!(statement.lock().results().is_none());
    }

    assert!(batch.executor.execute().is_err());
    assert!(batch.executor.dispatch(&batch.recorder));
    assert_eq!(batch.recorder.events().len(), 4);
}

// =============================================================================
// Interruption
// =============================================================================

#[test]
fn test_interrupt_ordering() {
    let env = Environment::default();
    let mut batch = Batch::new(&["while True:\n    pass", "x = 1"], None, &env);
    assert!(batch.compile());
    batch.executor.execute().unwrap();

    batch.drive_until(|recorder| recorder.saw(Event::Executing(0)));
    assert!(!batch.executor.is_complete());
    batch.executor.interrupt();
    batch.finish();

    let events = batch.recorder.events();
    check_ordering(&events);
    assert!(!events.contains(&Event::Executing(1)));
    assert_eq!(batch.state(0), StatementState::Interrupted);
    assert_eq!(batch.state(1), StatementState::CompileSuccess);
}

#[test]
fn test_interrupt_wakes_sleep() {
    let env = Environment::default();
    let mut batch = Batch::new(&["import time\ntime.sleep(60)"], None, &env);
    assert!(batch.compile());
    let started = Instant::now();
    batch.executor.execute().unwrap();

    batch.drive_until(|recorder| recorder.saw(Event::Executing(0)));
    batch.executor.interrupt();
    // A second request is ignored.
    batch.executor.interrupt();
    batch.finish();

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(batch.state(0), StatementState::Interrupted);
}

#[test]
fn test_interrupt_after_completion_is_ignored() {
    let env = Environment::default();
    let mut batch = Batch::new(&["1"], None, &env);
    assert!(batch.compile());
    batch.executor.execute().unwrap();
    batch.finish();
    batch.executor.interrupt();
    assert_eq!(batch.state(0), StatementState::ExecuteSuccess);
    assert!(batch.executor.dispatch(&batch.recorder));
    check_ordering(&batch.recorder.events());
}
