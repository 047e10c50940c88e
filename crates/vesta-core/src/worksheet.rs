//! The worksheet: segmented text, per-chunk statements and invalidation.
//!
//! Edits go through the [`Segmenter`]; its chunk events drive invalidation.
//! A changed statement chunk loses its statement, and every statement chunk
//! after it is marked for execution by a downstream sweep that stops at the
//! first chunk already marked (everything after that one was marked when it
//! was). [`Worksheet::calculate`] turns the marked suffix into a batch for a
//! [`ThreadExecutor`].

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info};
use vesta_lang::Namespace;

use crate::completion::{self, Completion, ObjectAt};
use crate::error::{Error, Result};
use crate::executor::{EventLoop, ExecutorCallback, ThreadExecutor};
use crate::segment::{Chunk, ChunkEvent, ChunkId, ChunkKind, Segmenter};
use crate::statement::{
    Environment, ResultItem, Statement, StatementError, StatementRef, StatementState,
};

/// Overall execution state of a worksheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorksheetState {
    /// Every statement has run successfully.
    ExecuteSuccess,
    /// Some statements need to run.
    NeedsExecute,
    /// A batch is running.
    Executing,
    /// The last batch stopped at an error or an interrupt.
    Error,
}

impl fmt::Display for WorksheetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorksheetState::ExecuteSuccess => "execute-success",
            WorksheetState::NeedsExecute => "needs-execute",
            WorksheetState::Executing => "executing",
            WorksheetState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Notifications for whoever renders the worksheet.
///
/// Called on the host thread once the worksheet's own state is updated, so
/// implementations may query `worksheet` freely.
pub trait WorksheetListener {
    fn chunk_inserted(&self, _worksheet: &Worksheet, _chunk: &Chunk) {}

    /// `lines` are the changed offsets within the chunk.
    fn chunk_changed(&self, _worksheet: &Worksheet, _chunk: &Chunk, _lines: &[usize]) {}

    fn chunk_deleted(&self, _worksheet: &Worksheet, _id: ChunkId, _kind: ChunkKind) {}

    /// The needs-execute, executing or error status of a statement chunk
    /// flipped.
    fn chunk_status_changed(&self, _worksheet: &Worksheet, _chunk: &Chunk) {}

    fn chunk_results_changed(&self, _worksheet: &Worksheet, _chunk: &Chunk) {}

    fn state_changed(&self, _worksheet: &Worksheet, _state: WorksheetState) {}
}

/// Execution bookkeeping for one statement chunk.
#[derive(Debug, Default)]
struct StatementSlot {
    needs_compile: bool,
    needs_execute: bool,
    executing: bool,
    statement: Option<StatementRef>,
    status_changed: bool,
    results_changed: bool,
}

impl StatementSlot {
    fn fresh() -> Self {
        Self {
            needs_compile: true,
            needs_execute: true,
            ..Self::default()
        }
    }

    fn is_marked(&self) -> bool {
        self.needs_compile || self.needs_execute
    }
}

/// Status of a statement chunk, as shown next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkStatus {
    pub needs_execute: bool,
    pub executing: bool,
    /// State of the chunk's statement, if it has one.
    pub state: Option<StatementState>,
    pub error: Option<StatementError>,
    pub results: Option<Vec<ResultItem>>,
}

/// Chunk notification waiting for delivery.
enum Notice {
    Deleted(ChunkId, ChunkKind),
    Inserted(ChunkId),
    Changed(ChunkId, Vec<usize>),
}

/// Executor progress, recorded during a dispatch and applied after it.
enum Progress {
    Executing(StatementRef),
    Complete(StatementRef),
    Finished,
}

#[derive(Default)]
struct Recorder(RefCell<Vec<Progress>>);

impl ExecutorCallback for Recorder {
    fn on_statement_executing(&self, statement: &StatementRef) {
        self.0.borrow_mut().push(Progress::Executing(statement.clone()));
    }

    fn on_statement_complete(&self, statement: &StatementRef) {
        self.0.borrow_mut().push(Progress::Complete(statement.clone()));
    }

    fn on_complete(&self) {
        self.0.borrow_mut().push(Progress::Finished);
    }
}

/// A running batch and what the worksheet needs to apply its progress.
struct Batch {
    executor: ThreadExecutor,
    chunks: Vec<(StatementRef, ChunkId)>,
    error: bool,
    more_statements: bool,
}

/// An editable worksheet.
pub struct Worksheet {
    env: Environment,
    segmenter: Segmenter,
    slots: FxHashMap<ChunkId, StatementSlot>,
    state: WorksheetState,
    event_loop: Arc<dyn EventLoop>,
    batch: Option<Batch>,
    listeners: Vec<Box<dyn WorksheetListener>>,
}

impl Worksheet {
    /// An empty worksheet whose batches report through `event_loop`.
    pub fn new(env: Environment, event_loop: Arc<dyn EventLoop>) -> Self {
        Self {
            env,
            segmenter: Segmenter::new(),
            slots: FxHashMap::default(),
            state: WorksheetState::ExecuteSuccess,
            event_loop,
            batch: None,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn WorksheetListener>) {
        self.listeners.push(listener);
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn state(&self) -> WorksheetState {
        self.state
    }

    pub fn is_executing(&self) -> bool {
        self.batch.is_some()
    }

    // =========================================================================
    // Text
    // =========================================================================

    pub fn line_count(&self) -> usize {
        self.segmenter.line_count()
    }

    pub fn line(&self, line: usize) -> Option<&str> {
        self.segmenter.line(line)
    }

    pub fn text(&self) -> String {
        self.segmenter.text()
    }

    pub fn text_range(
        &self,
        start_line: usize,
        start_offset: usize,
        end_line: usize,
        end_offset: usize,
    ) -> Result<String> {
        self.segmenter
            .text_range(start_line, start_offset, end_line, end_offset)
    }

    pub fn chunk_at(&self, line: usize) -> Option<&Chunk> {
        self.segmenter.chunk_at(line)
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.segmenter.chunk(id)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.segmenter.chunks()
    }

    /// The statement currently attached to a statement chunk.
    pub fn statement(&self, id: ChunkId) -> Option<StatementRef> {
        self.slots.get(&id).and_then(|slot| slot.statement.clone())
    }

    pub fn chunk_status(&self, id: ChunkId) -> Option<ChunkStatus> {
        let slot = self.slots.get(&id)?;
        let statement = slot.statement.as_ref().map(|s| s.lock());
        Some(ChunkStatus {
            needs_execute: slot.needs_execute,
            executing: slot.executing,
            state: statement.as_ref().map(|s| s.state()),
            error: statement.as_ref().and_then(|s| s.error().cloned()),
            results: statement
                .as_ref()
                .and_then(|s| s.results().map(<[ResultItem]>::to_vec)),
        })
    }

    // =========================================================================
    // Editing
    // =========================================================================

    pub fn begin_user_action(&mut self) {
        self.segmenter.begin_user_action();
    }

    pub fn end_user_action(&mut self) -> Result<()> {
        let events = self.segmenter.end_user_action()?;
        self.apply_events(events);
        Ok(())
    }

    pub fn in_user_action(&self) -> bool {
        self.segmenter.in_user_action()
    }

    /// Bring chunks up to date in the middle of a user action. Events are
    /// still delivered when the action ends.
    pub fn rescan(&mut self) -> Result<()> {
        self.segmenter.rescan()
    }

    pub fn insert(&mut self, line: usize, offset: usize, text: &str) -> Result<()> {
        self.check_editable()?;
        let events = self.segmenter.insert(line, offset, text)?;
        self.apply_events(events);
        Ok(())
    }

    pub fn delete_range(
        &mut self,
        start_line: usize,
        start_offset: usize,
        end_line: usize,
        end_offset: usize,
    ) -> Result<()> {
        self.check_editable()?;
        let events = self
            .segmenter
            .delete_range(start_line, start_offset, end_line, end_offset)?;
        self.apply_events(events);
        Ok(())
    }

    /// Delete all text.
    pub fn clear(&mut self) -> Result<()> {
        self.check_editable()?;
        let events = self.segmenter.clear()?;
        self.apply_events(events);
        Ok(())
    }

    fn check_editable(&self) -> Result<()> {
        if self.batch.is_some() {
            Err(Error::Executing)
        } else {
            Ok(())
        }
    }

    fn apply_events(&mut self, events: Vec<ChunkEvent>) {
        if events.is_empty() {
            return;
        }
        let mut sweeps = Vec::new();
        let mut deleted_sweeps = Vec::new();
        let mut notices = Vec::with_capacity(events.len());

        for event in events {
            match event {
                ChunkEvent::Deleted { id, kind, line } => {
                    if self.slots.remove(&id).is_some() || kind == ChunkKind::Statement {
                        deleted_sweeps.push(line);
                    }
                    notices.push(Notice::Deleted(id, kind));
                }
                ChunkEvent::Inserted { id } => {
                    if let Some(end) = self.reset_statement_chunk(id) {
                        sweeps.push(end);
                    }
                    notices.push(Notice::Inserted(id));
                }
                ChunkEvent::Changed { id, lines } => {
                    if let Some(end) = self.reset_statement_chunk(id) {
                        sweeps.push(end);
                    }
                    notices.push(Notice::Changed(id, lines));
                }
            }
        }

        let invalidated = !sweeps.is_empty() || !deleted_sweeps.is_empty();
        for line in sweeps.into_iter().chain(deleted_sweeps) {
            self.mark_rest_for_execute(line);
        }

        self.emit_chunk_notices(notices);
        if invalidated {
            self.set_state(WorksheetState::NeedsExecute);
        }
        self.emit_status_changes();
    }

    /// Drop the statement of a statement chunk whose text changed. Returns
    /// the chunk's end line, where the downstream sweep starts.
    fn reset_statement_chunk(&mut self, id: ChunkId) -> Option<usize> {
        let chunk = self.segmenter.chunk(id).filter(|c| c.is_statement())?;
        let slot = self.slots.entry(id).or_default();
        let had_results = slot
            .statement
            .as_ref()
            .is_some_and(|s| s.lock().results().is_some());
        *slot = StatementSlot {
            status_changed: true,
            results_changed: had_results,
            ..StatementSlot::fresh()
        };
        Some(chunk.end())
    }

    fn mark_rest_for_execute(&mut self, start_line: usize) {
        for chunk in self.segmenter.chunks_from(start_line) {
            if !chunk.is_statement() {
                continue;
            }
            let slot = self
                .slots
                .entry(chunk.id())
                .or_insert_with(StatementSlot::fresh);
            if slot.is_marked() {
                break;
            }
            slot.needs_execute = true;
            slot.status_changed = true;
            if let Some(statement) = &slot.statement {
                statement.lock().mark_for_execute();
            }
        }
    }

    // =========================================================================
    // Modules
    // =========================================================================

    /// Mark statements for execution after `module` changed, starting with
    /// the first statement that imports it.
    pub fn module_changed(&mut self, module: &str) -> Result<()> {
        self.check_editable()?;
        let first = self.segmenter.chunks().find(|chunk| {
            self.slots
                .get(&chunk.id())
                .and_then(|slot| slot.statement.as_ref())
                .is_some_and(|statement| {
                    statement
                        .lock()
                        .imports()
                        .is_some_and(|imports| imports.module_is_referenced(module))
                })
        });
        if let Some(start) = first.map(Chunk::start) {
            debug!("Module {} changed, invalidating from line {}", module, start);
            self.mark_rest_for_execute(start);
            self.set_state(WorksheetState::NeedsExecute);
            self.emit_status_changes();
        }
        Ok(())
    }

    /// Drop the cached copy of `module` and re-run whatever imports it.
    pub fn reset_module(&mut self, module: &str) -> Result<()> {
        self.check_editable()?;
        if self.env.modules().reset(module) {
            info!("Reset module {}", module);
        }
        self.module_changed(module)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Start executing every statement that needs it, up to (not including)
    /// the statement chunks starting at or after `end_line`. Returns whether
    /// a batch was started; progress arrives through [`dispatch`](Self::dispatch).
    pub fn calculate(&mut self, end_line: Option<usize>) -> Result<bool> {
        self.check_editable()?;
        let end_line = end_line.unwrap_or(usize::MAX);
        debug!("Calculating up to line {}", end_line);

        let mut parent: Option<StatementRef> = None;
        let mut executor: Option<ThreadExecutor> = None;
        let mut batch_chunks = Vec::new();

        for chunk in self.segmenter.chunks() {
            if !chunk.is_statement() || chunk.start() >= end_line {
                continue;
            }
            let slot = self
                .slots
                .entry(chunk.id())
                .or_insert_with(StatementSlot::fresh);
            if slot.is_marked() && executor.is_none() {
                executor = Some(ThreadExecutor::new(
                    parent.clone(),
                    self.event_loop.clone(),
                    self.env.config(),
                ));
            }
            if let Some(executor) = executor.as_mut() {
                let reusable = slot.statement.clone().filter(|_| !slot.needs_compile);
                let statement = match reusable {
                    Some(statement) => {
                        statement.lock().mark_for_execute();
                        statement
                    }
                    None => {
                        let statement = Statement::new_ref(chunk.text(), self.env.clone());
                        slot.statement = Some(statement.clone());
                        statement
                    }
                };
                executor.add_statement(statement.clone());
                batch_chunks.push((statement, chunk.id()));
            }
            parent = slot.statement.clone();
        }

        let more_statements = self
            .segmenter
            .chunks()
            .any(|chunk| chunk.is_statement() && chunk.start() >= end_line);

        let Some(mut executor) = executor else {
            if !more_statements {
                self.set_state(WorksheetState::ExecuteSuccess);
            }
            return Ok(false);
        };

        let recorder = Recorder::default();
        let compiled = executor.compile(&recorder);
        self.batch = Some(Batch {
            executor,
            chunks: batch_chunks,
            error: false,
            more_statements,
        });
        self.set_state(WorksheetState::Executing);
        if compiled {
            let started = match self.batch.as_mut() {
                Some(batch) => batch.executor.execute(),
                None => Ok(()),
            };
            if let Err(e) = started {
                self.batch = None;
                self.set_state(WorksheetState::Error);
                return Err(e);
            }
        }
        self.apply_progress(recorder);
        Ok(true)
    }

    /// Deliver executor progress. Call when the event loop asks for a
    /// dispatch. Returns `true` when no batch is running any more.
    pub fn dispatch(&mut self) -> bool {
        let Some(batch) = self.batch.as_mut() else {
            return true;
        };
        let recorder = Recorder::default();
        batch.executor.dispatch(&recorder);
        self.apply_progress(recorder);
        self.batch.is_none()
    }

    /// Interrupt the running batch, if any.
    pub fn interrupt(&self) {
        if let Some(batch) = &self.batch {
            batch.executor.interrupt();
        }
    }

    fn apply_progress(&mut self, recorder: Recorder) {
        for progress in recorder.0.into_inner() {
            match progress {
                Progress::Executing(statement) => {
                    if let Some(slot) = self.batch_slot(&statement) {
                        slot.executing = true;
                        slot.status_changed = true;
                    }
                }
                Progress::Complete(statement) => {
                    let state = statement.lock().state();
                    if state.is_error() {
                        if let Some(batch) = self.batch.as_mut() {
                            batch.error = true;
                        }
                    }
                    if let Some(slot) = self.batch_slot(&statement) {
                        slot.executing = false;
                        slot.needs_compile = state == StatementState::New;
                        slot.needs_execute = state != StatementState::ExecuteSuccess;
                        slot.status_changed = true;
                        slot.results_changed = true;
                    }
                }
                Progress::Finished => {
                    if let Some(batch) = self.batch.take() {
                        let state = if batch.error {
                            WorksheetState::Error
                        } else if batch.more_statements {
                            WorksheetState::NeedsExecute
                        } else {
                            WorksheetState::ExecuteSuccess
                        };
                        self.set_state(state);
                    }
                }
            }
        }
        self.emit_status_changes();
    }

    fn batch_slot(&mut self, statement: &StatementRef) -> Option<&mut StatementSlot> {
        let batch = self.batch.as_ref()?;
        let id = batch
            .chunks
            .iter()
            .find(|(s, _)| Arc::ptr_eq(s, statement))
            .map(|(_, id)| *id)?;
        self.slots.get_mut(&id)
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Names that complete the identifier ending at `(line, offset)`.
    ///
    /// Names resolve against the newest result scope at or before the
    /// line's chunk, even one whose statement is waiting to run again.
    pub fn find_completions(&self, line: usize, offset: usize) -> Result<Vec<Completion>> {
        let text = self.position_line(line, offset)?;
        if self.chunk_at(line).is_some_and(|c| c.kind() == ChunkKind::Comment) {
            return Ok(Vec::new());
        }
        let scope = self.completion_scope(line);
        Ok(completion::complete(&scope, text, offset))
    }

    /// The value named by the identifier under the character at
    /// `(line, offset)`, if it resolves without running code.
    pub fn object_at(&self, line: usize, offset: usize) -> Result<Option<ObjectAt>> {
        let text = self.position_line(line, offset)?;
        if !self.chunk_at(line).is_some_and(Chunk::is_statement) {
            return Ok(None);
        }
        let scope = self.completion_scope(line);
        Ok(completion::object_at(&scope, text, offset).map(|(value, start, end)| ObjectAt {
            value,
            line,
            start,
            end,
        }))
    }

    fn position_line(&self, line: usize, offset: usize) -> Result<&str> {
        self.line(line)
            .filter(|text| offset <= text.chars().count())
            .ok_or(Error::InvalidPosition { line, offset })
    }

    fn completion_scope(&self, line: usize) -> Namespace {
        let candidates: Vec<ChunkId> = self
            .chunks()
            .take_while(|chunk| chunk.start() <= line)
            .filter(|chunk| chunk.is_statement())
            .map(Chunk::id)
            .collect();
        candidates
            .iter()
            .rev()
            .find_map(|id| {
                let statement = self.statement(*id)?;
                let scope = statement.lock().result_scope().cloned();
                scope
            })
            .unwrap_or_else(|| self.env.root_scope().clone())
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// The lines `start_line..=end_line` as a doctest: statement lines get
    /// `>>> ` or `... ` prefixes and are followed by their textual results.
    pub fn doctests(&self, start_line: usize, end_line: usize) -> String {
        let last = self.segmenter.line_count() - 1;
        let mut text = String::new();
        for chunk in self.segmenter.chunks_from(start_line) {
            if chunk.start() > end_line {
                break;
            }
            let lines = &self.segmenter.lines()[chunk.start()..chunk.end()];
            for (i, line) in (chunk.start()..).zip(lines) {
                if chunk.is_statement() {
                    text.push_str(if i == chunk.start() { ">>> " } else { "... " });
                }
                text.push_str(line);
                if i != last || !line.is_empty() {
                    text.push('\n');
                }
            }
            let Some(statement) = self.statement(chunk.id()) else {
                continue;
            };
            let statement = statement.lock();
            for result in statement.results().unwrap_or_default() {
                if !result.is_warning() {
                    text.push_str(result.text());
                    text.push('\n');
                }
            }
        }
        text
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    fn set_state(&mut self, state: WorksheetState) {
        if self.state == state {
            return;
        }
        debug!("Worksheet state {} -> {}", self.state, state);
        self.state = state;
        for listener in &self.listeners {
            listener.state_changed(self, state);
        }
    }

    fn emit_chunk_notices(&mut self, notices: Vec<Notice>) {
        for notice in &notices {
            match notice {
                Notice::Inserted(id) | Notice::Changed(id, _) => {
                    // Inserting or changing a chunk implies a status change.
                    if let Some(slot) = self.slots.get_mut(id) {
                        slot.status_changed = false;
                    }
                }
                Notice::Deleted(..) => {}
            }
        }
        for notice in &notices {
            for listener in &self.listeners {
                match notice {
                    Notice::Deleted(id, kind) => listener.chunk_deleted(self, *id, *kind),
                    Notice::Inserted(id) => {
                        if let Some(chunk) = self.segmenter.chunk(*id) {
                            listener.chunk_inserted(self, chunk);
                        }
                    }
                    Notice::Changed(id, lines) => {
                        if let Some(chunk) = self.segmenter.chunk(*id) {
                            listener.chunk_changed(self, chunk, lines);
                        }
                    }
                }
            }
        }
    }

    fn emit_status_changes(&mut self) {
        let mut status = Vec::new();
        let mut results = Vec::new();
        for chunk in self.segmenter.chunks() {
            let Some(slot) = self.slots.get_mut(&chunk.id()) else {
                continue;
            };
            if std::mem::take(&mut slot.status_changed) {
                status.push(chunk.id());
            }
            if std::mem::take(&mut slot.results_changed) {
                results.push(chunk.id());
            }
        }
        for listener in &self.listeners {
            for id in &status {
                if let Some(chunk) = self.segmenter.chunk(*id) {
                    listener.chunk_status_changed(self, chunk);
                }
            }
            for id in &results {
                if let Some(chunk) = self.segmenter.chunk(*id) {
                    listener.chunk_results_changed(self, chunk);
                }
            }
        }
    }
}

impl fmt::Debug for Worksheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worksheet")
            .field("state", &self.state)
            .field("lines", &self.segmenter.line_count())
            .field("executing", &self.batch.is_some())
            .finish_non_exhaustive()
    }
}
