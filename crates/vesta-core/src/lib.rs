//! Vesta Core - incremental worksheet engine.
//!
//! This crate provides:
//! - Segmentation of worksheet text into blank, comment and statement chunks
//! - Rewriting of statements for output capture and copy-before-mutate
//! - The per-statement compile/execute lifecycle
//! - Invalidation of downstream statements after edits or module changes
//! - Interruptible background execution of statement batches
//!
//! # Architecture
//!
//! ```text
//! insert / delete_range
//!        │
//!        ▼
//!   Segmenter ──ChunkEvent──► Worksheet ──(sweep)──► statement slots
//!                                │
//!                           calculate()
//!                                │
//!                                ▼
//!   Rewriter ◄── Statement ◄── ThreadExecutor ──queue_dispatch──► EventLoop
//!                                                                   │
//!   Worksheet::dispatch ◄───────────────────────────────────────────┘
//! ```

pub mod completion;
pub mod config;
pub mod error;
pub mod executor;
pub mod rewrite;
pub mod segment;
pub mod statement;
pub mod worksheet;

pub use completion::{Completion, ObjectAt};
pub use config::{EngineConfig, HookNames, MutationPolicy, TracebackPolicy};
pub use error::{Error, Result};
pub use executor::{EventLoop, ExecutorCallback, IdleQueue, ThreadExecutor};
pub use rewrite::{ImportSet, Mutation, RewriteError, Rewriter, Rewritten};
pub use segment::{Chunk, ChunkEvent, ChunkId, ChunkKind, Segmenter};
pub use statement::{
    Environment, ResultItem, Statement, StatementError, StatementRef, StatementState,
};
pub use worksheet::{ChunkStatus, Worksheet, WorksheetListener, WorksheetState};
