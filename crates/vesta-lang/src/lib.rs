//! Scripting language for Vesta worksheets.
//!
//! This crate provides:
//! - A `logos` based lexer with an indentation layer
//! - A recursive descent parser producing a line-annotated syntax tree
//! - A compiler pass that validates the tree and applies `__future__` features
//! - A tree-walking interpreter with cooperative interruption
//! - A module registry for built-in and host-supplied source modules
//!
//! # Pipeline
//!
//! ```text
//! source ──► lexer::tokenize ──► parser::parse ──► ast::Module
//!                                                     │
//!                                  compile::compile ◄─┘
//!                                         │
//!                                         ▼
//!                       Program ──► Interpreter::run(globals)
//! ```

pub mod ast;
mod builtins;
pub mod compile;
pub mod error;
mod interp;
mod interrupt;
pub mod lexer;
pub mod modules;
pub mod parser;
mod stack;
pub mod value;

pub use builtins::{builtin_names, lookup as builtin};
pub use compile::{FUTURE_FEATURES, FeatureSet, Program, compile};
pub use error::{ExceptionKind, ExecResult, Exception, ParseResult, SyntaxError, TraceFrame, Unwind};
pub use interp::{DEFAULT_RECURSION_LIMIT, Interpreter};
pub use interrupt::InterruptHandle;
pub use modules::ModuleRegistry;
pub use parser::parse;
pub use value::{Args, Dict, HostObject, List, Namespace, Value};
