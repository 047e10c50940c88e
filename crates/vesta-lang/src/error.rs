//! Error types for vesta-lang.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type for parsing and compilation.
pub type ParseResult<T> = std::result::Result<T, SyntaxError>;

/// Result type for interpretation.
pub type ExecResult<T> = std::result::Result<T, Unwind>;

/// Source text that could not be tokenized, parsed, or compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct SyntaxError {
    pub message: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column, 0 when not known.
    pub column: u32,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Built-in exception classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    Exception,
    ArithmeticError,
    AssertionError,
    AttributeError,
    ImportError,
    IndexError,
    KeyError,
    LookupError,
    MemoryError,
    NameError,
    NotImplementedError,
    OverflowError,
    RecursionError,
    RuntimeError,
    StopIteration,
    TypeError,
    UnboundLocalError,
    ValueError,
    ZeroDivisionError,
}

impl ExceptionKind {
    pub const ALL: [ExceptionKind; 19] = [
        ExceptionKind::Exception,
        ExceptionKind::ArithmeticError,
        ExceptionKind::AssertionError,
        ExceptionKind::AttributeError,
        ExceptionKind::ImportError,
        ExceptionKind::IndexError,
        ExceptionKind::KeyError,
        ExceptionKind::LookupError,
        ExceptionKind::MemoryError,
        ExceptionKind::NameError,
        ExceptionKind::NotImplementedError,
        ExceptionKind::OverflowError,
        ExceptionKind::RecursionError,
        ExceptionKind::RuntimeError,
        ExceptionKind::StopIteration,
        ExceptionKind::TypeError,
        ExceptionKind::UnboundLocalError,
        ExceptionKind::ValueError,
        ExceptionKind::ZeroDivisionError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::Exception => "Exception",
            ExceptionKind::ArithmeticError => "ArithmeticError",
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::LookupError => "LookupError",
            ExceptionKind::MemoryError => "MemoryError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::NotImplementedError => "NotImplementedError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::RecursionError => "RecursionError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::UnboundLocalError => "UnboundLocalError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    pub fn parent(self) -> Option<ExceptionKind> {
        match self {
            ExceptionKind::Exception => None,
            ExceptionKind::OverflowError | ExceptionKind::ZeroDivisionError => {
                Some(ExceptionKind::ArithmeticError)
            }
            ExceptionKind::IndexError | ExceptionKind::KeyError => Some(ExceptionKind::LookupError),
            ExceptionKind::UnboundLocalError => Some(ExceptionKind::NameError),
            ExceptionKind::NotImplementedError | ExceptionKind::RecursionError => {
                Some(ExceptionKind::RuntimeError)
            }
            _ => Some(ExceptionKind::Exception),
        }
    }

    /// Whether an `except other:` clause catches this kind.
    pub fn is_subclass_of(self, other: ExceptionKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a traceback, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Name of the compiled unit the frame executes.
    pub unit: Arc<str>,
    /// Function name, `<module>` for unit-level code.
    pub function: Arc<str>,
    /// 1-based line of the statement being executed.
    pub line: u32,
}

/// A raised exception.
#[derive(Debug, Clone, Error)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: String,
    /// Stack at the point the exception was raised. Empty until the
    /// interpreter attaches it.
    pub traceback: Vec<TraceFrame>,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    /// The final `Kind: message` line of a formatted traceback.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.kind.name().to_string()
        } else {
            format!("{}: {}", self.kind, self.message)
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Non-local exit from interpretation.
#[derive(Debug, Clone)]
pub enum Unwind {
    /// A catchable exception.
    Error(Box<Exception>),
    /// The interrupt handle fired. Never caught by `except` clauses.
    Interrupt,
}

impl Unwind {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Unwind::Error(Box::new(Exception::new(kind, message)))
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Unwind::Interrupt)
    }
}

impl From<Exception> for Unwind {
    fn from(exc: Exception) -> Self {
        Unwind::Error(Box::new(exc))
    }
}

pub(crate) fn type_error(message: impl Into<String>) -> Unwind {
    Unwind::new(ExceptionKind::TypeError, message)
}

pub(crate) fn value_error(message: impl Into<String>) -> Unwind {
    Unwind::new(ExceptionKind::ValueError, message)
}

pub(crate) fn index_error(message: impl Into<String>) -> Unwind {
    Unwind::new(ExceptionKind::IndexError, message)
}

pub(crate) fn attribute_error(message: impl Into<String>) -> Unwind {
    Unwind::new(ExceptionKind::AttributeError, message)
}

pub(crate) fn overflow_error() -> Unwind {
    Unwind::new(ExceptionKind::OverflowError, "integer overflow")
}

pub(crate) fn memory_error() -> Unwind {
    Unwind::new(ExceptionKind::MemoryError, "sequence too large")
}
