//! Error types for vesta-core.

use thiserror::Error;

/// Result type for vesta-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vesta-core.
///
/// Problems with user code (syntax errors, exceptions) are not errors at
/// this level; they are recorded on the statement that produced them.
#[derive(Debug, Error)]
pub enum Error {
    /// A line/offset pair outside the worksheet.
    #[error("invalid position: line {line}, offset {offset}")]
    InvalidPosition { line: usize, offset: usize },

    /// The worksheet cannot be edited while a batch is running.
    #[error("worksheet is executing")]
    Executing,

    /// An operation was attempted in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The executor worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The error message followed by a recovery hint, when one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::InvalidPosition { .. } => {
                Some("positions are 0-based lines and character offsets within the line")
            }
            Error::Executing => Some("wait for the batch to complete or call interrupt() first"),
            Error::InvalidState(_) => Some("compile the statement before executing it"),
            Error::Spawn(_) => Some("try lowering `worker_stack_size` in the configuration"),
            Error::Config(_) => Some("check the configuration file against `vesta run --help`"),
            Error::Io(_) => None,
        };
        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}
