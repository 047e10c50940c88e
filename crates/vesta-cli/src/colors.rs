//! Terminal colors for transcript output.

use std::io::{self, IsTerminal, Write};
use std::sync::LazyLock;

use vesta_core::StatementState;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";
pub const RED: &str = "\x1b[31m";

static ENABLED: LazyLock<bool> = LazyLock::new(|| {
    std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal()
});

/// `text` wrapped in `color`, or unchanged when stdout is not a terminal.
pub fn paint(color: &str, text: &str) -> String {
    if *ENABLED {
        format!("{color}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Color for a statement's status marker.
pub fn for_state(state: StatementState) -> &'static str {
    match state {
        StatementState::ExecuteSuccess => GREEN,
        StatementState::CompileError | StatementState::ExecuteError => RED,
        StatementState::Interrupted => YELLOW,
        StatementState::Executing => CYAN,
        StatementState::New | StatementState::CompileSuccess => DIM,
    }
}

/// Flush stdout so progress written without a newline shows up.
#[inline]
pub fn flush_stdout() {
    io::stdout().flush().ok();
}
