//! Run command implementation for Vesta CLI.
//!
//! Loads a worksheet, executes it on the engine's worker thread while this
//! thread acts as the host loop, and prints a doctest-style transcript.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use vesta_core::{
    Chunk, ChunkKind, ResultItem, StatementState, Worksheet, WorksheetListener, WorksheetState,
};

use crate::colors;
use crate::sheet::{self, LoadedSheet};

/// How long the host loop sleeps between dispatches at most.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options of `vesta run`.
#[derive(Debug, Default)]
pub struct RunOptions {
    /// 1-based line before which statements must start to run.
    pub until_line: Option<usize>,
    pub config: Option<PathBuf>,
    /// Seconds after which the batch is interrupted.
    pub timeout: Option<f64>,
}

/// Logs execution progress as chunk statuses change.
struct ProgressLog;

impl WorksheetListener for ProgressLog {
    fn chunk_status_changed(&self, worksheet: &Worksheet, chunk: &Chunk) {
        if let Some(status) = worksheet.chunk_status(chunk.id()) {
            if status.executing {
                debug!("Executing line {}", chunk.start() + 1);
            }
        }
    }

    fn state_changed(&self, _worksheet: &Worksheet, state: WorksheetState) {
        debug!("Worksheet is now {}", state);
    }
}

/// Execute a worksheet.
pub fn execute(path: &Path, options: &RunOptions) -> anyhow::Result<()> {
    let timeout = match options.timeout {
        Some(secs) if !secs.is_finite() || secs <= 0.0 => {
            anyhow::bail!("Timeout must be a positive number of seconds, got {}", secs)
        }
        Some(secs) => Some(Duration::from_secs_f64(secs)),
        None => None,
    };

    let config = sheet::load_config(options.config.as_deref())?;
    let LoadedSheet {
        mut worksheet,
        queue,
    } = sheet::open(path, config)?;
    worksheet.add_listener(Box::new(ProgressLog));

    let start = Instant::now();
    let end_line = options.until_line.map(|line| line.saturating_sub(1));
    let mut timed_out = false;

    if worksheet.calculate(end_line)? {
        info!("Running {}", path.display());
        while worksheet.is_executing() {
            queue.wait_timeout(POLL_INTERVAL);
            worksheet.dispatch();
            if let Some(timeout) = timeout {
                if !timed_out && worksheet.is_executing() && start.elapsed() >= timeout {
                    warn!("Timed out after {:.1}s, interrupting", timeout.as_secs_f64());
                    worksheet.interrupt();
                    timed_out = true;
                }
            }
        }
    }
    let elapsed = start.elapsed();

    let summary = print_transcript(&worksheet);

    println!("{}", "─".repeat(50));
    if timed_out {
        anyhow::bail!(
            "Timed out after {:.1}s; {} of {} statements completed",
            elapsed.as_secs_f64(),
            summary.succeeded,
            summary.statements
        );
    }
    if let Some((line, state)) = summary.failure {
        anyhow::bail!("Execution stopped at line {}: {}", line + 1, state);
    }
    match worksheet.state() {
        WorksheetState::NeedsExecute => println!(
            "{} {} of {} statements in {:.2}s (stopped before line {})",
            colors::paint(colors::YELLOW, "Partial"),
            summary.succeeded,
            summary.statements,
            elapsed.as_secs_f64(),
            options.until_line.unwrap_or_default()
        ),
        _ => println!(
            "{} {} statements in {:.2}s",
            colors::paint(colors::GREEN, "Completed"),
            summary.succeeded,
            elapsed.as_secs_f64()
        ),
    }
    colors::flush_stdout();
    Ok(())
}

#[derive(Debug, Default)]
struct Summary {
    statements: usize,
    succeeded: usize,
    /// First statement that did not succeed, with its state.
    failure: Option<(usize, StatementState)>,
}

fn print_transcript(worksheet: &Worksheet) -> Summary {
    let mut summary = Summary::default();
    let last = worksheet.line_count().saturating_sub(1);

    for chunk in worksheet.chunks() {
        for line in chunk.start()..chunk.end() {
            let text = worksheet.line(line).unwrap_or_default();
            if line == last && text.is_empty() {
                continue;
            }
            match chunk.kind() {
                ChunkKind::Statement => {
                    let prompt = if line == chunk.start() { ">>> " } else { "... " };
                    println!("{}{}", colors::paint(colors::CYAN, prompt), text);
                }
                ChunkKind::Comment => println!("{}", colors::paint(colors::DIM, text)),
                ChunkKind::Blank => println!("{text}"),
            }
        }
        if !chunk.is_statement() {
            continue;
        }

        summary.statements += 1;
        let Some(status) = worksheet.chunk_status(chunk.id()) else {
            continue;
        };
        let Some(state) = status.state else {
            continue;
        };
        match state {
            StatementState::ExecuteSuccess => {
                summary.succeeded += 1;
                for result in status.results.unwrap_or_default() {
                    print_result(&result);
                }
            }
            StatementState::CompileError | StatementState::ExecuteError => {
                if let Some(error) = &status.error {
                    for line in error.message.lines() {
                        println!("{}", colors::paint(colors::RED, line));
                    }
                }
                summary.failure.get_or_insert((chunk.start(), state));
            }
            StatementState::Interrupted => {
                println!("{}", colors::paint(colors::for_state(state), "Interrupted"));
                summary.failure.get_or_insert((chunk.start(), state));
            }
            StatementState::New | StatementState::CompileSuccess | StatementState::Executing => {}
        }
    }
    summary
}

fn print_result(result: &ResultItem) {
    match result {
        ResultItem::Value(text) | ResultItem::Output(text) => println!("{text}"),
        ResultItem::Warning(text) => {
            println!("{}", colors::paint(colors::YELLOW, &format!("warning: {text}")))
        }
    }
}
