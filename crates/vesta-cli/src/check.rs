//! Check command implementation for Vesta CLI.
//!
//! Compiles every statement of a worksheet in order, without executing
//! anything, and reports compile errors with their worksheet positions.

use std::path::Path;

use tracing::debug;
use vesta_core::{Environment, Segmenter, Statement, StatementRef};

use crate::colors;
use crate::sheet;

/// Check a worksheet.
pub fn execute(path: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let config = sheet::load_config(config)?;
    let source = sheet::read_source(path)?;
    let mut segmenter = Segmenter::new();
    segmenter.insert(0, 0, &source)?;
    let env = Environment::new(config);

    let mut parent: Option<StatementRef> = None;
    let mut statements = 0;
    let mut errors = 0;

    for chunk in segmenter.chunks().filter(|chunk| chunk.is_statement()) {
        statements += 1;
        let statement = Statement::new_ref(chunk.text(), env.clone());
        let mut locked = statement.lock();
        locked.set_parent(parent.take());
        if locked.compile() {
            debug!(
                "Line {}: {} mutation(s)",
                chunk.start() + 1,
                locked.mutations().len()
            );
        } else if let Some(error) = locked.error() {
            errors += 1;
            let line = chunk.start() + error.line.map_or(1, |l| l as usize);
            let position = match error.column {
                Some(column) => format!("{}:{}:{}", path.display(), line, column),
                None => format!("{}:{}", path.display(), line),
            };
            println!(
                "{} {}",
                colors::paint(colors::BOLD, &format!("{position}:")),
                colors::paint(colors::RED, &error.message)
            );
        }
        drop(locked);
        parent = Some(statement);
    }

    if errors > 0 {
        anyhow::bail!("{} of {} statements failed to compile", errors, statements);
    }
    println!(
        "{} {} statements compiled",
        colors::paint(colors::GREEN, "OK"),
        statements
    );
    Ok(())
}
