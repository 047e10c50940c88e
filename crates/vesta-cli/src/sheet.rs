//! Loading worksheets for the `run` and `check` commands.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;
use vesta_core::{EngineConfig, Environment, EventLoop, IdleQueue, Worksheet};

/// A worksheet loaded from disk together with the loop that drives it.
pub struct LoadedSheet {
    pub worksheet: Worksheet,
    pub queue: Arc<IdleQueue>,
}

/// The configuration at `path`, or the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Ok(EngineConfig::from_file(path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Read the worksheet text at `path`.
pub fn read_source(path: &Path) -> anyhow::Result<String> {
    if !path.exists() {
        anyhow::bail!("Worksheet not found: {}", path.display());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Load the worksheet at `path` into a fresh environment.
pub fn open(path: &Path, config: EngineConfig) -> anyhow::Result<LoadedSheet> {
    let source = read_source(path)?;
    let queue = Arc::new(IdleQueue::new());
    let event_loop: Arc<dyn EventLoop> = queue.clone();
    let mut worksheet = Worksheet::new(Environment::new(config), event_loop);
    worksheet.insert(0, 0, &source)?;
    debug!(
        "Loaded {} ({} lines, {} chunks)",
        path.display(),
        worksheet.line_count(),
        worksheet.chunks().count()
    );
    Ok(LoadedSheet { worksheet, queue })
}
