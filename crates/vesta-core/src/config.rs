//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration and hosts only spell out what they change.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration shared by the rewriter, statements and the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Names under which the engine's hooks are visible to user code.
    #[serde(default)]
    pub hooks: HookNames,

    /// Which method calls count as mutations.
    #[serde(default)]
    pub mutation: MutationPolicy,

    /// How execution tracebacks are presented.
    #[serde(default)]
    pub traceback: TracebackPolicy,

    /// Maximum call depth of user code.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    /// Stack size of the executor's worker thread, in bytes.
    #[serde(default = "default_worker_stack_size")]
    pub worker_stack_size: usize,

    /// Name given to the executor's worker thread.
    #[serde(default = "default_worker_thread_name")]
    pub worker_thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hooks: HookNames::default(),
            mutation: MutationPolicy::default(),
            traceback: TracebackPolicy::default(),
            recursion_limit: default_recursion_limit(),
            worker_stack_size: default_worker_stack_size(),
            worker_thread_name: default_worker_thread_name(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }
}

fn default_recursion_limit() -> usize {
    vesta_lang::DEFAULT_RECURSION_LIMIT
}

fn default_worker_stack_size() -> usize {
    256 * 1024 * 1024
}

fn default_worker_thread_name() -> String {
    "vesta-executor".to_string()
}

/// Hook names spliced into rewritten statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookNames {
    /// Receives the values of bare expression statements.
    #[serde(default = "default_output_hook")]
    pub output: String,

    /// Replaces `print` statements without a destination.
    #[serde(default = "default_print_hook")]
    pub print: String,

    /// Shallow copy used by copy-before-mutate procedures.
    #[serde(default = "default_copy_hook")]
    pub copy: String,

    /// Context manager behind `build` blocks.
    #[serde(default = "default_builder_hook")]
    pub builder: String,
}

impl Default for HookNames {
    fn default() -> Self {
        Self {
            output: default_output_hook(),
            print: default_print_hook(),
            copy: default_copy_hook(),
            builder: default_builder_hook(),
        }
    }
}

fn default_output_hook() -> String {
    "__vesta_output".to_string()
}

fn default_print_hook() -> String {
    "__vesta_print".to_string()
}

fn default_copy_hook() -> String {
    "__vesta_copy".to_string()
}

fn default_builder_hook() -> String {
    "__vesta_builder".to_string()
}

/// Heuristic deciding which method calls may mutate their receiver.
///
/// A call `x.name(...)` is treated as a getter, and therefore not as a
/// mutation of `x`, when `name` starts with one of `getter_prefixes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationPolicy {
    #[serde(default = "default_getter_prefixes")]
    pub getter_prefixes: Vec<String>,
}

impl Default for MutationPolicy {
    fn default() -> Self {
        Self {
            getter_prefixes: default_getter_prefixes(),
        }
    }
}

impl MutationPolicy {
    pub fn is_getter(&self, method: &str) -> bool {
        self.getter_prefixes
            .iter()
            .any(|prefix| method.starts_with(prefix.as_str()))
    }
}

fn default_getter_prefixes() -> Vec<String> {
    ["get", "is", "has"].iter().map(|s| s.to_string()).collect()
}

/// Traceback presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracebackPolicy {
    /// Units whose frames are left out of tracebacks.
    #[serde(default = "default_internal_units")]
    pub internal_units: Vec<String>,

    /// Shown in place of per-statement unit names such as `<statement12>`.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

impl Default for TracebackPolicy {
    fn default() -> Self {
        Self {
            internal_units: default_internal_units(),
            placeholder: default_placeholder(),
        }
    }
}

fn default_internal_units() -> Vec<String> {
    vec!["<copy>".to_string()]
}

fn default_placeholder() -> String {
    "<statement>".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_json(
            r#"{"mutation": {"getter_prefixes": ["peek"]}, "recursion_limit": 50}"#,
        )
        .unwrap();
        assert_eq!(config.recursion_limit, 50);
        assert!(config.mutation.is_getter("peek_at"));
        assert!(!config.mutation.is_getter("get_a"));
        assert_eq!(config.hooks, HookNames::default());
    }

    #[test]
    fn test_default_getter_prefixes() {
        let policy = MutationPolicy::default();
        assert!(policy.is_getter("get_a"));
        assert!(policy.is_getter("isa"));
        assert!(policy.is_getter("hasA"));
        assert!(!policy.is_getter("append"));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = EngineConfig::from_json("{").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vesta.json");
        std::fs::write(&path, r#"{"worker_thread_name": "w"}"#).unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.worker_thread_name, "w");

        let missing = EngineConfig::from_file(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
