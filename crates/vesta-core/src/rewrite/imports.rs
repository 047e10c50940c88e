//! Modules referenced by a statement.

use vesta_lang::FeatureSet;

/// Modules named by the `import` and `from ... import` statements of one
/// statement, plus the `__future__` features it declares.
///
/// Used only to decide which statements to re-run when a module changes;
/// name resolution itself happens in the interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSet {
    modules: Vec<String>,
    future: FeatureSet,
}

impl ImportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_module(&mut self, name: &str) {
        if !self.modules.iter().any(|m| m == name) {
            self.modules.push(name.to_string());
        }
    }

    pub(crate) fn add_future(&mut self, feature: &str) {
        self.future.insert(feature);
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Imported module names, in first-seen order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Features named by `from __future__ import ...`.
    pub fn future_features(&self) -> &FeatureSet {
        &self.future
    }

    /// Whether `module`, or a submodule of it, is imported.
    pub fn module_is_referenced(&self, module: &str) -> bool {
        self.modules.iter().any(|name| {
            name == module
                || name
                    .strip_prefix(module)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_submodule_references() {
        let mut imports = ImportSet::new();
        imports.add_module("os.path");
        imports.add_module("re");
        assert!(imports.module_is_referenced("re"));
        assert!(imports.module_is_referenced("os"));
        assert!(imports.module_is_referenced("os.path"));
        assert!(!imports.module_is_referenced("o"));
        assert!(!imports.module_is_referenced("os.pathlib"));
    }

    #[test]
    fn test_duplicates_are_merged() {
        let mut imports = ImportSet::new();
        imports.add_module("re");
        imports.add_module("re");
        assert_eq!(imports.modules(), ["re".to_string()]);
    }
}
