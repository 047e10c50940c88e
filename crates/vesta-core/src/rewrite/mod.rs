//! Statement rewriting.
//!
//! Turns the text of one statement chunk into an executable [`Program`]
//! with the engine's hooks spliced in, plus what the engine needs to know
//! about it:
//!
//! ```text
//! source ──► build sugar ──► parse ──► Transformer ──► compile ──► Rewritten
//!                                          │                        ├─ program
//!                                          ├─ mutation sites ─────► ├─ mutations
//!                                          └─ imports ────────────► ├─ imports
//!                                                                   └─ features
//! ```

mod builder;
mod imports;
mod mutation;
mod scope;
mod transform;

use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::debug;
use vesta_lang::compile::declared_features;
use vesta_lang::{FeatureSet, Program, SyntaxError, compile, parse};

use crate::config::{EngineConfig, HookNames, MutationPolicy};

pub use imports::ImportSet;
pub use mutation::{COPY_UNIT, Mutation};

use transform::Transformer;

/// Why a statement could not be rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    /// The source does not parse or compile.
    #[error("{0}")]
    Syntax(#[from] SyntaxError),

    /// The source uses a construct the engine deliberately rejects.
    #[error("{message} (line {line})")]
    Unsupported { message: String, line: u32 },

    /// Rewriting itself failed.
    #[error("rewriting failed: {0}")]
    Internal(String),
}

impl RewriteError {
    /// The message to show next to the statement.
    pub fn message(&self) -> String {
        match self {
            RewriteError::Syntax(e) => e.message.clone(),
            RewriteError::Unsupported { message, .. } => message.clone(),
            RewriteError::Internal(_) => self.to_string(),
        }
    }

    /// 1-based line within the statement.
    pub fn line(&self) -> Option<u32> {
        match self {
            RewriteError::Syntax(e) => Some(e.line),
            RewriteError::Unsupported { line, .. } => Some(*line),
            RewriteError::Internal(_) => None,
        }
    }

    /// 1-based column, when known.
    pub fn column(&self) -> Option<u32> {
        match self {
            RewriteError::Syntax(e) if e.column > 0 => Some(e.column),
            _ => None,
        }
    }
}

/// The result of rewriting one statement.
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub program: Program,
    /// Paths to copy before running, in the order they must be copied.
    pub mutations: Vec<Mutation>,
    pub imports: ImportSet,
    /// Inherited features plus those the statement declares.
    pub features: FeatureSet,
}

/// Rewrites statement source using the configured hook names and mutation
/// policy.
#[derive(Debug, Clone)]
pub struct Rewriter {
    hooks: HookNames,
    policy: MutationPolicy,
}

impl Rewriter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            hooks: config.hooks.clone(),
            policy: config.mutation.clone(),
        }
    }

    /// Rewrite and compile `source` as unit `unit`.
    pub fn rewrite(
        &self,
        source: &str,
        unit: &str,
        inherited: &FeatureSet,
    ) -> Result<Rewritten, RewriteError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.rewrite_unguarded(source, unit, inherited)))
            .unwrap_or_else(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(RewriteError::Internal(reason))
            })
    }

    fn rewrite_unguarded(
        &self,
        source: &str,
        unit: &str,
        inherited: &FeatureSet,
    ) -> Result<Rewritten, RewriteError> {
        let source = builder::expand_builders(source, &self.hooks.builder);
        let mut module = parse(&source)?;
        let features = inherited.union(&declared_features(&module)?);

        let transformer = Transformer::new(&self.hooks, &self.policy, features);
        let (mutations, imports) = transformer.transform(&mut module.body)?;

        let program = compile(module, unit, inherited)?;
        debug!(
            "Rewrote {} with {} mutation(s), features [{}]",
            unit,
            mutations.len(),
            program.features
        );
        Ok(Rewritten {
            features: program.features.clone(),
            program,
            mutations,
            imports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> Rewriter {
        Rewriter::new(&EngineConfig::default())
    }

    fn rewrite(source: &str) -> Result<Rewritten, RewriteError> {
        rewriter().rewrite(source, "<test>", &FeatureSet::new())
    }

    /// Descriptions of the mutations found in `source`, sorted.
    fn mutated(source: &str) -> Vec<String> {
        let mut descriptions: Vec<String> = rewrite(source)
            .unwrap_or_else(|e| panic!("{source:?}: {e}"))
            .mutations
            .into_iter()
            .map(|m| m.description)
            .collect();
        descriptions.sort();
        descriptions
    }

    fn assert_unsupported(source: &str) {
        match rewrite(source) {
            Err(RewriteError::Unsupported { .. }) => {}
            other => panic!("{source:?}: expected unsupported syntax, got {other:?}"),
        }
    }

    #[test]
    fn test_assignment_mutations() {
        assert_eq!(mutated("a[0] = 1"), ["a"]);
        assert_eq!(mutated("a[0], b[0] = 1, 2"), ["a", "b"]);
        assert_eq!(mutated("a[0], _ = 1, 2"), ["a"]);
        assert_eq!(mutated("a[0], b[0] = c[0], d[0] = 1, 2"), ["a", "b", "c", "d"]);
        assert_eq!(mutated("a[0][1] = 1"), ["a", "a[...]"]);
        assert_eq!(mutated("del a[0]"), ["a"]);
    }

    #[test]
    fn test_augmented_assignment_mutations() {
        assert_eq!(mutated("a += 1"), ["a"]);
        assert_eq!(mutated("a[0] += 1"), ["a", "a[...]"]);
        assert_eq!(mutated("a.a.b += 1"), ["a", "a.a", "a.a.b"]);
    }

    #[test]
    fn test_attribute_mutations() {
        assert_eq!(mutated("a.b = 2"), ["a"]);
        assert_eq!(mutated("a.a.b = 2"), ["a", "a.a"]);
    }

    #[test]
    fn test_method_call_mutations() {
        assert_eq!(mutated("a[0].append(1)"), ["a", "a[...]"]);
        assert_eq!(mutated("a.addmul(1, 2)"), ["a"]);
        assert_eq!(mutated("a.a.addmul(1, 2)"), ["a", "a.a"]);
    }

    #[test]
    fn test_getters_are_not_mutations() {
        assert!(mutated("a.get_a()").is_empty());
        assert!(mutated("a.hasA()").is_empty());
        assert!(mutated("a.isa()").is_empty());
    }

    #[test]
    fn test_getter_prefixes_are_configurable() {
        let mut config = EngineConfig::default();
        config.mutation.getter_prefixes = vec!["peek".to_string()];
        let rewritten = Rewriter::new(&config)
            .rewrite("a.get_a()\nb.peek()", "<test>", &FeatureSet::new())
            .unwrap();
        let descriptions: Vec<&str> = rewritten
            .mutations
            .iter()
            .map(|m| m.description.as_str())
            .collect();
        assert_eq!(descriptions, ["a"]);
    }

    #[test]
    fn test_mutation_through_call_has_no_copy() {
        let rewritten = rewrite("a.get_a().b = 2").unwrap();
        assert_eq!(rewritten.mutations.len(), 1);
        assert_eq!(rewritten.mutations[0].root, "a");
        assert_eq!(rewritten.mutations[0].description, "a.get_a(...)");
        assert!(rewritten.mutations[0].copy.is_none());
        assert_eq!(mutated("a.get_a().a.b = 2"), ["a.get_a(...).a"]);
    }

    #[test]
    fn test_function_locals_are_not_mutations() {
        assert!(mutated("def f(x):\n    x[1] = 2\n").is_empty());
        assert!(mutated("def f(y):\n    x = [1]\n    x[1] = 2\n").is_empty());
        assert!(mutated("def f(x):\n    def g(x):\n        pass").is_empty());
        assert!(mutated("def f(x):\n    import g").is_empty());
        assert!(mutated("def f(x):\n    from m import g as h\n    h[2] = 3").is_empty());
        assert!(mutated("def f(x):\n    class C:\n        pass").is_empty());
        assert!(mutated("class X:\n    x = [1]\n    x[1] = 2\n").is_empty());
    }

    #[test]
    fn test_closure_variables_are_not_mutations() {
        let source = "def f():\n    x = [1]\n    def g():\n        x[0] = 2\n    return g";
        assert!(mutated(source).is_empty());
    }

    #[test]
    fn test_class_body_mutating_global() {
        assert_eq!(mutated("class X:\n    x[1] = 2\n"), ["x"]);
    }

    #[test]
    fn test_unsupported_constructs() {
        assert_unsupported("def f(x):\n    y[1] = 2\n");
        assert_unsupported("def f(x):\n    y.append(1)\n");
        assert_unsupported("global x");
        assert_unsupported("def f(x):\n    global g\n    g = 1");
        assert_unsupported("from . import m");
        // Comprehension variables do not leak into the function.
        assert_unsupported("def f(x):\n    [y for y in (1, 2, 3)]\n    y[1] = 2\n");
        assert_unsupported("def f(x):\n    lambda x: [y for y in (1, 2, 3)]\n    y[1] = 2\n");
    }

    #[test]
    fn test_unsupported_reports_line() {
        let err = rewrite("def f(x):\n    y[1] = 2\n").unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(err.message().contains("'y'"));
    }

    #[test]
    fn test_overwrite_forms() {
        assert!(mutated("build [1] as a:\n    a[0] = 2").is_empty());
        assert!(mutated("try:\n    pass\nexcept ValueError, a:\n    a[0] = 2").is_empty());
        assert!(mutated("build:\n    def a(): pass\n    a.b = 2").is_empty());
        assert!(mutated("build:\n    class A: pass\n    A.b = 2").is_empty());
        assert!(mutated("for x in [[1]]:\n    x[0] = 2").is_empty());
        assert!(mutated("for x, y in [[1, 2]]:\n    x[0] = 2").is_empty());
        assert!(mutated("build:\n    import sys\n    sys.b = 1").is_empty());
        assert!(mutated("build:\n    import sys as a\n    a.b = 1").is_empty());
        assert!(mutated("build:\n    from sys import a\n    a.b = 1").is_empty());
        assert!(mutated("build:\n    from sys import b as a\n    a.b = 1").is_empty());
        assert_eq!(mutated("build:\n    from sys import *\n    a.b = 1"), ["a"]);
    }

    #[test]
    fn test_overwrites_through_if() {
        assert!(mutated("build:\n    a = [1]\n    a[0] = 2").is_empty());
        assert_eq!(mutated("build:\n    if foo():\n        a = [1]\n    a[0] = 2"), ["a"]);
        assert!(mutated("build:\n    if foo():\n        a = [1]\n        a[0] = 2").is_empty());
        assert!(
            mutated("build:\n    if foo():\n        a = [1]\n    else:\n        a = [3]\n    a[0] = 2")
                .is_empty()
        );
    }

    #[test]
    fn test_overwrites_through_loops() {
        assert_eq!(mutated("build:\n    while foo():\n        a = [1]\n    a[0] = 2"), ["a"]);
        assert!(mutated("build:\n    while foo():\n        a = [1]\n        a[0] = 2").is_empty());
        assert_eq!(
            mutated("build:\n    while foo():\n        a = [1]\n    else:\n        a[0] = 2"),
            ["a"]
        );
        assert_eq!(
            mutated("build:\n    for i in range(foo()):\n        a = [1]\n    a[0] = 2"),
            ["a"]
        );
        assert!(
            mutated("build:\n    for i in range(foo()):\n        a = [1]\n        a[0] = 2").is_empty()
        );
    }

    #[test]
    fn test_overwrites_through_try() {
        assert_eq!(
            mutated("build:\n    try:\n        a = [1]\n    except:\n        pass\n    a[0] = 2"),
            ["a"]
        );
        assert!(
            mutated("build:\n    try:\n        a = [1]\n        a[0] = 2\n    except:\n        pass")
                .is_empty()
        );
        assert_eq!(
            mutated("build:\n    try:\n        pass\n    except:\n        a = [1]\n    a[0] = 2"),
            ["a"]
        );
        assert_eq!(
            mutated("build:\n    try:\n        a = [1]\n    finally:\n        pass\n    a[0] = 2"),
            ["a"]
        );
        assert!(
            mutated("build:\n    try:\n        pass\n    finally:\n        a = [1]\n    a[0] = 2")
                .is_empty()
        );
    }

    #[test]
    fn test_imports_are_recorded() {
        assert!(rewrite("a + 1").unwrap().imports.is_empty());
        for (source, module) in [
            ("import re", "re"),
            ("import re as r", "re"),
            ("import re, os as o", "os"),
            ("from re import match", "re"),
            ("from re import match as m, sub as s", "re"),
            ("from re import (match as m, sub as s)", "re"),
            ("from re import *", "re"),
            ("import os.path", "os"),
        ] {
            let imports = rewrite(source).unwrap().imports;
            assert!(imports.module_is_referenced(module), "{source}");
        }
    }

    #[test]
    fn test_future_features() {
        let rewritten = rewrite("from __future__ import division").unwrap();
        assert!(rewritten.imports.future_features().contains("division"));
        assert!(rewritten.features.contains("division"));
    }

    #[test]
    fn test_inherited_features_are_kept() {
        let inherited: FeatureSet = ["division"].into_iter().collect();
        let rewritten = rewriter().rewrite("a = 1", "<test>", &inherited).unwrap();
        assert!(rewritten.features.contains("division"));
        assert!(rewritten.imports.future_features().is_empty());
    }

    #[test]
    fn test_syntax_error() {
        let err = rewrite("a = (1").unwrap_err();
        assert!(matches!(err, RewriteError::Syntax(_)));
        assert!(err.line().is_some());
    }

    #[test]
    fn test_compile_error_is_syntax() {
        let err = rewrite("return 1").unwrap_err();
        assert!(matches!(err, RewriteError::Syntax(_)));
        assert!(err.message().contains("outside function"));
    }
}
