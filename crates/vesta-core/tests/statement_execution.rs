//! Integration tests for statement compilation and execution.
//!
//! Tests scope chaining, output capture, copy-before-mutate and error
//! reporting through the public `Statement` API.

use std::sync::Arc;

use vesta_core::{
    EngineConfig, Environment, ResultItem, Statement, StatementRef, StatementState,
};
use vesta_lang::ModuleRegistry;

// =============================================================================
// Test Helpers
// =============================================================================

fn compiled(text: &str, parent: Option<&StatementRef>, env: &Environment) -> StatementRef {
    let statement = Statement::new_ref(text, env.clone());
    {
        let mut s = statement.lock();
        s.set_parent(parent.cloned());
        assert!(s.compile(), "{text:?} failed to compile: {:?}", s.error());
    }
    statement
}

/// Compile and execute `text`, which must succeed.
fn run(text: &str, parent: Option<&StatementRef>, env: &Environment) -> StatementRef {
    let statement = compiled(text, parent, env);
    {
        let mut s = statement.lock();
        assert!(
            s.execute().expect("Failed to execute"),
            "{text:?} failed: {:?}",
            s.error()
        );
    }
    statement
}

fn texts(statement: &StatementRef) -> Vec<String> {
    statement
        .lock()
        .results()
        .unwrap_or_default()
        .iter()
        .map(|r| r.text().to_string())
        .collect()
}

fn descriptions(statement: &StatementRef) -> Vec<String> {
    statement
        .lock()
        .mutations()
        .iter()
        .map(|m| m.description.clone())
        .collect()
}

// =============================================================================
// Scope chaining
// =============================================================================

#[test]
fn test_scope_isolation() {
    let env = Environment::default();
    let s1 = run("b=[0]", None, &env);
    let s2 = run("b[0]=1", Some(&s1), &env);
    let s3 = run("b[0]", Some(&s2), &env);
    assert_eq!(texts(&s3), ["1"]);

    // Re-run the mutating statement against the same parent.
    {
        let mut s = s2.lock();
        s.mark_for_execute();
        assert!(s.compile());
        assert!(s.execute().unwrap());
    }
    let s2a = run("b[0]", Some(&s1), &env);
    assert_eq!(texts(&s2a), ["0"]);
}

#[test]
fn test_nested_mutation_is_isolated() {
    let env = Environment::default();
    let s1 = run("d = {'k': [1]}", None, &env);
    let s2 = run("d['k'].append(2)", Some(&s1), &env);
    assert_eq!(descriptions(&s2), ["d", "d[...]"]);
    let later = run("d", Some(&s2), &env);
    assert_eq!(texts(&later), ["{'k': [1, 2]}"]);
    let fresh = run("d", Some(&s1), &env);
    assert_eq!(texts(&fresh), ["{'k': [1]}"]);
}

#[test]
fn test_rebinding_does_not_leak_into_parent() {
    let env = Environment::default();
    let s1 = run("x = 1", None, &env);
    let s2 = run("x = 2\ny = 3", Some(&s1), &env);
    let scope = s1.lock().result_scope().cloned().unwrap();
    assert_eq!(scope.get("x").unwrap().repr(), "1");
    assert!(!scope.contains("y"));
    assert!(s2.lock().result_scope().unwrap().contains("y"));
}

#[test]
fn test_missing_parent_scope_is_an_error() {
    let env = Environment::default();
    let parent = compiled("x = 1", None, &env);
    let child = compiled("x", Some(&parent), &env);
    assert!(child.lock().execute().is_err());
    assert_eq!(child.lock().state(), StatementState::CompileSuccess);
}

// =============================================================================
// Output capture
// =============================================================================

#[test]
fn test_tuple_expression_is_one_entry() {
    let env = Environment::default();
    assert_eq!(texts(&run("1,2", None, &env)), ["(1, 2)"]);
}

#[test]
fn test_expression_after_semicolon() {
    let env = Environment::default();
    assert_eq!(texts(&run("a=3;a", None, &env)), ["3"]);
}

#[test]
fn test_function_body_is_not_captured() {
    let env = Environment::default();
    assert!(texts(&run("def x():\n 1\ny=x()", None, &env)).is_empty());
}

#[test]
fn test_results_interleave_output_and_values() {
    let env = Environment::default();
    let s = run("print 'before'\n1 + 1\nprint 'after'", None, &env);
    assert_eq!(
        s.lock().results().unwrap(),
        [
            ResultItem::Output("before".into()),
            ResultItem::Value("2".into()),
            ResultItem::Output("after".into()),
        ]
    );
}

#[test]
fn test_strings_are_shown_as_repr() {
    let env = Environment::default();
    assert_eq!(texts(&run("'abc'", None, &env)), ["'abc'"]);
}

#[test]
fn test_loop_body_values_are_captured() {
    let env = Environment::default();
    assert_eq!(
        texts(&run("for i in [1, 2]:\n    i * 10", None, &env)),
        ["10", "20"]
    );
}

// =============================================================================
// Build blocks
// =============================================================================

#[test]
fn test_build_without_name_shows_value() {
    let env = Environment::default();
    let s = run("build [1]:\n    pass", None, &env);
    assert_eq!(texts(&s), ["[1]"]);
}

#[test]
fn test_build_with_name_binds_value() {
    let env = Environment::default();
    let s = run("build [] as l:\n    l.append(1)", None, &env);
    assert!(texts(&s).is_empty());
    let after = run("l", Some(&s), &env);
    assert_eq!(texts(&after), ["[1]"]);
}

#[test]
fn test_build_fresh_binding_records_no_mutations() {
    let env = Environment::default();
    let s = compiled("build:\n a=[1]\n a[0]=2", None, &env);
    assert!(s.lock().mutations().is_empty());
}

#[test]
fn test_build_conditional_binding_records_mutation() {
    let env = Environment::default();
    let s = compiled("build:\n if foo():\n  a=[1]\n a[0]=2", None, &env);
    let locked = s.lock();
    let mutations = locked.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].root, "a");
}

// =============================================================================
// Copy warnings
// =============================================================================

#[test]
fn test_uncopyable_value_warns() {
    let env = Environment::default();
    let s1 = run("import sys\nout = sys.stdout", None, &env);
    let s2 = run("out.write('hi\\n')", Some(&s1), &env);
    assert_eq!(
        s2.lock().results().unwrap(),
        [
            ResultItem::Warning("'out' apparently modified, but can't copy it".into()),
            ResultItem::Output("hi".into()),
        ]
    );
}

#[test]
fn test_modules_are_not_copied() {
    let env = Environment::default();
    let s1 = run("import math", None, &env);
    let s2 = run("math.answer = 42", Some(&s1), &env);
    assert!(
        s2.lock()
            .results()
            .unwrap()
            .iter()
            .all(|r| !r.is_warning())
    );
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_compile_error_reports_position() {
    let env = Environment::default();
    let statement = Statement::new_ref("x = 1\ny = (", env);
    let mut s = statement.lock();
    assert!(!s.compile());
    assert_eq!(s.state(), StatementState::CompileError);
    assert_eq!(s.error().unwrap().line, Some(2));
}

#[test]
fn test_unsupported_syntax_is_compile_error() {
    let env = Environment::default();
    let statement = Statement::new_ref("global x", env);
    let mut s = statement.lock();
    assert!(!s.compile());
    assert!(s.error().is_some());
}

#[test]
fn test_traceback_through_function() {
    let env = Environment::default();
    let statement = compiled("def f():\n    return 1/0\nf()", None, &env);
    let mut s = statement.lock();
    assert!(!s.execute().unwrap());
    let error = s.error().unwrap();
    assert_eq!(error.line, Some(2));
    assert_eq!(
        error.message,
        "  File \"<statement>\", line 3, in <module>\n    f()\n  \
         File \"<statement>\", line 2, in f\n    return 1/0\n\
         ZeroDivisionError: integer division or modulo by zero"
    );
}

#[test]
fn test_traceback_into_module() {
    let modules = Arc::new(ModuleRegistry::new());
    modules.register_source("helper", "def fail():\n    raise ValueError('bad')\n");
    let env = Environment::with_modules(EngineConfig::default(), modules);
    let parent = run("import helper", None, &env);
    let statement = compiled("helper.fail()", Some(&parent), &env);
    let mut s = statement.lock();
    assert!(!s.execute().unwrap());
    let error = s.error().unwrap();
    assert_eq!(error.line, Some(1));
    assert_eq!(
        error.message,
        "  File \"helper\", line 2, in fail\nValueError: bad"
    );
}

#[test]
fn test_custom_placeholder() {
    let mut config = EngineConfig::default();
    config.traceback.placeholder = "<cell>".to_string();
    let env = Environment::new(config);
    let statement = compiled("def f():\n    [][0]\nf()", None, &env);
    let mut s = statement.lock();
    assert!(!s.execute().unwrap());
    assert!(s.error().unwrap().message.contains("File \"<cell>\", line 2, in f"));
}

#[test]
fn test_runaway_recursion_is_recursion_error() {
    let env = Environment::default();
    let statement = compiled("def f(n):\n    return f(n + 1)\nf(0)", None, &env);
    let mut s = statement.lock();
    assert!(!s.execute().unwrap());
    assert_eq!(s.state(), StatementState::ExecuteError);
    assert!(s.error().unwrap().message.contains("RecursionError"));
}

#[test]
fn test_deeply_nested_source_is_compile_error() {
    let env = Environment::default();
    let text = format!("x = {}1{}", "(".repeat(50_000), ")".repeat(50_000));
    let statement = Statement::new_ref(&text, env);
    let mut s = statement.lock();
    assert!(!s.compile());
    assert_eq!(s.state(), StatementState::CompileError);
    assert!(s.error().unwrap().message.contains("too many nested"));
}

#[test]
fn test_huge_repetition_is_execute_error() {
    let env = Environment::default();
    let statement = compiled("x = 'ab' * 10**17", None, &env);
    let mut s = statement.lock();
    assert!(!s.execute().unwrap());
    assert!(s.error().unwrap().message.contains("MemoryError"));
    assert!(s.result_scope().is_none());
}
