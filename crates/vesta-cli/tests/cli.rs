//! End-to-end tests for Vesta CLI commands.
//!
//! These tests run the `vesta` binary against worksheet files written to a
//! temporary directory.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// A worksheet file in its own temporary directory.
struct TestSheet {
    temp_dir: TempDir,
    path: PathBuf,
}

impl TestSheet {
    fn new(source: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("sheet.vws");
        fs::write(&path, source).expect("Failed to write worksheet");
        Self { temp_dir, path }
    }

    fn path(&self) -> &str {
        self.path.to_str().expect("non-UTF-8 temp path")
    }

    /// Write a sibling file and return its path.
    fn sibling(&self, name: &str, contents: &str) -> String {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("Failed to write file");
        path.to_string_lossy().into_owned()
    }
}

fn vesta() -> Command {
    let mut cmd = Command::cargo_bin("vesta").expect("Failed to find vesta binary");
    cmd.env("NO_COLOR", "1");
    cmd
}

// =============================================================================
// Run Command Tests
// =============================================================================

#[test]
fn test_run_nonexistent_worksheet() {
    vesta()
        .args(["run", "/nonexistent/sheet.vws"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Worksheet not found"));
}

#[test]
fn test_run_prints_transcript() {
    let sheet = TestSheet::new("# totals\na = 1\nb = 2\na + b\nprint 'done'\n");
    vesta()
        .args(["run", sheet.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("# totals"))
        .stdout(predicate::str::contains(">>> a + b\n3\n"))
        .stdout(predicate::str::contains(">>> print 'done'\ndone\n"))
        .stdout(predicate::str::contains("Completed 4 statements"));
}

#[test]
fn test_run_continuation_lines() {
    let sheet = TestSheet::new("def double(x):\n    return x * 2\n\ndouble(21)");
    vesta()
        .args(["run", sheet.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            ">>> def double(x):\n...     return x * 2\n",
        ))
        .stdout(predicate::str::contains(">>> double(21)\n42\n"));
}

#[test]
fn test_run_reports_execution_error() {
    let sheet = TestSheet::new("x = 1\n1/0\nx");
    vesta()
        .args(["run", sheet.path()])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "ZeroDivisionError: integer division or modulo by zero",
        ))
        .stderr(predicate::str::contains("Execution stopped at line 2"));
}

#[test]
fn test_run_until_line() {
    let sheet = TestSheet::new("1 + 1\n2 + 2\n3 + 3");
    vesta()
        .args(["run", sheet.path(), "--until-line", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains(">>> 2 + 2\n4\n"))
        .stdout(predicate::str::contains(">>> 3 + 3\n6").not())
        .stdout(predicate::str::contains("Partial 2 of 3 statements"));
}

#[test]
fn test_run_timeout_interrupts() {
    let sheet = TestSheet::new("x = 0\nwhile True:\n    x += 1\n");
    vesta()
        .args(["run", sheet.path(), "--timeout", "0.5"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Interrupted"))
        .stderr(predicate::str::contains("Timed out"));
}

#[test]
fn test_run_rejects_bad_timeout() {
    let sheet = TestSheet::new("1");
    vesta()
        .args(["run", sheet.path(), "--timeout", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Timeout must be a positive"));
}

#[test]
fn test_run_with_config() {
    let sheet = TestSheet::new("def f():\n    return [][0]\nf()");
    let config = sheet.sibling("vesta.json", r#"{"traceback": {"placeholder": "<cell>"}}"#);
    vesta()
        .args(["run", sheet.path(), "--config", &config])
        .assert()
        .failure()
        .stdout(predicate::str::contains("File \"<cell>\", line 2, in f"));
}

#[test]
fn test_run_with_invalid_config() {
    let sheet = TestSheet::new("1");
    let config = sheet.sibling("vesta.json", "{ not json");
    vesta()
        .args(["run", sheet.path(), "--config", &config])
        .assert()
        .failure()
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_run_empty_worksheet() {
    let sheet = TestSheet::new("");
    vesta()
        .args(["run", sheet.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed 0 statements"));
}

// =============================================================================
// Check Command Tests
// =============================================================================

#[test]
fn test_check_valid_worksheet() {
    let sheet = TestSheet::new("from __future__ import division\nx = 1/2\n# note\nx\n");
    vesta()
        .args(["check", sheet.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK 3 statements compiled"));
}

#[test]
fn test_check_reports_positions() {
    let sheet = TestSheet::new("a = 1\n\nb = (\nc = 2\n");
    vesta()
        .args(["check", sheet.path()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("sheet.vws:3"))
        .stderr(predicate::str::contains("1 of 3 statements failed to compile"));
}

#[test]
fn test_check_does_not_execute() {
    let sheet = TestSheet::new("print 'side effect'\n1/0\n");
    vesta()
        .args(["check", sheet.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("side effect").not());
}
