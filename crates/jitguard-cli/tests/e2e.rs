//! End-to-end tests for the jitguard host.
//!
//! These spawn the binary so the fatal branch can terminate a real process.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const FATAL_ENV: &str = "JITGUARD_COMPILE_METHOD_EXCEPTION_IS_FATAL";

// =============================================================================
// Test Helpers
// =============================================================================

fn jitguard(work_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("jitguard").expect("Failed to find jitguard binary");
    cmd.current_dir(work_dir.path())
        .env_remove(FATAL_ENV)
        .env_remove("JITGUARD_COMPILER");
    cmd
}

/// Pull the report path out of the fatal banner.
fn report_path_from(stderr: &str) -> PathBuf {
    let mut lines = stderr.lines();
    lines
        .by_ref()
        .find(|line| line.contains("error report file with more information is saved as:"))
        .expect("banner does not name a report file");
    let path = lines.next().expect("report path line missing");
    PathBuf::from(path.trim_start_matches('#').trim())
}

fn report_files(dir: &TempDir) -> Vec<PathBuf> {
    fs::read_dir(dir.path())
        .expect("Failed to read work dir")
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("jitguard_err_pid"))
        })
        .collect()
}

// =============================================================================
// Non-fatal branch
// =============================================================================

#[test]
fn test_error_compiler_skips_and_exits_zero() {
    let work = TempDir::new().expect("Failed to create temp directory");

    jitguard(&work)
        .args([
            "run",
            "--compiler",
            "ErrorCompiler",
            "-D",
            "compileMethodExceptionIsFatal=false",
            "--interval-ms",
            "1",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "COMPILE SKIPPED: uncaught exception in compile_method [ErrorCompiler:",
        ))
        .stderr(predicate::str::contains("CompilerCreationError"))
        .stdout(predicate::str::contains("processed"));

    assert!(report_files(&work).is_empty());
}

#[test]
fn test_panic_compiler_is_contained() {
    let work = TempDir::new().expect("Failed to create temp directory");

    jitguard(&work)
        .args([
            "run",
            "--compiler",
            "PanicCompiler",
            "--signal-after",
            "3",
            "--interval-ms",
            "1",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("uncaught exception"))
        .stderr(predicate::str::contains("compiler creation panicked"));
}

#[test]
fn test_baseline_compiler_print_compilation() {
    let work = TempDir::new().expect("Failed to create temp directory");

    jitguard(&work)
        .args([
            "run",
            "--compiler",
            "BaselineCompiler",
            "--signal-after",
            "3",
            "--interval-ms",
            "1",
            "--print-compilation",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("host::HotLoop::tick#1"))
        .stdout(predicate::str::contains("skipped 0"))
        .stderr(predicate::str::contains("COMPILE SKIPPED").not());
}

#[test]
fn test_request_budget_ends_run() {
    let work = TempDir::new().expect("Failed to create temp directory");

    jitguard(&work)
        .args([
            "run",
            "--compiler",
            "BaselineCompiler",
            "--requests",
            "3",
            "--signal-after",
            "0",
            "--interval-ms",
            "1",
            "--timeout-ms",
            "5000",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "processed 3 requests (compiled 3, skipped 0)",
        ));
}

#[test]
fn test_request_budget_json_summary() {
    let work = TempDir::new().expect("Failed to create temp directory");

    let output = jitguard(&work)
        .args([
            "run",
            "--compiler",
            "ErrorCompiler",
            "--requests",
            "4",
            "--signal-after",
            "0",
            "--interval-ms",
            "1",
            "--json",
        ])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let summary: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("run output is not JSON");
    assert_eq!(summary["submitted"], 4);
    assert_eq!(summary["compiled"], 0);
    assert_eq!(summary["skipped"], 4);
    assert!(summary["elapsed_secs"].is_f64());
    assert!(report_files(&work).is_empty());
}

// =============================================================================
// Fatal branch
// =============================================================================

#[test]
fn test_error_compiler_fatal_writes_report() {
    let work = TempDir::new().expect("Failed to create temp directory");

    let output = jitguard(&work)
        .args([
            "run",
            "--compiler",
            "ErrorCompiler",
            "-D",
            "compileMethodExceptionIsFatal=true",
        ])
        .output()
        .expect("Failed to execute command");

    assert_eq!(output.status.code(), Some(134));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("# A fatal error has been detected"), "{stderr}");

    let report_path = report_path_from(&stderr);
    assert!(report_path.exists(), "missing report at {}", report_path.display());
    assert_eq!(report_files(&work).len(), 1);

    let report = fs::read_to_string(&report_path).expect("Failed to read report");
    for expected in [
        "ErrorCompilerFactory::create_compiler(",
        "providers.rs:",
        "at jitguard_core::broker::CompileBroker::get_compiler(",
        "at jitguard_core::broker::CompileBroker::compile_method(",
        "CompilerCreationError: attempt 1",
        "Current thread: compile-worker",
    ] {
        assert!(report.contains(expected), "report lacks {expected:?}:\n{report}");
    }
}

#[test]
fn test_fatal_from_environment_and_report_dir() {
    let work = TempDir::new().expect("Failed to create temp directory");
    let reports = TempDir::new().expect("Failed to create temp directory");

    let output = jitguard(&work)
        .env(FATAL_ENV, "true")
        .args(["run", "--compiler", "PanicCompiler", "--report-dir"])
        .arg(reports.path())
        .output()
        .expect("Failed to execute command");

    assert_eq!(output.status.code(), Some(134));
    assert_eq!(report_files(&reports).len(), 1);
    assert!(report_files(&work).is_empty());

    let report = fs::read_to_string(&report_files(&reports)[0]).unwrap();
    assert!(report.contains("PanicCompilerFactory::create_compiler("));
    assert!(report.contains("panic: compiler creation panicked (attempt 1)"));
}

// =============================================================================
// Errors and listing
// =============================================================================

#[test]
fn test_timeout_exits_with_distinct_code() {
    let work = TempDir::new().expect("Failed to create temp directory");

    jitguard(&work)
        .args([
            "run",
            "--compiler",
            "ErrorCompiler",
            "--signal-after",
            "0",
            "--timeout-ms",
            "200",
            "--interval-ms",
            "10",
        ])
        .assert()
        .code(124)
        .stderr(predicate::str::contains("timed out"));
}

#[test]
fn test_unknown_compiler() {
    let work = TempDir::new().expect("Failed to create temp directory");

    jitguard(&work)
        .args(["run", "--compiler", "NoSuchCompiler"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("provider not found: NoSuchCompiler"));
}

#[test]
fn test_bad_property() {
    let work = TempDir::new().expect("Failed to create temp directory");

    jitguard(&work)
        .args([
            "run",
            "--compiler",
            "ErrorCompiler",
            "-D",
            "compileMethodExceptionIsFatal=perhaps",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("expects true or false"));
}

#[test]
fn test_no_compiler_selected() {
    let work = TempDir::new().expect("Failed to create temp directory");

    jitguard(&work)
        .args(["run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no compiler selected"));
}

#[test]
fn test_list_json() {
    let work = TempDir::new().expect("Failed to create temp directory");

    let output = jitguard(&work)
        .args(["list", "--json"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let providers: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("list output is not JSON");
    let names: Vec<&str> = providers
        .as_array()
        .expect("expected an array")
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    assert_eq!(names, vec!["ErrorCompiler", "PanicCompiler", "BaselineCompiler"]);
}
