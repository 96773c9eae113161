//! Diagnostic report contents and durable writing.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::classify::{FailureRecord, FailureStage};
use crate::error::Result;
use crate::events::{BrokerEvent, EventLog};
use crate::frames::StackFrame;

/// Prefix of every diagnostic report file name.
pub const REPORT_PREFIX: &str = "jitguard_err_pid";

/// Process state captured at a fatal provider failure.
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub timestamp: SystemTime,
    /// Time since the broker started.
    pub uptime: Duration,
    pub pid: u32,
    pub thread: String,
    pub provider: String,
    pub attempt: u32,
    pub stage: FailureStage,
    /// Rendered failure, `kind: message`.
    pub cause: String,
    /// Innermost frame first.
    pub triggering_stack: Vec<StackFrame>,
    pub native_backtrace: String,
    pub events: Vec<BrokerEvent>,
}

impl DiagnosticReport {
    /// Capture a report for a failure.
    pub fn capture(record: &FailureRecord, events: &EventLog) -> Self {
        Self {
            timestamp: SystemTime::now(),
            uptime: events.start().elapsed(),
            pid: std::process::id(),
            thread: record.thread.clone(),
            provider: record.provider.clone(),
            attempt: record.attempt,
            stage: record.stage,
            cause: record.cause.to_string(),
            triggering_stack: record.stack.clone(),
            native_backtrace: record.cause.backtrace().to_string(),
            events: events.snapshot(),
        }
    }

    /// Report file name for a process id.
    pub fn file_name(pid: u32) -> String {
        format!("{REPORT_PREFIX}{pid}.log")
    }

    /// Render the report as text.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Write the report durably into `dir`, falling back to the system temp
    /// directory when `dir` cannot be written.
    ///
    /// Returns the absolute path of the written file.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let contents = self.render();
        let name = Self::file_name(self.pid);

        let primary = std::path::absolute(dir)?.join(&name);
        match write_durable(&primary, contents.as_bytes()) {
            Ok(()) => Ok(primary),
            Err(e) => {
                tracing::warn!(
                    "cannot write diagnostic report to {}: {}",
                    primary.display(),
                    e
                );
                let fallback = std::env::temp_dir().join(&name);
                write_durable(&fallback, contents.as_bytes())?;
                Ok(fallback)
            }
        }
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.stage {
            FailureStage::CreateCompiler => "create_compiler",
            FailureStage::Compile => "compile",
        };
        let epoch = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        writeln!(f, "#")?;
        writeln!(f, "# A fatal error has been detected by the jitguard runtime:")?;
        writeln!(f, "#")?;
        writeln!(f, "#  Internal Error: uncaught exception in compile_method")?;
        writeln!(f, "#")?;
        writeln!(
            f,
            "# Provider: {} (attempt {}, stage {})",
            self.provider, self.attempt, stage
        )?;
        writeln!(f, "# Cause: {}", self.cause)?;
        writeln!(f, "#")?;
        writeln!(f)?;

        writeln!(f, "---------------  S U M M A R Y  ------------")?;
        writeln!(f)?;
        writeln!(
            f,
            "Time: {epoch:.3} seconds since epoch (uptime {:.3}s)",
            self.uptime.as_secs_f64()
        )?;
        writeln!(f, "Process: pid {}", self.pid)?;
        writeln!(f)?;

        writeln!(f, "---------------  T H R E A D  ---------------")?;
        writeln!(f)?;
        writeln!(f, "Current thread: {}", self.thread)?;
        writeln!(f)?;
        writeln!(f, "Triggering stack (most recent call first):")?;
        writeln!(f, "{}", self.cause)?;
        for frame in &self.triggering_stack {
            writeln!(f, "\t{frame}")?;
        }
        writeln!(f)?;
        writeln!(f, "Native backtrace:")?;
        writeln!(f, "{}", self.native_backtrace)?;
        writeln!(f)?;

        writeln!(f, "---------------  E V E N T S  ---------------")?;
        writeln!(f)?;
        writeln!(f, "Compile broker events ({} events):", self.events.len())?;
        for event in &self.events {
            writeln!(f, "{event}")?;
        }
        Ok(())
    }
}

/// Write, flush and fsync a file and its parent directory.
fn write_durable(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(contents)?;
    file.flush()?;
    file.sync_all()?;

    sync_parent(path);
    Ok(())
}

/// Fsync the directory holding `path` so the new entry survives a crash.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    // Some filesystems refuse fsync on directories; the file itself is synced.
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        tracing::debug!("directory sync failed for {}: {}", parent.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
