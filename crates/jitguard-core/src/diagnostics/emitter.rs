//! Fatal diagnostic emission.
//!
//! `emit_fatal` is the only way out of the fatal branch: it writes the
//! report, announces it on stderr, runs termination hooks and exits.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::classify::FailureRecord;
use crate::error::Result;
use crate::events::EventLog;

use super::report::DiagnosticReport;

/// Exit status of a process terminated by a fatal provider failure.
pub const FATAL_EXIT_CODE: i32 = 134;

/// Hook run after the report is written and before the process exits.
///
/// Receives the report path, or `None` when no report could be written.
pub type TerminationHook = Box<dyn FnOnce(Option<&Path>) + Send>;

/// Serializes fatal emission so concurrent failures produce one report.
static FATAL_LOCK: Mutex<()> = Mutex::new(());

/// Writes diagnostic reports and terminates the process on fatal failures.
pub struct DiagnosticEmitter {
    report_dir: PathBuf,
    events: Arc<EventLog>,
    hooks: Mutex<Vec<TerminationHook>>,
}

impl DiagnosticEmitter {
    /// Create an emitter that writes into `report_dir`.
    pub fn new(report_dir: impl Into<PathBuf>, events: Arc<EventLog>) -> Self {
        Self {
            report_dir: report_dir.into(),
            events,
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Register a hook to run on the fatal path. Hooks run in registration order.
    pub fn on_fatal(&self, hook: impl FnOnce(Option<&Path>) + Send + 'static) {
        let mut hooks = match self.hooks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks.push(Box::new(hook));
    }

    /// Capture and durably write the report for `record`.
    pub fn write_report(&self, record: &FailureRecord) -> Result<PathBuf> {
        let report = DiagnosticReport::capture(record, &self.events);
        report.write_to(&self.report_dir)
    }

    /// Write diagnostics for a fatal failure and terminate the process.
    pub fn emit_fatal(&self, record: FailureRecord) -> ! {
        // Held until exit; a second failing thread waits here for the first.
        let _fatal = match FATAL_LOCK.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        tracing::error!(
            "fatal uncaught exception in compile_method [{}: {}] (attempt {})",
            record.provider,
            record.cause,
            record.attempt
        );

        let report_path = match self.write_report(&record) {
            Ok(path) => Some(path),
            Err(e) => {
                eprintln!("# Failed to write diagnostic report: {e}");
                None
            }
        };

        let _ = std::io::stdout().flush();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", fatal_banner(report_path.as_deref()));
        let _ = stderr.flush();
        drop(stderr);

        self.run_hooks(report_path.as_deref());

        std::process::exit(FATAL_EXIT_CODE)
    }

    fn run_hooks(&self, report_path: Option<&Path>) {
        let hooks = match self.hooks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for hook in hooks {
            // A failing hook must not keep the process alive or skip the others.
            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(report_path)));
            if let Err(e) = result {
                tracing::error!("fatal termination hook panicked: {:?}", e);
            }
        }
    }
}

/// Banner printed on stderr when the process is about to terminate.
pub fn fatal_banner(report_path: Option<&Path>) -> String {
    let location = match report_path {
        Some(path) => format!(
            "# An error report file with more information is saved as:\n# {}",
            path.display()
        ),
        None => "# No error report file could be written.".to_string(),
    };

    format!(
        "#\n# A fatal error has been detected by the jitguard runtime:\n#\n\
         #  Internal Error: uncaught exception in compile_method\n#\n{location}\n#"
    )
}
