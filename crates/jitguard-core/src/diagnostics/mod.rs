//! Fatal-path diagnostics.
//!
//! - `report` - report contents, rendering and durable writes
//! - `emitter` - banner, termination hooks and process exit

mod emitter;
mod report;

pub use emitter::{DiagnosticEmitter, FATAL_EXIT_CODE, TerminationHook, fatal_banner};
pub use report::{DiagnosticReport, REPORT_PREFIX};
