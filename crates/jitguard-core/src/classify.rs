//! Fault classification for provider failures.
//!
//! The classifier is a pure function of the failure and the broker config.
//! The single `compile_method_exception_is_fatal` flag is the whole policy.

use std::fmt;

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::frames::{ProviderError, StackFrame};

/// Where in the broker a provider failure surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The factory failed while building a compiler.
    CreateCompiler,
    /// An existing compiler failed while compiling a method.
    Compile,
}

/// A single failed provider invocation.
///
/// Created by the broker and consumed immediately by the classifier.
#[derive(Debug)]
pub struct FailureRecord {
    /// Provider the failure came from.
    pub provider: String,
    /// 1-based attempt number for the provider.
    pub attempt: u32,
    pub stage: FailureStage,
    pub cause: ProviderError,
    /// Triggering stack, innermost frame first.
    pub stack: Vec<StackFrame>,
    /// Name of the thread that observed the failure.
    pub thread: String,
    /// Set once the classifier picks the fatal branch.
    pub fatal: bool,
}

impl FailureRecord {
    /// Convert into a plain error value.
    pub fn into_error(self) -> Error {
        Error::ProviderConstruction {
            provider: self.provider,
            attempt: self.attempt,
            message: self.cause.to_string(),
        }
    }
}

/// Outcome of classifying a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Drop this compilation and keep running.
    Skip,
    /// Write diagnostics and terminate the process.
    Fatal,
}

/// Classify a failure under the given configuration.
pub fn classify(_record: &FailureRecord, config: &BrokerConfig) -> Classification {
    if config.compile_method_exception_is_fatal {
        Classification::Fatal
    } else {
        Classification::Skip
    }
}

/// Lifecycle of one compile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Invoking,
    Compiled,
    Skipped,
    Fatal,
}

impl RequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Invoking => "invoking",
            Self::Compiled => "compiled",
            Self::Skipped => "skipped",
            Self::Fatal => "fatal",
        }
    }

    /// Whether no further transition is allowed for this request.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Compiled | Self::Skipped | Self::Fatal)
    }

    /// Move to `next`, rejecting transitions the broker never makes.
    pub fn transition(self, next: RequestState) -> Result<RequestState> {
        let allowed = matches!(
            (self, next),
            (Self::Idle, Self::Invoking)
                | (Self::Invoking, Self::Compiled)
                | (Self::Invoking, Self::Skipped)
                | (Self::Invoking, Self::Fatal)
        );
        if allowed {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }

    /// State reached after classifying a failure.
    pub fn after(classification: Classification) -> RequestState {
        match classification {
            Classification::Skip => Self::Skipped,
            Classification::Fatal => Self::Fatal,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
