//! Error types for jitguard-core.

use std::time::Duration;

use thiserror::Error;

/// Result type for jitguard-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in jitguard-core.
///
/// Provider construction failures are not surfaced through this type during
/// normal dispatch: the broker always hands them to the fault classifier.
/// `ProviderConstruction` exists for callers that want to turn a
/// [`FailureRecord`](crate::FailureRecord) into an ordinary error.
#[derive(Debug, Error)]
pub enum Error {
    /// A provider with this name is already registered.
    #[error("duplicate provider: {0}")]
    DuplicateProvider(String),

    /// No provider is registered under this name.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// A provider failed while building a compiler instance.
    #[error("provider {provider} failed to create a compiler (attempt {attempt}): {message}")]
    ProviderConstruction {
        provider: String,
        attempt: u32,
        message: String,
    },

    /// Invalid configuration value or key.
    #[error("configuration error: {0}")]
    Config(String),

    /// Waiting for completion exceeded the deadline.
    #[error("timed out after {0:?} waiting for completion")]
    Timeout(Duration),

    /// A compile request attempted an illegal state transition.
    #[error("invalid request state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render the error together with a short recovery hint.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::DuplicateProvider(_) => {
                Some("each provider must expose a unique compiler name")
            }
            Self::ProviderNotFound(_) => {
                Some("run `jitguard list` to see the registered providers")
            }
            Self::Config(_) => Some(
                "properties are passed as -D key=value; booleans accept true/false",
            ),
            Self::Timeout(_) => Some("raise --timeout-ms or lower --signal-after"),
            Self::ProviderConstruction { .. } | Self::InvalidTransition { .. } | Self::Io(_) => {
                None
            }
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}
