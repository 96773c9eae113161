//! Fault-isolating compiler provider broker.
//!
//! This crate provides:
//! - Provider registry with locator-based discovery
//! - Compiler acquisition behind a panic boundary
//! - Fault classification (skip or fatal) driven by configuration
//! - Durable diagnostic reports for fatal provider failures
//! - Completion signalling for host loops

pub mod broker;
pub mod classify;
pub mod completion;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod frames;
pub mod provider;
pub mod registry;

pub use broker::{Acquisition, Attempt, BrokerStats, CompileBroker, CompileOutcome, SkipReason};
pub use classify::{Classification, FailureRecord, FailureStage, RequestState, classify};
pub use completion::CompletionSignal;
pub use config::BrokerConfig;
pub use diagnostics::{DiagnosticEmitter, DiagnosticReport, FATAL_EXIT_CODE};
pub use error::{Error, Result};
pub use events::{BrokerEvent, EventLog};
pub use frames::{ProviderError, StackFrame};
pub use provider::{
    AcquireContext, CompileRequest, CompiledMethod, Compiler, CompilerFactory,
    ProviderDescriptor, ProviderLocator,
};
pub use registry::ProviderRegistry;
