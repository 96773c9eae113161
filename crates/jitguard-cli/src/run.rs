//! Run command implementation for the jitguard host.
//!
//! Submits compile requests to a compile worker thread on a fixed interval
//! until the selected provider signals completion or the deadline passes.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use jitguard_core::{
    BrokerConfig, BrokerStats, CompileBroker, CompileOutcome, CompileRequest, CompletionSignal,
    Error, ProviderRegistry,
};
use serde::Serialize;

use crate::providers::BuiltinProviders;

/// Options for the host loop.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop submitting after this many requests.
    pub requests: Option<u64>,
    /// Attempt (or compilation) count at which providers signal completion.
    pub signal_after: u32,
    /// Pause between submissions.
    pub interval: Duration,
    /// Deadline for the whole run.
    pub timeout: Duration,
}

/// Counts for a finished run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunSummary {
    pub submitted: u64,
    #[serde(flatten)]
    pub stats: BrokerStats,
    pub elapsed_secs: f64,
}

/// Run the host loop with the configured compiler.
pub fn execute(config: BrokerConfig, options: &RunOptions) -> anyhow::Result<RunSummary> {
    let start = Instant::now();
    let signal = CompletionSignal::new();

    let locator = BuiltinProviders::new(options.signal_after, signal.clone());
    let registry = ProviderRegistry::from_locators(&[&locator])?;
    let broker = Arc::new(CompileBroker::new(registry, config)?);
    tracing::debug!(
        "selected compiler {:?}, fatal on exception: {}",
        broker.config().compiler,
        broker.config().compile_method_exception_is_fatal
    );

    let (tx, rx) = mpsc::channel::<CompileRequest>();
    let worker_broker = broker.clone();
    let worker = thread::Builder::new()
        .name("compile-worker".to_string())
        .spawn(move || -> jitguard_core::Result<()> {
            for request in rx {
                match worker_broker.compile_method(&request)? {
                    CompileOutcome::Compiled(method) => {
                        tracing::debug!("installed {} ({} bytes)", method.method, method.code_size);
                    }
                    CompileOutcome::Skipped(_) => {}
                }
            }
            Ok(())
        })
        .context("failed to spawn compile worker")?;

    let deadline = start + options.timeout;
    let mut submitted = 0u64;

    loop {
        if signal.is_complete() {
            break;
        }
        if Instant::now() >= deadline {
            drop(tx);
            // The worker only drains its queue; joining cannot hang.
            join_worker(worker)?;
            return Err(Error::Timeout(options.timeout).into());
        }
        if options.requests.is_some_and(|limit| submitted >= limit) {
            tracing::debug!("submitted all {} requests", submitted);
            break;
        }

        submitted += 1;
        let request = CompileRequest::new(submitted, format!("host::HotLoop::tick#{submitted}"));
        if tx.send(request).is_err() {
            // Worker exited early; its result is reported below.
            break;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match signal.wait_timeout(options.interval.min(remaining)) {
            Ok(()) => break,
            Err(Error::Timeout(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    // Closing the channel lets the worker finish the queued requests.
    drop(tx);
    join_worker(worker)?;

    Ok(RunSummary {
        submitted,
        stats: broker.stats(),
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

/// Wait for the compile worker and surface its error, if any.
fn join_worker(worker: thread::JoinHandle<jitguard_core::Result<()>>) -> anyhow::Result<()> {
    match worker.join() {
        Ok(result) => Ok(result?),
        Err(_) => anyhow::bail!("compile worker panicked"),
    }
}
