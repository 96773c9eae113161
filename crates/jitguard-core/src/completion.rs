//! Completion signalling between providers and host loops.
//!
//! A host that waits for "enough compilations have happened" blocks on a
//! [`CompletionSignal`] with a deadline. Providers hold a clone and call
//! [`CompletionSignal::notify`] when the condition is reached.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// One-shot, cloneable completion flag with timed waits.
///
/// ```
/// use std::time::Duration;
/// use jitguard_core::CompletionSignal;
///
/// let signal = CompletionSignal::new();
/// let notifier = signal.clone();
/// std::thread::spawn(move || notifier.notify());
///
/// signal.wait_timeout(Duration::from_secs(5)).unwrap();
/// assert!(signal.is_complete());
/// ```
#[derive(Clone, Default)]
pub struct CompletionSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark completion and wake every waiter. Later calls are no-ops.
    pub fn notify(&self) {
        let (lock, cvar) = &*self.inner;
        let mut done = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !*done {
            *done = true;
            cvar.notify_all();
        }
    }

    /// Check completion without blocking.
    pub fn is_complete(&self) -> bool {
        let (lock, _) = &*self.inner;
        match lock.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block until completion or until `timeout` elapses.
    ///
    /// Returns [`Error::Timeout`] when the deadline passes first.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut done = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(timeout));
            }
            done = match cvar.wait_timeout(done, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("complete", &self.is_complete())
            .finish()
    }
}
