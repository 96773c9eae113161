//! Bounded log of recent compile broker events.
//!
//! Diagnostic reports include the tail of this log so a fatal failure comes
//! with the acquisitions and skips that led up to it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One recorded broker event.
#[derive(Debug, Clone)]
pub struct BrokerEvent {
    /// Time since the log was created.
    pub elapsed: Duration,
    pub thread: String,
    pub message: String,
}

impl std::fmt::Display for BrokerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Event: {:.3} Thread {} {}",
            self.elapsed.as_secs_f64(),
            self.thread,
            self.message
        )
    }
}

/// Ring buffer of broker events.
pub struct EventLog {
    start: Instant,
    capacity: usize,
    events: Mutex<VecDeque<BrokerEvent>>,
}

impl EventLog {
    /// Create a log that keeps at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            start: Instant::now(),
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Time the log was created.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Record an event from the current thread.
    pub fn record(&self, message: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }

        let event = BrokerEvent {
            elapsed: self.start.elapsed(),
            thread: current_thread_name(),
            message: message.into(),
        };

        // A poisoned log still holds valid events; keep recording.
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Copy of the retained events, oldest first.
    pub fn snapshot(&self) -> Vec<BrokerEvent> {
        match self.events.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Name of the current thread, or its id when unnamed.
pub fn current_thread_name() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drops_oldest() {
        let log = EventLog::new(3);
        for i in 0..5 {
            log.record(format!("event {i}"));
        }

        let messages: Vec<_> = log.snapshot().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let log = EventLog::new(0);
        log.record("ignored");
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn test_event_display() {
        let event = BrokerEvent {
            elapsed: Duration::from_millis(274),
            thread: "compile-worker".to_string(),
            message: "CompilerCreationError: attempt 1".to_string(),
        };
        assert_eq!(
            event.to_string(),
            "Event: 0.274 Thread compile-worker CompilerCreationError: attempt 1"
        );
    }
}
