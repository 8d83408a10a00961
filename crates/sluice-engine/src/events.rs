//! Event emission.
//!
//! Runner events are broadcast to subscribers. Each subscriber has an
//! independent buffer; a lagging subscriber loses the oldest events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sluice_types::events::{EngineEvent, Event};
use tokio::sync::broadcast;

/// Fan-out of runner events with a shared sequence counter.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer; zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stamp `body` and send it to all subscribers.
    pub fn emit(&self, timestamp: u64, body: EngineEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        if body.is_failure() {
            tracing::warn!(sequence, event = ?body, "runner failure signal");
        } else {
            tracing::trace!(sequence, event = ?body, "runner event");
        }
        // Err only means nobody is listening.
        let _ = self.sender.send(Event {
            sequence,
            timestamp,
            body,
        });
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

/// Subscriber-side selection of events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "lifecycle", "ledger", "run", "admin".
    pub categories: Option<Vec<String>>,
    /// Only pass failure signals.
    #[serde(default)]
    pub failures_only: bool,
}

impl EventFilter {
    /// Only failure signals, from any category.
    pub fn failures() -> Self {
        Self {
            categories: None,
            failures_only: true,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        let body = &event.body;
        let category_ok = self
            .categories
            .as_ref()
            .map_or(true, |cats| cats.iter().any(|c| c == body.category()));
        category_ok && (!self.failures_only || body.is_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_types::Address;

    #[test]
    fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(1000, EngineEvent::PerformanceFeeSet { bps: 100 });

        let event = rx.try_recv().expect("receive event");
        assert_eq!(event.sequence, 1);
        assert_eq!(event.timestamp, 1000);
        assert_eq!(event.body, EngineEvent::PerformanceFeeSet { bps: 100 });
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(0);
        bus.emit(1, EngineEvent::TreasurySet {
            treasury: Address::repeat_byte(1),
        });
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter {
            categories: Some(vec!["run".to_string()]),
            failures_only: true,
        };

        let failed = Event {
            sequence: 1,
            timestamp: 0,
            body: EngineEvent::FeeFailed {
                block: 0,
                token: Address::repeat_byte(2),
                amount: 5,
                reason: "no allowance".to_string(),
            },
        };
        assert!(filter.matches(&failed));

        let completed = Event {
            sequence: 2,
            timestamp: 0,
            body: EngineEvent::RunCompleted {
                run: 1,
                snapshot: 1,
                failures: 0,
            },
        };
        assert!(!filter.matches(&completed));

        let withdraw_failed = Event {
            sequence: 3,
            timestamp: 0,
            body: EngineEvent::WithdrawFailed {
                user: Address::repeat_byte(3),
                block: 1,
                reason: "paused".to_string(),
            },
        };
        assert!(!filter.matches(&withdraw_failed));
        assert!(EventFilter::failures().matches(&withdraw_failed));
        assert!(!EventFilter::failures().matches(&completed));
    }
}
