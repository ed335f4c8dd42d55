//! Fire-and-forget notification events. The core publishes; the notification
//! collaborator (email, webhook, ...) subscribes. Publishing never blocks and
//! lagging subscribers lose the oldest events.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::domain::SourceState;

#[derive(Debug, Clone, PartialEq)]
pub enum AutomationEvent {
    WeatherStateChanged {
        old: SourceState,
        new: SourceState,
    },
    /// Emitted once per outage, after the configured time spent offline.
    ProlongedOutage {
        offline_since: DateTime<Utc>,
    },
    DecisionChanged {
        group: String,
        old_desired: bool,
        new_desired: bool,
        reason: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AutomationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver to whoever is listening; dropped when nobody is.
    pub fn publish(&self, event: AutomationEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
