//! Event types and the in-process event bus
//!
//! The engine reports every committed decision, review action, cooldown and
//! quality score as an [`EngineEvent`]. Hosts subscribe to forward events to
//! dashboards or alerting; nothing inside the engine depends on delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the context field engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A proposal was arbitrated and its outcome committed
    ProposalRecorded {
        company_id: String,
        key: String,
        source: String,
        source_id: String,
        outcome: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A human confirmed a field
    FieldConfirmed {
        company_id: String,
        key: String,
        reviewer: String,
        timestamp: DateTime<Utc>,
    },

    /// A human rejected a field's current value
    FieldRejected {
        company_id: String,
        key: String,
        reviewer: String,
        rejected_source_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A proposal batch engaged the company cooldown
    CooldownEngaged {
        company_id: String,
        seconds: u64,
        timestamp: DateTime<Utc>,
    },

    /// A producer run was scored
    QualityScored {
        company_id: String,
        lab_key: String,
        run_id: String,
        score: u32,
        timestamp: DateTime<Utc>,
    },

    /// A producer run scored markedly below its predecessor
    QualityRegression {
        company_id: String,
        lab_key: String,
        run_id: String,
        previous_score: u32,
        score: u32,
        delta: i64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`EngineEvent`]s
///
/// Cloning the bus shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of receivers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
