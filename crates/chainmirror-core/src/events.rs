//! Downstream notifications emitted by the pipeline.
//!
//! Consumers (notification fan-out, cache invalidation, search indexing)
//! subscribe to an [`EventBus`]. Publishing never blocks and never fails:
//! with no subscribers the event is dropped, and a lagging subscriber loses
//! the oldest events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::activity::Activity;
use crate::types::{DerivedFields, TokenKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MirrorEvent {
    /// A new activity row was recorded.
    ActivityCreated { activity: Activity },
    /// A token's listing, offer or last-sale fields changed.
    TokenChanged { token: TokenKey, derived: DerivedFields },
}

/// Broadcast channel for [`MirrorEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MirrorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: MirrorEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("no subscribers for mirror event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
