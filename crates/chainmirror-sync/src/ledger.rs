//! Activity ledger.
//!
//! One row per transfer, keyed by `(txn, token, quantity, from, to,
//! timestamp)`. Re-delivery of a transfer finds the existing row, refreshes
//! its classification and fills in an order reference that was not known the
//! first time.

use std::sync::Arc;

use tracing::debug;

use chainmirror_core::{
    classify, Activity, ActivityKey, ClassificationInput, EventBus, MarketStore, MirrorError,
    MirrorEvent, OrderRef,
};

pub struct ActivityLedger {
    store: Arc<dyn MarketStore>,
    events: EventBus,
}

impl ActivityLedger {
    pub fn new(store: Arc<dyn MarketStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Record a transfer. Returns the row and whether it was created.
    pub async fn record(
        &self,
        key: ActivityKey,
        input: &ClassificationInput,
        order: Option<OrderRef>,
    ) -> Result<(Activity, bool), MirrorError> {
        let kind = classify(input);
        let (mut activity, created) = self.store.get_or_create_activity(key, kind, order).await?;

        if created {
            debug!(tx = %activity.key.txn_id, token = %activity.key.token, %kind, "activity recorded");
            self.events.publish(MirrorEvent::ActivityCreated {
                activity: activity.clone(),
            });
            return Ok((activity, true));
        }

        let mut dirty = false;
        if activity.kind != kind {
            activity.kind = kind;
            dirty = true;
        }
        if activity.order.is_none() && order.is_some() {
            activity.order = order;
            dirty = true;
        }
        if dirty {
            self.store.update_activity(&activity).await?;
            debug!(tx = %activity.key.txn_id, %kind, "activity reclassified");
        }
        Ok((activity, false))
    }
}
