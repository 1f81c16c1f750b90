//! Lifecycle-event ingestion into the ledger.
//!
//! Created and started both open an interval; stopped and deleted both
//! close one. The ledger's single-active invariant makes replays safe.

use crate::ledger::UsageLedger;
use async_trait::async_trait;
use lifecycle::{EventHandler, LifecycleEvent};
use std::sync::Arc;
use tracing::warn;

pub struct BillingEventHandler {
    ledger: Arc<UsageLedger>,
}

impl BillingEventHandler {
    pub fn new(ledger: Arc<UsageLedger>) -> Self {
        Self { ledger }
    }

    fn handle_started(&self, event: &LifecycleEvent) {
        let Some(user_id) = event.user_id else {
            warn!(
                event = %event.event,
                container_id = %event.container_id,
                "event without user_id dropped"
            );
            return;
        };
        if event.timestamp.is_none() {
            warn!(
                event = %event.event,
                container_id = %event.container_id,
                "event without timestamp, using current time"
            );
        }

        self.ledger.open(
            &event.container_id,
            user_id,
            event.image_id,
            event.timestamp_or_now(),
        );
    }

    fn handle_stopped(&self, event: &LifecycleEvent) {
        if event.timestamp.is_none() {
            warn!(
                event = %event.event,
                container_id = %event.container_id,
                "event without timestamp, using current time"
            );
        }
        self.ledger
            .close(&event.container_id, event.timestamp_or_now());
    }
}

#[async_trait]
impl EventHandler for BillingEventHandler {
    async fn on_created(&self, event: &LifecycleEvent) {
        self.handle_started(event);
    }

    async fn on_started(&self, event: &LifecycleEvent) {
        self.handle_started(event);
    }

    async fn on_stopped(&self, event: &LifecycleEvent) {
        self.handle_stopped(event);
    }

    async fn on_deleted(&self, event: &LifecycleEvent) {
        self.handle_stopped(event);
    }
}
