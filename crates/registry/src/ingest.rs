//! Lifecycle-event ingestion into the registry.
//!
//! Created events register, deleted events deregister; started and
//! stopped only move the probe status. Handlers are idempotent because
//! the stream is at-least-once.

use crate::backend::{Backend, HealthStatus};
use crate::store::RegistryStore;
use async_trait::async_trait;
use chrono::Utc;
use lifecycle::{EventHandler, LifecycleEvent};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RegistryEventHandler {
    store: Arc<RegistryStore>,
    /// Fallback address when the event carries no container ip.
    default_address: String,
}

impl RegistryEventHandler {
    pub fn new(store: Arc<RegistryStore>, default_address: String) -> Self {
        Self {
            store,
            default_address,
        }
    }

    fn backend_from_event(&self, event: &LifecycleEvent) -> Option<Backend> {
        let app_hostname = match event.app_hostname.as_deref() {
            Some(h) if !h.is_empty() => lifecycle::normalize(h),
            _ => {
                warn!(
                    container_id = %event.container_id,
                    "created event without app_hostname dropped"
                );
                return None;
            }
        };
        let Some(external_port) = event.external_port else {
            warn!(
                container_id = %event.container_id,
                "created event without external_port dropped"
            );
            return None;
        };

        Some(Backend {
            container_id: event.container_id.clone(),
            address: event
                .container_ip
                .clone()
                .unwrap_or_else(|| self.default_address.clone()),
            internal_port: event.internal_port.unwrap_or(external_port),
            external_port,
            image_id: event.image_id,
            user_id: event.user_id,
            app_hostname,
            health: HealthStatus::Passing,
            registered_at: Utc::now(),
        })
    }
}

#[async_trait]
impl EventHandler for RegistryEventHandler {
    async fn on_created(&self, event: &LifecycleEvent) {
        if let Some(backend) = self.backend_from_event(event) {
            self.store.register(backend);
        }
    }

    async fn on_started(&self, event: &LifecycleEvent) {
        if self
            .store
            .set_health(&event.container_id, HealthStatus::Passing)
        {
            info!(container_id = %event.container_id, "backend marked passing on start");
        }
    }

    async fn on_stopped(&self, event: &LifecycleEvent) {
        if self
            .store
            .set_health(&event.container_id, HealthStatus::Critical)
        {
            info!(container_id = %event.container_id, "backend marked critical on stop");
        }
    }

    async fn on_deleted(&self, event: &LifecycleEvent) {
        self.store.deregister(&event.container_id);
    }
}
