//! Event-bus consumer loop.
//!
//! Each consuming service runs one [`EventConsumer`] under its own group
//! id, so the registry and the billing ledger each see the full stream.
//! Delivery is at-least-once with auto-commit; handlers must be
//! idempotent. Poison messages (bad JSON, schema violations, unknown
//! kinds) are logged and skipped so they never wedge the group.

use crate::event::{EventKind, LifecycleEvent};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

pub const LIFECYCLE_TOPIC: &str = "container-lifecycle";

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// Where decoded lifecycle events get delivered.
///
/// Handlers log their own failures and return; the at-least-once replay
/// from the committed offset is the retry mechanism.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_created(&self, event: &LifecycleEvent);
    async fn on_started(&self, event: &LifecycleEvent);
    async fn on_stopped(&self, event: &LifecycleEvent);
    async fn on_deleted(&self, event: &LifecycleEvent);
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub topic: String,
}

impl ConsumerConfig {
    pub fn new(bootstrap_servers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            group_id: group_id.into(),
            topic: LIFECYCLE_TOPIC.to_string(),
        }
    }
}

/// Counters exposed on the owning service's health payload.
#[derive(Debug, Default)]
pub struct ConsumerCounters {
    messages: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl ConsumerCounters {
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

pub struct EventConsumer {
    consumer: StreamConsumer,
    counters: Arc<ConsumerCounters>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
    group_id: String,
}

impl EventConsumer {
    pub fn new(
        config: &ConsumerConfig,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> Result<Self, ConsumerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("session.timeout.ms", "6000")
            .create()?;
        consumer.subscribe(&[config.topic.as_str()])?;

        Ok(Self {
            consumer,
            counters: Arc::new(ConsumerCounters::default()),
            shutdown_rx,
            group_id: config.group_id.clone(),
        })
    }

    pub fn counters(&self) -> Arc<ConsumerCounters> {
        self.counters.clone()
    }

    /// Drive the consumer until shutdown is signaled. An in-flight
    /// handler finishes before the loop exits.
    pub async fn run<H: EventHandler>(mut self, handler: Arc<H>) {
        info!(group_id = %self.group_id, topic = LIFECYCLE_TOPIC, "event consumer started");

        loop {
            tokio::select! {
                received = self.consumer.recv() => {
                    match received {
                        Ok(message) => self.process(&message, handler.as_ref()).await,
                        Err(e) => {
                            error!(group_id = %self.group_id, error = %e, "event consumer poll failed");
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(group_id = %self.group_id, "event consumer stopped");
    }

    async fn process<H: EventHandler + ?Sized>(&self, message: &BorrowedMessage<'_>, handler: &H) {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);

        let Some(payload) = message.payload() else {
            warn!(group_id = %self.group_id, "event with empty payload skipped");
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match decode(payload) {
            Ok(event) => {
                dispatch(&event, handler).await;
                match event.kind() {
                    Some(_) => self.counters.processed.fetch_add(1, Ordering::Relaxed),
                    None => self.counters.skipped.fetch_add(1, Ordering::Relaxed),
                };
            }
            Err(reason) => {
                let preview = String::from_utf8_lossy(&payload[..payload.len().min(200)]);
                error!(
                    group_id = %self.group_id,
                    error = %reason,
                    payload = %preview,
                    "poison event skipped"
                );
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn decode(payload: &[u8]) -> Result<LifecycleEvent, String> {
    let event: LifecycleEvent =
        serde_json::from_slice(payload).map_err(|e| format!("decode failed: {e}"))?;
    event.validate()?;
    Ok(event)
}

/// Dispatch one decoded event to its handler method.
pub async fn dispatch<H: EventHandler + ?Sized>(event: &LifecycleEvent, handler: &H) {
    match event.kind() {
        Some(EventKind::Created) => handler.on_created(event).await,
        Some(EventKind::Started) => handler.on_started(event).await,
        Some(EventKind::Stopped) => handler.on_stopped(event).await,
        Some(EventKind::Deleted) => handler.on_deleted(event).await,
        None => {
            warn!(
                event = %event.event,
                container_id = %event.container_id,
                "unknown event kind skipped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn record(&self, name: &str, event: &LifecycleEvent) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{name}:{}", event.container_id));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn on_created(&self, event: &LifecycleEvent) {
            self.record("created", event);
        }
        async fn on_started(&self, event: &LifecycleEvent) {
            self.record("started", event);
        }
        async fn on_stopped(&self, event: &LifecycleEvent) {
            self.record("stopped", event);
        }
        async fn on_deleted(&self, event: &LifecycleEvent) {
            self.record("deleted", event);
        }
    }

    fn event(kind: &str, container_id: &str) -> LifecycleEvent {
        serde_json::from_str(&format!(
            r#"{{"event": "{kind}", "container_id": "{container_id}", "image_id": 1}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_routes_each_kind() {
        let handler = RecordingHandler::default();

        dispatch(&event("container.created", "a"), &handler).await;
        dispatch(&event("container.started", "b"), &handler).await;
        dispatch(&event("container.stopped", "c"), &handler).await;
        dispatch(&event("container.deleted", "d"), &handler).await;

        assert_eq!(
            handler.calls(),
            vec!["created:a", "started:b", "stopped:c", "deleted:d"]
        );
    }

    #[tokio::test]
    async fn test_dispatch_skips_unknown_kind() {
        let handler = RecordingHandler::default();
        dispatch(&event("container.paused", "x"), &handler).await;
        assert!(handler.calls().is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(decode(b"{not json").is_err());
    }

    #[test]
    fn test_decode_rejects_schema_violation() {
        // Missing container_id entirely.
        assert!(decode(br#"{"event": "container.created", "image_id": 1}"#).is_err());
        // Present but blank.
        assert!(decode(br#"{"event": "container.created", "container_id": " ", "image_id": 1}"#).is_err());
    }

    #[test]
    fn test_decode_accepts_valid_event() {
        let event =
            decode(br#"{"event": "container.created", "container_id": "c1", "image_id": 3}"#)
                .unwrap();
        assert_eq!(event.kind(), Some(EventKind::Created));
    }
}
