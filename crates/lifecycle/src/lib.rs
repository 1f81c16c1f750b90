// Shared domain vocabulary for the shipway data plane.

pub mod consumer;
pub mod event;
pub mod hostname;

pub use consumer::{ConsumerConfig, ConsumerCounters, EventConsumer, EventHandler};
pub use event::{EventKind, LifecycleEvent};
pub use hostname::{normalize, AppHostname, HostnameError};
