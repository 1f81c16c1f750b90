//! Container lifecycle events carried on the `container-lifecycle` topic.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The closed set of lifecycle event kinds this platform reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Started,
    Stopped,
    Deleted,
}

impl EventKind {
    /// Parse the wire name; `None` means an unknown kind the caller
    /// should log and skip.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "container.created" => Some(Self::Created),
            "container.started" => Some(Self::Started),
            "container.stopped" => Some(Self::Stopped),
            "container.deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "container.created",
            Self::Started => "container.started",
            Self::Stopped => "container.stopped",
            Self::Deleted => "container.deleted",
        }
    }
}

/// One message on the event stream.
///
/// Events for the same container share a partition key, so per-container
/// ordering is preserved end to end. The `event` field is kept as the raw
/// wire string so unknown kinds can be logged verbatim; [`Self::kind`]
/// gives the typed view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event: String,
    pub container_id: String,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub container_ip: Option<String>,
    pub image_id: i64,
    #[serde(default)]
    pub internal_port: Option<u16>,
    #[serde(default)]
    pub external_port: Option<u16>,
    #[serde(default)]
    pub app_hostname: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_utc_opt")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LifecycleEvent {
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event)
    }

    /// Schema check beyond what serde enforces: a usable event always
    /// names its container.
    pub fn validate(&self) -> Result<(), String> {
        if self.container_id.trim().is_empty() {
            return Err("container_id is empty".to_string());
        }
        Ok(())
    }

    /// Event timestamp, falling back to the wall clock when the producer
    /// omitted one.
    pub fn timestamp_or_now(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}

/// Accept RFC 3339 timestamps with an offset, or naive timestamps which
/// are coerced to UTC on read.
fn deserialize_utc_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else { return Ok(None) };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, format) {
            return Ok(Some(naive.and_utc()));
        }
    }
    Err(serde::de::Error::custom(format!(
        "unrecognized timestamp: {raw}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> LifecycleEvent {
        serde_json::from_str(json).expect("event should decode")
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            EventKind::Created,
            EventKind::Started,
            EventKind::Stopped,
            EventKind::Deleted,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("container.paused"), None);
    }

    #[test]
    fn test_decode_full_event() {
        let event = decode(
            r#"{
                "event": "container.created",
                "container_id": "c-1",
                "container_name": "demo-1",
                "container_ip": "172.19.0.5",
                "image_id": 7,
                "internal_port": 80,
                "external_port": 30001,
                "app_hostname": "demo",
                "user_id": 42,
                "timestamp": "2026-01-01T00:00:00Z"
            }"#,
        );
        assert_eq!(event.kind(), Some(EventKind::Created));
        assert_eq!(event.container_id, "c-1");
        assert_eq!(event.external_port, Some(30001));
        assert_eq!(event.user_id, Some(42));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_decode_minimal_event() {
        let event = decode(r#"{"event": "container.stopped", "container_id": "c-2", "image_id": 1}"#);
        assert_eq!(event.kind(), Some(EventKind::Stopped));
        assert!(event.user_id.is_none());
        assert!(event.timestamp.is_none());
    }

    #[test]
    fn test_naive_timestamp_is_coerced_to_utc() {
        let event = decode(
            r#"{"event": "container.started", "container_id": "c", "image_id": 1,
                "timestamp": "2026-01-01T10:30:00"}"#,
        );
        let ts = event.timestamp.expect("timestamp parsed");
        assert_eq!(ts.to_rfc3339(), "2026-01-01T10:30:00+00:00");
    }

    #[test]
    fn test_offset_timestamp_is_converted() {
        let event = decode(
            r#"{"event": "container.started", "container_id": "c", "image_id": 1,
                "timestamp": "2026-01-01T10:30:00+02:00"}"#,
        );
        let ts = event.timestamp.expect("timestamp parsed");
        assert_eq!(ts.to_rfc3339(), "2026-01-01T08:30:00+00:00");
    }

    #[test]
    fn test_validate_rejects_blank_container() {
        let event = decode(r#"{"event": "container.created", "container_id": "  ", "image_id": 1}"#);
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let event = decode(r#"{"event": "container.paused", "container_id": "c", "image_id": 1}"#);
        assert_eq!(event.kind(), None);
        assert_eq!(event.event, "container.paused");
    }
}
