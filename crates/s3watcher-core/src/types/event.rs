//! Decoded object events handed to the consumer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification of an object mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Removed,
    Other,
}

impl EventKind {
    /// Classify a record event name such as `ObjectCreated:Put`.
    ///
    /// The `s3:` prefix used in notification configurations is accepted too.
    pub fn from_event_name(name: &str) -> Self {
        let name = name.strip_prefix("s3:").unwrap_or(name);
        if name.starts_with("ObjectCreated:") {
            EventKind::Created
        } else if name.starts_with("ObjectRemoved:") {
            EventKind::Removed
        } else {
            EventKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Removed => "removed",
            EventKind::Other => "other",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object mutation observed on the watched bucket.
///
/// `bucket` and `key` are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Event {
    pub kind: EventKind,
    /// Event name as sent by the backend, e.g. `ObjectCreated:Put`
    pub event_name: String,
    pub bucket: String,
    /// Object key, already URL-decoded
    pub key: String,
    /// Object size in bytes; absent for removals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Content checksum (ETag)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Backend ordering token, unique per key mutation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequencer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl S3Event {
    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

impl std::fmt::Display for S3Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.kind,
            self.uri()
        )?;
        if let Some(size) = self.size {
            write!(f, " ({} bytes)", size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_event_name() {
        assert_eq!(EventKind::from_event_name("ObjectCreated:Put"), EventKind::Created);
        assert_eq!(
            EventKind::from_event_name("ObjectCreated:CompleteMultipartUpload"),
            EventKind::Created
        );
        assert_eq!(
            EventKind::from_event_name("s3:ObjectRemoved:DeleteMarkerCreated"),
            EventKind::Removed
        );
        assert_eq!(
            EventKind::from_event_name("ObjectRestore:Completed"),
            EventKind::Other
        );
        assert_eq!(EventKind::from_event_name("ObjectCreatedPut"), EventKind::Other);
    }

    #[test]
    fn test_display() {
        let event = S3Event {
            kind: EventKind::Created,
            event_name: "ObjectCreated:Put".into(),
            bucket: "b".into(),
            key: "logs/a.txt".into(),
            size: Some(42),
            timestamp: DateTime::parse_from_rfc3339("2024-01-02T03:04:05.678Z")
                .unwrap()
                .with_timezone(&Utc),
            version_id: None,
            checksum: None,
            sequencer: None,
            region: None,
        };
        assert_eq!(
            event.to_string(),
            "2024-01-02T03:04:05.678Z created s3://b/logs/a.txt (42 bytes)"
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "created");
        assert!(json.get("version_id").is_none());
    }
}
