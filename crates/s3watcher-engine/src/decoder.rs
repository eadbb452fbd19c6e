//! Notification payload decoding
//!
//! Turns one queue message body into zero or more [`S3Event`]s. Accepted
//! shapes:
//! - an S3 notification (`{"Records": [...]}`)
//! - the same notification wrapped once in an SNS envelope
//! - the `s3:TestEvent` sent when a rule is saved (yields nothing)
//!
//! Decoding never fails: anything unusable becomes a [`DecodeWarning`].

use s3watcher_core::types::{EventKind, S3Event, S3EventRecord};
use s3watcher_core::utils::decode_event_key;
use s3watcher_core::WatcherConfig;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::metrics;

/// Record schema major version this decoder understands
const SUPPORTED_EVENT_VERSION: &str = "2";

/// Non-fatal problem found while decoding a message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// The body is not JSON or not a notification at all
    MalformedBody(String),
    /// One record could not be turned into an event
    MalformedRecord { index: usize, reason: String },
    UnsupportedVersion { index: usize, version: String },
}

impl DecodeWarning {
    /// Short label used in metrics
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeWarning::MalformedBody(_) => "malformed_body",
            DecodeWarning::MalformedRecord { .. } => "malformed_record",
            DecodeWarning::UnsupportedVersion { .. } => "unsupported_version",
        }
    }
}

impl std::fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeWarning::MalformedBody(reason) => write!(f, "malformed body: {}", reason),
            DecodeWarning::MalformedRecord { index, reason } => {
                write!(f, "malformed record #{}: {}", index, reason)
            }
            DecodeWarning::UnsupportedVersion { index, version } => {
                write!(f, "record #{} has unsupported eventVersion {}", index, version)
            }
        }
    }
}

/// Everything learned from one message body
#[derive(Debug, Clone, Default)]
pub struct DecodeOutcome {
    pub events: Vec<S3Event>,
    pub warnings: Vec<DecodeWarning>,
    /// Well-formed records dropped for belonging to another source, bucket or prefix
    pub skipped: usize,
}

/// Decoder scoped to one bucket and key prefix
#[derive(Debug, Clone)]
pub struct EventDecoder {
    bucket: String,
    prefix: String,
}

impl EventDecoder {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn for_config(config: &WatcherConfig) -> Self {
        Self::new(config.bucket.clone(), config.prefix.clone())
    }

    /// Decode a message body, logging and counting any warnings
    pub fn decode(&self, body: &str) -> Vec<S3Event> {
        let outcome = self.decode_detailed(body);
        for warning in &outcome.warnings {
            warn!(bucket = %self.bucket, warning = %warning, "Ignoring undecodable notification content");
            metrics::record_decode_warning(warning.reason());
        }
        outcome.events
    }

    /// Decode a message body, returning the warnings instead of logging them
    pub fn decode_detailed(&self, body: &str) -> DecodeOutcome {
        let mut outcome = DecodeOutcome::default();
        match serde_json::from_str::<Value>(body) {
            Ok(value) => self.decode_value(value, true, &mut outcome),
            Err(e) => outcome
                .warnings
                .push(DecodeWarning::MalformedBody(format!("invalid JSON: {}", e))),
        }
        outcome
    }

    fn decode_value(&self, value: Value, unwrap_envelope: bool, outcome: &mut DecodeOutcome) {
        let Value::Object(mut body) = value else {
            outcome
                .warnings
                .push(DecodeWarning::MalformedBody("not a JSON object".into()));
            return;
        };

        if let Some(records) = body.remove("Records") {
            match records {
                Value::Array(records) => {
                    for (index, record) in records.into_iter().enumerate() {
                        self.decode_record(index, record, outcome);
                    }
                }
                _ => outcome
                    .warnings
                    .push(DecodeWarning::MalformedBody("Records is not an array".into())),
            }
            return;
        }

        if string_field(&body, "Event") == Some("s3:TestEvent") {
            debug!(bucket = ?string_field(&body, "Bucket"), "Ignoring S3 test event");
            return;
        }

        if unwrap_envelope && string_field(&body, "Type") == Some("Notification") {
            match body.remove("Message") {
                Some(Value::String(inner)) => match serde_json::from_str::<Value>(&inner) {
                    Ok(inner) => self.decode_value(inner, false, outcome),
                    Err(e) => outcome.warnings.push(DecodeWarning::MalformedBody(format!(
                        "invalid JSON in SNS message: {}",
                        e
                    ))),
                },
                _ => outcome.warnings.push(DecodeWarning::MalformedBody(
                    "SNS notification without a message".into(),
                )),
            }
            return;
        }

        outcome.warnings.push(DecodeWarning::MalformedBody(
            "not an S3 event notification".into(),
        ));
    }

    fn decode_record(&self, index: usize, record: Value, outcome: &mut DecodeOutcome) {
        let record: S3EventRecord = match serde_json::from_value(record) {
            Ok(record) => record,
            Err(e) => {
                outcome.warnings.push(DecodeWarning::MalformedRecord {
                    index,
                    reason: e.to_string(),
                });
                return;
            }
        };

        if !record.event_source.ends_with(":s3") {
            debug!(source = %record.event_source, "Skipping record from another service");
            outcome.skipped += 1;
            return;
        }

        let major = record.event_version.split('.').next().unwrap_or_default();
        if major != SUPPORTED_EVENT_VERSION {
            outcome.warnings.push(DecodeWarning::UnsupportedVersion {
                index,
                version: record.event_version,
            });
            return;
        }

        if record.s3.bucket.name != self.bucket {
            debug!(
                bucket = %record.s3.bucket.name,
                expected = %self.bucket,
                "Skipping record for another bucket"
            );
            outcome.skipped += 1;
            return;
        }

        let Some(key) = decode_event_key(&record.s3.object.key) else {
            outcome.warnings.push(DecodeWarning::MalformedRecord {
                index,
                reason: format!("key is not valid URL encoding: {}", record.s3.object.key),
            });
            return;
        };
        if key.is_empty() {
            outcome.warnings.push(DecodeWarning::MalformedRecord {
                index,
                reason: "empty object key".into(),
            });
            return;
        }

        if !key.starts_with(&self.prefix) {
            debug!(key = %key, prefix = %self.prefix, "Skipping record outside the watched prefix");
            outcome.skipped += 1;
            return;
        }

        let event_name = match record.event_name.strip_prefix("s3:") {
            Some(name) => name.to_string(),
            None => record.event_name,
        };

        outcome.events.push(S3Event {
            kind: EventKind::from_event_name(&event_name),
            event_name,
            bucket: record.s3.bucket.name,
            key,
            size: record.s3.object.size,
            timestamp: record.event_time,
            version_id: record.s3.object.version_id,
            checksum: record.s3.object.e_tag,
            sequencer: record.s3.object.sequencer,
            region: record.aws_region,
        });
    }
}

fn string_field<'a>(body: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    body.get(name).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bucket: &str, key: &str, event_name: &str) -> Value {
        serde_json::json!({
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "awsRegion": "us-east-1",
            "eventTime": "2024-05-01T12:00:00.000Z",
            "eventName": event_name,
            "s3": {
                "s3SchemaVersion": "1.0",
                "configurationId": "s3watcher-abc",
                "bucket": {"name": bucket, "arn": format!("arn:aws:s3:::{}", bucket)},
                "object": {"key": key, "size": 42, "eTag": "abc", "sequencer": "0055AED6DCD90281E5"}
            }
        })
    }

    fn body(records: Vec<Value>) -> String {
        serde_json::json!({ "Records": records }).to_string()
    }

    #[test]
    fn test_decode_created_event() {
        let decoder = EventDecoder::new("b", "logs/");
        let events = decoder.decode(&body(vec![record("b", "logs/a.txt", "ObjectCreated:Put")]));

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, EventKind::Created);
        assert_eq!(event.bucket, "b");
        assert_eq!(event.key, "logs/a.txt");
        assert_eq!(event.size, Some(42));
        assert_eq!(event.event_name, "ObjectCreated:Put");
        assert_eq!(event.sequencer.as_deref(), Some("0055AED6DCD90281E5"));
        assert_eq!(event.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_decode_removed_event() {
        let decoder = EventDecoder::new("b", "");
        let events = decoder.decode(&body(vec![record("b", "x", "ObjectRemoved:Delete")]));
        assert_eq!(events[0].kind, EventKind::Removed);
    }

    #[test]
    fn test_key_is_url_decoded() {
        let decoder = EventDecoder::new("b", "logs/");
        let events = decoder.decode(&body(vec![record(
            "b",
            "logs/my+report%281%29.txt",
            "ObjectCreated:Put",
        )]));
        assert_eq!(events[0].key, "logs/my report(1).txt");
    }

    #[test]
    fn test_filters_other_bucket_and_prefix() {
        let decoder = EventDecoder::new("b", "logs/");
        let outcome = decoder.decode_detailed(&body(vec![
            record("other", "logs/a.txt", "ObjectCreated:Put"),
            record("b", "data/a.txt", "ObjectCreated:Put"),
            record("b", "logs/b.txt", "ObjectCreated:Put"),
        ]));

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].key, "logs/b.txt");
        assert_eq!(outcome.skipped, 2);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_malformed_payloads_yield_nothing() {
        let decoder = EventDecoder::new("b", "");

        for payload in ["", "not json", "[1, 2]", r#"{"Records": "nope"}"#, r#"{"hello": 1}"#] {
            let outcome = decoder.decode_detailed(payload);
            assert!(outcome.events.is_empty(), "payload {:?}", payload);
            assert_eq!(outcome.warnings.len(), 1, "payload {:?}", payload);
            assert!(decoder.decode(payload).is_empty());
        }
    }

    #[test]
    fn test_bad_record_does_not_poison_batch() {
        let decoder = EventDecoder::new("b", "");
        let outcome = decoder.decode_detailed(&body(vec![
            serde_json::json!({"eventSource": "aws:s3"}),
            record("b", "ok.txt", "ObjectCreated:Put"),
        ]));

        assert_eq!(outcome.events.len(), 1);
        assert!(matches!(
            outcome.warnings[0],
            DecodeWarning::MalformedRecord { index: 0, .. }
        ));
    }

    #[test]
    fn test_unsupported_version_and_source() {
        let decoder = EventDecoder::new("b", "");
        let mut old = record("b", "a", "ObjectCreated:Put");
        old["eventVersion"] = "1.0".into();
        let mut foreign = record("b", "a", "ObjectCreated:Put");
        foreign["eventSource"] = "aws:sqs".into();

        let outcome = decoder.decode_detailed(&body(vec![old, foreign]));
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.skipped, 1);
        assert_eq!(
            outcome.warnings,
            vec![DecodeWarning::UnsupportedVersion {
                index: 0,
                version: "1.0".into()
            }]
        );
    }

    #[test]
    fn test_test_event_is_silent() {
        let decoder = EventDecoder::new("b", "");
        let outcome = decoder.decode_detailed(
            r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Time":"2024-05-01T12:00:00.000Z","Bucket":"b"}"#,
        );
        assert!(outcome.events.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_sns_envelope_is_unwrapped_once() {
        let decoder = EventDecoder::new("b", "");
        let inner = body(vec![record("b", "a.txt", "ObjectCreated:Copy")]);
        let envelope = serde_json::json!({
            "Type": "Notification",
            "TopicArn": "arn:aws:sns:us-east-1:123456789012:uploads",
            "Message": inner,
        })
        .to_string();

        let events = decoder.decode(&envelope);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name, "ObjectCreated:Copy");

        let nested = serde_json::json!({"Type": "Notification", "Message": envelope}).to_string();
        let outcome = decoder.decode_detailed(&nested);
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }
}
