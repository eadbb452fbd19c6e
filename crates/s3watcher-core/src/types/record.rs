//! S3 event notification wire format
//!
//! See <https://docs.aws.amazon.com/AmazonS3/latest/userguide/notification-content-structure.html>.
//! Fields the watcher does not need are optional so that records from
//! S3-compatible services with a thinner payload still parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::S3EventType;
use crate::utils::bucket_arn;

/// S3 Event record (AWS format)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    /// Event version, e.g. "2.1"
    pub event_version: String,
    /// Event source, e.g. "aws:s3"
    pub event_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    pub event_time: DateTime<Utc>,
    /// Event name without the `s3:` prefix, e.g. "ObjectCreated:Put"
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_identity: Option<UserIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_parameters: Option<RequestParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_elements: Option<ResponseElements>,
    pub s3: S3Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub principal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    pub source_ip_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseElements {
    #[serde(rename = "x-amz-request-id")]
    pub x_amz_request_id: String,
    #[serde(rename = "x-amz-id-2")]
    pub x_amz_id_2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Info {
    #[serde(default)]
    pub s3_schema_version: String,
    #[serde(default)]
    pub configuration_id: String,
    pub bucket: S3BucketInfo,
    pub object: S3ObjectInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_identity: Option<UserIdentity>,
    #[serde(default)]
    pub arn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3ObjectInfo {
    /// Form-URL-encoded key
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequencer: Option<String>,
}

/// S3 Event message (contains one or more records)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3EventMessage {
    pub records: Vec<S3EventRecord>,
}

/// Message S3 sends to a destination when a notification rule is saved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3TestEvent {
    pub service: String,
    pub event: String,
    pub time: DateTime<Utc>,
    pub bucket: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub host_id: String,
}

impl S3TestEvent {
    pub fn new(bucket: &str) -> Self {
        Self {
            service: "Amazon S3".to_string(),
            event: S3EventType::TestEvent.to_string(),
            time: Utc::now(),
            bucket: bucket.to_string(),
            request_id: String::new(),
            host_id: String::new(),
        }
    }
}

/// SNS envelope around a notification fanned out through a topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsEnvelope {
    #[serde(rename = "Type")]
    pub kind: String,
    /// JSON-encoded inner notification
    pub message: String,
    #[serde(default)]
    pub topic_arn: Option<String>,
}

impl S3EventRecord {
    /// Create a new event record
    pub fn new(
        event_type: &S3EventType,
        bucket: &str,
        key: &str,
        size: Option<u64>,
        etag: Option<String>,
        version_id: Option<String>,
        sequencer: &str,
        config_id: &str,
        region: &str,
    ) -> Self {
        Self {
            event_version: "2.1".to_string(),
            event_source: "aws:s3".to_string(),
            aws_region: Some(region.to_string()),
            event_time: Utc::now(),
            event_name: event_type.record_name().to_string(),
            user_identity: None,
            request_parameters: None,
            response_elements: None,
            s3: S3Info {
                s3_schema_version: "1.0".to_string(),
                configuration_id: config_id.to_string(),
                bucket: S3BucketInfo {
                    name: bucket.to_string(),
                    owner_identity: None,
                    arn: bucket_arn(bucket),
                },
                object: S3ObjectInfo {
                    key: urlencoding::encode(key).replace("%20", "+").replace("%2F", "/"),
                    size,
                    e_tag: etag,
                    version_id,
                    sequencer: Some(sequencer.to_string()),
                },
            },
        }
    }
}
