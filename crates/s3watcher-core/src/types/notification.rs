//! Bucket notification configuration types
//!
//! Mirrors the S3 bucket notification document:
//! - Queue destinations (SQS)
//! - Topic destinations (SNS)
//! - Lambda function destinations
//! - EventBridge delivery flag
//! - Event filtering by prefix/suffix
//!
//! Every destination kind is modelled so that a read-modify-write of the
//! document keeps rules this crate does not own.

use serde::{Deserialize, Serialize};

use crate::utils::prefixes_overlap;

// ============================================================================
// Event Types
// ============================================================================

/// S3 event types as named in notification configurations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum S3EventType {
    // Object Created events
    ObjectCreatedAll,
    ObjectCreatedPut,
    ObjectCreatedPost,
    ObjectCreatedCopy,
    ObjectCreatedCompleteMultipartUpload,

    // Object Removed events
    ObjectRemovedAll,
    ObjectRemovedDelete,
    ObjectRemovedDeleteMarkerCreated,

    // Object Restore events
    ObjectRestoreAll,
    ObjectRestorePost,
    ObjectRestoreCompleted,
    ObjectRestoreDelete,

    // Lifecycle events
    LifecycleExpirationAll,
    LifecycleExpirationDelete,
    LifecycleExpirationDeleteMarkerCreated,

    // Tagging events
    ObjectTaggingAll,
    ObjectTaggingPut,
    ObjectTaggingDelete,

    // ACL events
    ObjectAclPut,

    // Test event
    TestEvent,

    /// Any event name not listed above, kept verbatim
    Other(String),
}

impl S3EventType {
    /// Parse an event name. Record names (`ObjectCreated:Put`) and
    /// configuration names (`s3:ObjectCreated:Put`) are both accepted.
    pub fn parse(name: &str) -> Self {
        let canonical = if name.starts_with("s3:") {
            name.to_string()
        } else {
            format!("s3:{}", name)
        };

        match canonical.as_str() {
            "s3:ObjectCreated:*" => S3EventType::ObjectCreatedAll,
            "s3:ObjectCreated:Put" => S3EventType::ObjectCreatedPut,
            "s3:ObjectCreated:Post" => S3EventType::ObjectCreatedPost,
            "s3:ObjectCreated:Copy" => S3EventType::ObjectCreatedCopy,
            "s3:ObjectCreated:CompleteMultipartUpload" => {
                S3EventType::ObjectCreatedCompleteMultipartUpload
            }
            "s3:ObjectRemoved:*" => S3EventType::ObjectRemovedAll,
            "s3:ObjectRemoved:Delete" => S3EventType::ObjectRemovedDelete,
            "s3:ObjectRemoved:DeleteMarkerCreated" => S3EventType::ObjectRemovedDeleteMarkerCreated,
            "s3:ObjectRestore:*" => S3EventType::ObjectRestoreAll,
            "s3:ObjectRestore:Post" => S3EventType::ObjectRestorePost,
            "s3:ObjectRestore:Completed" => S3EventType::ObjectRestoreCompleted,
            "s3:ObjectRestore:Delete" => S3EventType::ObjectRestoreDelete,
            "s3:LifecycleExpiration:*" => S3EventType::LifecycleExpirationAll,
            "s3:LifecycleExpiration:Delete" => S3EventType::LifecycleExpirationDelete,
            "s3:LifecycleExpiration:DeleteMarkerCreated" => {
                S3EventType::LifecycleExpirationDeleteMarkerCreated
            }
            "s3:ObjectTagging:*" => S3EventType::ObjectTaggingAll,
            "s3:ObjectTagging:Put" => S3EventType::ObjectTaggingPut,
            "s3:ObjectTagging:Delete" => S3EventType::ObjectTaggingDelete,
            "s3:ObjectAcl:Put" => S3EventType::ObjectAclPut,
            "s3:TestEvent" => S3EventType::TestEvent,
            _ => S3EventType::Other(canonical),
        }
    }

    /// Get event name for configuration documents
    pub fn as_str(&self) -> &str {
        match self {
            S3EventType::ObjectCreatedAll => "s3:ObjectCreated:*",
            S3EventType::ObjectCreatedPut => "s3:ObjectCreated:Put",
            S3EventType::ObjectCreatedPost => "s3:ObjectCreated:Post",
            S3EventType::ObjectCreatedCopy => "s3:ObjectCreated:Copy",
            S3EventType::ObjectCreatedCompleteMultipartUpload => {
                "s3:ObjectCreated:CompleteMultipartUpload"
            }
            S3EventType::ObjectRemovedAll => "s3:ObjectRemoved:*",
            S3EventType::ObjectRemovedDelete => "s3:ObjectRemoved:Delete",
            S3EventType::ObjectRemovedDeleteMarkerCreated => "s3:ObjectRemoved:DeleteMarkerCreated",
            S3EventType::ObjectRestoreAll => "s3:ObjectRestore:*",
            S3EventType::ObjectRestorePost => "s3:ObjectRestore:Post",
            S3EventType::ObjectRestoreCompleted => "s3:ObjectRestore:Completed",
            S3EventType::ObjectRestoreDelete => "s3:ObjectRestore:Delete",
            S3EventType::LifecycleExpirationAll => "s3:LifecycleExpiration:*",
            S3EventType::LifecycleExpirationDelete => "s3:LifecycleExpiration:Delete",
            S3EventType::LifecycleExpirationDeleteMarkerCreated => {
                "s3:LifecycleExpiration:DeleteMarkerCreated"
            }
            S3EventType::ObjectTaggingAll => "s3:ObjectTagging:*",
            S3EventType::ObjectTaggingPut => "s3:ObjectTagging:Put",
            S3EventType::ObjectTaggingDelete => "s3:ObjectTagging:Delete",
            S3EventType::ObjectAclPut => "s3:ObjectAcl:Put",
            S3EventType::TestEvent => "s3:TestEvent",
            S3EventType::Other(name) => name,
        }
    }

    /// Event name as it appears in notification records (no `s3:` prefix)
    pub fn record_name(&self) -> &str {
        let name = self.as_str();
        name.strip_prefix("s3:").unwrap_or(name)
    }

    /// Check if this event type matches another (including wildcards)
    pub fn matches(&self, other: &S3EventType) -> bool {
        if self == other {
            return true;
        }

        match self.as_str().strip_suffix('*') {
            Some(family) => other.as_str().starts_with(family),
            None => false,
        }
    }

    /// Two event types overlap if some concrete event matches both
    pub fn overlaps(&self, other: &S3EventType) -> bool {
        self.matches(other) || other.matches(self)
    }
}

impl From<String> for S3EventType {
    fn from(name: String) -> Self {
        S3EventType::parse(&name)
    }
}

impl From<S3EventType> for String {
    fn from(event: S3EventType) -> Self {
        event.as_str().to_string()
    }
}

impl std::fmt::Display for S3EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Filter Rules
// ============================================================================

/// Filter rule for key name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterRule {
    /// Filter name: "prefix" or "suffix"
    pub name: String,
    /// Filter value
    pub value: String,
}

/// S3 Key filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct S3KeyFilter {
    /// Filter rules
    #[serde(default)]
    pub filter_rules: Vec<FilterRule>,
}

impl S3KeyFilter {
    /// Create a new prefix filter
    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            filter_rules: vec![FilterRule {
                name: "prefix".to_string(),
                value: value.into(),
            }],
        }
    }

    /// Add suffix filter
    pub fn with_suffix(mut self, value: impl Into<String>) -> Self {
        self.filter_rules.push(FilterRule {
            name: "suffix".to_string(),
            value: value.into(),
        });
        self
    }

    fn rule_value(&self, name: &str) -> Option<&str> {
        self.filter_rules
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| r.value.as_str())
    }

    /// Prefix constraint, empty when absent
    pub fn prefix_value(&self) -> &str {
        self.rule_value("prefix").unwrap_or("")
    }

    /// Check if a key matches the filter
    pub fn matches(&self, key: &str) -> bool {
        for rule in &self.filter_rules {
            match rule.name.to_lowercase().as_str() {
                "prefix" => {
                    if !key.starts_with(&rule.value) {
                        return false;
                    }
                }
                "suffix" => {
                    if !key.ends_with(&rule.value) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }
}

/// Notification filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationFilter {
    /// Key filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<S3KeyFilter>,
}

impl NotificationFilter {
    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            key: Some(S3KeyFilter::prefix(value)),
        }
    }

    pub fn prefix_value(&self) -> &str {
        self.key.as_ref().map_or("", |k| k.prefix_value())
    }

    pub fn matches(&self, key: &str) -> bool {
        self.key.as_ref().map_or(true, |k| k.matches(key))
    }
}

fn filter_prefix(filter: Option<&NotificationFilter>) -> &str {
    filter.map_or("", |f| f.prefix_value())
}

fn filter_matches(filter: Option<&NotificationFilter>, key: &str) -> bool {
    filter.map_or(true, |f| f.matches(key))
}

// ============================================================================
// Notification Configurations
// ============================================================================

/// Queue notification configuration (SQS)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueConfiguration {
    /// Configuration ID
    #[serde(default)]
    pub id: String,
    /// Queue ARN
    pub queue_arn: String,
    /// Events to notify
    pub events: Vec<S3EventType>,
    /// Optional filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<NotificationFilter>,
}

impl QueueConfiguration {
    pub fn prefix(&self) -> &str {
        filter_prefix(self.filter.as_ref())
    }
}

/// Topic notification configuration (SNS)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicConfiguration {
    /// Configuration ID
    #[serde(default)]
    pub id: String,
    /// Topic ARN
    pub topic_arn: String,
    /// Events to notify
    pub events: Vec<S3EventType>,
    /// Optional filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<NotificationFilter>,
}

/// Lambda function notification configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LambdaFunctionConfiguration {
    /// Configuration ID
    #[serde(default)]
    pub id: String,
    /// Function ARN
    pub lambda_function_arn: String,
    /// Events to notify
    pub events: Vec<S3EventType>,
    /// Optional filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<NotificationFilter>,
}

/// Complete bucket notification configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationConfiguration {
    /// Queue configurations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queue_configurations: Vec<QueueConfiguration>,
    /// Topic configurations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topic_configurations: Vec<TopicConfiguration>,
    /// Lambda function configurations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lambda_function_configurations: Vec<LambdaFunctionConfiguration>,
    /// Whether EventBridge delivery is enabled
    #[serde(default)]
    pub event_bridge_enabled: bool,
}

impl NotificationConfiguration {
    /// Create empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Add queue configuration
    pub fn add_queue(mut self, config: QueueConfiguration) -> Self {
        self.queue_configurations.push(config);
        self
    }

    /// Add topic configuration
    pub fn add_topic(mut self, config: TopicConfiguration) -> Self {
        self.topic_configurations.push(config);
        self
    }

    /// Add lambda function configuration
    pub fn add_lambda(mut self, config: LambdaFunctionConfiguration) -> Self {
        self.lambda_function_configurations.push(config);
        self
    }

    /// Check if configuration is empty
    pub fn is_empty(&self) -> bool {
        self.queue_configurations.is_empty()
            && self.topic_configurations.is_empty()
            && self.lambda_function_configurations.is_empty()
            && !self.event_bridge_enabled
    }

    /// Total number of destination rules of every kind
    pub fn rule_count(&self) -> usize {
        self.queue_configurations.len()
            + self.topic_configurations.len()
            + self.lambda_function_configurations.len()
    }

    pub fn queue_rule(&self, id: &str) -> Option<&QueueConfiguration> {
        self.queue_configurations.iter().find(|q| q.id == id)
    }

    /// Remove the queue rule with the given id, returning it
    pub fn remove_queue_rule(&mut self, id: &str) -> Option<QueueConfiguration> {
        let index = self.queue_configurations.iter().position(|q| q.id == id)?;
        Some(self.queue_configurations.remove(index))
    }

    /// Get all configurations that match an event and key
    pub fn get_matching_configs(
        &self,
        event_type: &S3EventType,
        key: &str,
    ) -> Vec<NotificationTarget> {
        let mut targets = Vec::new();

        for queue in &self.queue_configurations {
            if self.config_matches(&queue.events, queue.filter.as_ref(), event_type, key) {
                targets.push(NotificationTarget::Queue {
                    id: queue.id.clone(),
                    arn: queue.queue_arn.clone(),
                });
            }
        }

        for topic in &self.topic_configurations {
            if self.config_matches(&topic.events, topic.filter.as_ref(), event_type, key) {
                targets.push(NotificationTarget::Topic {
                    id: topic.id.clone(),
                    arn: topic.topic_arn.clone(),
                });
            }
        }

        for lambda in &self.lambda_function_configurations {
            if self.config_matches(&lambda.events, lambda.filter.as_ref(), event_type, key) {
                targets.push(NotificationTarget::Lambda {
                    id: lambda.id.clone(),
                    arn: lambda.lambda_function_arn.clone(),
                });
            }
        }

        targets
    }

    fn config_matches(
        &self,
        events: &[S3EventType],
        filter: Option<&NotificationFilter>,
        event_type: &S3EventType,
        key: &str,
    ) -> bool {
        let event_matches = events.iter().any(|e| e.matches(event_type));
        event_matches && filter_matches(filter, key)
    }
}

/// Notification target for event delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTarget {
    Queue { id: String, arn: String },
    Topic { id: String, arn: String },
    Lambda { id: String, arn: String },
}

// ============================================================================
// Watcher Rule
// ============================================================================

/// The queue rule a watcher adds to its bucket: (bucket, prefix) → queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: String,
    pub bucket: String,
    pub prefix: String,
    pub queue_arn: String,
    pub events: Vec<S3EventType>,
}

impl NotificationRule {
    pub fn to_queue_configuration(&self) -> QueueConfiguration {
        QueueConfiguration {
            id: self.id.clone(),
            queue_arn: self.queue_arn.clone(),
            events: self.events.clone(),
            filter: if self.prefix.is_empty() {
                None
            } else {
                Some(NotificationFilter::prefix(self.prefix.clone()))
            },
        }
    }

    /// Same destination, prefix and event set as an existing rule
    pub fn is_equivalent(&self, config: &QueueConfiguration) -> bool {
        config.queue_arn == self.queue_arn
            && config.prefix() == self.prefix
            && config.events.len() == self.events.len()
            && self.events.iter().all(|e| config.events.contains(e))
    }

    /// An existing rule that would deliver some of this rule's events to the same queue
    pub fn overlaps(&self, config: &QueueConfiguration) -> bool {
        config.queue_arn == self.queue_arn
            && prefixes_overlap(config.prefix(), &self.prefix)
            && config
                .events
                .iter()
                .any(|e| self.events.iter().any(|own| own.overlaps(e)))
    }
}
