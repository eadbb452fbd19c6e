//! Queue types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::PolicyDocument;

/// Backend-assigned identity of a queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueAddress {
    pub name: String,
    /// Endpoint used for queue operations
    pub url: String,
    /// ARN used by notification rules and policies
    pub arn: String,
}

/// Attributes applied when a queue is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub visibility_timeout: Duration,
    pub receive_wait: Duration,
}

/// A provisioned queue together with the policy granting S3 publish rights
#[derive(Debug, Clone, PartialEq)]
pub struct QueueHandle {
    pub address: QueueAddress,
    pub policy: PolicyDocument,
    /// Whether this watcher created the queue (as opposed to reusing it)
    pub created: bool,
}

impl QueueHandle {
    pub fn name(&self) -> &str {
        &self.address.name
    }

    pub fn url(&self) -> &str {
        &self.address.url
    }

    pub fn arn(&self) -> &str {
        &self.address.arn
    }
}

/// One delivery of a queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: String,
    /// Opaque token identifying this delivery; required to acknowledge it
    pub receipt_handle: String,
    pub body: String,
    /// Approximate number of times the message has been received
    pub receive_count: Option<u32>,
}
