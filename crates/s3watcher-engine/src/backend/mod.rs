//! Storage and queue backend abstraction
//!
//! The engine never talks to a cloud SDK directly. Each component receives an
//! explicit `Arc<dyn NotificationBackend>` handle exposing exactly the remote
//! operations it needs.

#[cfg(feature = "aws")]
mod aws;
mod memory;

#[cfg(feature = "aws")]
pub use aws::AwsBackend;
pub use memory::MemoryBackend;

use async_trait::async_trait;
use s3watcher_core::types::{
    NotificationConfiguration, PolicyDocument, QueueAddress, QueueSettings, RawMessage,
};
use s3watcher_core::BackendError;
use std::time::Duration;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Remote operations, used for failure injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetQueue,
    CreateQueue,
    SetQueuePolicy,
    PurgeQueue,
    DeleteQueue,
    GetBucketNotification,
    PutBucketNotification,
    ReceiveMessages,
    DeleteMessage,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetQueue => "GetQueue",
            Operation::CreateQueue => "CreateQueue",
            Operation::SetQueuePolicy => "SetQueuePolicy",
            Operation::PurgeQueue => "PurgeQueue",
            Operation::DeleteQueue => "DeleteQueue",
            Operation::GetBucketNotification => "GetBucketNotificationConfiguration",
            Operation::PutBucketNotification => "PutBucketNotificationConfiguration",
            Operation::ReceiveMessages => "ReceiveMessages",
            Operation::DeleteMessage => "DeleteMessage",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage + queue service operations consumed by the engine
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// Look up a queue by name; `Ok(None)` when it does not exist
    async fn get_queue(&self, name: &str) -> BackendResult<Option<QueueAddress>>;

    /// Create a queue. Creating an existing queue returns its address.
    async fn create_queue(&self, name: &str, settings: &QueueSettings)
        -> BackendResult<QueueAddress>;

    /// Reuse the named queue or create it. The flag is `true` when it was created.
    async fn create_or_get_queue(
        &self,
        name: &str,
        settings: &QueueSettings,
    ) -> BackendResult<(QueueAddress, bool)> {
        if let Some(address) = self.get_queue(name).await? {
            return Ok((address, false));
        }
        let address = self.create_queue(name, settings).await?;
        Ok((address, true))
    }

    /// Replace the queue's access policy
    async fn set_queue_policy(
        &self,
        queue: &QueueAddress,
        policy: &PolicyDocument,
    ) -> BackendResult<()>;

    /// Drop every message currently in the queue
    async fn purge_queue(&self, queue: &QueueAddress) -> BackendResult<()>;

    async fn delete_queue(&self, queue: &QueueAddress) -> BackendResult<()>;

    /// Read the bucket's notification document; empty when none is set
    async fn get_bucket_notification_config(
        &self,
        bucket: &str,
    ) -> BackendResult<NotificationConfiguration>;

    /// Overwrite the bucket's notification document
    async fn put_bucket_notification_config(
        &self,
        bucket: &str,
        config: &NotificationConfiguration,
    ) -> BackendResult<()>;

    /// Long-poll for up to `max_messages`, blocking at most `wait`
    async fn receive_messages(
        &self,
        queue: &QueueAddress,
        wait: Duration,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> BackendResult<Vec<RawMessage>>;

    /// Acknowledge one delivery
    async fn delete_message(&self, queue: &QueueAddress, receipt_handle: &str)
        -> BackendResult<()>;
}
