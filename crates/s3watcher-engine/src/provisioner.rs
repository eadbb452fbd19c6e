//! Queue provisioning
//!
//! Ensures the watcher's queue exists and that its access policy lets the
//! watched bucket publish to it. Safe to repeat: an existing queue is reused
//! and its policy rewritten with the same document.

use s3watcher_core::types::{PolicyDocument, QueueHandle, QueueSettings};
use s3watcher_core::{Result, WatchError, WatcherConfig};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{BackendResult, NotificationBackend};

pub struct ResourceProvisioner {
    backend: Arc<dyn NotificationBackend>,
}

impl ResourceProvisioner {
    pub fn new(backend: Arc<dyn NotificationBackend>) -> Self {
        Self { backend }
    }

    /// Create or reuse the queue named by `config` and grant the bucket
    /// permission to publish to it.
    ///
    /// Failures are not retried. When the policy cannot be applied to a queue
    /// created by this call, the queue is deleted again.
    pub async fn ensure(&self, config: &WatcherConfig) -> Result<QueueHandle> {
        let name = config.resolved_queue_name();
        let settings = QueueSettings {
            visibility_timeout: config.visibility_timeout(),
            receive_wait: config.wait_time(),
        };

        let (address, created) = self
            .backend
            .create_or_get_queue(&name, &settings)
            .await
            .map_err(|source| WatchError::Provision {
                queue: name.clone(),
                source,
            })?;

        let policy = PolicyDocument::queue_publish_policy(&address.arn, &config.bucket);
        if let Err(source) = self.backend.set_queue_policy(&address, &policy).await {
            if created {
                if let Err(e) = self.backend.delete_queue(&address).await {
                    warn!(queue = %name, error = %e, "Failed to remove queue after policy error");
                }
            }
            return Err(WatchError::Provision { queue: name, source });
        }

        if created {
            info!(queue = %address.name, arn = %address.arn, "Created notification queue");
        } else {
            info!(queue = %address.name, arn = %address.arn, "Reusing existing notification queue");
        }

        let handle = QueueHandle {
            address,
            policy,
            created,
        };

        if config.purge_on_start {
            self.purge(&handle).await;
        }

        Ok(handle)
    }

    /// Drop stale messages. Never fatal: a purge already in progress or any
    /// other failure is logged and ignored.
    pub async fn purge(&self, handle: &QueueHandle) {
        match self.backend.purge_queue(&handle.address).await {
            Ok(()) => debug!(queue = %handle.name(), "Purged queue"),
            Err(e) if e.is_purge_in_progress() => {
                warn!(queue = %handle.name(), "Queue purge already in progress, continuing")
            }
            Err(e) => warn!(queue = %handle.name(), error = %e, "Failed to purge queue"),
        }
    }

    /// Delete the queue
    pub async fn release(&self, handle: &QueueHandle) -> BackendResult<()> {
        self.backend.delete_queue(&handle.address).await?;
        info!(queue = %handle.name(), "Deleted notification queue");
        Ok(())
    }

    /// Delete a queue known only by name. Returns `false` if it does not exist.
    pub async fn release_named(&self, name: &str) -> BackendResult<bool> {
        let Some(address) = self.backend.get_queue(name).await? else {
            debug!(queue = %name, "Queue already deleted");
            return Ok(false);
        };
        self.backend.delete_queue(&address).await?;
        info!(queue = %name, "Deleted notification queue");
        Ok(true)
    }
}
