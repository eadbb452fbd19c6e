//! Watcher facade
//!
//! Ties provisioning, rule attachment, polling and teardown into one handle.
//! A [`Watcher`] is cheap to clone; every clone controls the same watch, so
//! `stop()` can be called from a task other than the one consuming events.

use parking_lot::Mutex;
use s3watcher_core::types::{NotificationRule, QueueHandle};
use s3watcher_core::{
    BackendError, BackendErrorKind, Result, TeardownError, WatchError, WatcherConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::NotificationBackend;
use crate::configurator::NotificationConfigurator;
use crate::metrics;
use crate::poller::{acknowledge, EventStream, PollerShared, PollerState, PollerStats, QueuePoller};
use crate::provisioner::ResourceProvisioner;
use crate::retry::RetryPolicy;

/// Retries allowed per acknowledgment while stopping
const DRAIN_MAX_RETRIES: u32 = 2;

/// Outcome of [`Watcher::stop`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Messages acknowledged while draining
    pub drained_acks: usize,
    pub rule_detached: bool,
    pub queue_deleted: bool,
    /// Non-fatal failures; the affected resources may be left behind
    pub warnings: Vec<TeardownError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

struct Inner {
    config: WatcherConfig,
    backend: Arc<dyn NotificationBackend>,
    queue: QueueHandle,
    rule: NotificationRule,
    shared: Arc<PollerShared>,
    /// Taken by the first `watch()`
    poller: Mutex<Option<QueuePoller>>,
    stopped: AtomicBool,
}

/// Handle to a running bucket watch
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<Inner>,
}

impl Watcher {
    /// Provision the queue, attach the notification rule and prepare polling.
    ///
    /// On failure nothing created by this call is left behind.
    pub async fn start(
        config: WatcherConfig,
        backend: Arc<dyn NotificationBackend>,
    ) -> Result<Self> {
        config.validate()?;
        info!(bucket = %config.bucket, prefix = %config.prefix, "Starting watcher");

        let provisioner = ResourceProvisioner::new(backend.clone());
        let queue = provisioner.ensure(&config).await?;

        let configurator = NotificationConfigurator::new(backend.clone());
        let rule = match configurator
            .attach(&config.bucket, &config.prefix, &queue, &config.events)
            .await
        {
            Ok(rule) => rule,
            Err(e) => {
                if queue.created {
                    if let Err(cleanup) = provisioner.release(&queue).await {
                        warn!(queue = %queue.name(), error = %cleanup, "Failed to remove queue after setup error");
                    }
                }
                return Err(e);
            }
        };

        let shared = Arc::new(PollerShared::new());
        let poller = QueuePoller::with_shared(
            backend.clone(),
            queue.address.clone(),
            &config,
            shared.clone(),
        );

        info!(
            bucket = %config.bucket,
            queue = %queue.name(),
            rule = %rule.id,
            "Watcher ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                backend,
                queue,
                rule,
                shared,
                poller: Mutex::new(Some(poller)),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Take the event stream. Only one stream exists per watcher.
    pub fn watch(&self) -> Result<EventStream> {
        self.ensure_open()?;
        let poller = self
            .inner
            .poller
            .lock()
            .take()
            .ok_or(WatchError::AlreadyWatching)?;
        info!(queue = %self.inner.queue.name(), "Watching for events");
        Ok(EventStream::new(poller))
    }

    pub fn queue(&self) -> Result<&QueueHandle> {
        self.ensure_open()?;
        Ok(&self.inner.queue)
    }

    pub fn rule(&self) -> Result<&NotificationRule> {
        self.ensure_open()?;
        Ok(&self.inner.rule)
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PollerStats {
        self.inner.shared.stats()
    }

    pub fn state(&self) -> PollerState {
        self.inner.shared.state()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(WatchError::Closed);
        }
        Ok(())
    }

    /// Stop watching and tear down remote resources.
    ///
    /// Cancels the event stream, acknowledges messages whose events were all
    /// handed out, then (with `auto_teardown`) detaches the rule and deletes
    /// the queue. Failures are reported, never raised. Calling `stop` again
    /// returns an empty report.
    pub async fn stop(&self) -> TeardownReport {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            debug!(queue = %inner.queue.name(), "Watcher already stopped");
            return TeardownReport::default();
        }

        info!(bucket = %inner.config.bucket, queue = %inner.queue.name(), "Stopping watcher");
        inner.shared.cancel.cancel();
        inner.poller.lock().take();

        let settled = tokio::time::timeout(
            inner.config.drain_timeout(),
            settle(inner.shared.subscribe()),
        )
        .await
        .is_ok();
        if !settled {
            warn!(queue = %inner.queue.name(), "Poller still busy after drain timeout");
        }

        let mut report = TeardownReport::default();
        self.drain(&mut report).await;

        if inner.config.auto_teardown {
            self.teardown(&mut report).await;
        } else {
            info!(queue = %inner.queue.name(), rule = %inner.rule.id, "Leaving queue and notification rule in place");
        }

        info!(
            drained = report.drained_acks,
            rule_detached = report.rule_detached,
            queue_deleted = report.queue_deleted,
            warnings = report.warnings.len(),
            "Watcher stopped"
        );
        report
    }

    async fn drain(&self, report: &mut TeardownReport) {
        let inner = &self.inner;
        let retry = RetryPolicy::from_config(&inner.config);
        let retry = RetryPolicy::new(
            retry.max_retries.min(DRAIN_MAX_RETRIES),
            retry.base_delay,
            retry.max_delay,
        );

        for receipt_handle in inner.shared.take_delivered() {
            let result = acknowledge(
                inner.backend.as_ref(),
                &inner.queue.address,
                &receipt_handle,
                &retry,
                &inner.shared,
            )
            .await;

            match result {
                Ok(()) => report.drained_acks += 1,
                Err(e) => {
                    warn!(queue = %inner.queue.name(), error = %e, "Failed to acknowledge message while draining");
                    metrics::record_teardown_failure("acknowledge");
                    report.warnings.push(TeardownError::Acknowledge {
                        source: backend_source(e),
                    });
                }
            }
        }
    }

    async fn teardown(&self, report: &mut TeardownReport) {
        let inner = &self.inner;

        let configurator = NotificationConfigurator::new(inner.backend.clone());
        match configurator.detach(&inner.rule).await {
            Ok(removed) => report.rule_detached = removed,
            Err(source) => {
                warn!(
                    bucket = %inner.rule.bucket,
                    rule = %inner.rule.id,
                    error = %source,
                    "Failed to detach notification rule"
                );
                metrics::record_teardown_failure("detach_rule");
                report.warnings.push(TeardownError::DetachRule {
                    bucket: inner.rule.bucket.clone(),
                    rule_id: inner.rule.id.clone(),
                    source,
                });
            }
        }

        let provisioner = ResourceProvisioner::new(inner.backend.clone());
        match provisioner.release(&inner.queue).await {
            Ok(()) => report.queue_deleted = true,
            Err(source) if source.kind == BackendErrorKind::NoSuchQueue => {
                debug!(queue = %inner.queue.name(), "Queue already deleted");
            }
            Err(source) => {
                warn!(queue = %inner.queue.name(), error = %source, "Failed to delete queue");
                metrics::record_teardown_failure("delete_queue");
                report.warnings.push(TeardownError::DeleteQueue {
                    queue: inner.queue.name().to_string(),
                    source,
                });
            }
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("bucket", &self.inner.config.bucket)
            .field("prefix", &self.inner.config.prefix)
            .field("queue", &self.inner.queue.name())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Resolve once the poller is between pulls or stopped
async fn settle(mut state: watch::Receiver<PollerState>) {
    loop {
        let current = *state.borrow_and_update();
        if matches!(current, PollerState::Idle | PollerState::Stopped) {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

fn backend_source(error: WatchError) -> BackendError {
    match error {
        WatchError::Backend { source, .. } | WatchError::RetriesExhausted { source, .. } => source,
        other => BackendError::new(BackendErrorKind::Other, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Operation};
    use s3watcher_core::types::S3EventType;
    use std::time::Duration;

    fn config() -> WatcherConfig {
        WatcherConfig::new("b")
            .with_prefix("logs/")
            .with_prefetch(false)
    }

    #[tokio::test]
    async fn test_start_validates_config() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let err = Watcher::start(WatcherConfig::new(""), backend.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, WatchError::InvalidConfig(_)));
        assert!(backend.queue_names().is_empty());
    }

    #[tokio::test]
    async fn test_attach_failure_removes_created_queue() {
        let backend = Arc::new(MemoryBackend::new());
        let err = Watcher::start(config(), backend.clone()).await.unwrap_err();

        assert!(matches!(err, WatchError::Configuration { .. }));
        assert!(backend.queue_names().is_empty());
    }

    #[tokio::test]
    async fn test_watch_once_then_closed() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let watcher = Watcher::start(config(), backend.clone()).await.unwrap();

        let _stream = watcher.watch().unwrap();
        assert!(matches!(watcher.watch(), Err(WatchError::AlreadyWatching)));

        let report = watcher.stop().await;
        assert!(report.is_clean());
        assert!(report.rule_detached);
        assert!(report.queue_deleted);

        assert!(matches!(watcher.watch(), Err(WatchError::Closed)));
        assert!(matches!(watcher.queue(), Err(WatchError::Closed)));
        assert!(matches!(watcher.rule(), Err(WatchError::Closed)));
    }

    #[tokio::test]
    async fn test_second_stop_is_empty() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let watcher = Watcher::start(config(), backend.clone()).await.unwrap();

        watcher.stop().await;
        let calls = backend.call_count(Operation::DeleteQueue);
        let report = watcher.clone().stop().await;

        assert_eq!(report, TeardownReport::default());
        assert_eq!(backend.call_count(Operation::DeleteQueue), calls);
    }

    #[tokio::test]
    async fn test_stop_without_auto_teardown_keeps_resources() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let watcher = Watcher::start(config().with_auto_teardown(false), backend.clone())
            .await
            .unwrap();
        let queue = watcher.queue().unwrap().name().to_string();

        let report = watcher.stop().await;

        assert!(!report.rule_detached);
        assert!(!report.queue_deleted);
        assert!(backend.queue_exists(&queue));
        assert_eq!(
            backend.notification_config("b").unwrap().queue_configurations.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_teardown_failures_are_reported() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let watcher = Watcher::start(config(), backend.clone()).await.unwrap();
        backend.fail_next(
            Operation::PutBucketNotification,
            BackendError::access_denied("denied"),
        );
        backend.fail_next(Operation::DeleteQueue, BackendError::unavailable("503"));

        let report = watcher.stop().await;

        assert_eq!(report.warnings.len(), 2);
        assert!(matches!(report.warnings[0], TeardownError::DetachRule { .. }));
        assert!(matches!(report.warnings[1], TeardownError::DeleteQueue { .. }));
        assert!(watcher.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_delivered_messages() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let watcher = Watcher::start(config().with_auto_teardown(false), backend.clone())
            .await
            .unwrap();
        let queue = watcher.queue().unwrap().name().to_string();
        let mut stream = watcher.watch().unwrap();

        assert_eq!(
            backend.emit("b", &S3EventType::ObjectCreatedPut, "logs/a.txt", Some(42)),
            1
        );
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.key, "logs/a.txt");

        // the test event published on attach and the object event
        let report = watcher.stop().await;
        assert_eq!(report.drained_acks, 2);
        assert_eq!(backend.in_flight_count(&queue), 0);
        assert_eq!(watcher.state(), PollerState::Idle);

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(next.unwrap().is_none());
        assert_eq!(watcher.state(), PollerState::Stopped);
    }
}
