//! In-process backend
//!
//! Keeps buckets, notification documents and queues in memory and simulates
//! S3 publishing notification records to subscribed queues. Used by the test
//! suite and for running the watcher without an AWS account.
//!
//! Visibility timeouts never expire on their own; call
//! [`MemoryBackend::requeue_in_flight`] to redeliver unacknowledged messages.

use async_trait::async_trait;
use parking_lot::Mutex;
use s3watcher_core::types::{
    NotificationConfiguration, NotificationTarget, PolicyDocument, QueueAddress, QueueSettings,
    RawMessage, S3EventMessage, S3EventRecord, S3EventType, S3TestEvent,
};
use s3watcher_core::utils::{bucket_arn, queue_arn};
use s3watcher_core::{BackendError, BackendErrorKind, DEFAULT_REGION};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::{BackendResult, NotificationBackend, Operation};

/// Account id used in generated queue ARNs
pub const MEMORY_ACCOUNT_ID: &str = "000000000000";

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    receive_count: u32,
}

#[derive(Debug)]
struct MemoryQueue {
    address: QueueAddress,
    settings: QueueSettings,
    policy: Option<PolicyDocument>,
    visible: VecDeque<StoredMessage>,
    /// Delivered but not yet acknowledged, keyed by receipt handle
    in_flight: HashMap<String, StoredMessage>,
    acked: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, NotificationConfiguration>,
    queues: HashMap<String, MemoryQueue>,
    failures: HashMap<Operation, VecDeque<BackendError>>,
    calls: HashMap<Operation, usize>,
    next_id: u64,
}

impl State {
    /// Count the call and pop an injected failure, if any
    fn enter(&mut self, op: Operation) -> BackendResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(|f| f.pop_front()) {
            Some(err) => {
                debug!(operation = %op, error = %err, "Injected failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn queue_mut(&mut self, name: &str) -> BackendResult<&mut MemoryQueue> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| BackendError::no_such_queue(name))
    }

    fn queue_by_arn_mut(&mut self, arn: &str) -> Option<&mut MemoryQueue> {
        self.queues.values_mut().find(|q| q.address.arn == arn)
    }

    fn enqueue(&mut self, queue_name: &str, body: String) -> BackendResult<String> {
        let message_id = format!("msg-{:08}", self.next_id());
        self.queue_mut(queue_name)?.visible.push_back(StoredMessage {
            message_id: message_id.clone(),
            body,
            receive_count: 0,
        });
        Ok(message_id)
    }

    /// Enqueue on the queue with `arn` when its policy lets the bucket publish
    fn publish(&mut self, arn: &str, bucket: &str, body: String) -> bool {
        let message_id = format!("msg-{:08}", self.next_id());
        let Some(queue) = self.queue_by_arn_mut(arn) else {
            debug!(queue_arn = %arn, "Destination queue does not exist, dropping record");
            return false;
        };
        let allowed = queue
            .policy
            .as_ref()
            .map_or(false, |p| p.allows_publish(arn, &bucket_arn(bucket)));
        if !allowed {
            debug!(queue_arn = %arn, bucket = %bucket, "Queue policy denies publish, dropping record");
            return false;
        }
        queue.visible.push_back(StoredMessage {
            message_id,
            body,
            receive_count: 0,
        });
        true
    }

    fn take_visible(&mut self, queue_name: &str, max: u32) -> BackendResult<Vec<RawMessage>> {
        let receipt_base = self.next_id();
        let queue = self.queue_mut(queue_name)?;
        let mut batch = Vec::new();

        while batch.len() < max as usize {
            let Some(mut message) = queue.visible.pop_front() else {
                break;
            };
            message.receive_count += 1;
            let receipt_handle = format!(
                "{}#{}-{}",
                message.message_id,
                receipt_base,
                message.receive_count
            );
            batch.push(RawMessage {
                message_id: message.message_id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: message.body.clone(),
                receive_count: Some(message.receive_count),
            });
            queue.in_flight.insert(receipt_handle, message);
        }

        Ok(batch)
    }
}

/// Backend that keeps every resource in process memory
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
    notify: Notify,
    region: String,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            region: DEFAULT_REGION.to_string(),
        }
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.create_bucket(bucket);
        self
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.state
            .lock()
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: Operation, error: BackendError) {
        self.fail_times(op, error, 1);
    }

    /// Make the next `times` calls of `op` fail with `error`
    pub fn fail_times(&self, op: Operation, error: BackendError, times: usize) {
        let mut state = self.state.lock();
        let failures = state.failures.entry(op).or_default();
        failures.extend(std::iter::repeat(error).take(times));
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Number of times `op` has been called, failed calls included
    pub fn call_count(&self, op: Operation) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn notification_config(&self, bucket: &str) -> Option<NotificationConfiguration> {
        self.state.lock().buckets.get(bucket).cloned()
    }

    /// Replace a bucket's notification document without validating destinations
    pub fn set_notification_config(&self, bucket: &str, config: NotificationConfiguration) {
        self.state.lock().buckets.insert(bucket.to_string(), config);
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.state.lock().queues.contains_key(name)
    }

    pub fn queue_policy(&self, name: &str) -> Option<PolicyDocument> {
        self.state
            .lock()
            .queues
            .get(name)
            .and_then(|q| q.policy.clone())
    }

    pub fn queue_settings(&self, name: &str) -> Option<QueueSettings> {
        self.state
            .lock()
            .queues
            .get(name)
            .map(|q| q.settings.clone())
    }

    /// Messages waiting to be received
    pub fn visible_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(name)
            .map_or(0, |q| q.visible.len())
    }

    /// Messages received but not yet acknowledged
    pub fn in_flight_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(name)
            .map_or(0, |q| q.in_flight.len())
    }

    /// Ids of acknowledged messages, in acknowledgment order
    pub fn acked_message_ids(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .queues
            .get(name)
            .map(|q| q.acked.clone())
            .unwrap_or_default()
    }

    /// Enqueue a raw message body, returning its message id
    pub fn send_message(&self, queue_name: &str, body: impl Into<String>) -> BackendResult<String> {
        let id = self.state.lock().enqueue(queue_name, body.into())?;
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Make every unacknowledged message visible again, as if its visibility
    /// timeout had expired. Returns the number of messages requeued.
    pub fn requeue_in_flight(&self, queue_name: &str) -> usize {
        let requeued = {
            let mut state = self.state.lock();
            let Some(queue) = state.queues.get_mut(queue_name) else {
                return 0;
            };
            let mut messages: Vec<StoredMessage> = queue.in_flight.drain().map(|(_, m)| m).collect();
            messages.sort_by(|a, b| a.message_id.cmp(&b.message_id));
            let count = messages.len();
            for message in messages.into_iter().rev() {
                queue.visible.push_front(message);
            }
            count
        };
        if requeued > 0 {
            self.notify.notify_waiters();
        }
        requeued
    }

    /// Simulate an upload; returns the number of queues notified
    pub fn put_object(&self, bucket: &str, key: &str, size: u64) -> usize {
        self.emit(bucket, &S3EventType::ObjectCreatedPut, key, Some(size))
    }

    /// Simulate a delete; returns the number of queues notified
    pub fn delete_object(&self, bucket: &str, key: &str) -> usize {
        self.emit(bucket, &S3EventType::ObjectRemovedDelete, key, None)
    }

    /// Publish a notification record for `key` to every matching queue rule
    pub fn emit(&self, bucket: &str, event_type: &S3EventType, key: &str, size: Option<u64>) -> usize {
        let delivered = {
            let mut state = self.state.lock();
            let Some(config) = state.buckets.get(bucket) else {
                return 0;
            };
            let targets = config.get_matching_configs(event_type, key);
            let sequence = state.next_id();
            let sequencer = format!("{:016X}", sequence);
            let etag = format!("{:032x}", sequence);

            let mut delivered = 0;
            for target in targets {
                let NotificationTarget::Queue { id, arn } = target else {
                    continue;
                };
                let record = S3EventRecord::new(
                    event_type,
                    bucket,
                    key,
                    size,
                    size.map(|_| etag.clone()),
                    None,
                    &sequencer,
                    &id,
                    &self.region,
                );
                let body = serde_json::to_string(&S3EventMessage {
                    records: vec![record],
                })
                .unwrap_or_default();
                if state.publish(&arn, bucket, body) {
                    delivered += 1;
                }
            }
            delivered
        };

        if delivered > 0 {
            self.notify.notify_waiters();
        }
        delivered
    }

    fn address_for(&self, name: &str) -> QueueAddress {
        QueueAddress {
            name: name.to_string(),
            url: format!(
                "https://sqs.{}.amazonaws.com/{}/{}",
                self.region, MEMORY_ACCOUNT_ID, name
            ),
            arn: queue_arn(&self.region, MEMORY_ACCOUNT_ID, name),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationBackend for MemoryBackend {
    async fn get_queue(&self, name: &str) -> BackendResult<Option<QueueAddress>> {
        let mut state = self.state.lock();
        state.enter(Operation::GetQueue)?;
        Ok(state.queues.get(name).map(|q| q.address.clone()))
    }

    async fn create_queue(
        &self,
        name: &str,
        settings: &QueueSettings,
    ) -> BackendResult<QueueAddress> {
        let mut state = self.state.lock();
        state.enter(Operation::CreateQueue)?;

        if let Some(existing) = state.queues.get(name) {
            return Ok(existing.address.clone());
        }

        let address = self.address_for(name);
        state.queues.insert(
            name.to_string(),
            MemoryQueue {
                address: address.clone(),
                settings: settings.clone(),
                policy: None,
                visible: VecDeque::new(),
                in_flight: HashMap::new(),
                acked: Vec::new(),
            },
        );
        debug!(queue = %name, "Created queue");
        Ok(address)
    }

    async fn set_queue_policy(
        &self,
        queue: &QueueAddress,
        policy: &PolicyDocument,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(Operation::SetQueuePolicy)?;
        state.queue_mut(&queue.name)?.policy = Some(policy.clone());
        Ok(())
    }

    async fn purge_queue(&self, queue: &QueueAddress) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(Operation::PurgeQueue)?;
        let queue = state.queue_mut(&queue.name)?;
        queue.visible.clear();
        queue.in_flight.clear();
        Ok(())
    }

    async fn delete_queue(&self, queue: &QueueAddress) -> BackendResult<()> {
        {
            let mut state = self.state.lock();
            state.enter(Operation::DeleteQueue)?;
            if state.queues.remove(&queue.name).is_none() {
                return Err(BackendError::no_such_queue(&queue.name));
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn get_bucket_notification_config(
        &self,
        bucket: &str,
    ) -> BackendResult<NotificationConfiguration> {
        let mut state = self.state.lock();
        state.enter(Operation::GetBucketNotification)?;
        state
            .buckets
            .get(bucket)
            .cloned()
            .ok_or_else(|| BackendError::no_such_bucket(bucket))
    }

    async fn put_bucket_notification_config(
        &self,
        bucket: &str,
        config: &NotificationConfiguration,
    ) -> BackendResult<()> {
        let notified = {
            let mut state = self.state.lock();
            state.enter(Operation::PutBucketNotification)?;

            let previous: HashSet<String> = state
                .buckets
                .get(bucket)
                .ok_or_else(|| BackendError::no_such_bucket(bucket))?
                .queue_configurations
                .iter()
                .map(|q| q.id.clone())
                .collect();

            // S3 validates new queue destinations before saving
            let added: Vec<String> = config
                .queue_configurations
                .iter()
                .filter(|q| !previous.contains(&q.id))
                .map(|q| q.queue_arn.clone())
                .collect();
            for arn in &added {
                let valid = state.queue_by_arn_mut(arn).map_or(false, |q| {
                    q.policy
                        .as_ref()
                        .map_or(false, |p| p.allows_publish(arn, &bucket_arn(bucket)))
                });
                if !valid {
                    return Err(BackendError::new(
                        BackendErrorKind::InvalidRequest,
                        format!(
                            "Unable to validate the following destination configurations: {}",
                            arn
                        ),
                    )
                    .with_code("InvalidArgument"));
                }
            }

            state.buckets.insert(bucket.to_string(), config.clone());

            let test_event = serde_json::to_string(&S3TestEvent::new(bucket)).unwrap_or_default();
            for arn in &added {
                state.publish(arn, bucket, test_event.clone());
            }
            !added.is_empty()
        };

        if notified {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn receive_messages(
        &self,
        queue: &QueueAddress,
        wait: Duration,
        max_messages: u32,
        _visibility_timeout: Duration,
    ) -> BackendResult<Vec<RawMessage>> {
        self.state.lock().enter(Operation::ReceiveMessages)?;

        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.state.lock().take_visible(&queue.name, max_messages)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn delete_message(&self, queue: &QueueAddress, receipt_handle: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(Operation::DeleteMessage)?;
        let queue = state.queue_mut(&queue.name)?;
        match queue.in_flight.remove(receipt_handle) {
            Some(message) => {
                queue.acked.push(message.message_id);
                Ok(())
            }
            None => Err(BackendError::from_code(
                "ReceiptHandleIsInvalid",
                format!("The receipt handle is not valid: {}", receipt_handle),
            )),
        }
    }
}
