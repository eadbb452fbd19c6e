//! Queue polling state machine
//!
//! ```text
//!   Idle ──next()──► Polling ──event──► Idle
//!                       │
//!                 cancel│          fatal error
//!                       ▼               │
//!                   Draining ──────► Stopped ◄┘
//! ```
//!
//! Events are pulled: nothing is received until the consumer asks for the
//! next event. A message is acknowledged only once every event decoded from
//! it has been handed out, at the start of the following pull (or when the
//! watcher drains). At most one receive runs ahead of the consumer.

use futures::Stream;
use parking_lot::{Mutex, RwLock};
use s3watcher_core::types::{QueueAddress, RawMessage, S3Event};
use s3watcher_core::{BackendError, BackendErrorKind, Result, WatchError, WatcherConfig};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendResult, NotificationBackend};
use crate::decoder::EventDecoder;
use crate::dedupe::{DedupeKey, DedupeTracker};
use crate::metrics;
use crate::retry::RetryPolicy;

/// Lifecycle of a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Draining,
    Stopped,
}

impl PollerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollerState::Idle => "idle",
            PollerState::Polling => "polling",
            PollerState::Draining => "draining",
            PollerState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Poller counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    /// Completed receive calls
    pub polls: u64,
    pub messages_received: u64,
    pub events_yielded: u64,
    pub duplicates_suppressed: u64,
    pub decode_warnings: u64,
    pub messages_acked: u64,
    /// Transient failures retried
    pub retries: u64,
}

/// State shared between a poller and the watcher that owns it
#[derive(Debug)]
pub(crate) struct PollerShared {
    pub(crate) cancel: CancellationToken,
    state: watch::Sender<PollerState>,
    stats: RwLock<PollerStats>,
    /// Receipts of messages whose events were all handed out
    delivered: Mutex<Vec<String>>,
}

impl PollerShared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            cancel: CancellationToken::new(),
            state,
            stats: RwLock::new(PollerStats::default()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PollerState) {
        self.state.send_replace(state);
    }

    pub(crate) fn stats(&self) -> PollerStats {
        self.stats.read().clone()
    }

    fn record(&self, update: impl FnOnce(&mut PollerStats)) {
        update(&mut self.stats.write());
    }

    fn mark_delivered(&self, receipt_handle: String) {
        self.delivered.lock().push(receipt_handle);
    }

    fn has_delivered(&self) -> bool {
        !self.delivered.lock().is_empty()
    }

    pub(crate) fn take_delivered(&self) -> Vec<String> {
        std::mem::take(&mut *self.delivered.lock())
    }
}

/// Delete one message, retrying transient failures with backoff
pub(crate) async fn acknowledge(
    backend: &dyn NotificationBackend,
    queue: &QueueAddress,
    receipt_handle: &str,
    retry: &RetryPolicy,
    shared: &PollerShared,
) -> Result<()> {
    let mut retries = 0;
    loop {
        match backend.delete_message(queue, receipt_handle).await {
            Ok(()) => {
                shared.record(|s| s.messages_acked += 1);
                metrics::record_ack();
                return Ok(());
            }
            Err(e) if e.is_transient() && retry.can_retry(retries) => {
                retries += 1;
                let delay = retry.delay_for(retries);
                warn!(queue = %queue.name, error = %e, attempt = retries, "Acknowledgment failed, retrying");
                shared.record(|s| s.retries += 1);
                metrics::record_retry("DeleteMessage");
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_transient() => {
                return Err(WatchError::RetriesExhausted {
                    operation: "DeleteMessage",
                    attempts: retries + 1,
                    source: e,
                })
            }
            Err(e) => {
                return Err(WatchError::Backend {
                    operation: "DeleteMessage",
                    source: e,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PollOptions {
    wait: Duration,
    visibility_timeout: Duration,
    max_messages: u32,
    prefetch: bool,
}

/// A received message with the events not yet handed out
#[derive(Debug)]
struct Delivery {
    message_id: String,
    receipt_handle: String,
    events: VecDeque<S3Event>,
}

async fn receive(
    backend: Arc<dyn NotificationBackend>,
    queue: QueueAddress,
    options: PollOptions,
) -> BackendResult<Vec<RawMessage>> {
    backend
        .receive_messages(
            &queue,
            options.wait,
            options.max_messages,
            options.visibility_timeout,
        )
        .await
}

/// Pull-based reader of one notification queue
pub struct QueuePoller {
    backend: Arc<dyn NotificationBackend>,
    queue: QueueAddress,
    decoder: EventDecoder,
    dedupe: DedupeTracker,
    options: PollOptions,
    retry: RetryPolicy,
    shared: Arc<PollerShared>,
    batch: VecDeque<RawMessage>,
    current: Option<Delivery>,
    prefetch: Option<JoinHandle<BackendResult<Vec<RawMessage>>>>,
    finished: bool,
}

impl QueuePoller {
    pub fn new(
        backend: Arc<dyn NotificationBackend>,
        queue: QueueAddress,
        config: &WatcherConfig,
    ) -> Self {
        Self::with_shared(backend, queue, config, Arc::new(PollerShared::new()))
    }

    pub(crate) fn with_shared(
        backend: Arc<dyn NotificationBackend>,
        queue: QueueAddress,
        config: &WatcherConfig,
        shared: Arc<PollerShared>,
    ) -> Self {
        Self {
            backend,
            queue,
            decoder: EventDecoder::for_config(config),
            dedupe: DedupeTracker::new(config.dedupe_capacity, config.dedupe_window()),
            options: PollOptions {
                wait: config.wait_time(),
                visibility_timeout: config.visibility_timeout(),
                max_messages: config.max_messages_per_poll,
                prefetch: config.prefetch,
            },
            retry: RetryPolicy::from_config(config),
            shared,
            batch: VecDeque::new(),
            current: None,
            prefetch: None,
            finished: false,
        }
    }

    pub fn state(&self) -> PollerState {
        self.shared.state()
    }

    pub fn stats(&self) -> PollerStats {
        self.shared.stats()
    }

    /// Token that stops the poller when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Wait for the next event.
    ///
    /// Returns `Ok(None)` once cancelled. A fatal error is returned once;
    /// every later call returns [`WatchError::Closed`].
    pub async fn next(&mut self) -> Result<Option<S3Event>> {
        if self.finished {
            return Err(WatchError::Closed);
        }

        loop {
            if self.shared.cancel.is_cancelled() {
                self.shut_down().await;
                return Ok(None);
            }

            self.shared.set_state(PollerState::Polling);
            if let Err(e) = self.acknowledge_delivered().await {
                return Err(self.fail(e));
            }
            if self.shared.cancel.is_cancelled() {
                continue;
            }

            if let Some(event) = self.next_buffered() {
                self.shared.set_state(PollerState::Idle);
                return Ok(Some(event));
            }

            // Acknowledge exhausted messages before blocking on a receive
            if self.shared.has_delivered() {
                continue;
            }

            match self.fetch().await {
                Ok(Some(messages)) => self.batch.extend(messages),
                Ok(None) => continue,
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Next event from already received messages, skipping duplicates
    fn next_buffered(&mut self) -> Option<S3Event> {
        loop {
            if let Some(mut delivery) = self.current.take() {
                while let Some(event) = delivery.events.pop_front() {
                    let key = DedupeKey::from_event(&event);
                    if self.dedupe.is_duplicate(&key) {
                        debug!(key = %event.key, message_id = %delivery.message_id, "Suppressing duplicate event");
                        self.shared.record(|s| s.duplicates_suppressed += 1);
                        metrics::record_duplicate_suppressed();
                        continue;
                    }
                    self.dedupe.remember(key);

                    if delivery.events.is_empty() {
                        self.shared.mark_delivered(delivery.receipt_handle);
                    } else {
                        self.current = Some(delivery);
                    }
                    self.shared.record(|s| s.events_yielded += 1);
                    metrics::record_event_yielded(event.kind.as_str());
                    return Some(event);
                }
                self.shared.mark_delivered(delivery.receipt_handle);
            }

            let message = self.batch.pop_front()?;
            self.current = Some(self.open(message));
        }
    }

    fn open(&self, message: RawMessage) -> Delivery {
        let outcome = self.decoder.decode_detailed(&message.body);
        for warning in &outcome.warnings {
            warn!(
                queue = %self.queue.name,
                message_id = %message.message_id,
                warning = %warning,
                "Ignoring undecodable notification content"
            );
            metrics::record_decode_warning(warning.reason());
        }
        if !outcome.warnings.is_empty() {
            let count = outcome.warnings.len() as u64;
            self.shared.record(|s| s.decode_warnings += count);
        }
        debug!(
            message_id = %message.message_id,
            events = outcome.events.len(),
            skipped = outcome.skipped,
            "Decoded message"
        );

        Delivery {
            message_id: message.message_id,
            receipt_handle: message.receipt_handle,
            events: outcome.events.into(),
        }
    }

    async fn acknowledge_delivered(&mut self) -> Result<()> {
        for receipt_handle in self.shared.take_delivered() {
            let result = acknowledge(
                self.backend.as_ref(),
                &self.queue,
                &receipt_handle,
                &self.retry,
                &self.shared,
            )
            .await;

            match result {
                Ok(()) => {}
                // A stale receipt means the message was already redelivered
                Err(WatchError::Backend { source, .. })
                    if source.kind == BackendErrorKind::InvalidRequest =>
                {
                    warn!(queue = %self.queue.name, error = %source, "Acknowledgment rejected");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Receive the next batch. `Ok(None)` means cancelled.
    async fn fetch(&mut self) -> Result<Option<Vec<RawMessage>>> {
        let cancel = self.shared.cancel.clone();
        let mut retries = 0;

        loop {
            let started = Instant::now();
            let outcome = match self.prefetch.as_mut() {
                Some(handle) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    joined = handle => Some(joined.unwrap_or_else(|e| {
                        Err(BackendError::unavailable(format!("prefetch task failed: {}", e)))
                    })),
                },
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = receive(self.backend.clone(), self.queue.clone(), self.options.clone()) => Some(result),
                },
            };
            if let Some(handle) = self.prefetch.take() {
                handle.abort();
            }

            let Some(result) = outcome else {
                return Ok(None);
            };

            match result {
                Ok(messages) => {
                    metrics::record_receive(messages.len(), started.elapsed());
                    let count = messages.len() as u64;
                    self.shared.record(|s| {
                        s.polls += 1;
                        s.messages_received += count;
                    });
                    if !messages.is_empty() {
                        debug!(queue = %self.queue.name, count, "Received messages");
                        if self.options.prefetch {
                            self.start_prefetch();
                        }
                    }
                    return Ok(Some(messages));
                }
                Err(e) if e.is_transient() && self.retry.can_retry(retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for(retries);
                    warn!(
                        queue = %self.queue.name,
                        error = %e,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Receive failed, retrying"
                    );
                    self.shared.record(|s| s.retries += 1);
                    metrics::record_retry("ReceiveMessages");

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    return Err(WatchError::RetriesExhausted {
                        operation: "ReceiveMessages",
                        attempts: retries + 1,
                        source: e,
                    })
                }
                Err(e) => {
                    return Err(WatchError::Backend {
                        operation: "ReceiveMessages",
                        source: e,
                    })
                }
            }
        }
    }

    fn start_prefetch(&mut self) {
        let task = receive(self.backend.clone(), self.queue.clone(), self.options.clone());
        self.prefetch = Some(tokio::spawn(task));
    }

    fn fail(&mut self, error: WatchError) -> WatchError {
        error!(queue = %self.queue.name, error = %error, "Polling stopped on unrecoverable error");
        if let Some(handle) = self.prefetch.take() {
            handle.abort();
        }
        self.finished = true;
        self.shared.set_state(PollerState::Stopped);
        error
    }

    async fn shut_down(&mut self) {
        self.shared.set_state(PollerState::Draining);
        if let Some(handle) = self.prefetch.take() {
            handle.abort();
        }

        for receipt_handle in self.shared.take_delivered() {
            if let Err(e) = acknowledge(
                self.backend.as_ref(),
                &self.queue,
                &receipt_handle,
                &self.retry,
                &self.shared,
            )
            .await
            {
                warn!(queue = %self.queue.name, error = %e, "Failed to acknowledge message while draining");
            }
        }

        let abandoned = self.batch.len() + usize::from(self.current.is_some());
        if abandoned > 0 {
            debug!(queue = %self.queue.name, abandoned, "Leaving partially delivered messages for redelivery");
        }
        self.batch.clear();
        self.current = None;
        self.finished = true;
        self.shared.set_state(PollerState::Stopped);
        info!(queue = %self.queue.name, "Queue poller stopped");
    }
}

/// The watcher's event sequence
pub struct EventStream {
    poller: QueuePoller,
}

impl EventStream {
    pub(crate) fn new(poller: QueuePoller) -> Self {
        Self { poller }
    }

    /// Wait for the next event; see [`QueuePoller::next`]
    pub async fn next(&mut self) -> Result<Option<S3Event>> {
        self.poller.next().await
    }

    pub fn state(&self) -> PollerState {
        self.poller.state()
    }

    /// Adapt into a [`Stream`] that ends after cancellation or a fatal error
    pub fn into_stream(self) -> impl Stream<Item = Result<S3Event>> + Send {
        futures::stream::unfold(Some(self), |stream| async move {
            let mut stream = stream?;
            match stream.next().await {
                Ok(Some(event)) => Some((Ok(event), Some(stream))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
