//! s3watcher Engine
//!
//! Streams object mutation events of an S3 bucket (optionally narrowed to a
//! key prefix) by routing bucket notifications through an SQS queue.
//!
//! # Architecture
//!
//! ```text
//!  Watcher::start ──► ResourceProvisioner::ensure ──► NotificationConfigurator::attach
//!        │                 (queue + policy)               (bucket rule, merged)
//!        ▼
//!  Watcher::watch ──► EventStream / QueuePoller
//!                        │ long-poll receive (one prefetch at most)
//!                        │ EventDecoder::decode
//!                        │ DedupeTracker
//!                        └ acknowledge after yield
//!        │
//!  Watcher::stop ──► cancel, drain acknowledgments, detach rule, delete queue
//! ```
//!
//! All remote state goes through a [`NotificationBackend`]: [`AwsBackend`]
//! talks to S3 and SQS, [`MemoryBackend`] keeps everything in process.

pub mod backend;
pub mod configurator;
pub mod decoder;
pub mod dedupe;
pub mod metrics;
pub mod poller;
pub mod provisioner;
pub mod retry;
pub mod watcher;

#[cfg(feature = "aws")]
pub use backend::AwsBackend;
pub use backend::{BackendResult, MemoryBackend, NotificationBackend, Operation};
pub use configurator::NotificationConfigurator;
pub use decoder::{DecodeOutcome, DecodeWarning, EventDecoder};
pub use dedupe::{DedupeKey, DedupeTracker};
pub use poller::{EventStream, PollerState, PollerStats, QueuePoller};
pub use provisioner::ResourceProvisioner;
pub use retry::RetryPolicy;
pub use watcher::{TeardownReport, Watcher};

pub use s3watcher_core::types::{EventKind, S3Event};
pub use s3watcher_core::{WatchError, WatcherConfig};
