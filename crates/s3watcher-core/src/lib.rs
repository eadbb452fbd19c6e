//! s3watcher Core Library
//!
//! Core types shared by the s3watcher engine and CLI: watcher configuration,
//! the error taxonomy, bucket notification rules, S3 event records and the
//! queue access policy.

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{AwsConfig, LoggingConfig, S3WatcherConfig, WatcherConfig};
pub use error::{
    BackendError, BackendErrorKind, Result, TeardownError, WatchError, PURGE_IN_PROGRESS_CODE,
};

/// s3watcher version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Maximum SQS queue name length
pub const MAX_QUEUE_NAME_LENGTH: usize = 80;

/// Maximum SQS long-poll wait (seconds)
pub const MAX_WAIT_SECONDS: u64 = 20;

/// Maximum SQS visibility timeout (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 43_200;

/// Maximum number of messages returned by one receive call
pub const MAX_MESSAGES_PER_POLL: u32 = 10;

/// Prefix used for derived queue names and notification rule ids
pub const RESOURCE_NAME_PREFIX: &str = "s3watcher";
