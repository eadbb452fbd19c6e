//! CLI command implementations

pub mod list_buckets;
pub mod setup;
pub mod teardown;
pub mod watch;

use s3watcher_core::S3WatcherConfig;
use s3watcher_engine::AwsBackend;
use std::sync::Arc;

use crate::OutputFormat;

/// Context passed to all commands
pub struct CommandContext {
    pub config: S3WatcherConfig,
    pub output_format: OutputFormat,
}

impl CommandContext {
    /// Check if output should be JSON
    pub fn is_json(&self) -> bool {
        matches!(self.output_format, OutputFormat::Json)
    }

    /// Status message; stdout is reserved for command output
    pub fn info(&self, msg: &str) {
        eprintln!("{}", msg);
    }

    pub async fn backend(&self) -> Arc<AwsBackend> {
        Arc::new(AwsBackend::from_config(&self.config.aws).await)
    }
}
