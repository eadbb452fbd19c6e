//! Configuration for s3watcher
//!
//! Example config file:
//! ```toml
//! [watcher]
//! bucket = "my-bucket"
//! prefix = "logs/"
//! wait_seconds = 20
//!
//! [aws]
//! region = "eu-west-1"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::S3EventType;
use crate::utils::{derive_queue_name, derive_rule_id, is_valid_queue_name};
use crate::{
    Result, WatchError, MAX_MESSAGES_PER_POLL, MAX_VISIBILITY_TIMEOUT_SECONDS, MAX_WAIT_SECONDS,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3WatcherConfig {
    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub aws: AwsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl S3WatcherConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WatchError::InvalidConfig(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| WatchError::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `S3WATCHER_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(bucket) = std::env::var("S3WATCHER_BUCKET") {
            self.watcher.bucket = bucket;
        }
        if let Ok(prefix) = std::env::var("S3WATCHER_PREFIX") {
            self.watcher.prefix = prefix;
        }
        if let Ok(name) = std::env::var("S3WATCHER_QUEUE_NAME") {
            self.watcher.queue_name = Some(name);
        }
        if let Some(secs) = env_parse("S3WATCHER_WAIT_SECONDS") {
            self.watcher.wait_seconds = secs;
        }
        if let Some(secs) = env_parse("S3WATCHER_VISIBILITY_TIMEOUT") {
            self.watcher.visibility_timeout_seconds = secs;
        }
        if let Some(max) = env_parse("S3WATCHER_MAX_MESSAGES") {
            self.watcher.max_messages_per_poll = max;
        }
        if let Some(flag) = env_parse("S3WATCHER_AUTO_TEARDOWN") {
            self.watcher.auto_teardown = flag;
        }
        if let Some(flag) = env_parse("S3WATCHER_PURGE_ON_START") {
            self.watcher.purge_on_start = flag;
        }

        if let Ok(region) = std::env::var("S3WATCHER_REGION") {
            self.aws.region = Some(region);
        }
        if let Ok(endpoint) = std::env::var("S3WATCHER_ENDPOINT") {
            self.aws.endpoint_url = Some(endpoint);
        }
        if let Ok(profile) = std::env::var("S3WATCHER_PROFILE") {
            self.aws.profile = Some(profile);
        }
        if let Ok(key) = std::env::var("S3WATCHER_ACCESS_KEY") {
            self.aws.access_key_id = Some(key);
        }
        if let Ok(secret) = std::env::var("S3WATCHER_SECRET_KEY") {
            self.aws.secret_access_key = Some(secret);
        }

        if let Ok(level) = std::env::var("S3WATCHER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("S3WATCHER_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Settings for one watcher instance. Immutable once the watcher starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Bucket to watch (required)
    pub bucket: String,
    /// Key prefix; empty watches every key
    pub prefix: String,
    /// Queue name; derived from bucket + prefix when unset
    pub queue_name: Option<String>,
    /// Long-poll wait per receive call
    pub wait_seconds: u64,
    /// How long a received message stays hidden pending acknowledgment
    pub visibility_timeout_seconds: u64,
    /// Messages requested per receive call (1-10)
    pub max_messages_per_poll: u32,
    /// Maximum number of remembered event identities
    pub dedupe_capacity: usize,
    /// Maximum age of a remembered event identity
    pub dedupe_window_seconds: u64,
    /// Detach the rule and delete the queue on stop
    pub auto_teardown: bool,
    /// Event types the notification rule subscribes to
    pub events: Vec<S3EventType>,
    /// Retries of a transient backend failure before it becomes fatal
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Keep one long-poll in flight while the consumer handles the current batch
    pub prefetch: bool,
    /// Purge queued messages right after provisioning
    pub purge_on_start: bool,
    /// Upper bound on waiting for in-flight acknowledgments during stop
    pub drain_timeout_seconds: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            queue_name: None,
            wait_seconds: 20,
            visibility_timeout_seconds: 30,
            max_messages_per_poll: MAX_MESSAGES_PER_POLL,
            dedupe_capacity: 4096,
            dedupe_window_seconds: 300,
            auto_teardown: true,
            events: vec![S3EventType::ObjectCreatedAll, S3EventType::ObjectRemovedAll],
            max_retries: 8,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            prefetch: true,
            purge_on_start: false,
            drain_timeout_seconds: 5,
        }
    }
}

impl WatcherConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = Some(name.into());
        self
    }

    pub fn with_events(mut self, events: Vec<S3EventType>) -> Self {
        self.events = events;
        self
    }

    pub fn with_wait_seconds(mut self, secs: u64) -> Self {
        self.wait_seconds = secs;
        self
    }

    pub fn with_dedupe(mut self, capacity: usize, window_seconds: u64) -> Self {
        self.dedupe_capacity = capacity;
        self.dedupe_window_seconds = window_seconds;
        self
    }

    pub fn with_auto_teardown(mut self, enabled: bool) -> Self {
        self.auto_teardown = enabled;
        self
    }

    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.prefetch = enabled;
        self
    }

    pub fn with_retry(mut self, max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = base_delay_ms;
        self.retry_max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_purge_on_start(mut self, enabled: bool) -> Self {
        self.purge_on_start = enabled;
        self
    }

    /// Queue name in effect: the configured one or the derived default
    pub fn resolved_queue_name(&self) -> String {
        self.queue_name
            .clone()
            .unwrap_or_else(|| derive_queue_name(&self.bucket, &self.prefix))
    }

    /// Id of the notification rule this watcher owns
    pub fn rule_id(&self) -> String {
        derive_rule_id(&self.bucket, &self.prefix, &self.resolved_queue_name())
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_secs(self.dedupe_window_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(WatchError::InvalidConfig("bucket must not be empty".into()));
        }
        if self.wait_seconds > MAX_WAIT_SECONDS {
            return Err(WatchError::InvalidConfig(format!(
                "wait_seconds must be at most {}, got {}",
                MAX_WAIT_SECONDS, self.wait_seconds
            )));
        }
        if self.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(WatchError::InvalidConfig(format!(
                "visibility_timeout_seconds must be at most {}, got {}",
                MAX_VISIBILITY_TIMEOUT_SECONDS, self.visibility_timeout_seconds
            )));
        }
        if self.max_messages_per_poll == 0 || self.max_messages_per_poll > MAX_MESSAGES_PER_POLL {
            return Err(WatchError::InvalidConfig(format!(
                "max_messages_per_poll must be between 1 and {}, got {}",
                MAX_MESSAGES_PER_POLL, self.max_messages_per_poll
            )));
        }
        if self.dedupe_capacity == 0 {
            return Err(WatchError::InvalidConfig(
                "dedupe_capacity must be greater than zero".into(),
            ));
        }
        if let Some(ref name) = self.queue_name {
            if !is_valid_queue_name(name) {
                return Err(WatchError::InvalidConfig(format!(
                    "Invalid queue name: {:?}",
                    name
                )));
            }
        }
        if self.events.is_empty() {
            return Err(WatchError::InvalidConfig(
                "at least one event type is required".into(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(WatchError::InvalidConfig(
                "retry_base_delay_ms must not exceed retry_max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the AWS backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region override; the SDK default chain applies when unset
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services and local stacks
    pub endpoint_url: Option<String>,
    /// Named credentials profile
    pub profile: Option<String>,
    /// Path-style bucket addressing
    pub force_path_style: bool,
    /// Static credentials; both must be set to bypass the default provider chain
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
}

impl AwsConfig {
    /// Static key pair, when both halves are configured
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(key), Some(secret)) => Some((key.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = WatcherConfig::new("b");
        assert_eq!(config.prefix, "");
        assert_eq!(config.wait_seconds, 20);
        assert_eq!(config.max_messages_per_poll, 10);
        assert!(config.auto_teardown);
        assert_eq!(
            config.events,
            vec![S3EventType::ObjectCreatedAll, S3EventType::ObjectRemovedAll]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolved_queue_name() {
        let derived = WatcherConfig::new("b").with_prefix("logs/");
        assert_eq!(
            derived.resolved_queue_name(),
            derive_queue_name("b", "logs/")
        );

        let explicit = derived.clone().with_queue_name("my-queue");
        assert_eq!(explicit.resolved_queue_name(), "my-queue");
        assert_ne!(explicit.rule_id(), derived.rule_id());
        assert_eq!(explicit.rule_id(), derive_rule_id("b", "logs/", "my-queue"));
    }

    #[test]
    fn test_validation() {
        assert!(WatcherConfig::default().validate().is_err());

        let mut config = WatcherConfig::new("b");
        config.max_messages_per_poll = 11;
        assert!(config.validate().is_err());

        let config = WatcherConfig::new("b").with_wait_seconds(21);
        assert!(config.validate().is_err());

        let config = WatcherConfig::new("b").with_dedupe(0, 60);
        assert!(config.validate().is_err());

        let config = WatcherConfig::new("b").with_queue_name("bad name");
        assert!(config.validate().is_err());

        let config = WatcherConfig::new("b").with_events(vec![]);
        assert!(config.validate().is_err());

        let config = WatcherConfig::new("b").with_retry(3, 1000, 10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[watcher]
bucket = "b"
prefix = "logs/"
wait_seconds = 5
events = ["s3:ObjectCreated:Put"]

[aws]
region = "eu-west-1"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = S3WatcherConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.watcher.bucket, "b");
        assert_eq!(config.watcher.prefix, "logs/");
        assert_eq!(config.watcher.wait_seconds, 5);
        assert_eq!(config.watcher.events, vec![S3EventType::ObjectCreatedPut]);
        assert_eq!(config.watcher.visibility_timeout_seconds, 30);
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert!(config.aws.static_credentials().is_none());
    }

    #[test]
    fn test_static_credentials_need_both_halves() {
        let mut aws = AwsConfig {
            access_key_id: Some("AKIDEXAMPLE".into()),
            ..AwsConfig::default()
        };
        assert!(aws.static_credentials().is_none());

        aws.secret_access_key = Some("secret".into());
        assert_eq!(aws.static_credentials(), Some(("AKIDEXAMPLE", "secret")));
    }

    #[test]
    fn test_from_file_missing() {
        let err = S3WatcherConfig::from_file("/nonexistent/s3watcher.toml").unwrap_err();
        assert!(matches!(err, WatchError::InvalidConfig(_)));
    }
}
