//! Error types for s3watcher

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors surfaced by the watcher to its caller.
#[derive(Error, Debug)]
pub enum WatchError {
    // Setup Errors
    #[error("Failed to provision queue {queue}: {source}")]
    Provision { queue: String, source: BackendError },

    #[error("Failed to configure notifications for bucket {bucket}: {source}")]
    Configuration { bucket: String, source: BackendError },

    #[error("Notification rule {existing} already sends overlapping events to {queue_arn}")]
    RuleConflict { existing: String, queue_arn: String },

    // Polling Errors
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        source: BackendError,
    },

    #[error("{operation} failed: {source}")]
    Backend {
        operation: &'static str,
        source: BackendError,
    },

    // Validation Errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Lifecycle Errors
    #[error("The watcher has been stopped")]
    Closed,

    #[error("The event stream for this watcher has already been taken")]
    AlreadyWatching,
}

impl WatchError {
    pub fn code(&self) -> &'static str {
        match self {
            WatchError::Provision { .. } => "ProvisionError",
            WatchError::Configuration { .. } | WatchError::RuleConflict { .. } => {
                "ConfigurationError"
            }
            WatchError::RetriesExhausted { .. } | WatchError::Backend { .. } => "BackendError",
            WatchError::InvalidConfig(_) => "InvalidConfig",
            WatchError::Closed => "ClosedError",
            WatchError::AlreadyWatching => "AlreadyWatching",
        }
    }

    /// Setup failures that leave no resources created by this attempt behind.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            WatchError::Provision { .. }
                | WatchError::Configuration { .. }
                | WatchError::RuleConflict { .. }
                | WatchError::InvalidConfig(_)
        )
    }
}

/// Classification of a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    Throttled,
    Unavailable,
    AccessDenied,
    NoSuchBucket,
    NoSuchQueue,
    QuotaExceeded,
    InvalidRequest,
    Other,
}

impl BackendErrorKind {
    /// Map an AWS error code onto a kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "Throttling" | "ThrottlingException" | "RequestThrottled" | "SlowDown"
            | "TooManyRequestsException" | "RequestLimitExceeded" => BackendErrorKind::Throttled,

            "ServiceUnavailable" | "InternalError" | "InternalFailure" | "RequestTimeout"
            | "RequestTimeoutException" | "KMS.ThrottlingException" => {
                BackendErrorKind::Unavailable
            }

            "AccessDenied" | "AccessDeniedException" | "InvalidAccessKeyId"
            | "SignatureDoesNotMatch" | "UnauthorizedOperation" | "ExpiredToken"
            | "InvalidClientTokenId" => BackendErrorKind::AccessDenied,

            "NoSuchBucket" => BackendErrorKind::NoSuchBucket,

            "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
                BackendErrorKind::NoSuchQueue
            }

            "OverLimit" | "TooManyBuckets" | "LimitExceededException" => {
                BackendErrorKind::QuotaExceeded
            }

            "InvalidArgument" | "InvalidParameterValue" | "InvalidAttributeName"
            | "InvalidAttributeValue" | "MalformedXML" | "QueueAlreadyExists"
            | "AWS.SimpleQueueService.QueueDeletedRecently" | "ReceiptHandleIsInvalid"
            | "AWS.SimpleQueueService.ReceiptHandleIsInvalid" | "InvalidIdFormat" => {
                BackendErrorKind::InvalidRequest
            }

            _ => BackendErrorKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::Throttled => "throttled",
            BackendErrorKind::Unavailable => "unavailable",
            BackendErrorKind::AccessDenied => "access denied",
            BackendErrorKind::NoSuchBucket => "no such bucket",
            BackendErrorKind::NoSuchQueue => "no such queue",
            BackendErrorKind::QuotaExceeded => "quota exceeded",
            BackendErrorKind::InvalidRequest => "invalid request",
            BackendErrorKind::Other => "error",
        }
    }
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a storage or queue backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    /// Raw service error code, when the backend returned one
    pub code: Option<String>,
    pub message: String,
}

/// Error code returned by SQS when a purge is requested within 60s of the last one.
pub const PURGE_IN_PROGRESS_CODE: &str = "AWS.SimpleQueueService.PurgeQueueInProgress";

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Build an error from a service error code, classifying it.
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: BackendErrorKind::from_code(&code),
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Throttled, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::AccessDenied, message)
    }

    pub fn no_such_bucket(bucket: &str) -> Self {
        Self::new(
            BackendErrorKind::NoSuchBucket,
            format!("The specified bucket does not exist: {}", bucket),
        )
    }

    pub fn no_such_queue(queue: &str) -> Self {
        Self::new(
            BackendErrorKind::NoSuchQueue,
            format!("The specified queue does not exist: {}", queue),
        )
    }

    /// Throttling and temporary unavailability are retried; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::Throttled | BackendErrorKind::Unavailable
        )
    }

    pub fn is_purge_in_progress(&self) -> bool {
        self.code.as_deref() == Some(PURGE_IN_PROGRESS_CODE)
    }
}

/// Non-fatal failure while tearing a watcher down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TeardownError {
    #[error("Failed to acknowledge message during drain: {source}")]
    Acknowledge { source: BackendError },

    #[error("Failed to detach notification rule {rule_id} from bucket {bucket}: {source}")]
    DetachRule {
        bucket: String,
        rule_id: String,
        source: BackendError,
    },

    #[error("Failed to delete queue {queue}: {source}")]
    DeleteQueue { queue: String, source: BackendError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_code() {
        assert_eq!(
            BackendErrorKind::from_code("SlowDown"),
            BackendErrorKind::Throttled
        );
        assert_eq!(
            BackendErrorKind::from_code("AWS.SimpleQueueService.NonExistentQueue"),
            BackendErrorKind::NoSuchQueue
        );
        assert_eq!(
            BackendErrorKind::from_code("AccessDenied"),
            BackendErrorKind::AccessDenied
        );
        assert_eq!(
            BackendErrorKind::from_code("SomethingNew"),
            BackendErrorKind::Other
        );
    }

    #[test]
    fn test_stale_receipt_is_invalid_request() {
        for code in [
            "ReceiptHandleIsInvalid",
            "AWS.SimpleQueueService.ReceiptHandleIsInvalid",
            "InvalidIdFormat",
        ] {
            let err = BackendError::from_code(code, "The receipt handle is not valid");
            assert_eq!(err.kind, BackendErrorKind::InvalidRequest, "{}", code);
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::throttled("slow down").is_transient());
        assert!(BackendError::unavailable("503").is_transient());
        assert!(!BackendError::access_denied("nope").is_transient());
        assert!(!BackendError::no_such_queue("q").is_transient());
    }

    #[test]
    fn test_purge_in_progress() {
        let err = BackendError::from_code(PURGE_IN_PROGRESS_CODE, "wait 60 seconds");
        assert!(err.is_purge_in_progress());
        assert!(!BackendError::throttled("x").is_purge_in_progress());
    }

    #[test]
    fn test_error_codes() {
        let err = WatchError::Provision {
            queue: "q".into(),
            source: BackendError::access_denied("denied"),
        };
        assert_eq!(err.code(), "ProvisionError");
        assert!(err.is_setup_error());
        assert_eq!(WatchError::Closed.code(), "ClosedError");
        assert!(!WatchError::Closed.is_setup_error());
    }
}
