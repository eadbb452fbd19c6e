//! Utility functions

use sha2::{Digest, Sha256};

use crate::{MAX_QUEUE_NAME_LENGTH, RESOURCE_NAME_PREFIX};

/// Stable 12-hex-digit fingerprint of a watch scope (bucket + prefix)
pub fn scope_fingerprint(bucket: &str, prefix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bucket.as_bytes());
    hasher.update(b"/");
    hasher.update(prefix.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

/// Derive the default queue name for a bucket + prefix.
///
/// Format: `s3watcher-<bucket slug>-<fingerprint>`, at most 80 characters.
pub fn derive_queue_name(bucket: &str, prefix: &str) -> String {
    let fingerprint = scope_fingerprint(bucket, prefix);
    let budget = MAX_QUEUE_NAME_LENGTH - RESOURCE_NAME_PREFIX.len() - fingerprint.len() - 2;

    let slug: String = bucket
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(budget)
        .collect();
    let slug = slug.trim_matches('-');

    if slug.is_empty() {
        format!("{}-{}", RESOURCE_NAME_PREFIX, fingerprint)
    } else {
        format!("{}-{}-{}", RESOURCE_NAME_PREFIX, slug, fingerprint)
    }
}

/// Derive the id of the notification rule a watcher owns on its bucket.
///
/// The target queue is part of the fingerprint, so watchers sharing a scope
/// but delivering to different queues own different rules.
pub fn derive_rule_id(bucket: &str, prefix: &str, queue_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bucket.as_bytes());
    hasher.update(b"/");
    hasher.update(prefix.as_bytes());
    hasher.update(b"#");
    hasher.update(queue_name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", RESOURCE_NAME_PREFIX, &digest[..12])
}

/// Check an SQS queue name: 1-80 characters of `[A-Za-z0-9_-]`
pub fn is_valid_queue_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_QUEUE_NAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Decode an object key as it appears in event notifications.
///
/// Keys are form-URL encoded: `+` stands for a space and everything else
/// is percent-encoded.
pub fn decode_event_key(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|k| k.into_owned())
}

/// ARN pattern matching a bucket in any region and account
pub fn bucket_source_arn(bucket: &str) -> String {
    format!("arn:aws:s3:*:*:{}", bucket)
}

/// Create an ARN for a bucket
pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{}", bucket)
}

/// Create an ARN for an SQS queue
pub fn queue_arn(region: &str, account_id: &str, queue_name: &str) -> String {
    format!("arn:aws:sqs:{}:{}:{}", region, account_id, queue_name)
}

/// Two key prefixes overlap when some key could start with both
pub fn prefixes_overlap(a: &str, b: &str) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_queue_name_is_deterministic() {
        let a = derive_queue_name("my-bucket", "logs/");
        let b = derive_queue_name("my-bucket", "logs/");
        let c = derive_queue_name("my-bucket", "data/");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("s3watcher-my-bucket-"));
        assert!(is_valid_queue_name(&a));
    }

    #[test]
    fn test_derive_queue_name_sanitises_and_truncates() {
        let name = derive_queue_name("My.Bucket.With.Dots", "");
        assert!(name.starts_with("s3watcher-my-bucket-with-dots-"));
        assert!(is_valid_queue_name(&name));

        let long_bucket = "a".repeat(63);
        let name = derive_queue_name(&long_bucket, "prefix/");
        assert!(name.len() <= MAX_QUEUE_NAME_LENGTH);
        assert!(is_valid_queue_name(&name));
    }

    #[test]
    fn test_rule_id_depends_on_queue() {
        let fingerprint = scope_fingerprint("b", "logs/");
        assert!(derive_queue_name("b", "logs/").ends_with(&fingerprint));

        let id = derive_rule_id("b", "logs/", "qa");
        assert!(id.starts_with("s3watcher-"));
        assert_eq!(id.len(), "s3watcher-".len() + 12);
        assert_eq!(id, derive_rule_id("b", "logs/", "qa"));
        assert_ne!(id, derive_rule_id("b", "logs/", "qb"));
        assert_ne!(id, derive_rule_id("b", "other/", "qa"));
    }

    #[test]
    fn test_queue_name_validation() {
        assert!(is_valid_queue_name("my_queue-1"));
        assert!(!is_valid_queue_name(""));
        assert!(!is_valid_queue_name("has.dot"));
        assert!(!is_valid_queue_name(&"q".repeat(81)));
    }

    #[test]
    fn test_decode_event_key() {
        assert_eq!(decode_event_key("logs/a.txt").as_deref(), Some("logs/a.txt"));
        assert_eq!(
            decode_event_key("my+file%2Bv2.txt").as_deref(),
            Some("my file+v2.txt")
        );
        assert_eq!(
            decode_event_key("caf%C3%A9/menu.pdf").as_deref(),
            Some("café/menu.pdf")
        );
        assert!(decode_event_key("bad%FF%FE").is_none());
    }

    #[test]
    fn test_prefixes_overlap() {
        assert!(prefixes_overlap("", "logs/"));
        assert!(prefixes_overlap("logs/", "logs/2024/"));
        assert!(!prefixes_overlap("logs/", "data/"));
    }

    #[test]
    fn test_arns() {
        assert_eq!(bucket_arn("b"), "arn:aws:s3:::b");
        assert_eq!(bucket_source_arn("b"), "arn:aws:s3:*:*:b");
        assert_eq!(
            queue_arn("us-east-1", "123456789012", "q"),
            "arn:aws:sqs:us-east-1:123456789012:q"
        );
    }
}
