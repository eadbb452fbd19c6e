//! Bucket notification rule management
//!
//! The bucket keeps a single notification document shared by every consumer,
//! so each change is a read-modify-write that preserves rules owned by others.
//! Two writers racing on the same bucket can still lose an update; the backend
//! offers no conditional write for this document.

use s3watcher_core::types::{NotificationRule, QueueHandle, S3EventType};
use s3watcher_core::utils::derive_rule_id;
use s3watcher_core::{BackendError, Result, WatchError};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{BackendResult, NotificationBackend};

pub struct NotificationConfigurator {
    backend: Arc<dyn NotificationBackend>,
}

impl NotificationConfigurator {
    pub fn new(backend: Arc<dyn NotificationBackend>) -> Self {
        Self { backend }
    }

    /// Route `events` on `bucket` under `prefix` to the queue.
    ///
    /// - an identical rule with our id is reused without writing
    /// - a rule with our id but different settings is replaced in place
    /// - a rule with our id routed to another queue, or another rule already
    ///   sending overlapping events to the same queue, is a
    ///   [`WatchError::RuleConflict`]
    pub async fn attach(
        &self,
        bucket: &str,
        prefix: &str,
        queue: &QueueHandle,
        events: &[S3EventType],
    ) -> Result<NotificationRule> {
        let rule = NotificationRule {
            id: derive_rule_id(bucket, prefix, queue.name()),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            queue_arn: queue.arn().to_string(),
            events: events.to_vec(),
        };

        let configuration_error = |source: BackendError| WatchError::Configuration {
            bucket: bucket.to_string(),
            source,
        };

        let mut document = self
            .backend
            .get_bucket_notification_config(bucket)
            .await
            .map_err(configuration_error)?;

        if let Some(existing) = document.queue_configurations.iter().find(|q| {
            if q.id == rule.id {
                q.queue_arn != rule.queue_arn
            } else {
                rule.overlaps(q)
            }
        }) {
            return Err(WatchError::RuleConflict {
                existing: existing.id.clone(),
                queue_arn: rule.queue_arn.clone(),
            });
        }

        match document
            .queue_configurations
            .iter()
            .position(|q| q.id == rule.id)
        {
            Some(index) if rule.is_equivalent(&document.queue_configurations[index]) => {
                debug!(bucket = %bucket, rule = %rule.id, "Notification rule already in place");
                return Ok(rule);
            }
            Some(index) => {
                warn!(bucket = %bucket, rule = %rule.id, "Replacing outdated notification rule");
                document.queue_configurations[index] = rule.to_queue_configuration();
            }
            None => document
                .queue_configurations
                .push(rule.to_queue_configuration()),
        }

        self.backend
            .put_bucket_notification_config(bucket, &document)
            .await
            .map_err(configuration_error)?;

        info!(
            bucket = %bucket,
            prefix = %prefix,
            rule = %rule.id,
            queue = %rule.queue_arn,
            "Attached notification rule"
        );
        Ok(rule)
    }

    /// Remove the rule, leaving every other rule untouched.
    ///
    /// Returns `false` when the rule was already gone or now routes to a
    /// different queue.
    pub async fn detach(&self, rule: &NotificationRule) -> BackendResult<bool> {
        let mut document = self
            .backend
            .get_bucket_notification_config(&rule.bucket)
            .await?;

        match document.queue_rule(&rule.id) {
            None => {
                debug!(bucket = %rule.bucket, rule = %rule.id, "Notification rule already detached");
                return Ok(false);
            }
            Some(existing) if existing.queue_arn != rule.queue_arn => {
                warn!(
                    bucket = %rule.bucket,
                    rule = %rule.id,
                    queue = %existing.queue_arn,
                    "Notification rule now targets another queue, leaving it in place"
                );
                return Ok(false);
            }
            Some(_) => {}
        }
        document.remove_queue_rule(&rule.id);

        self.backend
            .put_bucket_notification_config(&rule.bucket, &document)
            .await?;

        info!(bucket = %rule.bucket, rule = %rule.id, "Detached notification rule");
        Ok(true)
    }

    /// Remove the queue rule `rule_id` from `bucket`
    pub async fn detach_id(&self, bucket: &str, rule_id: &str) -> BackendResult<bool> {
        let mut document = self.backend.get_bucket_notification_config(bucket).await?;

        if document.remove_queue_rule(rule_id).is_none() {
            debug!(bucket = %bucket, rule = %rule_id, "Notification rule already detached");
            return Ok(false);
        }

        self.backend
            .put_bucket_notification_config(bucket, &document)
            .await?;

        info!(bucket = %bucket, rule = %rule_id, "Detached notification rule");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Operation};
    use crate::provisioner::ResourceProvisioner;
    use s3watcher_core::types::{
        NotificationConfiguration, NotificationFilter, QueueConfiguration, TopicConfiguration,
    };
    use s3watcher_core::WatcherConfig;

    fn events() -> Vec<S3EventType> {
        vec![S3EventType::ObjectCreatedAll, S3EventType::ObjectRemovedAll]
    }

    async fn setup(backend: &Arc<MemoryBackend>, prefix: &str) -> QueueHandle {
        ResourceProvisioner::new(backend.clone())
            .ensure(&WatcherConfig::new("b").with_prefix(prefix))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_attach_preserves_unrelated_rules() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let unrelated = QueueConfiguration {
            id: "ingest".into(),
            queue_arn: "arn:aws:sqs:us-east-1:111122223333:ingest".into(),
            events: vec![S3EventType::ObjectCreatedPut],
            filter: Some(NotificationFilter::prefix("incoming/")),
        };
        let topic = TopicConfiguration {
            id: "audit".into(),
            topic_arn: "arn:aws:sns:us-east-1:111122223333:audit".into(),
            events: vec![S3EventType::ObjectRemovedAll],
            filter: None,
        };
        backend.set_notification_config(
            "b",
            NotificationConfiguration::new()
                .add_queue(unrelated.clone())
                .add_topic(topic.clone()),
        );
        let queue = setup(&backend, "logs/").await;
        let configurator = NotificationConfigurator::new(backend.clone());

        let rule = configurator
            .attach("b", "logs/", &queue, &events())
            .await
            .unwrap();

        let document = backend.notification_config("b").unwrap();
        assert_eq!(document.queue_configurations.len(), 2);
        assert_eq!(document.queue_configurations[0], unrelated);
        assert_eq!(document.topic_configurations, vec![topic.clone()]);
        assert!(rule.is_equivalent(document.queue_rule(&rule.id).unwrap()));

        assert!(configurator.detach(&rule).await.unwrap());
        let document = backend.notification_config("b").unwrap();
        assert_eq!(document.queue_configurations, vec![unrelated]);
        assert_eq!(document.topic_configurations, vec![topic]);
    }

    #[tokio::test]
    async fn test_attach_twice_does_not_rewrite() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let queue = setup(&backend, "").await;
        let configurator = NotificationConfigurator::new(backend.clone());

        let first = configurator.attach("b", "", &queue, &events()).await.unwrap();
        let second = configurator.attach("b", "", &queue, &events()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.call_count(Operation::PutBucketNotification), 1);
        assert_eq!(
            backend.notification_config("b").unwrap().queue_configurations.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_attach_replaces_drifted_rule() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let queue = setup(&backend, "").await;
        let configurator = NotificationConfigurator::new(backend.clone());

        configurator
            .attach("b", "", &queue, &[S3EventType::ObjectCreatedAll])
            .await
            .unwrap();
        let rule = configurator.attach("b", "", &queue, &events()).await.unwrap();

        let document = backend.notification_config("b").unwrap();
        assert_eq!(document.queue_configurations.len(), 1);
        assert_eq!(document.queue_configurations[0].events, rule.events);
    }

    #[tokio::test]
    async fn test_overlapping_foreign_rule_conflicts() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let queue = setup(&backend, "logs/").await;
        backend.set_notification_config(
            "b",
            NotificationConfiguration::new().add_queue(QueueConfiguration {
                id: "hand-made".into(),
                queue_arn: queue.arn().to_string(),
                events: vec![S3EventType::ObjectCreatedPut],
                filter: None,
            }),
        );
        let configurator = NotificationConfigurator::new(backend.clone());

        let err = configurator
            .attach("b", "logs/", &queue, &events())
            .await
            .unwrap_err();

        assert!(matches!(err, WatchError::RuleConflict { ref existing, .. } if existing == "hand-made"));
        assert_eq!(backend.call_count(Operation::PutBucketNotification), 0);
    }

    #[tokio::test]
    async fn test_attach_errors_are_configuration_errors() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let queue = setup(&backend, "").await;
        let configurator = NotificationConfigurator::new(backend.clone());

        let err = configurator
            .attach("missing", "", &queue, &events())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Configuration { .. }));

        backend.fail_next(
            Operation::PutBucketNotification,
            BackendError::access_denied("denied"),
        );
        let err = configurator.attach("b", "", &queue, &events()).await.unwrap_err();
        assert_eq!(err.code(), "ConfigurationError");
    }

    #[tokio::test]
    async fn test_detach_missing_rule_is_noop() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let configurator = NotificationConfigurator::new(backend.clone());
        let rule = NotificationRule {
            id: derive_rule_id("b", "", "q"),
            bucket: "b".into(),
            prefix: String::new(),
            queue_arn: "arn:q".into(),
            events: events(),
        };

        assert!(!configurator.detach(&rule).await.unwrap());
        assert_eq!(backend.call_count(Operation::PutBucketNotification), 0);
    }

    #[tokio::test]
    async fn test_rule_routed_elsewhere_is_not_replaced_or_removed() {
        let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
        let queue = setup(&backend, "logs/").await;
        let configurator = NotificationConfigurator::new(backend.clone());
        let rule = configurator
            .attach("b", "logs/", &queue, &events())
            .await
            .unwrap();

        // same id, but routed to a queue in another account
        let foreign_arn = "arn:aws:sqs:us-east-1:111122223333:other";
        let mut document = backend.notification_config("b").unwrap();
        document.queue_configurations[0].queue_arn = foreign_arn.into();
        backend.set_notification_config("b", document);

        let err = configurator
            .attach("b", "logs/", &queue, &events())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::RuleConflict { ref existing, .. } if *existing == rule.id));

        assert!(!configurator.detach(&rule).await.unwrap());
        let document = backend.notification_config("b").unwrap();
        assert_eq!(document.queue_configurations.len(), 1);
        assert_eq!(document.queue_configurations[0].queue_arn, foreign_arn);
    }
}
