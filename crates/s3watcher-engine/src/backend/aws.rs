//! AWS backend: S3 for notification documents, SQS for queues

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::types as s3;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::QueueAttributeName;
use s3watcher_core::config::AwsConfig;
use s3watcher_core::types::{
    FilterRule, LambdaFunctionConfiguration, NotificationConfiguration, NotificationFilter,
    PolicyDocument, QueueAddress, QueueConfiguration, QueueSettings, RawMessage, S3EventType,
    S3KeyFilter, TopicConfiguration,
};
use s3watcher_core::{BackendError, BackendErrorKind};
use std::time::Duration;
use tracing::{debug, warn};

use super::{BackendResult, NotificationBackend, Operation};

/// Backend talking to S3 and SQS through the AWS SDK
#[derive(Debug, Clone)]
pub struct AwsBackend {
    s3: aws_sdk_s3::Client,
    sqs: aws_sdk_sqs::Client,
}

impl AwsBackend {
    pub fn new(s3: aws_sdk_s3::Client, sqs: aws_sdk_sqs::Client) -> Self {
        Self { s3, sqs }
    }

    /// Build clients from the default provider chain plus any overrides
    pub async fn from_config(config: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some((key, secret)) = config.static_credentials() {
            loader = loader.credentials_provider(Credentials::new(key, secret, None, None, "s3watcher"));
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        Self {
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            sqs: aws_sdk_sqs::Client::new(&shared),
        }
    }

    pub fn s3_client(&self) -> &aws_sdk_s3::Client {
        &self.s3
    }

    async fn queue_arn(&self, url: &str) -> BackendResult<String> {
        let output = self
            .sqs
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| classify(Operation::GetQueue, e))?;

        output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
            .cloned()
            .ok_or_else(|| {
                BackendError::new(BackendErrorKind::Other, format!("Queue {} has no ARN", url))
            })
    }
}

/// Map an SDK failure onto the backend error taxonomy
fn classify<E, R>(operation: Operation, err: SdkError<E, R>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let error = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            BackendError::unavailable(DisplayErrorContext(&err).to_string())
        }
        SdkError::ServiceError(ctx) => {
            let service = ctx.err();
            let message = service
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            match service.code() {
                Some(code) => BackendError::from_code(code, message),
                None => BackendError::new(BackendErrorKind::Other, message),
            }
        }
        _ => BackendError::new(BackendErrorKind::Other, DisplayErrorContext(&err).to_string()),
    };
    debug!(operation = %operation, error = %error, "AWS call failed");
    error
}

fn seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl NotificationBackend for AwsBackend {
    async fn get_queue(&self, name: &str) -> BackendResult<Option<QueueAddress>> {
        let url = match self.sqs.get_queue_url().queue_name(name).send().await {
            Ok(output) => match output.queue_url() {
                Some(url) => url.to_string(),
                None => return Ok(None),
            },
            Err(e) => {
                let error = classify(Operation::GetQueue, e);
                if error.kind == BackendErrorKind::NoSuchQueue {
                    return Ok(None);
                }
                return Err(error);
            }
        };

        let arn = self.queue_arn(&url).await?;
        Ok(Some(QueueAddress {
            name: name.to_string(),
            url,
            arn,
        }))
    }

    async fn create_queue(
        &self,
        name: &str,
        settings: &QueueSettings,
    ) -> BackendResult<QueueAddress> {
        let output = self
            .sqs
            .create_queue()
            .queue_name(name)
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                settings.visibility_timeout.as_secs().to_string(),
            )
            .attributes(
                QueueAttributeName::ReceiveMessageWaitTimeSeconds,
                settings.receive_wait.as_secs().to_string(),
            )
            .send()
            .await
            .map_err(|e| classify(Operation::CreateQueue, e))?;

        let url = output
            .queue_url()
            .ok_or_else(|| {
                BackendError::new(
                    BackendErrorKind::Other,
                    format!("CreateQueue returned no URL for {}", name),
                )
            })?
            .to_string();
        let arn = self.queue_arn(&url).await?;

        Ok(QueueAddress {
            name: name.to_string(),
            url,
            arn,
        })
    }

    async fn set_queue_policy(
        &self,
        queue: &QueueAddress,
        policy: &PolicyDocument,
    ) -> BackendResult<()> {
        self.sqs
            .set_queue_attributes()
            .queue_url(&queue.url)
            .attributes(QueueAttributeName::Policy, policy.to_json())
            .send()
            .await
            .map_err(|e| classify(Operation::SetQueuePolicy, e))?;
        Ok(())
    }

    async fn purge_queue(&self, queue: &QueueAddress) -> BackendResult<()> {
        self.sqs
            .purge_queue()
            .queue_url(&queue.url)
            .send()
            .await
            .map_err(|e| classify(Operation::PurgeQueue, e))?;
        Ok(())
    }

    async fn delete_queue(&self, queue: &QueueAddress) -> BackendResult<()> {
        self.sqs
            .delete_queue()
            .queue_url(&queue.url)
            .send()
            .await
            .map_err(|e| classify(Operation::DeleteQueue, e))?;
        Ok(())
    }

    async fn get_bucket_notification_config(
        &self,
        bucket: &str,
    ) -> BackendResult<NotificationConfiguration> {
        let output = self
            .s3
            .get_bucket_notification_configuration()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| classify(Operation::GetBucketNotification, e))?;

        Ok(NotificationConfiguration {
            queue_configurations: output
                .queue_configurations()
                .iter()
                .map(|q| QueueConfiguration {
                    id: q.id().unwrap_or_default().to_string(),
                    queue_arn: q.queue_arn().to_string(),
                    events: events_from_sdk(q.events()),
                    filter: filter_from_sdk(q.filter()),
                })
                .collect(),
            topic_configurations: output
                .topic_configurations()
                .iter()
                .map(|t| TopicConfiguration {
                    id: t.id().unwrap_or_default().to_string(),
                    topic_arn: t.topic_arn().to_string(),
                    events: events_from_sdk(t.events()),
                    filter: filter_from_sdk(t.filter()),
                })
                .collect(),
            lambda_function_configurations: output
                .lambda_function_configurations()
                .iter()
                .map(|l| LambdaFunctionConfiguration {
                    id: l.id().unwrap_or_default().to_string(),
                    lambda_function_arn: l.lambda_function_arn().to_string(),
                    events: events_from_sdk(l.events()),
                    filter: filter_from_sdk(l.filter()),
                })
                .collect(),
            event_bridge_enabled: output.event_bridge_configuration().is_some(),
        })
    }

    async fn put_bucket_notification_config(
        &self,
        bucket: &str,
        config: &NotificationConfiguration,
    ) -> BackendResult<()> {
        let document = to_sdk(config)?;
        self.s3
            .put_bucket_notification_configuration()
            .bucket(bucket)
            .notification_configuration(document)
            .send()
            .await
            .map_err(|e| classify(Operation::PutBucketNotification, e))?;
        Ok(())
    }

    async fn receive_messages(
        &self,
        queue: &QueueAddress,
        wait: Duration,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> BackendResult<Vec<RawMessage>> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(&queue.url)
            .max_number_of_messages(i32::try_from(max_messages).unwrap_or(10))
            .wait_time_seconds(seconds(wait))
            .visibility_timeout(seconds(visibility_timeout))
            .send()
            .await
            .map_err(|e| classify(Operation::ReceiveMessages, e))?;

        let mut messages = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            let Some(receipt_handle) = message.receipt_handle() else {
                warn!(queue = %queue.name, "Received message without receipt handle");
                continue;
            };
            messages.push(RawMessage {
                message_id: message.message_id().unwrap_or_default().to_string(),
                receipt_handle: receipt_handle.to_string(),
                body: message.body().unwrap_or_default().to_string(),
                receive_count: None,
            });
        }
        Ok(messages)
    }

    async fn delete_message(&self, queue: &QueueAddress, receipt_handle: &str) -> BackendResult<()> {
        self.sqs
            .delete_message()
            .queue_url(&queue.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| classify(Operation::DeleteMessage, e))?;
        Ok(())
    }
}

// ============================================================================
// Notification document conversion
// ============================================================================

fn events_from_sdk(events: &[s3::Event]) -> Vec<S3EventType> {
    events.iter().map(|e| S3EventType::parse(e.as_str())).collect()
}

fn filter_from_sdk(filter: Option<&s3::NotificationConfigurationFilter>) -> Option<NotificationFilter> {
    let key = filter?.key()?;
    Some(NotificationFilter {
        key: Some(S3KeyFilter {
            filter_rules: key
                .filter_rules()
                .iter()
                .map(|rule| FilterRule {
                    name: rule
                        .name()
                        .map(|n| n.as_str().to_string())
                        .unwrap_or_default(),
                    value: rule.value().unwrap_or_default().to_string(),
                })
                .collect(),
        }),
    })
}

fn events_to_sdk(events: &[S3EventType]) -> Vec<s3::Event> {
    events.iter().map(|e| s3::Event::from(e.as_str())).collect()
}

fn filter_to_sdk(filter: Option<&NotificationFilter>) -> Option<s3::NotificationConfigurationFilter> {
    let key = filter?.key.as_ref()?;
    let rules = key
        .filter_rules
        .iter()
        .map(|rule| {
            s3::FilterRule::builder()
                .name(s3::FilterRuleName::from(rule.name.as_str()))
                .value(&rule.value)
                .build()
        })
        .collect();

    Some(
        s3::NotificationConfigurationFilter::builder()
            .key(s3::S3KeyFilter::builder().set_filter_rules(Some(rules)).build())
            .build(),
    )
}

fn non_empty(id: &str) -> Option<String> {
    (!id.is_empty()).then(|| id.to_string())
}

fn invalid_document(e: impl std::fmt::Display) -> BackendError {
    BackendError::new(
        BackendErrorKind::InvalidRequest,
        format!("Invalid notification configuration: {}", e),
    )
}

fn to_sdk(config: &NotificationConfiguration) -> BackendResult<s3::NotificationConfiguration> {
    let queues = config
        .queue_configurations
        .iter()
        .map(|q| {
            s3::QueueConfiguration::builder()
                .set_id(non_empty(&q.id))
                .queue_arn(&q.queue_arn)
                .set_events(Some(events_to_sdk(&q.events)))
                .set_filter(filter_to_sdk(q.filter.as_ref()))
                .build()
                .map_err(invalid_document)
        })
        .collect::<BackendResult<Vec<_>>>()?;

    let topics = config
        .topic_configurations
        .iter()
        .map(|t| {
            s3::TopicConfiguration::builder()
                .set_id(non_empty(&t.id))
                .topic_arn(&t.topic_arn)
                .set_events(Some(events_to_sdk(&t.events)))
                .set_filter(filter_to_sdk(t.filter.as_ref()))
                .build()
                .map_err(invalid_document)
        })
        .collect::<BackendResult<Vec<_>>>()?;

    let lambdas = config
        .lambda_function_configurations
        .iter()
        .map(|l| {
            s3::LambdaFunctionConfiguration::builder()
                .set_id(non_empty(&l.id))
                .lambda_function_arn(&l.lambda_function_arn)
                .set_events(Some(events_to_sdk(&l.events)))
                .set_filter(filter_to_sdk(l.filter.as_ref()))
                .build()
                .map_err(invalid_document)
        })
        .collect::<BackendResult<Vec<_>>>()?;

    Ok(s3::NotificationConfiguration::builder()
        .set_queue_configurations(Some(queues))
        .set_topic_configurations(Some(topics))
        .set_lambda_function_configurations(Some(lambdas))
        .set_event_bridge_configuration(
            config
                .event_bridge_enabled
                .then(|| s3::EventBridgeConfiguration::builder().build()),
        )
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_keeps_every_destination() {
        let config = NotificationConfiguration::new()
            .add_queue(QueueConfiguration {
                id: "s3watcher-rule".into(),
                queue_arn: "arn:aws:sqs:us-east-1:111122223333:q".into(),
                events: vec![S3EventType::ObjectCreatedAll],
                filter: Some(NotificationFilter::prefix("logs/")),
            })
            .add_topic(TopicConfiguration {
                id: String::new(),
                topic_arn: "arn:aws:sns:us-east-1:111122223333:audit".into(),
                events: vec![S3EventType::ObjectRemovedDelete],
                filter: None,
            })
            .add_lambda(LambdaFunctionConfiguration {
                id: "thumbs".into(),
                lambda_function_arn: "arn:aws:lambda:us-east-1:111122223333:function:t".into(),
                events: vec![S3EventType::ObjectCreatedPut],
                filter: None,
            });

        let document = to_sdk(&config).unwrap();

        let queue = &document.queue_configurations()[0];
        assert_eq!(queue.id(), Some("s3watcher-rule"));
        assert_eq!(queue.events()[0].as_str(), "s3:ObjectCreated:*");
        assert_eq!(
            filter_from_sdk(queue.filter()),
            Some(NotificationFilter::prefix("logs/"))
        );
        assert_eq!(document.topic_configurations()[0].id(), None);
        assert_eq!(document.lambda_function_configurations().len(), 1);
        assert!(document.event_bridge_configuration().is_none());
    }

    #[test]
    fn test_event_bridge_flag() {
        let config = NotificationConfiguration {
            event_bridge_enabled: true,
            ..NotificationConfiguration::default()
        };
        assert!(to_sdk(&config).unwrap().event_bridge_configuration().is_some());
    }

    #[test]
    fn test_seconds_saturate() {
        assert_eq!(seconds(Duration::from_secs(20)), 20);
        assert_eq!(seconds(Duration::from_secs(u64::MAX)), i32::MAX);
    }
}
