//! Watcher scenarios against the in-memory backend

use s3watcher_core::types::{
    EventKind, NotificationConfiguration, NotificationFilter, QueueConfiguration, S3EventType,
};
use s3watcher_core::BackendError;
use s3watcher_engine::{MemoryBackend, Operation, PollerState, WatchError, Watcher, WatcherConfig};
use std::sync::Arc;
use std::time::Duration;

fn config() -> WatcherConfig {
    WatcherConfig::new("b")
        .with_prefix("logs/")
        .with_prefetch(false)
}

#[tokio::test(start_paused = true)]
async fn test_object_events_end_to_end() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
    let watcher = Watcher::start(config(), backend.clone()).await.unwrap();
    let queue = watcher.queue().unwrap().name().to_string();
    let mut stream = watcher.watch().unwrap();

    assert_eq!(backend.put_object("b", "other/skip.txt", 1), 0);
    assert_eq!(backend.put_object("b", "logs/a.txt", 42), 1);

    let created = stream.next().await.unwrap().unwrap();
    assert_eq!(created.kind, EventKind::Created);
    assert_eq!(created.bucket, "b");
    assert_eq!(created.key, "logs/a.txt");
    assert_eq!(created.size, Some(42));
    assert!(backend.acked_message_ids(&queue).is_empty());

    assert_eq!(backend.delete_object("b", "logs/a.txt"), 1);
    let removed = stream.next().await.unwrap().unwrap();
    assert_eq!(removed.kind, EventKind::Removed);
    assert_eq!(removed.size, None);
    assert_eq!(backend.acked_message_ids(&queue).len(), 2);

    let report = watcher.stop().await;
    assert_eq!(report.drained_acks, 1);
    assert!(report.rule_detached && report.queue_deleted);
    assert!(!backend.queue_exists(&queue));
    assert!(backend.notification_config("b").unwrap().is_empty());
    assert_eq!(watcher.stats().events_yielded, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_poll_ends_stream() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
    let watcher = Watcher::start(config(), backend.clone()).await.unwrap();
    let mut stream = watcher.watch().unwrap();

    let consumer = tokio::spawn(async move { stream.next().await });
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(watcher.state(), PollerState::Polling);

    let report = watcher.stop().await;

    assert!(consumer.await.unwrap().unwrap().is_none());
    assert_eq!(watcher.state(), PollerState::Stopped);
    assert!(report.is_clean());
    assert!(matches!(watcher.watch(), Err(WatchError::Closed)));
    assert!(matches!(watcher.queue(), Err(WatchError::Closed)));
}

#[tokio::test]
async fn test_repeated_start_reuses_resources() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
    let first = Watcher::start(config(), backend.clone()).await.unwrap();
    let second = Watcher::start(config(), backend.clone()).await.unwrap();

    assert_eq!(first.queue().unwrap().address, second.queue().unwrap().address);
    assert!(!second.queue().unwrap().created);
    assert_eq!(first.rule().unwrap(), second.rule().unwrap());
    assert_eq!(backend.queue_names().len(), 1);
    assert_eq!(backend.call_count(Operation::PutBucketNotification), 1);

    assert!(first.stop().await.queue_deleted);
    let report = second.stop().await;
    assert!(!report.rule_detached);
    assert!(!report.queue_deleted);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_unrelated_rules_survive_start_and_stop() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
    let foreign = NotificationConfiguration::new().add_queue(QueueConfiguration {
        id: "ingest".into(),
        queue_arn: "arn:aws:sqs:us-east-1:111122223333:ingest".into(),
        events: vec![S3EventType::ObjectCreatedPut],
        filter: Some(NotificationFilter::prefix("incoming/")),
    });
    backend.set_notification_config("b", foreign.clone());

    let watcher = Watcher::start(config(), backend.clone()).await.unwrap();
    assert_eq!(
        backend.notification_config("b").unwrap().queue_configurations.len(),
        2
    );

    watcher.stop().await;
    assert_eq!(backend.notification_config("b").unwrap(), foreign);
}

#[tokio::test]
async fn test_provision_failure_attaches_nothing() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
    backend.fail_next(Operation::CreateQueue, BackendError::access_denied("denied"));

    let err = Watcher::start(config(), backend.clone()).await.unwrap_err();

    assert_eq!(err.code(), "ProvisionError");
    assert!(err.is_setup_error());
    assert!(backend.notification_config("b").unwrap().is_empty());
    assert_eq!(backend.call_count(Operation::GetBucketNotification), 0);
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_message_is_suppressed() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
    let watcher = Watcher::start(config(), backend.clone()).await.unwrap();
    let queue = watcher.queue().unwrap().name().to_string();
    let mut stream = watcher.watch().unwrap();

    backend.put_object("b", "logs/a.txt", 1);
    assert_eq!(stream.next().await.unwrap().unwrap().key, "logs/a.txt");

    // visibility timeout lapses before the acknowledgment goes out
    assert_eq!(backend.requeue_in_flight(&queue), 2);
    backend.put_object("b", "logs/b.txt", 1);

    assert_eq!(stream.next().await.unwrap().unwrap().key, "logs/b.txt");
    assert_eq!(watcher.stats().duplicates_suppressed, 1);

    watcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payloads_are_skipped() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
    let watcher = Watcher::start(config(), backend.clone()).await.unwrap();
    let queue = watcher.queue().unwrap().name().to_string();
    let mut stream = watcher.watch().unwrap();

    backend.send_message(&queue, "{not json").unwrap();
    backend.send_message(&queue, r#"{"Records": "nope"}"#).unwrap();
    backend.put_object("b", "logs/a.txt", 7);

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.key, "logs/a.txt");
    assert_eq!(watcher.stats().decode_warnings, 2);

    watcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_watchers_on_separate_queues_keep_their_rules() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("b"));
    let first = Watcher::start(config().with_queue_name("qa"), backend.clone())
        .await
        .unwrap();
    let second = Watcher::start(config().with_queue_name("qb"), backend.clone())
        .await
        .unwrap();

    let first_rule = first.rule().unwrap();
    let second_rule = second.rule().unwrap();
    assert_ne!(first_rule.id, second_rule.id);
    let document = backend.notification_config("b").unwrap();
    assert_eq!(document.queue_configurations.len(), 2);
    assert!(document.queue_rule(&first_rule.id).is_some());
    assert!(document.queue_rule(&second_rule.id).is_some());

    let mut first_stream = first.watch().unwrap();
    let mut second_stream = second.watch().unwrap();
    assert_eq!(backend.put_object("b", "logs/a.txt", 1), 2);
    assert_eq!(first_stream.next().await.unwrap().unwrap().key, "logs/a.txt");
    assert_eq!(second_stream.next().await.unwrap().unwrap().key, "logs/a.txt");

    let report = first.stop().await;
    assert!(report.rule_detached && report.queue_deleted);
    let document = backend.notification_config("b").unwrap();
    assert_eq!(document.queue_configurations.len(), 1);
    assert_eq!(document.queue_configurations[0].id, second_rule.id);
    assert!(backend.queue_exists("qb"));

    assert_eq!(backend.put_object("b", "logs/b.txt", 1), 1);
    assert_eq!(second_stream.next().await.unwrap().unwrap().key, "logs/b.txt");

    second.stop().await;
    assert!(backend.notification_config("b").unwrap().is_empty());
}
