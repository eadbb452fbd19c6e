//! setup command - provision the queue and attach the rule, then exit

use super::CommandContext;
use anyhow::Result;
use colored::Colorize;
use s3watcher_core::types::{NotificationRule, QueueHandle};
use s3watcher_core::WatcherConfig;
use s3watcher_engine::{NotificationBackend, NotificationConfigurator, ResourceProvisioner};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Serialize)]
struct SetupResult {
    queue_name: String,
    queue_url: String,
    queue_arn: String,
    queue_created: bool,
    rule_id: String,
}

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let config = &ctx.config.watcher;
    config.validate()?;
    let backend = ctx.backend().await;

    let (queue, rule) = provision(backend, config).await?;

    let result = SetupResult {
        queue_name: queue.name().to_string(),
        queue_url: queue.url().to_string(),
        queue_arn: queue.arn().to_string(),
        queue_created: queue.created,
        rule_id: rule.id,
    };

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{}: s3://{}/{} -> {}",
            "watching".green(),
            config.bucket,
            config.prefix,
            result.queue_arn
        );
        println!("queue: {}", result.queue_url);
        println!("rule:  {}", result.rule_id);
    }

    Ok(())
}

/// Ensure the queue and attach the rule, removing a queue created here if
/// the attach fails
async fn provision(
    backend: Arc<dyn NotificationBackend>,
    config: &WatcherConfig,
) -> Result<(QueueHandle, NotificationRule)> {
    let provisioner = ResourceProvisioner::new(backend.clone());
    let queue = provisioner.ensure(config).await?;

    match NotificationConfigurator::new(backend)
        .attach(&config.bucket, &config.prefix, &queue, &config.events)
        .await
    {
        Ok(rule) => Ok((queue, rule)),
        Err(e) => {
            if queue.created {
                if let Err(release_err) = provisioner.release(&queue).await {
                    warn!(queue = %queue.name(), error = %release_err, "Failed to roll back queue");
                }
            }
            Err(e.into())
        }
    }
}
