//! teardown command - remove the rule and queue left by `setup`

use super::CommandContext;
use anyhow::{Context, Result};
use colored::Colorize;
use s3watcher_engine::{NotificationConfigurator, ResourceProvisioner};
use serde::Serialize;

#[derive(Serialize)]
struct TeardownResult {
    rule_id: String,
    rule_detached: bool,
    queue_name: String,
    queue_deleted: bool,
}

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let config = &ctx.config.watcher;
    config.validate()?;
    let backend = ctx.backend().await;

    let rule_id = config.rule_id();
    let rule_detached = NotificationConfigurator::new(backend.clone())
        .detach_id(&config.bucket, &rule_id)
        .await
        .with_context(|| format!("Failed to detach rule {} from {}", rule_id, config.bucket))?;

    let queue_name = config.resolved_queue_name();
    let queue_deleted = ResourceProvisioner::new(backend)
        .release_named(&queue_name)
        .await
        .with_context(|| format!("Failed to delete queue {}", queue_name))?;

    let result = TeardownResult {
        rule_id,
        rule_detached,
        queue_name,
        queue_deleted,
    };

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let status = |done: bool| if done { "removed".red() } else { "absent".dimmed() };
        println!("rule {}: {}", result.rule_id, status(result.rule_detached));
        println!("queue {}: {}", result.queue_name, status(result.queue_deleted));
    }

    Ok(())
}
