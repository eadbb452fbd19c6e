//! list-buckets command

use super::CommandContext;
use crate::output::format_datetime;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct BucketInfo {
    name: String,
    creation_date: Option<String>,
}

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let backend = ctx.backend().await;
    let resp = backend
        .s3_client()
        .list_buckets()
        .send()
        .await
        .context("Failed to list buckets")?;

    let buckets: Vec<BucketInfo> = resp
        .buckets()
        .iter()
        .map(|b| BucketInfo {
            name: b.name().unwrap_or("").to_string(),
            creation_date: b.creation_date().and_then(|d| {
                DateTime::<Utc>::from_timestamp(d.secs(), 0).map(|dt| format_datetime(&dt))
            }),
        })
        .collect();

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&buckets)?);
        return Ok(());
    }

    for bucket in &buckets {
        println!(
            "{} {}",
            bucket
                .creation_date
                .as_deref()
                .unwrap_or("                   "),
            bucket.name.blue().bold()
        );
    }
    ctx.info(&format!("Total: {} bucket(s)", buckets.len()));

    Ok(())
}
