//! Event and report formatting

use chrono::{DateTime, Utc};
use colored::Colorize;
use s3watcher_engine::{EventKind, S3Event, TeardownReport};

use crate::OutputFormat;

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// One output line per event
pub fn format_event(event: &S3Event, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(event)?),
        OutputFormat::Text => {
            let kind = match event.kind {
                EventKind::Created => "created".green(),
                EventKind::Removed => "removed".red(),
                EventKind::Other => event.kind.as_str().normal(),
            };
            let mut line = format!(
                "{} {:<7} {}",
                format_datetime(&event.timestamp),
                kind,
                event.uri()
            );
            if let Some(size) = event.size {
                line.push_str(&format!(" ({})", format_size(size)));
            }
            Ok(line)
        }
    }
}

pub fn format_report(report: &TeardownReport) -> String {
    let mut lines = vec![format!(
        "Stopped: {} acknowledged on drain, rule {}, queue {}",
        report.drained_acks,
        if report.rule_detached { "detached" } else { "kept" },
        if report.queue_deleted { "deleted" } else { "kept" },
    )];
    for warning in &report.warnings {
        lines.push(format!("  {}: {}", "warning".yellow(), warning));
    }
    lines.join("\n")
}
