//! watch command - print events until interrupted

use super::CommandContext;
use crate::output::{format_event, format_report};
use anyhow::{Context, Result};
use s3watcher_engine::{EventStream, TeardownReport, Watcher};
use tokio::sync::oneshot;
use tracing::{info, warn};

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let config = ctx.config.watcher.clone();
    let scope = format!("s3://{}/{}", config.bucket, config.prefix);
    let backend = ctx.backend().await;

    let watcher = Watcher::start(config, backend)
        .await
        .with_context(|| format!("Failed to start watching {}", scope))?;
    let mut stream = watcher.watch()?;
    ctx.info(&format!("Watching {} (Ctrl-C to stop)", scope));

    let (finished_tx, finished_rx) = oneshot::channel();
    let interrupt = tokio::spawn(stop_on_interrupt(watcher.clone(), finished_rx));

    let consumed = print_events(ctx, &mut stream).await;

    // The interrupt task owns the stop, after a signal or a stream error
    let _ = finished_tx.send(());
    let report = interrupt.await?;
    ctx.info(&format_report(&report));

    consumed
}

/// Stop the watcher on Ctrl-C, or once the event stream has finished
async fn stop_on_interrupt(
    watcher: Watcher,
    mut finished: oneshot::Receiver<()>,
) -> TeardownReport {
    let interrupted = tokio::select! {
        signal = tokio::signal::ctrl_c() => Some(signal),
        _ = &mut finished => None,
    };
    match interrupted {
        Some(Ok(())) => info!("Interrupt received"),
        Some(Err(e)) => {
            warn!(error = %e, "Unable to listen for Ctrl-C, watching until the stream fails");
            let _ = finished.await;
        }
        None => {}
    }
    watcher.stop().await
}

async fn print_events(ctx: &CommandContext, stream: &mut EventStream) -> Result<()> {
    while let Some(event) = stream.next().await? {
        println!("{}", format_event(&event, ctx.output_format)?);
    }
    Ok(())
}
