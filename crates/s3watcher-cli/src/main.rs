//! s3watcher - stream S3 bucket changes through SQS
//!
//! Provisions a queue, routes the bucket's notifications to it and prints
//! every object created or removed under the watched prefix.

mod commands;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use commands::CommandContext;
use s3watcher_core::S3WatcherConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "s3watcher")]
#[command(version = s3watcher_core::VERSION)]
#[command(about = "Watch an S3 bucket for object changes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, env = "S3WATCHER_CONFIG")]
    config: Option<String>,

    /// Bucket to watch
    #[arg(short, long, global = true)]
    bucket: Option<String>,

    /// Key prefix to narrow the watch
    #[arg(short, long, global = true)]
    prefix: Option<String>,

    /// Queue name (derived from bucket and prefix by default)
    #[arg(long, global = true)]
    queue_name: Option<String>,

    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom endpoint URL for S3 and SQS
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// AWS credentials profile
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Commands {
    /// Print bucket events until interrupted (default)
    Watch,

    /// Create the queue and notification rule, then exit
    Setup,

    /// Remove the notification rule and delete the queue
    Teardown,

    /// List buckets visible to the configured credentials
    ListBuckets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Load the config file (or environment) and apply flag overrides
    fn load_config(&self) -> anyhow::Result<S3WatcherConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = S3WatcherConfig::from_file(path)
                    .with_context(|| format!("Failed to load {}", path))?;
                config.apply_env();
                config
            }
            None => S3WatcherConfig::from_env(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut S3WatcherConfig) {
        if let Some(bucket) = &self.bucket {
            config.watcher.bucket = bucket.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.watcher.prefix = prefix.clone();
        }
        if let Some(name) = &self.queue_name {
            config.watcher.queue_name = Some(name.clone());
        }
        if let Some(region) = &self.region {
            config.aws.region = Some(region.clone());
        }
        if let Some(endpoint) = &self.endpoint {
            config.aws.endpoint_url = Some(endpoint.clone());
            config.aws.force_path_style = true;
        }
        if let Some(profile) = &self.profile {
            config.aws.profile = Some(profile.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

fn init_logging(config: &S3WatcherConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // stdout carries events; logs go to stderr
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging(&config);

    let ctx = CommandContext {
        config,
        output_format: cli.output,
    };

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => commands::watch::execute(&ctx).await,
        Commands::Setup => commands::setup::execute(&ctx).await,
        Commands::Teardown => commands::teardown::execute(&ctx).await,
        Commands::ListBuckets => commands::list_buckets::execute(&ctx).await,
    }
}
