use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use vigilant::config::{Config, LoggingConfig};
use vigilant::source::{DetectionSource, JsonLinesSource};

#[derive(Parser)]
#[command(
    name = "vigilant",
    about = "Multi-detector severity fusion and rate-limited alerting",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults: $VIGILANT_CONFIG, then /etc/vigilant/vigilant.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed newline-delimited detection batches through the fusion loop
    Run {
        /// Batch file, or "-" for stdin
        #[arg(long, default_value = "-")]
        source: String,

        /// Pace batches by their recorded offsets
        #[arg(long)]
        realtime: bool,

        /// Status API bind address (overrides [api].bind)
        #[arg(long)]
        bind: Option<String>,

        /// Do not serve the status API
        #[arg(long, conflicts_with = "bind")]
        no_api: bool,
    },

    /// Validate the configuration and print the effective settings
    CheckConfig,
}

fn init_tracing(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::resolve(cli.config.as_deref())?;
    config.apply_env();
    init_tracing(&config.logging);

    match cli.command {
        Commands::Run {
            source,
            realtime,
            bind,
            no_api,
        } => {
            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received");
                    on_signal.cancel();
                }
            });

            let mut src: Box<dyn DetectionSource> = if source == "-" {
                Box::new(JsonLinesSource::stdin(realtime))
            } else {
                Box::new(
                    JsonLinesSource::open(Path::new(&source), realtime)
                        .await
                        .with_context(|| format!("failed to open source: {}", source))?,
                )
            };

            let bind = if no_api {
                None
            } else {
                Some(bind.unwrap_or_else(|| config.api.bind.clone()))
            };

            tracing::info!(%source, ?bind, "starting vigilant");
            let summary = vigilant::run(config, src.as_mut(), bind.as_deref(), shutdown).await?;

            println!("\n=== vigilant run summary ===");
            println!("Frames:           {}", summary.frames);
            println!("Skipped ticks:    {}", summary.skipped);
            println!("Alerts fired:     {}", summary.alerts);
            println!("Dispatched:       {}", summary.dispatch.submitted);
            println!("Dropped:          {}", summary.dispatch.dropped);
            println!("Sends delivered:  {}", summary.dispatch.delivered);
            println!("Sends failed:     {}", summary.dispatch.failed);
            println!("============================\n");
        }
        Commands::CheckConfig => {
            config.validate().context("invalid configuration")?;
            let rendered = toml::to_string_pretty(&config.redacted())?;
            println!("{}", rendered);
        }
    }

    Ok(())
}
