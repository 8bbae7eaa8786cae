use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kmirror::build_mirror;
use kmirror_models::{Interval, MirrorConfig};

#[derive(Parser, Debug)]
#[command(
    name = "kmirror",
    about = "Self-healing local mirror of Bybit OHLCV data - stores, serves and repairs kline series"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config/kmirror.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the mirror daemon: background updater, quality monitor, and
    /// store writer, until ctrl-c
    Daemon,
    /// One-shot historical backfill for a pair
    Backfill {
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long)]
        interval: String,
        /// Candle target; defaults to the configured per-interval target
        #[arg(short, long)]
        target: Option<usize>,
    },
    /// One bounded gap-repair pass over a pair
    Repair {
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long)]
        interval: String,
        /// Repair Friday-to-Monday holes too
        #[arg(long)]
        include_weekends: bool,
    },
    /// Print the store coverage summary as JSON
    Summary,
}

fn load_config(path: &str) -> Result<MirrorConfig> {
    match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw).with_context(|| format!("Failed to parse config: {path}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path, "Config file not found, using defaults");
            Ok(MirrorConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read config: {path}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Command::Daemon => {
            let mirror = build_mirror(&config)?;

            for symbol in config.service.symbols.clone() {
                let status = mirror
                    .service
                    .initialize_symbol(
                        &symbol,
                        config.service.primary_interval.as_str(),
                        true,
                        true,
                    )
                    .await;
                tracing::info!(
                    symbol,
                    loading = status.intervals_loading.len(),
                    loaded = status.intervals_loaded.len(),
                    "Startup symbol initialized"
                );
            }

            mirror
                .service
                .start_update_service(config.service.update_interval_secs);
            mirror.quality.start();
            tracing::info!("kmirror daemon running");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Received shutdown signal");
            mirror.shutdown().await;
        }

        Command::Backfill {
            symbol,
            interval,
            target,
        } => {
            let interval: Interval = interval
                .parse()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            let mirror = build_mirror(&config)?;
            let target = target.unwrap_or_else(|| config.service.target_candles(interval));

            use kmirror_bybit::KlineSource;
            let candles = mirror
                .adapter
                .get_klines_historical(
                    &symbol,
                    interval,
                    target,
                    None,
                    config.service.market_type,
                )
                .await
                .map_err(|e| anyhow::anyhow!("Backfill fetch failed: {e}"))?;

            let queued = mirror
                .store
                .queue(&symbol, interval, config.service.market_type, &candles)
                .map_err(|e| anyhow::anyhow!("Backfill persist failed: {e}"))?;
            mirror.store.stop().await;

            println!(
                "{}",
                serde_json::json!({
                    "symbol": symbol,
                    "interval": interval,
                    "target": target,
                    "fetched": candles.len(),
                    "queued": queued,
                })
            );
        }

        Command::Repair {
            symbol,
            interval,
            include_weekends,
        } => {
            let interval: Interval = interval
                .parse()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            config.repair.skip_weekends = !include_weekends;
            let max_gaps = config.repair.max_gaps;
            let mirror = build_mirror(&config)?;

            let run = mirror
                .repair
                .repair_all_gaps(&symbol, interval, max_gaps)
                .await
                .map_err(|e| anyhow::anyhow!("Repair failed: {e}"))?;
            mirror.store.stop().await;

            println!("{}", serde_json::to_string_pretty(&run)?);
        }

        Command::Summary => {
            let mirror = build_mirror(&config)?;
            let summary = mirror
                .store
                .summary()
                .map_err(|e| anyhow::anyhow!("Summary failed: {e}"))?;
            mirror.store.stop().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
