//! # xfeed-runner
//!
//! Runs the market-data engine from a JSON configuration file.
//!
//! Subscribes every configured symbol to every configured data type on each
//! exchange, starts the engine and logs stats periodically until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! xfeed-runner config.json --log-level info --stats-interval-sec 30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use xfeed_md::FeedEngine;

/// Multi-exchange market data runner.
#[derive(Parser)]
#[command(name = "xfeed-runner", about = "Multi-exchange market data runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides `logging.logPath`.
    #[arg(long)]
    log_dir: Option<String>,

    /// Seconds between stats log lines; 0 disables them.
    #[arg(long, default_value_t = 30)]
    stats_interval_sec: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = xfeed_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    let level = config.logging.as_ref().and_then(|l| l.level.clone()).unwrap_or(cli.log_level.clone());
    xfeed_core::logging::init_logging(&level, log_dir.as_deref(), &config.module_name());

    info!(
        "xfeed-runner starting: config={}, exchanges={:?}, market={}",
        cli.config.display(),
        config.exchanges,
        config.trading_type,
    );

    // 3. Build the engine and register subscriptions
    let engine = FeedEngine::new(config.clone())?;
    for &ex in &config.exchanges {
        for symbol in &config.symbols {
            for &dt in &config.data_types {
                if let Err(e) = engine.subscribe(ex, symbol, dt) {
                    warn!("[{ex}] skipping {symbol} {dt}: {e}");
                }
            }
        }
        if let Some(url) = engine.ws_url(ex) {
            info!("[{ex}] {} subscription(s) on {url}", engine.subscriptions(ex).len());
        }
    }

    // 4. Start
    engine.start().await?;

    let mut events = engine.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let xfeed_md::connection::ConnectionEvent::Error { exchange, message } = event {
                error!("[{exchange}] {message}");
            }
        }
    });

    // 5. Log stats until Ctrl+C
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    if cli.stats_interval_sec > 0 {
        let mut ticker = tokio::time::interval(Duration::from_secs(cli.stats_interval_sec));
        ticker.tick().await;
        loop {
            tokio::select! {
                res = &mut ctrl_c => { res?; break; }
                _ = ticker.tick() => {
                    let stats = engine.get_stats();
                    info!(
                        "stats: received={} published={} errors={} reconnections={} uptime={}s",
                        stats.messages_received,
                        stats.messages_published,
                        stats.errors,
                        stats.reconnections,
                        stats.uptime_seconds,
                    );
                    for status in engine.connection_statuses() {
                        info!("[{}] state={:?} attempt={} failed={}", status.exchange, status.state, status.attempt, status.failed);
                    }
                }
            }
        }
    } else {
        ctrl_c.await?;
    }
    info!("shutdown signal received");

    // 6. Stop
    engine.stop().await;
    info!("engine stopped");
    Ok(())
}
