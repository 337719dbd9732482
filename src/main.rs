use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use lodestar::config::{Config, ConfigManager};
use lodestar::core::{Clock, SystemClock};
use lodestar::execution::{LiveTradingLoop, LoopComponents, LoopHandle, PaperVenue, SignalStats};
use lodestar::logging::init_tracing;
use lodestar::market::PriceBoard;
use lodestar::store::seed::{load_signals, seed_all};
use lodestar::store::{MemoryAccountStore, MemorySignalStore, MemoryTradeStore};
use lodestar::transport::{ExecutionJournal, EventBus};
use lodestar::types::RiskLimits;

const CONFIG_POLL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "lodestar", version, about = "Signal-driven live trading loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a paper-trading session from the configured seed files until Ctrl+C
    Run {
        #[arg(short, long, default_value = "lodestar.toml")]
        config: PathBuf,
    },
    /// Validate a config file, including the risk limits a loop would start with
    Check {
        #[arg(short, long, default_value = "lodestar.toml")]
        config: PathBuf,
    },
    /// Print 24h statistics for the configured signal seed file
    Stats {
        #[arg(short, long, default_value = "lodestar.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Check { config } => check(config),
        Command::Stats { config } => stats(config),
    }
}

fn check(path: PathBuf) -> Result<()> {
    let config = Config::load_from_file(&path)?;
    config
        .limits
        .validate()
        .with_context(|| format!("invalid [limits] in {}", path.display()))?;
    println!("✅ {} is valid", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn stats(path: PathBuf) -> Result<()> {
    let config = Config::load_from_file(&path)?;
    let signals_path = config
        .seed
        .signals
        .context("no [seed] signals file configured")?;
    let now = SystemClock.now();
    let signals = load_signals(&signals_path, now)?;
    let stats = SignalStats::last_24h(&signals, now);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = Config::load_from_file(&config_path)?;
    let _guard = init_tracing(&config.logging)?;

    info!("🧭 Lodestar live trading session");
    info!(config = %config_path.display(), "Configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let signals = Arc::new(MemorySignalStore::new());
    let accounts = Arc::new(MemoryAccountStore::new());
    let trades = Arc::new(MemoryTradeStore::new());
    let prices = PriceBoard::new();

    let seeded = seed_all(
        config.seed.signals.as_deref(),
        config.seed.accounts.as_deref(),
        config.seed.prices.as_deref(),
        signals.as_ref(),
        accounts.as_ref(),
        &prices,
        clock.now(),
    )
    .await?;
    info!(
        signals = seeded.signals,
        accounts = seeded.accounts,
        prices = seeded.prices,
        "Stores seeded"
    );

    let live = LiveTradingLoop::new(
        LoopComponents {
            signals,
            accounts,
            trades,
            venue: Arc::new(PaperVenue::new(Arc::new(prices))),
            clock,
            bus: EventBus::new(),
            journal: ExecutionJournal::with_capacity(config.engine.journal_capacity),
        },
        config.engine.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_task = live
        .expiry_sweeper()
        .spawn(config.engine.expiry_sweep_interval(), shutdown_rx);

    let mut limits = config.limits.clone();
    let mut handle = live.start(limits.clone()).await?;

    let manager = ConfigManager::new(&config_path)?;
    let mut config_rx = manager.subscribe();
    let reload_task = manager.start_hot_reload(CONFIG_POLL);

    info!("Press Ctrl+C to stop");
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("🛑 Shutdown signal received");
                break;
            }
            changed = config_rx.changed() => {
                if changed.is_err() {
                    warn!("Config watcher stopped; keeping current limits");
                    ctrl_c_only().await;
                    break;
                }
                let reloaded = config_rx.borrow_and_update().clone();
                if reloaded.engine != config.engine {
                    warn!("Engine settings changed; they take effect on the next process start");
                }
                if reloaded.limits != limits {
                    handle = restart(&live, handle, &mut limits, reloaded.limits).await?;
                }
            }
        }
    }

    live.stop().await;
    if let Err(e) = handle.join().await {
        error!("Live trading task failed: {}", e);
    }
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_task.await {
        error!("Expiry sweeper task failed: {}", e);
    }
    reload_task.abort();

    let status = live.status().await;
    info!(
        ticks = status.ticks,
        executed = status.executed,
        rejected = status.rejected,
        failed = status.failed,
        halted = status.halted_accounts.len(),
        "Session summary"
    );
    for entry in live.journal().recent().iter().take(10) {
        info!(
            signal_id = %entry.signal_id,
            account_id = %entry.account_id,
            outcome = ?entry.outcome,
            detail = %entry.detail,
            "Recent execution"
        );
    }
    info!("👋 Lodestar shutdown complete");
    Ok(())
}

/// Stop/restart cycle for new limits. Falls back to the previous limits if the new
/// ones are refused.
async fn restart(
    live: &LiveTradingLoop,
    handle: LoopHandle,
    limits: &mut RiskLimits,
    next: RiskLimits,
) -> Result<LoopHandle> {
    info!("🔄 Risk limits changed, restarting live trading");
    live.stop().await;
    if let Err(e) = handle.join().await {
        error!("Live trading task failed: {}", e);
    }
    match live.start(next.clone()).await {
        Ok(handle) => {
            *limits = next;
            Ok(handle)
        }
        Err(e) => {
            error!(error = %e, "New limits refused, restarting with previous limits");
            Ok(live.start(limits.clone()).await?)
        }
    }
}

async fn ctrl_c_only() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
