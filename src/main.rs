use clap::{Parser, Subcommand};
use tokio::sync::watch;

use perpbot::api::{ExchangeClient, SignalClient};
use perpbot::checkpoint::{Checkpoint, CheckpointStore};
use perpbot::config::BotConfig;
use perpbot::engine::{EngineState, TradingEngine};
use perpbot::Result;

#[derive(Parser)]
#[command(name = "perpbot", about = "Risk-managed perpetual futures trading bot")]
struct Cli {
    /// Path to a config file (TOML/YAML/JSON); env vars override it
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading loop (default)
    Run {
        /// Resume engine state from the latest checkpoint
        #[arg(long)]
        resume: bool,
    },
    /// List saved checkpoints
    Checkpoints,
    /// Inspect the latest checkpoint without starting the bot
    Inspect,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = BotConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run { resume: false }) {
        Command::Run { resume } => run_bot(config, resume).await,
        Command::Checkpoints => list_checkpoints(config),
        Command::Inspect => inspect_latest(config),
    }
}

async fn run_bot(config: BotConfig, resume: bool) -> Result<()> {
    tracing::info!("🚀 PerpBot starting");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Symbol: {}", config.symbol);
    tracing::info!("  Cycle Interval: {}s", config.cycle_interval_secs);
    tracing::info!(
        "  Daily Loss Limit: {}%",
        config.breaker.daily_loss_threshold * 100.0
    );
    tracing::info!("  Max Drawdown: {}%", config.breaker.max_drawdown * 100.0);
    tracing::info!(
        "  Checkpoints: {} every {}s",
        config.checkpoint.dir,
        config.checkpoint.interval_secs
    );

    let exchange_url = std::env::var("EXCHANGE_URL")
        .unwrap_or_else(|_| "https://api.exchange.example".to_string());
    let exchange_api_key =
        std::env::var("EXCHANGE_API_KEY").expect("EXCHANGE_API_KEY not found in environment");
    let signal_url = std::env::var("SIGNAL_URL")
        .unwrap_or_else(|_| "https://signals.example".to_string());

    let exchange = ExchangeClient::new(&exchange_url, &exchange_api_key);
    let signals = SignalClient::new(&signal_url);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut engine = TradingEngine::new(config.clone(), exchange, signals, shutdown_rx.clone());

    if resume {
        let store = CheckpointStore::new(config.checkpoint.clone());
        match store.restore_latest::<EngineState>() {
            Ok(checkpoint) => {
                tracing::info!(
                    taken_at = %checkpoint.taken_at,
                    positions = checkpoint.state.positions.len(),
                    "✅ Resumed from checkpoint"
                );
                engine = engine.with_state(checkpoint.state);
            }
            Err(error) => {
                tracing::warn!(%error, "no usable checkpoint, starting fresh");
            }
        }
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    engine.run(shutdown_rx).await;
    tracing::info!("👋 PerpBot stopped");
    Ok(())
}

fn list_checkpoints(config: BotConfig) -> Result<()> {
    let store = CheckpointStore::new(config.checkpoint);
    let paths = store.list()?;
    if paths.is_empty() {
        println!("No checkpoints found.");
        return Ok(());
    }
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn inspect_latest(config: BotConfig) -> Result<()> {
    let store = CheckpointStore::new(config.checkpoint);
    let checkpoint: Checkpoint<EngineState> = store.restore_latest()?;
    println!("Checkpoint: {} ({})", checkpoint.label, checkpoint.taken_at);
    println!("  Open positions:     {}", checkpoint.state.positions.len());
    println!(
        "  Pending orders:     {}",
        checkpoint.state.pending_orders.len()
    );
    println!(
        "  Circuit tripped:    {}",
        checkpoint.state.circuit.is_tripped()
    );
    println!(
        "  Consecutive losses: {}",
        checkpoint.state.consecutive_losses
    );
    println!(
        "  Trades: {} (win rate {:.0}%)",
        checkpoint.state.stats.total_trades,
        checkpoint.state.stats.win_rate() * 100.0
    );
    println!("  Total PnL:          {:.2}", checkpoint.state.stats.total_pnl);
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perpbot=info".into()),
        )
        .init();
}
