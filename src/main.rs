mod broker;
mod config;
mod indicators;
mod ml;
mod notifications;
mod persistence;
mod position_manager;
mod reconciler;
mod runtime;
mod scheduler;
mod store;
mod strategy;
mod types;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use broker::{BrokerClient, CapitalClient, PaperBroker, PrecisionCache};
use config::{EngineConfig, StrategyParams, StrategyParamsManager};
use ml::MlGate;
use notifications::{AlertType, NotificationManager, NullSink, WebhookSink};
use persistence::PersistenceAdapters;
use position_manager::PositionManager;
use reconciler::Reconciler;
use runtime::RuntimeState;
use scheduler::Scheduler;
use store::CandleStore;
use strategy::StrategyEngine;
use types::{Position, PositionMode};

#[derive(Parser)]
#[command(name = "pullback-bos-engine")]
#[command(author = "Trading Bot")]
#[command(version = "0.1.0")]
#[command(about = "Single-instrument trend-pullback / break-of-structure trading engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run against the in-process paper broker instead of the live API
    #[arg(long)]
    paper: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live engine: scheduler, strategy, position manager, reconciler
    Run,
    /// Print a status snapshot (placeholder: requires a running process to query)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("pullback_bos_engine starting");

    match cli.command {
        Commands::Run => run(cli.paper).await?,
        Commands::Status => {
            info!("status command has no running process to attach to in this invocation; connect to a live instance's persistence sink instead");
        }
    }

    Ok(())
}

async fn run(paper: bool) -> Result<()> {
    let engine_config = EngineConfig::from_env()?;

    let broker: Arc<dyn BrokerClient> = if paper {
        info!("using in-process paper broker");
        Arc::new(PaperBroker::new())
    } else {
        Arc::new(CapitalClient::new(
            engine_config.base_url.clone(),
            engine_config.api_key.clone(),
            engine_config.identifier.clone(),
            engine_config.password.clone(),
            engine_config.broker_timeout,
            engine_config.confirm_max_attempts,
            engine_config.confirm_poll_interval,
        ))
    };

    if let Err(e) = broker.create_session().await {
        error!("startup fatal: broker session creation failed: {}", e);
        return Err(anyhow::anyhow!("broker session creation failed: {e}"));
    }

    let notifications_sink: Arc<dyn notifications::NotificationSink> = match &engine_config.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())),
        None => Arc::new(NullSink),
    };
    let notifications = Arc::new(NotificationManager::new(notifications_sink));

    let persistence = PersistenceAdapters::connect(engine_config.persistence_url.as_deref()).await;

    let params = StrategyParams::default();
    if let Err(errors) = params.validate() {
        error!("startup fatal: invalid strategy params: {}", errors.join(", "));
        return Err(anyhow::anyhow!("invalid strategy params: {}", errors.join(", ")));
    }
    let config = Arc::new(StrategyParamsManager::new(params));

    let ml = Arc::new(MlGate::new(
        engine_config.champion_path.clone().map(std::path::PathBuf::from),
        engine_config.challenger_path.clone().map(std::path::PathBuf::from),
    ));
    ml.reload().await;

    let precision = Arc::new(PrecisionCache::new());
    let runtime = Arc::new(RuntimeState::new(dec!(0)));
    adopt_open_positions(&broker, &runtime).await;
    let store = Arc::new(CandleStore::new(broker.clone(), engine_config.epic.clone()));

    let strategy = Arc::new(StrategyEngine::new(
        store.clone(),
        runtime.clone(),
        config.clone(),
        broker.clone(),
        ml.clone(),
        notifications.clone(),
        persistence.clone(),
        precision.clone(),
        engine_config.epic.clone(),
    ));

    let position_manager = Arc::new(PositionManager::new(
        runtime.clone(),
        config.clone(),
        broker.clone(),
        notifications.clone(),
        persistence.clone(),
        precision.clone(),
        engine_config.epic.clone(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        runtime.clone(),
        config.clone(),
        broker.clone(),
        notifications.clone(),
        engine_config.epic.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(
        store,
        runtime,
        config,
        broker.clone(),
        strategy,
        position_manager,
        reconciler,
        persistence,
        engine_config.clone(),
        engine_config.epic.clone(),
    ));

    scheduler.seed_history().await?;
    notifications.notify(AlertType::EngineStarted).await;

    let run_handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    scheduler.request_shutdown();
    let _ = run_handle.await;

    notifications.notify(AlertType::EngineStopped).await;
    info!("pullback_bos_engine stopped");
    Ok(())
}

/// Reconstructs whatever the broker reports as already open and folds each
/// into runtime tracking as an adopted position, so a restart doesn't orphan
/// live risk. Positions missing a stop or limit level can't be reconstructed
/// safely and are skipped with a warning rather than guessed at.
async fn adopt_open_positions(broker: &Arc<dyn BrokerClient>, runtime: &Arc<RuntimeState>) {
    let remote_positions = match broker.get_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            warn!("startup: fetching open positions failed, adopting none: {}", e);
            return;
        }
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    for rp in remote_positions {
        let (Some(sl), Some(tp2)) = (rp.stop_level, rp.limit_level) else {
            warn!(
                "startup: skipping adoption of {} — broker reported no stop or limit level",
                rp.deal_id
            );
            continue;
        };
        // The broker only reports one take-profit level; split it so TP1
        // bookkeeping is inert (already marked done) and only SL/TP2 apply.
        let tp1 = rp.level + (tp2 - rp.level) / Decimal::from(2);
        let mut position = match Position::new(
            PositionMode::Adopted,
            rp.direction,
            rp.size,
            rp.level,
            sl,
            tp1,
            tp2,
            rp.deal_id.clone(),
            None,
            now_ms,
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!("startup: skipping adoption of {} — invalid levels: {}", rp.deal_id, e);
                continue;
            }
        };
        position.tp1_done = true;
        info!("startup: adopted open position {}", rp.deal_id);
        runtime.adopt_position(position).await;
    }
}
