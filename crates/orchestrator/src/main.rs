//! Copy-trading engine orchestrator (C10).
//!
//! Wires the leader monitor, risk gate, circuit breaker, executor, position
//! manager and endgame sweeper into one cooperatively scheduled process.
//!
//! Grounded in the teacher's `arb-monitor` binary: logging initialized once
//! through `tracing_subscriber::registry()...init()`, configuration loaded
//! via `Config::from_env()`, then a single top-level component constructed
//! and run until shutdown. The teacher's own `run()` loops do not listen for
//! `ctrl_c`; this orchestrator adds it directly per this crate's shutdown
//! contract, using the same `active`-flag idiom the leader monitor and
//! endgame sweeper already use for their own background loops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use auth::TradingWallet;
use copytrade_core::adapters::{FileStateStore, TracingAlertSink};
use copytrade_core::api::{ClobExchangeClient, PolygonTxSource};
use copytrade_core::config::Config;
use copytrade_core::rate_limiter::RateLimiterRegistry;
use copytrade_core::signing::OrderSigner;
use copytrade_core::traits::{AlertSink, ExchangeClient, LeaderTxSource, Severity, StateStore};
use endgame_sweeper::EndgameSweeper;
use leader_monitor::LeaderMonitor;
use risk_manager::{CircuitBreaker, RiskGate};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trading_engine::executor::PositionLocks;
use trading_engine::{Executor, PositionManager};

const MANAGE_INTERVAL: Duration = Duration::from_secs(10);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_STARTUP_ERROR: u8 = 3;

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "copytrade_orchestrator=info,leader_monitor=info,risk_manager=info,trading_engine=info,endgame_sweeper=info"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return std::process::ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "unrecoverable startup error");
            std::process::ExitCode::from(EXIT_STARTUP_ERROR)
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!("starting copy-trading engine");

    let wallet = TradingWallet::from_env().context("failed to load trading wallet")?;
    let signer = OrderSigner::new(wallet.into_signer());

    let exchange: Arc<dyn ExchangeClient> = Arc::new(ClobExchangeClient::with_signer(
        config.network.clob_base_url.clone(),
        signer,
    ));
    let tx_source: Arc<dyn LeaderTxSource> = match config.network.resolved_polygon_rpc_url() {
        Some(url) => Arc::new(PolygonTxSource::new(url)),
        None => anyhow::bail!("no Polygon RPC endpoint configured: set POLYGON_RPC_URL or ALCHEMY_API_KEY"),
    };
    let state: Arc<dyn StateStore> = Arc::new(FileStateStore::new(config.state.dir.clone()));
    let alerts: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);

    if !tx_source.health_check().await {
        anyhow::bail!("leader transaction source failed its startup health check");
    }
    if !exchange.health_check().await {
        warn!("exchange health check failed at startup, continuing in degraded mode");
        alerts
            .notify(Severity::Medium, "exchange_health_check_failed", "startup")
            .await;
    }

    let rate_limiter = Arc::new(RateLimiterRegistry::new(config.rate_limit.polygon_interval));
    rate_limiter.configure("polygon_rpc", config.rate_limit.polygon_interval);
    rate_limiter.configure("clob", config.rate_limit.clob_interval);

    let breaker = Arc::new(CircuitBreaker::load(config.risk.clone(), state.clone(), alerts.clone()).await);
    let locks = PositionLocks::new();
    let positions = PositionManager::new(
        config.risk.clone(),
        config.endgame.probability_exit,
        exchange.clone(),
        breaker.clone(),
        locks.clone(),
    );
    let executor = Arc::new(Executor::new(exchange.clone(), config.risk.clone(), locks.clone(), positions.clone()));
    let risk_gate = Arc::new(RiskGate::new(
        config.risk.clone(),
        exchange.clone(),
        breaker.clone(),
        positions.clone(),
    ));

    let leader_monitor = Arc::new(LeaderMonitor::new(
        tx_source.clone(),
        state.clone(),
        alerts.clone(),
        rate_limiter.clone(),
        config.leader.clone(),
    ));
    let sweeper = EndgameSweeper::new(
        exchange.clone(),
        executor.clone(),
        positions.clone(),
        breaker.clone(),
        config.risk.clone(),
        config.endgame.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    leader_monitor.start().await;
    sweeper.start().await;

    let trade_task = spawn_trade_consumer(leader_monitor.clone(), risk_gate, executor.clone(), alerts.clone(), shutdown_rx.clone());
    let manage_task = spawn_manage_ticker(positions, shutdown_rx.clone());
    let maintenance_task = spawn_maintenance_ticker(executor, breaker, shutdown_rx);

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received, stopping background tasks");

    let _ = shutdown_tx.send(true);
    leader_monitor.stop().await;
    sweeper.stop().await;

    for task in [trade_task, manage_task, maintenance_task] {
        let _ = task.await;
    }

    info!("copy-trading engine shut down cleanly");
    Ok(())
}

/// Drains leader trades through the risk gate into the executor until
/// shutdown is signalled. A lagged receiver (the broadcast buffer filled
/// faster than this task drained it) is logged and alerted on, not treated
/// as fatal — the next trade on the channel is still processed.
fn spawn_trade_consumer(
    leader_monitor: Arc<LeaderMonitor>,
    risk_gate: Arc<RiskGate>,
    executor: Arc<Executor>,
    alerts: Arc<dyn AlertSink>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let mut trades = leader_monitor.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                result = trades.recv() => {
                    match result {
                        Ok(trade) => {
                            if let Ok(order) = risk_gate.evaluate(&trade, None).await {
                                executor.submit(order).await;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "trade subscriber lagged, some leader trades were dropped");
                            alerts
                                .notify(Severity::Medium, "trade_subscriber_lagged", &format!("skipped={skipped}"))
                                .await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        info!("trade consumer stopped");
    })
}

/// Drives `PositionManager::manage_positions()` on a fixed cadence (§4.3).
fn spawn_manage_ticker(
    positions: Arc<PositionManager>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MANAGE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => positions.manage_positions().await,
            }
        }
        info!("position manager ticker stopped");
    })
}

/// Logs running execution/circuit-breaker counters on a fixed cadence —
/// ambient observability, not control flow.
fn spawn_maintenance_ticker(
    executor: Arc<Executor>,
    breaker: Arc<CircuitBreaker>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let metrics = executor.metrics();
                    let cb = breaker.snapshot().await;
                    info!(
                        orders_submitted = metrics.orders_submitted,
                        orders_filled = metrics.orders_filled,
                        orders_rejected = metrics.orders_rejected,
                        cumulative_notional = %metrics.cumulative_notional,
                        tripped = cb.tripped,
                        daily_loss_accum = %cb.daily_loss_accum,
                        "periodic maintenance"
                    );
                }
            }
        }
        info!("maintenance ticker stopped");
    })
}
