//! Position manager (C8 half two): drives every open `Position` through
//! take-profit / stop-loss / time / probability exits, one batched price
//! lookup per manager tick rather than one lookup per position.
//!
//! Grounded in the teacher's `PositionManager` (`DashMap`-backed index,
//! limits-checked `add_position`, summary `stats()`) generalized from the
//! teacher's static size/exposure-limit bookkeeping onto this spec's
//! exit-evaluation tick, with the teacher's own flat `PositionSource` enum
//! replaced by `copytrade_core::domain::PositionSource` (Copy/Endgame).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use copytrade_core::config::RiskConfig;
use copytrade_core::domain::{ExitReason, Position, PositionKey, PositionSource, PositionState, Side};
use copytrade_core::traits::{ExchangeClient, PlaceOrderRequest};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use risk_manager::{CircuitBreaker, OpenPositions};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::executor::PositionLocks;

const PRICE_LOOKUP_CONCURRENCY: usize = 10;

pub struct PositionManager {
    positions: DashMap<PositionKey, Position>,
    config: RiskConfig,
    probability_exit: Decimal,
    exchange: Arc<dyn ExchangeClient>,
    breaker: Arc<CircuitBreaker>,
    locks: Arc<PositionLocks>,
}

impl PositionManager {
    pub fn new(
        config: RiskConfig,
        probability_exit: Decimal,
        exchange: Arc<dyn ExchangeClient>,
        breaker: Arc<CircuitBreaker>,
        locks: Arc<PositionLocks>,
    ) -> Arc<Self> {
        Arc::new(Self {
            positions: DashMap::new(),
            config,
            probability_exit,
            exchange,
            breaker,
            locks,
        })
    }

    /// Records a position as `Opening`. Called by the executor before order
    /// submission (§4.3 step 2).
    pub fn insert_opening(&self, key: PositionKey, source: PositionSource) {
        self.positions.insert(
            key.clone(),
            Position {
                key,
                entry_price: Decimal::ZERO,
                size: Decimal::ZERO,
                opened_at_utc: Utc::now(),
                source,
                stop_price: Decimal::ZERO,
                take_profit_price: Decimal::ZERO,
                max_hold_duration_secs: self.config.max_hold_duration.as_secs() as i64,
                state: PositionState::Opening,
                realized_pnl: None,
                closed_at_utc: None,
                exit_reason: None,
            },
        );
    }

    /// Transitions a position to `Open` on fill, recording actual fill price
    /// and size and deriving `stop_price`/`take_profit_price` from the risk
    /// configuration (§4.3 step 5).
    pub fn mark_open(&self, key: &PositionKey, fill_price: Decimal, size: Decimal, risk: &RiskConfig) {
        if let Some(mut entry) = self.positions.get_mut(key) {
            let (stop_price, take_profit_price) = match key.side {
                Side::Buy => (
                    fill_price * (Decimal::ONE - risk.stop_loss_pct),
                    fill_price * (Decimal::ONE + risk.take_profit_pct),
                ),
                Side::Sell => (
                    fill_price * (Decimal::ONE + risk.stop_loss_pct),
                    fill_price * (Decimal::ONE - risk.take_profit_pct),
                ),
            };
            entry.entry_price = fill_price;
            entry.size = size;
            entry.stop_price = stop_price;
            entry.take_profit_price = take_profit_price;
            entry.state = PositionState::Open;
        }
    }

    /// Terminates a position that failed to open (§4.3 step 4) and releases
    /// its lock entry (P3).
    pub fn mark_failed(&self, key: &PositionKey) {
        self.positions.remove(key);
    }

    /// Snapshot of every non-terminal position. The manager tick always
    /// iterates this, never the live map, so concurrent inserts from the
    /// submit pathway are safe (§4.3 "Iteration safety").
    pub fn snapshot(&self) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|e| !e.value().state.is_terminal())
            .map(|e| e.value().clone())
            .collect()
    }

    /// `manage_positions()` (§4.3): the orchestrator-invoked, idempotent
    /// tick that evaluates exits and closes qualifying positions.
    pub async fn manage_positions(&self) {
        let snapshot: Vec<Position> = self
            .snapshot()
            .into_iter()
            .filter(|p| p.state == PositionState::Open)
            .collect();

        if snapshot.is_empty() {
            return;
        }

        let prices = self.batch_fetch_prices(&snapshot).await;
        let now = Utc::now();

        let to_close: Vec<(PositionKey, Decimal, ExitReason)> = snapshot
            .iter()
            .filter_map(|position| {
                let current = *prices.get(&price_key(position))?;
                let pnl_pct = position.unrealized_pnl_pct(current)?;

                let reason = if pnl_pct <= -self.config.stop_loss_pct {
                    Some(ExitReason::StopLoss)
                } else if pnl_pct >= self.config.take_profit_pct {
                    Some(ExitReason::TakeProfit)
                } else if position.age(now) > position.max_hold_duration() {
                    Some(ExitReason::Time)
                } else if matches!(position.source, PositionSource::Endgame) && current >= self.probability_exit {
                    Some(ExitReason::ProbabilityExit)
                } else {
                    None
                }?;

                Some((position.key.clone(), current, reason))
            })
            .collect();

        stream::iter(to_close)
            .for_each_concurrent(PRICE_LOOKUP_CONCURRENCY, |(key, current_price, reason)| async move {
                self.close_position(key, current_price, reason).await;
            })
            .await;
    }

    async fn batch_fetch_prices(&self, positions: &[Position]) -> HashMap<(String, String, Side), Decimal> {
        let keys: HashSet<(String, String, Side)> = positions.iter().map(price_key).collect();

        let results: Vec<((String, String, Side), Option<Decimal>)> = stream::iter(keys)
            .map(|k| async move {
                let price = self.exchange.get_current_price(&k.0, &k.1, k.2).await.ok();
                (k, price)
            })
            .buffer_unordered(PRICE_LOOKUP_CONCURRENCY)
            .collect()
            .await;

        results.into_iter().filter_map(|(k, p)| p.map(|p| (k, p))).collect()
    }

    /// Closes a single position under its per-position lock. Races with a
    /// concurrent state change observe a non-`Open` state and no-op.
    async fn close_position(&self, key: PositionKey, current_price: Decimal, reason: ExitReason) {
        let lock = self.locks.lock_for(&key);
        let _guard = lock.lock().await;

        let Some(position) = self.positions.get(&key).map(|e| e.value().clone()) else {
            return;
        };
        if position.state != PositionState::Open {
            return;
        }

        let closing_request = PlaceOrderRequest {
            token_id: key.token_id.clone(),
            side: key.side.opposite(),
            limit_price: current_price,
            size: position.size,
        };

        if let Err(e) = self.exchange.place_order(&closing_request).await {
            warn!(position_key = %key, error = %e, "failed to place closing order, leaving position open for next tick");
            return;
        }

        let realized_pnl = position
            .unrealized_pnl_pct(current_price)
            .map(|pct| pct * position.entry_price * position.size)
            .unwrap_or(Decimal::ZERO);

        if let Some(mut entry) = self.positions.get_mut(&key) {
            entry.state = PositionState::Closed;
            entry.realized_pnl = Some(realized_pnl);
            entry.closed_at_utc = Some(Utc::now());
            entry.exit_reason = Some(reason);
        }
        self.positions.remove(&key);
        self.locks.release(&key);

        info!(position_key = %key, reason = ?reason, realized_pnl = %realized_pnl, "position closed");
        self.breaker.record_outcome(realized_pnl).await;
    }
}

fn price_key(position: &Position) -> (String, String, Side) {
    (position.key.condition_id.clone(), position.key.token_id.clone(), position.key.side)
}

impl OpenPositions for PositionManager {
    fn open_count(&self) -> usize {
        self.positions.iter().filter(|e| !e.value().state.is_terminal()).count()
    }

    fn has_exposure(&self, key: &PositionKey) -> bool {
        self.positions.get(key).map(|e| !e.value().state.is_terminal()).unwrap_or(false)
    }
}
