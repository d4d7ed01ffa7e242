//! Risk gate (C7): turns a leader `Trade` into either a sized follower
//! order or a typed rejection (§4.2).
//!
//! Grounded in the teacher's `StopLossManager::check_triggers` (an ordered
//! list of checks, first failing one wins, each mapped to a distinct typed
//! reason) generalized from position-exit triggers to entry-admission
//! checks, with sizing lifted out of the teacher's `advanced_stops.rs`
//! fixed-fraction approach into the §4.2 account-risk / price-risk formula.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use copytrade_core::config::RiskConfig;
use copytrade_core::domain::{
    PositionKey, PositionSource, Rejection, RejectionReason, Side, SizedOrder, Trade,
};
use copytrade_core::money;
use copytrade_core::traits::ExchangeClient;
use copytrade_core::validate;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::circuit_breaker::{Allowed, CircuitBreaker};

/// Read-only view of currently open exposure, supplied by the position
/// manager. The gate never mutates position state itself.
pub trait OpenPositions: Send + Sync {
    fn open_count(&self) -> usize;
    fn has_exposure(&self, key: &PositionKey) -> bool;
}

pub struct RiskGate {
    config: RiskConfig,
    exchange: Arc<dyn ExchangeClient>,
    breaker: Arc<CircuitBreaker>,
    positions: Arc<dyn OpenPositions>,
}

impl RiskGate {
    pub fn new(
        config: RiskConfig,
        exchange: Arc<dyn ExchangeClient>,
        breaker: Arc<CircuitBreaker>,
        positions: Arc<dyn OpenPositions>,
    ) -> Self {
        Self {
            config,
            exchange,
            breaker,
            positions,
        }
    }

    /// `evaluate(trade) -> SizedOrder | Rejection` (§4.2). Checks run in
    /// order; the first failing check wins.
    pub async fn evaluate(&self, trade: &Trade, confidence: Option<Decimal>) -> Result<SizedOrder, Rejection> {
        let now = Utc::now();

        // 1. Staleness
        if trade.age(now) > chrono::Duration::from_std(self.config.max_staleness).unwrap_or(chrono::Duration::zero()) {
            return Err(self.reject(RejectionReason::Stale, trade));
        }

        // 2. Validity
        if validate::validate_hex32(&trade.condition_id, "condition_id").is_err()
            || validate::validate_hex32(&trade.token_id, "token_id").is_err()
            || validate::validate_amount(trade.amount).is_err()
        {
            return Err(self.reject(RejectionReason::Invalid, trade));
        }

        // 3. Confidence (disabled by default: min_confidence == 0)
        if let Some(score) = confidence {
            if score < self.config.min_confidence {
                return Err(self.reject(RejectionReason::BelowConfidence, trade));
            }
        }

        // 4. Circuit breaker
        if self.breaker.check_allowed().await == Allowed::Blocked {
            return Err(self.reject(RejectionReason::CircuitBreaker, trade));
        }

        // 5. Concurrency
        if self.positions.open_count() >= self.config.max_concurrent_positions {
            return Err(self.reject(RejectionReason::MaxConcurrent, trade));
        }

        // 6. Existing exposure
        let key = trade.position_key();
        if self.positions.has_exposure(&key) {
            return Err(self.reject(RejectionReason::Duplicate, trade));
        }

        // 7. Price bounds
        if trade.price < self.config.min_price || trade.price > self.config.max_price {
            return Err(self.reject(RejectionReason::PriceBand, trade));
        }

        self.size(trade, key).await
    }

    async fn size(&self, trade: &Trade, key: PositionKey) -> Result<SizedOrder, Rejection> {
        let balance = self
            .exchange
            .get_balance()
            .await
            .map_err(|_| self.reject(RejectionReason::Invalid, trade))?;

        let current_price = self
            .exchange
            .get_current_price(&trade.condition_id, &trade.token_id, trade.side)
            .await
            .unwrap_or(trade.price);

        let account_risk = balance.quote_balance * self.config.risk_per_trade_fraction;

        // Mandatory floor: without it the follower size diverges when the
        // leader trades at or near the market price.
        let price_floor = current_price * self.config.min_price_risk_fraction;
        let price_risk = (current_price - trade.price).abs().max(price_floor);

        let raw_size = money::safe_div(account_risk, price_risk).unwrap_or(Decimal::ZERO);

        let size = raw_size
            .min(self.config.max_position_size)
            .min(balance.quote_balance * self.config.max_position_fraction);

        if size < self.config.min_trade_size {
            return Err(self.reject(RejectionReason::BelowMin, trade));
        }

        let slippage_tolerance = self.config.min_price_risk_fraction.max(Decimal::new(5, 3));
        let limit_price = match trade.side {
            Side::Buy => current_price * (Decimal::ONE + slippage_tolerance),
            Side::Sell => current_price * (Decimal::ONE - slippage_tolerance),
        };

        info!(
            condition_id = %trade.condition_id,
            size = %size,
            limit_price = %limit_price,
            "risk gate sized order"
        );

        Ok(SizedOrder {
            position_key: key,
            side: trade.side,
            size,
            limit_price,
            slippage_tolerance,
            source: PositionSource::Copy {
                source_leader: trade.masked_leader(),
            },
        })
    }

    fn reject(&self, reason: RejectionReason, trade: &Trade) -> Rejection {
        if reason.is_info_level() {
            info!(condition_id = %trade.condition_id, reason = ?reason, "trade rejected by risk gate");
        } else {
            debug!(condition_id = %trade.condition_id, reason = ?reason, "trade rejected by risk gate");
        }
        Rejection { reason }
    }
}

/// Token-overlap helper shared with the endgame sweeper's correlation
/// filter (§4.4 step 3): lower-cased, punctuation-stripped word set.
pub fn question_tokens(question: &str) -> HashSet<String> {
    question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}
