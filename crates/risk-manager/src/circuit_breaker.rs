//! Circuit breaker (C5): single-point authority on whether any new trading
//! action is permitted, with durable state (§4.5).
//!
//! Grounded in the teacher's `CircuitBreaker` (`RwLock<CircuitBreakerState>`
//! plus an `AtomicBool` fast path, `trip_internal`/`check_thresholds` split)
//! generalized onto `copytrade_core::domain::CircuitBreakerState` and
//! persisted through `StateStore` rather than a direct `sqlx::PgPool`. The
//! teacher's gradual multi-stage recovery mode (`RecoveryState`,
//! `capacity_pct`) has no counterpart in this spec's binary tripped/not
//! model and is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use copytrade_core::config::RiskConfig;
use copytrade_core::domain::CircuitBreakerState;
use copytrade_core::traits::{AlertSink, Severity, StateStore};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const STATE_KEY: &str = "cb";

/// Outcome of a `check_allowed` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowed {
    Allowed,
    Blocked,
}

pub struct CircuitBreaker {
    config: RiskConfig,
    state: RwLock<CircuitBreakerState>,
    tripped_fast: AtomicBool,
    store: Arc<dyn StateStore>,
    alerts: Arc<dyn AlertSink>,
}

impl CircuitBreaker {
    /// Load persisted state on startup. Missing or corrupt state warms to a
    /// fresh, untripped state (§4.5) — corruption is surfaced at HIGH via
    /// the alert sink, a missing file is just a cold start.
    pub async fn load(
        config: RiskConfig,
        store: Arc<dyn StateStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let now = Utc::now();
        let loaded = match store.load(STATE_KEY).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<CircuitBreakerState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "circuit breaker state file failed to parse, warming state");
                    alerts
                        .notify(
                            Severity::High,
                            "circuit_breaker_state_corrupt",
                            &format!("error={e}"),
                        )
                        .await;
                    CircuitBreakerState::warm(now)
                }
            },
            Ok(None) => CircuitBreakerState::warm(now),
            Err(e) => {
                warn!(error = %e, "circuit breaker state could not be loaded, warming state");
                CircuitBreakerState::warm(now)
            }
        };

        let tripped_fast = AtomicBool::new(loaded.tripped);
        Self {
            config,
            state: RwLock::new(loaded),
            tripped_fast,
            store,
            alerts,
        }
    }

    /// Fast, lock-free read used by hot paths that only need a yes/no.
    pub fn is_tripped(&self) -> bool {
        self.tripped_fast.load(Ordering::SeqCst)
    }

    /// `check_allowed` (§4.5): performs the lazy UTC-midnight reset, then
    /// reports whether new trading actions are currently permitted.
    pub async fn check_allowed(&self) -> Allowed {
        let mut state = self.state.write().await;
        self.maybe_reset_daily(&mut state);

        if let Some(until) = state.tripped_until_utc {
            if Utc::now() >= until {
                info!("circuit breaker cooldown expired, auto-resetting");
                state.tripped = false;
                state.trip_reason = None;
                state.tripped_until_utc = None;
                self.tripped_fast.store(false, Ordering::SeqCst);
                self.persist(&state).await;
            }
        }

        if state.tripped {
            Allowed::Blocked
        } else {
            Allowed::Allowed
        }
    }

    fn maybe_reset_daily(&self, state: &mut CircuitBreakerState) {
        let now = Utc::now();
        if now.date_naive() > state.last_reset_utc.date_naive() {
            info!("new trading day, resetting circuit breaker daily accumulators");
            state.daily_loss_accum = Decimal::ZERO;
            state.consecutive_losses = 0;
            state.last_reset_utc = now;
        }
    }

    /// `record_outcome` (§4.5): updates accumulators from a position's
    /// realized PnL and trips automatically if either threshold is crossed.
    pub async fn record_outcome(&self, realized_pnl: Decimal) {
        let mut state = self.state.write().await;
        self.maybe_reset_daily(&mut state);

        if realized_pnl < Decimal::ZERO {
            state.daily_loss_accum += realized_pnl;
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }

        let daily_loss_breached = state.daily_loss_accum.abs() >= self.config.max_daily_loss;
        let consecutive_breached = state.consecutive_losses >= self.config.max_consecutive_losses;

        if daily_loss_breached {
            self.trip_locked(&mut state, "daily_loss_limit", self.config.cooldown_duration);
        } else if consecutive_breached {
            self.trip_locked(&mut state, "consecutive_losses", self.config.cooldown_duration);
        }

        self.persist(&state).await;
    }

    /// `trip` (§4.5): manual or automatic kill switch. `tripped_until_utc`
    /// is additive — a trip during an active cooldown never shortens it.
    pub async fn trip(&self, reason: &str, duration: std::time::Duration) {
        let mut state = self.state.write().await;
        self.trip_locked(&mut state, reason, duration);
        self.persist(&state).await;

        self.alerts
            .notify(Severity::High, "circuit_breaker_tripped", reason)
            .await;
    }

    fn trip_locked(&self, state: &mut CircuitBreakerState, reason: &str, duration: std::time::Duration) {
        let now = Utc::now();
        let candidate_until = now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        let new_until = match state.tripped_until_utc {
            Some(existing) if existing > candidate_until => existing,
            _ => candidate_until,
        };

        state.tripped = true;
        state.trip_reason = Some(reason.to_string());
        state.tripped_until_utc = Some(new_until);
        self.tripped_fast.store(true, Ordering::SeqCst);

        error!(
            reason = reason,
            until = %new_until,
            daily_loss_accum = %state.daily_loss_accum,
            consecutive_losses = state.consecutive_losses,
            "circuit breaker TRIPPED"
        );
    }

    /// `reset` (§4.5): operator action, logs an audit event.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.tripped = false;
        state.trip_reason = None;
        state.tripped_until_utc = None;
        self.tripped_fast.store(false, Ordering::SeqCst);
        self.persist(&state).await;

        info!("circuit breaker reset by operator");
        self.alerts
            .notify(Severity::Medium, "circuit_breaker_reset", "operator reset")
            .await;
    }

    pub async fn snapshot(&self) -> CircuitBreakerState {
        self.state.read().await.clone()
    }

    async fn persist(&self, state: &CircuitBreakerState) {
        match serde_json::to_vec(state) {
            Ok(bytes) => {
                if let Err(e) = self.store.store(STATE_KEY, &bytes).await {
                    error!(error = %e, "failed to persist circuit breaker state");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize circuit breaker state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytrade_core::traits::mocks::{MockAlerts, MockStore};

    fn test_config() -> RiskConfig {
        RiskConfig {
            max_daily_loss: Decimal::new(100, 0),
            risk_per_trade_fraction: Decimal::new(2, 2),
            max_position_fraction: Decimal::new(10, 2),
            max_position_size: Decimal::new(100, 0),
            min_trade_size: Decimal::new(1, 0),
            min_price_risk_fraction: Decimal::new(1, 3),
            min_price: Decimal::new(2, 2),
            max_price: Decimal::new(98, 2),
            stop_loss_pct: Decimal::new(5, 2),
            take_profit_pct: Decimal::new(7, 2),
            max_hold_duration: std::time::Duration::from_secs(3600),
            max_concurrent_positions: 10,
            max_consecutive_losses: 3,
            cooldown_duration: std::time::Duration::from_secs(3600),
            max_staleness: std::time::Duration::from_secs(120),
            min_confidence: Decimal::ZERO,
        }
    }

    async fn fresh_breaker(config: RiskConfig) -> CircuitBreaker {
        let mut store = MockStore::new();
        store.expect_load().returning(|_| Ok(None));
        store.expect_store().returning(|_, _| Ok(()));
        let alerts = MockAlerts::new();
        CircuitBreaker::load(config, Arc::new(store), Arc::new(alerts)).await
    }

    #[tokio::test]
    async fn warms_to_untripped_with_no_prior_state() {
        let breaker = fresh_breaker(test_config()).await;
        assert_eq!(breaker.check_allowed().await, Allowed::Allowed);
        assert!(!breaker.is_tripped());
    }

    #[tokio::test]
    async fn daily_loss_threshold_trips() {
        let breaker = fresh_breaker(test_config()).await;
        breaker.record_outcome(Decimal::new(-40, 0)).await;
        assert!(!breaker.is_tripped());
        breaker.record_outcome(Decimal::new(-70, 0)).await;
        assert!(breaker.is_tripped());
        assert_eq!(breaker.check_allowed().await, Allowed::Blocked);
    }

    #[tokio::test]
    async fn consecutive_losses_trip() {
        let breaker = fresh_breaker(test_config()).await;
        breaker.record_outcome(Decimal::new(-1, 0)).await;
        breaker.record_outcome(Decimal::new(-1, 0)).await;
        assert!(!breaker.is_tripped());
        breaker.record_outcome(Decimal::new(-1, 0)).await;
        assert!(breaker.is_tripped());
    }

    #[tokio::test]
    async fn win_resets_consecutive_losses() {
        let breaker = fresh_breaker(test_config()).await;
        breaker.record_outcome(Decimal::new(-1, 0)).await;
        breaker.record_outcome(Decimal::new(-1, 0)).await;
        breaker.record_outcome(Decimal::new(1, 0)).await;
        breaker.record_outcome(Decimal::new(-1, 0)).await;
        breaker.record_outcome(Decimal::new(-1, 0)).await;
        assert!(!breaker.is_tripped());
    }

    #[tokio::test]
    async fn manual_reset_clears_trip() {
        let breaker = fresh_breaker(test_config()).await;
        breaker.trip("manual", std::time::Duration::from_secs(3600)).await;
        assert!(breaker.is_tripped());
        breaker.reset().await;
        assert!(!breaker.is_tripped());
    }

    #[tokio::test]
    async fn additive_trip_never_shortens_cooldown() {
        let breaker = fresh_breaker(test_config()).await;
        breaker.trip("first", std::time::Duration::from_secs(3600)).await;
        let first_until = breaker.snapshot().await.tripped_until_utc.unwrap();
        breaker.trip("second", std::time::Duration::from_secs(60)).await;
        let second_until = breaker.snapshot().await.tripped_until_utc.unwrap();
        assert!(second_until >= first_until);
    }
}
