//! Executor (C8 half one): converts a `SizedOrder` from the risk gate into
//! an open `Position`, enforcing at most one concurrent action per
//! `position_key` via [`PositionLocks`].
//!
//! Grounded in the teacher's `OrderExecutor` (`ExecutionMetrics`,
//! paper-vs-live dual path, `pending_orders` bookkeeping) generalized onto
//! the `ExchangeClient` trait and the risk gate's `SizedOrder` contract. The
//! teacher's per-position lock map is never pruned on completion (a known
//! defect, §9 "Position lock leak"); this version removes the lock entry as
//! part of every terminal transition (P3).

use std::sync::Arc;
use std::time::Duration;

use copytrade_core::cache::BoundedCache;
use copytrade_core::config::RiskConfig;
use copytrade_core::domain::{PositionKey, PositionSource, Side, SizedOrder};
use copytrade_core::traits::{ExchangeClient, PlaceOrderRequest};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

/// A bounded map of per-`position_key` mutexes, shared between the executor
/// (submit path) and the position manager (close path) so that all mutation
/// to a single position is serialized regardless of which side initiates it.
pub struct PositionLocks {
    cache: Arc<BoundedCache<PositionKey, Arc<Mutex<()>>>>,
}

impl PositionLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cache: BoundedCache::new(10_000, 16 * 1024 * 1024, Duration::from_secs(30 * 60)),
        })
    }

    /// Fetch or create the mutex guarding `key`. Cheap: the cache stores an
    /// `Arc`, so concurrent callers observe the same lock.
    pub fn lock_for(&self, key: &PositionKey) -> Arc<Mutex<()>> {
        if let Some(lock) = self.cache.get(key) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        self.cache.put(key.clone(), lock.clone(), 64);
        lock
    }

    /// Removes a position's lock entry. Must be called on every CLOSED or
    /// FAILED transition (P3) — otherwise the lock map grows without bound.
    pub fn release(&self, key: &PositionKey) {
        self.cache.remove(key);
    }
}

/// Outcome of [`Executor::submit`].
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    Filled {
        position_key: PositionKey,
        fill_price: Decimal,
        filled_size: Decimal,
    },
    Rejected {
        position_key: PositionKey,
        reason: String,
    },
    Duplicate {
        position_key: PositionKey,
    },
}

/// Running counters mirroring the teacher's `ExecutionMetrics` — ambient
/// observability, not a control-flow input (§4.3).
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_rejected: u64,
    pub cumulative_notional: Decimal,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

pub struct Executor {
    exchange: Arc<dyn ExchangeClient>,
    risk: RiskConfig,
    config: ExecutorConfig,
    locks: Arc<PositionLocks>,
    positions: Arc<crate::position_manager::PositionManager>,
    metrics: std::sync::RwLock<ExecutionMetrics>,
}

impl Executor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        risk: RiskConfig,
        locks: Arc<PositionLocks>,
        positions: Arc<crate::position_manager::PositionManager>,
    ) -> Self {
        Self {
            exchange,
            risk,
            config: ExecutorConfig::default(),
            locks,
            positions,
            metrics: std::sync::RwLock::new(ExecutionMetrics::default()),
        }
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        self.metrics.read().unwrap().clone()
    }

    /// `submit(order) -> OrderOutcome` (§4.3 submit protocol).
    pub async fn submit(&self, order: SizedOrder) -> OrderOutcome {
        let key = order.position_key.clone();
        let lock = self.locks.lock_for(&key);
        let _guard = lock.lock().await;

        if self.positions.has_exposure(&key) {
            return OrderOutcome::Duplicate { position_key: key };
        }

        self.positions.insert_opening(key.clone(), order.source.clone());

        let request = PlaceOrderRequest {
            token_id: key.token_id.clone(),
            side: order.side,
            limit_price: order.limit_price,
            size: order.size,
        };

        {
            let mut metrics = self.metrics.write().unwrap();
            metrics.orders_submitted += 1;
        }

        match self.place_with_retry(&request).await {
            Ok(result) => match result.status {
                copytrade_core::domain::OrderResultStatus::Filled
                | copytrade_core::domain::OrderResultStatus::Partial => {
                    let fill_price = if result.average_price.is_zero() {
                        order.limit_price
                    } else {
                        result.average_price
                    };
                    let filled_size = if result.filled_size.is_zero() {
                        order.size
                    } else {
                        result.filled_size
                    };

                    self.positions.mark_open(&key, fill_price, filled_size, &self.risk);

                    {
                        let mut metrics = self.metrics.write().unwrap();
                        metrics.orders_filled += 1;
                        metrics.cumulative_notional += fill_price * filled_size;
                    }

                    info!(
                        position_key = %key,
                        fill_price = %fill_price,
                        filled_size = %filled_size,
                        "order filled, position opened"
                    );

                    OrderOutcome::Filled { position_key: key, fill_price, filled_size }
                }
                _ => self.fail(key, result.error_code.unwrap_or_else(|| "order rejected".to_string())).await,
            },
            Err(e) => self.fail(key, format!("transport error: {e}")).await,
        }
    }

    async fn fail(&self, key: PositionKey, reason: String) -> OrderOutcome {
        self.positions.mark_failed(&key);
        self.locks.release(&key);
        {
            let mut metrics = self.metrics.write().unwrap();
            metrics.orders_rejected += 1;
        }
        warn!(position_key = %key, reason = %reason, "order submission failed");
        OrderOutcome::Rejected { position_key: key, reason }
    }

    /// Bounded retry with exponential backoff on transport failure. A
    /// `REJECTED` status from the exchange is an `Ok` value, not an error —
    /// it is terminal immediately and never retried.
    async fn place_with_retry(
        &self,
        request: &PlaceOrderRequest,
    ) -> copytrade_core::Result<copytrade_core::domain::OrderResult> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.exchange.place_order(request).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.config.max_attempts => {
                    let backoff = self.config.base_backoff * 2u32.pow(attempt - 1);
                    warn!(attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "place_order failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytrade_core::domain::{OrderResult, OrderResultStatus};
    use copytrade_core::traits::mocks::MockExchange;
    use rust_decimal::Decimal;

    fn test_risk_config() -> RiskConfig {
        RiskConfig {
            max_daily_loss: Decimal::new(500, 0),
            risk_per_trade_fraction: Decimal::new(2, 2),
            max_position_fraction: Decimal::new(10, 2),
            max_position_size: Decimal::new(100, 0),
            min_trade_size: Decimal::new(1, 0),
            min_price_risk_fraction: Decimal::new(1, 3),
            min_price: Decimal::new(2, 2),
            max_price: Decimal::new(98, 2),
            stop_loss_pct: Decimal::new(5, 2),
            take_profit_pct: Decimal::new(7, 2),
            max_hold_duration: Duration::from_secs(3600),
            max_concurrent_positions: 10,
            max_consecutive_losses: 5,
            cooldown_duration: Duration::from_secs(3600),
            max_staleness: Duration::from_secs(120),
            min_confidence: Decimal::ZERO,
        }
    }

    fn sample_order() -> SizedOrder {
        SizedOrder {
            position_key: PositionKey {
                condition_id: format!("0x{}", "ab".repeat(32)),
                token_id: format!("0x{}", "cd".repeat(32)),
                side: Side::Buy,
            },
            side: Side::Buy,
            size: Decimal::new(10, 0),
            limit_price: Decimal::new(50, 2),
            slippage_tolerance: Decimal::new(5, 3),
            source: PositionSource::Copy { source_leader: "0x11111111..111111".to_string() },
        }
    }

    #[tokio::test]
    async fn fills_on_success_and_opens_position() {
        let mut exchange = MockExchange::new();
        exchange.expect_place_order().returning(|_| {
            Ok(OrderResult {
                status: OrderResultStatus::Filled,
                filled_size: Decimal::new(10, 0),
                average_price: Decimal::new(51, 2),
                exchange_order_id: Some("o1".to_string()),
                error_code: None,
            })
        });

        let locks = PositionLocks::new();
        let positions = crate::position_manager::PositionManager::new(
            test_risk_config(),
            Decimal::new(998, 3),
            Arc::new(MockExchange::new()),
            test_breaker().await,
            locks.clone(),
        );
        let executor = Executor::new(Arc::new(exchange), test_risk_config(), locks, positions.clone());

        let outcome = executor.submit(sample_order()).await;
        assert!(matches!(outcome, OrderOutcome::Filled { .. }));
        assert_eq!(positions.open_count(), 1);
    }

    #[tokio::test]
    async fn rejected_order_marks_failed_and_releases_lock() {
        let mut exchange = MockExchange::new();
        exchange.expect_place_order().returning(|_| {
            Ok(OrderResult {
                status: OrderResultStatus::Rejected,
                filled_size: Decimal::ZERO,
                average_price: Decimal::ZERO,
                exchange_order_id: None,
                error_code: Some("insufficient_liquidity".to_string()),
            })
        });

        let locks = PositionLocks::new();
        let positions = crate::position_manager::PositionManager::new(
            test_risk_config(),
            Decimal::new(998, 3),
            Arc::new(MockExchange::new()),
            test_breaker().await,
            locks.clone(),
        );
        let executor = Executor::new(Arc::new(exchange), test_risk_config(), locks, positions.clone());

        let outcome = executor.submit(sample_order()).await;
        assert!(matches!(outcome, OrderOutcome::Rejected { .. }));
        assert_eq!(positions.open_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let mut exchange = MockExchange::new();
        exchange.expect_place_order().returning(|_| {
            Ok(OrderResult {
                status: OrderResultStatus::Filled,
                filled_size: Decimal::new(10, 0),
                average_price: Decimal::new(51, 2),
                exchange_order_id: Some("o1".to_string()),
                error_code: None,
            })
        });

        let locks = PositionLocks::new();
        let positions = crate::position_manager::PositionManager::new(
            test_risk_config(),
            Decimal::new(998, 3),
            Arc::new(MockExchange::new()),
            test_breaker().await,
            locks.clone(),
        );
        let executor = Executor::new(Arc::new(exchange), test_risk_config(), locks, positions.clone());

        let first = executor.submit(sample_order()).await;
        assert!(matches!(first, OrderOutcome::Filled { .. }));

        let second = executor.submit(sample_order()).await;
        assert!(matches!(second, OrderOutcome::Duplicate { .. }));
    }

    async fn test_breaker() -> Arc<risk_manager::CircuitBreaker> {
        use copytrade_core::traits::mocks::{MockAlerts, MockStore};
        let mut store = MockStore::new();
        store.expect_load().returning(|_| Ok(None));
        store.expect_store().returning(|_, _| Ok(()));
        Arc::new(risk_manager::CircuitBreaker::load(test_risk_config(), Arc::new(store), Arc::new(MockAlerts::new())).await)
    }
}
