//! Core domain types shared by every component in the detect → gate →
//! execute → manage pipeline (§3 Data Model).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::validate::mask_address;

/// Buy or sell, as seen from the wallet executing the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// A normalized leader trade, produced once per `(leader_address, tx_hash)`
/// by the leader monitor and discarded once it has passed through the risk
/// gate and executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub tx_hash: String,
    pub block_number: u64,
    pub timestamp_utc: DateTime<Utc>,
    pub leader_address: String,
    pub condition_id: String,
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
}

impl Trade {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp_utc
    }

    pub fn position_key(&self) -> PositionKey {
        PositionKey {
            condition_id: self.condition_id.clone(),
            token_id: self.token_id.clone(),
            side: self.side,
        }
    }

    /// First 8 + last 6 chars of the leader address, never the raw value.
    pub fn masked_leader(&self) -> String {
        mask_address(&self.leader_address)
    }
}

/// `(condition_id, token_id, side)` — the uniqueness key for open exposure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub condition_id: String,
    pub token_id: String,
    pub side: Side,
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{:?}", self.condition_id, self.token_id, self.side)
    }
}

/// Where a position's entry signal originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSource {
    Copy { source_leader: String },
    Endgame,
}

/// Lifecycle state of an open follower exposure (§3 Position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Opening,
    Open,
    Closing,
    Closed,
    Failed,
}

impl PositionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PositionState::Closed | PositionState::Failed)
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Time,
    ProbabilityExit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub key: PositionKey,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub opened_at_utc: DateTime<Utc>,
    pub source: PositionSource,
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    /// Seconds, not `chrono::Duration` — `TimeDelta` has no serde impl, and
    /// `Position` is persisted via `StateStore` (§3, §6).
    pub max_hold_duration_secs: i64,
    pub state: PositionState,
    pub realized_pnl: Option<Decimal>,
    pub closed_at_utc: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    /// Unrealized PnL percentage against `current_price`, side-correct
    /// (§4.3 step 3 — a single formula applied to both sides is a bug).
    pub fn unrealized_pnl_pct(&self, current_price: Decimal) -> Option<Decimal> {
        if self.entry_price.is_zero() {
            return None;
        }
        let pct = match self.key.side {
            Side::Buy => (current_price - self.entry_price) / self.entry_price,
            Side::Sell => (self.entry_price - current_price) / self.entry_price,
        };
        Some(pct)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.opened_at_utc
    }

    pub fn max_hold_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_hold_duration_secs)
    }
}

/// Outcome of a risk-gate evaluation (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizedOrder {
    pub position_key: PositionKey,
    pub side: Side,
    pub size: Decimal,
    pub limit_price: Decimal,
    pub slippage_tolerance: Decimal,
    pub source: PositionSource,
}

/// Sub-reason carried by a risk-gate rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Stale,
    Invalid,
    CircuitBreaker,
    MaxConcurrent,
    Duplicate,
    PriceBand,
    BelowMin,
    BelowConfidence,
}

impl RejectionReason {
    /// DEBUG for common/expected rejections, INFO for operationally
    /// interesting ones (§7 propagation policy).
    pub fn is_info_level(self) -> bool {
        matches!(self, RejectionReason::CircuitBreaker | RejectionReason::MaxConcurrent)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectionReason,
}

/// Process-wide circuit-breaker state (§3 CircuitBreakerState). Durably
/// persisted by `StateStore` under key `cb`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub daily_loss_accum: Decimal,
    pub consecutive_losses: u32,
    pub last_reset_utc: DateTime<Utc>,
    pub tripped: bool,
    pub trip_reason: Option<String>,
    pub tripped_until_utc: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    pub fn warm(now: DateTime<Utc>) -> Self {
        Self {
            daily_loss_accum: Decimal::ZERO,
            consecutive_losses: 0,
            last_reset_utc: now,
            tripped: false,
            trip_reason: None,
            tripped_until_utc: None,
        }
    }
}

/// Per-leader dedup/progress cursor (§3 LeaderCursor). Persisted under key
/// `leader/{addr}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderCursor {
    pub last_processed_block: u64,
    pub recent_tx_hashes: Vec<String>,
}

impl LeaderCursor {
    pub fn genesis() -> Self {
        Self {
            last_processed_block: 0,
            recent_tx_hashes: Vec::new(),
        }
    }
}

/// Result of submitting an order to the exchange (§3 OrderResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub status: OrderResultStatus,
    pub filled_size: Decimal,
    pub average_price: Decimal,
    pub exchange_order_id: Option<String>,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderResultStatus {
    Filled,
    Partial,
    Rejected,
    Pending,
}

/// Summary of an active market, as returned by `ExchangeClient::get_markets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub condition_id: String,
    pub question: String,
    pub probability: Decimal,
    pub liquidity_usd: Decimal,
    pub resolves_at: DateTime<Utc>,
}

/// Detailed market info, as returned by `ExchangeClient::get_market`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDetail {
    pub condition_id: String,
    pub question: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub probability: Decimal,
    pub liquidity_usd: Decimal,
    pub resolves_at: DateTime<Utc>,
}

/// Current account balances, as returned by `ExchangeClient::get_balance`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Balance {
    pub quote_balance: Decimal,
    pub gas_balance: Decimal,
}

/// A raw on-chain transaction from a `LeaderTxSource`, prior to call-data
/// decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tx {
    pub hash: String,
    pub block_number: u64,
    pub timestamp_utc: DateTime<Utc>,
    pub to: String,
    pub input: String,
}

/// A closed sum type over the exchange-contract call shapes this engine
/// understands how to decode (§9 design note: dynamic dict-lookup decoding
/// in the source → tagged variant + validator here). Anything else is
/// discarded with a reason at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeCall {
    FillOrder {
        token_id: String,
        side: Side,
        price_numerator: u64,
        price_denominator: u64,
        amount: u64,
    },
    MatchOrders {
        token_id: String,
        side: Side,
        price_numerator: u64,
        price_denominator: u64,
        amount: u64,
    },
}

impl ExchangeCall {
    pub fn token_id(&self) -> &str {
        match self {
            ExchangeCall::FillOrder { token_id, .. } => token_id,
            ExchangeCall::MatchOrders { token_id, .. } => token_id,
        }
    }

    pub fn side(&self) -> Side {
        match self {
            ExchangeCall::FillOrder { side, .. } => *side,
            ExchangeCall::MatchOrders { side, .. } => *side,
        }
    }

    pub fn price(&self) -> Option<Decimal> {
        let (num, den) = match self {
            ExchangeCall::FillOrder {
                price_numerator,
                price_denominator,
                ..
            } => (*price_numerator, *price_denominator),
            ExchangeCall::MatchOrders {
                price_numerator,
                price_denominator,
                ..
            } => (*price_numerator, *price_denominator),
        };
        if den == 0 {
            return None;
        }
        Decimal::from(num).checked_div(Decimal::from(den))
    }

    pub fn amount(&self) -> Decimal {
        match self {
            ExchangeCall::FillOrder { amount, .. } => Decimal::from(*amount),
            ExchangeCall::MatchOrders { amount, .. } => Decimal::from(*amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_correct_pnl_sell() {
        let pos = Position {
            key: PositionKey {
                condition_id: "c".into(),
                token_id: "t".into(),
                side: Side::Sell,
            },
            entry_price: Decimal::new(80, 2),
            size: Decimal::ONE,
            opened_at_utc: Utc::now(),
            source: PositionSource::Endgame,
            stop_price: Decimal::ZERO,
            take_profit_price: Decimal::ONE,
            max_hold_duration_secs: 3600,
            state: PositionState::Open,
            realized_pnl: None,
            closed_at_utc: None,
            exit_reason: None,
        };
        let pct = pos.unrealized_pnl_pct(Decimal::new(70, 2)).unwrap();
        assert!(pct > Decimal::ZERO);
    }

    #[test]
    fn side_correct_pnl_buy() {
        let mut pos_key = PositionKey {
            condition_id: "c".into(),
            token_id: "t".into(),
            side: Side::Buy,
        };
        pos_key.side = Side::Buy;
        let pos = Position {
            key: pos_key,
            entry_price: Decimal::new(80, 2),
            size: Decimal::ONE,
            opened_at_utc: Utc::now(),
            source: PositionSource::Endgame,
            stop_price: Decimal::ZERO,
            take_profit_price: Decimal::ONE,
            max_hold_duration_secs: 3600,
            state: PositionState::Open,
            realized_pnl: None,
            closed_at_utc: None,
            exit_reason: None,
        };
        let pct = pos.unrealized_pnl_pct(Decimal::new(70, 2)).unwrap();
        assert!(pct < Decimal::ZERO);
    }
}
