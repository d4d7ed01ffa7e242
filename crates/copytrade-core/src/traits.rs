//! External-interface traits (§6). Each is a narrow, replaceable
//! collaborator; the engine core never depends on a concrete transport.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{Balance, MarketDetail, MarketSummary, OrderResult, Side, Tx};
use crate::Result;

/// The CLOB order-book exchange.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_balance(&self) -> Result<Balance>;
    async fn get_markets(&self) -> Result<Vec<MarketSummary>>;
    async fn get_market(&self, condition_id: &str) -> Result<MarketDetail>;
    async fn get_current_price(&self, condition_id: &str, token_id: &str, side: Side) -> Result<Decimal>;
    async fn place_order(&self, order: &PlaceOrderRequest) -> Result<OrderResult>;
    async fn health_check(&self) -> bool;
}

/// The request shape the executor hands to `ExchangeClient::place_order`.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub token_id: String,
    pub side: Side,
    pub limit_price: Decimal,
    pub size: Decimal,
}

/// A block explorer or indexed RPC exposing a wallet's recent transactions.
#[async_trait]
pub trait LeaderTxSource: Send + Sync {
    async fn get_transactions(&self, wallet: &str, from_block: u64, to_block: u64) -> Result<Vec<Tx>>;
    async fn get_chain_head(&self) -> Result<u64>;
    async fn health_check(&self) -> bool;
}

/// Persistence for circuit-breaker state and leader cursors. Opaque
/// byte-level KV; no transactional requirement across keys.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Severity levels for out-bound operator alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Best-effort out-bound notification sink. Wallet addresses in `context`
/// must already be masked by the caller before this is invoked.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, severity: Severity, event: &str, context: &str);
}

#[cfg(test)]
pub mod mocks {
    //! `mockall`-generated test doubles for each external interface, used by
    //! the risk-gate, executor and leader-monitor unit tests.
    use super::*;
    use mockall::mock;

    mock! {
        pub Exchange {}

        #[async_trait]
        impl ExchangeClient for Exchange {
            async fn get_balance(&self) -> Result<Balance>;
            async fn get_markets(&self) -> Result<Vec<MarketSummary>>;
            async fn get_market(&self, condition_id: &str) -> Result<MarketDetail>;
            async fn get_current_price(&self, condition_id: &str, token_id: &str, side: Side) -> Result<Decimal>;
            async fn place_order(&self, order: &PlaceOrderRequest) -> Result<OrderResult>;
            async fn health_check(&self) -> bool;
        }
    }

    mock! {
        pub TxSource {}

        #[async_trait]
        impl LeaderTxSource for TxSource {
            async fn get_transactions(&self, wallet: &str, from_block: u64, to_block: u64) -> Result<Vec<Tx>>;
            async fn get_chain_head(&self) -> Result<u64>;
            async fn health_check(&self) -> bool;
        }
    }

    mock! {
        pub Store {}

        #[async_trait]
        impl StateStore for Store {
            async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
            async fn store(&self, key: &str, bytes: &[u8]) -> Result<()>;
        }
    }

    mock! {
        pub Alerts {}

        #[async_trait]
        impl AlertSink for Alerts {
            async fn notify(&self, severity: Severity, event: &str, context: &str);
        }
    }
}
