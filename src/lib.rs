//! Copy-Trading Engine: a copy-trading system for a binary prediction market CLOB.
//!
//! This is the root crate; it re-exports the internal crates as a single point
//! of reference for how they compose and for integration tests:
//!
//! - `copytrade-core`: shared domain types, config, fixed-point money, bounded
//!   TTL cache, rate limiter, input validator, and the external interface traits
//!   plus their concrete adapters.
//! - `leader-monitor`: per-wallet polling and trade detection.
//! - `risk-manager`: circuit breaker and risk gate.
//! - `trading-engine`: order execution and position lifecycle management.
//! - `endgame-sweeper`: opportunistic near-resolution market scanner.
//! - `auth`: trading wallet loading and message signing.
//!
//! The orchestrator binary in `crates/orchestrator` wires all of the above
//! into one cooperatively scheduled process.

pub use auth;
pub use copytrade_core as core;
pub use endgame_sweeper;
pub use leader_monitor;
pub use risk_manager as risk;
pub use trading_engine as trading;
