//! Leader Monitor
//!
//! Polls configured leader wallets for exchange calls, decodes and
//! validates them, and emits deduplicated `Trade` events.

pub mod calldata;
pub mod leader_monitor;

pub use calldata::{decode_exchange_call, DecodedCall};
pub use leader_monitor::LeaderMonitor;
