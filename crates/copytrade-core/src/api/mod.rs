//! API clients for external services.

pub mod clob;
pub mod polygon;

pub use clob::ClobExchangeClient;
pub use polygon::PolygonTxSource;
