//! Trading Engine
//!
//! Order execution and position lifecycle management (C8): converts a
//! `SizedOrder` from the risk gate into an open `Position`, and drives every
//! open position to `Closed` with at most one concurrent action per
//! `position_key`.

pub mod executor;
pub mod position_manager;

pub use executor::{Executor, ExecutorConfig};
pub use position_manager::PositionManager;
