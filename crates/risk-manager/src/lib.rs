//! Risk Manager
//!
//! Circuit breaker (C5) and risk gate (C7): the single-point authority on
//! whether trading is currently permitted, and the admission check that
//! turns a leader trade into a sized follower order or a typed rejection.

pub mod circuit_breaker;
pub mod risk_gate;

pub use circuit_breaker::{Allowed, CircuitBreaker};
pub use risk_gate::{question_tokens, OpenPositions, RiskGate};
