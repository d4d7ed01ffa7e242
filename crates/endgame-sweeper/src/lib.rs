//! Endgame Sweeper
//!
//! Independent opportunity scanner (C9): on its own cadence, finds binary
//! markets trading near-certain with a favorable annualized return and
//! feeds them into the same executor/position-manager pipeline the leader
//! copy-trading path uses.

pub mod sweeper;

pub use sweeper::EndgameSweeper;
