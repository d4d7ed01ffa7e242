//! Wallet loading and EIP-712/EIP-191 message signing for the trading
//! wallet that submits orders and signs CLOB authentication messages.

pub mod wallet;

pub use wallet::TradingWallet;
