//! Typed configuration surface (§6), loaded the way the teacher's
//! `Config::from_env` loads its sub-configs: one struct per concern,
//! populated from environment variables via `dotenvy` + `std::env`, with
//! sane defaults for everything except wallet/network secrets.

use std::env;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::{Error, Result};

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env_var(key)
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_daily_loss: Decimal,
    pub risk_per_trade_fraction: Decimal,
    pub max_position_fraction: Decimal,
    pub max_position_size: Decimal,
    pub min_trade_size: Decimal,
    pub min_price_risk_fraction: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub max_hold_duration: Duration,
    pub max_concurrent_positions: usize,
    pub max_consecutive_losses: u32,
    pub cooldown_duration: Duration,
    pub max_staleness: Duration,
    pub min_confidence: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: env_decimal("RISK_MAX_DAILY_LOSS", Decimal::new(500, 0)),
            risk_per_trade_fraction: env_decimal("RISK_PER_TRADE_FRACTION", Decimal::new(2, 2)),
            max_position_fraction: env_decimal("RISK_MAX_POSITION_FRACTION", Decimal::new(10, 2)),
            max_position_size: env_decimal("RISK_MAX_POSITION_SIZE", Decimal::new(100, 0)),
            min_trade_size: env_decimal("RISK_MIN_TRADE_SIZE", Decimal::new(1, 0)),
            min_price_risk_fraction: Decimal::new(1, 3), // 0.001, mandatory floor (§4.2)
            min_price: env_decimal("RISK_MIN_PRICE", Decimal::new(2, 2)),
            max_price: env_decimal("RISK_MAX_PRICE", Decimal::new(98, 2)),
            stop_loss_pct: env_decimal("RISK_STOP_LOSS_PCT", Decimal::new(5, 2)),
            take_profit_pct: env_decimal("RISK_TAKE_PROFIT_PCT", Decimal::new(7, 2)),
            max_hold_duration: Duration::from_secs(env_parse("RISK_MAX_HOLD_SECS", 24 * 3600)),
            max_concurrent_positions: env_parse("RISK_MAX_CONCURRENT_POSITIONS", 10),
            max_consecutive_losses: env_parse("RISK_MAX_CONSECUTIVE_LOSSES", 5),
            cooldown_duration: Duration::from_secs(env_parse("RISK_COOLDOWN_SECS", 3600)),
            max_staleness: Duration::from_secs(env_parse("RISK_MAX_STALENESS_SECS", 120)),
            min_confidence: env_decimal("RISK_MIN_CONFIDENCE", Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeaderConfig {
    pub addresses: Vec<String>,
    pub poll_interval: Duration,
    pub max_block_span: u64,
    pub fanout: usize,
    pub exchange_contract_allowlist: Vec<String>,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            addresses: env_list("LEADER_ADDRESSES"),
            poll_interval: Duration::from_secs(env_parse("LEADER_POLL_INTERVAL_SECS", 15)),
            max_block_span: env_parse("LEADER_MAX_BLOCK_SPAN", 100),
            fanout: env_parse("LEADER_FANOUT", 10),
            exchange_contract_allowlist: env_list("LEADER_EXCHANGE_CONTRACT_ALLOWLIST"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndgameConfig {
    pub enabled: bool,
    pub scan_interval: Duration,
    pub min_probability: Decimal,
    pub probability_exit: Decimal,
    pub max_days: i64,
    pub min_liquidity: Decimal,
    pub min_annualized_return: Decimal,
    pub max_position_fraction: Decimal,
    pub blacklist_keywords: Vec<String>,
    pub min_overlap_tokens: usize,
}

impl Default for EndgameConfig {
    fn default() -> Self {
        Self {
            enabled: env_parse("ENDGAME_ENABLED", true),
            scan_interval: Duration::from_secs(env_parse("ENDGAME_SCAN_INTERVAL_SECS", 300)),
            min_probability: env_decimal("ENDGAME_MIN_PROBABILITY", Decimal::new(95, 2)),
            probability_exit: env_decimal("ENDGAME_PROBABILITY_EXIT", Decimal::new(998, 3)),
            max_days: env_parse("ENDGAME_MAX_DAYS", 7),
            min_liquidity: env_decimal("ENDGAME_MIN_LIQUIDITY", Decimal::new(10_000, 0)),
            min_annualized_return: env_decimal("ENDGAME_MIN_ANNUALIZED_RETURN", Decimal::new(20, 2)),
            max_position_fraction: env_decimal("ENDGAME_MAX_POSITION_FRACTION", Decimal::new(3, 2)),
            blacklist_keywords: env_list("ENDGAME_BLACKLIST_KEYWORDS"),
            min_overlap_tokens: env_parse("ENDGAME_MIN_OVERLAP_TOKENS", 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub clob_interval: Duration,
    pub polygon_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            clob_interval: Duration::from_millis(env_parse("RATE_LIMIT_CLOB_INTERVAL_MS", 200)),
            polygon_interval: Duration::from_millis(env_parse("RATE_LIMIT_POLYGON_INTERVAL_MS", 250)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let capped = env_parse::<u64>("CACHE_MAX_TTL_SECONDS", 1800).min(1800);
        Self {
            max_ttl: Duration::from_secs(capped),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub clob_base_url: Option<String>,
    pub clob_ws_url: Option<String>,
    pub polygon_rpc_url: Option<String>,
    pub alchemy_api_key: Option<String>,
}

impl NetworkConfig {
    pub fn resolved_polygon_rpc_url(&self) -> Option<String> {
        self.polygon_rpc_url.clone().or_else(|| {
            self.alchemy_api_key
                .as_ref()
                .map(|key| format!("https://polygon-mainnet.g.alchemy.com/v2/{key}"))
        })
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            clob_base_url: env_var("POLYMARKET_CLOB_URL"),
            clob_ws_url: env_var("POLYMARKET_WS_URL"),
            polygon_rpc_url: env_var("POLYGON_RPC_URL"),
            alchemy_api_key: env_var("ALCHEMY_API_KEY"),
        }
    }
}

/// Directory the file-based `StateStore` keeps its per-key files under.
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub dir: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: env_var("STATE_DIR").unwrap_or_else(|| "./state".to_string()),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub risk: RiskConfig,
    pub leader: LeaderConfig,
    pub endgame: EndgameConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub state: StateConfig,
}

impl Config {
    /// Load configuration from environment variables (`.env` first, if
    /// present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::default();

        if config.leader.addresses.is_empty() {
            return Err(Error::Config(
                "LEADER_ADDRESSES must name at least one leader wallet".to_string(),
            ));
        }
        if config.leader.exchange_contract_allowlist.is_empty() {
            return Err(Error::Config(
                "LEADER_EXCHANGE_CONTRACT_ALLOWLIST must name at least one exchange contract".to_string(),
            ));
        }

        Ok(config)
    }
}
