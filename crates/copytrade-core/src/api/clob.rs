//! Polymarket CLOB REST client — the concrete `ExchangeClient` adapter.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{Balance, MarketDetail, MarketSummary, OrderResult, OrderResultStatus, Side};
use crate::signing::{OrderSide as SigningSide, OrderSigner};
use crate::traits::{ExchangeClient, PlaceOrderRequest};
use crate::{Error, Result};

/// Polymarket CLOB REST client for order book data and order placement.
pub struct ClobExchangeClient {
    base_url: String,
    http_client: reqwest::Client,
    /// Present when this instance is allowed to place live orders.
    signer: Option<OrderSigner>,
}

impl ClobExchangeClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://clob.polymarket.com";

    /// Read-only client: `get_*` methods work, `place_order` errors.
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
            http_client: reqwest::Client::new(),
            signer: None,
        }
    }

    /// A client that can sign and submit orders under `signer`'s wallet.
    pub fn with_signer(base_url: Option<String>, signer: OrderSigner) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
            http_client: reqwest::Client::new(),
            signer: Some(signer),
        }
    }

    async fn get_order_book(&self, token_id: &str) -> Result<ClobOrderBook> {
        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Api {
                message: format!("failed to fetch order book: {}", response.status()),
                status: Some(response.status().as_u16()),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ExchangeClient for ClobExchangeClient {
    async fn get_balance(&self) -> Result<Balance> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| Error::Api { message: "no signer configured for get_balance".into(), status: None })?;
        let url = format!("{}/balance/{}", self.base_url, signer.address());
        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Api {
                message: format!("failed to fetch balance: {}", response.status()),
                status: Some(response.status().as_u16()),
            });
        }
        let body: ClobBalance = response.json().await?;
        Ok(Balance {
            quote_balance: body.quote_balance.parse().unwrap_or(Decimal::ZERO),
            gas_balance: body.gas_balance.parse().unwrap_or(Decimal::ZERO),
        })
    }

    async fn get_markets(&self) -> Result<Vec<MarketSummary>> {
        let url = format!("{}/markets", self.base_url);
        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Api {
                message: format!("failed to fetch markets: {}", response.status()),
                status: Some(response.status().as_u16()),
            });
        }
        let markets: Vec<ClobMarket> = response.json().await?;
        Ok(markets.into_iter().filter_map(ClobMarket::into_summary).collect())
    }

    async fn get_market(&self, condition_id: &str) -> Result<MarketDetail> {
        let url = format!("{}/markets/{}", self.base_url, condition_id);
        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Api {
                message: format!("failed to fetch market {condition_id}: {}", response.status()),
                status: Some(response.status().as_u16()),
            });
        }
        let market: ClobMarket = response.json().await?;
        market
            .into_detail()
            .ok_or_else(|| Error::Api { message: format!("market {condition_id} missing two outcomes"), status: None })
    }

    async fn get_current_price(&self, _condition_id: &str, token_id: &str, side: Side) -> Result<Decimal> {
        let book = self.get_order_book(token_id).await?;
        let level = match side {
            // A follower buying mirrors a leader buy by lifting the best ask.
            Side::Buy => book.asks.first(),
            Side::Sell => book.bids.first(),
        };
        level
            .and_then(|l| l.price.parse::<Decimal>().ok())
            .ok_or_else(|| Error::Api { message: format!("no {side:?} liquidity for token {token_id}"), status: None })
    }

    async fn place_order(&self, order: &PlaceOrderRequest) -> Result<OrderResult> {
        let signer = self.signer.as_ref().ok_or_else(|| Error::Api {
            message: "no signer configured for place_order".into(),
            status: None,
        })?;

        let signing_side = match order.side {
            Side::Buy => SigningSide::Buy,
            Side::Sell => SigningSide::Sell,
        };

        let order_data = signer
            .order_builder()
            .token_id_str(&order.token_id)
            .side(signing_side)
            .price(order.limit_price)
            .size(order.size)
            .expires_in(3600)
            .build()
            .ok_or_else(|| Error::Api { message: "failed to build order data".into(), status: None })?;

        let signed = signer
            .sign_order(&order_data)
            .await
            .map_err(|e| Error::Api { message: format!("failed to sign order: {e}"), status: None })?;

        let url = format!("{}/order", self.base_url);
        let response = self.http_client.post(&url).json(&signed).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "order placement rejected");
            return Ok(OrderResult {
                status: OrderResultStatus::Rejected,
                filled_size: Decimal::ZERO,
                average_price: Decimal::ZERO,
                exchange_order_id: None,
                error_code: Some(format!("http_{status}")),
            });
        }

        let ack: ClobOrderAck = response.json().await?;
        info!(order_id = %ack.order_id, status = %ack.status, "order submitted");
        Ok(ack.into_result())
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/", self.base_url);
        self.http_client.get(&url).send().await.map(|r| r.status().is_success()).unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct ClobBalance {
    quote_balance: String,
    gas_balance: String,
}

#[derive(Debug, Deserialize)]
struct ClobMarket {
    condition_id: String,
    question: String,
    tokens: Vec<ClobToken>,
    liquidity: String,
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClobToken {
    token_id: String,
    outcome: String,
    price: Option<String>,
}

impl ClobMarket {
    fn yes_probability(&self) -> Decimal {
        self.tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("yes"))
            .and_then(|t| t.price.as_ref())
            .and_then(|p| p.parse::<Decimal>().ok())
            .unwrap_or(Decimal::new(5, 1))
    }

    fn resolves_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.end_date
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| chrono::Utc::now() + chrono::Duration::days(365))
    }

    fn into_summary(self) -> Option<MarketSummary> {
        Some(MarketSummary {
            condition_id: self.condition_id.clone(),
            question: self.question.clone(),
            probability: self.yes_probability(),
            liquidity_usd: self.liquidity.parse().unwrap_or(Decimal::ZERO),
            resolves_at: self.resolves_at(),
        })
    }

    fn into_detail(self) -> Option<MarketDetail> {
        let yes = self.tokens.iter().find(|t| t.outcome.eq_ignore_ascii_case("yes"))?;
        let no = self.tokens.iter().find(|t| t.outcome.eq_ignore_ascii_case("no"))?;
        let yes_token_id = yes.token_id.clone();
        let no_token_id = no.token_id.clone();
        Some(MarketDetail {
            condition_id: self.condition_id.clone(),
            question: self.question.clone(),
            yes_token_id,
            no_token_id,
            probability: self.yes_probability(),
            liquidity_usd: self.liquidity.parse().unwrap_or(Decimal::ZERO),
            resolves_at: self.resolves_at(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ClobOrderBook {
    bids: Vec<ClobPriceLevel>,
    asks: Vec<ClobPriceLevel>,
}

#[derive(Debug, Deserialize)]
struct ClobPriceLevel {
    price: String,
}

#[derive(Debug, Deserialize)]
struct ClobOrderAck {
    order_id: String,
    status: String,
    #[serde(default)]
    filled_size: Option<String>,
    #[serde(default)]
    average_price: Option<String>,
}

impl ClobOrderAck {
    fn into_result(self) -> OrderResult {
        let status = match self.status.to_ascii_uppercase().as_str() {
            "FILLED" | "MATCHED" => OrderResultStatus::Filled,
            "PARTIALLY_FILLED" | "PARTIAL" => OrderResultStatus::Partial,
            "REJECTED" | "FAILED" => OrderResultStatus::Rejected,
            _ => OrderResultStatus::Pending,
        };
        OrderResult {
            status,
            filled_size: self.filled_size.and_then(|s| s.parse().ok()).unwrap_or(Decimal::ZERO),
            average_price: self.average_price.and_then(|s| s.parse().ok()).unwrap_or(Decimal::ZERO),
            exchange_order_id: Some(self.order_id),
            error_code: None,
        }
    }
}
