use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{AccountSnapshot, MarketSnapshot, PositionSide, TrendDirection};
use crate::recovery::BotError;

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Client for the perpetual-futures exchange REST API
#[derive(Clone)]
pub struct ExchangeClient {
    client: Client,
    base_url: String,
    api_key: String,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketRaw {
    symbol: String,
    last_price: f64,
    volume_24h: f64,
    avg_volume_24h: f64,
    best_bid: f64,
    best_ask: f64,
    volatility_24h: f64,
    orderbook_depth_usd: f64,
    trend: Option<String>,
    trend_strength: Option<f64>,
    window_open: f64,
    window_high: f64,
    window_low: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRaw {
    equity: f64,
    available_margin: f64,
    max_leverage: f64,
    daily_pnl: f64,
    daily_start_equity: f64,
    equity_high_water: f64,
    consecutive_losses: u32,
    open_positions: u32,
    short_exposure: f64,
    avg_hold_time_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRaw {
    order_id: String,
    status: String,
}

// ============== Public Types ==============

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub order_type: OrderType,
    /// Margin to commit, in quote currency
    pub size: f64,
    pub leverage: f64,
    pub stop_price: f64,
    pub target_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Open,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderState,
}

impl From<MarketRaw> for MarketSnapshot {
    fn from(raw: MarketRaw) -> Self {
        let mid = (raw.best_bid + raw.best_ask) / 2.0;
        let spread_pct = if mid > 0.0 {
            (raw.best_ask - raw.best_bid) / mid
        } else {
            0.0
        };
        MarketSnapshot {
            symbol: raw.symbol,
            price: raw.last_price,
            volume_24h: raw.volume_24h,
            avg_volume_24h: raw.avg_volume_24h,
            spread_pct,
            volatility_24h: raw.volatility_24h,
            orderbook_depth_usd: raw.orderbook_depth_usd,
            trend: match raw.trend.as_deref() {
                Some("up") => Some(TrendDirection::Up),
                Some("down") => Some(TrendDirection::Down),
                _ => None,
            },
            trend_strength: raw.trend_strength.unwrap_or(0.0),
            window_open: raw.window_open,
            window_high: raw.window_high,
            window_low: raw.window_low,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl From<AccountRaw> for AccountSnapshot {
    fn from(raw: AccountRaw) -> Self {
        AccountSnapshot {
            equity: raw.equity,
            available_margin: raw.available_margin,
            max_leverage: raw.max_leverage,
            daily_pnl: raw.daily_pnl,
            daily_start_equity: raw.daily_start_equity,
            equity_high_water: raw.equity_high_water,
            consecutive_losses: raw.consecutive_losses,
            open_positions: raw.open_positions,
            short_exposure: raw.short_exposure,
            avg_hold_time_hours: raw.avg_hold_time_hours.unwrap_or(0.0),
        }
    }
}

fn parse_order_state(status: &str) -> Result<OrderState, BotError> {
    match status {
        "open" | "new" | "partially_filled" => Ok(OrderState::Open),
        "filled" => Ok(OrderState::Filled),
        "cancelled" | "canceled" => Ok(OrderState::Cancelled),
        "rejected" => Ok(OrderState::Rejected),
        other => Err(BotError::Data(format!("unknown order status: {other}"))),
    }
}

// ============== Implementation ==============

impl ExchangeClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Current market snapshot including the maintained lookback window
    /// Endpoint: GET /api/v1/market/{symbol}
    pub async fn get_market(&self, symbol: &str) -> Result<MarketSnapshot, BotError> {
        let url = format!("{}/api/v1/market/{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BotError::Api {
                status: response.status().as_u16(),
                message: format!("market fetch failed for {symbol}"),
            });
        }

        let raw: MarketRaw = response.json().await?;
        Ok(raw.into())
    }

    /// Account equity, margin, and daily risk counters
    /// Endpoint: GET /api/v1/account
    pub async fn get_account(&self) -> Result<AccountSnapshot, BotError> {
        let url = format!("{}/api/v1/account", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BotError::Api {
                status: response.status().as_u16(),
                message: "account fetch failed".to_string(),
            });
        }

        let raw: AccountRaw = response.json().await?;
        Ok(raw.into())
    }

    /// Submit an entry order with attached stop and target
    /// Endpoint: POST /api/v1/orders
    ///
    /// Market orders fill (or reject) immediately; limit orders may ack
    /// `open` and rest until filled or cancelled.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, BotError> {
        let url = format!("{}/api/v1/orders", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BotError::Api {
                status: response.status().as_u16(),
                message: format!("order placement failed for {}", request.symbol),
            });
        }

        let raw: OrderRaw = response.json().await?;
        Ok(OrderAck {
            status: parse_order_state(&raw.status)?,
            order_id: raw.order_id,
        })
    }

    /// Endpoint: GET /api/v1/orders/{id}
    pub async fn order_status(&self, order_id: &str) -> Result<OrderState, BotError> {
        let url = format!("{}/api/v1/orders/{}", self.base_url, order_id);
        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BotError::Api {
                status: response.status().as_u16(),
                message: format!("status fetch failed for order {order_id}"),
            });
        }

        let raw: OrderRaw = response.json().await?;
        parse_order_state(&raw.status)
    }

    /// Endpoint: DELETE /api/v1/orders/{id}
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), BotError> {
        let url = format!("{}/api/v1/orders/{}", self.base_url, order_id);
        let response = self
            .client
            .delete(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BotError::Api {
                status: response.status().as_u16(),
                message: format!("cancel failed for order {order_id}"),
            });
        }
        Ok(())
    }

    /// Amend the protective stop of a live position
    /// Endpoint: POST /api/v1/positions/{id}/stop
    pub async fn amend_stop(&self, position_id: &str, stop_price: f64) -> Result<(), BotError> {
        let url = format!("{}/api/v1/positions/{}/stop", self.base_url, position_id);
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "stopPrice": stop_price }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BotError::Api {
                status: response.status().as_u16(),
                message: format!("stop amendment failed for position {position_id}"),
            });
        }
        Ok(())
    }

    /// Close a position at market
    /// Endpoint: POST /api/v1/positions/{id}/close
    pub async fn close_position(&self, position_id: &str) -> Result<f64, BotError> {
        let url = format!("{}/api/v1/positions/{}/close", self.base_url, position_id);
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BotError::Api {
                status: response.status().as_u16(),
                message: format!("close failed for position {position_id}"),
            });
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CloseRaw {
            fill_price: f64,
        }
        let raw: CloseRaw = response.json().await?;
        Ok(raw.fill_price)
    }
}
