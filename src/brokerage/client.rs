// =============================================================================
// BrokerageClient — REST calls against the brokerage's trading/data APIs
// =============================================================================
//
// Grounded on the original bot's `AlpacaInterface`: one client per trading
// mode, key-id/secret-key header auth (no request signing, unlike the
// HMAC-signed exchange client this crate's ambient stack is otherwise
// modeled on), and the same fractional-share market-order fallback policy.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::error::BrokerageError;
use crate::types::{OrderStatus, Side, TradingMode};

use super::order::Order;
use super::traits::Brokerage;

const PAPER_TRADING_BASE: &str = "https://paper-api.alpaca.markets";
const LIVE_TRADING_BASE: &str = "https://api.alpaca.markets";
const DATA_BASE: &str = "https://data.alpaca.markets";

pub struct BrokerageClient {
    http: reqwest::Client,
    trading_base: &'static str,
    key_id: String,
    secret_key: String,
    ticker: String,
}

impl BrokerageClient {
    pub fn new(mode: TradingMode, ticker: impl Into<String>) -> Result<Self, BrokerageError> {
        let (key_id_var, secret_key_var) = match mode {
            TradingMode::Paper => ("PAPER_ALPACA_KEY_ID", "PAPER_ALPACA_SECRET_KEY"),
            TradingMode::Live => ("LIVE_ALPACA_KEY_ID", "LIVE_ALPACA_SECRET_KEY"),
        };

        let key_id = std::env::var(key_id_var)
            .map_err(|_| BrokerageError::MissingCredentials(key_id_var))?;
        let secret_key = std::env::var(secret_key_var)
            .map_err(|_| BrokerageError::MissingCredentials(secret_key_var))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let trading_base = match mode {
            TradingMode::Paper => PAPER_TRADING_BASE,
            TradingMode::Live => LIVE_TRADING_BASE,
        };

        Ok(Self {
            http,
            trading_base,
            key_id,
            secret_key,
            ticker: ticker.into(),
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BrokerageError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(BrokerageError::ErrorResponse { status, body })
        }
    }

    pub async fn get_shares_count(&self) -> Result<Decimal, BrokerageError> {
        #[derive(Deserialize)]
        struct Position {
            symbol: String,
            qty: Decimal,
        }

        let url = format!("{}/v2/positions", self.trading_base);
        let resp = Self::check_status(self.auth(self.http.get(url)).send().await?).await?;
        let positions: Vec<Position> = resp.json().await?;

        Ok(positions
            .into_iter()
            .find(|p| p.symbol == self.ticker)
            .map(|p| p.qty)
            .unwrap_or_default())
    }

    pub async fn get_current_price(&self) -> Result<Decimal, BrokerageError> {
        #[derive(Deserialize)]
        struct Trade {
            p: Decimal,
        }
        #[derive(Deserialize)]
        struct LatestTradeResponse {
            trade: Trade,
        }

        let url = format!(
            "{}/v2/stocks/{}/trades/latest",
            DATA_BASE, self.ticker
        );
        let resp = Self::check_status(self.auth(self.http.get(url)).send().await?).await?;
        let body: LatestTradeResponse = resp.json().await?;
        Ok(body.trade.p)
    }

    pub async fn get_order_by_id(&self, order_id: &str) -> Result<Order, BrokerageError> {
        let url = format!("{}/v2/orders/{}", self.trading_base, order_id);
        let resp = self.auth(self.http.get(url)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BrokerageError::OrderNotFound(order_id.to_string()));
        }
        let resp = Self::check_status(resp).await?;
        resp.json::<Order>().await.map_err(BrokerageError::Request)
    }

    /// Fetches the order first; declines to call the brokerage at all if
    /// it is already terminal. Returns `false` on a cancel attempt that
    /// itself failed — the caller must then fall back to manual
    /// reconciliation (§4.5).
    pub async fn cancel_order(&self, order_id: &str) -> Result<bool, BrokerageError> {
        let order = match self.get_order_by_id(order_id).await {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(%order_id, error = %err, "failed to fetch order before cancelling");
                return Ok(false);
            }
        };

        if order.status.is_terminal_fill() || order.status.is_terminal_cancel() {
            tracing::info!(%order_id, status = %order.status, "order already terminal, not cancelling");
            return Ok(false);
        }

        let url = format!("{}/v2/orders/{}", self.trading_base, order_id);
        match self.auth(self.http.delete(url)).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(%order_id, "order cancelled");
                Ok(true)
            }
            Ok(resp) => {
                tracing::warn!(%order_id, status = %resp.status(), "cancel request rejected");
                Ok(false)
            }
            Err(err) => {
                tracing::warn!(%order_id, error = %err, "cancel request failed");
                Ok(false)
            }
        }
    }

    /// Places an order. Fractional quantities are converted to a market
    /// order, but only when the current price still favors the intended
    /// side; otherwise the order is declined and `None` is returned
    /// without contacting the brokerage a second time (§4.3).
    pub async fn place_order(
        &self,
        side: Side,
        limit_price: Decimal,
        qty: Decimal,
    ) -> Result<Option<Order>, BrokerageError> {
        let is_fractional = qty.fract() != Decimal::ZERO;

        let body = if is_fractional {
            let current = self.get_current_price().await?;
            let favorable = match side {
                Side::Buy => current < limit_price,
                Side::Sell => current > limit_price,
            };
            if !favorable {
                tracing::warn!(
                    %current,
                    %limit_price,
                    %side,
                    "current price unfavorable for fractional market order, declining"
                );
                return Ok(None);
            }
            serde_json::json!({
                "symbol": self.ticker,
                "side": side,
                "type": "market",
                "qty": qty.to_string(),
                "time_in_force": "day",
                "extended_hours": false,
            })
        } else {
            serde_json::json!({
                "symbol": self.ticker,
                "side": side,
                "type": "limit",
                "limit_price": limit_price.to_string(),
                "qty": qty.to_string(),
                "time_in_force": "day",
                "extended_hours": true,
            })
        };

        let url = format!("{}/v2/orders", self.trading_base);
        let resp = match self.auth(self.http.post(url).json(&body)).send().await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(error = %err, "order placement request failed");
                return Ok(None);
            }
        };

        let resp = match Self::check_status(resp).await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(error = %err, "order placement rejected");
                return Ok(None);
            }
        };

        let order: Order = resp.json().await?;
        if !matches!(
            order.status,
            OrderStatus::Accepted | OrderStatus::New | OrderStatus::PendingNew | OrderStatus::PartiallyFilled
        ) {
            tracing::warn!(status = %order.status, "order placed but not in an expected accepted state, treating as failure");
            return Ok(None);
        }

        Ok(Some(order))
    }
}

#[async_trait]
impl Brokerage for BrokerageClient {
    async fn get_shares_count(&self) -> Result<Decimal, BrokerageError> {
        BrokerageClient::get_shares_count(self).await
    }

    async fn get_current_price(&self) -> Result<Decimal, BrokerageError> {
        BrokerageClient::get_current_price(self).await
    }

    async fn get_order_by_id(&self, order_id: &str) -> Result<Order, BrokerageError> {
        BrokerageClient::get_order_by_id(self, order_id).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, BrokerageError> {
        BrokerageClient::cancel_order(self, order_id).await
    }

    async fn place_order(
        &self,
        side: Side,
        limit_price: Decimal,
        qty: Decimal,
    ) -> Result<Option<Order>, BrokerageError> {
        BrokerageClient::place_order(self, side, limit_price, qty).await
    }
}
