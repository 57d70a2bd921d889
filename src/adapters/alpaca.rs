//! Alpaca REST adapter (trading + market data), native Rust over `reqwest`.
//!
//! Broker payloads are normalized into the crate's domain types so the
//! engine never sees wire shapes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use crate::config::BrokerConfig;
use crate::domain::{AccountSnapshot, BrokerPosition, DailyBar, OpenOrder, OrderIntent, OrderSide};
use crate::error::{Result, SwitcherError};
use crate::exchange::{BrokerGateway, MarketDataSource};

const BARS_PAGE_LIMIT: u32 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct ClockResponse {
    pub timestamp: DateTime<Utc>,
    pub is_open: bool,
    #[serde(default)]
    pub next_open: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_close: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct AccountResponse {
    cash: Decimal,
    buying_power: Decimal,
    #[serde(default)]
    equity: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
struct PositionResponse {
    symbol: String,
    qty: Decimal,
    avg_entry_price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct OrderResponse {
    id: String,
    symbol: String,
    side: String,
    #[serde(default)]
    qty: Option<Decimal>,
    #[serde(default)]
    client_order_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BarResponse {
    t: DateTime<Utc>,
    c: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<Vec<BarResponse>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LatestBarResponse {
    bar: BarResponse,
}

#[derive(Clone)]
pub struct AlpacaClient {
    http: Client,
    trading_url: String,
    data_url: String,
    data_feed: String,
    api_key: Option<String>,
    api_secret: Option<Zeroizing<String>>,
    dry_run: bool,
}

impl AlpacaClient {
    pub fn new(
        trading_url: &str,
        data_url: &str,
        data_feed: &str,
        api_key: Option<String>,
        api_secret: Option<String>,
        request_timeout: Duration,
        dry_run: bool,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("regime-switcher/0.1")
            .timeout(request_timeout)
            .build()
            .map_err(|e| SwitcherError::Internal(format!("failed to build HTTP client: {}", e)))?;

        info!(
            "Created Alpaca client (trading={}, feed={}, dry_run={})",
            trading_url, data_feed, dry_run
        );

        Ok(Self {
            http,
            trading_url: trading_url.trim_end_matches('/').to_string(),
            data_url: data_url.trim_end_matches('/').to_string(),
            data_feed: data_feed.to_string(),
            api_key,
            api_secret: api_secret.map(Zeroizing::new),
            dry_run,
        })
    }

    /// Build from config, falling back to the standard Alpaca env vars for credentials
    pub fn from_config(config: &BrokerConfig, dry_run: bool) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("APCA_API_KEY_ID").ok());
        let api_secret = config
            .api_secret
            .clone()
            .or_else(|| std::env::var("APCA_API_SECRET_KEY").ok());

        Self::new(
            &config.trading_url,
            &config.data_url,
            &config.data_feed,
            api_key,
            api_secret,
            Duration::from_millis(config.request_timeout_ms),
            dry_run,
        )
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let key = self.api_key.as_ref().ok_or_else(|| {
            SwitcherError::Auth("APCA_API_KEY_ID (or broker.api_key) is required".to_string())
        })?;
        let secret = self.api_secret.as_ref().ok_or_else(|| {
            SwitcherError::Auth("APCA_API_SECRET_KEY (or broker.api_secret) is required".to_string())
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("apca-api-key-id"),
            HeaderValue::from_str(key)
                .map_err(|e| SwitcherError::Auth(format!("invalid API key header: {}", e)))?,
        );
        let mut secret_value = HeaderValue::from_str(secret.as_str())
            .map_err(|e| SwitcherError::Auth(format!("invalid API secret header: {}", e)))?;
        secret_value.set_sensitive(true);
        headers.insert(HeaderName::from_static("apca-api-secret-key"), secret_value);

        Ok(headers)
    }

    async fn request_json(
        &self,
        method: Method,
        url: String,
        query: Option<&[(&str, String)]>,
        body: Option<Value>,
    ) -> Result<Value> {
        let mut req = self
            .http
            .request(method.clone(), &url)
            .headers(self.auth_headers()?);

        if let Some(query) = query {
            req = req.query(query);
        }

        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SwitcherError::RateLimited(format!(
                "Alpaca API rate limited for {} {}",
                method, url
            )));
        }

        if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::FORBIDDEN {
            return Err(SwitcherError::OrderRejected(format!(
                "{} {} rejected: status={} body={}",
                method, url, status, text
            )));
        }

        if !status.is_success() {
            return Err(SwitcherError::Broker(format!(
                "{} {} failed: status={} body={}",
                method, url, status, text
            )));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text)
            .map_err(|e| SwitcherError::Broker(format!("invalid Alpaca JSON response: {}", e)))
    }

    fn trading(&self, path: &str) -> String {
        format!("{}{}", self.trading_url, path)
    }

    fn data(&self, path: &str) -> String {
        format!("{}{}", self.data_url, path)
    }

    fn map_order(order: OrderResponse) -> Result<OpenOrder> {
        let side = OrderSide::try_from(order.side.as_str()).map_err(SwitcherError::Broker)?;
        Ok(OpenOrder {
            order_id: order.id,
            symbol: order.symbol,
            side,
            quantity: order.qty,
            client_order_id: order.client_order_id,
        })
    }

    fn map_bars(page: BarsPage) -> Vec<DailyBar> {
        page.bars
            .unwrap_or_default()
            .into_iter()
            .map(|bar| DailyBar {
                date: bar.t.date_naive(),
                close: bar.c,
            })
            .collect()
    }

    // ==================== Trading Methods ====================

    #[instrument(skip(self))]
    pub async fn get_clock(&self) -> Result<ClockResponse> {
        let value = self
            .request_json(Method::GET, self.trading("/v2/clock"), None, None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    pub async fn get_account(&self) -> Result<AccountSnapshot> {
        let value = self
            .request_json(Method::GET, self.trading("/v2/account"), None, None)
            .await?;
        let account: AccountResponse = serde_json::from_value(value)?;
        Ok(AccountSnapshot {
            cash: account.cash,
            buying_power: account.buying_power,
            equity: account.equity,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        let value = self
            .request_json(Method::GET, self.trading("/v2/positions"), None, None)
            .await?;
        let positions: Vec<PositionResponse> = serde_json::from_value(value)?;
        debug!("Fetched {} broker positions", positions.len());

        Ok(positions
            .into_iter()
            .map(|p| BrokerPosition {
                symbol: p.symbol,
                quantity: p.qty,
                avg_entry_price: p.avg_entry_price,
            })
            .collect())
    }

    /// Open orders, optionally restricted to one symbol
    #[instrument(skip(self))]
    pub async fn list_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>> {
        let mut params = vec![
            ("status", "open".to_string()),
            ("nested", "false".to_string()),
            ("limit", "500".to_string()),
        ];
        if let Some(symbol) = symbol {
            params.push(("symbols", symbol.to_string()));
        }

        let value = self
            .request_json(Method::GET, self.trading("/v2/orders"), Some(&params), None)
            .await?;
        let orders: Vec<OrderResponse> = serde_json::from_value(value)?;
        orders.into_iter().map(Self::map_order).collect()
    }

    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        if self.dry_run {
            info!("DRY RUN: Would cancel order {}", order_id);
            return Ok(());
        }

        self.request_json(
            Method::DELETE,
            self.trading(&format!("/v2/orders/{}", order_id)),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn cancel_all_orders(&self) -> Result<usize> {
        if self.dry_run {
            let open = self.list_open_orders(None).await?;
            info!("DRY RUN: Would cancel {} open orders", open.len());
            return Ok(open.len());
        }

        let value = self
            .request_json(Method::DELETE, self.trading("/v2/orders"), None, None)
            .await?;
        Ok(value.as_array().map(Vec::len).unwrap_or(0))
    }

    /// Submit a day market order
    #[instrument(skip(self), fields(client_order_id = %intent.correlation_id))]
    pub async fn submit_market_order(&self, intent: &OrderIntent) -> Result<String> {
        if self.dry_run {
            info!(
                "DRY RUN: Would submit market {} for {} shares of {}",
                intent.side, intent.quantity, intent.symbol
            );
            return Ok(intent.correlation_id.clone());
        }

        let body = json!({
            "symbol": intent.symbol,
            "qty": intent.quantity.to_string(),
            "side": intent.side.as_str(),
            "type": "market",
            "time_in_force": "day",
            "client_order_id": intent.correlation_id,
        });

        let value = self
            .request_json(Method::POST, self.trading("/v2/orders"), None, Some(body))
            .await
            .map_err(|e| match e {
                SwitcherError::OrderRejected(_) | SwitcherError::RateLimited(_) => e,
                other => SwitcherError::OrderSubmission(other.to_string()),
            })?;

        value
            .get("id")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| SwitcherError::OrderSubmission("response missing order id".to_string()))
    }

    // ==================== Market Data Methods ====================

    #[instrument(skip(self))]
    pub async fn get_latest_close(&self, symbol: &str) -> Result<Decimal> {
        let params = vec![("feed", self.data_feed.clone())];
        let value = self
            .request_json(
                Method::GET,
                self.data(&format!("/v2/stocks/{}/bars/latest", symbol)),
                Some(&params),
                None,
            )
            .await?;

        let latest: LatestBarResponse = serde_json::from_value(value).map_err(|_| {
            SwitcherError::MarketDataUnavailable(format!("no latest bar for {}", symbol))
        })?;

        Decimal::try_from(latest.bar.c).map_err(|e| {
            SwitcherError::InvalidMarketData(format!("bad close {} for {}: {}", latest.bar.c, symbol, e))
        })
    }

    /// Daily bars across all pages
    #[instrument(skip(self))]
    pub async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("timeframe", "1Day".to_string()),
                ("start", start.format("%Y-%m-%d").to_string()),
                ("end", end.format("%Y-%m-%d").to_string()),
                ("adjustment", "all".to_string()),
                ("feed", self.data_feed.clone()),
                ("limit", BARS_PAGE_LIMIT.to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("page_token", token.clone()));
            }

            let value = self
                .request_json(
                    Method::GET,
                    self.data(&format!("/v2/stocks/{}/bars", symbol)),
                    Some(&params),
                    None,
                )
                .await?;
            let page: BarsPage = serde_json::from_value(value)?;
            page_token = page.next_page_token.clone().filter(|t| !t.is_empty());
            bars.extend(Self::map_bars(page));

            if page_token.is_none() {
                break;
            }
        }

        debug!("Fetched {} daily bars for {} ({} to {})", bars.len(), symbol, start, end);
        Ok(bars)
    }
}

#[async_trait]
impl BrokerGateway for AlpacaClient {
    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn is_market_open(&self) -> Result<bool> {
        Ok(self.get_clock().await?.is_open)
    }

    async fn get_account(&self) -> Result<AccountSnapshot> {
        AlpacaClient::get_account(self).await
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        AlpacaClient::get_positions(self).await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        self.list_open_orders(Some(symbol)).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        AlpacaClient::cancel_order(self, order_id).await
    }

    async fn submit_market_order(&self, intent: &OrderIntent) -> Result<String> {
        AlpacaClient::submit_market_order(self, intent).await
    }

    async fn get_latest_price(&self, symbol: &str) -> Result<Decimal> {
        self.get_latest_close(symbol).await
    }
}

#[async_trait]
impl MarketDataSource for AlpacaClient {
    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        self.fetch_daily_bars(symbol, start, end).await
    }
}
