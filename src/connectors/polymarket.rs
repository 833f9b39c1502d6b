//! REST venue adapter for Polymarket.
//!
//! Provides access to:
//! - Gamma API: market metadata and outcome tokens
//! - Data API: positions per wallet
//! - CLOB API: open orders, order placement and cancellation (L2-signed)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::VenueError;
use crate::events::{Market, Order, OrderRequest, OrderStatus, Outcome, Position, Side};
use crate::venue::VenueAdapter;

use super::auth::ApiCredentials;

/// Default API endpoints.
pub const DEFAULT_CLOB_URL: &str = "https://clob.polymarket.com";
pub const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";
pub const DEFAULT_DATA_URL: &str = "https://data-api.polymarket.com";

/// Wait assumed when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Builds and signs the venue order payload for a request.
///
/// Order signing needs a wallet key and the venue's typed-data scheme, which
/// live outside this crate. The returned value is sent as the `order` field
/// of the `POST /order` body.
pub trait OrderSigner: Send + Sync {
    fn sign_order(&self, request: &OrderRequest) -> Result<serde_json::Value, VenueError>;
}

/// Base URLs of the three Polymarket REST services.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub clob: String,
    pub gamma: String,
    pub data: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            clob: DEFAULT_CLOB_URL.to_string(),
            gamma: DEFAULT_GAMMA_URL.to_string(),
            data: DEFAULT_DATA_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Overlays `POLYMARKET_CLOB_URL`, `POLYMARKET_GAMMA_URL` and
    /// `POLYMARKET_DATA_URL` on the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            clob: std::env::var("POLYMARKET_CLOB_URL").unwrap_or(defaults.clob),
            gamma: std::env::var("POLYMARKET_GAMMA_URL").unwrap_or(defaults.gamma),
            data: std::env::var("POLYMARKET_DATA_URL").unwrap_or(defaults.data),
        }
    }
}

/// Polymarket API client for REST operations.
#[derive(Clone)]
pub struct PolymarketApiClient {
    client: Client,
    endpoints: Endpoints,
    credentials: Option<ApiCredentials>,
    signer: Option<Arc<dyn OrderSigner>>,
}

impl PolymarketApiClient {
    /// Creates a new API client with default endpoints.
    pub fn new(credentials: Option<ApiCredentials>) -> Result<Self, VenueError> {
        Self::with_endpoints(credentials, Endpoints::default())
    }

    /// Creates a new API client with custom endpoints.
    pub fn with_endpoints(
        credentials: Option<ApiCredentials>,
        endpoints: Endpoints,
    ) -> Result<Self, VenueError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VenueError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints,
            credentials,
            signer: None,
        })
    }

    /// Enables order creation.
    pub fn with_signer(mut self, signer: Arc<dyn OrderSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn credentials(&self) -> Result<&ApiCredentials, VenueError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| VenueError::Authentication("API credentials not configured".to_string()))
    }

    /// Builds an L2-signed CLOB request. `path` excludes the query string.
    fn signed(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<RequestBuilder, VenueError> {
        let creds = self.credentials()?;
        let headers = creds.auth_headers(method.as_str(), path, body.as_deref().unwrap_or(""))?;

        let mut request = self
            .client
            .request(method, format!("{}{}", self.endpoints.clob, path));
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }
        Ok(request)
    }

    async fn fetch_open_orders_page(
        &self,
        market_id: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<OrdersPage, VenueError> {
        let mut request = self.signed(Method::GET, "/data/orders", None)?;
        if let Some(market) = market_id {
            request = request.query(&[("market", market)]);
        }
        if let Some(cursor) = cursor {
            request = request.query(&[("next_cursor", cursor)]);
        }

        let response = check_status(request.send().await?, "open orders", false).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl VenueAdapter for PolymarketApiClient {
    fn name(&self) -> &str {
        "polymarket"
    }

    async fn fetch_market(&self, market_id: &str) -> Result<Market, VenueError> {
        debug!("[{}] Fetching market...", market_id);

        let url = format!("{}/markets/{}", self.endpoints.gamma, market_id);
        let response = check_status(self.client.get(&url).send().await?, "market", false).await?;
        let market: GammaMarket = response.json().await?;
        let market = market.into_market()?;

        info!(
            "[{}] Market: {} ({} outcomes, active: {})",
            market.id,
            market.question.chars().take(60).collect::<String>(),
            market.outcomes.len(),
            market.is_tradable()
        );
        Ok(market)
    }

    async fn fetch_positions(&self, market_id: Option<&str>) -> Result<Vec<Position>, VenueError> {
        let creds = self.credentials()?;
        let url = format!("{}/positions", self.endpoints.data);

        let mut request = self.client.get(&url).query(&[("user", creds.address.as_str())]);
        if let Some(market) = market_id {
            request = request.query(&[("market", market)]);
        }

        let response = check_status(request.send().await?, "positions", false).await?;
        let positions: Vec<DataPosition> = response.json().await?;
        Ok(positions.into_iter().map(DataPosition::into_position).collect())
    }

    async fn fetch_open_orders(&self, market_id: Option<&str>) -> Result<Vec<Order>, VenueError> {
        let mut orders = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .fetch_open_orders_page(market_id, cursor.as_deref())
                .await?;
            let (items, next) = page.into_parts();
            for item in items {
                match item.into_order() {
                    Some(order) => orders.push(order),
                    None => debug!("Skipping malformed open order record"),
                }
            }

            match next {
                Some(next) if !next.is_empty() && next != END_CURSOR => cursor = Some(next),
                _ => break,
            }
        }

        Ok(orders)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order, VenueError> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            VenueError::Authentication("No order signer configured".to_string())
        })?;
        let creds = self.credentials()?;

        let body = PostOrderBody {
            order: signer.sign_order(request)?,
            owner: &creds.api_key,
            order_type: "GTC",
        };
        let body = serde_json::to_string(&body)
            .map_err(|e| VenueError::InvalidOrder(format!("Failed to encode order: {}", e)))?;

        let response = self.signed(Method::POST, "/order", Some(body))?.send().await?;
        let response = check_status(response, "create order", true).await?;
        let placed: PostOrderResponse = response.json().await?;

        if !placed.success || placed.order_id.is_empty() {
            let reason = placed
                .error_msg
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "order not accepted".to_string());
            warn!("[{}] Order rejected: {}", request.asset_id, reason);
            return Err(VenueError::InvalidOrder(reason));
        }

        info!(
            "[{}] Order placed: {} {} @ {} (id: {})",
            request.asset_id, request.side, request.size, request.price, placed.order_id
        );

        Ok(Order {
            id: placed.order_id,
            market_id: request.market_id.clone(),
            asset_id: request.asset_id.clone(),
            outcome: request.outcome.clone(),
            side: request.side,
            price: request.price,
            size: request.size,
            filled: 0.0,
            status: placed
                .status
                .as_deref()
                .map(parse_order_status)
                .unwrap_or(OrderStatus::Open),
            created_at: Utc::now(),
        })
    }

    async fn cancel_order(&self, order_id: &str, _market_id: Option<&str>) -> Result<(), VenueError> {
        let body = serde_json::json!({ "orderID": order_id }).to_string();
        let response = self.signed(Method::DELETE, "/order", Some(body))?.send().await?;
        let response = check_status(response, "cancel order", true).await?;
        let result: CancelResponse = response.json().await?;

        if result.canceled.iter().any(|id| id == order_id) {
            debug!("Order {} cancelled", order_id);
            return Ok(());
        }

        let reason = result
            .not_canceled
            .get(order_id)
            .cloned()
            .unwrap_or_else(|| "not cancelled".to_string());
        Err(VenueError::NotFound(format!("order {}: {}", order_id, reason)))
    }
}

// ============ Status Mapping ============

/// Passes successful responses through and classifies the rest.
async fn check_status(
    response: Response,
    context: &str,
    order_endpoint: bool,
) -> Result<Response, VenueError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();

    let err = classify_status(status, retry_after, &body, order_endpoint);
    debug!("{} failed: {} ({})", context, status, err);
    Err(err)
}

/// Maps a non-success HTTP status to the error taxonomy.
fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    order_endpoint: bool,
) -> VenueError {
    let message = format!("{} {}", status.as_u16(), body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VenueError::Authentication(message),
        StatusCode::NOT_FOUND => VenueError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => VenueError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        },
        StatusCode::BAD_REQUEST if order_endpoint => VenueError::InvalidOrder(message),
        s if s.is_server_error() => VenueError::Network(message),
        _ => VenueError::Venue(message),
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values fall back to the default.
fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0 && *s < 86_400.0)
        .map(Duration::from_secs_f64)
}

fn parse_order_status(raw: &str) -> OrderStatus {
    match raw.to_ascii_uppercase().as_str() {
        "LIVE" | "OPEN" | "DELAYED" | "UNMATCHED" => OrderStatus::Open,
        "MATCHED" | "FILLED" => OrderStatus::Filled,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "CANCELED" | "CANCELLED" => OrderStatus::Cancelled,
        _ => OrderStatus::Rejected,
    }
}

// ============ Response Types ============

/// Cursor value the CLOB uses to mark the last page.
const END_CURSOR: &str = "LTE=";

/// Market data from the Gamma API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    id: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    condition_id: String,
    #[serde(default)]
    clob_token_ids: Option<String>,
    #[serde(default)]
    outcomes: Option<String>,
    #[serde(default)]
    outcome_prices: Option<String>,
    active: Option<bool>,
    closed: Option<bool>,
    end_date: Option<String>,
}

impl GammaMarket {
    fn into_market(self) -> Result<Market, VenueError> {
        let token_ids = parse_string_list(self.clob_token_ids.as_deref().unwrap_or_default());
        if token_ids.is_empty() {
            return Err(VenueError::Venue(format!(
                "Market {} has no outcome tokens",
                self.id
            )));
        }

        let names = parse_string_list(self.outcomes.as_deref().unwrap_or_default());
        let prices = parse_string_list(self.outcome_prices.as_deref().unwrap_or_default());

        let outcomes = token_ids
            .into_iter()
            .enumerate()
            .map(|(i, token_id)| Outcome {
                name: names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("Outcome {}", i)),
                token_id,
                price: prices.get(i).and_then(|p| p.parse::<f64>().ok()),
            })
            .collect();

        Ok(Market {
            id: self.id,
            condition_id: self.condition_id,
            question: self.question,
            outcomes,
            active: self.active.unwrap_or(false),
            closed: self.closed.unwrap_or(false),
            end_date: self
                .end_date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&Utc)),
        })
    }
}

/// Position record from the Data API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataPosition {
    #[serde(default)]
    condition_id: String,
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    size: f64,
    #[serde(default)]
    avg_price: f64,
    #[serde(default)]
    cur_price: f64,
}

impl DataPosition {
    fn into_position(self) -> Position {
        Position {
            market_id: self.condition_id,
            outcome: self.outcome,
            size: self.size,
            average_price: self.avg_price,
            current_price: self.cur_price,
        }
    }
}

/// `/data/orders` answers with either a bare list or a cursor page.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OrdersPage {
    Paged {
        data: Vec<ClobOrder>,
        #[serde(default)]
        next_cursor: Option<String>,
    },
    List(Vec<ClobOrder>),
}

impl OrdersPage {
    fn into_parts(self) -> (Vec<ClobOrder>, Option<String>) {
        match self {
            OrdersPage::Paged { data, next_cursor } => (data, next_cursor),
            OrdersPage::List(data) => (data, None),
        }
    }
}

/// Open order record from the CLOB.
#[derive(Debug, Clone, Deserialize)]
struct ClobOrder {
    id: String,
    #[serde(default)]
    market: String,
    #[serde(default)]
    asset_id: String,
    #[serde(default)]
    outcome: String,
    side: String,
    price: String,
    original_size: String,
    #[serde(default)]
    size_matched: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
}

impl ClobOrder {
    fn into_order(self) -> Option<Order> {
        let filled = self
            .size_matched
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let mut status = self
            .status
            .as_deref()
            .map(parse_order_status)
            .unwrap_or(OrderStatus::Open);
        if status == OrderStatus::Open && filled > 0.0 {
            status = OrderStatus::PartiallyFilled;
        }

        Some(Order {
            side: Side::parse(&self.side)?,
            price: self.price.parse().ok()?,
            size: self.original_size.parse().ok()?,
            id: self.id,
            market_id: self.market,
            asset_id: self.asset_id,
            outcome: self.outcome,
            filled,
            status,
            created_at: self
                .created_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Serialize)]
struct PostOrderBody<'a> {
    order: serde_json::Value,
    owner: &'a str,
    #[serde(rename = "orderType")]
    order_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(default, rename = "orderID")]
    order_id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    canceled: Vec<String>,
    #[serde(default)]
    not_canceled: HashMap<String, String>,
}

// ============ Helper Functions ============

/// Gamma encodes lists as JSON inside a string (`"[\"Yes\", \"No\"]"`).
/// Falls back to comma splitting for the bare form.
fn parse_string_list(raw: &str) -> Vec<String> {
    if let Ok(items) = serde_json::from_str::<Vec<String>>(raw) {
        return items;
    }

    raw.trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl std::fmt::Debug for PolymarketApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymarketApiClient")
            .field("endpoints", &self.endpoints)
            .field("has_credentials", &self.credentials.is_some())
            .field("has_signer", &self.signer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_list() {
        assert_eq!(parse_string_list("[\"123\", \"456\"]"), vec!["123", "456"]);
        assert_eq!(parse_string_list("123,456"), vec!["123", "456"]);
        assert!(parse_string_list("").is_empty());
    }

    #[test]
    fn test_status_mapping() {
        let map = |code: u16, order: bool| {
            classify_status(StatusCode::from_u16(code).unwrap(), None, "boom", order)
        };

        assert!(matches!(map(401, false), VenueError::Authentication(_)));
        assert!(matches!(map(403, true), VenueError::Authentication(_)));
        assert!(matches!(map(404, false), VenueError::NotFound(_)));
        assert!(matches!(map(400, true), VenueError::InvalidOrder(_)));
        assert!(matches!(map(400, false), VenueError::Venue(_)));
        assert!(matches!(map(502, false), VenueError::Network(_)));
        assert!(map(503, true).is_retryable());

        match map(429, false) {
            VenueError::RateLimited { retry_after } => assert_eq!(retry_after, DEFAULT_RETRY_AFTER),
            other => panic!("unexpected: {:?}", other),
        }
        let hinted = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            parse_retry_after("2"),
            "",
            false,
        );
        assert_eq!(hinted.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_gamma_market_normalization() {
        let raw = r#"{
            "id": "123", "question": "Will it rain?", "conditionId": "0xc",
            "clobTokenIds": "[\"111\", \"222\"]",
            "outcomes": "[\"Yes\", \"No\"]",
            "outcomePrices": "[\"0.35\", \"0.65\"]",
            "active": true, "closed": false,
            "endDate": "2026-01-01T00:00:00Z"
        }"#;
        let market = serde_json::from_str::<GammaMarket>(raw)
            .unwrap()
            .into_market()
            .unwrap();

        assert_eq!(market.token_ids(), vec!["111", "222"]);
        assert_eq!(market.outcome("no").unwrap().token_id, "222");
        assert_eq!(market.outcome("Yes").unwrap().price, Some(0.35));
        assert!(market.is_tradable());
        assert!(market.end_date.is_some());
    }

    #[test]
    fn test_market_without_tokens_is_rejected() {
        let raw = r#"{"id": "9", "question": "q", "conditionId": "0x"}"#;
        let market = serde_json::from_str::<GammaMarket>(raw).unwrap();
        assert!(matches!(market.into_market(), Err(VenueError::Venue(_))));
    }

    #[test]
    fn test_open_orders_accept_both_shapes() {
        let record = r#"{"id":"o1","market":"0xc","asset_id":"111","outcome":"Yes","side":"BUY",
            "price":"0.45","original_size":"10","size_matched":"4","status":"LIVE","created_at":1700000000}"#;

        let paged: OrdersPage =
            serde_json::from_str(&format!(r#"{{"data":[{}],"next_cursor":"LTE="}}"#, record)).unwrap();
        let (items, cursor) = paged.into_parts();
        assert_eq!(cursor.as_deref(), Some(END_CURSOR));

        let order = items.into_iter().next().unwrap().into_order().unwrap();
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.remaining(), 6.0);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);

        let list: OrdersPage = serde_json::from_str(&format!("[{}]", record)).unwrap();
        assert_eq!(list.into_parts().0.len(), 1);
    }

    #[test]
    fn test_order_status_parsing() {
        assert_eq!(parse_order_status("live"), OrderStatus::Open);
        assert_eq!(parse_order_status("MATCHED"), OrderStatus::Filled);
        assert_eq!(parse_order_status("CANCELED"), OrderStatus::Cancelled);
        assert_eq!(parse_order_status("weird"), OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn test_create_order_requires_signer() {
        let creds = ApiCredentials::new("0xabc", "key", "c2VjcmV0", "pass");
        let client = PolymarketApiClient::new(Some(creds)).unwrap();
        let request = OrderRequest {
            market_id: "m".into(),
            asset_id: "111".into(),
            outcome: "Yes".into(),
            side: Side::Buy,
            price: 0.5,
            size: 1.0,
        };

        let result = client.create_order(&request).await;
        assert!(matches!(result, Err(VenueError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_private_calls_require_credentials() {
        let client = PolymarketApiClient::new(None).unwrap();
        assert!(matches!(
            client.fetch_positions(None).await,
            Err(VenueError::Authentication(_))
        ));
        assert!(matches!(
            client.cancel_order("o1", None).await,
            Err(VenueError::Authentication(_))
        ));
    }
}
