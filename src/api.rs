//! HTTP client for the PHP order backend.
//!
//! [`HttpBackend`] implements [`OrderBackend`] over reqwest. The PHP
//! endpoints answer with loosely shaped JSON: success flags may be booleans
//! or strings, ids may be numbers or numeric strings, and lists may come
//! bare or wrapped. All of that is normalised here so callers only see
//! typed results.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::backend::{
    CreateOrderRequest, CreateOrderResponse, CredentialUpdate, OrderBackend, OrderFilter,
    ProductWrite, StatusUpdateRequest,
};
use crate::error::{PosError, PosResult};
use crate::{value_bool, value_i64, value_str};

const PATH_CREATE_ORDER: &str = "/api/create_order.php";
const PATH_GET_ORDERS: &str = "/api/get_orders.php";
const PATH_UPDATE_STATUS: &str = "/api/update_order_status.php";
const PATH_GET_PRODUCTS: &str = "/api/get_products.php";
const PATH_ADMIN_PRODUCTS: &str = "/api/admin_products.php";
const PATH_UPDATE_CREDENTIALS: &str = "/api/update_credentials.php";

const API_KEY_HEADER: &str = "X-Api-Key";

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach order backend at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid order backend URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        400 => "Order backend rejected the request".to_string(),
        401 => "API key is invalid or expired".to_string(),
        403 => "Not authorized for this operation".to_string(),
        404 => "Order backend endpoint not found".to_string(),
        s if s >= 500 => "Order backend server error".to_string(),
        _ => "Unexpected response from order backend".to_string(),
    }
}

/// Error message carried in a PHP response body, if any.
fn body_message(body: &Value) -> Option<String> {
    value_str(body, &["error", "message", "msg"])
}

/// Build the message for a non-2xx response, keeping backend detail.
fn http_failure_detail(status: StatusCode, body_text: &str) -> String {
    let trimmed = body_text.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => {
            let message = body_message(&json).unwrap_or_else(|| status_error(status));
            format!("{message} (HTTP {})", status.as_u16())
        }
        Err(_) if !trimmed.is_empty() => {
            format!("{} (HTTP {}): {trimmed}", status_error(status), status.as_u16())
        }
        Err(_) => format!("{} (HTTP {})", status_error(status), status.as_u16()),
    }
}

// ---------------------------------------------------------------------------
// Payload normalisation
// ---------------------------------------------------------------------------

/// A 2xx body that still reports failure, e.g. `{"success": false}`.
fn reported_failure(body: &Value) -> Option<String> {
    match value_bool(body, &["success", "ok"]) {
        Some(false) => Some(body_message(body).unwrap_or_else(|| "request failed".to_string())),
        _ => None,
    }
}

/// Unwrap a listing payload: a bare array, or an array under `orders`,
/// `products` or `data`.
pub(crate) fn unwrap_list(body: Value, what: &str) -> PosResult<Vec<Value>> {
    if let Some(message) = reported_failure(&body) {
        return Err(PosError::Remote(message));
    }
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut map) => {
            for key in ["orders", "products", "data"] {
                if let Some(Value::Array(rows)) = map.remove(key) {
                    return Ok(rows);
                }
            }
            Err(PosError::MalformedPayload(format!(
                "{what}: expected an array or a wrapped array"
            )))
        }
        Value::Null => Ok(Vec::new()),
        _ => Err(PosError::MalformedPayload(format!(
            "{what}: expected an array or a wrapped array"
        ))),
    }
}

/// Pull `{ order_id, order_db_id }` out of a creation response. The ids may
/// sit at the top level or under `data`/`order`.
pub(crate) fn parse_create_response(body: &Value) -> PosResult<CreateOrderResponse> {
    if let Some(message) = reported_failure(body) {
        return Err(PosError::CheckoutRejected(message));
    }

    let scopes = [Some(body), body.get("data"), body.get("order")];
    let mut order_id = None;
    let mut order_db_id = None;
    for scope in scopes.into_iter().flatten() {
        if order_id.is_none() {
            order_id = value_str(scope, &["order_id", "order_number", "orderId"]);
        }
        if order_db_id.is_none() {
            order_db_id = value_i64(scope, &["order_db_id", "db_id", "id"]).filter(|id| *id > 0);
        }
    }

    match (order_id, order_db_id) {
        (Some(order_id), Some(order_db_id)) => Ok(CreateOrderResponse {
            order_id,
            order_db_id,
        }),
        (None, Some(order_db_id)) => Ok(CreateOrderResponse {
            order_id: format!("ORD-{order_db_id:03}"),
            order_db_id,
        }),
        _ => Err(PosError::MalformedPayload(
            "create_order: response carries no order id".to_string(),
        )),
    }
}

/// Accept any 2xx write response that does not report failure.
fn check_write(body: &Value) -> PosResult<()> {
    match reported_failure(body) {
        Some(message) => Err(PosError::Remote(message)),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    /// `base_url` should already be normalised (no trailing `/` or `/api`).
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> PosResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PosError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn endpoint(&self, path: &str, query: &[(&'static str, String)]) -> PosResult<Url> {
        let full = format!("{}{path}", self.base_url);
        let mut url = Url::parse(&full)
            .map_err(|e| PosError::Config(format!("Invalid order backend URL {full}: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Perform one request and return the decoded JSON body (`Null` for an
    /// empty body). A request that never got an answer is `Unreachable`;
    /// any answer the backend did give but we cannot use is `Remote`.
    async fn fetch_json(&self, method: Method, url: Url, body: Option<Value>) -> PosResult<Value> {
        let started = Instant::now();
        let path = url.path().to_string();

        let mut req = self
            .client
            .request(method.clone(), url)
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PosError::Unreachable(friendly_error(&self.base_url, &e)))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        debug!(
            %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "backend request finished"
        );

        if !status.is_success() {
            return Err(PosError::Remote(http_failure_detail(status, &body_text)));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| PosError::Remote(format!("Invalid JSON from order backend: {e}")))
    }

    async fn get(&self, path: &str, query: &[(&'static str, String)]) -> PosResult<Value> {
        let url = self.endpoint(path, query)?;
        self.fetch_json(Method::GET, url, None).await
    }

    async fn post(&self, path: &str, body: Value) -> PosResult<Value> {
        let url = self.endpoint(path, &[])?;
        self.fetch_json(Method::POST, url, Some(body)).await
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> PosResult<Value> {
    serde_json::to_value(value).map_err(|e| PosError::Storage(format!("encode request: {e}")))
}

#[async_trait]
impl OrderBackend for HttpBackend {
    async fn create_order(&self, request: &CreateOrderRequest) -> PosResult<CreateOrderResponse> {
        let body = to_body(request)?;
        let response = match self.post(PATH_CREATE_ORDER, body).await {
            Ok(response) => response,
            // Unreachable passes through so walk-in sales can fall back to
            // the local cache; an answer from the backend is a rejection.
            Err(PosError::Remote(message)) => return Err(PosError::CheckoutRejected(message)),
            Err(e) => return Err(e),
        };
        let created = parse_create_response(&response)?;
        info!(
            order_id = %created.order_id,
            order_db_id = created.order_db_id,
            branch = %request.branch,
            "Order created on backend"
        );
        Ok(created)
    }

    async fn list_orders(&self, filter: &OrderFilter) -> PosResult<Vec<Value>> {
        let body = self.get(PATH_GET_ORDERS, &filter.query_pairs()).await?;
        unwrap_list(body, "get_orders")
    }

    async fn update_status(&self, request: &StatusUpdateRequest) -> PosResult<()> {
        let body = self.post(PATH_UPDATE_STATUS, to_body(request)?).await?;
        check_write(&body)
    }

    async fn list_products(&self) -> PosResult<Vec<Value>> {
        let body = self.get(PATH_GET_PRODUCTS, &[]).await?;
        unwrap_list(body, "get_products")
    }

    async fn save_product(&self, write: &ProductWrite) -> PosResult<()> {
        let body = self.post(PATH_ADMIN_PRODUCTS, to_body(write)?).await?;
        check_write(&body)
    }

    async fn update_credentials(&self, update: &CredentialUpdate) -> PosResult<()> {
        let body = self.post(PATH_UPDATE_CREDENTIALS, to_body(update)?).await?;
        if let Err(e) = check_write(&body) {
            warn!(target_account = update.target.as_str(), error = %e, "Credential update refused");
            return Err(e);
        }
        Ok(())
    }
}
