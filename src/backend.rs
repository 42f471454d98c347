//! Seam between the client caches and the authoritative backend.
//!
//! Everything that talks to the PHP/MySQL service goes through
//! [`OrderBackend`]. The production implementation is
//! [`crate::api::HttpBackend`]; tests use an in-memory fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PosResult;

/// One line of an order creation request, in backend column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderItem {
    pub product_id: Option<i64>,
    pub product_name: String,
    pub quantity: u32,
    pub size: String,
    pub special: String,
    pub notes: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<CreateOrderItem>,
    pub customer_name: String,
    pub customer_username: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub customer_notes: String,
    pub branch: String,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
    pub payment_method: String,
    pub order_type: String,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub order_db_id: i64,
}

/// Filter parameters accepted by the order listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_username: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl OrderFilter {
    pub fn for_branch(branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            ..Self::default()
        }
    }

    /// Query-string pairs for the listing request.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(branch) = &self.branch {
            pairs.push(("branch", branch.clone()));
        }
        if let Some(user_id) = self.user_id {
            pairs.push(("user_id", user_id.to_string()));
        }
        if let Some(email) = &self.customer_email {
            pairs.push(("customer_email", email.clone()));
        }
        if let Some(username) = &self.customer_username {
            pairs.push(("customer_username", username.clone()));
        }
        if let Some(date) = &self.date {
            pairs.push(("date", date.clone()));
        }
        pairs
    }
}

/// `id` is either the numeric backend row id or the `ORD-...` string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdateRequest {
    pub id: Value,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductWrite {
    pub action: ProductAction,
    pub product: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialTarget {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "cashier_fairview")]
    CashierFairview,
    #[serde(rename = "cashier_sjdm")]
    CashierSjdm,
}

impl CredentialTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialTarget::Admin => "admin",
            CredentialTarget::CashierFairview => "cashier_fairview",
            CredentialTarget::CashierSjdm => "cashier_sjdm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialUpdate {
    pub target: CredentialTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[async_trait]
pub trait OrderBackend: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest) -> PosResult<CreateOrderResponse>;

    /// Raw order rows; mapping to [`crate::order::Order`] happens at the
    /// caller.
    async fn list_orders(&self, filter: &OrderFilter) -> PosResult<Vec<Value>>;

    async fn update_status(&self, request: &StatusUpdateRequest) -> PosResult<()>;

    async fn list_products(&self) -> PosResult<Vec<Value>>;

    async fn save_product(&self, write: &ProductWrite) -> PosResult<()>;

    async fn update_credentials(&self, update: &CredentialUpdate) -> PosResult<()>;
}
