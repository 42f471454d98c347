//! Canonical order model.
//!
//! The backend speaks in flat PHP rows (`product_name`, `quantity`, numeric
//! strings, several date formats). Inside the crate there is exactly one
//! [`Order`] shape; [`Order::from_remote`] and [`Order::to_remote`] are the
//! only places that know about the wire representation.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::{value_bool, value_f64, value_i64, value_str};

/// Placeholder for missing text fields coming from the backend.
pub const MISSING_TEXT: &str = "N/A";

// ---------------------------------------------------------------------------
// Status / type enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Pending,
    Approved,
    OutForDelivery,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::OutForDelivery,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Approved => "Approved",
            OrderStatus::OutForDelivery => "Out for Delivery",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Strict, case-insensitive parse. Accepts the snake_case and
    /// US-spelling variants the backend has used over time.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "pending" => Some(OrderStatus::Pending),
            "approved" => Some(OrderStatus::Approved),
            "out for delivery" => Some(OrderStatus::OutForDelivery),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_completed(self) -> bool {
        self == OrderStatus::Completed
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for OrderStatus {
    fn from(raw: String) -> Self {
        OrderStatus::parse(&raw).unwrap_or(OrderStatus::Pending)
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.label().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderType {
    Digital,
    WalkIn,
}

impl OrderType {
    pub fn label(self) -> &'static str {
        match self {
            OrderType::Digital => "Digital",
            OrderType::WalkIn => "Walk-in",
        }
    }

    /// Anything that is not recognisably a walk-in is a digital order.
    pub fn parse_lenient(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if normalized == "walkin" {
            OrderType::WalkIn
        } else {
            OrderType::Digital
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for OrderType {
    fn from(raw: String) -> Self {
        OrderType::parse_lenient(&raw)
    }
}

impl From<OrderType> for String {
    fn from(order_type: OrderType) -> Self {
        order_type.label().to_string()
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub name: String,
    pub qty: u32,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub special: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub price: f64,
}

impl OrderItem {
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.qty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Human-readable order number, e.g. `ORD-007`.
    pub id: String,
    /// Backend row id; the merge key once assigned.
    #[serde(rename = "order_db_id", default)]
    pub order_db_id: Option<i64>,
    pub customer_name: String,
    #[serde(default)]
    pub customer_email: String,
    #[serde(default)]
    pub customer_phone: String,
    #[serde(default)]
    pub customer_username: String,
    pub branch: String,
    pub items: Vec<OrderItem>,
    pub subtotal: f64,
    #[serde(default)]
    pub tax: f64,
    pub total: f64,
    pub status: OrderStatus,
    pub order_type: OrderType,
    #[serde(default)]
    pub is_guest: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw date string when the backend supplied one without a usable
    /// timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub customer_notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_for_delivery_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_note: Option<String>,
}

impl Order {
    /// True when `id` names this order either by its display id or by its
    /// backend row id.
    pub fn matches_id(&self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }
        if self.id.eq_ignore_ascii_case(id) {
            return true;
        }
        match (self.order_db_id, id.parse::<i64>()) {
            (Some(db_id), Ok(wanted)) => db_id == wanted,
            _ => false,
        }
    }

    /// Local calendar day the order was placed on.
    pub fn local_date(&self) -> Option<NaiveDate> {
        if let Some(ts) = self.timestamp {
            return Some(ts.with_timezone(&Local).date_naive());
        }
        self.date
            .as_deref()
            .and_then(parse_flexible_date_str)
            .map(|ts| ts.with_timezone(&Local).date_naive())
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.qty).sum()
    }

    /// Map a backend order row into the canonical shape. Returns `None` for
    /// anything that is not a JSON object.
    pub fn from_remote(row: &Value) -> Option<Order> {
        if !row.is_object() {
            return None;
        }

        let order_db_id = value_i64(row, &["order_db_id", "id", "db_id"]).filter(|id| *id > 0);
        let id = value_str(row, &["order_id", "order_number", "orderId"])
            .or_else(|| order_db_id.map(|db_id| format!("ORD-{db_id:03}")))
            .unwrap_or_else(|| MISSING_TEXT.to_string());

        let items = remote_items(row.get("items"));

        let date_value = ["created_at", "timestamp", "order_date", "date"]
            .iter()
            .find_map(|key| row.get(*key).filter(|v| !v.is_null()));
        let timestamp = date_value.and_then(parse_flexible_date);
        let date = if timestamp.is_none() {
            date_value.and_then(Value::as_str).map(str::to_string)
        } else {
            None
        };

        Some(Order {
            id,
            order_db_id,
            customer_name: value_str(row, &["customer_name", "customerName"])
                .unwrap_or_else(|| MISSING_TEXT.to_string()),
            customer_email: value_str(row, &["customer_email", "customerEmail"])
                .unwrap_or_else(|| MISSING_TEXT.to_string()),
            customer_phone: value_str(row, &["customer_phone", "customerPhone"])
                .unwrap_or_else(|| MISSING_TEXT.to_string()),
            customer_username: value_str(row, &["customer_username", "customerUsername"])
                .unwrap_or_default(),
            branch: value_str(row, &["branch", "branch_name"])
                .unwrap_or_else(|| MISSING_TEXT.to_string()),
            items,
            subtotal: value_f64(row, &["subtotal"]).unwrap_or(0.0),
            tax: value_f64(row, &["tax", "tax_amount"]).unwrap_or(0.0),
            total: value_f64(row, &["total", "total_amount"]).unwrap_or(0.0),
            status: value_str(row, &["status"])
                .and_then(|s| OrderStatus::parse(&s))
                .unwrap_or(OrderStatus::Pending),
            order_type: value_str(row, &["order_type", "orderType"])
                .map(|s| OrderType::parse_lenient(&s))
                .unwrap_or(OrderType::Digital),
            is_guest: value_bool(row, &["is_guest", "isGuest"]).unwrap_or(false),
            timestamp,
            date,
            payment_method: value_str(row, &["payment_method", "paymentMethod"])
                .unwrap_or_else(|| MISSING_TEXT.to_string()),
            customer_notes: value_str(row, &["customer_notes", "notes"]).unwrap_or_default(),
            approved_at: remote_date(row, "approved_at"),
            out_for_delivery_at: remote_date(row, "out_for_delivery_at"),
            completed_at: remote_date(row, "completed_at"),
            cancelled_at: remote_date(row, "cancelled_at"),
            status_note: value_str(row, &["status_note", "note"]),
        })
    }

    /// Inverse of [`Order::from_remote`] for the fields the backend stores.
    pub fn to_remote(&self) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|item| {
                json!({
                    "product_name": item.name,
                    "quantity": item.qty,
                    "size": item.size,
                    "special": item.special,
                    "notes": item.notes,
                    "price": item.price,
                })
            })
            .collect();

        json!({
            "id": self.order_db_id,
            "order_id": self.id,
            "customer_name": self.customer_name,
            "customer_email": self.customer_email,
            "customer_phone": self.customer_phone,
            "customer_username": self.customer_username,
            "branch": self.branch,
            "items": items,
            "subtotal": self.subtotal,
            "tax": self.tax,
            "total": self.total,
            "status": self.status.label(),
            "order_type": self.order_type.label(),
            "is_guest": self.is_guest,
            "payment_method": self.payment_method,
            "customer_notes": self.customer_notes,
            "created_at": self.timestamp.map(|ts| ts.to_rfc3339()),
        })
    }
}

fn remote_items(raw: Option<&Value>) -> Vec<OrderItem> {
    // Some endpoints send the items column as a JSON-encoded string.
    let parsed;
    let value = match raw {
        Some(Value::String(s)) => {
            parsed = serde_json::from_str::<Value>(s).unwrap_or(Value::Null);
            &parsed
        }
        Some(v) => v,
        None => return Vec::new(),
    };

    value
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter(|row| row.is_object())
                .map(|row| OrderItem {
                    name: value_str(row, &["product_name", "name", "item_name"])
                        .unwrap_or_else(|| MISSING_TEXT.to_string()),
                    qty: value_i64(row, &["quantity", "qty"])
                        .unwrap_or(0)
                        .clamp(0, i64::from(u32::MAX)) as u32,
                    size: value_str(row, &["size"]).unwrap_or_else(|| "Regular".to_string()),
                    special: value_str(row, &["special", "special_option"])
                        .unwrap_or_else(|| "None".to_string()),
                    notes: value_str(row, &["notes", "item_notes"]).unwrap_or_default(),
                    price: value_f64(row, &["price", "unit_price"]).unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn remote_date(row: &Value, key: &str) -> Option<DateTime<Utc>> {
    row.get(key).and_then(parse_flexible_date)
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Parse the date shapes the backend emits: epoch seconds (number or
/// digit string), `m/d/Y` with an optional `H:M[:S]`, RFC 3339, and MySQL
/// `Y-m-d H:M:S` / `Y-m-d`. Naive values are read as local time.
pub fn parse_flexible_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(epoch_to_utc),
        Value::String(s) => parse_flexible_date_str(s),
        _ => None,
    }
}

pub fn parse_flexible_date_str(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.parse::<i64>().ok().and_then(epoch_to_utc);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return local_to_utc(naive);
        }
    }

    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0).and_then(local_to_utc);
        }
    }

    None
}

fn epoch_to_utc(value: i64) -> Option<DateTime<Utc>> {
    // Millisecond timestamps from browser clients show up occasionally.
    if value >= 100_000_000_000 {
        return DateTime::from_timestamp_millis(value);
    }
    DateTime::from_timestamp(value, 0)
}

fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

// ===========================================================================
// Tests
// ===========================================================================
