//! Key-value persistence for the client-side caches.
//!
//! Every cache (orders, menu, carts, inventory log, ...) is a JSON document
//! stored under a fixed key. The store itself is injected: [`SqliteStore`]
//! writes to the `local_settings` table, [`MemoryStore`] keeps everything in
//! a map for tests and throwaway sessions.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::db::{self, DbState};
use crate::error::PosError;

pub const KEY_ORDERS: &str = "jessie_orders";
pub const KEY_MENU: &str = "jessie_menu";
pub const KEY_ADMIN_MENU: &str = "jessie_admin_menu";
pub const KEY_INVENTORY: &str = "jessie_inventory_log";
pub const KEY_ANNOUNCEMENTS: &str = "jessie_announcements";
pub const KEY_CREDENTIAL_OVERRIDES: &str = "jessie_credential_overrides";
pub const KEY_ORDER_COUNTER: &str = "jessie_order_counter";
const CART_KEY_PREFIX: &str = "jessie_cart_";

/// Settings category used for cache documents in `local_settings`.
const LOCAL_CATEGORY: &str = "local";

/// Saved-cart key for one user (email, username or a guest token).
pub fn cart_key(user: &str) -> String {
    let normalized: String = user
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '@' || c == '.' { c } else { '_' })
        .collect();
    format!("{CART_KEY_PREFIX}{normalized}")
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    /// Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), String>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
        Ok(())
    }
}

pub struct SqliteStore {
    db: Arc<DbState>,
}

impl SqliteStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Option<String> {
        let conn = match self.db.conn.lock() {
            Ok(c) => c,
            Err(e) => {
                warn!(key, "store lock failed: {e}");
                return None;
            }
        };
        db::get_setting(&conn, LOCAL_CATEGORY, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        db::set_setting(&conn, LOCAL_CATEGORY, key, value)
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        db::delete_setting(&conn, LOCAL_CATEGORY, key)
    }
}

// ---------------------------------------------------------------------------
// Typed JSON helpers
// ---------------------------------------------------------------------------

/// Read a JSON array as raw values. Missing or unparsable documents read as
/// empty; a non-array document is treated the same way.
pub fn read_raw_array(store: &dyn KeyValueStore, key: &str) -> Vec<Value> {
    let Some(raw) = store.get(key) else {
        return Vec::new();
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(arr)) => arr,
        Ok(_) => {
            warn!(key, "stored document is not an array, treating as empty");
            Vec::new()
        }
        Err(e) => {
            warn!(key, error = %e, "stored document is not valid JSON, treating as empty");
            Vec::new()
        }
    }
}

/// Read a JSON array of `T`, skipping elements that do not deserialize.
pub fn read_json_array<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Vec<T> {
    read_raw_array(store, key)
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(key, error = %e, "skipping malformed stored element");
                None
            }
        })
        .collect()
}

pub fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), PosError> {
    let serialized =
        serde_json::to_string(value).map_err(|e| PosError::Storage(format!("{key}: {e}")))?;
    store
        .set(key, &serialized)
        .map_err(|e| PosError::Storage(format!("{key}: {e}")))
}

pub fn remove_key(store: &dyn KeyValueStore, key: &str) -> Result<(), PosError> {
    store
        .remove(key)
        .map_err(|e| PosError::Storage(format!("{key}: {e}")))
}

/// Next value of a persisted monotonically increasing counter.
pub fn next_counter(store: &dyn KeyValueStore, key: &str) -> Result<u64, PosError> {
    let current = store
        .get(key)
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let next = current + 1;
    store
        .set(key, &next.to_string())
        .map_err(|e| PosError::Storage(format!("{key}: {e}")))?;
    Ok(next)
}

// ===========================================================================
// Tests
// ===========================================================================
