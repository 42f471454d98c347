//! Jessie juice bar ordering core.
//!
//! Customer storefront, branch cashier dashboards and the admin dashboard
//! all share this crate: menu catalog, cart, checkout, order sync against
//! the PHP backend, branch views and the order status lifecycle. The
//! binary (`jessie-pos`) runs the background sync service for one role.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

pub mod announcements;
pub mod api;
pub mod backend;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod credentials;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod inventory;
pub mod menu;
pub mod order;
pub mod status;
pub mod storage;
pub mod sync;
pub mod views;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{PosError, PosResult, RejectReason};

// ---------------------------------------------------------------------------
// Lenient JSON field access
// ---------------------------------------------------------------------------
//
// The PHP backend returns numbers as strings more often than not, and field
// names drift between camelCase and snake_case. These helpers take a list of
// candidate keys and return the first usable value.

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        let Some(value) = v.get(*key) else {
            continue;
        };
        if let Some(n) = value.as_f64() {
            return Some(n);
        }
        if let Some(n) = value.as_str().and_then(|s| s.trim().parse::<f64>().ok()) {
            if n.is_finite() {
                return Some(n);
            }
        }
    }
    None
}

pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        let Some(value) = v.get(*key) else {
            continue;
        };
        if let Some(n) = value.as_i64() {
            return Some(n);
        }
        if let Some(n) = value.as_f64().filter(|n| n.fract() == 0.0) {
            return Some(n as i64);
        }
        if let Some(n) = value.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_bool(v: &serde_json::Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        let Some(value) = v.get(*key) else {
            continue;
        };
        if let Some(flag) = value.as_bool() {
            return Some(flag);
        }
        if let Some(flag) = value.as_i64() {
            return Some(flag == 1);
        }
        if let Some(flag) = value.as_str() {
            let normalized = flag.trim().to_ascii_lowercase();
            if matches!(normalized.as_str(), "true" | "1" | "yes" | "on") {
                return Some(true);
            }
            if matches!(normalized.as_str(), "false" | "0" | "no" | "off") {
                return Some(false);
            }
        }
    }
    None
}

/// Round a currency amount to centavos.
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// ============================================================================
// Service entry point
// ============================================================================

/// Run the sync service for the configured role until Ctrl-C.
///
/// Cashiers poll their branch's orders; admins poll the aggregate view and
/// keep the customer catalog merged with the admin catalog; customers do a
/// single catalog refresh and exit.
pub async fn run() -> anyhow::Result<()> {
    let mut pending = config::PendingConfig::from_env();
    let _log_guard = diagnostics::init_logging(&pending.data_dir);

    let about = diagnostics::get_about_info();
    info!(
        version = %about["version"],
        git_sha = %about["gitSha"],
        data_dir = %pending.data_dir.display(),
        "Starting Jessie POS sync service"
    );

    let db_state = Arc::new(db::init(&pending.data_dir).map_err(anyhow::Error::msg)?);
    match diagnostics::get_health_snapshot(&db_state) {
        Ok(health) => debug!(%health, "Local database ready"),
        Err(e) => warn!(error = %e, "Health snapshot unavailable"),
    }
    pending.fill_from_settings(&db_state);
    let cfg = pending.validated()?;
    info!(role = %cfg.role, base_url = %cfg.api_base_url, "Configuration loaded");

    let store: storage::SharedStore = Arc::new(storage::SqliteStore::new(db_state));
    let backend: Arc<dyn backend::OrderBackend> = Arc::new(api::HttpBackend::new(
        &cfg.api_base_url,
        cfg.api_key.clone(),
        cfg.request_timeout,
    )?);

    let catalog = menu::MenuCatalog::new(store.clone(), backend.clone());
    match catalog.refresh_from_backend().await {
        Ok(items) => info!(items = items.len(), "Menu catalog refreshed"),
        Err(e) => warn!(error = %e, "Menu refresh failed, using cached catalog"),
    }

    let synchronizer = Arc::new(sync::OrderSynchronizer::new(store, backend));
    let mode = match &cfg.role {
        config::Role::Customer => return Ok(()),
        config::Role::Cashier { branch } => sync::SyncScope::Branch(branch.clone()),
        config::Role::Admin => sync::SyncScope::Aggregate,
    };

    let sync_state = Arc::new(sync::SyncState::new());
    sync::start_sync_loop(
        synchronizer,
        sync_state.clone(),
        mode,
        Duration::from_secs(cfg.poll_interval_secs),
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    sync_state.stop();
    Ok(())
}
