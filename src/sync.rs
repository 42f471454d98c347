//! Order synchronizer and background polling loop.
//!
//! The backend is the source of truth for orders; `jessie_orders` is a
//! local mirror refreshed on every pass. Two merge policies exist:
//!
//! - **Aggregate** (customer history, admin dashboard): cached orders are
//!   kept and only overwritten by matching remote rows; new rows are
//!   appended.
//! - **Branch** (cashier dashboard): remote rows replace every cached order
//!   of that branch, so orders deleted on the backend leave the cache.
//!
//! A failed or malformed remote call never reaches the caller; the cached
//! set is returned instead.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{OrderBackend, OrderFilter};
use crate::error::PosResult;
use crate::order::Order;
use crate::storage::{self, KeyValueStore, SharedStore, KEY_ORDERS};
use crate::views::branches_match;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    Aggregate,
    /// Cashier view of one branch label.
    Branch(String),
}

impl SyncScope {
    pub fn default_filter(&self) -> OrderFilter {
        match self {
            SyncScope::Aggregate => OrderFilter::default(),
            SyncScope::Branch(branch) => OrderFilter::for_branch(branch.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge policies
// ---------------------------------------------------------------------------

fn same_order(a: &Order, b: &Order) -> bool {
    match (a.order_db_id, b.order_db_id) {
        (Some(x), Some(y)) => x == y,
        _ => a.id.eq_ignore_ascii_case(&b.id),
    }
}

/// Additive merge: matching cached entries are overwritten, unmatched
/// remote entries appended, everything else kept.
pub fn merge_additive(mut local: Vec<Order>, remote: Vec<Order>) -> Vec<Order> {
    for incoming in remote {
        let position = incoming
            .order_db_id
            .and_then(|db_id| local.iter().position(|o| o.order_db_id == Some(db_id)))
            .or_else(|| local.iter().position(|o| same_order(o, &incoming)));
        match position {
            Some(idx) => local[idx] = incoming,
            None => local.push(incoming),
        }
    }
    local
}

/// Authoritative replace for one branch. Cached orders of other branches
/// are kept, as are local-only orders (never confirmed by the backend) that
/// the remote set does not mention. An empty branch label replaces the
/// whole cache.
pub fn replace_branch(local: Vec<Order>, remote: Vec<Order>, branch: &str) -> Vec<Order> {
    let whole_cache = branch.trim().is_empty();
    let kept: Vec<Order> = local
        .into_iter()
        .filter(|order| {
            if remote.iter().any(|r| same_order(r, order)) {
                return false;
            }
            let local_only = order.order_db_id.is_none();
            local_only || (!whole_cache && !branches_match(&order.branch, branch))
        })
        .collect();

    let mut merged = remote;
    merged.extend(kept);
    merged
}

/// Insert or replace one order in the cached list.
pub fn upsert_cached_order(store: &dyn KeyValueStore, order: &Order) -> PosResult<()> {
    let cached: Vec<Order> = storage::read_json_array(store, KEY_ORDERS);
    let merged = merge_additive(cached, vec![order.clone()]);
    storage::write_json(store, KEY_ORDERS, &merged)
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

pub struct OrderSynchronizer {
    store: SharedStore,
    backend: Arc<dyn OrderBackend>,
    stale: AtomicBool,
}

impl OrderSynchronizer {
    pub fn new(store: SharedStore, backend: Arc<dyn OrderBackend>) -> Self {
        Self {
            store,
            backend,
            stale: AtomicBool::new(true),
        }
    }

    pub fn cached(&self) -> Vec<Order> {
        storage::read_json_array(self.store.as_ref(), KEY_ORDERS)
    }

    /// Mark the cache stale so the next [`OrderSynchronizer::orders`] call
    /// goes to the backend.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Cached orders, re-synced first when the cache is stale.
    pub async fn orders(&self, scope: &SyncScope) -> Vec<Order> {
        if self.is_stale() {
            return self.sync(scope, None).await;
        }
        self.cached()
    }

    pub fn upsert_local(&self, order: &Order) -> PosResult<()> {
        upsert_cached_order(self.store.as_ref(), order)
    }

    /// Pull, map and merge. Remote failures fall back to the cache.
    pub async fn sync(&self, scope: &SyncScope, filter: Option<OrderFilter>) -> Vec<Order> {
        match self.try_sync(scope, filter).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, ?scope, "Order sync failed, serving cached orders");
                self.cached()
            }
        }
    }

    /// Like [`OrderSynchronizer::sync`] but reports remote failures.
    pub async fn try_sync(
        &self,
        scope: &SyncScope,
        filter: Option<OrderFilter>,
    ) -> PosResult<Vec<Order>> {
        let filter = filter.unwrap_or_else(|| scope.default_filter());
        let rows = self.backend.list_orders(&filter).await?;

        let total_rows = rows.len();
        let remote: Vec<Order> = rows.iter().filter_map(Order::from_remote).collect();
        if remote.len() < total_rows {
            warn!(
                skipped = total_rows - remote.len(),
                "Skipped order rows that are not objects"
            );
        }

        let cached = self.cached();
        let merged = match scope {
            SyncScope::Aggregate => merge_additive(cached, remote),
            SyncScope::Branch(branch) => replace_branch(cached, remote, branch),
        };

        if let Err(e) = storage::write_json(self.store.as_ref(), KEY_ORDERS, &merged) {
            warn!(error = %e, "Failed to persist synced orders");
        }
        self.stale.store(false, Ordering::SeqCst);
        debug!(rows = total_rows, cached = merged.len(), ?scope, "Orders synced");
        Ok(merged)
    }
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

/// Shared state of the polling loop.
pub struct SyncState {
    pub is_running: Arc<AtomicBool>,
    pub last_sync: Arc<Mutex<Option<String>>>,
    /// Set while the read-only embedded admin view is open; polling pauses.
    pub embedded_view: Arc<AtomicBool>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            last_sync: Arc::new(Mutex::new(None)),
            embedded_view: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn set_embedded_view(&self, active: bool) {
        self.embedded_view.store(active, Ordering::SeqCst);
    }

    pub fn last_sync(&self) -> Option<String> {
        self.last_sync.lock().ok().and_then(|g| g.clone())
    }

    fn mark_synced(&self) {
        if let Ok(mut guard) = self.last_sync.lock() {
            *guard = Some(Utc::now().to_rfc3339());
        }
    }
}

/// Spawn the polling loop. The first pass runs immediately; after that
/// one pass per `interval`. Passes are skipped while the embedded admin
/// view is active.
pub fn start_sync_loop(
    synchronizer: Arc<OrderSynchronizer>,
    sync_state: Arc<SyncState>,
    scope: SyncScope,
    interval: Duration,
) -> JoinHandle<()> {
    sync_state.is_running.store(true, Ordering::SeqCst);

    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, ?scope, "Sync loop started");
        let mut previous_ok: Option<bool> = None;

        while sync_state.is_running.load(Ordering::SeqCst) {
            if sync_state.embedded_view.load(Ordering::SeqCst) {
                debug!("Embedded admin view active, skipping sync cycle");
            } else {
                match synchronizer.try_sync(&scope, None).await {
                    Ok(orders) => {
                        if previous_ok == Some(false) {
                            info!("Order backend reachable again");
                        }
                        previous_ok = Some(true);
                        sync_state.mark_synced();
                        debug!(orders = orders.len(), "Sync cycle complete");
                    }
                    Err(e) => {
                        if previous_ok != Some(false) {
                            warn!(error = %e, "Sync cycle failed, keeping cached orders");
                        }
                        previous_ok = Some(false);
                    }
                }
            }

            tokio::time::sleep(interval).await;
        }
        info!("Sync loop stopped");
    })
}

/// Run one sync pass now, regardless of the embedded view flag.
pub async fn force_sync(
    synchronizer: &OrderSynchronizer,
    sync_state: &SyncState,
    scope: &SyncScope,
) -> PosResult<usize> {
    let orders = synchronizer.try_sync(scope, None).await?;
    sync_state.mark_synced();
    info!(orders = orders.len(), "Force sync complete");
    Ok(orders.len())
}
