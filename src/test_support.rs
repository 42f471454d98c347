//! In-memory [`OrderBackend`] for unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{
    CreateOrderRequest, CreateOrderResponse, CredentialUpdate, OrderBackend, OrderFilter,
    ProductWrite, StatusUpdateRequest,
};
use crate::error::{PosError, PosResult};
use crate::storage::{MemoryStore, SharedStore};

#[derive(Default)]
pub struct MemoryBackend {
    pub orders: Mutex<Vec<Value>>,
    pub products: Mutex<Vec<Value>>,
    pub created: Mutex<Vec<CreateOrderRequest>>,
    pub status_updates: Mutex<Vec<StatusUpdateRequest>>,
    pub product_writes: Mutex<Vec<ProductWrite>>,
    pub credential_updates: Mutex<Vec<CredentialUpdate>>,
    pub filters: Mutex<Vec<OrderFilter>>,
    /// Every call fails with `Unreachable`.
    pub offline: AtomicBool,
    /// `create_order` answers with a rejection.
    pub reject_orders: AtomicBool,
    /// `list_orders` answers with `MalformedPayload`.
    pub malformed: AtomicBool,
    next_db_id: AtomicI64,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        backend.next_db_id.store(100, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn with_orders(rows: Vec<Value>) -> Arc<Self> {
        let backend = Self::new();
        *backend.orders.lock().unwrap() = rows;
        backend
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> PosResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(PosError::Unreachable("Cannot reach order backend".into()))
        } else {
            Ok(())
        }
    }
}

pub fn memory_store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

#[async_trait]
impl OrderBackend for MemoryBackend {
    async fn create_order(&self, request: &CreateOrderRequest) -> PosResult<CreateOrderResponse> {
        self.check_online()?;
        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(PosError::CheckoutRejected("Order rejected".into()));
        }
        self.created.lock().unwrap().push(request.clone());
        let db_id = self.next_db_id.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOrderResponse {
            order_id: format!("ORD-{db_id:03}"),
            order_db_id: db_id,
        })
    }

    async fn list_orders(&self, filter: &OrderFilter) -> PosResult<Vec<Value>> {
        self.check_online()?;
        self.filters.lock().unwrap().push(filter.clone());
        if self.malformed.load(Ordering::SeqCst) {
            return Err(PosError::MalformedPayload("get_orders: not an array".into()));
        }
        Ok(self.orders.lock().unwrap().clone())
    }

    async fn update_status(&self, request: &StatusUpdateRequest) -> PosResult<()> {
        self.check_online()?;
        self.status_updates.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn list_products(&self) -> PosResult<Vec<Value>> {
        self.check_online()?;
        Ok(self.products.lock().unwrap().clone())
    }

    async fn save_product(&self, write: &ProductWrite) -> PosResult<()> {
        self.check_online()?;
        self.product_writes.lock().unwrap().push(write.clone());
        Ok(())
    }

    async fn update_credentials(&self, update: &CredentialUpdate) -> PosResult<()> {
        self.check_online()?;
        self.credential_updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}
