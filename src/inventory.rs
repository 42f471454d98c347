//! Branch inventory log: which items are out, low or spoiled.
//!
//! One entry per (item name, branch); logging the same pair again updates
//! the entry in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

use crate::error::{PosError, PosResult};
use crate::storage::{self, SharedStore, KEY_INVENTORY};
use crate::views::branches_match;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockStatus {
    #[serde(rename = "Out of Stock")]
    OutOfStock,
    #[serde(rename = "Low Stock")]
    LowStock,
    Spoiled,
}

impl StockStatus {
    pub fn label(self) -> &'static str {
        match self {
            StockStatus::OutOfStock => "Out of Stock",
            StockStatus::LowStock => "Low Stock",
            StockStatus::Spoiled => "Spoiled",
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryLogEntry {
    pub id: String,
    pub name: String,
    pub branch: String,
    pub status: StockStatus,
    pub timestamp: DateTime<Utc>,
}

pub struct InventoryLog {
    store: SharedStore,
}

impl InventoryLog {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn entries(&self) -> Vec<InventoryLogEntry> {
        storage::read_json_array(self.store.as_ref(), KEY_INVENTORY)
    }

    pub fn entries_for_branch(&self, branch: &str) -> Vec<InventoryLogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| branches_match(&entry.branch, branch))
            .collect()
    }

    /// Record `status` for an item at a branch, replacing any earlier entry
    /// for the same item and branch.
    pub fn log_item(
        &self,
        name: &str,
        branch: &str,
        status: StockStatus,
    ) -> PosResult<InventoryLogEntry> {
        let name = name.trim();
        let branch = branch.trim();
        if name.is_empty() {
            return Err(PosError::MissingField("item name"));
        }
        if branch.is_empty() {
            return Err(PosError::MissingField("branch"));
        }

        let mut entries = self.entries();
        let existing = entries.iter_mut().find(|entry| {
            entry.name.eq_ignore_ascii_case(name) && branches_match(&entry.branch, branch)
        });

        let entry = match existing {
            Some(entry) => {
                entry.status = status;
                entry.timestamp = Utc::now();
                entry.clone()
            }
            None => {
                let entry = InventoryLogEntry {
                    id: Uuid::new_v4().to_string(),
                    name: name.to_string(),
                    branch: branch.to_string(),
                    status,
                    timestamp: Utc::now(),
                };
                entries.push(entry.clone());
                entry
            }
        };

        storage::write_json(self.store.as_ref(), KEY_INVENTORY, &entries)?;
        info!(
            item = %entry.name,
            branch = %entry.branch,
            status = %entry.status,
            "Inventory logged"
        );
        Ok(entry)
    }

    /// Returns whether an entry was removed.
    pub fn clear_entry(&self, id: &str) -> PosResult<bool> {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        storage::write_json(self.store.as_ref(), KEY_INVENTORY, &entries)?;
        Ok(true)
    }
}
