//! Menu catalog for the storefront and the admin dashboard.
//!
//! The customer-facing catalog lives under `jessie_menu` and is never
//! empty: a missing or unreadable document reseeds the fixed default list.
//! Reads also migrate the legacy three-price shape
//! (`priceSmall`/`priceMedium`/`priceLarge`) to Regular/Tall and write the
//! result back. The admin catalog lives under `jessie_admin_menu` and is
//! merged into the customer catalog after every admin edit.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{OrderBackend, ProductAction, ProductWrite};
use crate::error::{PosError, PosResult};
use crate::storage::{self, SharedStore, KEY_ADMIN_MENU, KEY_MENU};
use crate::{value_f64, value_i64, value_str};

pub const PLACEHOLDER_IMAGE: &str = "images/placeholder-juice.png";

/// Items whose size-resolved base price is below this sell in pairs.
pub const TIER_PRICE_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Size {
    #[default]
    Regular,
    Tall,
}

impl Size {
    pub fn label(self) -> &'static str {
        match self {
            Size::Regular => "Regular",
            Size::Tall => "Tall",
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_regular: f64,
    pub price_tall: f64,
    #[serde(default = "placeholder_image")]
    pub image: String,
}

fn placeholder_image() -> String {
    PLACEHOLDER_IMAGE.to_string()
}

impl MenuItem {
    pub fn price_for(&self, size: Size) -> f64 {
        match size {
            Size::Regular => self.price_regular,
            Size::Tall => self.price_tall,
        }
    }

    /// Minimum purchasable quantity for one size of this item.
    pub fn minimum_qty(&self, size: Size) -> u32 {
        if self.price_for(size) < TIER_PRICE_THRESHOLD {
            2
        } else {
            1
        }
    }

    /// Product row in backend column names.
    pub fn to_remote(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "price_regular": self.price_regular,
            "price_tall": self.price_tall,
            "image": self.image,
        })
    }
}

/// Fields an admin supplies when creating or editing a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_regular: f64,
    /// Defaults to the regular price.
    #[serde(default)]
    pub price_tall: Option<f64>,
    #[serde(default)]
    pub image: Option<String>,
}

impl MenuItemDraft {
    fn validated(self, id: i64) -> PosResult<MenuItem> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(PosError::MissingField("name"));
        }
        if !(self.price_regular.is_finite() && self.price_regular > 0.0) {
            return Err(PosError::invalid("priceRegular", "must be greater than zero"));
        }
        let price_tall = match self.price_tall {
            Some(price) if !(price.is_finite() && price > 0.0) => {
                return Err(PosError::invalid("priceTall", "must be greater than zero"));
            }
            Some(price) => price,
            None => self.price_regular,
        };
        Ok(MenuItem {
            id,
            name,
            description: self.description.trim().to_string(),
            price_regular: self.price_regular,
            price_tall,
            image: sanitize_image(self.image.as_deref()),
        })
    }
}

// ---------------------------------------------------------------------------
// Default catalog
// ---------------------------------------------------------------------------

const DEFAULT_CATALOG: [(&str, &str, f64, f64); 12] = [
    ("Calamansi Cooler", "Fresh calamansi with a touch of honey", 79.0, 99.0),
    ("Watermelon Splash", "Pure pressed watermelon", 79.0, 99.0),
    ("Lemon Cane", "Sugarcane juice with fresh lemon", 89.0, 109.0),
    ("Pineapple Ginger", "Pineapple with a ginger kick", 89.0, 109.0),
    ("Mango Tango", "Carabao mango blended smooth", 99.0, 119.0),
    ("Green Detox", "Kale, cucumber, apple and lemon", 119.0, 139.0),
    ("Carrot Orange Glow", "Carrot and orange with turmeric", 99.0, 119.0),
    ("Strawberry Banana", "Strawberry and banana smoothie", 109.0, 129.0),
    ("Buko Pandan", "Young coconut with pandan", 99.0, 119.0),
    ("Dragon Fruit Bliss", "Red dragon fruit and yogurt", 129.0, 149.0),
    ("Avocado Cream", "Avocado blended with milk", 129.0, 149.0),
    ("Mixed Berry Boost", "Blueberry, strawberry and raspberry", 139.0, 159.0),
];

pub fn default_catalog() -> Vec<MenuItem> {
    DEFAULT_CATALOG
        .iter()
        .enumerate()
        .map(|(idx, (name, description, regular, tall))| MenuItem {
            id: idx as i64 + 1,
            name: name.to_string(),
            description: description.to_string(),
            price_regular: *regular,
            price_tall: *tall,
            image: placeholder_image(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

/// Keep plain URIs; data-URIs must carry valid base64. Anything else gets
/// the placeholder.
fn sanitize_image(raw: Option<&str>) -> String {
    let Some(image) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return placeholder_image();
    };
    if let Some(rest) = image.strip_prefix("data:") {
        let Some((_, payload)) = rest.split_once(";base64,") else {
            return placeholder_image();
        };
        if BASE64_STANDARD.decode(payload.trim()).is_err() {
            return placeholder_image();
        }
    }
    image.to_string()
}

/// Map a stored or backend product row to a [`MenuItem`].
///
/// Returns `None` for rows without a name or a positive regular price. An
/// id of `0` means the row had none and one must be allocated.
fn normalize_item(raw: &Value) -> Option<MenuItem> {
    let name = value_str(raw, &["name", "product_name"])?;

    let mut regular = value_f64(raw, &["priceRegular", "price_regular"]);
    let mut tall = value_f64(raw, &["priceTall", "price_tall"]);
    if regular.is_none() && tall.is_none() {
        regular = value_f64(raw, &["priceSmall", "price_small", "price"]);
        tall = value_f64(raw, &["priceMedium", "price_medium"])
            .or_else(|| value_f64(raw, &["priceLarge", "price_large"]));
    }
    let price_regular = regular.filter(|p| *p > 0.0)?;
    let price_tall = tall.filter(|p| *p > 0.0).unwrap_or(price_regular);

    Some(MenuItem {
        id: value_i64(raw, &["id", "product_id"])
            .filter(|id| *id > 0)
            .unwrap_or(0),
        name,
        description: value_str(raw, &["description"]).unwrap_or_default(),
        price_regular,
        price_tall,
        image: sanitize_image(value_str(raw, &["image", "image_url"]).as_deref()),
    })
}

/// Normalise a list of rows, dropping unusable ones, and give id-less or
/// duplicate-id rows fresh ids after the current maximum.
fn normalize_catalog(rows: &[Value]) -> Vec<MenuItem> {
    let mut items: Vec<MenuItem> = rows.iter().filter_map(normalize_item).collect();
    let mut next_id = items.iter().map(|item| item.id).max().unwrap_or(0) + 1;
    let mut seen = std::collections::HashSet::new();
    for item in items.iter_mut() {
        if item.id == 0 || !seen.insert(item.id) {
            item.id = next_id;
            seen.insert(next_id);
            next_id += 1;
        }
    }
    items
}

fn next_id(items: &[MenuItem]) -> i64 {
    items.iter().map(|item| item.id).max().unwrap_or(0) + 1
}

/// Counts from one admin-to-customer merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub updated: usize,
    pub added: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.updated + self.added > 0
    }
}

/// Merge `incoming` into `catalog`: match by id, then by case-insensitive
/// name; unmatched items are appended with `max(id) + 1`. Matched entries
/// keep their catalog id.
pub fn merge_catalog(catalog: &mut Vec<MenuItem>, incoming: &[MenuItem]) -> MergeReport {
    let mut report = MergeReport::default();
    for item in incoming {
        let position = catalog
            .iter()
            .position(|existing| existing.id == item.id)
            .or_else(|| {
                let wanted = item.name.trim().to_lowercase();
                catalog
                    .iter()
                    .position(|existing| existing.name.trim().to_lowercase() == wanted)
            });

        match position {
            Some(idx) => {
                let existing = &mut catalog[idx];
                let merged = MenuItem {
                    id: existing.id,
                    ..item.clone()
                };
                if *existing != merged {
                    *existing = merged;
                    report.updated += 1;
                }
            }
            None => {
                let id = next_id(catalog);
                catalog.push(MenuItem {
                    id,
                    ..item.clone()
                });
                report.added += 1;
            }
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Catalog service
// ---------------------------------------------------------------------------

pub struct MenuCatalog {
    store: SharedStore,
    backend: Arc<dyn OrderBackend>,
}

impl MenuCatalog {
    pub fn new(store: SharedStore, backend: Arc<dyn OrderBackend>) -> Self {
        Self { store, backend }
    }

    /// The customer catalog. Never empty; self-heals storage on read.
    pub fn get_menu_items(&self) -> Vec<MenuItem> {
        let raw = storage::read_raw_array(self.store.as_ref(), KEY_MENU);
        let mut items = normalize_catalog(&raw);
        if items.is_empty() {
            info!("Menu cache empty or unreadable, seeding default catalog");
            items = default_catalog();
        }

        let healed = serde_json::to_value(&items).ok();
        if healed.as_ref() != Some(&Value::Array(raw)) {
            if let Err(e) = storage::write_json(self.store.as_ref(), KEY_MENU, &items) {
                warn!(error = %e, "Failed to persist normalised menu");
            }
        }
        items
    }

    pub fn find(&self, product_id: i64) -> Option<MenuItem> {
        self.get_menu_items()
            .into_iter()
            .find(|item| item.id == product_id)
    }

    /// The admin catalog, seeded from the customer catalog when empty.
    pub fn admin_items(&self) -> Vec<MenuItem> {
        let raw = storage::read_raw_array(self.store.as_ref(), KEY_ADMIN_MENU);
        let items = normalize_catalog(&raw);
        if items.is_empty() {
            return self.get_menu_items();
        }
        items
    }

    fn save_admin_items(&self, items: &[MenuItem]) -> PosResult<()> {
        storage::write_json(self.store.as_ref(), KEY_ADMIN_MENU, items)
    }

    /// Merge the admin catalog into the customer catalog.
    pub fn sync_from_admin_catalog(&self) -> PosResult<MergeReport> {
        let incoming = self.admin_items();
        let mut catalog = self.get_menu_items();
        let report = merge_catalog(&mut catalog, &incoming);
        if report.changed() {
            storage::write_json(self.store.as_ref(), KEY_MENU, &catalog)?;
            info!(
                updated = report.updated,
                added = report.added,
                "Admin catalog merged into menu"
            );
        } else {
            debug!("Admin catalog merge found no changes");
        }
        Ok(report)
    }

    async fn push_product(&self, action: ProductAction, product: Value) {
        let write = ProductWrite { action, product };
        if let Err(e) = self.backend.save_product(&write).await {
            warn!(?action, error = %e, "Product push failed, kept locally");
        }
    }

    pub async fn admin_create(&self, draft: MenuItemDraft) -> PosResult<MenuItem> {
        let mut admin = self.admin_items();
        let customer = self.get_menu_items();
        let id = next_id(&admin).max(next_id(&customer));
        let item = draft.validated(id)?;

        admin.push(item.clone());
        self.save_admin_items(&admin)?;
        info!(id = item.id, name = %item.name, "Menu item created");

        self.push_product(ProductAction::Create, item.to_remote()).await;
        self.sync_from_admin_catalog()?;
        Ok(item)
    }

    pub async fn admin_update(&self, id: i64, draft: MenuItemDraft) -> PosResult<MenuItem> {
        let mut admin = self.admin_items();
        let slot = admin
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(PosError::ProductNotFound(id))?;
        let item = draft.validated(id)?;
        *slot = item.clone();
        self.save_admin_items(&admin)?;
        info!(id, name = %item.name, "Menu item updated");

        self.push_product(ProductAction::Update, item.to_remote()).await;
        self.sync_from_admin_catalog()?;
        Ok(item)
    }

    /// Remove from the admin catalog. The customer copy keeps the item
    /// until the next [`MenuCatalog::refresh_from_backend`].
    pub async fn admin_delete(&self, id: i64) -> PosResult<()> {
        let mut admin = self.admin_items();
        let before = admin.len();
        admin.retain(|item| item.id != id);
        if admin.len() == before {
            return Err(PosError::ProductNotFound(id));
        }
        self.save_admin_items(&admin)?;
        info!(id, "Menu item deleted");

        self.push_product(ProductAction::Delete, json!({ "id": id }))
            .await;
        Ok(())
    }

    /// Full sync: the backend product list replaces both catalogs. On any
    /// failure the cached catalogs are left untouched.
    pub async fn refresh_from_backend(&self) -> PosResult<Vec<MenuItem>> {
        let rows = self.backend.list_products().await?;
        let items = normalize_catalog(&rows);
        if items.is_empty() {
            return Err(PosError::MalformedPayload(format!(
                "get_products: none of {} rows is a usable product",
                rows.len()
            )));
        }
        storage::write_json(self.store.as_ref(), KEY_MENU, &items)?;
        self.save_admin_items(&items)?;
        Ok(items)
    }
}
