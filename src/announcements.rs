//! Announcements shown on the storefront banner and cashier dashboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{PosError, PosResult};
use crate::storage::{self, SharedStore, KEY_ANNOUNCEMENTS};
use crate::views::branches_match;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub message: String,
    /// `None` is shown everywhere.
    #[serde(default)]
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct AnnouncementBoard {
    store: SharedStore,
}

impl AnnouncementBoard {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Announcement> {
        let mut all: Vec<Announcement> =
            storage::read_json_array(self.store.as_ref(), KEY_ANNOUNCEMENTS);
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Global announcements plus those for `branch`.
    pub fn for_branch(&self, branch: &str) -> Vec<Announcement> {
        self.list()
            .into_iter()
            .filter(|a| {
                a.branch
                    .as_deref()
                    .map_or(true, |target| branches_match(target, branch))
            })
            .collect()
    }

    pub fn post(
        &self,
        title: &str,
        message: &str,
        branch: Option<&str>,
    ) -> PosResult<Announcement> {
        let message = message.trim();
        if message.is_empty() {
            return Err(PosError::MissingField("message"));
        }
        let title = match title.trim() {
            "" => "Announcement",
            t => t,
        };

        let announcement = Announcement {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            message: message.to_string(),
            branch: branch
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string),
            created_at: Utc::now(),
        };

        let mut all: Vec<Announcement> =
            storage::read_json_array(self.store.as_ref(), KEY_ANNOUNCEMENTS);
        all.push(announcement.clone());
        storage::write_json(self.store.as_ref(), KEY_ANNOUNCEMENTS, &all)?;
        info!(id = %announcement.id, branch = ?announcement.branch, "Announcement posted");
        Ok(announcement)
    }

    /// Returns whether an announcement was removed.
    pub fn remove(&self, id: &str) -> PosResult<bool> {
        let mut all: Vec<Announcement> =
            storage::read_json_array(self.store.as_ref(), KEY_ANNOUNCEMENTS);
        let before = all.len();
        all.retain(|a| a.id != id);
        if all.len() == before {
            return Ok(false);
        }
        storage::write_json(self.store.as_ref(), KEY_ANNOUNCEMENTS, &all)?;
        Ok(true)
    }
}
