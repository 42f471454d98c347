//! Service configuration.
//!
//! Values come from `JESSIE_*` environment variables first; anything not
//! set there falls back to the `config` category of the local settings
//! table, which the admin dashboard writes when a terminal is provisioned.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::db::{self, DbState};
use crate::error::PosError;

pub const ENV_API_URL: &str = "JESSIE_API_URL";
pub const ENV_API_KEY: &str = "JESSIE_API_KEY";
pub const ENV_ROLE: &str = "JESSIE_ROLE";
pub const ENV_BRANCH: &str = "JESSIE_BRANCH";
pub const ENV_POLL_SECS: &str = "JESSIE_POLL_SECS";
pub const ENV_TIMEOUT_SECS: &str = "JESSIE_TIMEOUT_SECS";
pub const ENV_DATA_DIR: &str = "JESSIE_DATA_DIR";

const SETTINGS_CATEGORY: &str = "config";

const DEFAULT_POLL_SECS: u64 = 5;
const MIN_POLL_SECS: u64 = 2;
const MAX_POLL_SECS: u64 = 300;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Customer,
    Cashier { branch: String },
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Customer => f.write_str("customer"),
            Role::Cashier { branch } => write!(f, "cashier ({branch})"),
            Role::Admin => f.write_str("admin"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub role: Role,
    pub data_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub request_timeout: Duration,
}

/// Raw configuration values before validation.
#[derive(Debug, Clone, Default)]
pub struct PendingConfig {
    api_url: Option<String>,
    api_key: Option<String>,
    role: Option<String>,
    branch: Option<String>,
    poll_secs: Option<String>,
    timeout_secs: Option<String>,
    pub data_dir: PathBuf,
}

pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .or_else(|_| std::env::var("LOCALAPPDATA"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        });
    base.join("jessie-pos")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl PendingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            api_url: non_empty(lookup(ENV_API_URL)),
            api_key: non_empty(lookup(ENV_API_KEY)),
            role: non_empty(lookup(ENV_ROLE)),
            branch: non_empty(lookup(ENV_BRANCH)),
            poll_secs: non_empty(lookup(ENV_POLL_SECS)),
            timeout_secs: non_empty(lookup(ENV_TIMEOUT_SECS)),
            data_dir: non_empty(lookup(ENV_DATA_DIR))
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
        }
    }

    /// Fill unset values from the local settings table.
    pub fn fill_from_settings(&mut self, db: &DbState) {
        let Ok(conn) = db.conn.lock() else {
            return;
        };
        let read = |key: &str| non_empty(db::get_setting(&conn, SETTINGS_CATEGORY, key));

        let fields: [(&mut Option<String>, &str); 6] = [
            (&mut self.api_url, "api_url"),
            (&mut self.api_key, "api_key"),
            (&mut self.role, "role"),
            (&mut self.branch, "branch"),
            (&mut self.poll_secs, "poll_secs"),
            (&mut self.timeout_secs, "timeout_secs"),
        ];
        for (slot, key) in fields {
            if slot.is_none() {
                if let Some(value) = read(key) {
                    debug!(key, "config value taken from local settings");
                    *slot = Some(value);
                }
            }
        }
    }

    pub fn validated(self) -> Result<AppConfig, PosError> {
        let api_url = self
            .api_url
            .ok_or_else(|| PosError::Config(format!("{ENV_API_URL} is not set")))?;
        let api_base_url = normalize_base_url(&api_url);

        let role = match self
            .role
            .as_deref()
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            None | Some("customer") => Role::Customer,
            Some("admin") => Role::Admin,
            Some("cashier") => {
                let branch = self.branch.ok_or_else(|| {
                    PosError::Config(format!("{ENV_BRANCH} is required for the cashier role"))
                })?;
                Role::Cashier { branch }
            }
            Some(other) => return Err(PosError::Config(format!("unknown role '{other}'"))),
        };

        let poll_interval_secs = parse_secs(self.poll_secs.as_deref(), ENV_POLL_SECS)?
            .unwrap_or(DEFAULT_POLL_SECS)
            .clamp(MIN_POLL_SECS, MAX_POLL_SECS);
        let timeout_secs = parse_secs(self.timeout_secs.as_deref(), ENV_TIMEOUT_SECS)?
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .max(1);

        Ok(AppConfig {
            api_base_url,
            api_key: self.api_key,
            role,
            data_dir: self.data_dir,
            poll_interval_secs,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_secs(raw: Option<&str>, name: &str) -> Result<Option<u64>, PosError> {
    raw.map(|value| {
        value
            .parse::<u64>()
            .map_err(|_| PosError::Config(format!("{name} must be a whole number of seconds")))
    })
    .transpose()
}

/// Normalise the backend base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` segment
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}
