//! Diagnostics for the sync service.
//!
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Health snapshot**: schema version, cache sizes and provisioned
//!   settings (secrets redacted)
//! - **Logging**: console + daily rolling file, with pruning of old files

use crate::db::DbState;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

const LOG_FILE_PREFIX: &str = "jessie";
const DEFAULT_FILTER: &str = "info,jessie_pos_lib=debug";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Health snapshot
// ---------------------------------------------------------------------------

/// Schema version, per-category row counts and the provisioned `config`
/// settings. Values under sensitive keys are replaced with `[REDACTED]`.
pub fn get_health_snapshot(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let schema_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;

    let mut counts = serde_json::Map::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT setting_category, COUNT(*) FROM local_settings
                 GROUP BY setting_category",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| e.to_string())?;
        for (category, count) in rows.flatten() {
            counts.insert(category, json!(count));
        }
    }

    let mut config = serde_json::Map::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT setting_key, setting_value FROM local_settings
                 WHERE setting_category = 'config' ORDER BY setting_key",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| e.to_string())?;
        for (key, value) in rows.flatten() {
            config.insert(key, Value::String(value));
        }
    }

    Ok(json!({
        "about": get_about_info(),
        "dbPath": db.db_path.to_string_lossy(),
        "schemaVersion": schema_version,
        "settingsByCategory": Value::Object(counts),
        "config": redact_sensitive_fields(Value::Object(config)),
    }))
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    ["api_key", "apikey", "secret", "password", "token", "hash"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log directory inside the service's data directory.
pub fn get_log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

/// Install the global subscriber: `RUST_LOG`-style filter, console output
/// and a daily rolling file under [`get_log_dir`] of `data_dir`.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process. `None` means a subscriber was already set or
/// the log directory could not be created; console logging still works in
/// the latter case.
pub fn init_logging(data_dir: &Path) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_dir = get_log_dir(data_dir);
    prune_old_logs(&log_dir);

    if let Err(e) = fs::create_dir_all(&log_dir) {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init();
        warn!(dir = %log_dir.display(), error = %e, "File logging disabled");
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok()
        .map(|_| guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        assert!(info.get("version").is_some());
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{name}-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_log_dir_follows_configured_data_dir() {
        let data_dir = Path::new("/srv/jessie-fairview");
        assert_eq!(get_log_dir(data_dir), data_dir.join("logs"));
    }

    #[test]
    fn test_prune_keeps_newest_log_files() {
        let log_dir = scratch_dir("jessie-logs");
        for day in 0..(MAX_LOG_FILES + 3) {
            fs::write(log_dir.join(format!("{LOG_FILE_PREFIX}.2026-01-{:02}", day + 1)), "x")
                .unwrap();
        }
        fs::write(log_dir.join("notes.txt"), "keep").unwrap();

        prune_old_logs(&log_dir);

        let remaining: Vec<String> = fs::read_dir(&log_dir)
            .unwrap()
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        let logs = remaining
            .iter()
            .filter(|n| n.starts_with(LOG_FILE_PREFIX))
            .count();
        assert_eq!(logs, MAX_LOG_FILES);
        assert!(remaining.iter().any(|n| n == "notes.txt"));
        fs::remove_dir_all(&log_dir).unwrap();
    }

    #[test]
    fn test_health_snapshot_redacts_api_key() {
        let db = crate::db::init_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            crate::db::set_setting(&conn, "config", "api_key", "k-123").unwrap();
            crate::db::set_setting(&conn, "config", "role", "admin").unwrap();
            crate::db::set_setting(&conn, "local", "jessie_orders", "[]").unwrap();
        }
        let health = get_health_snapshot(&db).unwrap();
        assert_eq!(health["schemaVersion"], json!(crate::db::CURRENT_SCHEMA_VERSION));
        assert_eq!(health["config"]["api_key"], json!("[REDACTED]"));
        assert_eq!(health["config"]["role"], json!("admin"));
        assert_eq!(health["settingsByCategory"]["local"], json!(1));
    }

    #[test]
    fn test_should_redact_key_matches_sensitive_markers() {
        assert!(should_redact_key("api_key"));
        assert!(should_redact_key("passwordHash"));
        assert!(!should_redact_key("branch"));
    }
}
