//! Key/value settings stored in the `settings` table.

use crate::database::DbConnection;
use crate::error::ConnectionError;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::time::Duration;

/// Retry schedule for reads that may hit a busy database
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

pub fn ensure_schema(conn: &DbConnection) -> Result<(), ConnectionError> {
    conn.with(|c| {
        c.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT,
                section TEXT DEFAULT 'DEFAULT',
                updated_at TEXT DEFAULT (datetime('now'))
            );
            "#,
        )
        .map_err(ConnectionError::from)
    })
}

/// Every stored key, including keys whose value is NULL.
pub fn get_settings(
    conn: &DbConnection,
) -> Result<HashMap<String, Option<String>>, ConnectionError> {
    conn.with(|c| -> Result<HashMap<String, Option<String>>, ConnectionError> {
        let mut stmt = c.prepare("SELECT key, value FROM settings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut settings = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            settings.insert(key, value);
        }
        Ok(settings)
    })
}

pub fn get_setting(conn: &DbConnection, key: &str) -> Result<Option<String>, ConnectionError> {
    conn.with(|c| {
        c.query_row(
            "SELECT value FROM settings WHERE key = ?",
            params![key],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .map(Option::flatten)
        .map_err(ConnectionError::from)
    })
}

/// Read a setting, retrying on database errors, and fall back to `default`
/// when it is missing or every attempt failed.
pub fn get_setting_or(conn: &DbConnection, key: &str, default: &str) -> String {
    get_setting_with_retry(conn, key, default, RetryPolicy::default())
}

pub fn get_setting_with_retry(
    conn: &DbConnection,
    key: &str,
    default: &str,
    policy: RetryPolicy,
) -> String {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match get_setting(conn, key) {
            Ok(value) => return value.unwrap_or_else(|| default.to_string()),
            // A closed handle will not recover by waiting
            Err(ConnectionError::Closed) => break,
            Err(e) if attempt < attempts => {
                log::warn!("Retry {}/{} getting setting {}: {}", attempt, attempts, key, e);
                std::thread::sleep(policy.delay);
            }
            Err(e) => {
                log::error!("Error getting setting {} after {} attempts: {}", key, attempts, e);
            }
        }
    }
    default.to_string()
}

/// Insert or update a setting. New keys land in the `DEFAULT` section.
/// `updated_at` uses the same `datetime('now')` format as the column default.
pub fn update_setting(conn: &DbConnection, key: &str, value: &str) -> Result<(), ConnectionError> {
    conn.with(|c| {
        c.execute(
            "INSERT INTO settings (key, value, section, updated_at)
             VALUES (?1, ?2, 'DEFAULT', datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )
        .map_err(ConnectionError::from)
    })?;
    log::info!("Setting {} = {}", key, value);
    Ok(())
}

pub fn is_feature_enabled(conn: &DbConnection, key: &str) -> bool {
    let value = get_setting_or(conn, key, "false");
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}
