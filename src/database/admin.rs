//! Database administration: stats, table listing, the read-only query
//! console, and maintenance (optimize, backup, cleanup).
//!
//! Tables are discovered from `sqlite_master`; their schemas belong to
//! whoever created them.

use super::connection::DbConnection;
use super::models::{CleanupReport, DatabaseStats, QueryResult, TableInfo, TableSummary};
use crate::error::AppError;
use chrono::{DateTime, Local, TimeDelta, Utc};
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

const BACKUP_PREFIX: &str = "library_backup_";
const BACKUP_SUFFIX: &str = ".db";
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SELECT_PREFIX: &str = r"(?i)^\s*(select|with)\b";

pub fn database_stats(
    conn: &DbConnection,
    db_path: &Path,
    backup_dir: &Path,
) -> Result<DatabaseStats, AppError> {
    let tables = conn.with(|c| -> Result<Vec<TableInfo>, AppError> {
        table_names(c)?
            .into_iter()
            .map(|name| -> Result<TableInfo, AppError> {
                let record_count = count_rows(c, &name)?;
                Ok(TableInfo { name, record_count })
            })
            .collect()
    })?;

    let total_size_mb = match std::fs::metadata(db_path) {
        Ok(meta) => (meta.len() as f64 / BYTES_PER_MB * 100.0).round() / 100.0,
        Err(_) => 0.0,
    };

    Ok(DatabaseStats {
        total_size_mb,
        table_count: tables.len(),
        total_records: tables.iter().map(|t| t.record_count).sum(),
        last_backup: last_backup(backup_dir),
        tables,
    })
}

pub fn list_tables(conn: &DbConnection) -> Result<Vec<TableSummary>, AppError> {
    conn.with(|c| -> Result<Vec<TableSummary>, AppError> {
        let mut tables = Vec::new();
        for name in table_names(c)? {
            let record_count = count_rows(c, &name)?;
            let last_updated = if has_column(c, &name, "created_at")? {
                c.query_row(
                    &format!("SELECT MAX(created_at) FROM {}", quote_ident(&name)),
                    [],
                    |row| Ok(value_to_string(row.get_ref(0)?)),
                )?
            } else {
                None
            };
            tables.push(TableSummary {
                name,
                record_count,
                last_updated,
            });
        }
        Ok(tables)
    })
}

/// Run a console query. Only a single read-only SELECT (optionally behind a
/// WITH clause) is accepted.
pub fn run_select_query(conn: &DbConnection, sql: &str) -> Result<QueryResult, AppError> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(AppError::Other("No query provided".to_string()));
    }
    let select_prefix = Regex::new(SELECT_PREFIX).map_err(|e| AppError::Other(e.to_string()))?;
    if !select_prefix.is_match(sql) {
        return Err(AppError::Forbidden("only SELECT statements are allowed".to_string()));
    }
    if has_second_statement(sql) {
        return Err(AppError::Forbidden("multiple statements are not allowed".to_string()));
    }

    conn.with(|c| -> Result<QueryResult, AppError> {
        let mut stmt = c.prepare(sql)?;
        if !stmt.readonly() {
            return Err(AppError::Forbidden("only SELECT statements are allowed".to_string()));
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = serde_json::Map::new();
            for (idx, column) in columns.iter().enumerate() {
                record.insert(column.clone(), value_to_json(row.get_ref(idx)?));
            }
            out.push(record);
        }

        Ok(QueryResult { columns, rows: out })
    })
}

/// Refresh planner statistics, then rebuild indexes. A failed REINDEX is
/// logged and does not fail the operation.
pub fn optimize(conn: &DbConnection) -> Result<(), AppError> {
    conn.with(|c| -> Result<(), AppError> {
        c.execute_batch("ANALYZE")?;
        if let Err(e) = c.execute_batch("REINDEX") {
            log::warn!("REINDEX failed during optimize: {}", e);
        }
        Ok(())
    })?;
    log::info!("Database optimized");
    Ok(())
}

/// Write a consistent copy of the database into `dir` and return its path.
pub fn backup(conn: &DbConnection, dir: &Path) -> Result<PathBuf, AppError> {
    std::fs::create_dir_all(dir)?;
    let target = next_backup_path(dir, Local::now());
    let target_str = target
        .to_str()
        .ok_or_else(|| AppError::Other(format!("Backup path is not valid UTF-8: {}", target.display())))?;

    conn.with(|c| {
        c.execute("VACUUM INTO ?1", params![target_str])
            .map_err(AppError::from)
    })?;

    log::info!("Database backup written to {}", target.display());
    Ok(target)
}

/// Delete logs older than `log_days` and read notifications older than
/// `notification_days`. Missing tables count as nothing to clean.
pub fn cleanup(
    conn: &DbConnection,
    log_days: i64,
    notification_days: i64,
) -> Result<CleanupReport, AppError> {
    let now = Utc::now();
    let log_cutoff = retention_cutoff(now, log_days)?;
    let notification_cutoff = retention_cutoff(now, notification_days)?;

    let report = conn.with_mut(|c| -> Result<CleanupReport, AppError> {
        let tx = c.transaction()?;

        let logs_removed = if has_column(&tx, "logs", "created_at")? {
            tx.execute("DELETE FROM logs WHERE created_at < ?1", params![log_cutoff])?
        } else {
            0
        };

        let notifications_removed = if has_column(&tx, "notifications", "created_at")?
            && has_column(&tx, "notifications", "read")?
        {
            tx.execute(
                "DELETE FROM notifications WHERE read = 1 AND created_at < ?1",
                params![notification_cutoff],
            )?
        } else {
            0
        };

        tx.commit()?;
        Ok(CleanupReport {
            logs_removed,
            notifications_removed,
        })
    })?;

    log::info!("Database cleanup removed {} records", report.cleaned_records());
    Ok(report)
}

// =========================================================================
// Helpers
// =========================================================================

fn table_names(c: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = c.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

fn count_rows(c: &Connection, table: &str) -> rusqlite::Result<i64> {
    c.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )
}

fn has_column(c: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let count: i64 = c.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sqlite_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `now - days`, formatted like SQLite's `datetime('now')`
fn retention_cutoff(now: DateTime<Utc>, days: i64) -> Result<String, AppError> {
    TimeDelta::try_days(days)
        .and_then(|delta| now.checked_sub_signed(delta))
        .map(sqlite_timestamp)
        .ok_or_else(|| AppError::Other(format!("Retention of {} days is out of range", days)))
}

/// True when a `;` outside string literals, quoted identifiers and comments
/// is followed by anything other than whitespace, comments or more `;`.
fn has_second_statement(sql: &str) -> bool {
    let mut chars = sql.chars().peekable();
    let mut ended = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' => {
                if ended {
                    return true;
                }
                // Doubled quote characters are escapes and simply reopen the literal
                for inner in chars.by_ref() {
                    if inner == ch {
                        break;
                    }
                }
            }
            '[' => {
                if ended {
                    return true;
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            ';' => ended = true,
            c if c.is_whitespace() => {}
            _ => {
                if ended {
                    return true;
                }
            }
        }
    }
    false
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(format!("<{} bytes>", b.len())),
    }
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(format!("<{} bytes>", b.len())),
    }
}

fn next_backup_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let mut candidate = dir.join(format!("{}{}{}", BACKUP_PREFIX, stamp, BACKUP_SUFFIX));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}{}_{}{}", BACKUP_PREFIX, stamp, n, BACKUP_SUFFIX));
        n += 1;
    }
    candidate
}

/// Modification time of the newest backup in `dir`
fn last_backup(dir: &Path) -> Option<String> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX)
        })
        .filter_map(|entry| entry.metadata().ok()?.modified().ok())
        .max()
        .map(|modified| DateTime::<Local>::from(modified).format("%Y-%m-%d %H:%M").to_string())
}
