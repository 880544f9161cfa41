//! Per-context connection table bound to a single database file.

use super::connection::{lock_unpoisoned, ContextKey, DbConnection};
use crate::config::ConnectionOptions;
use crate::diagnostics::ErrorLog;
use crate::error::ConnectionError;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

struct ConnectionTable {
    entries: HashMap<ContextKey, DbConnection>,
    retired: bool,
}

/// Hands out at most one live connection per execution context.
///
/// The backing file is fixed at construction. Connections are opened lazily
/// on first request and released by `close_connection`, `close_all`, or when
/// the manager is dropped.
pub struct ConnectionManager {
    db_path: PathBuf,
    options: ConnectionOptions,
    table: Mutex<ConnectionTable>,
    error_log: Arc<ErrorLog>,
}

impl ConnectionManager {
    pub fn new(db_path: impl Into<PathBuf>, options: ConnectionOptions, error_log: Arc<ErrorLog>) -> Self {
        let db_path = db_path.into();
        log::info!("Connection manager bound to {}", db_path.display());
        Self {
            db_path,
            options,
            table: Mutex::new(ConnectionTable {
                entries: HashMap::new(),
                retired: false,
            }),
            error_log,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Connection for the calling thread.
    pub fn get_connection(&self) -> Result<DbConnection, ConnectionError> {
        self.get_connection_for(ContextKey::current())
    }

    /// Connection for `key`, opened on first use.
    ///
    /// Opening happens under the table lock so one key can never end up with
    /// two connections. A failed open leaves no entry behind.
    pub fn get_connection_for(&self, key: ContextKey) -> Result<DbConnection, ConnectionError> {
        let mut table = lock_unpoisoned(&self.table);

        if table.retired {
            return Err(ConnectionError::Retired {
                path: self.db_path.clone(),
            });
        }

        if let Some(conn) = table.entries.get(&key) {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
        }

        let conn = match self.open(key) {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Database connection failed for {}: {}", key, e);
                table.entries.remove(&key);
                return Err(e);
            }
        };
        log::debug!(
            "Opened connection #{} to {} for {}",
            conn.id(),
            self.db_path.display(),
            key
        );
        table.entries.insert(key, conn.clone());
        Ok(conn)
    }

    /// Close the calling thread's connection, if any.
    pub fn close_connection(&self) {
        self.close_connection_for(ContextKey::current());
    }

    /// Remove and close the entry for `key`. Close errors are logged, never
    /// returned; the entry is gone either way.
    pub fn close_connection_for(&self, key: ContextKey) {
        let removed = lock_unpoisoned(&self.table).entries.remove(&key);
        if let Some(conn) = removed {
            self.release(key, conn);
        }
    }

    /// Close every connection and clear the table. Safe to call repeatedly.
    pub fn close_all(&self) {
        let drained: Vec<(ContextKey, DbConnection)> =
            lock_unpoisoned(&self.table).entries.drain().collect();
        self.release_all(drained);
    }

    /// Close everything and refuse further connections. Used when the
    /// registry replaces this instance with one bound to another file.
    pub(crate) fn retire(&self) {
        let drained: Vec<(ContextKey, DbConnection)> = {
            let mut table = lock_unpoisoned(&self.table);
            table.retired = true;
            table.entries.drain().collect()
        };
        self.release_all(drained);
    }

    pub fn is_retired(&self) -> bool {
        lock_unpoisoned(&self.table).retired
    }

    pub fn open_connections(&self) -> usize {
        lock_unpoisoned(&self.table).entries.len()
    }

    pub fn has_connection(&self, key: ContextKey) -> bool {
        lock_unpoisoned(&self.table).entries.contains_key(&key)
    }

    fn open(&self, key: ContextKey) -> Result<DbConnection, ConnectionError> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.options.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let open_error = |source| ConnectionError::Open {
            path: self.db_path.clone(),
            source,
        };

        let conn = Connection::open_with_flags(&self.db_path, flags).map_err(open_error)?;
        self.configure(&conn).map_err(open_error)?;
        Ok(DbConnection::new(key, conn))
    }

    // The journal_mode pragma is the first statement to touch the file, so
    // unreadable or corrupt files fail here rather than on the caller's query.
    fn configure(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(Duration::from_millis(self.options.busy_timeout_ms))?;
        let mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            &self.options.journal_mode,
            |row| row.get(0),
        )?;
        if !mode.eq_ignore_ascii_case(&self.options.journal_mode) {
            log::debug!(
                "journal_mode {} requested, {} in effect for {}",
                self.options.journal_mode,
                mode,
                self.db_path.display()
            );
        }
        conn.pragma_update(None, "foreign_keys", self.options.foreign_keys)?;
        Ok(())
    }

    fn release_all(&self, drained: Vec<(ContextKey, DbConnection)>) {
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        for (key, conn) in drained {
            self.release(key, conn);
        }
        log::info!(
            "Closed {} connection(s) to {}",
            count,
            self.db_path.display()
        );
    }

    fn release(&self, key: ContextKey, conn: DbConnection) {
        let id = conn.id();
        match conn.close() {
            Ok(()) => log::debug!("Closed connection #{} for {}", id, key),
            Err(e) => self.record_close_failure(key, &e),
        }
    }

    /// Log a failed close and keep it for diagnostics. Never propagates.
    pub(crate) fn record_close_failure(&self, key: ContextKey, err: &ConnectionError) {
        log::warn!("Error closing database connection for {}: {}", key, err);
        self.error_log.log_error(
            "close_connection",
            &err.to_string(),
            Some(&format!("{} ({})", key, self.db_path.display())),
        );
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("db_path", &self.db_path)
            .field("open_connections", &self.open_connections())
            .finish()
    }
}
