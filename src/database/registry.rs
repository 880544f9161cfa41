//! Selects the one live `ConnectionManager` for the process.
//!
//! Built once at startup and shared by handlers (`Arc<ManagerRegistry>`).
//! Asking for a different database file tears the current manager down
//! before the replacement is created.

use super::connection::{lock_unpoisoned, DbConnection};
use super::manager::ConnectionManager;
use crate::config::{AppConfig, ConnectionOptions};
use crate::diagnostics::ErrorLog;
use crate::error::ConnectionError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const ERROR_LOG_CAPACITY: usize = 100;

pub struct ManagerRegistry {
    default_path: PathBuf,
    options: ConnectionOptions,
    current: Mutex<Option<Arc<ConnectionManager>>>,
    error_log: Arc<ErrorLog>,
}

impl ManagerRegistry {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_error_log(config, Arc::new(ErrorLog::new(ERROR_LOG_CAPACITY)))
    }

    pub fn with_error_log(config: &AppConfig, error_log: Arc<ErrorLog>) -> Self {
        Self {
            default_path: config.database_file.clone(),
            options: config.connection.clone(),
            current: Mutex::new(None),
            error_log,
        }
    }

    /// The manager bound to `db_path`, or to the configured default file when
    /// `db_path` is `None` and nothing is bound yet.
    ///
    /// A `db_path` different from the bound one retires the current manager,
    /// closing all of its connections, before the new manager is installed.
    pub fn get_instance(&self, db_path: Option<&Path>) -> Arc<ConnectionManager> {
        let mut current = lock_unpoisoned(&self.current);

        if let Some(manager) = current.as_ref() {
            match db_path {
                Some(path) if path != manager.db_path() => {
                    log::info!(
                        "Rebinding database from {} to {}",
                        manager.db_path().display(),
                        path.display()
                    );
                    manager.retire();
                }
                _ => return Arc::clone(manager),
            }
        }

        let path = db_path.unwrap_or(&self.default_path);
        let manager = Arc::new(ConnectionManager::new(
            path,
            self.options.clone(),
            Arc::clone(&self.error_log),
        ));
        *current = Some(Arc::clone(&manager));
        manager
    }

    pub fn current(&self) -> Option<Arc<ConnectionManager>> {
        lock_unpoisoned(&self.current).clone()
    }

    pub fn default_path(&self) -> &Path {
        &self.default_path
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.error_log
    }

    /// Connection for the calling thread from the manager bound to `db_path`.
    pub fn get_db_connection(&self, db_path: Option<&Path>) -> Result<DbConnection, ConnectionError> {
        self.get_instance(db_path).get_connection()
    }

    /// Close the calling thread's connection. Does nothing when no manager
    /// has been created yet.
    pub fn close_db_connection(&self) {
        match self.current() {
            Some(manager) => manager.close_connection(),
            None => log::debug!("close_db_connection called before any database was bound"),
        }
    }

    /// Close every connection and drop the current manager. Idempotent.
    pub fn shutdown(&self) {
        let manager = lock_unpoisoned(&self.current).take();
        if let Some(manager) = manager {
            log::info!(
                "Shutting down database connections to {}",
                manager.db_path().display()
            );
            manager.retire();
        }
    }
}

impl Drop for ManagerRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
