use crate::database::connection::lock_unpoisoned;
use crate::database::ManagerRegistry;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Recent errors kept for diagnostics. Oldest entries are evicted first.
pub struct ErrorLog {
    errors: Mutex<VecDeque<ErrorEntry>>,
    max_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub timestamp: String,
    pub command: String,
    pub error: String,
    pub context: Option<String>,
}

impl ErrorLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            errors: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }

    pub fn log_error(&self, command: &str, error: &str, context: Option<&str>) {
        let entry = ErrorEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: command.to_string(),
            error: error.to_string(),
            context: context.map(|s| s.to_string()),
        };

        log::error!("[{}] {}: {}", entry.timestamp, command, error);

        let mut errors = lock_unpoisoned(&self.errors);
        if self.max_entries == 0 {
            return;
        }
        if errors.len() >= self.max_entries {
            errors.pop_front();
        }
        errors.push_back(entry);
    }

    pub fn get_errors(&self) -> Vec<ErrorEntry> {
        lock_unpoisoned(&self.errors).iter().cloned().collect()
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.errors).clear();
    }
}

#[derive(Debug, Serialize)]
pub struct DiagnosticsReport {
    pub app_version: String,
    pub database_status: String,
    pub database_path: String,
    pub open_connections: usize,
    pub recent_errors: Vec<ErrorEntry>,
}

/// Snapshot of the database layer's health
pub fn diagnostics_report(registry: &ManagerRegistry) -> DiagnosticsReport {
    let manager = registry.current();
    let db_path = manager
        .as_ref()
        .map(|m| m.db_path().to_path_buf())
        .unwrap_or_else(|| registry.default_path().to_path_buf());
    let db_status = if db_path.exists() { "OK" } else { "NOT FOUND" };

    DiagnosticsReport {
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        database_status: db_status.to_string(),
        database_path: db_path.to_string_lossy().to_string(),
        open_connections: manager.map(|m| m.open_connections()).unwrap_or(0),
        recent_errors: registry.error_log().get_errors(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tempfile::TempDir;

    #[test]
    fn test_error_log_evicts_oldest() {
        let log = ErrorLog::new(2);
        log.log_error("close_connection", "first", None);
        log.log_error("close_connection", "second", Some("thread"));
        log.log_error("close_connection", "third", None);

        let errors = log.get_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].error, "second");
        assert_eq!(errors[0].context.as_deref(), Some("thread"));
        assert_eq!(errors[1].error, "third");

        log.clear();
        assert!(log.get_errors().is_empty());
    }

    #[test]
    fn test_report_before_and_after_bind() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig {
            database_file: temp.path().join("library.db"),
            ..AppConfig::default()
        };
        let registry = ManagerRegistry::new(&config);

        let report = diagnostics_report(&registry);
        assert_eq!(report.database_status, "NOT FOUND");
        assert_eq!(report.open_connections, 0);

        registry.get_db_connection(None).unwrap();
        let report = diagnostics_report(&registry);
        assert_eq!(report.database_status, "OK");
        assert_eq!(report.open_connections, 1);
        assert!(report.database_path.ends_with("library.db"));
    }
}
