use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub record_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_size_mb: f64,
    pub table_count: usize,
    pub total_records: i64,
    pub last_backup: Option<String>,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    pub name: String,
    pub record_count: i64,
    pub last_updated: Option<String>,
}

/// Result of a read-only console query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub logs_removed: usize,
    pub notifications_removed: usize,
}

impl CleanupReport {
    pub fn cleaned_records(&self) -> usize {
        self.logs_removed + self.notifications_removed
    }
}
