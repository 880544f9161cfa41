use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the connection manager.
///
/// `Open` is always propagated to the caller. `Close` is only ever produced
/// internally during teardown, where it is logged and swallowed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to close database connection: {0}")]
    Close(#[source] rusqlite::Error),

    #[error("database connection has been closed")]
    Closed,

    #[error("connection manager for {} has been replaced", path.display())]
    Retired { path: PathBuf },

    #[error("{0}")]
    Query(#[from] rusqlite::Error),
}

/// Request-level error surfaced to the hosting web layer.
///
/// Serializes as a plain string so JSON handlers can return it as-is, while
/// Rust code keeps typed variants that can be matched or propagated with `?`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// HTTP-class status the web layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::Forbidden(_) | AppError::Other(_) => 400,
            AppError::Database(_) | AppError::Io(_) | AppError::Json(_) => 500,
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<ConnectionError> for AppError {
    fn from(e: ConnectionError) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_maps_to_server_error() {
        let err: AppError = ConnectionError::Closed.into();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "database connection has been closed");
    }

    #[test]
    fn test_app_error_serializes_as_plain_string() {
        let err = AppError::NotFound("table logs".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Not found: table logs\"");
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_str_coerces_to_bad_request() {
        let err: AppError = "empty query".into();
        assert_eq!(err.status_code(), 400);
    }
}
