use std::fmt;

/// Error kinds surfaced by every repository, the migration engine, and the
/// inspector. Mirrors the propagation policy: repositories return these
/// unchanged; only the legacy compatibility adapter translates them into the
/// legacy flat-API error contract.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Malformed external data (empty label, invalid date, negative `days`).
    /// Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Id or key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint race. Repositories retry once before surfacing this.
    #[error("conflict: {0}")]
    Conflict(String),

    /// `SQLITE_BUSY`, deadlock, connection reset. The migration worker
    /// retries with exponential backoff; other callers retry once then fail.
    #[error("transient error: {0}")]
    Transient(String),

    /// `PRAGMA quick_check` returned non-ok, or validation mismatch.
    /// Surfaced to the UI with remediation guidance; blocks cutover.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// I/O on a closed database, panic from the driver. Logged and
    /// propagated; the migration engine marks itself `failed`.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// An operation was requested against the migration state machine that
    /// is not reachable from its current state.
    #[error("invalid transition: {from} -> {attempted}")]
    InvalidTransition { from: String, attempted: String },
}

impl StoreError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        StoreError::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        StoreError::NotFound(msg.into())
    }

    /// True if a caller may usefully retry the operation once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Transient(_))
    }

    /// The legacy flat API reports missing rows as `"sql: no rows"`, matching
    /// the historical Go driver's sentinel string rather than a structured
    /// error. Used only at the `legacy::adapter` boundary.
    pub fn into_legacy_message(self) -> String {
        match self {
            StoreError::NotFound(_) => "sql: no rows".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound("sql: no rows".to_string())
            }
            rusqlite::Error::SqliteFailure(e, ref msg)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StoreError::Transient(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            rusqlite::Error::SqliteFailure(e, ref msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            other => StoreError::Fatal(other.to_string()),
        }
    }
}

impl From<mysql_async::Error> for StoreError {
    fn from(err: mysql_async::Error) -> Self {
        match &err {
            mysql_async::Error::Server(server_err) if server_err.code == 1062 => {
                StoreError::Conflict(server_err.message.clone())
            }
            mysql_async::Error::Server(server_err)
                if server_err.code == 1213 || server_err.code == 1205 =>
            {
                StoreError::Transient(server_err.message.clone())
            }
            mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Fatal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A named check used by migration prerequisites and, more generally,
/// anywhere a component needs to report "this passed/failed, here's why" at
/// a given severity without aborting the rest of the checks.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Check {
    pub name: String,
    pub ok: bool,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}/{}] {}: {}",
            self.severity,
            if self.ok { "ok" } else { "fail" },
            self.name,
            self.detail
        )
    }
}
