use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Provider error during {phase}: {source}")]
    Provider {
        phase: String,
        #[source]
        source: ProviderError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Illegal state transitions and uniqueness violations
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("contradiction {contradiction_id} is already resolved ({status})")]
    AlreadyResolved {
        contradiction_id: String,
        status: String,
    },

    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("stress test {stress_test_id} is running and cannot be deleted")]
    StressTestRunning { stress_test_id: String },

    #[error("duplicate {entity}: {message}")]
    Duplicate {
        entity: &'static str,
        message: String,
    },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors raised by the reasoning and market-data providers
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Provider not configured: {message}")]
    NotConfigured { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    /// Shorthand for a scoped lookup miss.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for malformed input.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a provider failure with the phase it happened in.
    pub fn provider(phase: impl Into<String>, source: ProviderError) -> Self {
        AppError::Provider {
            phase: phase.into(),
            source,
        }
    }

    /// True for every `Conflict`-class error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }

    /// True for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(StorageError::Sqlx(err))
    }
}

/// Returns true when a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;
