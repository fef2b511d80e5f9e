use thiserror::Error;

use crate::sync::SyncProgress;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while syncing or
/// querying a taxa dataset. It uses the `thiserror` crate for ergonomic error
/// handling and automatic conversion from underlying library errors.
///
/// # Error Conversion
///
/// Most local errors automatically convert from their source types using the
/// `#[from]` attribute:
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
/// - `std::io::Error` → `AppError::Io`
///
/// Remote failures are classified by the API client into the transient
/// variants (`NetworkError`, `Timeout`, `RateLimitExceeded`, `ServerError`),
/// which are retried, and `ClientError`, which is not.
///
/// # Examples
///
/// ```no_run
/// use taxa_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::ValidationError("unknown rank: clade".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// This error wraps all errors from SQLx operations against the SQLite
    /// dataset, including open failures, query errors, and constraint violations.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The configuration file is missing, unreadable or invalid.
    ///
    /// Always reported before any remote call is made.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Remote API rejected the request or returned something unusable.
    ///
    /// This is a permanent failure and is never retried.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// Remote API returned a 5xx status.
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Network or connection error.
    ///
    /// This error occurs when a network request fails due to connectivity issues,
    /// DNS resolution failures, or the remote server being unreachable.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    ///
    /// This error occurs when a request takes longer than the configured timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded (HTTP 429).
    #[error("Rate limit exceeded: 429 Too Many Requests")]
    RateLimitExceeded,

    /// Malformed input to an operation: a taxon record without id/name/rank,
    /// an unknown rank, an ambiguous or missing taxon, or an invalid breakdown
    /// level ordering.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The finished dataset could not be swapped into place.
    ///
    /// The staging file has been removed and the previously published dataset
    /// is left at its original path.
    #[error("Failed to replace database: {0}")]
    PublishError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Local filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sync was cancelled before the dataset was published.
    #[error("Sync interrupted after {0}")]
    Interrupted(SyncProgress),

    /// The sync did not finish within its wall-clock limit.
    #[error("Sync exceeded its {secs}s limit after {progress}")]
    DeadlineExceeded { secs: u64, progress: SyncProgress },
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("no such table") {
                    "The database has no taxa tables.\n   Run 'taxa sync' first to build it."
                        .to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::ConfigError(msg) => format!("Invalid configuration: {}", msg),
            AppError::ClientError(msg) => {
                if msg.contains("404") {
                    format!("{}\n   Check the taxon and place IDs in your config.", msg)
                } else {
                    format!("API error: {}", msg)
                }
            }
            AppError::ServerError(status) => {
                format!(
                    "iNaturalist returned HTTP {}.\n   The service may be down. Try again later.",
                    status
                )
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!(
                    "Request timed out after {} seconds.\n   The server may be overloaded. Try again later.",
                    secs
                )
            }
            AppError::RateLimitExceeded => {
                "Too many requests to iNaturalist. Please wait a moment and try again.".to_string()
            }
            AppError::Interrupted(progress) => {
                format!(
                    "Sync interrupted ({}).\n   Nothing was published; the previous database was left untouched.",
                    progress
                )
            }
            AppError::DeadlineExceeded { secs, progress } => {
                format!(
                    "Sync did not finish within the {}s limit set by --timeout ({}).\n   \
                     Nothing was published. Raise --timeout or sync fewer taxa.",
                    secs, progress
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// Network failures, timeouts, server errors and rate limits are transient.
    /// A client error whose message carries a rate-limit marker is treated the
    /// same way.
    ///
    /// # Examples
    ///
    /// ```
    /// use taxa_core::error::AppError;
    ///
    /// // Network errors are retryable
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// // Rate limits are retryable (after a delay)
    /// let err = AppError::RateLimitExceeded;
    /// assert!(err.is_retryable());
    ///
    /// // Validation failures are NOT retryable
    /// let err = AppError::ValidationError("bad rank".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::ServerError(_) => true,
            // Only a leading status marker counts; the rest of the message
            // may carry a URL with arbitrary digits.
            AppError::ClientError(msg) => {
                msg.starts_with("HTTP 429")
                    || msg.starts_with("429 ")
                    || msg.contains("Too Many Requests")
            }
            _ => false,
        }
    }

    /// Returns true for errors that indicate a bad configuration file.
    pub fn is_config_error(&self) -> bool {
        matches!(self, AppError::ConfigError(_))
    }
}
