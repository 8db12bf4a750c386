//! Error types for dbkit.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Engine, registry and group failures share [`DbError`]; the HTTP helper has its
//! own [`HttpError`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Driver error: {message}")]
    Driver { message: String, suggestion: String },

    #[error("Invalid engine name: {message}")]
    InvalidName { message: String },

    #[error("Failed to register engine '{name}': {source}")]
    Registration {
        name: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Engine not found: {name}")]
    NotFound { name: String },

    #[error("Engine '{name}' is already registered")]
    AlreadyExists { name: String },

    #[error("Invalid engine group: {message}")]
    GroupConstruction { message: String },

    /// Engine was closed; `dsn` is always masked
    #[error("Engine is closed: {dsn}")]
    Closed { dsn: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a driver error with a helpful suggestion.
    pub fn driver(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid engine name error.
    pub fn invalid_name(message: impl Into<String>) -> Self {
        Self::InvalidName {
            message: message.into(),
        }
    }

    /// Wrap the cause of a failed registration.
    pub fn registration(name: impl Into<String>, source: DbError) -> Self {
        Self::Registration {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create an engine not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create an already registered error.
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    /// Create an engine group construction error.
    pub fn group_construction(message: impl Into<String>) -> Self {
        Self::GroupConstruction {
            message: message.into(),
        }
    }

    /// Create a closed engine error.
    pub fn closed(dsn: impl Into<String>) -> Self {
        Self::Closed { dsn: dsn.into() }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Driver { suggestion, .. } => Some(suggestion),
            Self::Registration { source, .. } => source.suggestion(),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::driver(
                msg.to_string(),
                "Check the connection parameters and credentials",
            ),
            sqlx::Error::Database(db_err) => DbError::driver(
                db_err.message(),
                "Check the SQL syntax and referenced objects",
            ),
            sqlx::Error::PoolTimedOut => DbError::driver(
                "Timed out acquiring a connection from the pool",
                "Increase max_open_conns or check for leaked connections",
            ),
            sqlx::Error::PoolClosed => {
                DbError::driver("Connection pool is closed", "Open a new engine")
            }
            sqlx::Error::Io(io_err) => DbError::driver(
                format!("I/O error: {}", io_err),
                "Check network connectivity and MySQL server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::driver(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::driver(
                format!("Protocol error: {}", msg),
                "Check MySQL server compatibility",
            ),
            _ => DbError::driver(
                format!("Unknown database error: {}", err),
                "Check the MySQL driver configuration",
            ),
        }
    }
}

/// Result type alias for engine operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Unsupported HTTP method: {method}")]
    InvalidMethod { method: String },

    #[error("Invalid request URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl HttpError {
    /// Create an unsupported method error.
    pub fn invalid_method(method: impl Into<String>) -> Self {
        Self::InvalidMethod {
            method: method.into(),
        }
    }

    /// Create an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for HTTP helper operations.
pub type HttpResult<T> = Result<T, HttpError>;
