//! Error types for roadmate.
//!
//! Telemetry and notification paths never fail; these errors come from
//! configuration, trip loading, the document brokers, and ledger input checks.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for roadmate operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Trip Errors ===
    /// A trip definition could not be read or parsed.
    #[error("failed to load trip from {path}: {message}")]
    TripLoad {
        /// Path of the trip file.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    // === Sensor Errors ===
    /// A recorded position sample could not be parsed.
    #[error("bad position sample on line {line}: {message}")]
    SampleParse {
        /// 1-based line number in the sample file.
        line: usize,
        /// Description of what went wrong.
        message: String,
    },

    // === Ledger Errors ===
    /// The payer is not part of the trip's member set.
    #[error("unknown member '{name}'")]
    UnknownMember {
        /// The rejected payer name.
        name: String,
    },

    /// An expense amount was rejected.
    #[error("invalid amount {amount}: amounts are whole, non-negative units")]
    InvalidAmount {
        /// The rejected amount.
        amount: i64,
    },

    // === Broker Errors ===
    /// The document broker rejected or could not perform a write.
    #[error("broker '{name}' error: {message}")]
    Broker {
        /// Name of the broker backend.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// Failed to open or create the shared database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for roadmate operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new broker error.
    #[must_use]
    pub fn broker(name: &'static str, message: impl Into<String>) -> Self {
        Self::Broker {
            name,
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a trip loading error.
    #[must_use]
    pub fn trip_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::TripLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error came from a document broker.
    #[must_use]
    pub fn is_broker_error(&self) -> bool {
        matches!(
            self,
            Self::Broker { .. }
                | Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
        )
    }

    /// Check if this error is a rejected ledger input.
    #[must_use]
    pub fn is_ledger_input_error(&self) -> bool {
        matches!(self, Self::UnknownMember { .. } | Self::InvalidAmount { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::broker("memory", "offline");
        assert_eq!(err.to_string(), "broker 'memory' error: offline");

        let err = Error::internal("bad state");
        assert_eq!(err.to_string(), "internal error: bad state");
    }

    #[test]
    fn test_unknown_member_display() {
        let err = Error::UnknownMember {
            name: "Mallory".to_string(),
        };
        assert_eq!(err.to_string(), "unknown member 'Mallory'");
        assert!(err.is_ledger_input_error());
        assert!(!err.is_broker_error());
    }

    #[test]
    fn test_invalid_amount_display() {
        let err = Error::InvalidAmount { amount: -5 };
        assert!(err.to_string().contains("-5"));
        assert!(err.is_ledger_input_error());
    }

    #[test]
    fn test_trip_load_display() {
        let err = Error::trip_load("/trips/kyushu.json", "missing field `waypoints`");
        let msg = err.to_string();
        assert!(msg.contains("/trips/kyushu.json"));
        assert!(msg.contains("waypoints"));
    }

    #[test]
    fn test_sample_parse_display() {
        let err = Error::SampleParse {
            line: 3,
            message: "expected value".to_string(),
        };
        assert_eq!(err.to_string(), "bad position sample on line 3: expected value");
    }

    #[test]
    fn test_is_broker_error() {
        assert!(Error::broker("sqlite", "locked").is_broker_error());
        assert!(Error::DatabaseMigration {
            message: "version mismatch".to_string()
        }
        .is_broker_error());
        assert!(!Error::internal("x").is_broker_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/trip.db",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
            assert!(err.is_broker_error());
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "planning_speed_kmh must be positive".to_string(),
        };
        assert!(err.to_string().contains("planning_speed_kmh"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
