//! # Standardized Error Types
//!
//! The error type shared by the health monitor crates. Probe failures are
//! never represented with this type (they are status data); it covers the
//! operations that can genuinely fail, such as remediation hooks and
//! logging setup.

use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categorizes different kinds of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Initialization error (logging, runtime, listeners)
    Initialization,
    /// Invalid or inconsistent configuration
    Configuration,
    /// Error in communication with another service
    Communication,
    /// Operation exceeded its time budget
    Timeout,
    /// Input/output error
    IO,
    /// Resource unavailable or service degraded
    Unavailable,
    /// Internal error
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Initialization => write!(f, "Initialization Error"),
            ErrorKind::Configuration => write!(f, "Configuration Error"),
            ErrorKind::Communication => write!(f, "Communication Error"),
            ErrorKind::Timeout => write!(f, "Timeout Error"),
            ErrorKind::IO => write!(f, "I/O Error"),
            ErrorKind::Unavailable => write!(f, "Service Unavailable Error"),
            ErrorKind::Internal => write!(f, "Internal Error"),
        }
    }
}

/// Core error type
#[derive(Debug)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Detailed error message
    pub message: String,
    /// The time when the error occurred
    pub timestamp: DateTime<Utc>,
    /// Flag indicating if this is a transient error that might succeed on retry
    pub transient: bool,
    /// Underlying cause
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the specified kind and message
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            transient: false,
            cause: None,
        }
    }

    /// Chains this error with its cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Marks this error as transient (can be retried)
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Returns true if this error is transient and might succeed on retry
    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl Clone for Error {
    /// The opaque cause is dropped on clone.
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            timestamp: self.timestamp,
            transient: self.transient,
            cause: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let transient = matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        );
        let error = Self::new(ErrorKind::IO, err.to_string()).cause(err);
        if transient {
            error.transient()
        } else {
            error
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::Communication
        } else {
            ErrorKind::Unavailable
        };

        let transient = err.is_timeout()
            || err.is_connect()
            || err.status().map_or(false, |s| s.is_server_error());

        let error = Self::new(kind, format!("HTTP request error: {}", err)).cause(err);
        if transient {
            error.transient()
        } else {
            error
        }
    }
}
