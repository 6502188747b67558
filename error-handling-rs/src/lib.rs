//! # Error Handling Framework
//!
//! Shared plumbing for the health monitor workspace:
//!
//! - A standardized error type with a transient flag
//! - Structured logging initialisation (console + optional rolling file)
//! - Retry with exponential backoff and jitter

pub mod types;
pub mod logging;
pub mod retry;

// Re-export commonly used types
pub use types::{Error, Result, ErrorKind};
pub use logging::{init_logging, LoggingConfig};
pub use retry::{retry, RetryPolicy};
