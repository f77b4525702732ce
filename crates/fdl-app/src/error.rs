//! Error types for the application runtimes.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use thiserror::Error;

use fdl_protocol::SessionError;

// ============================================================================
// App Error Type
// ============================================================================

/// Errors that end a publisher or subscriber run.
#[derive(Error, Debug)]
pub enum AppError {
    /// The session with the peer failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// No catalog with this family name.
    #[error("Unknown catalog: {0}")]
    UnknownCatalog(String),

    /// A configuration value could not be used.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Shutdown was requested before the session was established.
    #[error("Cancelled before the session was established")]
    Cancelled,
}

/// Convenience Result type alias for application operations.
pub type Result<T> = std::result::Result<T, AppError>;
