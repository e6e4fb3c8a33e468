//! econfmanager basic library
//!
//! Provides the functions shared by the library and its tools:
//! - logging initialisation (console + rolling file)
//! - graceful shutdown signal handling
//! - hex encoding and serde helpers for parameter values

pub mod hex;
pub mod logging;
pub mod serde_helpers;
pub mod shutdown;

// Re-export common dependencies
pub use tokio;
pub use tracing;
