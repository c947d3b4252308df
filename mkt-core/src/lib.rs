//! Marketplace Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other marketplace crates:
//! - Application configuration (database, logging, realtime, messaging limits)
//! - The unified error type, including the booking/review/messaging outcome taxonomy
//! - Structured logging with tracing
//! - Platform data directories
//! - Common constants

pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle};
pub use error::{MktError, MktResult};
pub use logging::init_logging;
pub use platform::Platform;
