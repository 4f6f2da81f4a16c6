//! stagekey Core - Foundational Types
//!
//! Error and configuration types shared by the stage digest engine
//! and the command line front end.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{DigestConfig, PolicyConfig};
pub use error::{DigestError, Result};

/// stagekey version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
