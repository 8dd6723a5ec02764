//! Infrastructure layer
//!
//! Environment-facing plumbing: configuration loading, logging setup,
//! data-path derivation, and atomic document I/O.

pub mod config;
pub mod fsio;
pub mod logging;
pub mod paths;

pub use config::{ConfigLoader, LoggingConfig, RuntimeConfig};
pub use paths::DataPaths;
