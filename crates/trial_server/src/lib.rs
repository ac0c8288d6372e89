//! REST API server for the trial randomisation engine
//!
//! This crate exposes configuration lifecycle, sealed list generation,
//! subject randomisation and the design preview tool over HTTP, on top of
//! either the in-memory or the PostgreSQL store.

pub mod config;
pub mod error;
pub mod extract;
pub mod fixtures;
pub mod routes;
pub mod server;

// Re-export engine crates for integration
pub use trial_core;
pub use trial_store;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
