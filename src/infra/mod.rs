//! Infrastructure - configuration, metrics, and storage
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `store` - Visitor store capability and its in-memory implementation

pub mod config;
pub mod metrics;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use metrics::{LookupKind, Metrics};
pub use store::{MemoryStore, StoreError, VisitorStore};
