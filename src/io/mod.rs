//! IO modules - external interfaces
//!
//! - `api` - HTTP routing and JSON responses for the resident and security endpoints
//! - `server` - hyper accept loop serving the API
//! - `client` - reqwest client for the API (CLI and integration tests)
//! - `journal` - append-only JSONL persistence for the visitor store
//! - `prometheus` - Prometheus text rendering for `/metrics`

pub mod api;
pub mod client;
pub mod journal;
pub mod prometheus;
pub mod server;

// Re-export commonly used types
pub use api::{ApiError, ApiState};
pub use client::ApiClient;
pub use journal::{Journal, JournalEntry};
pub use server::start_api_server;
