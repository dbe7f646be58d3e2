//! Services - business logic over the visitor store
//!
//! This module contains the two request-facing services:
//! - `directory` - Resident-facing visitor registration and listing
//! - `security` - Security-facing check-in lookups and arrival confirmation

pub mod directory;
pub mod security;

// Re-export commonly used types
pub use directory::VisitorDirectory;
pub use security::SecurityDesk;
