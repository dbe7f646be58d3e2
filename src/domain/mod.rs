//! Domain models - visitor records and their invariants
//!
//! This module contains the canonical data types used throughout the system:
//! - `Visitor` - a registered guest with check-in credentials and arrival flag
//! - `VisitorTemplate` - saved details for recurring visitors
//! - `CredentialIssuer` - QR token and OTP generation
//! - `VisitorError` - failures reported by the services

pub mod credentials;
pub mod error;
pub mod types;

// Re-export commonly used types at module level
pub use credentials::CredentialIssuer;
pub use error::VisitorError;
pub use types::{
    CredentialField, NewVisitor, NewVisitorTemplate, TemplateId, Visitor, VisitorDraft,
    VisitorId, VisitorTemplate,
};
