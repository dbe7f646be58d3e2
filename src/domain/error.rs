//! Errors surfaced by the visitor services

use crate::domain::types::CredentialField;
use crate::infra::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisitorError {
    #[error("visitor not found: {0}")]
    NotFound(String),

    #[error("{field} '{value}' is already assigned to another visitor")]
    Conflict { field: CredentialField, value: String },

    #[error("could not issue unique credentials after {attempts} attempts")]
    CredentialsExhausted { attempts: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
