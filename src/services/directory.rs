//! Visitor directory - resident-facing registration and listing

use crate::domain::credentials::CredentialIssuer;
use crate::domain::error::VisitorError;
use crate::domain::types::{CredentialField, NewVisitor, Visitor, VisitorDraft};
use crate::infra::metrics::Metrics;
use crate::infra::store::{StoreError, VisitorStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct VisitorDirectory {
    store: Arc<dyn VisitorStore>,
    issuer: CredentialIssuer,
    metrics: Arc<Metrics>,
}

impl VisitorDirectory {
    pub fn new(store: Arc<dyn VisitorStore>, issuer: CredentialIssuer, metrics: Arc<Metrics>) -> Self {
        Self { store, issuer, metrics }
    }

    /// Register a visitor.
    ///
    /// Field contents are stored as given. Missing credentials are issued;
    /// a caller-supplied credential that is already in use is a conflict.
    pub fn add_visitor(&self, request: NewVisitor) -> Result<Visitor, VisitorError> {
        let supplied_token = request.qr_token.filter(|token| !token.is_empty());
        let supplied_otp = request.otp.filter(|otp| !otp.is_empty());

        for attempt in 1..=self.issuer.max_attempts() {
            let draft = VisitorDraft {
                name: request.name.clone(),
                phone: request.phone.clone(),
                qr_token: supplied_token.clone().unwrap_or_else(|| self.issuer.issue_qr_token()),
                otp: supplied_otp.clone().unwrap_or_else(|| self.issuer.issue_otp()),
            };

            match self.store.insert(draft) {
                Ok(visitor) => {
                    self.metrics.record_visitor_created();
                    info!(
                        visitor_id = %visitor.id,
                        token_issued = %supplied_token.is_none(),
                        otp_issued = %supplied_otp.is_none(),
                        "visitor_created"
                    );
                    return Ok(visitor);
                }
                Err(StoreError::Duplicate { field, value }) => {
                    let issued = match field {
                        CredentialField::QrToken => supplied_token.is_none(),
                        CredentialField::Otp => supplied_otp.is_none(),
                    };
                    if !issued {
                        self.metrics.record_credential_conflict();
                        warn!(field = %field, "visitor_credential_conflict");
                        return Err(VisitorError::Conflict { field, value });
                    }
                    self.metrics.record_credential_reissue();
                    debug!(field = %field, attempt = %attempt, "credential_reissued");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts = %self.issuer.max_attempts(), "credential_issue_exhausted");
        Err(VisitorError::CredentialsExhausted { attempts: self.issuer.max_attempts() })
    }

    /// Every visitor, ascending id order
    pub fn list_visitors(&self) -> Vec<Visitor> {
        self.store.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::VisitorId;
    use crate::infra::store::MemoryStore;

    fn directory_with(issuer: CredentialIssuer) -> (VisitorDirectory, Arc<MemoryStore>, Arc<Metrics>) {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new());
        let directory = VisitorDirectory::new(store.clone(), issuer, metrics.clone());
        (directory, store, metrics)
    }

    #[test]
    fn test_add_visitor_keeps_supplied_fields() {
        let (directory, _, metrics) = directory_with(CredentialIssuer::default());

        let visitor = directory
            .add_visitor(NewVisitor::new("Alice Smith", "555-0100").with_qr_token("QR1").with_otp("1234"))
            .unwrap();

        assert_eq!(visitor.id, VisitorId(1));
        assert_eq!(visitor.name, "Alice Smith");
        assert_eq!(visitor.phone, "555-0100");
        assert_eq!(visitor.qr_token, "QR1");
        assert_eq!(visitor.otp, "1234");
        assert!(!visitor.arrived);
        assert_eq!(metrics.snapshot().visitors_created, 1);
    }

    #[test]
    fn test_missing_credentials_are_issued() {
        let (directory, _, _) = directory_with(CredentialIssuer::new(6, 8));

        let visitor = directory.add_visitor(NewVisitor::new("Bob", "")).unwrap();
        assert_eq!(visitor.qr_token.len(), 36);
        assert_eq!(visitor.otp.len(), 6);

        // Empty strings count as missing
        let payload = NewVisitor::new("Carol", "").with_qr_token("").with_otp("");
        let carol = directory.add_visitor(payload).unwrap();
        assert!(!carol.qr_token.is_empty());
        assert!(!carol.otp.is_empty());
    }

    #[test]
    fn test_supplied_duplicate_is_conflict() {
        let (directory, store, metrics) = directory_with(CredentialIssuer::default());
        directory.add_visitor(NewVisitor::new("Alice", "").with_qr_token("QR1")).unwrap();

        let err = directory.add_visitor(NewVisitor::new("Mallory", "").with_qr_token("QR1")).unwrap_err();
        match err {
            VisitorError::Conflict { field, value } => {
                assert_eq!(field, CredentialField::QrToken);
                assert_eq!(value, "QR1");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.len(), 1);
        assert_eq!(metrics.snapshot().credential_conflicts, 1);
    }

    #[test]
    fn test_issued_otp_avoids_existing_codes() {
        // Fill all but one four-digit OTP so the issuer must retry
        let (directory, store, _) = directory_with(CredentialIssuer::new(4, 200_000));
        for code in 1000..9999u32 {
            store
                .insert(VisitorDraft {
                    name: format!("v{code}"),
                    phone: String::new(),
                    qr_token: format!("T{code}"),
                    otp: code.to_string(),
                })
                .unwrap();
        }

        let visitor = directory.add_visitor(NewVisitor::new("Last", "")).unwrap();
        assert_eq!(visitor.otp, "9999");
    }

    #[test]
    fn test_exhausted_when_no_otp_left() {
        let (directory, store, _) = directory_with(CredentialIssuer::new(4, 3));
        for code in 1000..=9999u32 {
            store
                .insert(VisitorDraft {
                    name: String::new(),
                    phone: String::new(),
                    qr_token: format!("T{code}"),
                    otp: code.to_string(),
                })
                .unwrap();
        }

        let err = directory.add_visitor(NewVisitor::new("Late", "")).unwrap_err();
        assert!(matches!(err, VisitorError::CredentialsExhausted { attempts: 3 }));
    }

    #[test]
    fn test_list_visitors_in_id_order() {
        let (directory, _, _) = directory_with(CredentialIssuer::default());
        assert!(directory.list_visitors().is_empty());

        for name in ["Alice", "Bob", "Carol"] {
            directory.add_visitor(NewVisitor::new(name, "")).unwrap();
        }
        let ids: Vec<u64> = directory.list_visitors().iter().map(|v| v.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
