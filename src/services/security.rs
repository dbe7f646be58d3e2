//! Security desk - check-in lookups and arrival confirmation
//!
//! Lookups report a miss as `None`; only arrival confirmation on an unknown
//! id is an error (`VisitorError::NotFound`).

use crate::domain::error::VisitorError;
use crate::domain::types::{Visitor, VisitorId};
use crate::infra::metrics::{LookupKind, Metrics};
use crate::infra::store::VisitorStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

pub struct SecurityDesk {
    store: Arc<dyn VisitorStore>,
    metrics: Arc<Metrics>,
}

impl SecurityDesk {
    pub fn new(store: Arc<dyn VisitorStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Scan check-in: exact, case-sensitive QR token match
    pub fn find_by_token(&self, token: &str) -> Option<Visitor> {
        let visitor = self.store.find_by_token(token);
        self.record_lookup(LookupKind::Token, visitor.as_ref());
        visitor
    }

    /// OTP check-in: exact code match
    pub fn find_by_otp(&self, otp: &str) -> Option<Visitor> {
        let visitor = self.store.find_by_otp(otp);
        self.record_lookup(LookupKind::Otp, visitor.as_ref());
        visitor
    }

    /// Case-insensitive name search returning the oldest matching visitor
    pub fn search_by_name(&self, query: &str) -> Option<Visitor> {
        let visitor = self.store.find_by_name(query).into_iter().next();
        self.record_lookup(LookupKind::Name, visitor.as_ref());
        visitor
    }

    /// Every visitor whose name contains `query`, ascending id order
    pub fn search_all_by_name(&self, query: &str) -> Vec<Visitor> {
        let visitors = self.store.find_by_name(query);
        self.record_lookup(LookupKind::Name, visitors.first());
        visitors
    }

    /// Mark a visitor as arrived. Confirming twice is not an error; the
    /// original arrival time is kept.
    pub fn confirm_arrival(&self, id: VisitorId) -> Result<Visitor, VisitorError> {
        let now = Utc::now();
        let mut transitioned = false;

        let updated = self.store.update(id, &mut |visitor: &mut Visitor| {
            transitioned = visitor.mark_arrived(now);
        })?;

        match updated {
            Some(visitor) => {
                self.metrics.record_arrival(transitioned);
                if transitioned {
                    info!(visitor_id = %id, "visitor_arrived");
                } else {
                    debug!(visitor_id = %id, "visitor_already_arrived");
                }
                Ok(visitor)
            }
            None => {
                debug!(visitor_id = %id, "arrival_unknown_visitor");
                Err(VisitorError::NotFound(format!("no visitor with id {id}")))
            }
        }
    }

    fn record_lookup(&self, kind: LookupKind, visitor: Option<&Visitor>) {
        self.metrics.record_lookup(kind, visitor.is_some());
        match visitor {
            Some(visitor) => debug!(kind = %kind.as_str(), visitor_id = %visitor.id, "lookup_hit"),
            None => debug!(kind = %kind.as_str(), "lookup_miss"),
        }
    }
}
