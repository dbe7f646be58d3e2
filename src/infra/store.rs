//! Visitor store - the one shared resource behind both services
//!
//! `VisitorStore` is the capability the services depend on. `MemoryStore` is
//! the implementation: an in-memory table with secondary indexes on the check-in
//! credentials, optionally backed by a JSONL [`Journal`] for durability.
//!
//! Every operation takes the lock once, so each call is atomic with respect
//! to the others. Credential uniqueness is enforced here, at write time.

use crate::domain::types::{
    CredentialField, NewVisitorTemplate, TemplateId, Visitor, VisitorDraft, VisitorId,
    VisitorTemplate,
};
use crate::io::journal::{Journal, JournalEntry};
use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {field}: '{value}'")]
    Duplicate { field: CredentialField, value: String },

    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("journal line {line} is corrupt: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage capability used by the directory and security services
pub trait VisitorStore: Send + Sync {
    /// Insert a new visitor; the store assigns the id and creation time.
    /// Fails with [`StoreError::Duplicate`] if a credential is already taken.
    fn insert(&self, draft: VisitorDraft) -> Result<Visitor, StoreError>;

    fn get(&self, id: VisitorId) -> Option<Visitor>;

    /// Apply `change` to the visitor with `id` and persist the result.
    /// Returns `Ok(None)` if no such visitor exists. The id is not changeable.
    fn update(
        &self,
        id: VisitorId,
        change: &mut dyn FnMut(&mut Visitor),
    ) -> Result<Option<Visitor>, StoreError>;

    /// Exact, case-sensitive match on the QR token
    fn find_by_token(&self, token: &str) -> Option<Visitor>;

    /// Exact match on the OTP
    fn find_by_otp(&self, otp: &str) -> Option<Visitor>;

    /// Case-insensitive substring match on the name, ascending id order
    fn find_by_name(&self, query: &str) -> Vec<Visitor>;

    /// All visitors, ascending id order
    fn list(&self) -> Vec<Visitor>;

    fn insert_template(&self, template: NewVisitorTemplate) -> Result<VisitorTemplate, StoreError>;

    fn list_templates(&self) -> Vec<VisitorTemplate>;
}

#[derive(Default)]
struct Tables {
    visitors: BTreeMap<VisitorId, Visitor>,
    by_token: FxHashMap<String, VisitorId>,
    by_otp: FxHashMap<String, VisitorId>,
    templates: BTreeMap<TemplateId, VisitorTemplate>,
    last_visitor_id: u64,
    last_template_id: u64,
}

impl Tables {
    /// Which credential of `visitor` is already held by a different record
    fn credential_clash(&self, visitor: &Visitor) -> Option<(CredentialField, String)> {
        if let Some(owner) = self.by_token.get(&visitor.qr_token) {
            if *owner != visitor.id {
                return Some((CredentialField::QrToken, visitor.qr_token.clone()));
            }
        }
        if let Some(owner) = self.by_otp.get(&visitor.otp) {
            if *owner != visitor.id {
                return Some((CredentialField::Otp, visitor.otp.clone()));
            }
        }
        None
    }

    /// Insert or replace a visitor and keep the indexes in step
    fn put_visitor(&mut self, visitor: Visitor) {
        if let Some(previous) = self.visitors.get(&visitor.id) {
            if previous.qr_token != visitor.qr_token {
                self.by_token.remove(&previous.qr_token);
            }
            if previous.otp != visitor.otp {
                self.by_otp.remove(&previous.otp);
            }
        }
        self.by_token.insert(visitor.qr_token.clone(), visitor.id);
        self.by_otp.insert(visitor.otp.clone(), visitor.id);
        self.last_visitor_id = self.last_visitor_id.max(visitor.id.0);
        self.visitors.insert(visitor.id, visitor);
    }

    fn put_template(&mut self, template: VisitorTemplate) {
        self.last_template_id = self.last_template_id.max(template.id.0);
        self.templates.insert(template.id, template);
    }
}

/// In-memory visitor store with an optional write-through journal
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    journal: Option<Journal>,
}

impl MemoryStore {
    /// Memory-only store (contents are lost on restart)
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSONL journal, rebuilt from the journal's contents
    pub fn open<P: AsRef<Path>>(journal_path: P) -> Result<Self, StoreError> {
        let journal = Journal::new(journal_path);
        let mut tables = Tables::default();

        for entry in journal.replay()? {
            match entry {
                JournalEntry::Visitor { visitor } => tables.put_visitor(visitor),
                JournalEntry::Template { template } => tables.put_template(template),
            }
        }

        info!(
            visitors = %tables.visitors.len(),
            templates = %tables.templates.len(),
            journal = %journal.path().display(),
            "store_opened"
        );

        Ok(Self { tables: RwLock::new(tables), journal: Some(journal) })
    }

    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    pub fn len(&self) -> usize {
        self.tables.read().visitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        match &self.journal {
            Some(journal) => journal.append(entry),
            None => Ok(()),
        }
    }
}

impl VisitorStore for MemoryStore {
    fn insert(&self, draft: VisitorDraft) -> Result<Visitor, StoreError> {
        let mut tables = self.tables.write();

        let id = VisitorId(tables.last_visitor_id + 1);
        let visitor = Visitor::from_draft(id, draft, Utc::now());
        if let Some((field, value)) = tables.credential_clash(&visitor) {
            return Err(StoreError::Duplicate { field, value });
        }

        // Journal first so a failed write leaves the table untouched
        self.persist(&JournalEntry::Visitor { visitor: visitor.clone() })?;
        tables.put_visitor(visitor.clone());

        debug!(visitor_id = %id, "visitor_inserted");
        Ok(visitor)
    }

    fn get(&self, id: VisitorId) -> Option<Visitor> {
        self.tables.read().visitors.get(&id).cloned()
    }

    fn update(
        &self,
        id: VisitorId,
        change: &mut dyn FnMut(&mut Visitor),
    ) -> Result<Option<Visitor>, StoreError> {
        let mut tables = self.tables.write();

        let Some(current) = tables.visitors.get(&id) else {
            return Ok(None);
        };

        let mut updated = current.clone();
        change(&mut updated);
        updated.id = id;

        if updated == *current {
            return Ok(Some(updated));
        }
        if let Some((field, value)) = tables.credential_clash(&updated) {
            return Err(StoreError::Duplicate { field, value });
        }

        self.persist(&JournalEntry::Visitor { visitor: updated.clone() })?;
        tables.put_visitor(updated.clone());

        debug!(visitor_id = %id, "visitor_updated");
        Ok(Some(updated))
    }

    fn find_by_token(&self, token: &str) -> Option<Visitor> {
        let tables = self.tables.read();
        tables.by_token.get(token).and_then(|id| tables.visitors.get(id)).cloned()
    }

    fn find_by_otp(&self, otp: &str) -> Option<Visitor> {
        let tables = self.tables.read();
        tables.by_otp.get(otp).and_then(|id| tables.visitors.get(id)).cloned()
    }

    fn find_by_name(&self, query: &str) -> Vec<Visitor> {
        let needle = query.to_lowercase();
        self.tables
            .read()
            .visitors
            .values()
            .filter(|visitor| visitor.name_matches(&needle))
            .cloned()
            .collect()
    }

    fn list(&self) -> Vec<Visitor> {
        self.tables.read().visitors.values().cloned().collect()
    }

    fn insert_template(&self, template: NewVisitorTemplate) -> Result<VisitorTemplate, StoreError> {
        let mut tables = self.tables.write();

        let template = VisitorTemplate {
            id: TemplateId(tables.last_template_id + 1),
            name: template.name,
            phone: template.phone,
            photo_path: template.photo_path,
        };

        self.persist(&JournalEntry::Template { template: template.clone() })?;
        tables.put_template(template.clone());

        debug!(template_id = %template.id, "template_inserted");
        Ok(template)
    }

    fn list_templates(&self) -> Vec<VisitorTemplate> {
        self.tables.read().templates.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn draft(name: &str, token: &str, otp: &str) -> VisitorDraft {
        VisitorDraft {
            name: name.to_string(),
            phone: "555-0100".to_string(),
            qr_token: token.to_string(),
            otp: otp.to_string(),
        }
    }

    #[test]
    fn test_insert_assigns_sequential_unique_ids() {
        let store = MemoryStore::new();
        let a = store.insert(draft("Alice", "QR1", "1111")).unwrap();
        let b = store.insert(draft("Bob", "QR2", "2222")).unwrap();

        assert_eq!(a.id, VisitorId(1));
        assert_eq!(b.id, VisitorId(2));
        assert!(!a.arrived);
        assert_eq!(store.get(a.id), Some(a));
        assert_eq!(store.get(b.id), Some(b));
        assert_eq!(store.get(VisitorId(3)), None);
    }

    #[test]
    fn test_duplicate_credentials_rejected() {
        let store = MemoryStore::new();
        store.insert(draft("Alice", "QR1", "1111")).unwrap();

        match store.insert(draft("Bob", "QR1", "2222")) {
            Err(StoreError::Duplicate { field, value }) => {
                assert_eq!(field, CredentialField::QrToken);
                assert_eq!(value, "QR1");
            }
            other => panic!("expected duplicate token, got {other:?}"),
        }
        match store.insert(draft("Bob", "QR2", "1111")) {
            Err(StoreError::Duplicate { field, .. }) => assert_eq!(field, CredentialField::Otp),
            other => panic!("expected duplicate otp, got {other:?}"),
        }

        // Rejected inserts do not consume ids
        let bob = store.insert(draft("Bob", "QR2", "2222")).unwrap();
        assert_eq!(bob.id, VisitorId(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_lookup_by_credentials() {
        let store = MemoryStore::new();
        let alice = store.insert(draft("Alice", "QR1", "1111")).unwrap();

        assert_eq!(store.find_by_token("QR1"), Some(alice.clone()));
        assert_eq!(store.find_by_token("qr1"), None);
        assert_eq!(store.find_by_otp("1111"), Some(alice));
        assert_eq!(store.find_by_otp("9999"), None);
    }

    #[test]
    fn test_find_by_name_ascending_id_order() {
        let store = MemoryStore::new();
        store.insert(draft("Alice", "QR1", "1111")).unwrap();
        store.insert(draft("Bob", "QR2", "2222")).unwrap();
        store.insert(draft("KHALIL", "QR3", "3333")).unwrap();

        let names: Vec<String> =
            store.find_by_name("ALI").into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["Alice".to_string(), "KHALIL".to_string()]);
        assert!(store.find_by_name("zzz").is_empty());
        assert_eq!(store.find_by_name("").len(), 3);
    }

    #[test]
    fn test_update_missing_visitor() {
        let store = MemoryStore::new();
        let mut calls = 0;
        let result = store.update(VisitorId(7), &mut |_: &mut Visitor| calls += 1).unwrap();
        assert!(result.is_none());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_update_keeps_id_and_reindexes() {
        let store = MemoryStore::new();
        let alice = store.insert(draft("Alice", "QR1", "1111")).unwrap();

        let updated = store
            .update(alice.id, &mut |v: &mut Visitor| {
                v.id = VisitorId(99);
                v.qr_token = "QR9".to_string();
            })
            .unwrap()
            .unwrap();

        assert_eq!(updated.id, alice.id);
        assert_eq!(store.find_by_token("QR1"), None);
        assert_eq!(store.find_by_token("QR9").map(|v| v.id), Some(alice.id));
        assert_eq!(store.get(VisitorId(99)), None);
    }

    #[test]
    fn test_update_rejects_credential_clash() {
        let store = MemoryStore::new();
        let alice = store.insert(draft("Alice", "QR1", "1111")).unwrap();
        store.insert(draft("Bob", "QR2", "2222")).unwrap();

        let result = store.update(alice.id, &mut |v: &mut Visitor| v.otp = "2222".to_string());
        assert!(matches!(result, Err(StoreError::Duplicate { field: CredentialField::Otp, .. })));
        assert_eq!(store.get(alice.id).unwrap().otp, "1111");
    }

    #[test]
    fn test_templates_have_own_ids() {
        let store = MemoryStore::new();
        store.insert(draft("Alice", "QR1", "1111")).unwrap();
        let template = store
            .insert_template(NewVisitorTemplate {
                name: "Courier".to_string(),
                phone: "555-0199".to_string(),
                photo_path: Some("photos/courier.jpg".to_string()),
            })
            .unwrap();

        assert_eq!(template.id, TemplateId(1));
        assert_eq!(store.list_templates(), vec![template]);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_journal_replay_restores_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("visitors.jsonl");

        let (alice_id, arrived_at) = {
            let store = MemoryStore::open(&path).unwrap();
            assert!(store.is_durable());
            let alice = store.insert(draft("Alice", "QR1", "1111")).unwrap();
            store.insert(draft("Bob", "QR2", "2222")).unwrap();
            let arrived = store
                .update(alice.id, &mut |v: &mut Visitor| {
                    v.mark_arrived(Utc::now());
                })
                .unwrap()
                .unwrap();
            store
                .insert_template(NewVisitorTemplate { name: "Courier".into(), ..Default::default() })
                .unwrap();
            (alice.id, arrived.arrived_at)
        };

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        let alice = reopened.get(alice_id).unwrap();
        assert!(alice.arrived);
        assert_eq!(alice.arrived_at, arrived_at);
        assert_eq!(reopened.find_by_otp("2222").map(|v| v.name), Some("Bob".to_string()));
        assert_eq!(reopened.list_templates().len(), 1);

        // Id counter continues after the replayed records
        let carol = reopened.insert(draft("Carol", "QR3", "3333")).unwrap();
        assert_eq!(carol.id, VisitorId(3));
    }

    #[test]
    fn test_noop_update_not_journaled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("visitors.jsonl");
        let store = MemoryStore::open(&path).unwrap();
        let alice = store.insert(draft("Alice", "QR1", "1111")).unwrap();

        store.update(alice.id, &mut |_: &mut Visitor| {}).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
