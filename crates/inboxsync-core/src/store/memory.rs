//! In-memory mailbox store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::{DEFAULT_SNIPPET_LENGTH, Email, EmailDelta, EmailId};

/// Local fields that an incoming record must not overwrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtectedFields {
    /// Keep the local `is_read`.
    pub read: bool,
    /// Keep the local `is_starred`.
    pub starred: bool,
}

impl ProtectedFields {
    /// Nothing protected.
    pub const NONE: Self = Self {
        read: false,
        starred: false,
    };
}

/// IDs touched by a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Created or overwritten emails.
    pub upserted: Vec<EmailId>,
    /// Removed emails that were present locally.
    pub deleted: Vec<EmailId>,
}

/// The local queryable mailbox.
///
/// Every operation takes the lock once, so each call is atomic with respect
/// to other callers. No lock is held across an `.await`.
#[derive(Debug)]
pub struct MailStore {
    emails: RwLock<HashMap<EmailId, Email>>,
    snippet_length: usize,
}

impl Default for MailStore {
    fn default() -> Self {
        Self::new(DEFAULT_SNIPPET_LENGTH)
    }
}

impl MailStore {
    /// Creates an empty store deriving snippets of `snippet_length` chars.
    #[must_use]
    pub fn new(snippet_length: usize) -> Self {
        Self {
            emails: RwLock::new(HashMap::new()),
            snippet_length,
        }
    }

    /// Creates a store pre-filled with emails.
    #[must_use]
    pub fn with_emails(emails: impl IntoIterator<Item = Email>) -> Self {
        let store = Self::default();
        for email in emails {
            store.upsert(email);
        }
        store
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EmailId, Email>> {
        self.emails.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EmailId, Email>> {
        self.emails.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of an email.
    #[must_use]
    pub fn get(&self, id: &EmailId) -> Option<Email> {
        self.read().get(id).cloned()
    }

    /// Returns true if the email is stored.
    #[must_use]
    pub fn contains(&self, id: &EmailId) -> bool {
        self.read().contains_key(id)
    }

    /// Number of stored emails.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copies every stored email, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Email> {
        self.read().values().cloned().collect()
    }

    /// Copies the emails for the given IDs, skipping unknown ones.
    #[must_use]
    pub fn get_many<'a>(&self, ids: impl IntoIterator<Item = &'a EmailId>) -> Vec<Email> {
        let emails = self.read();
        ids.into_iter()
            .filter_map(|id| emails.get(id).cloned())
            .collect()
    }

    /// Inserts or replaces an email.
    pub fn upsert(&self, mut email: Email) {
        email.ensure_snippet(self.snippet_length);
        self.write().insert(email.id.clone(), email);
    }

    /// Removes an email, returning it if present.
    pub fn remove(&self, id: &EmailId) -> Option<Email> {
        self.write().remove(id)
    }

    /// Runs `f` on one email under the write lock.
    ///
    /// Returns `None` if the email is not stored.
    pub fn update<R>(&self, id: &EmailId, f: impl FnOnce(&mut Email) -> R) -> Option<R> {
        self.write().get_mut(id).map(f)
    }

    /// Applies provider deltas by ID.
    ///
    /// Incoming records overwrite local ones, except for the fields that
    /// `protected` reports for that ID.
    pub fn apply_deltas(
        &self,
        deltas: Vec<EmailDelta>,
        protected: impl Fn(&EmailId) -> ProtectedFields,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        let mut emails = self.write();

        for delta in deltas {
            match delta {
                EmailDelta::Upsert(mut incoming) => {
                    incoming.ensure_snippet(self.snippet_length);
                    if let Some(local) = emails.get(&incoming.id) {
                        let keep = protected(&incoming.id);
                        if keep.read {
                            incoming.is_read = local.is_read;
                        }
                        if keep.starred {
                            incoming.is_starred = local.is_starred;
                        }
                    }
                    report.upserted.push(incoming.id.clone());
                    emails.insert(incoming.id.clone(), incoming);
                }
                EmailDelta::Delete { id } => {
                    if emails.remove(&id).is_some() {
                        report.deleted.push(id);
                    }
                }
            }
        }

        report
    }

    /// Replaces a provisional record with its server-assigned identity.
    ///
    /// If the server record already arrived through sync, the provisional
    /// copy is simply dropped. Returns false if the provisional record is gone.
    pub fn rekey(&self, provisional: &EmailId, server_id: EmailId) -> bool {
        let mut emails = self.write();
        let Some(mut email) = emails.remove(provisional) else {
            return false;
        };
        if !emails.contains_key(&server_id) {
            email.id = server_id.clone();
            email.delivery = crate::model::Delivery::Delivered;
            emails.insert(server_id, email);
        }
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::Delivery;

    fn email(id: &str) -> Email {
        Email::new(id, format!("Subject {id}"), Utc::now())
    }

    #[test]
    fn test_upsert_derives_snippet() {
        let store = MailStore::new(5);
        let mut e = email("a");
        e.body_html = "<p>Hello world</p>".to_string();
        store.upsert(e);
        assert_eq!(store.get(&"a".into()).unwrap().snippet, "Hello...");
    }

    #[test]
    fn test_apply_deltas_overwrites_and_deletes() {
        let store = MailStore::with_emails([email("a"), email("b")]);
        let mut updated = email("a");
        updated.subject = "Changed".to_string();

        let report = store.apply_deltas(
            vec![
                EmailDelta::Upsert(updated),
                EmailDelta::Delete { id: "b".into() },
                EmailDelta::Delete { id: "zzz".into() },
            ],
            |_| ProtectedFields::NONE,
        );

        assert_eq!(report.upserted, vec![EmailId::from("a")]);
        assert_eq!(report.deleted, vec![EmailId::from("b")]);
        assert_eq!(store.get(&"a".into()).unwrap().subject, "Changed");
        assert!(!store.contains(&"b".into()));
    }

    #[test]
    fn test_apply_deltas_keeps_protected_flags() {
        let store = MailStore::with_emails([email("a").read(true).starred(true)]);
        let incoming = email("a").read(false).starred(false);

        store.apply_deltas(vec![EmailDelta::Upsert(incoming)], |_| ProtectedFields {
            read: true,
            starred: false,
        });

        let stored = store.get(&"a".into()).unwrap();
        assert!(stored.is_read);
        assert!(!stored.is_starred);
    }

    #[test]
    fn test_rekey_provisional() {
        let store = MailStore::default();
        let mut e = email("local-1");
        e.delivery = Delivery::Pending;
        store.upsert(e);

        assert!(store.rekey(&"local-1".into(), "srv-9".into()));
        assert!(!store.contains(&"local-1".into()));
        let stored = store.get(&"srv-9".into()).unwrap();
        assert_eq!(stored.delivery, Delivery::Delivered);
        assert!(!store.rekey(&"local-1".into(), "srv-9".into()));
    }

    #[test]
    fn test_rekey_when_server_copy_already_synced() {
        let store = MailStore::with_emails([email("local-1"), email("srv-9")]);
        assert!(store.rekey(&"local-1".into(), "srv-9".into()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"srv-9".into()).unwrap().subject, "Subject srv-9");
    }
}
