//! Host-side mail storage and transport traits, with in-memory
//! implementations for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::SystemTime;

use strainer_error::{Result, SieveError};

use crate::message::MessageView;

/// Mailbox namespace handle supplied by the host.
///
/// When absent from the environment the run is a dry run: store-class
/// actions are disabled and report success without touching anything.
///
/// Error contract: implementations report permission refusals as
/// [`SieveError::NoPermission`], a permanently exhausted quota as
/// [`SieveError::QuotaExceeded`], and retryable conditions as
/// [`SieveError::TempFailure`]; anything else is treated as a generic
/// permanent failure.
pub trait MailStore: Sync {
    /// Whether `mailbox` exists.
    fn mailbox_exists(&self, mailbox: &str) -> Result<bool>;

    /// Create `mailbox`. Called only when autocreate is enabled.
    fn mailbox_create(&self, mailbox: &str) -> Result<()>;

    /// Subscribe the user to `mailbox`. Called only when autosubscribe is
    /// enabled, after a successful create.
    fn mailbox_subscribe(&self, mailbox: &str) -> Result<()>;

    /// File a copy of the message into `mailbox` with the given flags and
    /// keywords already applied.
    fn save(&self, msg: &dyn MessageView, mailbox: &str, flags: &[String]) -> Result<()>;

    /// Adjust flags on the message in its origin mailbox without copying.
    /// Used when a store turns out to be redundant.
    fn update_flags(&self, msg: &dyn MessageView, flags: &[String]) -> Result<()>;
}

/// Outbound transport for redirect-class actions.
pub trait SmtpForward: Sync {
    /// Forward the message as-is to `address`.
    fn forward(&self, msg: &dyn MessageView, address: &str) -> Result<()>;
}

/// Host predicate pair for cross-run duplicate suppression.
///
/// Both callbacks are present or the feature is absent; `check` runs before
/// a redirect-class action is added, `mark` after its commit.
pub trait DuplicateDb: Sync {
    /// Whether `id` was already delivered for `user`.
    fn check(&self, id: &[u8], user: &str) -> bool;

    /// Record `id` as delivered for `user`.
    fn mark(&self, id: &[u8], user: &str, when: SystemTime);
}

/// A message as recorded by [`MemMailStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMail {
    /// `Message-ID` of the stored message, empty when absent.
    pub message_id: String,
    /// Flags and keywords applied at save time, sorted.
    pub flags: Vec<String>,
}

#[derive(Debug, Default)]
struct MemStoreInner {
    mailboxes: BTreeMap<String, Vec<StoredMail>>,
    subscribed: BTreeSet<String>,
    flag_updates: Vec<(String, Vec<String>)>,
    denied: BTreeSet<String>,
    quota: Option<usize>,
}

/// In-memory [`MailStore`].
///
/// Interior mutability keeps the trait object shareable from the
/// environment the same way a real store handle would be.
#[derive(Debug, Default)]
pub struct MemMailStore {
    inner: Mutex<MemStoreInner>,
    fail_saves: bool,
}

impl MemMailStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `save` always fails permanently. Used to exercise the
    /// keep-failure path.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            inner: Mutex::new(MemStoreInner::default()),
            fail_saves: true,
        }
    }

    /// Pre-create a mailbox.
    pub fn add_mailbox(&self, mailbox: &str) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.mailboxes.entry(mailbox.to_owned()).or_default();
    }

    /// Refuse saves into `mailbox` with a permission error.
    pub fn deny_mailbox(&self, mailbox: &str) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.denied.insert(mailbox.to_owned());
    }

    /// Cap the total number of stored messages; saves beyond the cap
    /// fail with a quota error.
    pub fn set_quota(&self, max_messages: usize) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.quota = Some(max_messages);
    }

    /// Messages filed into `mailbox`, in save order.
    #[must_use]
    pub fn messages_in(&self, mailbox: &str) -> Vec<StoredMail> {
        let inner = self.inner.lock().expect("store lock");
        inner.mailboxes.get(mailbox).cloned().unwrap_or_default()
    }

    /// Whether the user is subscribed to `mailbox`.
    #[must_use]
    pub fn is_subscribed(&self, mailbox: &str) -> bool {
        let inner = self.inner.lock().expect("store lock");
        inner.subscribed.contains(mailbox)
    }

    /// Flag updates applied in place, as `(message_id, flags)` pairs.
    #[must_use]
    pub fn flag_updates(&self) -> Vec<(String, Vec<String>)> {
        let inner = self.inner.lock().expect("store lock");
        inner.flag_updates.clone()
    }
}

impl MailStore for MemMailStore {
    fn mailbox_exists(&self, mailbox: &str) -> Result<bool> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner.mailboxes.contains_key(mailbox))
    }

    fn mailbox_create(&self, mailbox: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        inner.mailboxes.entry(mailbox.to_owned()).or_default();
        Ok(())
    }

    fn mailbox_subscribe(&self, mailbox: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        inner.subscribed.insert(mailbox.to_owned());
        Ok(())
    }

    fn save(&self, msg: &dyn MessageView, mailbox: &str, flags: &[String]) -> Result<()> {
        if self.fail_saves {
            return Err(SieveError::script(
                format!("failed to store into mailbox '{mailbox}'"),
                0,
            ));
        }
        let mut inner = self.inner.lock().expect("store lock");
        if inner.denied.contains(mailbox) {
            return Err(SieveError::no_permission(format!(
                "no rights to store into mailbox '{mailbox}'"
            )));
        }
        if let Some(quota) = inner.quota {
            let stored: usize = inner.mailboxes.values().map(Vec::len).sum();
            if stored >= quota {
                return Err(SieveError::quota_exceeded(format!(
                    "quota of {quota} messages reached"
                )));
            }
        }
        let entry = inner
            .mailboxes
            .get_mut(mailbox)
            .ok_or_else(|| SieveError::script(format!("mailbox '{mailbox}' does not exist"), 0))?;
        let mut sorted = flags.to_vec();
        sorted.sort_unstable();
        entry.push(StoredMail {
            message_id: msg.message_id().unwrap_or_default().to_owned(),
            flags: sorted,
        });
        Ok(())
    }

    fn update_flags(&self, msg: &dyn MessageView, flags: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        let mut sorted = flags.to_vec();
        sorted.sort_unstable();
        inner.flag_updates.push((
            msg.message_id().unwrap_or_default().to_owned(),
            sorted,
        ));
        Ok(())
    }
}

/// In-memory [`SmtpForward`] recording every forward.
#[derive(Debug, Default)]
pub struct MemSmtp {
    forwards: Mutex<Vec<(String, String)>>,
}

impl MemSmtp {
    /// Empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(message_id, address)` pairs, in forward order.
    #[must_use]
    pub fn forwards(&self) -> Vec<(String, String)> {
        self.forwards.lock().expect("smtp lock").clone()
    }
}

impl SmtpForward for MemSmtp {
    fn forward(&self, msg: &dyn MessageView, address: &str) -> Result<()> {
        self.forwards.lock().expect("smtp lock").push((
            msg.message_id().unwrap_or_default().to_owned(),
            address.to_owned(),
        ));
        Ok(())
    }
}

/// In-memory [`DuplicateDb`].
#[derive(Debug, Default)]
pub struct MemDuplicateDb {
    seen: Mutex<BTreeSet<(Vec<u8>, String)>>,
}

impl MemDuplicateDb {
    /// Empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DuplicateDb for MemDuplicateDb {
    fn check(&self, id: &[u8], user: &str) -> bool {
        let seen = self.seen.lock().expect("dup lock");
        seen.contains(&(id.to_vec(), user.to_owned()))
    }

    fn mark(&self, id: &[u8], user: &str, _when: SystemTime) {
        let mut seen = self.seen.lock().expect("dup lock");
        seen.insert((id.to_vec(), user.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MemMessage;

    #[test]
    fn test_mem_store_save_and_query() {
        let store = MemMailStore::new();
        store.add_mailbox("INBOX");
        let msg = MemMessage::new().with_header("Message-ID", "<a@x>");
        store
            .save(&msg, "INBOX", &["\\Seen".to_owned()])
            .expect("save should succeed");

        let stored = store.messages_in("INBOX");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message_id, "<a@x>");
        assert_eq!(stored[0].flags, vec!["\\Seen".to_owned()]);
    }

    #[test]
    fn test_mem_store_missing_mailbox_fails() {
        let store = MemMailStore::new();
        let msg = MemMessage::new();
        let err = store.save(&msg, "Nope", &[]).expect_err("must fail");
        assert!(matches!(err, SieveError::Script { .. }));
    }

    #[test]
    fn test_denied_mailbox_reports_no_permission() {
        let store = MemMailStore::new();
        store.add_mailbox("Work");
        store.deny_mailbox("Work");
        let msg = MemMessage::new();
        let err = store.save(&msg, "Work", &[]).expect_err("must fail");
        assert!(matches!(err, SieveError::NoPermission { .. }));
    }

    #[test]
    fn test_quota_reports_quota_exceeded_once_full() {
        let store = MemMailStore::new();
        store.add_mailbox("INBOX");
        store.set_quota(1);
        let msg = MemMessage::new();
        store.save(&msg, "INBOX", &[]).expect("first save fits");
        let err = store.save(&msg, "INBOX", &[]).expect_err("must fail");
        assert!(matches!(err, SieveError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_duplicate_db_round_trip() {
        let db = MemDuplicateDb::new();
        assert!(!db.check(b"<a@x>", "tim"));
        db.mark(b"<a@x>", "tim", SystemTime::UNIX_EPOCH);
        assert!(db.check(b"<a@x>", "tim"));
        assert!(!db.check(b"<a@x>", "other"));
    }

    #[test]
    fn test_mem_smtp_records_forwards() {
        let smtp = MemSmtp::new();
        let msg = MemMessage::new().with_header("Message-ID", "<m@x>");
        smtp.forward(&msg, "a@b.example").expect("forward");
        assert_eq!(
            smtp.forwards(),
            vec![("<m@x>".to_owned(), "a@b.example".to_owned())]
        );
    }
}
