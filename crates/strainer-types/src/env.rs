//! Per-run script environment and execution status.

use crate::store::{DuplicateDb, MailStore, SmtpForward};
use crate::trace::TraceConfig;
use crate::DEFAULT_MAILBOX;

/// Host-provided callbacks and settings for one script run.
///
/// A `None` store makes the run a dry run: actions are disabled and commit
/// logs "skipped" while still returning success.
pub struct ScriptEnv<'a> {
    /// Mailbox namespace, absent for dry runs.
    pub store: Option<&'a dyn MailStore>,
    /// Outbound transport for redirects, absent for dry runs.
    pub smtp: Option<&'a dyn SmtpForward>,
    /// Cross-run duplicate suppression, absent when the host does not
    /// track deliveries.
    pub duplicates: Option<&'a dyn DuplicateDb>,
    /// Target of the implicit keep and of `keep`.
    pub default_mailbox: String,
    /// User the script runs on behalf of.
    pub username: String,
    /// Create missing mailboxes before storing.
    pub mailbox_autocreate: bool,
    /// Subscribe to mailboxes created through autocreate.
    pub mailbox_autosubscribe: bool,
    /// Runtime trace settings; tracing is off when `None`.
    pub trace: Option<TraceConfig>,
}

impl<'a> ScriptEnv<'a> {
    /// Environment with defaults and no host callbacks (dry run).
    #[must_use]
    pub fn new(username: &str) -> Self {
        Self {
            store: None,
            smtp: None,
            duplicates: None,
            default_mailbox: DEFAULT_MAILBOX.to_owned(),
            username: username.to_owned(),
            mailbox_autocreate: false,
            mailbox_autosubscribe: false,
            trace: None,
        }
    }

    /// Attach a mail store.
    #[must_use]
    pub fn with_store(mut self, store: &'a dyn MailStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach an outbound transport.
    #[must_use]
    pub fn with_smtp(mut self, smtp: &'a dyn SmtpForward) -> Self {
        self.smtp = Some(smtp);
        self
    }

    /// Attach a duplicate database.
    #[must_use]
    pub fn with_duplicates(mut self, db: &'a dyn DuplicateDb) -> Self {
        self.duplicates = Some(db);
        self
    }
}

/// Per-run status flags populated for the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecStatus {
    /// A copy of the message was stored somewhere.
    pub message_saved: bool,
    /// The engine attempted a store into the default mailbox.
    pub tried_default_save: bool,
    /// Last mailbox a store targeted, successful or not.
    pub last_storage: Option<String>,
    /// The message stays in its origin mailbox (redundant store path).
    pub keep_original: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_defaults() {
        let env = ScriptEnv::new("tim");
        assert_eq!(env.default_mailbox, "INBOX");
        assert_eq!(env.username, "tim");
        assert!(env.store.is_none());
        assert!(!env.mailbox_autocreate);
    }

    #[test]
    fn test_exec_status_default() {
        let status = ExecStatus::default();
        assert!(!status.message_saved);
        assert!(status.last_storage.is_none());
    }
}
