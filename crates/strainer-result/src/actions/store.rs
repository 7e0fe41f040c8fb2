//! The store action: file the message into a mailbox.
//!
//! `keep` and the implicit keep are stores targeting the default mailbox;
//! a store whose target is the message's origin mailbox is *redundant*
//! and only adjusts flags in place; a store without a mail namespace is
//! *disabled* and commits as a logged no-op.

use std::any::Any;

use strainer_error::{Result, SieveError};
use strainer_types::{ActionFlags, ExecStatus, MessageView};
use tracing::{debug, info};

use crate::action::{Action, ActionEnv, ActionTransaction};
use crate::side_effect::{resolve_flags, SideEffect};

/// Mailbox names compare case-sensitively except that `INBOX` is special
/// in IMAP and compares case-insensitively.
#[must_use]
pub fn mailbox_equal(a: &str, b: &str) -> bool {
    a == b || (a.eq_ignore_ascii_case("INBOX") && b.eq_ignore_ascii_case("INBOX"))
}

/// Deferred store of the message into `mailbox`.
#[derive(Debug, Clone)]
pub struct StoreAction {
    mailbox: String,
    is_keep: bool,
}

impl StoreAction {
    /// Store into an explicit mailbox (`fileinto`).
    #[must_use]
    pub fn new(mailbox: &str) -> Self {
        Self {
            mailbox: mailbox.to_owned(),
            is_keep: false,
        }
    }

    /// Store representing `keep` (explicit or implicit).
    #[must_use]
    pub fn keep(default_mailbox: &str) -> Self {
        Self {
            mailbox: default_mailbox.to_owned(),
            is_keep: true,
        }
    }

    /// Target mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }
}

impl Action for StoreAction {
    fn name(&self) -> &'static str {
        "store"
    }

    fn flags(&self) -> ActionFlags {
        ActionFlags::TRIES_DELIVER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Action) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| mailbox_equal(&self.mailbox, &other.mailbox))
    }

    fn start(
        &self,
        env: &ActionEnv<'_>,
        side_effects: &[Box<dyn SideEffect>],
    ) -> Result<Box<dyn ActionTransaction>> {
        let mode = if env.env.store.is_none() {
            StoreMode::Disabled
        } else if env
            .msg
            .origin_mailbox()
            .is_some_and(|origin| mailbox_equal(origin, &self.mailbox))
        {
            StoreMode::Redundant
        } else {
            StoreMode::Normal
        };
        Ok(Box::new(StoreTransaction {
            mailbox: self.mailbox.clone(),
            is_keep: self.is_keep,
            flags: resolve_flags(side_effects),
            mode,
        }))
    }

    fn describe(&self) -> String {
        if self.is_keep {
            format!("store message in mailbox '{}' (keep)", self.mailbox)
        } else {
            format!("store message in mailbox '{}'", self.mailbox)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    Normal,
    Redundant,
    Disabled,
}

struct StoreTransaction {
    mailbox: String,
    is_keep: bool,
    flags: Vec<String>,
    mode: StoreMode,
}

impl ActionTransaction for StoreTransaction {
    fn execute(&mut self, env: &ActionEnv<'_>) -> Result<()> {
        match self.mode {
            StoreMode::Disabled => Ok(()),
            StoreMode::Redundant => {
                let store = env
                    .env
                    .store
                    .ok_or_else(|| SieveError::internal("redundant store without namespace"))?;
                store.update_flags(env.msg, &self.flags)
            }
            StoreMode::Normal => {
                let store = env
                    .env
                    .store
                    .ok_or_else(|| SieveError::internal("active store without namespace"))?;
                if !store.mailbox_exists(&self.mailbox)? {
                    if !env.env.mailbox_autocreate {
                        return Err(SieveError::script(
                            format!("mailbox '{}' does not exist", self.mailbox),
                            0,
                        ));
                    }
                    store.mailbox_create(&self.mailbox)?;
                    if env.env.mailbox_autosubscribe {
                        store.mailbox_subscribe(&self.mailbox)?;
                    }
                }
                store.save(env.msg, &self.mailbox, &self.flags)
            }
        }
    }

    fn commit(
        &mut self,
        _env: &ActionEnv<'_>,
        status: &mut ExecStatus,
        keep_out: &mut bool,
    ) -> Result<()> {
        *keep_out = false;
        status.last_storage = Some(self.mailbox.clone());
        match self.mode {
            StoreMode::Disabled => {
                info!(mailbox = %self.mailbox, "skipped store (no mail namespace)");
            }
            StoreMode::Redundant => {
                status.message_saved = true;
                status.keep_original = true;
                info!(mailbox = %self.mailbox, "left message in mailbox '{}'", self.mailbox);
            }
            StoreMode::Normal => {
                status.message_saved = true;
                if self.is_keep {
                    status.tried_default_save = true;
                }
                info!(mailbox = %self.mailbox, keep = self.is_keep, "stored message in mailbox '{}'", self.mailbox);
            }
        }
        Ok(())
    }

    fn rollback(&mut self, _env: &ActionEnv<'_>) {
        debug!(mailbox = %self.mailbox, "rolled back store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strainer_types::{MemMailStore, MemMessage, ScriptEnv};

    #[test]
    fn test_mailbox_equality_rules() {
        assert!(mailbox_equal("Work", "Work"));
        assert!(!mailbox_equal("Work", "work"));
        assert!(mailbox_equal("INBOX", "inbox"));
        assert!(mailbox_equal("Inbox", "INBOX"));
    }

    #[test]
    fn test_equals_follows_mailbox_rules() {
        let a = StoreAction::new("inbox");
        let b = StoreAction::keep("INBOX");
        let c = StoreAction::new("Work");
        assert!(a.equals(&b));
        assert!(!a.equals(&c));
    }

    #[test]
    fn test_store_files_message() {
        let store = MemMailStore::new();
        store.add_mailbox("Work");
        let msg = MemMessage::new().with_header("Message-ID", "<a@x>");
        let script_env = ScriptEnv::new("tim").with_store(&store);
        let env = ActionEnv {
            msg: &msg,
            env: &script_env,
        };

        let action = StoreAction::new("Work");
        let mut tx = action.start(&env, &[]).expect("start");
        tx.execute(&env).expect("execute");

        let mut status = ExecStatus::default();
        let mut keep = true;
        tx.commit(&env, &mut status, &mut keep).expect("commit");

        assert!(!keep, "successful store cancels implicit keep");
        assert!(status.message_saved);
        assert_eq!(status.last_storage.as_deref(), Some("Work"));
        assert_eq!(store.messages_in("Work").len(), 1);
    }

    #[test]
    fn test_missing_mailbox_without_autocreate_fails() {
        let store = MemMailStore::new();
        let msg = MemMessage::new();
        let script_env = ScriptEnv::new("tim").with_store(&store);
        let env = ActionEnv {
            msg: &msg,
            env: &script_env,
        };

        let action = StoreAction::new("Absent");
        let mut tx = action.start(&env, &[]).expect("start");
        let err = tx.execute(&env).expect_err("must fail");
        assert!(matches!(err, SieveError::Script { .. }));
    }

    #[test]
    fn test_autocreate_and_autosubscribe() {
        let store = MemMailStore::new();
        let msg = MemMessage::new();
        let mut script_env = ScriptEnv::new("tim").with_store(&store);
        script_env.mailbox_autocreate = true;
        script_env.mailbox_autosubscribe = true;
        let env = ActionEnv {
            msg: &msg,
            env: &script_env,
        };

        let action = StoreAction::new("Lists/sieve");
        let mut tx = action.start(&env, &[]).expect("start");
        tx.execute(&env).expect("execute");
        assert_eq!(store.messages_in("Lists/sieve").len(), 1);
        assert!(store.is_subscribed("Lists/sieve"));
    }

    #[test]
    fn test_redundant_store_updates_flags_in_place() {
        let store = MemMailStore::new();
        store.add_mailbox("Work");
        let msg = MemMessage::new()
            .with_header("Message-ID", "<a@x>")
            .with_origin_mailbox("Work");
        let script_env = ScriptEnv::new("tim").with_store(&store);
        let env = ActionEnv {
            msg: &msg,
            env: &script_env,
        };

        let action = StoreAction::new("Work");
        let effects: Vec<Box<dyn SideEffect>> = vec![Box::new(
            crate::side_effect::FlagsEffect::add(&["\\Seen".to_owned()]),
        )];
        let mut tx = action.start(&env, &effects).expect("start");
        tx.execute(&env).expect("execute");

        let mut status = ExecStatus::default();
        let mut keep = true;
        tx.commit(&env, &mut status, &mut keep).expect("commit");

        assert!(status.keep_original);
        assert!(store.messages_in("Work").is_empty(), "no copy is made");
        assert_eq!(
            store.flag_updates(),
            vec![("<a@x>".to_owned(), vec!["\\Seen".to_owned()])]
        );
    }

    #[test]
    fn test_disabled_store_commits_without_saving() {
        let msg = MemMessage::new();
        let script_env = ScriptEnv::new("tim");
        let env = ActionEnv {
            msg: &msg,
            env: &script_env,
        };

        let action = StoreAction::new("Work");
        let mut tx = action.start(&env, &[]).expect("start");
        tx.execute(&env).expect("execute");

        let mut status = ExecStatus::default();
        let mut keep = true;
        tx.commit(&env, &mut status, &mut keep).expect("commit");
        assert!(!keep);
        assert!(!status.message_saved);
    }
}
