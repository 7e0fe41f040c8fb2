//! The redirect action: forward the message to another address.

use std::any::Any;
use std::time::SystemTime;

use strainer_error::Result;
use strainer_types::{ActionFlags, ExecStatus, MessageView};
use tracing::{debug, info};

use crate::action::{Action, ActionEnv, ActionTransaction};
use crate::side_effect::SideEffect;

/// Deferred forward of the message to `address`.
#[derive(Debug, Clone)]
pub struct RedirectAction {
    address: String,
}

impl RedirectAction {
    /// Redirect to `address`.
    #[must_use]
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_owned(),
        }
    }

    /// Target address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Action for RedirectAction {
    fn name(&self) -> &'static str {
        "redirect"
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
            .is_some_and(|other| self.address.eq_ignore_ascii_case(&other.address))
    }

    fn duplicate_id(&self, msg: &dyn MessageView) -> Option<Vec<u8>> {
        let message_id = msg.message_id()?;
        let mut id = Vec::with_capacity(message_id.len() + self.address.len() + 1);
        id.extend_from_slice(message_id.as_bytes());
        id.push(0);
        id.extend_from_slice(self.address.to_ascii_lowercase().as_bytes());
        Some(id)
    }

    fn start(
        &self,
        env: &ActionEnv<'_>,
        _side_effects: &[Box<dyn SideEffect>],
    ) -> Result<Box<dyn ActionTransaction>> {
        Ok(Box::new(RedirectTransaction {
            address: self.address.clone(),
            disabled: env.env.smtp.is_none(),
        }))
    }

    fn describe(&self) -> String {
        format!("redirect message to <{}>", self.address)
    }
}

struct RedirectTransaction {
    address: String,
    disabled: bool,
}

impl ActionTransaction for RedirectTransaction {
    fn execute(&mut self, env: &ActionEnv<'_>) -> Result<()> {
        if self.disabled {
            return Ok(());
        }
        let smtp = env
            .env
            .smtp
            .ok_or_else(|| strainer_error::SieveError::internal("redirect without transport"))?;
        smtp.forward(env.msg, &self.address)
    }

    fn commit(
        &mut self,
        env: &ActionEnv<'_>,
        _status: &mut ExecStatus,
        keep_out: &mut bool,
    ) -> Result<()> {
        *keep_out = false;
        if self.disabled {
            info!(address = %self.address, "skipped redirect (no transport)");
            return Ok(());
        }
        info!(address = %self.address, "forwarded message to <{}>", self.address);
        if let (Some(db), Some(id)) = (
            env.env.duplicates,
            RedirectAction::new(&self.address).duplicate_id(env.msg),
        ) {
            db.mark(&id, &env.env.username, SystemTime::now());
        }
        Ok(())
    }

    fn rollback(&mut self, _env: &ActionEnv<'_>) {
        debug!(address = %self.address, "rolled back redirect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strainer_types::{DuplicateDb, MemDuplicateDb, MemMessage, MemSmtp, ScriptEnv};

    #[test]
    fn test_equals_is_case_insensitive() {
        let a = RedirectAction::new("Tim@Example.org");
        let b = RedirectAction::new("tim@example.org");
        let c = RedirectAction::new("other@example.org");
        assert!(a.equals(&b));
        assert!(!a.equals(&c));
    }

    #[test]
    fn test_duplicate_id_needs_message_id() {
        let action = RedirectAction::new("a@b");
        assert!(action.duplicate_id(&MemMessage::new()).is_none());
        let msg = MemMessage::new().with_header("Message-ID", "<m@x>");
        let id = action.duplicate_id(&msg).expect("id");
        assert!(id.starts_with(b"<m@x>"));
    }

    #[test]
    fn test_forward_and_mark() {
        let smtp = MemSmtp::new();
        let dupes = MemDuplicateDb::new();
        let msg = MemMessage::new().with_header("Message-ID", "<m@x>");
        let script_env = ScriptEnv::new("tim").with_smtp(&smtp).with_duplicates(&dupes);
        let env = ActionEnv {
            msg: &msg,
            env: &script_env,
        };

        let action = RedirectAction::new("a@b.example");
        let mut tx = action.start(&env, &[]).expect("start");
        tx.execute(&env).expect("execute");

        let mut status = ExecStatus::default();
        let mut keep = true;
        tx.commit(&env, &mut status, &mut keep).expect("commit");

        assert!(!keep);
        assert_eq!(smtp.forwards().len(), 1);
        let id = action.duplicate_id(&msg).expect("id");
        assert!(dupes.check(&id, "tim"), "commit must mark the delivery");
    }

    #[test]
    fn test_disabled_redirect_is_a_logged_noop() {
        let msg = MemMessage::new();
        let script_env = ScriptEnv::new("tim");
        let env = ActionEnv {
            msg: &msg,
            env: &script_env,
        };

        let action = RedirectAction::new("a@b.example");
        let mut tx = action.start(&env, &[]).expect("start");
        tx.execute(&env).expect("execute");
        let mut status = ExecStatus::default();
        let mut keep = true;
        tx.commit(&env, &mut status, &mut keep).expect("commit");
        assert!(!keep);
    }
}
