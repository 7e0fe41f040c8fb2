//! The action contract: definition, duplicate policy and the per-action
//! transaction driven by the two-phase commit.

use std::any::Any;

use strainer_error::Result;
use strainer_types::{ActionFlags, ExecStatus, MessageView, ScriptEnv};

use crate::side_effect::SideEffect;

/// Outcome of comparing a new action against one already in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateCheck {
    /// Unrelated; keep scanning.
    Distinct,
    /// Same effect; merge side effects and drop the new action.
    Duplicate,
    /// Cannot coexist; the script fails at the new action's source line.
    Conflict,
}

/// Everything an action needs at start/execute/commit time.
pub struct ActionEnv<'a> {
    /// Message under filtering.
    pub msg: &'a dyn MessageView,
    /// Host environment for this run.
    pub env: &'a ScriptEnv<'a>,
}

/// A deferred, committable effect accumulated in the result.
pub trait Action: std::fmt::Debug + Send {
    /// Definition name, e.g. `store`.
    fn name(&self) -> &'static str;

    /// Behavioural flags.
    fn flags(&self) -> ActionFlags {
        ActionFlags::empty()
    }

    /// Downcast support for duplicate checks.
    fn as_any(&self) -> &dyn Any;

    /// Structural equality against another action instance.
    fn equals(&self, other: &dyn Action) -> bool;

    /// Duplicate policy against an already-present action. The default
    /// treats structural equality as a mergeable duplicate.
    fn check_duplicate(&self, existing: &dyn Action) -> DuplicateCheck {
        if self.equals(existing) {
            DuplicateCheck::Duplicate
        } else {
            DuplicateCheck::Distinct
        }
    }

    /// Cross-run duplicate-tracking id for redirect-class actions; `None`
    /// opts out of duplicate suppression.
    fn duplicate_id(&self, msg: &dyn MessageView) -> Option<Vec<u8>> {
        let _ = msg;
        None
    }

    /// Open the action's transaction, acquiring whatever resources the
    /// later phases need. Side effects are resolved here so `execute`
    /// works from a settled plan.
    fn start(
        &self,
        env: &ActionEnv<'_>,
        side_effects: &[Box<dyn SideEffect>],
    ) -> Result<Box<dyn ActionTransaction>>;

    /// One line for the dry-run plan.
    fn describe(&self) -> String;
}

/// Transaction context produced by [`Action::start`].
///
/// Exactly one of `commit` or `rollback` runs per successful `start`,
/// on every path.
pub trait ActionTransaction {
    /// Perform the actual work (filing, forwarding). Errors here still
    /// permit per-action rollback.
    fn execute(&mut self, env: &ActionEnv<'_>) -> Result<()>;

    /// Finalise. Setting `*keep_out = false` cancels the implicit keep.
    fn commit(
        &mut self,
        env: &ActionEnv<'_>,
        status: &mut ExecStatus,
        keep_out: &mut bool,
    ) -> Result<()>;

    /// Undo and release resources.
    fn rollback(&mut self, env: &ActionEnv<'_>);
}
