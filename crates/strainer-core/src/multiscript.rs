//! Multiscript composition: several binaries share one result.
//!
//! The implicit keep is disabled between scripts and restored for the
//! final commit; each script runs in its own interpreter and yields its
//! accumulated actions into the shared plan. A failing script drops the
//! plan and falls back to the implicit keep.

use strainer_binary::Binary;
use strainer_error::Result;
use strainer_result::ScriptResult;
use strainer_types::{ErrorCode, ExecStatus, MessageView, ScriptEnv};
use tracing::{error, info};

use crate::{commit, Sieve};

/// Driver chaining scripts over one shared result.
pub struct MultiScript<'s> {
    sieve: &'s Sieve,
    result: ScriptResult,
    finished: bool,
}

impl<'s> MultiScript<'s> {
    /// New chain with an empty shared result.
    #[must_use]
    pub fn new(sieve: &'s Sieve) -> Self {
        let mut result = ScriptResult::with_max_actions(sieve.config().max_actions);
        result.set_implicit_keep(false);
        Self {
            sieve,
            result,
            finished: false,
        }
    }

    /// Accumulated actions so far.
    #[must_use]
    pub fn result(&self) -> &ScriptResult {
        &self.result
    }

    /// Run one script into the shared result.
    ///
    /// Returns `true` when the chain should continue with the next
    /// script, `false` when this script ended it (`stop`).
    pub fn run(
        &mut self,
        binary: &Binary,
        msg: &dyn MessageView,
        env: &ScriptEnv<'_>,
    ) -> Result<bool> {
        debug_assert!(!self.finished, "multiscript already finished");
        let before = self.result.len();
        let outcome = self
            .sieve
            .interpret(binary, msg, env, &mut self.result, None)?;
        info!(
            script = binary.script_name().unwrap_or("<anonymous>"),
            added = self.result.len() - before,
            ?outcome,
            "multiscript step finished"
        );
        Ok(outcome != strainer_engine::Outcome::Stopped)
    }

    /// Commit the shared result, restoring the implicit keep first.
    pub fn finish(
        mut self,
        msg: &dyn MessageView,
        env: &ScriptEnv<'_>,
        status: &mut ExecStatus,
    ) -> ErrorCode {
        self.finished = true;
        self.result.set_implicit_keep(true);
        commit(&mut self.result, msg, env, status)
    }

    /// Abandon the accumulated plan after a script failure and fall back
    /// to the implicit keep alone.
    pub fn fail(
        mut self,
        msg: &dyn MessageView,
        env: &ScriptEnv<'_>,
        status: &mut ExecStatus,
    ) -> ErrorCode {
        self.finished = true;
        error!(
            discarded = self.result.len(),
            "multiscript chain failed, discarding plan"
        );
        let mut keep_only = ScriptResult::with_max_actions(self.sieve.config().max_actions);
        commit(&mut keep_only, msg, env, status)
    }
}
