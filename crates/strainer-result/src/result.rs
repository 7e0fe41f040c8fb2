//! Ordered action list and the two-phase commit over it.

use std::io::Write;

use strainer_error::{Result, SieveError};
use strainer_types::{ActionFlags, ExecStatus};
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionEnv, ActionTransaction, DuplicateCheck};
use crate::actions::StoreAction;
use crate::side_effect::SideEffect;

/// Default ceiling on accumulated actions per result.
pub const DEFAULT_MAX_ACTIONS: usize = 32;

/// One accumulated action with its side-effect sublist.
pub struct ActionEntry {
    action: Box<dyn Action>,
    side_effects: Vec<Box<dyn SideEffect>>,
    source_line: u32,
}

impl ActionEntry {
    /// The action definition and data.
    #[must_use]
    pub fn action(&self) -> &dyn Action {
        self.action.as_ref()
    }

    /// Side effects in insertion order.
    #[must_use]
    pub fn side_effects(&self) -> &[Box<dyn SideEffect>] {
        &self.side_effects
    }

    /// 1-based source line of the command that added the action.
    #[must_use]
    pub const fn source_line(&self) -> u32 {
        self.source_line
    }
}

struct ImplicitEffect {
    action_name: Option<&'static str>,
    effect: Box<dyn SideEffect>,
}

enum SlotState {
    Started,
    Executed,
    Failed,
    Committed,
    RolledBack,
}

struct Slot {
    tx: Box<dyn ActionTransaction>,
    state: SlotState,
    name: &'static str,
}

fn rollback_open(slots: &mut [Slot], env: &ActionEnv<'_>) -> usize {
    let mut rolled_back = 0;
    for slot in slots {
        match slot.state {
            SlotState::Committed | SlotState::RolledBack => {}
            _ => {
                slot.tx.rollback(env);
                slot.state = SlotState::RolledBack;
                rolled_back += 1;
            }
        }
    }
    rolled_back
}

/// The ordered plan of actions built by a script.
///
/// Appended to only while a script interprets; the two-phase
/// [`execute`](ScriptResult::execute) drives `start → execute → commit`
/// with exactly one terminal hook per started action.
pub struct ScriptResult {
    entries: Vec<ActionEntry>,
    implicit_effects: Vec<ImplicitEffect>,
    implicit_keep: bool,
    max_actions: usize,
    executed: usize,
    failed: usize,
    committing: bool,
}

impl Default for ScriptResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptResult {
    /// Empty result with the default action ceiling.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_actions(DEFAULT_MAX_ACTIONS)
    }

    /// Empty result with a custom action ceiling.
    #[must_use]
    pub fn with_max_actions(max_actions: usize) -> Self {
        Self {
            entries: Vec::new(),
            implicit_effects: Vec::new(),
            implicit_keep: true,
            max_actions,
            executed: 0,
            failed: 0,
            committing: false,
        }
    }

    /// Accumulated entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[ActionEntry] {
        &self.entries
    }

    /// Number of accumulated actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no actions were accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Actions committed so far.
    #[must_use]
    pub const fn executed_count(&self) -> usize {
        self.executed
    }

    /// Actions that failed or were rolled back.
    #[must_use]
    pub const fn failed_count(&self) -> usize {
        self.failed
    }

    /// Enable or disable the implicit keep. Multiscript composition
    /// disables it between scripts and restores it for the final commit.
    pub fn set_implicit_keep(&mut self, enabled: bool) {
        self.implicit_keep = enabled;
    }

    /// Whether the implicit keep is currently enabled.
    #[must_use]
    pub const fn implicit_keep(&self) -> bool {
        self.implicit_keep
    }

    /// Register a side effect applied to every later-added action whose
    /// definition name matches (`None` matches all). Merges into an
    /// existing implicit effect of the same kind and filter.
    pub fn add_implicit_side_effect(
        &mut self,
        action_name: Option<&'static str>,
        effect: Box<dyn SideEffect>,
    ) {
        for existing in &mut self.implicit_effects {
            if existing.action_name == action_name && existing.effect.name() == effect.name() {
                if existing.effect.merge(effect.as_ref()) {
                    return;
                }
            }
        }
        self.implicit_effects.push(ImplicitEffect {
            action_name,
            effect,
        });
    }

    /// Replace the implicit side effect of this kind and filter outright.
    pub fn set_implicit_side_effect(
        &mut self,
        action_name: Option<&'static str>,
        effect: Box<dyn SideEffect>,
    ) {
        self.implicit_effects.retain(|existing| {
            !(existing.action_name == action_name && existing.effect.name() == effect.name())
        });
        self.implicit_effects.push(ImplicitEffect {
            action_name,
            effect,
        });
    }

    /// Add an action with its explicit side effects.
    ///
    /// Performs duplicate collapsing (merging side effects), conflict
    /// detection, duplicate-delivery suppression through the host's
    /// duplicate database, and the action-count ceiling.
    pub fn add_action(
        &mut self,
        env: &ActionEnv<'_>,
        action: Box<dyn Action>,
        mut side_effects: Vec<Box<dyn SideEffect>>,
        source_line: u32,
    ) -> Result<()> {
        if self.committing {
            return Err(SieveError::internal(
                "action added while the result is committing",
            ));
        }

        if let (Some(db), Some(id)) = (env.env.duplicates, action.duplicate_id(env.msg)) {
            if db.check(&id, &env.env.username) {
                info!(
                    action = action.name(),
                    source_line, "suppressed duplicate delivery"
                );
                return Ok(());
            }
        }

        for entry in &mut self.entries {
            match action.check_duplicate(entry.action.as_ref()) {
                DuplicateCheck::Distinct => {}
                DuplicateCheck::Duplicate => {
                    for effect in side_effects.drain(..) {
                        let merged = entry
                            .side_effects
                            .iter_mut()
                            .any(|existing| {
                                existing.name() == effect.name()
                                    && existing.merge(effect.as_ref())
                            });
                        if !merged {
                            entry.side_effects.push(effect);
                        }
                    }
                    debug!(
                        action = action.name(),
                        source_line, "merged duplicate action"
                    );
                    return Ok(());
                }
                DuplicateCheck::Conflict => {
                    return Err(SieveError::script(
                        format!(
                            "{} action conflicts with earlier {} action",
                            action.name(),
                            entry.action.name()
                        ),
                        source_line,
                    ));
                }
            }
        }

        if self.entries.len() >= self.max_actions {
            return Err(SieveError::script(
                format!("total number of actions exceeds policy limit {}", self.max_actions),
                source_line,
            ));
        }

        for implicit in &self.implicit_effects {
            let applies = implicit
                .action_name
                .is_none_or(|name| name == action.name());
            let already_present = side_effects
                .iter()
                .any(|effect| effect.name() == implicit.effect.name());
            if applies && !already_present {
                side_effects.push(implicit.effect.dup());
            }
        }

        self.entries.push(ActionEntry {
            action,
            side_effects,
            source_line,
        });
        Ok(())
    }

    /// Run the two-phase commit over the accumulated actions, then the
    /// implicit keep when still wanted.
    ///
    /// Temporary failures propagate untouched so the caller can retry
    /// delivery. A permanent failure falls back to the implicit keep; if
    /// even that fails the error is [`SieveError::KeepFailed`].
    pub fn execute(&mut self, env: &ActionEnv<'_>, status: &mut ExecStatus) -> Result<()> {
        self.committing = true;
        let outcome = self.commit_actions(env, status);
        self.committing = false;

        match outcome {
            Ok(keep_cancelled) => {
                if self.implicit_keep && !keep_cancelled {
                    self.attempt_keep(env, status)?;
                }
                Ok(())
            }
            Err(err) if err.is_temporary() => Err(err),
            Err(err) => {
                warn!(error = %err, "result execution failed");
                if self.implicit_keep {
                    self.attempt_keep(env, status)?;
                }
                Err(err)
            }
        }
    }

    fn commit_actions(&mut self, env: &ActionEnv<'_>, status: &mut ExecStatus) -> Result<bool> {
        let mut slots: Vec<Slot> = Vec::with_capacity(self.entries.len());

        // Phase 1: start every action in order.
        for entry in &self.entries {
            match entry.action.start(env, &entry.side_effects) {
                Ok(tx) => slots.push(Slot {
                    tx,
                    state: SlotState::Started,
                    name: entry.action.name(),
                }),
                Err(err) => {
                    error!(
                        action = entry.action.name(),
                        source_line = entry.source_line,
                        error = %err,
                        "action failed to start"
                    );
                    self.failed += rollback_open(&mut slots, env) + 1;
                    return Err(err);
                }
            }
        }

        // Phase 2: execute everything that started.
        let mut first_err: Option<SieveError> = None;
        for index in 0..slots.len() {
            match slots[index].tx.execute(env) {
                Ok(()) => slots[index].state = SlotState::Executed,
                Err(err) if err.is_temporary() => {
                    self.failed += rollback_open(&mut slots, env);
                    return Err(err);
                }
                Err(err) => {
                    error!(action = slots[index].name, error = %err, "action failed to execute");
                    slots[index].state = SlotState::Failed;
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        // Phase 3: commit successes in insertion order; the first commit
        // failure rolls back everything still open.
        let mut keep_cancelled = false;
        let mut committed_any = false;
        let mut commit_err: Option<SieveError> = None;
        for index in 0..slots.len() {
            if !matches!(slots[index].state, SlotState::Executed) || commit_err.is_some() {
                continue;
            }
            let mut keep_out = true;
            match slots[index].tx.commit(env, status, &mut keep_out) {
                Ok(()) => {
                    slots[index].state = SlotState::Committed;
                    self.executed += 1;
                    committed_any = true;
                    if !keep_out {
                        keep_cancelled = true;
                    }
                }
                Err(err) if err.is_temporary() => {
                    self.failed += rollback_open(&mut slots, env);
                    return Err(err);
                }
                Err(err) => {
                    error!(action = slots[index].name, error = %err, "action failed to commit");
                    slots[index].state = SlotState::Failed;
                    commit_err = Some(err);
                }
            }
        }

        // Terminal hooks: everything not committed gets its rollback.
        self.failed += rollback_open(&mut slots, env);

        if let Some(err) = first_err.or(commit_err) {
            if committed_any {
                warn!(error = %err, "some actions failed but the message was delivered");
            } else {
                return Err(err);
            }
        }
        Ok(keep_cancelled)
    }

    /// Store into the default mailbox because nothing else delivered.
    fn attempt_keep(&mut self, env: &ActionEnv<'_>, status: &mut ExecStatus) -> Result<()> {
        status.tried_default_save = true;
        let action = StoreAction::keep(&env.env.default_mailbox);
        let side_effects: Vec<Box<dyn SideEffect>> = self
            .implicit_effects
            .iter()
            .filter(|implicit| {
                implicit
                    .action_name
                    .is_none_or(|name| name == action.name())
            })
            .map(|implicit| implicit.effect.dup())
            .collect();

        let mut tx = action.start(env, &side_effects).map_err(|err| {
            error!(error = %err, "implicit keep failed to start");
            if err.is_temporary() { err } else { SieveError::KeepFailed }
        })?;

        if let Err(err) = tx.execute(env) {
            tx.rollback(env);
            self.failed += 1;
            error!(error = %err, "implicit keep failed to execute");
            return Err(if err.is_temporary() { err } else { SieveError::KeepFailed });
        }

        let mut keep_out = true;
        if let Err(err) = tx.commit(env, status, &mut keep_out) {
            tx.rollback(env);
            self.failed += 1;
            error!(error = %err, "implicit keep failed to commit");
            return Err(if err.is_temporary() { err } else { SieveError::KeepFailed });
        }

        self.executed += 1;
        info!(mailbox = %env.env.default_mailbox, "performed implicit keep");
        Ok(())
    }

    /// Whether the implicit keep would run for the current plan.
    #[must_use]
    pub fn implicit_keep_expected(&self) -> bool {
        self.implicit_keep
            && !self.entries.iter().any(|entry| {
                entry.action.flags().contains(ActionFlags::TRIES_DELIVER)
                    || entry.action.name() == "discard"
            })
    }

    /// Print the dry-run plan instead of committing it.
    pub fn print(&self, out: &mut dyn Write, env: &ActionEnv<'_>) -> std::io::Result<()> {
        writeln!(out, "Performed actions:")?;
        if self.entries.is_empty() {
            writeln!(out, "  (none)")?;
        }
        for entry in &self.entries {
            writeln!(out, " * {}", entry.action.describe())?;
            for effect in &entry.side_effects {
                writeln!(out, "    + {}", effect.describe())?;
            }
        }
        writeln!(out)?;
        writeln!(out, "Implicit keep:")?;
        if self.implicit_keep_expected() {
            writeln!(
                out,
                " * store message in mailbox '{}'",
                env.env.default_mailbox
            )?;
        } else {
            writeln!(out, "  (cancelled)")?;
        }
        Ok(())
    }
}
