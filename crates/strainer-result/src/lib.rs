//! The result plan a script builds and the orchestrator commits.
//!
//! Interpretation appends tentative actions (with their side-effect
//! sublists) to a [`ScriptResult`]; nothing touches the mail store until
//! the two-phase commit drives every action through
//! `start → execute → commit` (or `rollback`). Exactly one terminal hook
//! runs per started action, on every path. If no delivering action
//! commits, the implicit keep stores the message in the default mailbox;
//! if that fails too the run reports `KeepFailed` so the host can refuse
//! the message at SMTP time.

pub mod action;
pub mod actions;
pub mod result;
pub mod side_effect;

pub use action::{Action, ActionEnv, ActionTransaction, DuplicateCheck};
pub use actions::{DiscardAction, RedirectAction, StoreAction};
pub use result::ScriptResult;
pub use side_effect::{FlagsEffect, SideEffect};
