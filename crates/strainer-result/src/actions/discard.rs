//! The discard action: silently drop the message by cancelling keep.

use std::any::Any;

use strainer_error::Result;
use strainer_types::ExecStatus;
use tracing::info;

use crate::action::{Action, ActionEnv, ActionTransaction};
use crate::side_effect::SideEffect;

/// Cancel the implicit keep so an undelivered message is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardAction;

impl DiscardAction {
    /// New discard.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Action for DiscardAction {
    fn name(&self) -> &'static str {
        "discard"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Action) -> bool {
        other.as_any().downcast_ref::<Self>().is_some()
    }

    fn start(
        &self,
        _env: &ActionEnv<'_>,
        _side_effects: &[Box<dyn SideEffect>],
    ) -> Result<Box<dyn ActionTransaction>> {
        Ok(Box::new(DiscardTransaction))
    }

    fn describe(&self) -> String {
        "discard".to_owned()
    }
}

struct DiscardTransaction;

impl ActionTransaction for DiscardTransaction {
    fn execute(&mut self, _env: &ActionEnv<'_>) -> Result<()> {
        Ok(())
    }

    fn commit(
        &mut self,
        _env: &ActionEnv<'_>,
        _status: &mut ExecStatus,
        keep_out: &mut bool,
    ) -> Result<()> {
        *keep_out = false;
        info!("marked message to be discarded when not explicitly delivered");
        Ok(())
    }

    fn rollback(&mut self, _env: &ActionEnv<'_>) {}
}
