//! Action operations: stop, keep, discard, redirect.
//!
//! Action operations start with the command's source line (plain varint)
//! followed by the optional side-effect list and any fixed operands.

use strainer_error::{Result, SieveError};
use strainer_result::{Action, ActionEnv, DiscardAction, RedirectAction, StoreAction};
use strainer_types::parse_address_list;

use crate::dump::Dumper;
use crate::interp::{Interpreter, RunEnv};
use crate::ops::Operation;

/// End script execution.
pub struct StopOp;

impl Operation for StopOp {
    fn mnemonic(&self) -> &'static str {
        "STOP"
    }

    fn execute(&self, it: &mut Interpreter<'_>, _renv: &mut RunEnv<'_>) -> Result<()> {
        it.stop();
        Ok(())
    }

    fn dump(&self, _d: &mut Dumper<'_>) -> Result<()> {
        Ok(())
    }
}

/// Explicit keep: store into the default mailbox.
pub struct KeepOp;

impl Operation for KeepOp {
    fn mnemonic(&self) -> &'static str {
        "KEEP"
    }

    fn execute(&self, it: &mut Interpreter<'_>, renv: &mut RunEnv<'_>) -> Result<()> {
        let source_line = it.cursor_mut().read_varint()? as u32;
        let side_effects = it.read_side_effect_list()?;
        let action = StoreAction::keep(&renv.env.default_mailbox);
        it.trace_action(&action.describe());
        let aenv = ActionEnv {
            msg: renv.msg,
            env: renv.env,
        };
        renv.result
            .add_action(&aenv, Box::new(action), side_effects, source_line)
    }

    fn dump(&self, d: &mut Dumper<'_>) -> Result<()> {
        d.dump_source_line()?;
        d.dump_side_effect_list()
    }
}

/// Cancel the implicit keep.
pub struct DiscardOp;

impl Operation for DiscardOp {
    fn mnemonic(&self) -> &'static str {
        "DISCARD"
    }

    fn execute(&self, it: &mut Interpreter<'_>, renv: &mut RunEnv<'_>) -> Result<()> {
        let source_line = it.cursor_mut().read_varint()? as u32;
        let action = DiscardAction::new();
        it.trace_action(&action.describe());
        let aenv = ActionEnv {
            msg: renv.msg,
            env: renv.env,
        };
        renv.result
            .add_action(&aenv, Box::new(action), Vec::new(), source_line)
    }

    fn dump(&self, d: &mut Dumper<'_>) -> Result<()> {
        d.dump_source_line()
    }
}

/// Forward the message to another address.
pub struct RedirectOp;

impl Operation for RedirectOp {
    fn mnemonic(&self) -> &'static str {
        "REDIRECT"
    }

    fn execute(&self, it: &mut Interpreter<'_>, renv: &mut RunEnv<'_>) -> Result<()> {
        let source_line = it.cursor_mut().read_varint()? as u32;
        let side_effects = it.read_side_effect_list()?;
        let address = it.read_string()?;
        let address = String::from_utf8(address).map_err(|_| {
            SieveError::script("redirect address is not valid UTF-8", source_line)
        })?;
        if parse_address_list(&address).is_empty() {
            return Err(SieveError::script(
                format!("invalid redirect address '{address}'"),
                source_line,
            ));
        }

        let action = RedirectAction::new(&address);
        it.trace_action(&action.describe());
        let aenv = ActionEnv {
            msg: renv.msg,
            env: renv.env,
        };
        renv.result
            .add_action(&aenv, Box::new(action), side_effects, source_line)
    }

    fn dump(&self, d: &mut Dumper<'_>) -> Result<()> {
        d.dump_source_line()?;
        d.dump_side_effect_list()?;
        d.dump_string_operand("address")
    }
}
