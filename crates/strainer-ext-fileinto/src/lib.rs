//! The `fileinto` extension (RFC 5228 §4.1): file the message into an
//! arbitrary mailbox instead of the default one.

use strainer_engine::dump::Dumper;
use strainer_engine::ops::Operation;
use strainer_engine::{registry, Extension, Interpreter, RunEnv};
use strainer_error::{Result, SieveError};
use strainer_result::{Action, ActionEnv, StoreAction};
use strainer_types::ExtensionId;

/// Registered extension name.
pub const NAME: &str = "fileinto";

/// Extension-local code of the FILEINTO operation.
pub const OP_FILEINTO: u64 = 0;

/// File the message into the mailbox named by the string operand.
struct FileintoOp;

impl Operation for FileintoOp {
    fn mnemonic(&self) -> &'static str {
        "FILEINTO"
    }

    fn execute(&self, it: &mut Interpreter<'_>, renv: &mut RunEnv<'_>) -> Result<()> {
        let source_line = it.cursor_mut().read_varint()? as u32;
        let side_effects = it.read_side_effect_list()?;
        let mailbox = it.read_string()?;
        let mailbox = String::from_utf8(mailbox)
            .map_err(|_| SieveError::script("mailbox name is not valid UTF-8", source_line))?;
        if mailbox.is_empty() {
            return Err(SieveError::script("empty mailbox name", source_line));
        }

        let action = StoreAction::new(&mailbox);
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
        d.dump_string_operand("mailbox")
    }
}

static FILEINTO_OP: FileintoOp = FileintoOp;

/// The extension descriptor.
pub struct FileintoExtension;

impl Extension for FileintoExtension {
    fn name(&self) -> &'static str {
        NAME
    }

    fn operation(&self, code: u64) -> Option<&'static dyn Operation> {
        (code == OP_FILEINTO).then_some(&FILEINTO_OP as &dyn Operation)
    }
}

static EXTENSION: FileintoExtension = FileintoExtension;

/// Register with the process-global registry.
pub fn register() -> Result<ExtensionId> {
    registry::register(&EXTENSION)
}
