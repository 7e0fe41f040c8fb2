//! The `imap4flags` extension (RFC 5232): IMAP flag adjustments on
//! store-class actions.
//!
//! The `:flags` tagged argument becomes an explicit flags side effect on
//! the surrounding action; `setflag`/`addflag`/`removeflag` maintain the
//! internal flag set through the result's implicit-side-effect mechanism,
//! so it reaches every later store (including the implicit keep) unless
//! an explicit `:flags` overrides it.

use strainer_engine::cursor::CodeCursor;
use strainer_engine::dump::Dumper;
use strainer_engine::ops::Operation;
use strainer_engine::{operand, registry, Extension, Interpreter, RunEnv, SideEffectDef};
use strainer_error::{Result, SieveError};
use strainer_result::{FlagsEffect, SideEffect};
use strainer_types::ExtensionId;

/// Registered extension name.
pub const NAME: &str = "imap4flags";

/// Extension-local code of the flags side effect.
pub const SEFFECT_FLAGS: u64 = 0;

/// Extension-local operation codes.
pub const OP_SETFLAG: u64 = 0;
/// Add flags to the internal set.
pub const OP_ADDFLAG: u64 = 1;
/// Remove flags from the internal set.
pub const OP_REMOVEFLAG: u64 = 2;

fn read_flag_list(it: &mut Interpreter<'_>, source_line: u32) -> Result<Vec<String>> {
    let items = it.read_string_list()?;
    let mut flags = Vec::with_capacity(items.len());
    for item in items {
        let text = String::from_utf8(item)
            .map_err(|_| SieveError::script("flag list is not valid UTF-8", source_line))?;
        // A single list entry may carry several space-separated flags.
        for flag in text.split_ascii_whitespace() {
            flags.push(flag.to_owned());
        }
    }
    Ok(flags)
}

// ---------------------------------------------------------------------------
// The :flags side effect
// ---------------------------------------------------------------------------

struct FlagsSideEffectDef;

impl SideEffectDef for FlagsSideEffectDef {
    fn name(&self) -> &'static str {
        FlagsEffect::NAME
    }

    fn read(&self, it: &mut Interpreter<'_>) -> Result<Box<dyn SideEffect>> {
        let flags = read_flag_list(it, 0)?;
        Ok(Box::new(FlagsEffect::set(&flags)))
    }

    fn dump(&self, cursor: &mut CodeCursor<'_>) -> Result<String> {
        let items = operand::read_string_list_raw(cursor)?;
        let rendered: Vec<String> = items
            .iter()
            .map(|item| String::from_utf8_lossy(item).into_owned())
            .collect();
        Ok(format!("[{}]", rendered.join(", ")))
    }
}

static FLAGS_SEFFECT: FlagsSideEffectDef = FlagsSideEffectDef;

// ---------------------------------------------------------------------------
// setflag / addflag / removeflag
// ---------------------------------------------------------------------------

enum FlagOpKind {
    Set,
    Add,
    Remove,
}

struct FlagOp {
    kind: FlagOpKind,
}

impl Operation for FlagOp {
    fn mnemonic(&self) -> &'static str {
        match self.kind {
            FlagOpKind::Set => "SETFLAG",
            FlagOpKind::Add => "ADDFLAG",
            FlagOpKind::Remove => "REMOVEFLAG",
        }
    }

    fn execute(&self, it: &mut Interpreter<'_>, renv: &mut RunEnv<'_>) -> Result<()> {
        let source_line = it.cursor_mut().read_varint()? as u32;
        let flags = read_flag_list(it, source_line)?;
        match self.kind {
            FlagOpKind::Set => {
                renv.result
                    .set_implicit_side_effect(Some("store"), Box::new(FlagsEffect::set(&flags)));
            }
            FlagOpKind::Add => {
                renv.result
                    .add_implicit_side_effect(Some("store"), Box::new(FlagsEffect::add(&flags)));
            }
            FlagOpKind::Remove => {
                renv.result.add_implicit_side_effect(
                    Some("store"),
                    Box::new(FlagsEffect::remove(&flags)),
                );
            }
        }
        Ok(())
    }

    fn dump(&self, d: &mut Dumper<'_>) -> Result<()> {
        d.dump_source_line()?;
        d.dump_string_list_operand("flags")
    }
}

static SETFLAG_OP: FlagOp = FlagOp {
    kind: FlagOpKind::Set,
};
static ADDFLAG_OP: FlagOp = FlagOp {
    kind: FlagOpKind::Add,
};
static REMOVEFLAG_OP: FlagOp = FlagOp {
    kind: FlagOpKind::Remove,
};

/// The extension descriptor.
pub struct ImapFlagsExtension;

impl Extension for ImapFlagsExtension {
    fn name(&self) -> &'static str {
        NAME
    }

    fn operation(&self, code: u64) -> Option<&'static dyn Operation> {
        match code {
            OP_SETFLAG => Some(&SETFLAG_OP),
            OP_ADDFLAG => Some(&ADDFLAG_OP),
            OP_REMOVEFLAG => Some(&REMOVEFLAG_OP),
            _ => None,
        }
    }

    fn side_effect(&self, code: u64) -> Option<&'static dyn SideEffectDef> {
        (code == SEFFECT_FLAGS).then_some(&FLAGS_SEFFECT as &dyn SideEffectDef)
    }
}

static EXTENSION: ImapFlagsExtension = ImapFlagsExtension;

/// Register with the process-global registry.
pub fn register() -> Result<ExtensionId> {
    registry::register(&EXTENSION)
}
