//! The extension contract: a named bundle of operations, match types,
//! comparators, address parts and side effects, with lifecycle hooks
//! bracketing binaries and interpreters.

use strainer_binary::Binary;
use strainer_error::Result;
use strainer_match::{AddressPart, Comparator, MatchType};
use strainer_result::SideEffect;
use strainer_types::ExtensionId;

use crate::interp::Interpreter;

/// A language extension registered with the process-global registry.
///
/// Tables return `'static` descriptors so dispatch stays table-driven;
/// all hooks default to no-ops.
pub trait Extension: Send + Sync + 'static {
    /// Registered name, as stored in binaries' link tables.
    fn name(&self) -> &'static str;

    /// Preloaded extensions model core language features and are linked
    /// into every binary implicitly; regular extensions are linked when a
    /// script `require`s them.
    fn preloaded(&self) -> bool {
        false
    }

    /// Extension-local operation table.
    fn operation(&self, code: u64) -> Option<&'static dyn crate::ops::Operation> {
        let _ = code;
        None
    }

    /// Extension-local match-type table.
    fn match_type(&self, code: u64) -> Option<&'static dyn MatchType> {
        let _ = code;
        None
    }

    /// Extension-local comparator table.
    fn comparator(&self, code: u64) -> Option<&'static dyn Comparator> {
        let _ = code;
        None
    }

    /// Extension-local address-part table.
    fn address_part(&self, code: u64) -> Option<&'static dyn AddressPart> {
        let _ = code;
        None
    }

    /// Extension-local side-effect table.
    fn side_effect(&self, code: u64) -> Option<&'static dyn SideEffectDef> {
        let _ = code;
        None
    }

    /// Called once per interpreter, after the binary's extensions are
    /// linked and before the first operation executes.
    fn interpreter_loaded(&self, id: ExtensionId, it: &mut Interpreter<'_>) -> Result<()> {
        let _ = (id, it);
        Ok(())
    }

    /// Called while saving a binary, before the file is assembled, so the
    /// extension can flush deferred data into its block.
    fn binary_save(&self, binary: &mut Binary, link_index: usize) -> Result<()> {
        let _ = (binary, link_index);
        Ok(())
    }

    /// Called after a binary is loaded and link-resolved, in link order.
    fn binary_loaded(&self, binary: &mut Binary, link_index: usize) -> Result<()> {
        let _ = (binary, link_index);
        Ok(())
    }
}

/// A side-effect definition: parses its operand payload into a concrete
/// [`SideEffect`] instance attached to the surrounding action.
pub trait SideEffectDef: Send + Sync {
    /// Kind name, matching [`SideEffect::name`].
    fn name(&self) -> &'static str;

    /// Read the payload from the instruction stream.
    fn read(&self, it: &mut Interpreter<'_>) -> Result<Box<dyn SideEffect>>;

    /// Disassemble the payload for the dumper.
    fn dump(&self, cursor: &mut crate::cursor::CodeCursor<'_>) -> Result<String>;
}

/// Seam the variables extension installs so string operands can carry
/// `${..}` substitutions without the core knowing about variables.
pub trait StringExpander {
    /// Expand `raw` against the interpreter's current state.
    fn expand(&self, it: &Interpreter<'_>, raw: &[u8]) -> Result<Vec<u8>>;
}
