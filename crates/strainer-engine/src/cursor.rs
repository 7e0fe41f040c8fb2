//! Read cursor over one block, with extension-aware dispatch resolution.

use strainer_binary::{Binary, Block};
use strainer_error::{Result, SieveError};
use strainer_match::{
    core_address_part, core_comparator, core_match_type, AddressPart, Comparator, MatchType,
};
use strainer_types::ExtensionId;

use crate::extension::{Extension, SideEffectDef};
use crate::ops::{core_operation, Operation};
use crate::registry;
use crate::CUSTOM_BASE;

/// Program-counter-carrying reader used by the interpreter and the
/// dumper. Object operands and opcodes resolve through the binary's link
/// table: codes below [`CUSTOM_BASE`] index the class's core table,
/// higher codes select a linked extension whose own table is indexed by
/// a trailing varint.
pub struct CodeCursor<'a> {
    binary: &'a Binary,
    block: &'a Block,
    /// Current read address within the block.
    pub pc: usize,
}

impl<'a> CodeCursor<'a> {
    /// Cursor at the start of `block_id`.
    pub fn new(binary: &'a Binary, block_id: u32) -> Result<Self> {
        let block = binary.block(block_id)?;
        Ok(Self {
            binary,
            block,
            pc: 0,
        })
    }

    /// The binary this cursor reads from.
    #[must_use]
    pub const fn binary(&self) -> &'a Binary {
        self.binary
    }

    /// Size of the block being read.
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.block.len()
    }

    /// Whether the cursor is at or past the end of the block.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.pc >= self.block.len()
    }

    /// Read one byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        self.block.read_byte(&mut self.pc)
    }

    /// Read a 64-bit varint.
    pub fn read_varint(&mut self) -> Result<u64> {
        self.block.read_varint(&mut self.pc)
    }

    /// Read a 4-byte big-endian signed offset.
    pub fn read_offset(&mut self) -> Result<i32> {
        self.block.read_offset(&mut self.pc)
    }

    /// Read a length-prefixed string into an owned buffer.
    pub fn read_string_raw(&mut self) -> Result<Vec<u8>> {
        Ok(self.block.read_string(&mut self.pc)?.to_vec())
    }

    fn resolve_extension(&self, code: u8) -> Result<(ExtensionId, &'static dyn Extension)> {
        let index = usize::from(code - CUSTOM_BASE);
        let entry = self.binary.link_by_index(index)?;
        let ext = registry::by_id(entry.ext_id()).ok_or_else(|| {
            SieveError::corrupt(format!(
                "link index {index} resolves to unregistered extension id {}",
                entry.ext_id().index()
            ))
        })?;
        Ok((entry.ext_id(), ext))
    }

    /// Read and resolve an opcode.
    pub fn read_operation(&mut self) -> Result<&'static dyn Operation> {
        let at = self.pc;
        let opcode = self.read_byte()?;
        if opcode < CUSTOM_BASE {
            return core_operation(opcode).ok_or_else(|| {
                SieveError::corrupt(format!("unknown opcode {opcode} at offset {at}"))
            });
        }
        let (_, ext) = self.resolve_extension(opcode)?;
        let code = self.read_varint()?;
        ext.operation(code).ok_or_else(|| {
            SieveError::corrupt(format!(
                "extension `{}` has no operation {code} (offset {at})",
                ext.name()
            ))
        })
    }

    /// Read a match-type object operand (class byte already consumed).
    pub fn read_match_type(&mut self) -> Result<&'static dyn MatchType> {
        let at = self.pc;
        let code = self.read_byte()?;
        if code < CUSTOM_BASE {
            return core_match_type(u64::from(code)).ok_or_else(|| {
                SieveError::corrupt(format!("unknown match type {code} at offset {at}"))
            });
        }
        let (_, ext) = self.resolve_extension(code)?;
        let sub = self.read_varint()?;
        ext.match_type(sub).ok_or_else(|| {
            SieveError::corrupt(format!(
                "extension `{}` has no match type {sub} (offset {at})",
                ext.name()
            ))
        })
    }

    /// Read a comparator object operand (class byte already consumed).
    pub fn read_comparator(&mut self) -> Result<&'static dyn Comparator> {
        let at = self.pc;
        let code = self.read_byte()?;
        if code < CUSTOM_BASE {
            return core_comparator(u64::from(code)).ok_or_else(|| {
                SieveError::corrupt(format!("unknown comparator {code} at offset {at}"))
            });
        }
        let (_, ext) = self.resolve_extension(code)?;
        let sub = self.read_varint()?;
        ext.comparator(sub).ok_or_else(|| {
            SieveError::corrupt(format!(
                "extension `{}` has no comparator {sub} (offset {at})",
                ext.name()
            ))
        })
    }

    /// Read an address-part object operand (class byte already consumed).
    pub fn read_address_part(&mut self) -> Result<&'static dyn AddressPart> {
        let at = self.pc;
        let code = self.read_byte()?;
        if code < CUSTOM_BASE {
            return core_address_part(u64::from(code)).ok_or_else(|| {
                SieveError::corrupt(format!("unknown address part {code} at offset {at}"))
            });
        }
        let (_, ext) = self.resolve_extension(code)?;
        let sub = self.read_varint()?;
        ext.address_part(sub).ok_or_else(|| {
            SieveError::corrupt(format!(
                "extension `{}` has no address part {sub} (offset {at})",
                ext.name()
            ))
        })
    }

    /// Read a side-effect definition (class byte already consumed). The
    /// core table is empty: all side effects come from extensions.
    pub fn read_side_effect_def(&mut self) -> Result<&'static dyn SideEffectDef> {
        let at = self.pc;
        let code = self.read_byte()?;
        if code < CUSTOM_BASE {
            return Err(SieveError::corrupt(format!(
                "unknown core side effect {code} at offset {at}"
            )));
        }
        let (_, ext) = self.resolve_extension(code)?;
        let sub = self.read_varint()?;
        ext.side_effect(sub).ok_or_else(|| {
            SieveError::corrupt(format!(
                "extension `{}` has no side effect {sub} (offset {at})",
                ext.name()
            ))
        })
    }
}
