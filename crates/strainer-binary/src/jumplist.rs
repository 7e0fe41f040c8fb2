//! Forward-jump bookkeeping for code emission.
//!
//! The generator emits jump offsets before their target address is known;
//! a [`JumpList`] collects the placeholder positions and patches them all
//! once the target is reached.

use strainer_error::Result;

use crate::binary::Binary;

/// Unresolved forward jumps within the active block.
#[derive(Debug, Default)]
pub struct JumpList {
    jumps: Vec<usize>,
}

impl JumpList {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a placeholder offset and remember it.
    pub fn add(&mut self, binary: &mut Binary) {
        self.jumps.push(binary.emit_offset_placeholder());
    }

    /// Number of pending jumps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jumps.len()
    }

    /// Whether no jumps are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jumps.is_empty()
    }

    /// Patch every pending jump to the current emit position.
    pub fn resolve(self, binary: &mut Binary) -> Result<()> {
        let target = binary.emit_pos();
        for at in self.jumps {
            binary.patch_jump(at, target)?;
        }
        Ok(())
    }
}
