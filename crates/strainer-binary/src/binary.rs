//! The in-memory bytecode container and its emit interface.

use std::any::Any;

use smallvec::SmallVec;
use strainer_error::{Result, SieveError};
use strainer_types::ExtensionId;

use crate::block::Block;
use crate::codec;
use crate::{BLOCK_LINK_TABLE, BLOCK_MAIN};

/// One entry of the per-binary extension link table.
///
/// Local indices (the position in this table) are what the bytecode
/// references; the global [`ExtensionId`] is resolved at link or load
/// time. The per-binary context lives and dies with the binary.
pub struct LinkEntry {
    name: String,
    ext_id: ExtensionId,
    context: Option<Box<dyn Any>>,
    main_block: Option<u32>,
}

impl LinkEntry {
    /// Extension name as stored in block 0.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global registry id.
    #[must_use]
    pub const fn ext_id(&self) -> ExtensionId {
        self.ext_id
    }

    /// Block owned by this extension, when it claimed one.
    #[must_use]
    pub const fn main_block(&self) -> Option<u32> {
        self.main_block
    }
}

impl std::fmt::Debug for LinkEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkEntry")
            .field("name", &self.name)
            .field("ext_id", &self.ext_id)
            .field("main_block", &self.main_block)
            .finish_non_exhaustive()
    }
}

/// A compiled script: blocks plus the extension link table.
#[derive(Debug)]
pub struct Binary {
    script_name: Option<String>,
    blocks: Vec<Block>,
    active: u32,
    links: SmallVec<[LinkEntry; 8]>,
}

impl Binary {
    /// Fresh binary with the two system blocks; block 1 is active.
    #[must_use]
    pub fn new(script_name: Option<&str>) -> Self {
        Self {
            script_name: script_name.map(str::to_owned),
            blocks: vec![
                Block::new(BLOCK_LINK_TABLE, None),
                Block::new(BLOCK_MAIN, None),
            ],
            active: BLOCK_MAIN,
            links: SmallVec::new(),
        }
    }

    pub(crate) fn from_blocks(script_name: Option<String>, blocks: Vec<Block>) -> Self {
        Self {
            script_name,
            blocks,
            active: BLOCK_MAIN,
            links: SmallVec::new(),
        }
    }

    /// Identity of the script this binary was compiled from.
    #[must_use]
    pub fn script_name(&self) -> Option<&str> {
        self.script_name.as_deref()
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Block by id.
    pub fn block(&self, id: u32) -> Result<&Block> {
        self.blocks.get(id as usize).ok_or_else(|| {
            SieveError::corrupt(format!("reference to unknown block id {id}"))
        })
    }

    /// Append a new block owned by `ext_index`, returning its id.
    pub fn block_create(&mut self, ext_index: Option<usize>) -> u32 {
        let id = self.blocks.len() as u32;
        self.blocks.push(Block::new(id, ext_index));
        id
    }

    /// Make `id` the emit target, returning the previously active id.
    pub fn set_active(&mut self, id: u32) -> Result<u32> {
        if (id as usize) >= self.blocks.len() {
            return Err(SieveError::internal(format!(
                "cannot activate unknown block id {id}"
            )));
        }
        let prev = self.active;
        self.active = id;
        Ok(prev)
    }

    /// Currently active block id.
    #[must_use]
    pub const fn active(&self) -> u32 {
        self.active
    }

    /// Truncate block `id`.
    pub fn block_clear(&mut self, id: u32) -> Result<()> {
        let block = self
            .blocks
            .get_mut(id as usize)
            .ok_or_else(|| SieveError::internal(format!("cannot clear unknown block id {id}")))?;
        block.clear();
        Ok(())
    }

    pub(crate) fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub(crate) fn block_mut(&mut self, id: u32) -> &mut Block {
        &mut self.blocks[id as usize]
    }

    // -- emit interface (targets the active block) ------------------------

    fn active_buf(&mut self) -> &mut Vec<u8> {
        let active = self.active as usize;
        self.blocks[active].buf_mut()
    }

    /// Current emit position in the active block.
    #[must_use]
    pub fn emit_pos(&self) -> usize {
        self.blocks[self.active as usize].len()
    }

    /// Emit one byte.
    pub fn emit_byte(&mut self, byte: u8) {
        self.active_buf().push(byte);
    }

    /// Emit raw bytes.
    pub fn emit_data(&mut self, data: &[u8]) {
        self.active_buf().extend_from_slice(data);
    }

    /// Emit a varint.
    pub fn emit_varint(&mut self, value: u64) {
        codec::emit_varint(self.active_buf(), value);
    }

    /// Emit a length-prefixed NUL-terminated string.
    pub fn emit_string(&mut self, bytes: &[u8]) {
        codec::emit_string(self.active_buf(), bytes);
    }

    /// Emit a resolved signed offset.
    pub fn emit_offset(&mut self, offset: i32) {
        codec::emit_offset(self.active_buf(), offset);
    }

    /// Emit a zero offset to be patched later; returns its address.
    pub fn emit_offset_placeholder(&mut self) -> usize {
        let at = self.emit_pos();
        codec::emit_offset(self.active_buf(), 0);
        at
    }

    /// Patch a previously emitted offset so it lands on `target`.
    ///
    /// Offsets are relative to their own first byte.
    pub fn patch_jump(&mut self, at: usize, target: usize) -> Result<()> {
        let offset = i64::try_from(target)
            .ok()
            .and_then(|t| t.checked_sub(at as i64))
            .and_then(|o| i32::try_from(o).ok())
            .ok_or_else(|| SieveError::internal(format!("jump from {at} to {target} overflows")))?;
        codec::patch_offset(self.active_buf(), at, offset)
    }

    // -- link table -------------------------------------------------------

    /// Link an extension into this binary, returning its local index.
    /// Linking is idempotent per extension.
    pub fn link_extension(&mut self, ext_id: ExtensionId, name: &str) -> usize {
        if let Some(index) = self.link_index_of(ext_id) {
            return index;
        }
        self.links.push(LinkEntry {
            name: name.to_owned(),
            ext_id,
            context: None,
            main_block: None,
        });
        self.links.len() - 1
    }

    /// Local index of a linked extension.
    #[must_use]
    pub fn link_index_of(&self, ext_id: ExtensionId) -> Option<usize> {
        self.links.iter().position(|entry| entry.ext_id == ext_id)
    }

    /// Link entry by local index.
    pub fn link_by_index(&self, index: usize) -> Result<&LinkEntry> {
        self.links.get(index).ok_or_else(|| {
            SieveError::corrupt(format!("reference to unknown extension link index {index}"))
        })
    }

    /// All link entries in link order.
    #[must_use]
    pub fn links(&self) -> &[LinkEntry] {
        &self.links
    }

    /// Record the block owned by a linked extension.
    pub fn set_link_main_block(&mut self, index: usize, block_id: u32) -> Result<()> {
        let entry = self
            .links
            .get_mut(index)
            .ok_or_else(|| SieveError::internal(format!("unknown link index {index}")))?;
        entry.main_block = Some(block_id);
        Ok(())
    }

    /// Attach a per-binary extension context.
    pub fn set_link_context(&mut self, index: usize, context: Box<dyn Any>) -> Result<()> {
        let entry = self
            .links
            .get_mut(index)
            .ok_or_else(|| SieveError::internal(format!("unknown link index {index}")))?;
        entry.context = Some(context);
        Ok(())
    }

    /// Per-binary extension context, downcast to `T`.
    #[must_use]
    pub fn link_context<T: 'static>(&self, index: usize) -> Option<&T> {
        self.links
            .get(index)
            .and_then(|entry| entry.context.as_deref())
            .and_then(<dyn Any>::downcast_ref)
    }

    /// Serialise the link table into block 0: `varint(count)` followed by
    /// the extension names in link order. Called before every save.
    pub fn regenerate_link_block(&mut self) {
        let mut buf = Vec::new();
        codec::emit_varint(&mut buf, self.links.len() as u64);
        for entry in &self.links {
            codec::emit_string(&mut buf, entry.name.as_bytes());
        }
        self.blocks[BLOCK_LINK_TABLE as usize].replace_bytes(buf);
    }

    /// Parse block 0 and rebuild the link table by name resolution.
    pub fn resolve_link_block(
        &mut self,
        resolve: &dyn Fn(&str) -> Option<ExtensionId>,
    ) -> Result<()> {
        let block = self.block(BLOCK_LINK_TABLE)?;
        let mut addr = 0_usize;
        let count = block.read_varint_u32(&mut addr)? as usize;
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = block.read_string(&mut addr)?;
            let name = std::str::from_utf8(raw)
                .map_err(|_| SieveError::corrupt("extension name is not UTF-8"))?;
            names.push(name.to_owned());
        }

        self.links.clear();
        for name in names {
            let ext_id = resolve(&name).ok_or(SieveError::UnknownExtension { name: name.clone() })?;
            self.links.push(LinkEntry {
                name,
                ext_id,
                context: None,
                main_block: None,
            });
        }

        // Reconnect extension-owned blocks recorded in the index.
        for block in &self.blocks {
            if let Some(ext_index) = block.ext_index() {
                if ext_index >= self.links.len() {
                    return Err(SieveError::corrupt(format!(
                        "block {} owned by unknown extension index {ext_index}",
                        block.id()
                    )));
                }
                self.links[ext_index].main_block = Some(block.id());
            }
        }
        Ok(())
    }
}
