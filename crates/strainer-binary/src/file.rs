//! Bit-exact on-disk layout: header, block index, block payloads.
//!
//! ```text
//! +----------- header (aligned 4) -----------+
//! | magic u32 | ver_major u16 | ver_minor u16 | block_count u32 |
//! +-------------------------------------------+
//! | index[block_count] (id u32, size u32, offset u32, ext_id u32) |
//! +-------------------------------------------+
//! | block[0] header (id u32, size u32) payload ... pad |
//! | block[1] header (id u32, size u32) payload ... pad |
//! +-------------------------------------------+
//! ```
//!
//! Integer fields are native byte order; a binary produced on a host of
//! the opposite endianness shows a byte-reversed magic and is rejected so
//! the caller recompiles. Commit is write-to-temp plus atomic rename.

use std::fs;
use std::io::Write;
use std::path::Path;

use strainer_error::{Result, SieveError};
use strainer_types::ExtensionId;
use tracing::{debug, info};

use crate::binary::Binary;
use crate::block::Block;
use crate::{align4, BINARY_MAGIC, VERSION_MAJOR, VERSION_MINOR};

const HEADER_BYTES: usize = 12;
const INDEX_ENTRY_BYTES: usize = 16;
const BLOCK_HEADER_BYTES: usize = 8;
const SYSTEM_EXT_ID: u32 = u32::MAX;

/// Serialise `binary` to its exact file representation.
///
/// The link table is regenerated into block 0 first; extension
/// `binary_save` hooks must already have run (the engine's save entry
/// point takes care of that ordering).
#[must_use]
pub fn to_bytes(binary: &mut Binary) -> Vec<u8> {
    binary.regenerate_link_block();

    let block_count = binary.block_count();
    let index_at = HEADER_BYTES;
    let blocks_at = align4(index_at + block_count * INDEX_ENTRY_BYTES);

    let mut out = Vec::with_capacity(blocks_at);
    out.extend_from_slice(&BINARY_MAGIC.to_ne_bytes());
    out.extend_from_slice(&VERSION_MAJOR.to_ne_bytes());
    out.extend_from_slice(&VERSION_MINOR.to_ne_bytes());
    out.extend_from_slice(&(block_count as u32).to_ne_bytes());

    // Reserve the index; it is back-patched once offsets are known.
    out.resize(blocks_at, 0);

    let mut offsets = Vec::with_capacity(block_count);
    for id in 0..block_count as u32 {
        let offset = out.len() as u32;
        offsets.push(offset);
        let block = &binary.blocks()[id as usize];
        out.extend_from_slice(&id.to_ne_bytes());
        out.extend_from_slice(&(block.len() as u32).to_ne_bytes());
        out.extend_from_slice(block.bytes());
        out.resize(align4(out.len()), 0);
    }

    for (id, offset) in offsets.iter().enumerate() {
        let block = &binary.blocks()[id];
        let at = index_at + id * INDEX_ENTRY_BYTES;
        out[at..at + 4].copy_from_slice(&(id as u32).to_ne_bytes());
        out[at + 4..at + 8].copy_from_slice(&(block.len() as u32).to_ne_bytes());
        out[at + 8..at + 12].copy_from_slice(&offset.to_ne_bytes());
        let ext_id = block
            .ext_index()
            .map_or(SYSTEM_EXT_ID, |index| index as u32);
        out[at + 12..at + 16].copy_from_slice(&ext_id.to_ne_bytes());
    }

    for (id, offset) in offsets.into_iter().enumerate() {
        binary.block_mut(id as u32).set_file_offset(offset);
    }
    out
}

/// Save `binary` to `path` via temp file and atomic rename.
pub fn save(binary: &mut Binary, path: &Path) -> Result<()> {
    let bytes = to_bytes(binary);
    let tmp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)?;

    info!(
        path = %path.display(),
        bytes = bytes.len(),
        blocks = binary.block_count(),
        "saved binary"
    );
    Ok(())
}

fn read_u32_ne(data: &[u8], at: usize) -> Result<u32> {
    let end = at
        .checked_add(4)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| SieveError::corrupt(format!("file truncated at offset {at}")))?;
    let mut bytes = [0_u8; 4];
    bytes.copy_from_slice(&data[at..end]);
    Ok(u32::from_ne_bytes(bytes))
}

fn read_u16_ne(data: &[u8], at: usize) -> Result<u16> {
    let end = at
        .checked_add(2)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| SieveError::corrupt(format!("file truncated at offset {at}")))?;
    let mut bytes = [0_u8; 2];
    bytes.copy_from_slice(&data[at..end]);
    Ok(u16::from_ne_bytes(bytes))
}

/// Reconstruct a binary from its file representation.
///
/// `resolve` maps extension names from block 0 to registry ids; an
/// unresolvable name fails the whole load.
pub fn from_bytes(
    bytes: &[u8],
    script_name: Option<String>,
    resolve: &dyn Fn(&str) -> Option<ExtensionId>,
) -> Result<Binary> {
    let magic = read_u32_ne(bytes, 0)?;
    if magic != BINARY_MAGIC {
        if magic == BINARY_MAGIC.swap_bytes() {
            return Err(SieveError::ByteOrder);
        }
        return Err(SieveError::BadMagic { found: magic });
    }

    let major = read_u16_ne(bytes, 4)?;
    let minor = read_u16_ne(bytes, 6)?;
    if major != VERSION_MAJOR || minor != VERSION_MINOR {
        return Err(SieveError::BadVersion { major, minor });
    }

    let block_count = read_u32_ne(bytes, 8)? as usize;
    if block_count < 2 {
        return Err(SieveError::corrupt(format!(
            "binary declares {block_count} blocks, need at least 2"
        )));
    }
    let index_at = HEADER_BYTES;
    let index_bytes = block_count
        .checked_mul(INDEX_ENTRY_BYTES)
        .ok_or_else(|| SieveError::corrupt("block count overflows the index size"))?;
    if index_at + index_bytes > bytes.len() {
        return Err(SieveError::corrupt("block index exceeds file size"));
    }

    let mut blocks = Vec::with_capacity(block_count);
    for i in 0..block_count {
        let at = index_at + i * INDEX_ENTRY_BYTES;
        let id = read_u32_ne(bytes, at)?;
        let size = read_u32_ne(bytes, at + 4)? as usize;
        let offset = read_u32_ne(bytes, at + 8)? as usize;
        let ext_id = read_u32_ne(bytes, at + 12)?;

        if id as usize != i {
            return Err(SieveError::corrupt(format!(
                "block index entry {i} carries id {id}"
            )));
        }

        let header_id = read_u32_ne(bytes, offset)?;
        let header_size = read_u32_ne(bytes, offset + 4)? as usize;
        if header_id != id || header_size != size {
            return Err(SieveError::corrupt(format!(
                "block {id} header disagrees with index (id {header_id}, size {header_size})"
            )));
        }

        let payload_at = offset + BLOCK_HEADER_BYTES;
        let payload_end = payload_at
            .checked_add(size)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| {
                SieveError::corrupt(format!("block {id} payload exceeds file size"))
            })?;

        let ext_index = if ext_id == SYSTEM_EXT_ID {
            None
        } else {
            Some(ext_id as usize)
        };
        let mut block = Block::new(id, ext_index);
        block.buf_mut().extend_from_slice(&bytes[payload_at..payload_end]);
        block.set_file_offset(offset as u32);
        blocks.push(block);
    }

    let mut binary = Binary::from_blocks(script_name, blocks);
    binary.resolve_link_block(resolve)?;

    debug!(
        blocks = binary.block_count(),
        linked = binary.links().len(),
        "loaded binary"
    );
    Ok(binary)
}

/// Load a binary from `path`.
pub fn load(
    path: &Path,
    resolve: &dyn Fn(&str) -> Option<ExtensionId>,
) -> Result<Binary> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(SieveError::corrupt(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    let bytes = fs::read(path)?;
    let script_name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned());
    from_bytes(&bytes, script_name, resolve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_MAIN;

    fn no_extensions(_: &str) -> Option<ExtensionId> {
        None
    }

    fn sample_binary() -> Binary {
        let mut binary = Binary::new(Some("sample"));
        binary.emit_byte(0x04);
        binary.emit_string(b"Work");
        binary
    }

    #[test]
    fn test_round_trip_preserves_blocks() {
        let mut binary = sample_binary();
        let extra = binary.block_create(None);
        binary.set_active(extra).expect("activate");
        binary.emit_varint(12_345);

        let bytes = to_bytes(&mut binary);
        let loaded = from_bytes(&bytes, None, &no_extensions).expect("load");

        assert_eq!(loaded.block_count(), binary.block_count());
        for id in 0..binary.block_count() as u32 {
            assert_eq!(
                loaded.block(id).expect("block").bytes(),
                binary.block(id).expect("block").bytes(),
                "block {id} must round-trip"
            );
        }
    }

    #[test]
    fn test_link_table_round_trips_in_order() {
        let mut binary = sample_binary();
        binary.link_extension(ExtensionId(7), "fileinto");
        binary.link_extension(ExtensionId(3), "variables");

        let bytes = to_bytes(&mut binary);
        let resolve = |name: &str| match name {
            "fileinto" => Some(ExtensionId(1)),
            "variables" => Some(ExtensionId(2)),
            _ => None,
        };
        let loaded = from_bytes(&bytes, None, &resolve).expect("load");
        let names: Vec<&str> = loaded.links().iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["fileinto", "variables"]);
    }

    #[test]
    fn test_byte_reversed_magic_is_rejected() {
        let mut binary = sample_binary();
        let mut bytes = to_bytes(&mut binary);
        bytes[0..4].reverse();
        let err = from_bytes(&bytes, None, &no_extensions).expect_err("must fail");
        assert!(matches!(err, SieveError::ByteOrder));
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let mut binary = sample_binary();
        let mut bytes = to_bytes(&mut binary);
        bytes[0] ^= 0xFF;
        bytes[1] ^= 0x55;
        let err = from_bytes(&bytes, None, &no_extensions).expect_err("must fail");
        assert!(matches!(err, SieveError::BadMagic { .. }));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut binary = sample_binary();
        let mut bytes = to_bytes(&mut binary);
        bytes[4..6].copy_from_slice(&(VERSION_MAJOR + 1).to_ne_bytes());
        let err = from_bytes(&bytes, None, &no_extensions).expect_err("must fail");
        assert!(matches!(err, SieveError::BadVersion { .. }));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let mut binary = sample_binary();
        let bytes = to_bytes(&mut binary);
        for cut in [0, 6, HEADER_BYTES, bytes.len() - 3] {
            let err = from_bytes(&bytes[..cut], None, &no_extensions).expect_err("must fail");
            assert!(
                matches!(err, SieveError::Corrupt { .. } | SieveError::BadMagic { .. }),
                "cut at {cut} yielded {err:?}"
            );
        }
    }

    #[test]
    fn test_block_headers_are_aligned() {
        let mut binary = sample_binary();
        // Odd-length payload forces padding before the next block header.
        binary.emit_byte(0xEE);
        let extra = binary.block_create(None);
        binary.set_active(extra).expect("activate");
        binary.emit_byte(0x01);

        let bytes = to_bytes(&mut binary);
        for id in 0..binary.block_count() as u32 {
            let offset = binary.block(id).expect("block").file_offset();
            assert_eq!(offset % 4, 0, "block {id} header at {offset} not aligned");
        }
        drop(bytes);
    }

    #[test]
    fn test_save_and_load_through_filesystem() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("script.svbin");

        let mut binary = sample_binary();
        save(&mut binary, &path).expect("save");
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists(), "temp file must be renamed away");

        let loaded = load(&path, &no_extensions).expect("load");
        assert_eq!(
            loaded.block(BLOCK_MAIN).expect("main").bytes(),
            binary.block(BLOCK_MAIN).expect("main").bytes()
        );
        assert_eq!(loaded.script_name(), Some("script"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load(&dir.path().join("absent.svbin"), &no_extensions).expect_err("must fail");
        assert!(matches!(err, SieveError::Io(_)));
    }
}
