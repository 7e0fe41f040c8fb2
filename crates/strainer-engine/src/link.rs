//! Binary lifecycle entry points that involve the extension registry:
//! creation (implicit preloaded links), `require`-time linking, and
//! save/load with extension hooks bracketing the file I/O.

use std::path::Path;

use strainer_binary::{file, Binary};
use strainer_error::{Result, SieveError};
use tracing::debug;

use crate::registry;

/// Fresh binary with every preloaded extension linked implicitly.
pub fn new_binary(script_name: Option<&str>) -> Result<Binary> {
    registry::ensure_core()?;
    let mut binary = Binary::new(script_name);
    for id in registry::preloaded_ids() {
        let ext = registry::by_id(id)
            .ok_or_else(|| SieveError::internal("preloaded extension vanished from registry"))?;
        binary.link_extension(id, ext.name());
    }
    Ok(binary)
}

/// Link a regular extension by name (the `require` path), returning its
/// local link index.
pub fn require_extension(binary: &mut Binary, name: &str) -> Result<usize> {
    let id = registry::lookup(name).ok_or_else(|| SieveError::UnknownExtension {
        name: name.to_owned(),
    })?;
    Ok(binary.link_extension(id, name))
}

/// Save with the full protocol: `binary_save` hooks flush deferred data
/// into extension blocks, then the file is assembled and committed via
/// rename-over-temp.
pub fn save(binary: &mut Binary, path: &Path) -> Result<()> {
    let ids: Vec<_> = binary.links().iter().map(|link| link.ext_id()).collect();
    for (index, id) in ids.into_iter().enumerate() {
        if let Some(ext) = registry::by_id(id) {
            ext.binary_save(binary, index)?;
        }
    }
    file::save(binary, path)
}

/// Load with the full protocol: read and validate the file, resolve the
/// link table by name against the registry, then run `binary_loaded`
/// hooks in link order. The registry seals at the first load.
pub fn load(path: &Path) -> Result<Binary> {
    registry::ensure_core()?;
    registry::seal();
    let mut binary = file::load(path, &registry::lookup)?;
    run_load_hooks(&mut binary)?;
    Ok(binary)
}

/// In-memory variant of [`load`] used by round-trip tests.
pub fn load_bytes(bytes: &[u8], script_name: Option<String>) -> Result<Binary> {
    registry::ensure_core()?;
    registry::seal();
    let mut binary = file::from_bytes(bytes, script_name, &registry::lookup)?;
    run_load_hooks(&mut binary)?;
    Ok(binary)
}

fn run_load_hooks(binary: &mut Binary) -> Result<()> {
    let ids: Vec<_> = binary.links().iter().map(|link| link.ext_id()).collect();
    for (index, id) in ids.into_iter().enumerate() {
        let ext = registry::by_id(id).ok_or_else(|| {
            SieveError::corrupt(format!("loaded extension id {} not registered", id.index()))
        })?;
        ext.binary_loaded(binary, index)?;
    }
    debug!(links = binary.links().len(), "ran binary load hooks");
    Ok(())
}
