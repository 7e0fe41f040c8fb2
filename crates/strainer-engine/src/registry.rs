//! Process-wide extension registry.
//!
//! Append-only for the process lifetime: registration is idempotent by
//! name and allocates stable ids; the table seals at the first binary
//! load, after which only re-registration of known names succeeds.

use hashbrown::HashMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use strainer_error::{Result, SieveError};
use strainer_types::ExtensionId;

use crate::extension::Extension;

struct RegistryInner {
    list: Vec<&'static dyn Extension>,
    by_name: HashMap<&'static str, ExtensionId>,
    sealed: bool,
}

lazy_static! {
    static ref REGISTRY: RwLock<RegistryInner> = RwLock::new(RegistryInner {
        list: Vec::new(),
        by_name: HashMap::new(),
        sealed: false,
    });
}

/// Register an extension, returning its stable id. Double registration
/// by name returns the existing id; registering a new name after the
/// registry sealed is an error.
pub fn register(ext: &'static dyn Extension) -> Result<ExtensionId> {
    let mut inner = REGISTRY.write();
    if let Some(&id) = inner.by_name.get(ext.name()) {
        return Ok(id);
    }
    if inner.sealed {
        return Err(SieveError::internal(format!(
            "extension `{}` registered after the registry sealed",
            ext.name()
        )));
    }
    let id = ExtensionId(inner.list.len());
    inner.list.push(ext);
    inner.by_name.insert(ext.name(), id);
    Ok(id)
}

/// Id of a registered extension.
#[must_use]
pub fn lookup(name: &str) -> Option<ExtensionId> {
    REGISTRY.read().by_name.get(name).copied()
}

/// Extension by id.
#[must_use]
pub fn by_id(id: ExtensionId) -> Option<&'static dyn Extension> {
    REGISTRY.read().list.get(id.index()).copied()
}

/// Ids of all preloaded extensions, in registration order.
#[must_use]
pub fn preloaded_ids() -> Vec<ExtensionId> {
    REGISTRY
        .read()
        .list
        .iter()
        .enumerate()
        .filter(|(_, ext)| ext.preloaded())
        .map(|(index, _)| ExtensionId(index))
        .collect()
}

/// Forbid new registrations. Called on the first binary load.
pub fn seal() {
    REGISTRY.write().sealed = true;
}

// ---------------------------------------------------------------------------
// Preloaded core-feature extensions
// ---------------------------------------------------------------------------

macro_rules! core_feature_extension {
    ($ty:ident, $name:literal, $table:ident, $resolver:path, $out:ty) => {
        struct $ty;

        impl Extension for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn preloaded(&self) -> bool {
                true
            }

            fn $table(&self, code: u64) -> Option<&'static $out> {
                $resolver(code)
            }
        }
    };
}

core_feature_extension!(
    MatchTypesExtension,
    "@match-types",
    match_type,
    strainer_match::core_match_type,
    dyn strainer_match::MatchType
);
core_feature_extension!(
    ComparatorsExtension,
    "@comparators",
    comparator,
    strainer_match::core_comparator,
    dyn strainer_match::Comparator
);
core_feature_extension!(
    AddressPartsExtension,
    "@address-parts",
    address_part,
    strainer_match::core_address_part,
    dyn strainer_match::AddressPart
);

static MATCH_TYPES: MatchTypesExtension = MatchTypesExtension;
static COMPARATORS: ComparatorsExtension = ComparatorsExtension;
static ADDRESS_PARTS: AddressPartsExtension = AddressPartsExtension;

/// Register the preloaded core-feature extensions. Idempotent; every
/// entry point that creates or loads binaries calls this first.
pub fn ensure_core() -> Result<()> {
    register(&MATCH_TYPES)?;
    register(&COMPARATORS)?;
    register(&ADDRESS_PARTS)?;
    Ok(())
}
