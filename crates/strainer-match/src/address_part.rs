//! Address parts: which slice of a parsed address a test compares.

use strainer_types::Address;

/// One address-part policy (`:all`, `:localpart`, `:domain`).
pub trait AddressPart: Send + Sync {
    /// Tag name without the leading colon.
    fn name(&self) -> &'static str;

    /// The value to match for `addr`, or `None` when the part is absent
    /// (an absent part never matches).
    fn extract(&self, addr: &Address) -> Option<String>;
}

/// `:all`: the whole `local@domain` form.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllPart;

impl AddressPart for AllPart {
    fn name(&self) -> &'static str {
        "all"
    }

    fn extract(&self, addr: &Address) -> Option<String> {
        Some(addr.full())
    }
}

/// `:localpart`: left of the `@`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPart;

impl AddressPart for LocalPart {
    fn name(&self) -> &'static str {
        "localpart"
    }

    fn extract(&self, addr: &Address) -> Option<String> {
        Some(addr.local_part.clone())
    }
}

/// `:domain`: right of the `@`; absent for local-only addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainPart;

impl AddressPart for DomainPart {
    fn name(&self) -> &'static str {
        "domain"
    }

    fn extract(&self, addr: &Address) -> Option<String> {
        if addr.domain.is_empty() {
            None
        } else {
            Some(addr.domain.clone())
        }
    }
}

/// Core-table code of `:all`.
pub const ADDRESS_PART_ALL: u64 = 0;

/// Core-table code of `:localpart`.
pub const ADDRESS_PART_LOCALPART: u64 = 1;

/// Core-table code of `:domain`.
pub const ADDRESS_PART_DOMAIN: u64 = 2;

static ALL: AllPart = AllPart;
static LOCALPART: LocalPart = LocalPart;
static DOMAIN: DomainPart = DomainPart;

/// Resolve a core address-part code.
#[must_use]
pub fn core_address_part(code: u64) -> Option<&'static dyn AddressPart> {
    match code {
        ADDRESS_PART_ALL => Some(&ALL),
        ADDRESS_PART_LOCALPART => Some(&LOCALPART),
        ADDRESS_PART_DOMAIN => Some(&DOMAIN),
        _ => None,
    }
}
