//! Comparators: named byte/char comparison policies.

/// A comparison policy exposing equality and the per-character primitive
/// the substring and glob matchers are built on.
pub trait Comparator: Send + Sync {
    /// Registered comparator name, e.g. `i;octet`.
    fn name(&self) -> &'static str;

    /// Whether two single bytes match under this policy.
    fn char_match(&self, value: u8, key: u8) -> bool;

    /// Whole-value equality.
    fn equals(&self, value: &[u8], key: &[u8]) -> bool {
        value.len() == key.len()
            && value
                .iter()
                .zip(key.iter())
                .all(|(&v, &k)| self.char_match(v, k))
    }
}

/// `i;octet`: exact byte comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct OctetComparator;

impl Comparator for OctetComparator {
    fn name(&self) -> &'static str {
        "i;octet"
    }

    fn char_match(&self, value: u8, key: u8) -> bool {
        value == key
    }

    fn equals(&self, value: &[u8], key: &[u8]) -> bool {
        value == key
    }
}

/// `i;ascii-casemap`: ASCII letters compare case-insensitively, all other
/// octets exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiCasemapComparator;

impl Comparator for AsciiCasemapComparator {
    fn name(&self) -> &'static str {
        "i;ascii-casemap"
    }

    fn char_match(&self, value: u8, key: u8) -> bool {
        value.to_ascii_lowercase() == key.to_ascii_lowercase()
    }
}

/// Core-table code of `i;octet`.
pub const COMPARATOR_OCTET: u64 = 0;

/// Core-table code of `i;ascii-casemap`.
pub const COMPARATOR_ASCII_CASEMAP: u64 = 1;

static OCTET: OctetComparator = OctetComparator;
static ASCII_CASEMAP: AsciiCasemapComparator = AsciiCasemapComparator;

/// Resolve a core comparator code.
#[must_use]
pub fn core_comparator(code: u64) -> Option<&'static dyn Comparator> {
    match code {
        COMPARATOR_OCTET => Some(&OCTET),
        COMPARATOR_ASCII_CASEMAP => Some(&ASCII_CASEMAP),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_octet_is_exact() {
        let cmp = OctetComparator;
        assert!(cmp.equals(b"Work", b"Work"));
        assert!(!cmp.equals(b"Work", b"work"));
        assert!(!cmp.equals(b"Work", b"Wor"));
    }

    #[test]
    fn test_ascii_casemap_folds_letters_only() {
        let cmp = AsciiCasemapComparator;
        assert!(cmp.equals(b"INBOX", b"inbox"));
        assert!(cmp.char_match(b'A', b'a'));
        assert!(!cmp.char_match(b'1', b'2'));
        // Non-ASCII octets are compared exactly.
        assert!(!cmp.equals(&[0xC3, 0x84], &[0xC3, 0xA4]));
    }

    #[test]
    fn test_core_table() {
        assert_eq!(core_comparator(COMPARATOR_OCTET).map(Comparator::name), Some("i;octet"));
        assert_eq!(
            core_comparator(COMPARATOR_ASCII_CASEMAP).map(Comparator::name),
            Some("i;ascii-casemap")
        );
        assert!(core_comparator(9).is_none());
    }
}
