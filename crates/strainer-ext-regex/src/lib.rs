//! The `regex` extension: the `:regex` match type.
//!
//! Keys are compiled lazily on first use and cached per key index for the
//! lifetime of the test; the cache dies with the session. When match
//! values are enabled, capture groups populate `${0..N}` with unmatched
//! groups reading as empty strings. Only the `i;octet` and
//! `i;ascii-casemap` comparators are allowed; case folding follows the
//! comparator.

use regex::bytes::{Regex, RegexBuilder};
use strainer_engine::ops::Operation;
use strainer_engine::{registry, Extension};
use strainer_error::{Result, SieveError};
use strainer_match::{Comparator, MatchSession, MatchType, MatchValuesBuilder};
use strainer_types::ExtensionId;

/// Registered extension name.
pub const NAME: &str = "regex";

/// Extension-local code of the `:regex` match type.
pub const MATCH_TYPE_REGEX: u64 = 0;

/// The `:regex` match type.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexMatch;

impl MatchType for RegexMatch {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn validate_comparator(&self, comparator: &dyn Comparator) -> Result<()> {
        match comparator.name() {
            "i;octet" | "i;ascii-casemap" => Ok(()),
            other => Err(SieveError::script(
                format!("regex match type cannot be used with comparator '{other}'"),
                0,
            )),
        }
    }

    fn begin(&self) -> Box<dyn MatchSession> {
        Box::new(RegexSession {
            compiled: Vec::new(),
        })
    }
}

struct RegexSession {
    /// Compiled automata cached by key index; dropped with the session.
    compiled: Vec<Option<Regex>>,
}

impl RegexSession {
    fn compiled_for(
        &mut self,
        key: &[u8],
        key_index: usize,
        comparator: &dyn Comparator,
    ) -> Result<&Regex> {
        if key_index >= self.compiled.len() {
            self.compiled.resize_with(key_index + 1, || None);
        }
        if self.compiled[key_index].is_none() {
            let pattern = std::str::from_utf8(key).map_err(|_| {
                SieveError::script("regular expression is not valid UTF-8", 0)
            })?;
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(comparator.name() == "i;ascii-casemap")
                .build()
                .map_err(|err| {
                    SieveError::script(format!("invalid regular expression: {err}"), 0)
                })?;
            self.compiled[key_index] = Some(regex);
        }
        self.compiled[key_index]
            .as_ref()
            .ok_or_else(|| SieveError::internal("regex cache slot empty after fill"))
    }
}

impl MatchSession for RegexSession {
    fn matches(
        &mut self,
        comparator: &dyn Comparator,
        value: &[u8],
        key: &[u8],
        key_index: usize,
        captures: Option<&mut MatchValuesBuilder>,
    ) -> Result<bool> {
        let regex = self.compiled_for(key, key_index, comparator)?;
        let Some(caps) = regex.captures(value) else {
            return Ok(false);
        };
        if let Some(builder) = captures {
            builder.reset();
            for group in caps.iter() {
                match group {
                    Some(found) => builder.push(found.as_bytes()),
                    None => builder.skip(),
                }
            }
        }
        Ok(true)
    }
}

static REGEX_MATCH: RegexMatch = RegexMatch;

/// The extension descriptor.
pub struct RegexExtension;

impl Extension for RegexExtension {
    fn name(&self) -> &'static str {
        NAME
    }

    fn operation(&self, _code: u64) -> Option<&'static dyn Operation> {
        None
    }

    fn match_type(&self, code: u64) -> Option<&'static dyn MatchType> {
        (code == MATCH_TYPE_REGEX).then_some(&REGEX_MATCH as &dyn MatchType)
    }
}

static EXTENSION: RegexExtension = RegexExtension;

/// Register with the process-global registry.
pub fn register() -> Result<ExtensionId> {
    registry::register(&EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strainer_match::{core_comparator, COMPARATOR_ASCII_CASEMAP, COMPARATOR_OCTET};

    fn octet() -> &'static dyn Comparator {
        core_comparator(COMPARATOR_OCTET).expect("octet")
    }

    fn casemap() -> &'static dyn Comparator {
        core_comparator(COMPARATOR_ASCII_CASEMAP).expect("casemap")
    }

    #[test]
    fn test_basic_match() {
        let mut session = RegexMatch.begin();
        assert!(session
            .matches(octet(), b"[sieve] hi", b"^\\[(.*)\\] ", 0, None)
            .expect("match"));
        assert!(!session
            .matches(octet(), b"plain subject", b"^\\[(.*)\\] ", 0, None)
            .expect("match"));
    }

    #[test]
    fn test_captures_fill_numbered_values() {
        let mut session = RegexMatch.begin();
        let mut builder = MatchValuesBuilder::new();
        let hit = session
            .matches(
                octet(),
                b"[sieve] hi",
                b"^\\[(.*)\\] (.*)$",
                0,
                Some(&mut builder),
            )
            .expect("match");
        assert!(hit);
        let values = builder.commit();
        assert_eq!(values.get(0), Some(&b"[sieve] hi"[..]));
        assert_eq!(values.get(1), Some(&b"sieve"[..]));
        assert_eq!(values.get(2), Some(&b"hi"[..]));
    }

    #[test]
    fn test_unmatched_group_reads_empty() {
        let mut session = RegexMatch.begin();
        let mut builder = MatchValuesBuilder::new();
        let hit = session
            .matches(octet(), b"abc", b"a(x)?(b)c", 0, Some(&mut builder))
            .expect("match");
        assert!(hit);
        let values = builder.commit();
        assert_eq!(values.get(1), Some(&b""[..]));
        assert_eq!(values.get(2), Some(&b"b"[..]));
    }

    #[test]
    fn test_casemap_comparator_folds_case() {
        let mut session = RegexMatch.begin();
        assert!(session
            .matches(casemap(), b"URGENT", b"urgent", 0, None)
            .expect("match"));
        let mut session = RegexMatch.begin();
        assert!(!session
            .matches(octet(), b"URGENT", b"urgent", 0, None)
            .expect("match"));
    }

    #[test]
    fn test_invalid_pattern_is_script_error() {
        let mut session = RegexMatch.begin();
        let err = session
            .matches(octet(), b"x", b"(unclosed", 0, None)
            .expect_err("must fail");
        assert!(matches!(err, SieveError::Script { .. }));
    }

    #[test]
    fn test_comparator_constraint() {
        struct WeirdComparator;
        impl Comparator for WeirdComparator {
            fn name(&self) -> &'static str {
                "i;weird"
            }
            fn char_match(&self, value: u8, key: u8) -> bool {
                value == key
            }
        }
        assert!(RegexMatch.validate_comparator(&WeirdComparator).is_err());
        assert!(RegexMatch.validate_comparator(octet()).is_ok());
    }

    #[test]
    fn test_cache_is_per_key_index() {
        let mut session = RegexMatch.begin();
        assert!(session.matches(octet(), b"a", b"a", 0, None).expect("m"));
        assert!(session.matches(octet(), b"b", b"b", 1, None).expect("m"));
        assert!(session.matches(octet(), b"a", b"a", 0, None).expect("m"));
    }
}
