//! Match types: `:is`, `:contains`, `:matches` and the session contract
//! extension match types plug into.

use memchr::memmem;
use strainer_error::Result;

use crate::comparator::{Comparator, OctetComparator};
use crate::values::MatchValuesBuilder;

/// A match-type definition.
///
/// `validate_comparator` runs when the pair is resolved from bytecode;
/// `begin` allocates the per-test session state that lives for one test
/// instruction and is dropped with it.
pub trait MatchType: Send + Sync {
    /// Tag name without the leading colon, e.g. `matches`.
    fn name(&self) -> &'static str;

    /// Reject comparators this match type cannot work with.
    fn validate_comparator(&self, comparator: &dyn Comparator) -> Result<()> {
        let _ = comparator;
        Ok(())
    }

    /// Allocate per-test state.
    fn begin(&self) -> Box<dyn MatchSession>;
}

/// Per-test state of one match type.
pub trait MatchSession {
    /// Match one value against one key.
    ///
    /// When the session returns `true` and `captures` is present, it has
    /// replaced the builder's contents with this attempt's captures; on
    /// `false` the builder is left untouched.
    fn matches(
        &mut self,
        comparator: &dyn Comparator,
        value: &[u8],
        key: &[u8],
        key_index: usize,
        captures: Option<&mut MatchValuesBuilder>,
    ) -> Result<bool>;
}

/// Run a session over a full key list for one value, short-circuiting on
/// the first hit and reporting the matching key's index.
pub fn match_key_list(
    session: &mut dyn MatchSession,
    comparator: &dyn Comparator,
    value: &[u8],
    keys: &[Vec<u8>],
    mut captures: Option<&mut MatchValuesBuilder>,
) -> Result<Option<usize>> {
    for (key_index, key) in keys.iter().enumerate() {
        let hit = session.matches(
            comparator,
            value,
            key,
            key_index,
            captures.as_deref_mut(),
        )?;
        if hit {
            return Ok(Some(key_index));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// :is
// ---------------------------------------------------------------------------

/// `:is`: whole-value equality through the comparator.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsMatch;

struct IsSession;

impl MatchType for IsMatch {
    fn name(&self) -> &'static str {
        "is"
    }

    fn begin(&self) -> Box<dyn MatchSession> {
        Box::new(IsSession)
    }
}

impl MatchSession for IsSession {
    fn matches(
        &mut self,
        comparator: &dyn Comparator,
        value: &[u8],
        key: &[u8],
        _key_index: usize,
        _captures: Option<&mut MatchValuesBuilder>,
    ) -> Result<bool> {
        Ok(comparator.equals(value, key))
    }
}

// ---------------------------------------------------------------------------
// :contains
// ---------------------------------------------------------------------------

/// `:contains`: substring search; the leftmost occurrence wins and an
/// empty key always matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainsMatch;

struct ContainsSession;

impl MatchType for ContainsMatch {
    fn name(&self) -> &'static str {
        "contains"
    }

    fn begin(&self) -> Box<dyn MatchSession> {
        Box::new(ContainsSession)
    }
}

impl MatchSession for ContainsSession {
    fn matches(
        &mut self,
        comparator: &dyn Comparator,
        value: &[u8],
        key: &[u8],
        _key_index: usize,
        _captures: Option<&mut MatchValuesBuilder>,
    ) -> Result<bool> {
        if key.is_empty() {
            return Ok(true);
        }
        // Octet comparison reduces to a plain substring scan.
        if comparator.name() == OctetComparator.name() {
            return Ok(memmem::find(value, key).is_some());
        }
        if key.len() > value.len() {
            return Ok(false);
        }
        for start in 0..=(value.len() - key.len()) {
            let window = &value[start..start + key.len()];
            if window
                .iter()
                .zip(key.iter())
                .all(|(&v, &k)| comparator.char_match(v, k))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// :matches
// ---------------------------------------------------------------------------

/// `:matches`: glob with `*` and `?`, `\*`/`\?` escapes, and capture of
/// each wildcard expansion into the numbered match values. `${0}` is the
/// whole value.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchesMatch;

struct MatchesSession;

impl MatchType for MatchesMatch {
    fn name(&self) -> &'static str {
        "matches"
    }

    fn begin(&self) -> Box<dyn MatchSession> {
        Box::new(MatchesSession)
    }
}

impl MatchSession for MatchesSession {
    fn matches(
        &mut self,
        comparator: &dyn Comparator,
        value: &[u8],
        key: &[u8],
        _key_index: usize,
        captures: Option<&mut MatchValuesBuilder>,
    ) -> Result<bool> {
        let mut spans = Vec::new();
        if !glob_match(comparator, value, 0, key, 0, &mut spans) {
            return Ok(false);
        }
        if let Some(builder) = captures {
            builder.reset();
            builder.push(value);
            for (start, end) in spans {
                builder.push(&value[start..end]);
            }
        }
        Ok(true)
    }
}

/// Backtracking glob matcher. `spans` collects one `(start, end)` range
/// per wildcard in key order; `*` is greedy (longest expansion first).
fn glob_match(
    comparator: &dyn Comparator,
    value: &[u8],
    vi: usize,
    key: &[u8],
    ki: usize,
    spans: &mut Vec<(usize, usize)>,
) -> bool {
    if ki == key.len() {
        return vi == value.len();
    }
    match key[ki] {
        b'*' => {
            for end in (vi..=value.len()).rev() {
                spans.push((vi, end));
                if glob_match(comparator, value, end, key, ki + 1, spans) {
                    return true;
                }
                spans.pop();
            }
            false
        }
        b'?' => {
            if vi < value.len() {
                spans.push((vi, vi + 1));
                if glob_match(comparator, value, vi + 1, key, ki + 1, spans) {
                    return true;
                }
                spans.pop();
            }
            false
        }
        b'\\' if ki + 1 < key.len() && matches!(key[ki + 1], b'*' | b'?' | b'\\') => {
            vi < value.len()
                && comparator.char_match(value[vi], key[ki + 1])
                && glob_match(comparator, value, vi + 1, key, ki + 2, spans)
        }
        literal => {
            vi < value.len()
                && comparator.char_match(value[vi], literal)
                && glob_match(comparator, value, vi + 1, key, ki + 1, spans)
        }
    }
}

// ---------------------------------------------------------------------------
// Core table
// ---------------------------------------------------------------------------

/// Core-table code of `:is`.
pub const MATCH_TYPE_IS: u64 = 0;

/// Core-table code of `:contains`.
pub const MATCH_TYPE_CONTAINS: u64 = 1;

/// Core-table code of `:matches`.
pub const MATCH_TYPE_MATCHES: u64 = 2;

static IS: IsMatch = IsMatch;
static CONTAINS: ContainsMatch = ContainsMatch;
static MATCHES: MatchesMatch = MatchesMatch;

/// Resolve a core match-type code.
#[must_use]
pub fn core_match_type(code: u64) -> Option<&'static dyn MatchType> {
    match code {
        MATCH_TYPE_IS => Some(&IS),
        MATCH_TYPE_CONTAINS => Some(&CONTAINS),
        MATCH_TYPE_MATCHES => Some(&MATCHES),
        _ => None,
    }
}
