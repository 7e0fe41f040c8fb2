//! Pluggable match engine: match types × comparators, with capture of
//! match values for variable substitution.
//!
//! A test instruction pairs one [`MatchType`](match_type::MatchType) with
//! one [`Comparator`](comparator::Comparator) and iterates its key list
//! for each tested value, short-circuiting on the first hit. Match types
//! that produce captures stage them in a
//! [`MatchValuesBuilder`](values::MatchValuesBuilder) which the
//! interpreter commits atomically when the test succeeds.

pub mod address_part;
pub mod comparator;
pub mod match_type;
pub mod values;

pub use address_part::{AddressPart, core_address_part, ADDRESS_PART_ALL, ADDRESS_PART_DOMAIN, ADDRESS_PART_LOCALPART};
pub use comparator::{core_comparator, Comparator, COMPARATOR_ASCII_CASEMAP, COMPARATOR_OCTET};
pub use match_type::{core_match_type, match_key_list, MatchSession, MatchType, MATCH_TYPE_CONTAINS, MATCH_TYPE_IS, MATCH_TYPE_MATCHES};
pub use values::{MatchValues, MatchValuesBuilder, MAX_MATCH_VALUES};
