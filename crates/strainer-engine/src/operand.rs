//! Operand classes and typed operand reads.
//!
//! Every operand starts with a class tag byte; a typed read that finds a
//! different class reports corruption. Object operands (comparator,
//! match type, address part, side effect) carry a secondary code byte
//! resolved through [`CodeCursor`].

use strainer_error::{Result, SieveError};
use strainer_match::{AddressPart, Comparator, MatchType};

use crate::cursor::CodeCursor;

/// Operand class tags as emitted by the generator.
pub mod class {
    /// Terminates an optional-operand list.
    pub const OPTIONAL: u8 = 0;
    /// Unsigned number (varint payload).
    pub const NUMBER: u8 = 1;
    /// Single string.
    pub const STRING: u8 = 2;
    /// String list (varint count, then raw strings).
    pub const STRING_LIST: u8 = 3;
    /// Comparator object operand.
    pub const COMPARATOR: u8 = 4;
    /// Match-type object operand.
    pub const MATCH_TYPE: u8 = 5;
    /// Address-part object operand.
    pub const ADDRESS_PART: u8 = 6;
    /// Side-effect object operand.
    pub const SIDE_EFFECT: u8 = 7;
}

fn class_name(tag: u8) -> &'static str {
    match tag {
        class::OPTIONAL => "optional-end",
        class::NUMBER => "number",
        class::STRING => "string",
        class::STRING_LIST => "string-list",
        class::COMPARATOR => "comparator",
        class::MATCH_TYPE => "match-type",
        class::ADDRESS_PART => "address-part",
        class::SIDE_EFFECT => "side-effect",
        _ => "unknown",
    }
}

/// Consume and verify an operand class tag.
pub fn expect_class(cursor: &mut CodeCursor<'_>, expected: u8) -> Result<()> {
    let at = cursor.pc;
    let tag = cursor.read_byte()?;
    if tag != expected {
        return Err(SieveError::corrupt(format!(
            "expected {} operand at offset {at}, found {} ({tag})",
            class_name(expected),
            class_name(tag)
        )));
    }
    Ok(())
}

/// Read a number operand.
pub fn read_number(cursor: &mut CodeCursor<'_>) -> Result<u64> {
    expect_class(cursor, class::NUMBER)?;
    cursor.read_varint()
}

/// Read a string operand without substitution.
pub fn read_string_raw(cursor: &mut CodeCursor<'_>) -> Result<Vec<u8>> {
    expect_class(cursor, class::STRING)?;
    cursor.read_string_raw()
}

/// Read a string-list operand without substitution.
pub fn read_string_list_raw(cursor: &mut CodeCursor<'_>) -> Result<Vec<Vec<u8>>> {
    expect_class(cursor, class::STRING_LIST)?;
    let count = cursor.read_varint()? as usize;
    let mut items = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        items.push(cursor.read_string_raw()?);
    }
    Ok(items)
}

/// The optional operands of a test instruction, with language defaults
/// filled in (`:is`, `i;ascii-casemap`, `:all`).
pub struct TestOperands {
    /// Selected match type.
    pub match_type: &'static dyn MatchType,
    /// Selected comparator.
    pub comparator: &'static dyn Comparator,
    /// Selected address part (only address-class tests consume it).
    pub address_part: &'static dyn AddressPart,
}

/// Read a test's optional-operand list up to its terminator.
///
/// The match-type/comparator pairing is validated here, when the pair is
/// first known.
pub fn read_test_operands(cursor: &mut CodeCursor<'_>) -> Result<TestOperands> {
    let mut match_type = strainer_match::core_match_type(strainer_match::MATCH_TYPE_IS)
        .ok_or_else(|| SieveError::internal("core match-type table missing `is`"))?;
    let mut comparator =
        strainer_match::core_comparator(strainer_match::COMPARATOR_ASCII_CASEMAP)
            .ok_or_else(|| SieveError::internal("core comparator table missing casemap"))?;
    let mut address_part = strainer_match::core_address_part(strainer_match::ADDRESS_PART_ALL)
        .ok_or_else(|| SieveError::internal("core address-part table missing `all`"))?;

    loop {
        let at = cursor.pc;
        let tag = cursor.read_byte()?;
        match tag {
            class::OPTIONAL => break,
            class::MATCH_TYPE => match_type = cursor.read_match_type()?,
            class::COMPARATOR => comparator = cursor.read_comparator()?,
            class::ADDRESS_PART => address_part = cursor.read_address_part()?,
            other => {
                return Err(SieveError::corrupt(format!(
                    "unexpected {} operand in test argument list at offset {at}",
                    class_name(other)
                )));
            }
        }
    }

    match_type.validate_comparator(comparator)?;
    Ok(TestOperands {
        match_type,
        comparator,
        address_part,
    })
}
