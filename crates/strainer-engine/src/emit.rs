//! Operand and operation emission: the code generator's interface to
//! the binary, also used by tests to hand-assemble programs.

use strainer_binary::Binary;
use strainer_error::{Result, SieveError};

use crate::operand::class;
use crate::CUSTOM_BASE;

fn check_core_code(code: u64, what: &str) -> Result<u8> {
    u8::try_from(code)
        .ok()
        .filter(|code| *code < CUSTOM_BASE)
        .ok_or_else(|| SieveError::internal(format!("core {what} code {code} out of range")))
}

/// Emit a core opcode.
pub fn emit_operation(binary: &mut Binary, opcode: u8) -> Result<()> {
    let opcode = check_core_code(u64::from(opcode), "operation")?;
    binary.emit_byte(opcode);
    Ok(())
}

/// Emit an extension operation: selector byte plus extension-local code.
pub fn emit_ext_operation(binary: &mut Binary, link_index: usize, code: u64) -> Result<()> {
    let selector = ext_selector(link_index)?;
    binary.emit_byte(selector);
    binary.emit_varint(code);
    Ok(())
}

fn ext_selector(link_index: usize) -> Result<u8> {
    u8::try_from(link_index)
        .ok()
        .and_then(|index| index.checked_add(CUSTOM_BASE))
        .ok_or_else(|| {
            SieveError::internal(format!("extension link index {link_index} out of range"))
        })
}

/// Emit a number operand.
pub fn emit_number(binary: &mut Binary, value: u64) {
    binary.emit_byte(class::NUMBER);
    binary.emit_varint(value);
}

/// Emit a string operand.
pub fn emit_string(binary: &mut Binary, bytes: &[u8]) {
    binary.emit_byte(class::STRING);
    binary.emit_string(bytes);
}

/// Emit a string-list operand.
pub fn emit_string_list(binary: &mut Binary, items: &[&[u8]]) {
    binary.emit_byte(class::STRING_LIST);
    binary.emit_varint(items.len() as u64);
    for item in items {
        binary.emit_string(item);
    }
}

/// Emit a core match-type operand.
pub fn emit_match_type(binary: &mut Binary, code: u64) -> Result<()> {
    binary.emit_byte(class::MATCH_TYPE);
    binary.emit_byte(check_core_code(code, "match-type")?);
    Ok(())
}

/// Emit an extension match-type operand.
pub fn emit_ext_match_type(binary: &mut Binary, link_index: usize, code: u64) -> Result<()> {
    binary.emit_byte(class::MATCH_TYPE);
    binary.emit_byte(ext_selector(link_index)?);
    binary.emit_varint(code);
    Ok(())
}

/// Emit a core comparator operand.
pub fn emit_comparator(binary: &mut Binary, code: u64) -> Result<()> {
    binary.emit_byte(class::COMPARATOR);
    binary.emit_byte(check_core_code(code, "comparator")?);
    Ok(())
}

/// Emit a core address-part operand.
pub fn emit_address_part(binary: &mut Binary, code: u64) -> Result<()> {
    binary.emit_byte(class::ADDRESS_PART);
    binary.emit_byte(check_core_code(code, "address-part")?);
    Ok(())
}

/// Emit an extension side-effect operand header; the definition's payload
/// follows.
pub fn emit_ext_side_effect(binary: &mut Binary, link_index: usize, code: u64) -> Result<()> {
    binary.emit_byte(class::SIDE_EFFECT);
    binary.emit_byte(ext_selector(link_index)?);
    binary.emit_varint(code);
    Ok(())
}

/// Terminate an optional-operand list.
pub fn emit_optional_end(binary: &mut Binary) {
    binary.emit_byte(class::OPTIONAL);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_code_range_enforced() {
        let mut binary = Binary::new(None);
        assert!(emit_match_type(&mut binary, 3).is_ok());
        assert!(emit_match_type(&mut binary, u64::from(CUSTOM_BASE)).is_err());
    }

    #[test]
    fn test_ext_selector_offsets_by_custom_base() {
        let mut binary = Binary::new(None);
        emit_ext_operation(&mut binary, 2, 7).expect("emit");
        let block = binary.block(strainer_binary::BLOCK_MAIN).expect("main");
        assert_eq!(block.bytes()[0], CUSTOM_BASE + 2);
    }
}
