//! Bytecode disassembly for tooling and tests.

use std::fmt::Write;

use strainer_binary::{Binary, BLOCK_MAIN};
use strainer_error::{Result, SieveError};

use crate::cursor::CodeCursor;
use crate::operand::{self, class};

/// Disassembly cursor: reads the same operand shapes execution does and
/// renders them as text.
pub struct Dumper<'a> {
    cursor: CodeCursor<'a>,
    out: String,
}

impl<'a> Dumper<'a> {
    /// Dumper at the start of `block_id`.
    pub fn new(binary: &'a Binary, block_id: u32) -> Result<Self> {
        Ok(Self {
            cursor: CodeCursor::new(binary, block_id)?,
            out: String::new(),
        })
    }

    fn push_line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn push_operand(&mut self, text: &str) {
        self.out.push_str("          ");
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Disassemble the source-line varint action operations lead with.
    pub fn dump_source_line(&mut self) -> Result<()> {
        let line = self.cursor.read_varint()?;
        self.push_operand(&format!("line: {line}"));
        Ok(())
    }

    /// Disassemble a jump offset as its absolute target.
    pub fn dump_jump_target(&mut self) -> Result<()> {
        let at = self.cursor.pc;
        let offset = self.cursor.read_offset()?;
        let target = at as i64 + i64::from(offset);
        self.push_operand(&format!("jump: {target:08x} (offset {offset:+})"));
        Ok(())
    }

    /// Disassemble a string operand.
    pub fn dump_string_operand(&mut self, label: &str) -> Result<()> {
        operand::expect_class(&mut self.cursor, class::STRING)?;
        let bytes = self.cursor.read_string_raw()?;
        self.push_operand(&format!(
            "{label}: \"{}\"",
            String::from_utf8_lossy(&bytes)
        ));
        Ok(())
    }

    /// Disassemble a string-list operand.
    pub fn dump_string_list_operand(&mut self, label: &str) -> Result<()> {
        operand::expect_class(&mut self.cursor, class::STRING_LIST)?;
        let count = self.cursor.read_varint()? as usize;
        let mut items = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            let bytes = self.cursor.read_string_raw()?;
            items.push(format!("\"{}\"", String::from_utf8_lossy(&bytes)));
        }
        self.push_operand(&format!("{label}: [{}]", items.join(", ")));
        Ok(())
    }

    /// Disassemble a number operand.
    pub fn dump_number_operand(&mut self, label: &str) -> Result<()> {
        let value = operand::read_number(&mut self.cursor)?;
        self.push_operand(&format!("{label}: {value}"));
        Ok(())
    }

    /// Disassemble a test's optional-operand list.
    pub fn dump_test_operands(&mut self) -> Result<()> {
        loop {
            let tag = self.cursor.read_byte()?;
            match tag {
                class::OPTIONAL => return Ok(()),
                class::MATCH_TYPE => {
                    let mt = self.cursor.read_match_type()?;
                    self.push_operand(&format!("match-type: :{}", mt.name()));
                }
                class::COMPARATOR => {
                    let cmp = self.cursor.read_comparator()?;
                    self.push_operand(&format!("comparator: {}", cmp.name()));
                }
                class::ADDRESS_PART => {
                    let part = self.cursor.read_address_part()?;
                    self.push_operand(&format!("address-part: :{}", part.name()));
                }
                other => {
                    return Err(SieveError::corrupt(format!(
                        "unexpected operand class {other} in test argument list"
                    )));
                }
            }
        }
    }

    /// Disassemble an action's optional side-effect list.
    pub fn dump_side_effect_list(&mut self) -> Result<()> {
        loop {
            let tag = self.cursor.read_byte()?;
            match tag {
                class::OPTIONAL => return Ok(()),
                class::SIDE_EFFECT => {
                    let def = self.cursor.read_side_effect_def()?;
                    let text = def.dump(&mut self.cursor)?;
                    self.push_operand(&format!("side-effect {}: {text}", def.name()));
                }
                other => {
                    return Err(SieveError::corrupt(format!(
                        "unexpected operand class {other} in side-effect list"
                    )));
                }
            }
        }
    }

    fn dump_block(&mut self) -> Result<()> {
        while !self.cursor.at_end() {
            let addr = self.cursor.pc;
            let op = self.cursor.read_operation()?;
            let line = format!("{addr:08x}: {}", op.mnemonic());
            self.push_line(&line);
            op.dump(self)?;
        }
        Ok(())
    }
}

/// Disassemble a binary: link table plus the main program block.
pub fn dump_binary(binary: &Binary) -> Result<String> {
    let mut header = String::new();
    let _ = writeln!(header, "; {} blocks", binary.block_count());
    let _ = writeln!(header, "; linked extensions:");
    for (index, link) in binary.links().iter().enumerate() {
        let _ = writeln!(header, ";   [{index}] {}", link.name());
    }

    let mut dumper = Dumper::new(binary, BLOCK_MAIN)?;
    dumper.dump_block()?;
    Ok(header + &dumper.out)
}
