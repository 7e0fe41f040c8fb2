//! The `variables` extension (RFC 5229): named variables, the `string`
//! test, and `${..}` substitution in string operands.
//!
//! Loading the extension enables the interpreter's match-value register
//! and installs the string expander, so `${1}`-style match values and
//! `${name}` variables resolve anywhere the engine reads an expandable
//! string. Variable names are case-insensitive; unknown variables and
//! unset match values expand to the empty string, and text that is not
//! valid substitution syntax passes through verbatim.

use std::rc::Rc;

use hashbrown::HashMap;
use strainer_engine::dump::Dumper;
use strainer_engine::ops::Operation;
use strainer_engine::{operand, registry, Extension, Interpreter, RunEnv, StringExpander};
use strainer_error::{Result, SieveError};
use strainer_types::ExtensionId;

/// Registered extension name.
pub const NAME: &str = "variables";

/// Extension-local operation codes.
pub const OP_SET: u64 = 0;
/// The `string` test.
pub const OP_STRING_TEST: u64 = 1;

/// Interpreter-scoped variable storage.
#[derive(Debug, Default)]
pub struct VariableScope {
    values: HashMap<String, Vec<u8>>,
}

impl VariableScope {
    /// Empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` (case-insensitive) to `value`.
    pub fn set(&mut self, name: &str, value: Vec<u8>) {
        self.values.insert(name.to_ascii_lowercase(), value);
    }

    /// Value of `name`, if set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
    }
}

// ---------------------------------------------------------------------------
// ${..} expansion
// ---------------------------------------------------------------------------

struct VariablesExpander {
    ext_id: ExtensionId,
}

fn is_identifier(name: &[u8]) -> bool {
    !name.is_empty()
        && (name[0].is_ascii_alphabetic() || name[0] == b'_')
        && name
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
}

fn is_number(name: &[u8]) -> bool {
    !name.is_empty() && name.iter().all(u8::is_ascii_digit)
}

impl StringExpander for VariablesExpander {
    fn expand(&self, it: &Interpreter<'_>, raw: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'$' && raw.get(i + 1) == Some(&b'{') {
                if let Some(rel) = raw[i + 2..].iter().position(|b| *b == b'}') {
                    let name = &raw[i + 2..i + 2 + rel];
                    if is_number(name) {
                        let index: usize = std::str::from_utf8(name)
                            .ok()
                            .and_then(|digits| digits.parse().ok())
                            .unwrap_or(usize::MAX);
                        if let Some(value) =
                            it.match_values().and_then(|values| values.get(index))
                        {
                            out.extend_from_slice(value);
                        }
                        i += rel + 3;
                        continue;
                    }
                    if is_identifier(name) {
                        let name = String::from_utf8_lossy(name);
                        if let Some(value) = it
                            .ext_context::<VariableScope>(self.ext_id)
                            .and_then(|scope| scope.get(&name))
                        {
                            out.extend_from_slice(value);
                        }
                        i += rel + 3;
                        continue;
                    }
                }
            }
            out.push(raw[i]);
            i += 1;
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// `set "name" "value"`.
struct SetOp;

impl Operation for SetOp {
    fn mnemonic(&self) -> &'static str {
        "SET"
    }

    fn execute(&self, it: &mut Interpreter<'_>, _renv: &mut RunEnv<'_>) -> Result<()> {
        let source_line = it.cursor_mut().read_varint()? as u32;
        let name = it.read_string_literal()?;
        let name = String::from_utf8(name)
            .map_err(|_| SieveError::script("variable name is not valid UTF-8", source_line))?;
        let value = it.read_string()?;

        let id = registry::lookup(NAME)
            .ok_or_else(|| SieveError::internal("variables extension not registered"))?;
        let scope = it
            .ext_context_mut::<VariableScope>(id)
            .ok_or_else(|| SieveError::internal("variables scope missing"))?;
        scope.set(&name, value);
        Ok(())
    }

    fn dump(&self, d: &mut Dumper<'_>) -> Result<()> {
        d.dump_source_line()?;
        d.dump_string_operand("name")?;
        d.dump_string_operand("value")
    }
}

/// `string` test: expanded source strings against a key list.
struct StringTestOp;

impl Operation for StringTestOp {
    fn mnemonic(&self) -> &'static str {
        "STRING"
    }

    fn execute(&self, it: &mut Interpreter<'_>, _renv: &mut RunEnv<'_>) -> Result<()> {
        let operands = operand::read_test_operands(it.cursor_mut())?;
        let sources = it.read_string_list()?;
        let keys = it.read_string_list()?;
        let matched = it.perform_match(&operands, &sources, &keys)?;
        it.set_test_result(matched);
        it.trace_test("string", matched);
        Ok(())
    }

    fn dump(&self, d: &mut Dumper<'_>) -> Result<()> {
        d.dump_test_operands()?;
        d.dump_string_list_operand("sources")?;
        d.dump_string_list_operand("keys")
    }
}

static SET_OP: SetOp = SetOp;
static STRING_TEST_OP: StringTestOp = StringTestOp;

/// The extension descriptor.
pub struct VariablesExtension;

impl Extension for VariablesExtension {
    fn name(&self) -> &'static str {
        NAME
    }

    fn operation(&self, code: u64) -> Option<&'static dyn Operation> {
        match code {
            OP_SET => Some(&SET_OP),
            OP_STRING_TEST => Some(&STRING_TEST_OP),
            _ => None,
        }
    }

    fn interpreter_loaded(&self, id: ExtensionId, it: &mut Interpreter<'_>) -> Result<()> {
        it.enable_match_values();
        it.set_ext_context(id, Box::new(VariableScope::new()));
        it.set_expander(Rc::new(VariablesExpander { ext_id: id }));
        Ok(())
    }
}

static EXTENSION: VariablesExtension = VariablesExtension;

/// Register with the process-global registry.
pub fn register() -> Result<ExtensionId> {
    registry::register(&EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strainer_engine::ops::OP_TEST_HEADER;
    use strainer_engine::{emit, link, InterpreterConfig};
    use strainer_match::{COMPARATOR_OCTET, MATCH_TYPE_IS, MATCH_TYPE_MATCHES};
    use strainer_result::ScriptResult;
    use strainer_types::{MemMessage, ScriptEnv};

    fn variables_binary() -> (strainer_binary::Binary, usize) {
        register().expect("register");
        let mut binary = link::new_binary(None).expect("binary");
        let index = link::require_extension(&mut binary, NAME).expect("require");
        (binary, index)
    }

    fn run(binary: &strainer_binary::Binary, msg: &MemMessage) -> bool {
        let env = ScriptEnv::new("tim");
        let mut result = ScriptResult::new();
        let mut renv = RunEnv {
            msg,
            env: &env,
            result: &mut result,
        };
        let mut it =
            Interpreter::new(binary, InterpreterConfig::default()).expect("interpreter");
        it.run(&mut renv).expect("run");
        it.test_result()
    }

    fn emit_string_test(binary: &mut strainer_binary::Binary, ext: usize, source: &[u8], key: &[u8]) {
        emit::emit_ext_operation(binary, ext, OP_STRING_TEST).expect("string test");
        emit::emit_match_type(binary, MATCH_TYPE_IS).expect("mt");
        emit::emit_comparator(binary, COMPARATOR_OCTET).expect("cmp");
        emit::emit_optional_end(binary);
        emit::emit_string_list(binary, &[source]);
        emit::emit_string_list(binary, &[key]);
    }

    #[test]
    fn test_set_and_expand_variable() {
        let (mut binary, ext) = variables_binary();
        emit::emit_ext_operation(&mut binary, ext, OP_SET).expect("set");
        binary.emit_varint(1);
        emit::emit_string(&mut binary, b"list");
        emit::emit_string(&mut binary, b"sieve");
        emit_string_test(&mut binary, ext, b"name/${list}", b"name/sieve");

        assert!(run(&binary, &MemMessage::new()));
    }

    #[test]
    fn test_variable_names_are_case_insensitive() {
        let (mut binary, ext) = variables_binary();
        emit::emit_ext_operation(&mut binary, ext, OP_SET).expect("set");
        binary.emit_varint(1);
        emit::emit_string(&mut binary, b"Mixed");
        emit::emit_string(&mut binary, b"yes");
        emit_string_test(&mut binary, ext, b"${mIxEd}", b"yes");

        assert!(run(&binary, &MemMessage::new()));
    }

    #[test]
    fn test_unknown_variable_expands_empty() {
        let (mut binary, ext) = variables_binary();
        emit_string_test(&mut binary, ext, b"x${missing}y", b"xy");
        assert!(run(&binary, &MemMessage::new()));
    }

    #[test]
    fn test_invalid_syntax_passes_through() {
        let (mut binary, ext) = variables_binary();
        emit_string_test(&mut binary, ext, b"a${not closed", b"a${not closed");
        assert!(run(&binary, &MemMessage::new()));
    }

    #[test]
    fn test_match_values_expand_after_matches_test() {
        let (mut binary, ext) = variables_binary();
        // header :matches "Subject" "[*] *" then check ${1}.
        emit::emit_operation(&mut binary, OP_TEST_HEADER).expect("header");
        emit::emit_match_type(&mut binary, MATCH_TYPE_MATCHES).expect("mt");
        emit::emit_comparator(&mut binary, COMPARATOR_OCTET).expect("cmp");
        emit::emit_optional_end(&mut binary);
        emit::emit_string_list(&mut binary, &[b"Subject"]);
        emit::emit_string_list(&mut binary, &[b"[*] *"]);
        emit_string_test(&mut binary, ext, b"list/${1}", b"list/sieve");

        let msg = MemMessage::new().with_header("Subject", "[sieve] hi");
        assert!(run(&binary, &msg));
    }

    #[test]
    fn test_failed_match_keeps_previous_values() {
        let (mut binary, ext) = variables_binary();
        // First match captures "sieve"; second (failing) match must not
        // clobber it.
        emit::emit_operation(&mut binary, OP_TEST_HEADER).expect("header");
        emit::emit_match_type(&mut binary, MATCH_TYPE_MATCHES).expect("mt");
        emit::emit_comparator(&mut binary, COMPARATOR_OCTET).expect("cmp");
        emit::emit_optional_end(&mut binary);
        emit::emit_string_list(&mut binary, &[b"Subject"]);
        emit::emit_string_list(&mut binary, &[b"[*] *"]);
        emit::emit_operation(&mut binary, OP_TEST_HEADER).expect("header");
        emit::emit_match_type(&mut binary, MATCH_TYPE_MATCHES).expect("mt");
        emit::emit_comparator(&mut binary, COMPARATOR_OCTET).expect("cmp");
        emit::emit_optional_end(&mut binary);
        emit::emit_string_list(&mut binary, &[b"Subject"]);
        emit::emit_string_list(&mut binary, &[b"nothing-*"]);
        emit_string_test(&mut binary, ext, b"${1}", b"sieve");

        let msg = MemMessage::new().with_header("Subject", "[sieve] hi");
        assert!(run(&binary, &msg));
    }

    #[test]
    fn test_set_value_is_itself_expanded() {
        let (mut binary, ext) = variables_binary();
        emit::emit_ext_operation(&mut binary, ext, OP_SET).expect("set");
        binary.emit_varint(1);
        emit::emit_string(&mut binary, b"a");
        emit::emit_string(&mut binary, b"one");
        emit::emit_ext_operation(&mut binary, ext, OP_SET).expect("set");
        binary.emit_varint(2);
        emit::emit_string(&mut binary, b"b");
        emit::emit_string(&mut binary, b"${a}-two");
        emit_string_test(&mut binary, ext, b"${b}", b"one-two");

        assert!(run(&binary, &MemMessage::new()));
    }
}
