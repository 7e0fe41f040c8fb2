//! The execution engine: extension registry, operand and operation
//! dispatch, and the stack-less address-driven interpreter.
//!
//! Bytecode is dispatched table-first: opcodes and object-operand codes
//! below [`CUSTOM_BASE`] index fixed core tables, higher codes select a
//! linked extension whose own table is indexed by a trailing varint. The
//! interpreter executes one operation at a time, polls a cooperative
//! interruption flag between operations, and confines loops behind a
//! validated `loop_limit`.

pub mod cursor;
pub mod dump;
pub mod emit;
pub mod extension;
pub mod interp;
pub mod link;
pub mod operand;
pub mod ops;
pub mod registry;

pub use cursor::CodeCursor;
pub use dump::dump_binary;
pub use extension::{Extension, SideEffectDef, StringExpander};
pub use interp::{Interpreter, InterpreterConfig, Outcome, RunEnv};

/// First opcode / object-operand code owned by extensions; lower values
/// index the fixed core table of the class.
pub const CUSTOM_BASE: u8 = 32;

/// Ceiling on loop nesting, shared across nested interpreters.
pub const MAX_LOOP_DEPTH: usize = 8;
