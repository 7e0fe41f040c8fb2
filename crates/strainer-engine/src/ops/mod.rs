//! Operation dispatch and the core operation table.

mod actions;
mod jumps;

pub use actions::{DiscardOp, KeepOp, RedirectOp, StopOp};
pub use jumps::{JmpFalseOp, JmpOp, JmpTrueOp};
pub use tests::{
    TestAddressOp, TestExistsOp, TestFalseOp, TestHeaderOp, TestSizeOverOp, TestSizeUnderOp,
    TestTrueOp,
};

use strainer_error::Result;

use crate::dump::Dumper;
use crate::interp::{Interpreter, RunEnv};

/// One executable operation.
///
/// `execute` consumes the operation's own operands and leaves the program
/// counter on the next operation; `dump` consumes the same operands while
/// disassembling.
pub trait Operation: Send + Sync {
    /// Mnemonic shown in traces and dumps.
    fn mnemonic(&self) -> &'static str;

    /// Execute against the runtime environment.
    fn execute(&self, it: &mut Interpreter<'_>, renv: &mut RunEnv<'_>) -> Result<()>;

    /// Disassemble the operand payload.
    fn dump(&self, d: &mut Dumper<'_>) -> Result<()>;
}

/// Core opcodes (all below [`crate::CUSTOM_BASE`]).
pub const OP_JMP: u8 = 0;
/// Conditional jump taken when the test register is true.
pub const OP_JMPTRUE: u8 = 1;
/// Conditional jump taken when the test register is false.
pub const OP_JMPFALSE: u8 = 2;
/// End the script.
pub const OP_STOP: u8 = 3;
/// Explicit keep.
pub const OP_KEEP: u8 = 4;
/// Cancel the implicit keep.
pub const OP_DISCARD: u8 = 5;
/// Forward the message.
pub const OP_REDIRECT: u8 = 6;
/// Constant-true test.
pub const OP_TEST_TRUE: u8 = 7;
/// Constant-false test.
pub const OP_TEST_FALSE: u8 = 8;
/// Address test over parsed address headers.
pub const OP_TEST_ADDRESS: u8 = 9;
/// Header test over raw header values.
pub const OP_TEST_HEADER: u8 = 10;
/// Header-existence test.
pub const OP_TEST_EXISTS: u8 = 11;
/// Message-size lower bound test.
pub const OP_TEST_SIZE_OVER: u8 = 12;
/// Message-size upper bound test.
pub const OP_TEST_SIZE_UNDER: u8 = 13;

static JMP: JmpOp = JmpOp;
static JMPTRUE: JmpTrueOp = JmpTrueOp;
static JMPFALSE: JmpFalseOp = JmpFalseOp;
static STOP: StopOp = StopOp;
static KEEP: KeepOp = KeepOp;
static DISCARD: DiscardOp = DiscardOp;
static REDIRECT: RedirectOp = RedirectOp;
static TEST_TRUE: TestTrueOp = TestTrueOp;
static TEST_FALSE: TestFalseOp = TestFalseOp;
static TEST_ADDRESS: TestAddressOp = TestAddressOp;
static TEST_HEADER: TestHeaderOp = TestHeaderOp;
static TEST_EXISTS: TestExistsOp = TestExistsOp;
static TEST_SIZE_OVER: TestSizeOverOp = TestSizeOverOp;
static TEST_SIZE_UNDER: TestSizeUnderOp = TestSizeUnderOp;

/// Resolve a core opcode.
#[must_use]
pub fn core_operation(opcode: u8) -> Option<&'static dyn Operation> {
    match opcode {
        OP_JMP => Some(&JMP),
        OP_JMPTRUE => Some(&JMPTRUE),
        OP_JMPFALSE => Some(&JMPFALSE),
        OP_STOP => Some(&STOP),
        OP_KEEP => Some(&KEEP),
        OP_DISCARD => Some(&DISCARD),
        OP_REDIRECT => Some(&REDIRECT),
        OP_TEST_TRUE => Some(&TEST_TRUE),
        OP_TEST_FALSE => Some(&TEST_FALSE),
        OP_TEST_ADDRESS => Some(&TEST_ADDRESS),
        OP_TEST_HEADER => Some(&TEST_HEADER),
        OP_TEST_EXISTS => Some(&TEST_EXISTS),
        OP_TEST_SIZE_OVER => Some(&TEST_SIZE_OVER),
        OP_TEST_SIZE_UNDER => Some(&TEST_SIZE_UNDER),
        _ => None,
    }
}
