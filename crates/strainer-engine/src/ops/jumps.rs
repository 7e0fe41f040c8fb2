//! Jump operations.

use strainer_error::Result;

use crate::dump::Dumper;
use crate::interp::{Interpreter, RunEnv};
use crate::ops::Operation;

/// Unconditional jump.
pub struct JmpOp;

impl Operation for JmpOp {
    fn mnemonic(&self) -> &'static str {
        "JMP"
    }

    fn execute(&self, it: &mut Interpreter<'_>, _renv: &mut RunEnv<'_>) -> Result<()> {
        it.program_jump(true, false)
    }

    fn dump(&self, d: &mut Dumper<'_>) -> Result<()> {
        d.dump_jump_target()
    }
}

/// Jump taken when the preceding test succeeded.
pub struct JmpTrueOp;

impl Operation for JmpTrueOp {
    fn mnemonic(&self) -> &'static str {
        "JMPTRUE"
    }

    fn execute(&self, it: &mut Interpreter<'_>, _renv: &mut RunEnv<'_>) -> Result<()> {
        let take = it.test_result();
        it.program_jump(take, false)
    }

    fn dump(&self, d: &mut Dumper<'_>) -> Result<()> {
        d.dump_jump_target()
    }
}

/// Jump taken when the preceding test failed.
pub struct JmpFalseOp;

impl Operation for JmpFalseOp {
    fn mnemonic(&self) -> &'static str {
        "JMPFALSE"
    }

    fn execute(&self, it: &mut Interpreter<'_>, _renv: &mut RunEnv<'_>) -> Result<()> {
        let take = !it.test_result();
        it.program_jump(take, false)
    }

    fn dump(&self, d: &mut Dumper<'_>) -> Result<()> {
        d.dump_jump_target()
    }
}
