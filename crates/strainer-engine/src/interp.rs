//! The stack-less, address-driven bytecode interpreter.
//!
//! One thread executes operations sequentially; each handler consumes its
//! own operands and advances the program counter. Between operations the
//! interpreter polls a cooperative interruption flag (multiscript uses it
//! to yield between scripts). Jumps are validated against the block size
//! and the innermost loop boundary; a `break_loops` jump unwinds every
//! frame whose end lies at or before the target.

use std::any::Any;
use std::io::Write;
use std::rc::Rc;

use hashbrown::HashMap;
use smallvec::SmallVec;
use strainer_binary::Binary;
use strainer_error::{Result, SieveError};
use strainer_match::{match_key_list, MatchValues, MatchValuesBuilder};
use strainer_result::{ScriptResult, SideEffect};
use strainer_types::{ExtensionId, MessageView, ScriptEnv, TraceConfig, TraceLevel};
use tracing::{debug, error};

use crate::cursor::CodeCursor;
use crate::extension::StringExpander;
use crate::operand::{self, class, TestOperands};
use crate::registry;
use crate::MAX_LOOP_DEPTH;

/// Aggregate runtime environment handed to every operation.
pub struct RunEnv<'a> {
    /// Message under filtering.
    pub msg: &'a dyn MessageView,
    /// Host environment.
    pub env: &'a ScriptEnv<'a>,
    /// Result plan being built.
    pub result: &'a mut ScriptResult,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The program counter ran off the end of the block.
    Done,
    /// A `stop` operation ended the script.
    Stopped,
    /// The interruption flag was raised externally.
    Yielded,
}

/// Interpreter tunables.
#[derive(Debug, Clone, Copy)]
pub struct InterpreterConfig {
    /// Loop-nesting ceiling, shared across nested interpreters.
    pub max_loop_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_loop_depth: MAX_LOOP_DEPTH,
        }
    }
}

/// One live loop.
struct LoopFrame {
    level: usize,
    begin: usize,
    end: usize,
    context: Option<Box<dyn Any>>,
}

struct Tracer {
    out: Box<dyn Write>,
    config: TraceConfig,
}

impl Tracer {
    fn line(&mut self, addr: Option<usize>, text: &str) {
        // Trace output must never alter execution; write errors are
        // dropped on the floor.
        let _ = match addr {
            Some(addr) if self.config.addresses => writeln!(self.out, "{addr:08x}: {text}"),
            _ => writeln!(self.out, "{text}"),
        };
    }
}

/// Interpreter state for one script run.
pub struct Interpreter<'a> {
    cursor: CodeCursor<'a>,
    config: InterpreterConfig,
    test_result: bool,
    interrupted: bool,
    stopped: bool,
    loops: SmallVec<[LoopFrame; 4]>,
    base_loop_level: usize,
    loop_limit: usize,
    contexts: HashMap<usize, Box<dyn Any>>,
    match_values: Option<MatchValues>,
    match_values_enabled: bool,
    expander: Option<Rc<dyn StringExpander>>,
    tracer: Option<Tracer>,
}

impl<'a> Interpreter<'a> {
    /// Interpreter over the binary's main program block. Runs every
    /// linked extension's `interpreter_loaded` hook before returning.
    pub fn new(binary: &'a Binary, config: InterpreterConfig) -> Result<Self> {
        Self::with_block(binary, strainer_binary::BLOCK_MAIN, config, 0)
    }

    /// Nested interpreter over an arbitrary block, inheriting the
    /// parent's loop level so nesting limits hold across the chain.
    pub fn nested(
        binary: &'a Binary,
        block_id: u32,
        config: InterpreterConfig,
        parent_loop_level: usize,
    ) -> Result<Self> {
        Self::with_block(binary, block_id, config, parent_loop_level)
    }

    fn with_block(
        binary: &'a Binary,
        block_id: u32,
        config: InterpreterConfig,
        base_loop_level: usize,
    ) -> Result<Self> {
        let mut it = Self {
            cursor: CodeCursor::new(binary, block_id)?,
            config,
            test_result: false,
            interrupted: false,
            stopped: false,
            loops: SmallVec::new(),
            base_loop_level,
            loop_limit: 0,
            contexts: HashMap::new(),
            match_values: None,
            match_values_enabled: false,
            expander: None,
            tracer: None,
        };

        let ids: Vec<ExtensionId> = binary.links().iter().map(|link| link.ext_id()).collect();
        for id in ids {
            let ext = registry::by_id(id).ok_or_else(|| {
                SieveError::corrupt(format!("linked extension id {} not registered", id.index()))
            })?;
            ext.interpreter_loaded(id, &mut it)?;
        }
        Ok(it)
    }

    /// Attach a trace sink.
    pub fn set_trace(&mut self, out: Box<dyn Write>, config: TraceConfig) {
        self.tracer = Some(Tracer { out, config });
    }

    /// Read cursor (shared).
    #[must_use]
    pub const fn cursor(&self) -> &CodeCursor<'a> {
        &self.cursor
    }

    /// Read cursor (exclusive), for operand consumption by operations.
    pub fn cursor_mut(&mut self) -> &mut CodeCursor<'a> {
        &mut self.cursor
    }

    /// Current program counter.
    #[must_use]
    pub const fn pc(&self) -> usize {
        self.cursor.pc
    }

    // -- main loop --------------------------------------------------------

    /// Execute operations until the block ends, a `stop` runs, the
    /// interruption flag is raised, or an operation fails.
    pub fn run(&mut self, renv: &mut RunEnv<'_>) -> Result<Outcome> {
        loop {
            if self.interrupted {
                return Ok(if self.stopped {
                    Outcome::Stopped
                } else {
                    Outcome::Yielded
                });
            }
            if self.cursor.at_end() {
                return Ok(Outcome::Done);
            }
            let addr = self.cursor.pc;
            let op = self.cursor.read_operation()?;
            self.trace(TraceLevel::Commands, Some(addr), op.mnemonic());
            if let Err(err) = op.execute(self, renv) {
                error!(addr, op = op.mnemonic(), error = %err, "operation failed");
                return Err(err);
            }
        }
    }

    /// Raise the cooperative interruption flag; control returns to the
    /// caller at the next operation boundary.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    /// End the script as a `stop` operation does.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.interrupted = true;
    }

    /// Test-result register, written by the previous test.
    #[must_use]
    pub const fn test_result(&self) -> bool {
        self.test_result
    }

    /// Write the test-result register.
    pub fn set_test_result(&mut self, result: bool) {
        self.test_result = result;
    }

    // -- jumps ------------------------------------------------------------

    /// Consume a jump offset and, when `take`, transfer control.
    ///
    /// Offsets are relative to their own first byte. Targets outside
    /// `(0, block_size]` are corrupt; targets at or beyond the innermost
    /// loop end are corrupt unless `break_loops` unwinds far enough.
    pub fn program_jump(&mut self, take: bool, break_loops: bool) -> Result<()> {
        let jmp_start = self.cursor.pc;
        let offset = self.cursor.read_offset()?;
        if !take {
            return Ok(());
        }

        let target = jmp_start as i64 + i64::from(offset);
        if target <= 0 || target > self.cursor.block_len() as i64 {
            return Err(SieveError::corrupt(format!(
                "jump at offset {jmp_start} lands outside the block (target {target})"
            )));
        }
        let target = target as usize;

        if break_loops {
            while self
                .loops
                .last()
                .is_some_and(|frame| frame.end <= target)
            {
                self.loops.pop();
            }
            self.update_loop_limit();
        }
        if self.loop_limit > 0 && target >= self.loop_limit {
            return Err(SieveError::corrupt(format!(
                "jump at offset {jmp_start} crosses the loop boundary at {}",
                self.loop_limit
            )));
        }

        self.cursor.pc = target;
        Ok(())
    }

    // -- loops ------------------------------------------------------------

    /// Push a loop frame ending at `end`, returning its level.
    pub fn loop_start(&mut self, end: usize) -> Result<usize> {
        if self.loop_level() >= self.config.max_loop_depth {
            return Err(SieveError::script(
                format!("loops nested deeper than limit {}", self.config.max_loop_depth),
                0,
            ));
        }
        if end > self.cursor.block_len() || end <= self.cursor.pc {
            return Err(SieveError::corrupt(format!(
                "loop end {end} invalid at offset {}",
                self.cursor.pc
            )));
        }
        let level = self.loop_level();
        self.loops.push(LoopFrame {
            level,
            begin: self.cursor.pc,
            end,
            context: None,
        });
        self.loop_limit = end;
        Ok(level)
    }

    /// Jump back to the innermost frame's begin address, which must
    /// match the operand-recorded one.
    pub fn loop_next(&mut self, begin: usize) -> Result<()> {
        let frame = self
            .loops
            .last()
            .ok_or_else(|| SieveError::corrupt("loop-next outside any loop"))?;
        if frame.begin != begin {
            return Err(SieveError::corrupt(format!(
                "loop-next begin {begin} does not match frame begin {}",
                frame.begin
            )));
        }
        self.cursor.pc = begin;
        Ok(())
    }

    /// Unwind every frame at or inside `level` and continue after the
    /// broken loop's end.
    pub fn loop_break(&mut self, level: usize) -> Result<()> {
        let index = level
            .checked_sub(self.base_loop_level)
            .filter(|index| *index < self.loops.len())
            .ok_or_else(|| {
                SieveError::corrupt(format!("loop-break targets unknown level {level}"))
            })?;
        let end = self.loops[index].end;
        self.loops.truncate(index);
        self.update_loop_limit();
        self.cursor.pc = end;
        Ok(())
    }

    fn update_loop_limit(&mut self) {
        self.loop_limit = self.loops.last().map_or(0, |frame| frame.end);
    }

    /// Total nesting level, counting inherited parent frames.
    #[must_use]
    pub fn loop_level(&self) -> usize {
        self.base_loop_level + self.loops.len()
    }

    /// End address of the innermost frame, 0 when no frame is live.
    #[must_use]
    pub const fn loop_limit(&self) -> usize {
        self.loop_limit
    }

    /// Attach a context to the innermost frame; dropped on unwind.
    pub fn set_loop_context(&mut self, context: Box<dyn Any>) -> Result<()> {
        let frame = self
            .loops
            .last_mut()
            .ok_or_else(|| SieveError::internal("loop context outside any loop"))?;
        frame.context = Some(context);
        Ok(())
    }

    /// Innermost frame's context, downcast to `T`.
    #[must_use]
    pub fn loop_context<T: 'static>(&self) -> Option<&T> {
        self.loops
            .last()
            .and_then(|frame| frame.context.as_deref())
            .and_then(<dyn Any>::downcast_ref)
    }

    // -- extension context slots ------------------------------------------

    /// Install an interpreter-scoped context for `id`.
    pub fn set_ext_context(&mut self, id: ExtensionId, context: Box<dyn Any>) {
        self.contexts.insert(id.index(), context);
    }

    /// Context slot for `id`; unallocated slots read as empty.
    #[must_use]
    pub fn ext_context<T: 'static>(&self, id: ExtensionId) -> Option<&T> {
        self.contexts
            .get(&id.index())
            .and_then(|ctx| ctx.downcast_ref())
    }

    /// Mutable context slot for `id`.
    pub fn ext_context_mut<T: 'static>(&mut self, id: ExtensionId) -> Option<&mut T> {
        self.contexts
            .get_mut(&id.index())
            .and_then(|ctx| ctx.downcast_mut())
    }

    // -- strings and expansion --------------------------------------------

    /// Install the `${..}` expander (variables extension).
    pub fn set_expander(&mut self, expander: Rc<dyn StringExpander>) {
        self.expander = Some(expander);
    }

    /// Expand `raw` through the installed expander, or pass it through.
    pub fn expand(&mut self, raw: &[u8]) -> Result<Vec<u8>> {
        match self.expander.clone() {
            Some(expander) => expander.expand(self, raw),
            None => Ok(raw.to_vec()),
        }
    }

    /// Read a string operand and expand it.
    pub fn read_string(&mut self) -> Result<Vec<u8>> {
        let raw = operand::read_string_raw(&mut self.cursor)?;
        self.expand(&raw)
    }

    /// Read a string operand without substitution (identifiers).
    pub fn read_string_literal(&mut self) -> Result<Vec<u8>> {
        operand::read_string_raw(&mut self.cursor)
    }

    /// Read a string-list operand, expanding every item.
    pub fn read_string_list(&mut self) -> Result<Vec<Vec<u8>>> {
        let raw = operand::read_string_list_raw(&mut self.cursor)?;
        raw.iter().map(|item| self.expand(item)).collect()
    }

    /// Read a number operand.
    pub fn read_number(&mut self) -> Result<u64> {
        operand::read_number(&mut self.cursor)
    }

    /// Read an action's optional side-effect list up to its terminator.
    pub fn read_side_effect_list(&mut self) -> Result<Vec<Box<dyn SideEffect>>> {
        let mut effects = Vec::new();
        loop {
            let at = self.cursor.pc;
            let tag = self.cursor.read_byte()?;
            match tag {
                class::OPTIONAL => break,
                class::SIDE_EFFECT => {
                    let def = self.cursor.read_side_effect_def()?;
                    effects.push(def.read(self)?);
                }
                other => {
                    return Err(SieveError::corrupt(format!(
                        "unexpected operand class {other} in side-effect list at offset {at}"
                    )));
                }
            }
        }
        Ok(effects)
    }

    // -- match values ------------------------------------------------------

    /// Turn on match-value tracking (variables extension).
    pub fn enable_match_values(&mut self) {
        self.match_values_enabled = true;
    }

    /// Whether match values are being tracked.
    #[must_use]
    pub const fn match_values_enabled(&self) -> bool {
        self.match_values_enabled
    }

    /// The committed match-value set.
    #[must_use]
    pub const fn match_values(&self) -> Option<&MatchValues> {
        self.match_values.as_ref()
    }

    /// Run one full match: every tested value against the key list,
    /// short-circuiting on the first hit. A successful match with
    /// captures atomically replaces the match-value register; a failed
    /// match leaves the previous set intact.
    pub fn perform_match(
        &mut self,
        operands: &TestOperands,
        values: &[Vec<u8>],
        keys: &[Vec<u8>],
    ) -> Result<bool> {
        let mut session = operands.match_type.begin();
        let mut builder = if self.match_values_enabled {
            Some(MatchValuesBuilder::new())
        } else {
            None
        };

        let mut matched = false;
        for value in values {
            let hit = match_key_list(
                session.as_mut(),
                operands.comparator,
                value,
                keys,
                builder.as_mut(),
            )?;
            if let Some(key_index) = hit {
                self.trace_match(value, key_index);
                matched = true;
                break;
            }
        }

        // Only match types that capture (they always stage `${0}`) may
        // replace the register; a successful `:is` leaves it alone.
        if matched {
            if let Some(builder) = builder {
                if !builder.is_empty() {
                    self.match_values = Some(builder.commit());
                }
            }
        }
        debug!(
            match_type = operands.match_type.name(),
            comparator = operands.comparator.name(),
            matched,
            "match finished"
        );
        Ok(matched)
    }

    // -- trace -------------------------------------------------------------

    /// Emit one trace line when `level` is enabled.
    pub fn trace(&mut self, level: TraceLevel, addr: Option<usize>, text: &str) {
        if let Some(tracer) = &mut self.tracer {
            if tracer.config.enabled(level) {
                tracer.line(addr, text);
            }
        }
    }

    /// Trace a test outcome.
    pub fn trace_test(&mut self, name: &str, result: bool) {
        let addr = self.cursor.pc;
        self.trace(
            TraceLevel::Tests,
            Some(addr),
            &format!("test {name} => {result}"),
        );
    }

    /// Trace an added action.
    pub fn trace_action(&mut self, description: &str) {
        let addr = self.cursor.pc;
        self.trace(
            TraceLevel::Actions,
            Some(addr),
            &format!("action: {description}"),
        );
    }

    fn trace_match(&mut self, value: &[u8], key_index: usize) {
        if self.tracer.is_some() {
            let text = format!(
                "matched value \"{}\" against key {key_index}",
                String::from_utf8_lossy(value)
            );
            self.trace(TraceLevel::Matching, None, &text);
        }
    }
}
