//! Orchestration over the strainer engine: compile, open, execute, test
//! and multiscript entry points.
//!
//! The script front-end (lexer, parser, validator, code generator) is an
//! external collaborator reached through [`ScriptCompiler`]; this crate
//! owns everything after it: binaries on disk, interpreters, and the
//! transactional result commit, including the no-mail-lost guarantees of
//! the error taxonomy (runtime errors fall back to the implicit keep;
//! binary corruption is surfaced so the caller recompiles).

pub mod multiscript;

pub use multiscript::MultiScript;

use std::io::Write;
use std::path::Path;

use strainer_binary::Binary;
use strainer_engine::{link, registry, Interpreter, InterpreterConfig, RunEnv};
use strainer_error::{Result, SieveError};
use strainer_result::{ActionEnv, ScriptResult};
use strainer_types::{ErrorCode, ExecStatus, MessageView, ScriptEnv};
use tracing::{error, info, warn};

/// Engine-level settings.
#[derive(Debug, Clone, Copy)]
pub struct SieveConfig {
    /// Ceiling on accumulated actions per run.
    pub max_actions: usize,
    /// Interpreter tunables.
    pub interpreter: InterpreterConfig,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            max_actions: strainer_result::result::DEFAULT_MAX_ACTIONS,
            interpreter: InterpreterConfig::default(),
        }
    }
}

/// The external script front-end.
///
/// Parsing, validation and code generation are out of scope for the
/// engine; whatever implements this trait provides them and emits
/// bytecode through the binary's emit interface.
pub trait ScriptCompiler {
    /// Compile `source` into a binary named `name`.
    fn compile(&self, name: &str, source: &str) -> Result<Binary>;
}

/// The engine facade.
pub struct Sieve {
    config: SieveConfig,
}

impl Sieve {
    /// Engine with default settings. Registers the stock extensions.
    pub fn new() -> Result<Self> {
        Self::with_config(SieveConfig::default())
    }

    /// Engine with custom settings. Registers the stock extensions.
    pub fn with_config(config: SieveConfig) -> Result<Self> {
        registry::ensure_core()?;
        strainer_ext_fileinto::register()?;
        strainer_ext_imapflags::register()?;
        strainer_ext_regex::register()?;
        strainer_ext_variables::register()?;
        Ok(Self { config })
    }

    /// Engine settings.
    #[must_use]
    pub const fn config(&self) -> &SieveConfig {
        &self.config
    }

    /// Compile a script through the external front-end.
    pub fn compile(
        &self,
        compiler: &dyn ScriptCompiler,
        name: &str,
        source: &str,
    ) -> Result<Binary> {
        compiler.compile(name, source)
    }

    /// Serialise a binary, running extension save hooks first.
    pub fn save(&self, binary: &mut Binary, path: &Path) -> Result<()> {
        link::save(binary, path)
    }

    /// Load a compiled binary, recompiling from the script source when
    /// the binary is missing, stale, corrupt, of a foreign byte order or
    /// version, or references unknown extensions.
    pub fn open(
        &self,
        compiler: &dyn ScriptCompiler,
        script_path: &Path,
        binary_path: &Path,
    ) -> Result<Binary> {
        if binary_path.exists() {
            let stale = is_stale(script_path, binary_path);
            if stale {
                info!(script = %script_path.display(), "script newer than binary, recompiling");
            } else {
                match link::load(binary_path) {
                    Ok(binary) => return Ok(binary),
                    Err(err) if err.is_binary_error() => {
                        warn!(
                            binary = %binary_path.display(),
                            error = %err,
                            "discarding unusable binary, recompiling"
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let source = match std::fs::read_to_string(script_path) {
            Ok(source) => source,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SieveError::ScriptNotFound {
                    path: script_path.display().to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let name = script_path
            .file_stem()
            .map_or_else(|| "script".to_owned(), |stem| stem.to_string_lossy().into_owned());
        let mut binary = self.compile(compiler, &name, &source)?;
        self.save(&mut binary, binary_path)?;
        Ok(binary)
    }

    /// Run a binary against a message and commit the resulting plan.
    pub fn execute(
        &self,
        binary: &Binary,
        msg: &dyn MessageView,
        env: &ScriptEnv<'_>,
        status: &mut ExecStatus,
    ) -> ErrorCode {
        let mut result = ScriptResult::with_max_actions(self.config.max_actions);
        match self.interpret(binary, msg, env, &mut result, None) {
            Ok(_) => {}
            Err(err) if err.is_binary_error() => {
                // The caller recompiles; delivery falls back to the host.
                error!(error = %err, "binary unusable during execution");
                return ErrorCode::from_error(&err);
            }
            Err(err) if err.is_temporary() => return ErrorCode::TempFail,
            Err(err) => {
                // Runtime error: the script's partial plan is discarded
                // and the message falls back to the implicit keep.
                error!(error = %err, "script aborted, performing implicit keep");
                let code = ErrorCode::from_error(&err);
                let mut keep_only = ScriptResult::with_max_actions(self.config.max_actions);
                return match commit(&mut keep_only, msg, env, status) {
                    ErrorCode::None => code,
                    keep_code => keep_code,
                };
            }
        }
        commit(&mut result, msg, env, status)
    }

    /// Dry run: interpret, then print the plan instead of committing.
    /// With tracing configured in the environment, the trace interleaves
    /// into the same stream.
    pub fn test(
        &self,
        binary: &Binary,
        msg: &dyn MessageView,
        env: &ScriptEnv<'_>,
        out: &mut dyn Write,
    ) -> ErrorCode {
        let mut result = ScriptResult::with_max_actions(self.config.max_actions);
        let trace = trace_buffer::TraceBuffer::new();
        let sink = env.trace.map(|config| (trace.clone(), config));

        if let Err(err) = self.interpret(binary, msg, env, &mut result, sink) {
            error!(error = %err, "dry run failed");
            return ErrorCode::from_error(&err);
        }

        let _ = out.write_all(&trace.take());
        let aenv = ActionEnv { msg, env };
        if result.print(out, &aenv).is_err() {
            return ErrorCode::NotPossible;
        }
        ErrorCode::None
    }

    pub(crate) fn interpret(
        &self,
        binary: &Binary,
        msg: &dyn MessageView,
        env: &ScriptEnv<'_>,
        result: &mut ScriptResult,
        trace: Option<(trace_buffer::TraceBuffer, strainer_types::TraceConfig)>,
    ) -> Result<strainer_engine::Outcome> {
        let mut it = Interpreter::new(binary, self.config.interpreter)?;
        if let Some((sink, config)) = trace {
            it.set_trace(Box::new(sink), config);
        }
        let mut renv = RunEnv { msg, env, result };
        it.run(&mut renv)
    }
}

fn is_stale(script_path: &Path, binary_path: &Path) -> bool {
    let script_mtime = std::fs::metadata(script_path).and_then(|meta| meta.modified());
    let binary_mtime = std::fs::metadata(binary_path).and_then(|meta| meta.modified());
    match (script_mtime, binary_mtime) {
        (Ok(script), Ok(binary)) => script > binary,
        _ => false,
    }
}

pub(crate) fn commit(
    result: &mut ScriptResult,
    msg: &dyn MessageView,
    env: &ScriptEnv<'_>,
    status: &mut ExecStatus,
) -> ErrorCode {
    let aenv = ActionEnv { msg, env };
    match result.execute(&aenv, status) {
        Ok(()) => ErrorCode::None,
        Err(SieveError::KeepFailed) => {
            error!("explicit and implicit keep both failed");
            ErrorCode::NotReplied
        }
        Err(err) if err.is_temporary() => ErrorCode::TempFail,
        Err(err) => {
            // Delivery partially failed but the message is safe (the
            // implicit keep succeeded inside execute).
            warn!(error = %err, "result committed with failures");
            ErrorCode::from_error(&err)
        }
    }
}

pub(crate) mod trace_buffer {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Shared trace sink: the interpreter owns one handle, the caller
    /// drains the other after the run.
    #[derive(Clone, Default)]
    pub struct TraceBuffer {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl TraceBuffer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn take(&self) -> Vec<u8> {
            self.buf
                .lock()
                .map(|mut buf| std::mem::take(&mut *buf))
                .unwrap_or_default()
        }
    }

    impl Write for TraceBuffer {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut buf) = self.buf.lock() {
                buf.extend_from_slice(data);
            }
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
