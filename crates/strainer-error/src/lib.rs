//! Error types for the strainer Sieve engine.
//!
//! Every crate in the workspace returns [`SieveError`] through the shared
//! [`Result`] alias. Binary-corruption variants carry a human-readable
//! `detail` string; the orchestrator treats all of them as "discard the
//! binary and recompile from source".

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, SieveError>;

/// All errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum SieveError {
    /// Underlying filesystem failure while opening, reading or saving a
    /// binary.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The script source does not exist. Distinct from [`SieveError::Io`]
    /// so host wrappers can exit with their script-not-found code.
    #[error("script not found: {path}")]
    ScriptNotFound {
        /// Path the orchestrator tried to read.
        path: String,
    },

    /// The mail store refused the operation for lack of permission.
    /// Permanent; the implicit keep is attempted as fallback.
    #[error("permission denied: {message}")]
    NoPermission {
        /// Store-provided description.
        message: String,
    },

    /// The user's quota is exhausted and the store will not accept the
    /// message. Stores report transient shortages as
    /// [`SieveError::TempFailure`] instead.
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        /// Store-provided description.
        message: String,
    },

    /// The binary's magic constant did not match.
    #[error("invalid binary magic: {found:#010X}")]
    BadMagic {
        /// Magic value actually present in the file.
        found: u32,
    },

    /// The magic matched byte-reversed: the binary was produced on a host
    /// of opposite endianness and must be recompiled, never reinterpreted.
    #[error("binary byte order does not match this host")]
    ByteOrder,

    /// Version fields did not match the running engine.
    #[error("unsupported binary version {major}.{minor}")]
    BadVersion {
        /// Major version found in the header.
        major: u16,
        /// Minor version found in the header.
        minor: u16,
    },

    /// The binary's link table names an extension unknown to the registry.
    #[error("binary requires unknown extension `{name}`")]
    UnknownExtension {
        /// Extension name as stored in block 0.
        name: String,
    },

    /// Structural corruption: truncated block, malformed varint or string,
    /// bad block id, out-of-range jump, unknown opcode or operand class.
    #[error("binary corrupt: {detail}")]
    Corrupt {
        /// What was malformed, with offsets where useful.
        detail: String,
    },

    /// Runtime script error: the script aborts and implicit keep takes
    /// over. Carries the source line recorded with the failing action or
    /// operation when one is known.
    #[error("script error: {message}")]
    Script {
        /// User-facing description.
        message: String,
        /// 1-based source line, 0 when unknown.
        source_line: u32,
    },

    /// Retryable failure, e.g. the mail store is temporarily unavailable.
    /// The caller should defer the message and try again later.
    #[error("temporary failure: {message}")]
    TempFailure {
        /// User-facing description.
        message: String,
    },

    /// Neither an explicit delivering action nor the implicit keep
    /// succeeded; the message must be refused at SMTP time.
    #[error("explicit and implicit keep both failed")]
    KeepFailed,

    /// Invariant violation inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SieveError {
    /// Build a [`SieveError::Corrupt`] from anything printable.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        SieveError::Corrupt {
            detail: detail.into(),
        }
    }

    /// Build a [`SieveError::Script`] with a known source line.
    pub fn script(message: impl Into<String>, source_line: u32) -> Self {
        SieveError::Script {
            message: message.into(),
            source_line,
        }
    }

    /// Build a [`SieveError::TempFailure`].
    pub fn temporary(message: impl Into<String>) -> Self {
        SieveError::TempFailure {
            message: message.into(),
        }
    }

    /// Build a [`SieveError::NoPermission`].
    pub fn no_permission(message: impl Into<String>) -> Self {
        SieveError::NoPermission {
            message: message.into(),
        }
    }

    /// Build a [`SieveError::QuotaExceeded`].
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        SieveError::QuotaExceeded {
            message: message.into(),
        }
    }

    /// Build a [`SieveError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        SieveError::Internal(message.into())
    }

    /// Whether this error means the binary must be recompiled.
    #[must_use]
    pub fn is_binary_error(&self) -> bool {
        matches!(
            self,
            SieveError::BadMagic { .. }
                | SieveError::ByteOrder
                | SieveError::BadVersion { .. }
                | SieveError::UnknownExtension { .. }
                | SieveError::Corrupt { .. }
        )
    }

    /// Whether the caller may retry delivery later.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, SieveError::TempFailure { .. })
    }
}
