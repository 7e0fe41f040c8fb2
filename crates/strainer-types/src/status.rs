//! Orchestrator-level error codes and host wrapper exit codes.

use strainer_error::SieveError;

/// Outcome classification surfaced to the host after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    /// Run completed; the result plan committed.
    #[default]
    None,
    /// Retryable failure; defer the message.
    TempFail,
    /// Permission denied by the mail store.
    NoPerm,
    /// Quota exhausted.
    NoQuota,
    /// Script or mailbox not found.
    NotFound,
    /// The requested operation cannot be performed.
    NotPossible,
    /// Invalid input, e.g. a corrupt binary that could not be recompiled.
    NotValid,
    /// Neither explicit nor implicit keep succeeded; refuse at SMTP time.
    NotReplied,
}

impl ErrorCode {
    /// Classify an engine error.
    #[must_use]
    pub fn from_error(err: &SieveError) -> Self {
        match err {
            SieveError::TempFailure { .. } => ErrorCode::TempFail,
            SieveError::KeepFailed => ErrorCode::NotReplied,
            SieveError::Io(_) => ErrorCode::TempFail,
            SieveError::ScriptNotFound { .. } => ErrorCode::NotFound,
            SieveError::NoPermission { .. } => ErrorCode::NoPerm,
            SieveError::QuotaExceeded { .. } => ErrorCode::NoQuota,
            SieveError::BadMagic { .. }
            | SieveError::ByteOrder
            | SieveError::BadVersion { .. }
            | SieveError::UnknownExtension { .. }
            | SieveError::Corrupt { .. } => ErrorCode::NotValid,
            SieveError::Script { .. } | SieveError::Internal(_) => ErrorCode::NotPossible,
        }
    }
}

/// Exit code for host wrapper processes.
///
/// 0 success, 75 temporary failure (EX_TEMPFAIL), 67 script not found
/// (EX_NOUSER), 78 configuration error (EX_CONFIG), 70 other permanent
/// failure (EX_SOFTWARE).
#[must_use]
pub fn exit_code(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::None => 0,
        ErrorCode::TempFail => 75,
        ErrorCode::NotFound => 67,
        ErrorCode::NotValid => 78,
        ErrorCode::NoPerm
        | ErrorCode::NoQuota
        | ErrorCode::NotPossible
        | ErrorCode::NotReplied => 70,
    }
}
