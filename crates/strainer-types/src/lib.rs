//! Shared types for the strainer Sieve engine.
//!
//! This crate is the dependency hub of the workspace: the host-facing
//! traits ([`MessageView`], [`MailStore`], [`SmtpForward`], [`DuplicateDb`])
//! live here together with the per-run [`ScriptEnv`], the [`ExecStatus`]
//! out-parameters, status/exit codes and trace configuration. In-memory
//! implementations of the host traits ship alongside so tests and dry runs
//! never need a real mail store.

pub mod address;
pub mod env;
pub mod message;
pub mod status;
pub mod store;
pub mod trace;

pub use address::{Address, parse_address_list};
pub use env::{ExecStatus, ScriptEnv};
pub use message::{MemMessage, MessageView};
pub use status::{ErrorCode, exit_code};
pub use store::{DuplicateDb, MailStore, MemDuplicateDb, MemMailStore, MemSmtp, SmtpForward, StoredMail};
pub use trace::{TraceConfig, TraceLevel};

use bitflags::bitflags;

/// Stable identifier of an extension within the process-global registry.
///
/// Allocated once at registration and never reused; binaries store
/// extension *names* on disk and resolve them back to ids at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(pub usize);

impl ExtensionId {
    /// Raw index into the registry table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

bitflags! {
    /// Behavioural flags of an action definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActionFlags: u32 {
        /// The action attempts message delivery; a successful commit of
        /// any such action cancels the implicit keep.
        const TRIES_DELIVER = 1 << 0;
    }
}

/// Mailbox every undelivered message falls back to.
pub const DEFAULT_MAILBOX: &str = "INBOX";
