//! End-to-end scenarios through the orchestrator, built directly on the
//! emit interface (the code generator's seam).

use strainer_binary::Binary;
use strainer_core::{MultiScript, ScriptCompiler, Sieve};
use strainer_engine::ops::{OP_JMPFALSE, OP_KEEP, OP_REDIRECT, OP_TEST_HEADER};
use strainer_engine::{emit, link};
use strainer_error::{Result, SieveError};
use strainer_match::COMPARATOR_OCTET;
use strainer_types::{
    exit_code, ErrorCode, ExecStatus, MemDuplicateDb, MemMailStore, MemMessage, MemSmtp,
    ScriptEnv,
};

// ---------------------------------------------------------------------------
// Program builders (what the excluded generator would emit)
// ---------------------------------------------------------------------------

fn keep_program() -> Binary {
    let mut binary = link::new_binary(Some("keep")).expect("binary");
    emit::emit_operation(&mut binary, OP_KEEP).expect("keep");
    binary.emit_varint(1);
    emit::emit_optional_end(&mut binary);
    binary
}

fn fileinto_flags_program(mailbox: &str) -> Binary {
    let mut binary = link::new_binary(Some("fileinto")).expect("binary");
    let fileinto = link::require_extension(&mut binary, strainer_ext_fileinto::NAME)
        .expect("require fileinto");
    let imapflags = link::require_extension(&mut binary, strainer_ext_imapflags::NAME)
        .expect("require imap4flags");

    emit::emit_ext_operation(&mut binary, fileinto, strainer_ext_fileinto::OP_FILEINTO)
        .expect("fileinto");
    binary.emit_varint(2);
    emit::emit_ext_side_effect(&mut binary, imapflags, strainer_ext_imapflags::SEFFECT_FLAGS)
        .expect("flags");
    emit::emit_string_list(&mut binary, &[b"\\Seen"]);
    emit::emit_optional_end(&mut binary);
    emit::emit_string(&mut binary, mailbox.as_bytes());
    binary
}

fn regex_fileinto_program() -> Binary {
    let mut binary = link::new_binary(Some("lists")).expect("binary");
    let regex =
        link::require_extension(&mut binary, strainer_ext_regex::NAME).expect("require regex");
    let _variables = link::require_extension(&mut binary, strainer_ext_variables::NAME)
        .expect("require variables");
    let fileinto = link::require_extension(&mut binary, strainer_ext_fileinto::NAME)
        .expect("require fileinto");

    // if header :regex "Subject" "^\[(.*)\] " { fileinto "list/${1}"; }
    emit::emit_operation(&mut binary, OP_TEST_HEADER).expect("header");
    emit::emit_ext_match_type(&mut binary, regex, strainer_ext_regex::MATCH_TYPE_REGEX)
        .expect("regex match type");
    emit::emit_comparator(&mut binary, COMPARATOR_OCTET).expect("cmp");
    emit::emit_optional_end(&mut binary);
    emit::emit_string_list(&mut binary, &[b"Subject"]);
    emit::emit_string_list(&mut binary, &[b"^\\[(.*)\\] "]);

    emit::emit_operation(&mut binary, OP_JMPFALSE).expect("jmpfalse");
    let skip = binary.emit_offset_placeholder();

    emit::emit_ext_operation(&mut binary, fileinto, strainer_ext_fileinto::OP_FILEINTO)
        .expect("fileinto");
    binary.emit_varint(2);
    emit::emit_optional_end(&mut binary);
    emit::emit_string(&mut binary, b"list/${1}");

    let end = binary.emit_pos();
    binary.patch_jump(skip, end).expect("patch");
    binary
}

fn double_redirect_program(address: &str) -> Binary {
    let mut binary = link::new_binary(Some("redirects")).expect("binary");
    for line in [1_u64, 2] {
        emit::emit_operation(&mut binary, OP_REDIRECT).expect("redirect");
        binary.emit_varint(line);
        emit::emit_optional_end(&mut binary);
        emit::emit_string(&mut binary, address.as_bytes());
    }
    binary
}

// ---------------------------------------------------------------------------
// Basic keep
// ---------------------------------------------------------------------------

#[test]
fn test_basic_keep_stores_to_default_mailbox() {
    let sieve = Sieve::new().expect("sieve");
    let binary = keep_program();

    let store = MemMailStore::new();
    store.add_mailbox("INBOX");
    let msg = MemMessage::new().with_header("Message-ID", "<a@x>");
    let env = ScriptEnv::new("tim").with_store(&store);

    let mut status = ExecStatus::default();
    let code = sieve.execute(&binary, &msg, &env, &mut status);

    assert_eq!(code, ErrorCode::None);
    assert!(status.message_saved);
    assert!(status.tried_default_save);
    assert_eq!(status.last_storage.as_deref(), Some("INBOX"));
    let stored = store.messages_in("INBOX");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].message_id, "<a@x>");
}

// ---------------------------------------------------------------------------
// Redundant fileinto only adjusts flags in place
// ---------------------------------------------------------------------------

#[test]
fn test_redundant_fileinto_updates_flags_in_place() {
    let sieve = Sieve::new().expect("sieve");
    let binary = fileinto_flags_program("Work");

    let store = MemMailStore::new();
    store.add_mailbox("INBOX");
    store.add_mailbox("Work");
    let msg = MemMessage::new()
        .with_header("Message-ID", "<a@x>")
        .with_origin_mailbox("Work");
    let env = ScriptEnv::new("tim").with_store(&store);

    let mut status = ExecStatus::default();
    let code = sieve.execute(&binary, &msg, &env, &mut status);

    assert_eq!(code, ErrorCode::None);
    assert!(status.message_saved);
    assert!(status.keep_original, "message stays where it is");
    assert!(store.messages_in("Work").is_empty(), "no copy is made");
    assert_eq!(
        store.flag_updates(),
        vec![("<a@x>".to_owned(), vec!["\\Seen".to_owned()])],
        "only the flag update path runs"
    );
    assert!(store.messages_in("INBOX").is_empty(), "no implicit keep");
}

// ---------------------------------------------------------------------------
// Regex captures feed variable substitution
// ---------------------------------------------------------------------------

#[test]
fn test_regex_captures_route_to_list_mailbox() {
    let sieve = Sieve::new().expect("sieve");
    let binary = regex_fileinto_program();

    let store = MemMailStore::new();
    store.add_mailbox("INBOX");
    let msg = MemMessage::new()
        .with_header("Message-ID", "<a@x>")
        .with_header("Subject", "[sieve] hi");
    let mut env = ScriptEnv::new("tim").with_store(&store);
    env.mailbox_autocreate = true;

    let mut status = ExecStatus::default();
    let code = sieve.execute(&binary, &msg, &env, &mut status);

    assert_eq!(code, ErrorCode::None);
    assert_eq!(store.messages_in("list/sieve").len(), 1);
    assert!(store.messages_in("INBOX").is_empty());
}

#[test]
fn test_regex_non_matching_subject_keeps() {
    let sieve = Sieve::new().expect("sieve");
    let binary = regex_fileinto_program();

    let store = MemMailStore::new();
    store.add_mailbox("INBOX");
    let msg = MemMessage::new().with_header("Subject", "no tag here");
    let mut env = ScriptEnv::new("tim").with_store(&store);
    env.mailbox_autocreate = true;

    let mut status = ExecStatus::default();
    let code = sieve.execute(&binary, &msg, &env, &mut status);

    assert_eq!(code, ErrorCode::None);
    assert_eq!(store.messages_in("INBOX").len(), 1, "implicit keep runs");
}

// ---------------------------------------------------------------------------
// Duplicate redirects collapse; host db suppresses re-delivery
// ---------------------------------------------------------------------------

#[test]
fn test_duplicate_redirect_suppressed() {
    let sieve = Sieve::new().expect("sieve");
    let binary = double_redirect_program("a@b.example");

    let store = MemMailStore::new();
    store.add_mailbox("INBOX");
    let smtp = MemSmtp::new();
    let dupes = MemDuplicateDb::new();
    let msg = MemMessage::new().with_header("Message-ID", "<a@x>");
    let env = ScriptEnv::new("tim")
        .with_store(&store)
        .with_smtp(&smtp)
        .with_duplicates(&dupes);

    // First run: the two identical redirects collapse into one action.
    let mut status = ExecStatus::default();
    let code = sieve.execute(&binary, &msg, &env, &mut status);
    assert_eq!(code, ErrorCode::None);
    assert_eq!(smtp.forwards().len(), 1, "one forward for two redirects");
    assert!(store.messages_in("INBOX").is_empty(), "redirect cancels keep");

    // Second run with the delivery recorded: the redirect is suppressed
    // entirely and the implicit keep takes over.
    let mut status = ExecStatus::default();
    let code = sieve.execute(&binary, &msg, &env, &mut status);
    assert_eq!(code, ErrorCode::None);
    assert_eq!(smtp.forwards().len(), 1, "no second forward");
    assert_eq!(store.messages_in("INBOX").len(), 1, "keep runs instead");
}

// ---------------------------------------------------------------------------
// A corrupt binary is rejected; recompiling restores delivery
// ---------------------------------------------------------------------------

#[test]
fn test_binary_corruption_and_recovery() {
    let sieve = Sieve::new().expect("sieve");

    // Save a valid keep program, then set the continuation bit on the
    // source-line varint inside block 1.
    let mut binary = keep_program();
    let mut bytes = strainer_binary::file::to_bytes(&mut binary);
    let block1_offset = binary
        .block(strainer_binary::BLOCK_MAIN)
        .expect("main block")
        .file_offset() as usize;
    let varint_at = block1_offset + 8 + 1; // block header, opcode, then the varint
    bytes[varint_at] |= 0x80;

    let corrupted = link::load_bytes(&bytes, Some("keep".to_owned())).expect("load");

    let store = MemMailStore::new();
    store.add_mailbox("INBOX");
    let msg = MemMessage::new().with_header("Message-ID", "<a@x>");
    let env = ScriptEnv::new("tim").with_store(&store);

    let mut status = ExecStatus::default();
    let code = sieve.execute(&corrupted, &msg, &env, &mut status);
    assert_eq!(code, ErrorCode::NotValid, "corruption surfaces to the host");
    assert!(store.messages_in("INBOX").is_empty());

    // The host recompiles and re-runs: normal delivery is restored.
    let recompiled = keep_program();
    let mut status = ExecStatus::default();
    let code = sieve.execute(&recompiled, &msg, &env, &mut status);
    assert_eq!(code, ErrorCode::None);
    assert!(status.message_saved);
    assert_eq!(store.messages_in("INBOX").len(), 1);
}

// ---------------------------------------------------------------------------
// Store refusals surface their own error codes
// ---------------------------------------------------------------------------

#[test]
fn test_denied_mailbox_surfaces_no_perm_and_keeps() {
    let sieve = Sieve::new().expect("sieve");
    let binary = fileinto_flags_program("Work");

    let store = MemMailStore::new();
    store.add_mailbox("INBOX");
    store.add_mailbox("Work");
    store.deny_mailbox("Work");
    let msg = MemMessage::new().with_header("Message-ID", "<a@x>");
    let env = ScriptEnv::new("tim").with_store(&store);

    let mut status = ExecStatus::default();
    let code = sieve.execute(&binary, &msg, &env, &mut status);

    assert_eq!(code, ErrorCode::NoPerm);
    assert_eq!(exit_code(code), 70);
    assert!(store.messages_in("Work").is_empty());
    assert_eq!(
        store.messages_in("INBOX").len(),
        1,
        "implicit keep saves the message despite the refusal"
    );
    assert!(status.message_saved);
    assert!(status.tried_default_save);
}

// ---------------------------------------------------------------------------
// Keep safety: failing stores end in NotReplied
// ---------------------------------------------------------------------------

#[test]
fn test_keep_failure_is_not_replied() {
    let sieve = Sieve::new().expect("sieve");
    let binary = keep_program();

    let store = MemMailStore::failing();
    let msg = MemMessage::new();
    let env = ScriptEnv::new("tim").with_store(&store);

    let mut status = ExecStatus::default();
    let code = sieve.execute(&binary, &msg, &env, &mut status);
    assert_eq!(code, ErrorCode::NotReplied);
    assert!(!status.message_saved);
    assert!(status.tried_default_save);
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

#[test]
fn test_dry_run_prints_plan_without_committing() {
    let sieve = Sieve::new().expect("sieve");
    let binary = fileinto_flags_program("Work");

    let msg = MemMessage::new();
    let env = ScriptEnv::new("tim");

    let mut out = Vec::new();
    let code = sieve.test(&binary, &msg, &env, &mut out);
    assert_eq!(code, ErrorCode::None);

    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("Performed actions:"));
    assert!(text.contains("store message in mailbox 'Work'"));
    assert!(text.contains("add IMAP flags: \\Seen"));
}

// ---------------------------------------------------------------------------
// Multiscript
// ---------------------------------------------------------------------------

#[test]
fn test_multiscript_shares_one_result() {
    let sieve = Sieve::new().expect("sieve");
    let personal = fileinto_flags_program("Work");
    let global = keep_program();

    let store = MemMailStore::new();
    store.add_mailbox("INBOX");
    store.add_mailbox("Work");
    let msg = MemMessage::new().with_header("Message-ID", "<a@x>");
    let env = ScriptEnv::new("tim").with_store(&store);

    let mut chain = MultiScript::new(&sieve);
    assert!(chain.run(&personal, &msg, &env).expect("first script"));
    assert!(chain.run(&global, &msg, &env).expect("second script"));
    assert_eq!(chain.result().len(), 2, "actions accumulate across scripts");

    let mut status = ExecStatus::default();
    let code = chain.finish(&msg, &env, &mut status);
    assert_eq!(code, ErrorCode::None);
    assert_eq!(store.messages_in("Work").len(), 1);
    assert_eq!(store.messages_in("INBOX").len(), 1);
}

#[test]
fn test_multiscript_fail_falls_back_to_keep() {
    let sieve = Sieve::new().expect("sieve");
    let personal = fileinto_flags_program("Work");

    let store = MemMailStore::new();
    store.add_mailbox("INBOX");
    store.add_mailbox("Work");
    let msg = MemMessage::new();
    let env = ScriptEnv::new("tim").with_store(&store);

    let mut chain = MultiScript::new(&sieve);
    chain.run(&personal, &msg, &env).expect("script");

    let mut status = ExecStatus::default();
    let code = chain.fail(&msg, &env, &mut status);
    assert_eq!(code, ErrorCode::None);
    assert!(store.messages_in("Work").is_empty(), "plan discarded");
    assert_eq!(store.messages_in("INBOX").len(), 1, "implicit keep instead");
}

// ---------------------------------------------------------------------------
// Open: load-or-recompile
// ---------------------------------------------------------------------------

struct KeepCompiler {
    calls: std::sync::atomic::AtomicUsize,
}

impl KeepCompiler {
    fn new() -> Self {
        Self {
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl ScriptCompiler for KeepCompiler {
    fn compile(&self, name: &str, _source: &str) -> Result<Binary> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut binary = link::new_binary(Some(name))?;
        emit::emit_operation(&mut binary, OP_KEEP)?;
        binary.emit_varint(1);
        emit::emit_optional_end(&mut binary);
        Ok(binary)
    }
}

#[test]
fn test_open_compiles_then_reuses_then_recompiles_when_stale() {
    let sieve = Sieve::new().expect("sieve");
    let compiler = KeepCompiler::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("main.sieve");
    let binary_path = dir.path().join("main.svbin");
    std::fs::write(&script_path, "keep;\n").expect("write script");

    // First open compiles and saves.
    let binary = sieve
        .open(&compiler, &script_path, &binary_path)
        .expect("open");
    assert_eq!(compiler.calls(), 1);
    assert!(binary_path.exists());
    assert_eq!(binary.script_name(), Some("main"));

    // Second open loads the saved binary.
    sieve
        .open(&compiler, &script_path, &binary_path)
        .expect("open again");
    assert_eq!(compiler.calls(), 1, "fresh binary is reused");

    // A newer script forces a recompile.
    let future = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
    std::fs::File::options()
        .write(true)
        .open(&script_path)
        .expect("open script")
        .set_modified(future)
        .expect("set mtime");
    sieve
        .open(&compiler, &script_path, &binary_path)
        .expect("open stale");
    assert_eq!(compiler.calls(), 2, "stale binary is recompiled");
}

#[test]
fn test_open_missing_script_exits_with_not_found() {
    let sieve = Sieve::new().expect("sieve");
    let compiler = KeepCompiler::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("absent.sieve");
    let binary_path = dir.path().join("absent.svbin");

    let err = sieve
        .open(&compiler, &script_path, &binary_path)
        .expect_err("must fail");
    assert!(matches!(err, SieveError::ScriptNotFound { .. }));
    assert_eq!(compiler.calls(), 0, "nothing to compile");

    let code = ErrorCode::from_error(&err);
    assert_eq!(code, ErrorCode::NotFound);
    assert_eq!(exit_code(code), 67);
}

#[test]
fn test_open_recompiles_on_corrupt_binary_file() {
    let sieve = Sieve::new().expect("sieve");
    let compiler = KeepCompiler::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("main.sieve");
    let binary_path = dir.path().join("main.svbin");
    std::fs::write(&script_path, "keep;\n").expect("write script");
    std::fs::write(&binary_path, b"not a sieve binary at all").expect("write junk");

    let binary = sieve
        .open(&compiler, &script_path, &binary_path)
        .expect("open");
    assert_eq!(compiler.calls(), 1, "junk binary triggers recompilation");
    drop(binary);

    // The rewritten binary now loads cleanly.
    sieve
        .open(&compiler, &script_path, &binary_path)
        .expect("open again");
    assert_eq!(compiler.calls(), 1);
}
