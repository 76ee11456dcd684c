//! Integration tests for externally-made changes: detection, journaling,
//! and rollback.

mod common;

use common::TestSpace;
use nts::journal::{EntryKind, Stack};
use nts::txn::restore::UndoOutcome;

#[test]
fn detected_external_edit_is_journaled_and_undoable() {
    let space = TestSpace::new();
    let ctx = space.session("ext-basic");
    let file = space.seed("a.txt", "session content\n");
    ctx.external.snapshot(&file);

    // A human saves the file behind the session's back.
    std::fs::write(&file, "external content\n").unwrap();
    let change = ctx.external.observe(&file).expect("drift detected");
    ctx.txn
        .record_external_change(
            &change.path,
            &change.previous_text,
            change.previous_hash,
            change.current_hash,
            "external edit",
        )
        .unwrap();

    let undo_stack = ctx.txn.journal(Stack::Undo).unwrap();
    assert_eq!(undo_stack.len(), 1);
    assert_eq!(undo_stack[0].kind, EntryKind::External);
    assert_eq!(undo_stack[0].description.as_deref(), Some("external edit"));

    // Undo rolls the external change back…
    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::Success);
    assert_eq!(space.read("a.txt"), "session content\n");

    // …and the matching redo entry restores it.
    let redo_stack = ctx.txn.journal(Stack::Redo).unwrap();
    assert_eq!(redo_stack.len(), 1);
    assert_eq!(redo_stack[0].kind, EntryKind::External);
    ctx.txn.redo().unwrap();
    assert_eq!(space.read("a.txt"), "external content\n");
}

#[test]
fn recording_an_external_change_clears_the_redo_stack() {
    let space = TestSpace::new();
    let ctx = space.session("ext-clears-redo");
    let file = space.seed("a.txt", "v0");

    space.commit_edit(&ctx, "edit", &[&file], || {
        std::fs::write(&file, "v1").unwrap();
    });
    ctx.txn.undo().unwrap();
    assert_eq!(ctx.txn.journal(Stack::Redo).unwrap().len(), 1);

    ctx.txn
        .record_external_change(
            &file,
            "v0",
            nts::hashing::crc32_str("v0"),
            nts::hashing::crc32_str("vX"),
            "drift",
        )
        .unwrap();
    assert!(ctx.txn.journal(Stack::Redo).unwrap().is_empty());
}

#[test]
fn restore_does_not_re_trigger_detection() {
    let space = TestSpace::new();
    let ctx = space.session("ext-no-echo");
    let file = space.seed("a.txt", "before\n");
    ctx.external.snapshot(&file);

    std::fs::write(&file, "after\n").unwrap();
    let change = ctx.external.observe(&file).unwrap();
    ctx.txn
        .record_external_change(
            &change.path,
            &change.previous_text,
            change.previous_hash,
            change.current_hash,
            "drift",
        )
        .unwrap();
    ctx.txn.undo().unwrap();

    // The undo rewrote the file; the tracker must not see that as another
    // external change.
    assert!(ctx.external.observe(&file).is_none());
}

#[test]
fn file_history_interleaves_transactions_and_external_entries() {
    let space = TestSpace::new();
    let ctx = space.session("ext-history");
    let file = space.seed("a.txt", "v0");

    space.commit_edit(&ctx, "session edit", &[&file], || {
        std::fs::write(&file, "v1").unwrap();
    });
    std::fs::write(&file, "v2").unwrap();
    let change = ctx.external.observe(&file).unwrap();
    ctx.txn
        .record_external_change(
            &change.path,
            &change.previous_text,
            change.previous_hash,
            change.current_hash,
            "human edit",
        )
        .unwrap();

    let history = ctx.txn.file_history(&file).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, EntryKind::Transaction);
    assert_eq!(history[1].kind, EntryKind::External);
}
