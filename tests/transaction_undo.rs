//! Integration tests for transactional undo and redo.

mod common;

use common::TestSpace;
use nts::journal::Stack;
use nts::txn::restore::UndoOutcome;

#[test]
fn undo_of_a_created_file_deletes_it_and_prunes_parents() {
    let space = TestSpace::new();
    let ctx = space.session("undo-create");
    let created = space.path("sub/dir/new.txt");

    ctx.txn.begin("create new.txt", None);
    ctx.txn.backup(&created).unwrap();
    ctx.txn.mark_created(&created);
    std::fs::create_dir_all(created.parent().unwrap()).unwrap();
    std::fs::write(&created, "hello").unwrap();
    ctx.txn.commit().unwrap();

    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::Success);
    assert!(!created.exists());
    assert!(!space.path("sub").exists(), "empty parents pruned to the root");

    let redo = ctx.txn.redo().unwrap();
    assert_eq!(redo.outcome, UndoOutcome::Success);
    assert_eq!(space.read("sub/dir/new.txt"), "hello");
}

#[test]
fn undo_restores_the_bytes_observed_at_first_backup() {
    let space = TestSpace::new();
    let ctx = space.session("undo-edit");
    let file = space.seed("a.txt", "original\n");

    space.commit_edit(&ctx, "rewrite a.txt", &[&file], || {
        std::fs::write(&file, "edited\n").unwrap();
    });
    assert_eq!(space.read("a.txt"), "edited\n");

    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::Success);
    assert_eq!(space.read("a.txt"), "original\n");
}

#[test]
fn undo_then_redo_is_an_identity_on_file_state() {
    let space = TestSpace::new();
    let ctx = space.session("undo-redo");
    let a = space.seed("a.txt", "a0");
    let b = space.seed("b.txt", "b0");

    space.commit_edit(&ctx, "touch both", &[&a, &b], || {
        std::fs::write(&a, "a1").unwrap();
        std::fs::write(&b, "b1").unwrap();
    });

    ctx.txn.undo().unwrap();
    assert_eq!((space.read("a.txt"), space.read("b.txt")), ("a0".into(), "b0".into()));
    ctx.txn.redo().unwrap();
    assert_eq!((space.read("a.txt"), space.read("b.txt")), ("a1".into(), "b1".into()));
}

#[test]
fn consecutive_undos_invert_independent_transactions_in_reverse_order() {
    let space = TestSpace::new();
    let ctx = space.session("undo-stacked");
    let a = space.seed("a.txt", "a0");
    let b = space.seed("b.txt", "b0");

    space.commit_edit(&ctx, "edit a", &[&a], || {
        std::fs::write(&a, "a1").unwrap();
    });
    space.commit_edit(&ctx, "edit b", &[&b], || {
        std::fs::write(&b, "b1").unwrap();
    });

    let first = ctx.txn.undo().unwrap();
    assert_eq!(first.description.as_deref(), Some("edit b"));
    assert_eq!(space.read("b.txt"), "b0");
    assert_eq!(space.read("a.txt"), "a1", "older transaction untouched");

    let second = ctx.txn.undo().unwrap();
    assert_eq!(second.description.as_deref(), Some("edit a"));
    assert_eq!(space.read("a.txt"), "a0");
}

#[test]
fn a_transaction_deleting_a_file_round_trips_through_undo_and_redo() {
    let space = TestSpace::new();
    let ctx = space.session("undo-delete");
    let doomed = space.seed("doomed.txt", "contents\n");

    space.commit_edit(&ctx, "delete doomed.txt", &[&doomed], || {
        std::fs::remove_file(&doomed).unwrap();
    });
    assert!(!doomed.exists());

    ctx.txn.undo().unwrap();
    assert_eq!(space.read("doomed.txt"), "contents\n");

    ctx.txn.redo().unwrap();
    assert!(!doomed.exists());
}

#[test]
fn unrelated_changes_after_commit_leave_the_file_alone() {
    let space = TestSpace::new();
    let ctx = space.session("undo-dirty");
    let file = space.seed("a.txt", "v0");

    space.commit_edit(&ctx, "edit a", &[&file], || {
        std::fs::write(&file, "v1").unwrap();
    });
    // A human edits the file afterwards, without the session noticing.
    std::fs::write(&file, "human work, do not clobber").unwrap();

    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::Partial);
    assert_eq!(space.read("a.txt"), "human work, do not clobber");
}

#[test]
fn diff_stats_record_line_counts_per_file() {
    let space = TestSpace::new();
    let ctx = space.session("undo-diffs");
    let file = space.seed("f.txt", "one\ntwo\nthree\n");

    space.commit_edit(&ctx, "trim f.txt", &[&file], || {
        std::fs::write(&file, "one\nthree\nfour\n").unwrap();
    });

    let entry = &ctx.txn.journal(Stack::Undo).unwrap()[0];
    let diffs = ctx.txn.store().diff_stats(entry.id).unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].stat.lines_added, 1);
    assert_eq!(diffs[0].stat.lines_deleted, 1);
    assert!(diffs[0].stat.unified_diff.as_deref().unwrap().contains("-two"));
}

#[test]
fn journal_truncation_drops_the_oldest_transactions() {
    let space = TestSpace::new();
    space.registry.set_limits(nts::txn::TxnLimits {
        journal_cap: 3,
        deep_search_max_files: 100,
    });
    let ctx = space.session("undo-cap");
    let file = space.seed("a.txt", "v0");

    for i in 1..=5 {
        space.commit_edit(&ctx, &format!("edit {i}"), &[&file], || {
            std::fs::write(&file, format!("v{i}")).unwrap();
        });
    }
    let entries = ctx.txn.journal(Stack::Undo).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].description.as_deref(), Some("edit 3"));
    assert_eq!(ctx.txn.total_edits().unwrap(), 5);
}
