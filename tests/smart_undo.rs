//! Integration tests for the smart-undo engine: renamed, relocated, and
//! lost files.

mod common;

use common::TestSpace;
use nts::journal::{EntryStatus, Stack};
use nts::txn::restore::{FileOutcome, UndoOutcome};

#[test]
fn rename_then_external_delete_recreates_the_original_path() {
    let space = TestSpace::new();
    let ctx = space.session("smart-rename");
    let a = space.seed("a.txt", "AAA");
    let b = space.path("b.txt");

    // A rename performed through the tool surface.
    ctx.txn.begin("rename a.txt to b.txt", None);
    ctx.txn.backup(&a).unwrap();
    ctx.txn.backup(&b).unwrap();
    std::fs::rename(&a, &b).unwrap();
    ctx.lineage.record_move(&a, &b);
    ctx.tokens.move_tokens(&a, &b);
    ctx.txn.commit().unwrap();

    // The user deletes the renamed file externally.
    std::fs::remove_file(&b).unwrap();

    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::Success);
    assert_eq!(space.read("a.txt"), "AAA");
    assert!(!b.exists());
}

#[test]
fn a_moved_file_is_restored_at_its_current_location() {
    let space = TestSpace::new();
    let ctx = space.session("smart-moved");
    let a = space.seed("a.txt", "before");

    space.commit_edit(&ctx, "edit a", &[&a], || {
        std::fs::write(&a, "after").unwrap();
    });

    // The file moves to a new home; lineage hears about it.
    let c = space.path("moved/c.txt");
    std::fs::create_dir_all(c.parent().unwrap()).unwrap();
    std::fs::rename(&a, &c).unwrap();
    ctx.lineage.record_move(&a, &c);

    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::ResolvedMove);
    assert!(matches!(
        &report.files[0].outcome,
        FileOutcome::Relocated { to } if *to == c
    ));
    assert_eq!(space.read("moved/c.txt"), "before");
    assert!(!a.exists(), "nothing recreated at the stale path");
}

#[test]
fn a_silently_moved_file_is_found_by_content_hash() {
    let space = TestSpace::new();
    let ctx = space.session("smart-hash");
    let a = space.seed("a.txt", "v0");

    space.commit_edit(&ctx, "edit a", &[&a], || {
        std::fs::write(&a, "unique needle content").unwrap();
    });

    // Moved outside the session's knowledge: lineage still points at a.txt.
    let hidden = space.path("stash/hidden.txt");
    std::fs::create_dir_all(hidden.parent().unwrap()).unwrap();
    std::fs::rename(&a, &hidden).unwrap();

    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::ResolvedMove);
    assert_eq!(space.read("stash/hidden.txt"), "v0");
}

#[test]
fn an_untraceable_file_marks_the_entry_stuck_and_writes_nothing() {
    let space = TestSpace::new();
    let ctx = space.session("smart-stuck");
    let a = space.seed("a.txt", "v0");
    let b = space.seed("b.txt", "w0");

    space.commit_edit(&ctx, "edit both", &[&a, &b], || {
        std::fs::write(&a, "v1").unwrap();
        std::fs::write(&b, "w1").unwrap();
    });

    // Forget everything the session knew in memory, then lose one file.
    let id = nts::model::types::SessionId::new("smart-stuck").unwrap();
    space.registry.destroy(&id);
    let ctx = space.registry.reactivate(&id).unwrap();
    std::fs::remove_file(&a).unwrap();

    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::Stuck);
    assert!(
        report
            .files
            .iter()
            .any(|f| f.outcome == FileOutcome::NotFound)
    );
    // Plan aborted before any write: b.txt keeps its post-commit content.
    assert_eq!(space.read("b.txt"), "w1");

    let entries = ctx.txn.journal(Stack::Undo).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, EntryStatus::Stuck);
}

#[test]
fn stuck_in_a_git_work_tree_suggests_a_recovery_command() {
    let space = TestSpace::new();
    std::fs::create_dir_all(space.path(".git")).unwrap();
    let ctx = space.session("smart-git");
    let a = space.seed("a.txt", "v0");

    space.commit_edit(&ctx, "edit a", &[&a], || {
        std::fs::write(&a, "v1").unwrap();
    });
    let id = nts::model::types::SessionId::new("smart-git").unwrap();
    space.registry.destroy(&id);
    let ctx = space.registry.reactivate(&id).unwrap();
    std::fs::remove_file(&a).unwrap();

    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::GitFallback);
    let hint = report.recovery_hint.unwrap();
    assert!(hint.starts_with("git checkout --"), "{hint}");
    assert!(hint.contains("a.txt"));
}

#[test]
fn mixed_restores_report_a_merged_undo() {
    let space = TestSpace::new();
    let ctx = space.session("smart-merged");
    let stay = space.seed("stay.txt", "s0");
    let roam = space.seed("roam.txt", "r0");

    space.commit_edit(&ctx, "edit both", &[&stay, &roam], || {
        std::fs::write(&stay, "s1").unwrap();
        std::fs::write(&roam, "r1").unwrap();
    });

    let new_home = space.path("elsewhere.txt");
    std::fs::rename(&roam, &new_home).unwrap();
    ctx.lineage.record_move(&roam, &new_home);

    let report = ctx.txn.undo().unwrap();
    assert_eq!(report.outcome, UndoOutcome::MergedUndo);
    assert_eq!(space.read("stay.txt"), "s0");
    assert_eq!(space.read("elsewhere.txt"), "r0");
}
