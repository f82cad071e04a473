use cling_core::entry::{EntryKind, RevisionEntry};
use cling_core::metadata::{FileMetadata, ModeAndPerm};
use cling_core::path::RepoPath;
use commit::{CommitBuilder, CommitError, CommitInfo, RevisionSnapshot, StagingBuilder};
use repository::{Repository, RepositoryError, RevisionId};
use std::path::Path;
use std::sync::Arc;
use storage::{CancelFlag, FileStorage};
use tempfile::TempDir;

const PASSPHRASE: &[u8] = b"correct horse battery staple";

fn setup() -> (TempDir, Repository<FileStorage>) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(Arc::new(FileStorage::new(dir.path().join("repo"))), PASSPHRASE)
        .unwrap();
    (dir, repo)
}

fn info() -> CommitInfo {
    CommitInfo { author: "tester".to_string(), message: "test commit".to_string() }
}

fn file_meta(mtime_sec: i64, size: u64) -> FileMetadata {
    FileMetadata {
        mode: ModeAndPerm::file(0o644),
        mtime_sec,
        mtime_nsec: 0,
        size,
        file_hash: cling_core::crypto::sha256(&size.to_le_bytes()),
        block_ids: vec![],
        symlink_target: String::new(),
        uid: u32::MAX,
        gid: u32::MAX,
        birthtime_sec: -1,
        birthtime_nsec: 0,
    }
}

fn dir_meta(mtime_sec: i64) -> FileMetadata {
    FileMetadata {
        mode: ModeAndPerm::dir(0o755),
        size: 0,
        file_hash: [0u8; 32],
        ..file_meta(mtime_sec, 0)
    }
}

fn path(s: &str) -> RepoPath {
    RepoPath::new(s).unwrap()
}

/// Stage `entries` against the current head and commit them.
fn commit_paths(
    repo: &Repository<FileStorage>,
    tmp: &Path,
    entries: &[(&str, FileMetadata)],
) -> Result<RevisionId, CommitError> {
    let base = repo.head().unwrap();
    let mut staging = StagingBuilder::new(base, &tmp.join("staging")).unwrap();
    for (p, meta) in entries {
        staging.add(path(p), meta.clone()).unwrap();
    }
    let staging = staging.finish().unwrap();
    let snapshot = RevisionSnapshot::build(repo, &base, &tmp.join("snapshot")).unwrap();
    let builder = CommitBuilder::new(repo, staging, &snapshot, &tmp.join("diff")).unwrap();
    builder.commit(&info(), &CancelFlag::new())
}

/// All entries of the revision at `id`, in stream order.
fn revision_entries(repo: &Repository<FileStorage>, id: &RevisionId) -> Vec<RevisionEntry> {
    let revision = repo.read_revision(id).unwrap();
    let mut reader = repo.revision_reader(&revision);
    let mut out = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        out.push(entry);
    }
    out
}

fn snapshot_paths(repo: &Repository<FileStorage>, tmp: &Path) -> Vec<String> {
    let head = repo.head().unwrap();
    let snapshot = RevisionSnapshot::build(repo, &head, &tmp.join("list")).unwrap();
    let mut reader = snapshot.reader();
    let mut out = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        out.push(entry.path.as_str().to_string());
    }
    std::fs::remove_dir_all(tmp.join("list")).unwrap();
    out
}

#[test]
fn first_commit_adds_everything() {
    let (dir, repo) = setup();
    let id = commit_paths(
        &repo,
        dir.path(),
        &[("b.txt", file_meta(10, 2)), ("a.txt", file_meta(10, 1))],
    )
    .unwrap();

    assert_eq!(repo.head().unwrap(), id);
    let entries = revision_entries(&repo, &id);
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.kind == EntryKind::Add));
    assert_eq!(entries[0].path.as_str(), "a.txt");
    assert_eq!(entries[1].path.as_str(), "b.txt");

    let revision = repo.read_revision(&id).unwrap();
    assert!(revision.parent.is_root());
    assert_eq!(revision.author, "tester");
}

#[test]
fn unchanged_staging_is_an_empty_commit() {
    let (dir, repo) = setup();
    let entries = [("a.txt", file_meta(10, 1))];
    commit_paths(&repo, &dir.path().join("one"), &entries).unwrap();

    let err = commit_paths(&repo, &dir.path().join("two"), &entries).unwrap_err();
    assert!(matches!(err, CommitError::EmptyCommit));
}

#[test]
fn changed_metadata_emits_update() {
    let (dir, repo) = setup();
    commit_paths(
        &repo,
        &dir.path().join("one"),
        &[("a.txt", file_meta(10, 1)), ("b.txt", file_meta(10, 2))],
    )
    .unwrap();

    // a.txt touched, b.txt unchanged.
    let id = commit_paths(
        &repo,
        &dir.path().join("two"),
        &[("a.txt", file_meta(99, 1)), ("b.txt", file_meta(10, 2))],
    )
    .unwrap();

    let entries = revision_entries(&repo, &id);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Update);
    assert_eq!(entries[0].path.as_str(), "a.txt");
    assert_eq!(entries[0].metadata.as_ref().unwrap().mtime_sec, 99);
}

#[test]
fn missing_paths_emit_bare_deletes() {
    let (dir, repo) = setup();
    commit_paths(
        &repo,
        &dir.path().join("one"),
        &[("a.txt", file_meta(10, 1)), ("b.txt", file_meta(10, 2))],
    )
    .unwrap();

    let id = commit_paths(&repo, &dir.path().join("two"), &[("a.txt", file_meta(10, 1))])
        .unwrap();

    let entries = revision_entries(&repo, &id);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Delete);
    assert_eq!(entries[0].path.as_str(), "b.txt");
    assert!(entries[0].metadata.is_none(), "deletes carry no metadata");

    assert_eq!(snapshot_paths(&repo, dir.path()), vec!["a.txt"]);
}

#[test]
fn empty_staging_deletes_the_tree() {
    let (dir, repo) = setup();
    commit_paths(
        &repo,
        &dir.path().join("one"),
        &[("d", dir_meta(5)), ("d/x.txt", file_meta(10, 1))],
    )
    .unwrap();

    let id = commit_paths(&repo, &dir.path().join("two"), &[]).unwrap();
    let entries = revision_entries(&repo, &id);
    // The directory's delete is keyed as a directory, before its
    // contents.
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].path.as_str(), "d");
    assert!(entries[0].is_dir());
    assert_eq!(entries[1].path.as_str(), "d/x.txt");
    assert!(entries.iter().all(|e| e.kind == EntryKind::Delete));

    assert!(snapshot_paths(&repo, dir.path()).is_empty());
}

#[test]
fn ensure_dir_exists_queues_ancestors() {
    let (dir, repo) = setup();
    let base = repo.head().unwrap();
    let mut staging = StagingBuilder::new(base, &dir.path().join("staging")).unwrap();
    staging.add(path("x/y/z.txt"), file_meta(10, 1)).unwrap();
    let staging = staging.finish().unwrap();
    let snapshot = RevisionSnapshot::build(&repo, &base, &dir.path().join("snapshot")).unwrap();

    let mut builder = CommitBuilder::new(&repo, staging, &snapshot, &dir.path().join("diff")).unwrap();
    builder.ensure_dir_exists(&path("x/y")).unwrap();
    let id = builder.commit(&info(), &CancelFlag::new()).unwrap();

    let entries = revision_entries(&repo, &id);
    let described: Vec<(String, bool)> =
        entries.iter().map(|e| (e.path.as_str().to_string(), e.is_dir())).collect();
    assert_eq!(
        described,
        vec![
            ("x".to_string(), true),
            ("x/y".to_string(), true),
            ("x/y/z.txt".to_string(), false)
        ]
    );
    let x = entries[0].metadata.as_ref().unwrap();
    assert_eq!(x.mode.perm(), 0o700);
    assert!(x.mode.is_dir());
}

#[test]
fn ensure_dir_exists_rejects_non_directory_ancestors() {
    let (dir, repo) = setup();
    commit_paths(&repo, &dir.path().join("one"), &[("x", file_meta(10, 1))]).unwrap();

    let base = repo.head().unwrap();
    let staging = StagingBuilder::new(base, &dir.path().join("staging")).unwrap().finish().unwrap();
    let snapshot = RevisionSnapshot::build(&repo, &base, &dir.path().join("snapshot")).unwrap();
    let mut builder =
        CommitBuilder::new(&repo, staging, &snapshot, &dir.path().join("diff")).unwrap();

    let err = builder.ensure_dir_exists(&path("x/y")).unwrap_err();
    assert!(matches!(err, CommitError::NotADirectory(p) if p.as_str() == "x"));
}

#[test]
fn ensure_dir_exists_skips_existing_directories() {
    let (dir, repo) = setup();
    commit_paths(&repo, &dir.path().join("one"), &[("x", dir_meta(5))]).unwrap();

    let base = repo.head().unwrap();
    let staging = StagingBuilder::new(base, &dir.path().join("staging")).unwrap().finish().unwrap();
    let snapshot = RevisionSnapshot::build(&repo, &base, &dir.path().join("snapshot")).unwrap();
    let mut builder =
        CommitBuilder::new(&repo, staging, &snapshot, &dir.path().join("diff")).unwrap();
    builder.ensure_dir_exists(&path("x")).unwrap();

    // Nothing was queued, and deleting x is not intended either: the
    // empty staging would delete it, so the queued-nothing outcome is
    // observable as a delete, not a duplicate dir add.
    let id = builder.commit(&info(), &CancelFlag::new()).unwrap();
    let entries = revision_entries(&repo, &id);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Delete);
}

#[test]
fn staged_directory_wins_over_queued_synthetic() {
    let (dir, repo) = setup();
    let base = repo.head().unwrap();
    let mut staging = StagingBuilder::new(base, &dir.path().join("staging")).unwrap();
    staging.add(path("x"), dir_meta(42)).unwrap();
    let staging = staging.finish().unwrap();
    let snapshot = RevisionSnapshot::build(&repo, &base, &dir.path().join("snapshot")).unwrap();
    let mut builder =
        CommitBuilder::new(&repo, staging, &snapshot, &dir.path().join("diff")).unwrap();
    builder.ensure_dir_exists(&path("x")).unwrap();

    let id = builder.commit(&info(), &CancelFlag::new()).unwrap();
    let entries = revision_entries(&repo, &id);
    assert_eq!(entries.len(), 1);
    // The scanned metadata survived, not the synthetic 0o700 one.
    assert_eq!(entries[0].metadata.as_ref().unwrap().mtime_sec, 42);
    assert_eq!(entries[0].metadata.as_ref().unwrap().mode.perm(), 0o755);
}

#[test]
fn stale_snapshot_fails_with_head_changed() {
    let (dir, repo) = setup();
    let base = repo.head().unwrap();

    // Capture staging and snapshot against the root...
    let mut staging = StagingBuilder::new(base, &dir.path().join("staging")).unwrap();
    staging.add(path("a.txt"), file_meta(10, 1)).unwrap();
    let staging = staging.finish().unwrap();
    let snapshot = RevisionSnapshot::build(&repo, &base, &dir.path().join("snapshot")).unwrap();

    // ...then someone else commits first.
    commit_paths(&repo, &dir.path().join("other"), &[("b.txt", file_meta(10, 2))]).unwrap();

    let builder =
        CommitBuilder::new(&repo, staging, &snapshot, &dir.path().join("diff")).unwrap();
    let err = builder.commit(&info(), &CancelFlag::new()).unwrap_err();
    assert!(matches!(
        err,
        CommitError::Repository(RepositoryError::HeadChanged { .. })
    ));
}

#[test]
fn staging_against_wrong_snapshot_is_rejected() {
    let (dir, repo) = setup();
    let rev1 =
        commit_paths(&repo, &dir.path().join("one"), &[("a.txt", file_meta(10, 1))]).unwrap();

    // Staging captured against rev1, snapshot built for the root.
    let mut staging = StagingBuilder::new(rev1, &dir.path().join("staging")).unwrap();
    staging.add(path("b.txt"), file_meta(10, 2)).unwrap();
    let staging = staging.finish().unwrap();
    let snapshot =
        RevisionSnapshot::build(&repo, &RevisionId::ROOT, &dir.path().join("snapshot")).unwrap();

    let builder =
        CommitBuilder::new(&repo, staging, &snapshot, &dir.path().join("diff")).unwrap();
    let err = builder.commit(&info(), &CancelFlag::new()).unwrap_err();
    assert!(matches!(err, CommitError::SnapshotMismatch { .. }));
}

#[test]
fn dir_to_file_mutation_is_delete_plus_add() {
    let (dir, repo) = setup();
    commit_paths(
        &repo,
        &dir.path().join("one"),
        &[("x", dir_meta(5)), ("x/a.txt", file_meta(10, 1))],
    )
    .unwrap();

    // The directory becomes a plain file.
    let id = commit_paths(&repo, &dir.path().join("two"), &[("x", file_meta(20, 3))]).unwrap();

    let entries = revision_entries(&repo, &id);
    let described: Vec<(String, EntryKind, bool)> = entries
        .iter()
        .map(|e| (e.path.as_str().to_string(), e.kind, e.is_dir()))
        .collect();
    assert_eq!(
        described,
        vec![
            ("x".to_string(), EntryKind::Add, false),
            ("x".to_string(), EntryKind::Delete, true),
            ("x/a.txt".to_string(), EntryKind::Delete, false),
        ]
    );

    assert_eq!(snapshot_paths(&repo, dir.path()), vec!["x"]);
}
