//! End-to-end tests for the create/update/archive protocol, with stub
//! collaborators standing in for the external sync and duplicate systems.

use lorebase_store::{
    AtomicMutator, DigestDuplicateChecker, DocumentKind, DocumentStore, DuplicateChecker,
    DuplicateVerdict, MutationError, MutationOptions, Operation, SyncProbe, SyncStatus,
};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};
use walkdir::WalkDir;

// ============================================================================
// Stub collaborators
// ============================================================================

/// Probe whose backend never reaches consistency.
struct NeverConsistent;

impl SyncProbe for NeverConsistent {
    fn verify(&self, _path: &Path) -> SyncStatus {
        SyncStatus::Inconsistent
    }

    fn repair(&self) -> bool {
        false
    }
}

/// Probe that reports consistent from the nth `verify` call onward.
struct ConsistentAfter {
    calls: AtomicU32,
    threshold: u32,
}

impl ConsistentAfter {
    fn new(threshold: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            threshold,
        }
    }
}

impl SyncProbe for ConsistentAfter {
    fn verify(&self, _path: &Path) -> SyncStatus {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.threshold {
            SyncStatus::Consistent
        } else {
            SyncStatus::Inconsistent
        }
    }

    fn repair(&self) -> bool {
        true
    }
}

/// Checker that calls everything a copy of one canonical document.
struct AlwaysDuplicate {
    conflict: PathBuf,
}

impl DuplicateChecker for AlwaysDuplicate {
    fn check(&self, _content: &str, _kind: DocumentKind, exclude: Option<&Path>) -> DuplicateVerdict {
        if exclude == Some(self.conflict.as_path()) {
            return DuplicateVerdict::Unique;
        }
        DuplicateVerdict::Duplicate {
            conflicting_path: self.conflict.clone(),
            explanation: "stub match".to_string(),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn corpus() -> (TempDir, Arc<RwLock<DocumentStore>>) {
    let dir = tempdir().unwrap();
    let store = Arc::new(RwLock::new(DocumentStore::open(
        dir.path().join("registry.json"),
    )));
    (dir, store)
}

fn quick_options() -> MutationOptions {
    MutationOptions {
        postcheck_attempts: 3,
        postcheck_interval: Duration::from_millis(2),
        deadline: None,
    }
}

fn assert_no_backups(root: &Path) {
    for entry in WalkDir::new(root) {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().to_string();
        assert!(
            !name.ends_with(".bak"),
            "backup left behind: {}",
            entry.path().display()
        );
    }
}

// ============================================================================
// Create
// ============================================================================

#[test]
fn create_writes_classifies_and_indexes() {
    let (dir, store) = corpus();
    let mutator = AtomicMutator::new(store.clone(), dir.path().join("archive"));

    let path = dir.path().join("todo").join("migrate.md");
    let receipt = mutator
        .create(&path, "# Migration\n\n- [ ] switch dns records\n", DocumentKind::Task)
        .unwrap();

    assert_eq!(receipt.operation, Operation::Create);
    assert_eq!(receipt.path, path);
    assert!(receipt.warnings.is_empty());
    assert!(path.exists());

    let store = store.read();
    let doc = store.get_document(&path).unwrap();
    assert_eq!(doc.kind, DocumentKind::Task);
    assert_eq!(store.search("dns", None, 10).len(), 1);
    drop(store);
    assert_no_backups(dir.path());
}

#[test]
fn create_rejects_existing_path() {
    let (dir, store) = corpus();
    let mutator = AtomicMutator::new(store, dir.path().join("archive"));

    let path = dir.path().join("todo").join("taken.md");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "original").unwrap();

    let err = mutator
        .create(&path, "replacement", DocumentKind::Task)
        .unwrap_err();
    assert!(matches!(err, MutationError::AlreadyExists { .. }));
    assert_eq!(fs::read_to_string(&path).unwrap(), "original");
}

#[test]
fn create_rejects_duplicate_content() {
    let (dir, store) = corpus();
    let existing = dir.path().join("todo").join("first.md");
    fs::create_dir_all(existing.parent().unwrap()).unwrap();
    fs::write(&existing, "shared body").unwrap();
    store.write().index_file(&existing, false).unwrap();

    let mutator = AtomicMutator::new(store.clone(), dir.path().join("archive"))
        .with_duplicate_checker(Arc::new(DigestDuplicateChecker::new(store)));

    let fresh = dir.path().join("todo").join("second.md");
    let err = mutator
        .create(&fresh, "shared body", DocumentKind::Task)
        .unwrap_err();
    match err {
        MutationError::DuplicateContent {
            conflicting_path, ..
        } => assert_eq!(conflicting_path, existing),
        other => panic!("expected DuplicateContent, got {other}"),
    }
    assert!(!fresh.exists());
}

#[test]
fn create_reports_unconfirmed_sync_as_warning() {
    let (dir, store) = corpus();
    let mutator = AtomicMutator::new(store, dir.path().join("archive"))
        .with_sync_probe(Arc::new(NeverConsistent))
        .with_options(quick_options());

    let path = dir.path().join("todo").join("soft.md");
    let receipt = mutator
        .create(&path, "- [ ] follow up", DocumentKind::Task)
        .unwrap();

    // The write itself succeeded; only the confirmation is missing.
    assert!(path.exists());
    assert!(receipt
        .warnings
        .iter()
        .any(|w| w.contains("unconfirmed")));
}

// ============================================================================
// Update
// ============================================================================

#[test]
fn update_replaces_content_and_removes_backup() {
    let (dir, store) = corpus();
    let path = dir.path().join("todo").join("plan.md");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "- [ ] old quorum item\n").unwrap();
    store.write().index_file(&path, false).unwrap();

    let mutator = AtomicMutator::new(store.clone(), dir.path().join("archive"));
    let receipt = mutator
        .update(&path, "- [ ] new budget item\n", DocumentKind::Task)
        .unwrap();

    assert_eq!(receipt.operation, Operation::Update);
    assert_eq!(fs::read_to_string(&path).unwrap(), "- [ ] new budget item\n");
    assert_no_backups(dir.path());

    let store = store.read();
    assert!(store.search("quorum", None, 10).is_empty());
    assert_eq!(store.search("budget", None, 10).len(), 1);
}

#[test]
fn update_unknown_path_is_not_found() {
    let (dir, store) = corpus();
    let mutator = AtomicMutator::new(store, dir.path().join("archive"));
    let err = mutator
        .update(&dir.path().join("absent.md"), "text", DocumentKind::Task)
        .unwrap_err();
    assert!(matches!(err, MutationError::NotFound { .. }));
}

#[test]
fn update_rolls_back_when_postcheck_fails() {
    let (dir, store) = corpus();
    let path = dir.path().join("todo").join("critical.md");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let original = "- [ ] the one true list\n";
    fs::write(&path, original).unwrap();
    store.write().index_file(&path, false).unwrap();

    let mutator = AtomicMutator::new(store, dir.path().join("archive"))
        .with_sync_probe(Arc::new(NeverConsistent))
        .with_options(quick_options());

    let err = mutator
        .update(&path, "- [ ] replacement\n", DocumentKind::Task)
        .unwrap_err();
    assert!(matches!(err, MutationError::ConsistencyUnconfirmed { .. }));

    // Byte-for-byte the pre-update content, and the backup is gone (it was
    // renamed back over the target).
    assert_eq!(fs::read_to_string(&path).unwrap(), original);
    assert_no_backups(dir.path());
}

#[test]
fn update_self_content_is_not_a_duplicate() {
    let (dir, store) = corpus();
    let path = dir.path().join("todo").join("same.md");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "unchanged body").unwrap();
    store.write().index_file(&path, false).unwrap();

    let mutator = AtomicMutator::new(store.clone(), dir.path().join("archive"))
        .with_duplicate_checker(Arc::new(DigestDuplicateChecker::new(store)));

    // Identical to the target itself: self-comparison must not block.
    mutator
        .update(&path, "unchanged body", DocumentKind::Task)
        .unwrap();
}

#[test]
fn update_rejects_content_duplicated_elsewhere() {
    let (dir, store) = corpus();
    let canonical = dir.path().join("todo").join("canonical.md");
    fs::create_dir_all(canonical.parent().unwrap()).unwrap();
    fs::write(&canonical, "canonical body").unwrap();
    store.write().index_file(&canonical, false).unwrap();

    let target = dir.path().join("todo").join("todo-a.md");
    let original = "separate body";
    fs::write(&target, original).unwrap();
    store.write().index_file(&target, false).unwrap();

    let mutator = AtomicMutator::new(store.clone(), dir.path().join("archive"))
        .with_duplicate_checker(Arc::new(DigestDuplicateChecker::new(store)));

    let err = mutator
        .update(&target, "canonical body", DocumentKind::Task)
        .unwrap_err();
    assert!(matches!(err, MutationError::DuplicateContent { .. }));
    assert_eq!(fs::read_to_string(&target).unwrap(), original);
}

#[test]
fn update_survives_probe_that_recovers() {
    let (dir, store) = corpus();
    let path = dir.path().join("todo").join("flaky.md");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "before").unwrap();

    // Verify is called once by the pre-check; the third post-check attempt
    // sees consistency.
    let mutator = AtomicMutator::new(store, dir.path().join("archive"))
        .with_sync_probe(Arc::new(ConsistentAfter::new(4)))
        .with_options(quick_options());

    mutator.update(&path, "after", DocumentKind::Task).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "after");
    assert_no_backups(dir.path());
}

#[test]
fn postcheck_deadline_caps_the_wait() {
    let (dir, store) = corpus();
    let path = dir.path().join("todo").join("slow.md");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "before").unwrap();

    // 200 × 50ms would be ten seconds; the deadline cancels long before.
    let mutator = AtomicMutator::new(store, dir.path().join("archive"))
        .with_sync_probe(Arc::new(NeverConsistent))
        .with_options(MutationOptions {
            postcheck_attempts: 200,
            postcheck_interval: Duration::from_millis(50),
            deadline: Some(Duration::from_millis(100)),
        });

    let started = Instant::now();
    let err = mutator
        .update(&path, "after", DocumentKind::Task)
        .unwrap_err();
    assert!(matches!(err, MutationError::ConsistencyUnconfirmed { .. }));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(fs::read_to_string(&path).unwrap(), "before");
}

// ============================================================================
// Archive
// ============================================================================

#[test]
fn archive_moves_under_kind_partition() {
    let (dir, store) = corpus();
    let path = dir.path().join("todo").join("done.md");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "- [x] shipped\n").unwrap();
    store.write().index_file(&path, false).unwrap();
    store
        .write()
        .registry_mut()
        .register("task:done".parse().unwrap(), &path)
        .unwrap();

    let mutator = AtomicMutator::new(store.clone(), dir.path().join("archive"));
    let receipt = mutator.archive(&path, DocumentKind::Task).unwrap();

    let expected = dir.path().join("archive").join("tasks").join("done.md");
    assert_eq!(receipt.path, expected);
    assert!(!path.exists());
    assert!(expected.exists());

    let store = store.read();
    assert!(store.get_document(&path).is_none());
    let archived = store.get_document(&expected).unwrap();
    assert_eq!(archived.kind, DocumentKind::ArchivedTask);
    assert_eq!(
        store.registry().resolve(&"task:done".parse().unwrap()),
        Some(expected.as_path())
    );
    drop(store);
    assert_no_backups(dir.path());
}

#[test]
fn archive_collision_keeps_both_files() {
    let (dir, store) = corpus();
    let first = dir.path().join("incidents").join("outage.md");
    let second = dir.path().join("todo").join("outage.md");
    fs::create_dir_all(first.parent().unwrap()).unwrap();
    fs::create_dir_all(second.parent().unwrap()).unwrap();
    fs::write(&first, "first outage\n").unwrap();
    fs::write(&second, "second outage\n").unwrap();

    let mutator = AtomicMutator::new(store, dir.path().join("archive"));
    let a = mutator.archive(&first, DocumentKind::Incident).unwrap();
    let b = mutator.archive(&second, DocumentKind::Incident).unwrap();

    assert_ne!(a.path, b.path);
    assert!(a.path.exists());
    assert!(b.path.exists());
    assert_eq!(fs::read_to_string(&a.path).unwrap(), "first outage\n");
    assert_eq!(fs::read_to_string(&b.path).unwrap(), "second outage\n");

    // The disambiguated name keeps the stem and extension.
    let name = b.path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("outage-") && name.ends_with(".md"));
}

#[test]
fn archive_missing_is_not_found() {
    let (dir, store) = corpus();
    let mutator = AtomicMutator::new(store, dir.path().join("archive"));
    let err = mutator
        .archive(&dir.path().join("ghost.md"), DocumentKind::Task)
        .unwrap_err();
    assert!(matches!(err, MutationError::NotFound { .. }));
}

#[test]
fn archive_with_failing_probe_still_moves() {
    let (dir, store) = corpus();
    let path = dir.path().join("incidents").join("old.md");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "postmortem text\n").unwrap();

    let mutator = AtomicMutator::new(store, dir.path().join("archive"))
        .with_sync_probe(Arc::new(NeverConsistent))
        .with_options(quick_options());

    // The move is logically complete once the rename lands; the missing
    // confirmation is only a warning.
    let receipt = mutator.archive(&path, DocumentKind::Incident).unwrap();
    assert!(!path.exists());
    assert!(receipt.path.exists());
    assert!(receipt.warnings.iter().any(|w| w.contains("unconfirmed")));
}

// ============================================================================
// Cross-cutting
// ============================================================================

#[test]
fn no_backups_survive_a_full_lifecycle() {
    let (dir, store) = corpus();
    let mutator = AtomicMutator::new(store, dir.path().join("archive"));

    let path = dir.path().join("todo").join("lifecycle.md");
    mutator
        .create(&path, "- [ ] born\n", DocumentKind::Task)
        .unwrap();
    mutator
        .update(&path, "- [x] lived\n", DocumentKind::Task)
        .unwrap();
    mutator.archive(&path, DocumentKind::Task).unwrap();

    assert_no_backups(dir.path());
}

#[test]
fn stub_duplicate_checker_blocks_update_but_not_self() {
    let (dir, store) = corpus();
    let canonical = dir.path().join("todo").join("canon.md");
    fs::create_dir_all(canonical.parent().unwrap()).unwrap();
    fs::write(&canonical, "canon").unwrap();

    let mutator = AtomicMutator::new(store, dir.path().join("archive"))
        .with_duplicate_checker(Arc::new(AlwaysDuplicate {
            conflict: canonical.clone(),
        }));

    // Updating the canonical document itself is self-comparison.
    mutator
        .update(&canonical, "canon v2", DocumentKind::Task)
        .unwrap();

    // Any other write trips the stub.
    let other = dir.path().join("todo").join("other.md");
    let err = mutator
        .create(&other, "anything", DocumentKind::Task)
        .unwrap_err();
    assert!(matches!(err, MutationError::DuplicateContent { .. }));
}
