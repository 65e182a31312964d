mod common;

use filetime::FileTime;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

use vault_mover::{
    DigestAlgorithm, Digester, IntegrityVerifier, OutcomeStatus, RecordStore, RelocationEngine, RelocationStatus,
    RedbStore,
};

#[test]
fn new_content_lands_verified_and_source_is_gone() {
    let td = tempdir().unwrap();
    let engine = common::engine(td.path());
    let dest = engine.config().vault_root.join("2024/03/IMG_0001.jpg");
    let req = common::request(td.path(), "IMG_0001.jpg", b"jpeg bytes", &dest);

    let out = engine.relocate_one(&req);

    assert_eq!(out.status, OutcomeStatus::Completed, "{:?}", out.error);
    assert!(!req.source_path.exists());
    let landed = IntegrityVerifier::new(DigestAlgorithm::Sha256).digest(&dest).unwrap();
    assert_eq!(landed, req.content_digest);
    assert_eq!(out.final_path.as_deref(), Some(dest.as_path()));
    assert_eq!(engine.registry().lookup(&req.content_digest), Some(dest.clone()));

    let rec = engine.store().relocation(req.id).unwrap().unwrap();
    assert_eq!(rec.status, RelocationStatus::Completed);
    assert!(rec.completed_at.unwrap() >= rec.started_at.unwrap());
    let seen: Vec<_> = rec.transitions.iter().map(|t| t.status).collect();
    assert_eq!(
        seen,
        vec![
            RelocationStatus::Pending,
            RelocationStatus::InProgress,
            RelocationStatus::Verifying,
            RelocationStatus::Completed
        ]
    );
}

#[test]
fn modification_time_is_preserved() {
    let td = tempdir().unwrap();
    let engine = common::engine(td.path());
    let dest = engine.config().vault_root.join("old.txt");
    let req = common::request(td.path(), "old.txt", b"from 2001", &dest);
    let stamp = FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&req.source_path, stamp).unwrap();

    assert_eq!(engine.relocate_one(&req).status, OutcomeStatus::Completed);
    let meta = fs::metadata(&dest).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&meta), stamp);
}

#[test]
fn records_survive_reopening_the_store() {
    let td = tempdir().unwrap();
    let store_path = td.path().join("state/records.redb");
    let req = {
        let store = Arc::new(RedbStore::open(&store_path).unwrap());
        let engine = common::builder(td.path()).store(store).build().unwrap();
        let dest = engine.config().vault_root.join("keep.bin");
        let req = common::request(td.path(), "keep.bin", b"persist me", &dest);
        assert_eq!(engine.relocate_one(&req).status, OutcomeStatus::Completed);
        req
    };

    let reopened = Arc::new(RedbStore::open(&store_path).unwrap());
    assert_eq!(
        reopened.relocation(req.id).unwrap().unwrap().status,
        RelocationStatus::Completed
    );
    let engine = RelocationEngine::builder(vault_mover::EngineConfig::with_root(td.path().join("data")))
        .store(reopened)
        .build()
        .unwrap();
    assert!(engine.registry().lookup(&req.content_digest).is_some());
}
