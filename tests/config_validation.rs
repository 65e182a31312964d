use assert_fs::TempDir;
use std::fs;
use vault_mover::EngineConfig;

#[test]
fn equal_roots_are_rejected() {
    let td = TempDir::new().unwrap();
    let root = dunce::canonicalize(td.path()).unwrap();
    let mut cfg = EngineConfig::with_root(&root);
    cfg.duplicates_root = cfg.vault_root.clone();
    let err = cfg.validate().unwrap_err();
    assert!(format!("{err}").contains("resolve to the same"), "{err}");
}

#[test]
fn root_that_is_a_file_is_rejected() {
    let td = TempDir::new().unwrap();
    let root = dunce::canonicalize(td.path()).unwrap();
    let cfg = EngineConfig::with_root(&root);
    fs::write(&cfg.quarantine_root, b"not a dir").unwrap();
    let err = cfg.validate().unwrap_err();
    assert!(format!("{err}").contains("isn't a directory"), "{err}");
}

#[test]
fn zero_workers_is_rejected() {
    let td = TempDir::new().unwrap();
    let mut cfg = EngineConfig::with_root(td.path());
    cfg.workers = 0;
    assert!(cfg.validate().is_err());
}

#[cfg(unix)]
#[test]
fn symlinked_roots_resolving_to_one_place_are_rejected() {
    let td = TempDir::new().unwrap();
    let root = dunce::canonicalize(td.path()).unwrap();
    let mut cfg = EngineConfig::with_root(&root);
    fs::create_dir_all(&cfg.vault_root).unwrap();
    let alias = root.join("alias");
    std::os::unix::fs::symlink(&cfg.vault_root, &alias).unwrap();
    cfg.duplicates_root = alias.join("dups");
    let err = cfg.validate().unwrap_err();
    assert!(format!("{err}").contains("must not be inside"), "{err}");
}
