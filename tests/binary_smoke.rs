use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::tempdir;
use vault_mover::DigestAlgorithm;

#[test]
fn binary_print_config_succeeds() {
    let td = tempdir().unwrap();
    let out = Command::new(assert_cmd::cargo::cargo_bin!("vault_mover"))
        .env("VAULT_MOVER_CONFIG", td.path().join("config.xml"))
        .arg("--print-config")
        .output()
        .expect("spawn binary");
    assert!(out.status.success(), "binary should succeed with --print-config");
    assert!(String::from_utf8_lossy(&out.stdout).contains("config.xml"));
}

/// Config with every root and the log file inside `base`.
fn write_config(base: &Path) -> PathBuf {
    let cfg = base.join("config.xml");
    let xml = format!(
        r#"<config>
  <vault_root>{}</vault_root>
  <quarantine_root>{}</quarantine_root>
  <duplicates_root>{}</duplicates_root>
  <store_path>{}</store_path>
  <log_level>quiet</log_level>
  <log_file>{}</log_file>
</config>"#,
        base.join("vault").display(),
        base.join("quarantine").display(),
        base.join("duplicates").display(),
        base.join("records.redb").display(),
        base.join("logs").join("vault_mover.log").display(),
    );
    fs::write(&cfg, xml).unwrap();
    cfg
}

fn run(base: &Path, cfg: &Path, args: &[&str]) -> Output {
    let out = Command::new(assert_cmd::cargo::cargo_bin!("vault_mover"))
        .env("HOME", base)
        .env("XDG_DATA_HOME", base.join("xdg-data"))
        .env("XDG_CONFIG_HOME", base.join("xdg-config"))
        .arg("--config")
        .arg(cfg)
        .args(args)
        .output()
        .expect("spawn binary");
    eprintln!("=== STDOUT ===\n{}", String::from_utf8_lossy(&out.stdout));
    eprintln!("=== STDERR ===\n{}", String::from_utf8_lossy(&out.stderr));
    out
}

#[test]
fn digest_prints_the_sha256() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let cfg = write_config(&base);
    let file = base.join("hello.txt");
    fs::write(&file, b"hello").unwrap();

    let out = run(&base, &cfg, &["digest", file.to_str().unwrap()]);
    assert!(out.status.success());
    let expected = DigestAlgorithm::Sha256.digest_bytes(b"hello");
    assert!(String::from_utf8_lossy(&out.stdout).contains(&expected));
}

#[test]
fn relocate_manifest_moves_the_file_and_quarantine_lists() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let cfg = write_config(&base);

    let src = base.join("incoming").join("report.pdf");
    fs::create_dir_all(src.parent().unwrap()).unwrap();
    fs::write(&src, b"quarterly numbers").unwrap();
    let dest = base.join("vault").join("2026").join("report.pdf");

    let manifest = base.join("manifest.json");
    let body = serde_json::json!([{
        "source_path": src,
        "destination_path": dest,
        "content_digest": DigestAlgorithm::Sha256.digest_bytes(b"quarterly numbers"),
        "size_bytes": 17,
    }]);
    fs::write(&manifest, serde_json::to_vec_pretty(&body).unwrap()).unwrap();

    let out = run(&base, &cfg, &["relocate", manifest.to_str().unwrap()]);
    assert!(out.status.success(), "relocate should exit 0");
    assert!(!src.exists());
    assert_eq!(fs::read(&dest).unwrap(), b"quarterly numbers");
    assert!(base.join("records.redb").exists());

    let out = run(&base, &cfg, &["quarantine"]);
    assert!(out.status.success());
}

#[test]
fn empty_manifest_is_rejected() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let cfg = write_config(&base);
    let manifest = base.join("manifest.json");
    fs::write(&manifest, "[]").unwrap();

    let out = run(&base, &cfg, &["relocate", manifest.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("holds no requests"));
}
