use std::fs;
use std::path::PathBuf;

use serial_test::serial;
use tempfile::tempdir;
use vault_mover::{CONFIG_ENV_VAR, DigestAlgorithm, LogLevel, default_config_path, load_config};

struct EnvGuard;

impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe { std::env::remove_var(CONFIG_ENV_VAR) };
    }
}

#[test]
#[serial]
fn env_var_selects_the_config_file() {
    let td = tempdir().unwrap();
    let cfg_path = td.path().join("custom.xml");
    let vault = td.path().join("v");
    fs::write(
        &cfg_path,
        format!(
            "<config>\n  <vault_root>{}</vault_root>\n  <workers>2</workers>\n  \
             <digest_algorithm>blake3</digest_algorithm>\n  <log_level>debug</log_level>\n</config>",
            vault.display()
        ),
    )
    .unwrap();

    unsafe { std::env::set_var(CONFIG_ENV_VAR, &cfg_path) };
    let _g = EnvGuard;

    assert_eq!(default_config_path(), Some(cfg_path.clone()));
    let cfg = load_config().unwrap();
    assert_eq!(cfg.vault_root, vault);
    assert_eq!(cfg.workers, 2);
    assert_eq!(cfg.digest_algorithm, DigestAlgorithm::Blake3);
    assert_eq!(cfg.log_level, LogLevel::Debug);
}

#[test]
#[serial]
fn env_var_pointing_nowhere_is_an_error() {
    let td = tempdir().unwrap();
    let missing: PathBuf = td.path().join("absent.xml");
    unsafe { std::env::set_var(CONFIG_ENV_VAR, &missing) };
    let _g = EnvGuard;

    let err = load_config().unwrap_err();
    assert!(format!("{err:#}").contains("missing file"), "{err:#}");
}

#[test]
#[serial]
fn bad_value_names_the_file() {
    let td = tempdir().unwrap();
    let cfg_path = td.path().join("config.xml");
    fs::write(&cfg_path, "<config><digest_algorithm>md5</digest_algorithm></config>").unwrap();
    unsafe { std::env::set_var(CONFIG_ENV_VAR, &cfg_path) };
    let _g = EnvGuard;

    let err = format!("{:#}", load_config().unwrap_err());
    assert!(err.contains("config.xml"), "{err}");
    assert!(err.contains("md5"), "{err}");
}
