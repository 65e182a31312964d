//! XML configuration support.
//! - Loads settings from config.xml (quick_xml).
//! - Creates a secure template if missing (unless VAULT_MOVER_CONFIG is set).
//!
//! Notes:
//! - This module only reads/writes the config file; directory validation happens elsewhere.
//! - Unknown XML fields are a hard error to surface misconfigurations early.

use anyhow::{bail, Context, Result};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::paths::{default_config_path, default_data_root, default_log_path, path_has_symlink_ancestor};
use super::types::{EngineConfig, LogLevel};
use super::{CAPACITY_MARGIN_DEFAULT, CONFIG_ENV_VAR};

use crate::integrity::DigestAlgorithm;
use crate::platform::{atomic_write, set_dir_mode_0700, set_file_mode_0600};

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    vault_root: Option<String>,
    quarantine_root: Option<String>,
    duplicates_root: Option<String>,
    store_path: Option<String>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    capacity_margin: Option<f64>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    workers: Option<usize>,
    digest_algorithm: Option<String>,
    preserve_metadata: Option<bool>,
    log_level: Option<String>,
    log_file: Option<String>,
}

// Custom deserializer that trims surrounding whitespace for optional numbers
fn de_trimmed_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

fn non_empty_path(s: Option<&str>) -> Option<PathBuf> {
    s.map(str::trim).filter(|t| !t.is_empty()).map(PathBuf::from)
}

// Map XmlConfig -> EngineConfig; roots left out of the file fall back to defaults.
fn xml_to_config(parsed: XmlConfig) -> Result<EngineConfig> {
    let mut cfg = EngineConfig::with_root(default_data_root());
    cfg.log_file = default_log_path();

    if let Some(p) = non_empty_path(parsed.vault_root.as_deref()) {
        cfg.vault_root = p;
    }
    if let Some(p) = non_empty_path(parsed.quarantine_root.as_deref()) {
        cfg.quarantine_root = p;
    }
    if let Some(p) = non_empty_path(parsed.duplicates_root.as_deref()) {
        cfg.duplicates_root = p;
    }
    if let Some(p) = non_empty_path(parsed.store_path.as_deref()) {
        cfg.store_path = p;
    }
    if let Some(p) = non_empty_path(parsed.log_file.as_deref()) {
        cfg.log_file = Some(p);
    }
    if let Some(m) = parsed.capacity_margin {
        cfg.capacity_margin = m;
    }
    if let Some(w) = parsed.workers {
        cfg.workers = w;
    }
    if let Some(s) = parsed.digest_algorithm.as_deref() {
        cfg.digest_algorithm = s.parse::<DigestAlgorithm>().map_err(anyhow::Error::msg)?;
    }
    if let Some(s) = parsed.log_level.as_deref() {
        cfg.log_level = s.trim().parse::<LogLevel>().map_err(anyhow::Error::msg)?;
    }
    cfg.preserve_metadata = parsed.preserve_metadata.unwrap_or(true);
    Ok(cfg)
}

/// Load an EngineConfig from a specific XML file path (quick_xml).
pub fn load_config_from_xml_path(path: &Path) -> Result<EngineConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config xml '{}'", path.display()))?;
    let parsed: XmlConfig =
        from_xml_str(&contents).with_context(|| format!("parse config xml '{}'", path.display()))?;
    xml_to_config(parsed).with_context(|| format!("invalid value in config xml '{}'", path.display()))
}

/// Resolve the effective configuration:
/// - `$VAULT_MOVER_CONFIG` must exist and parse when set;
/// - otherwise the platform default config.xml, if present;
/// - otherwise built-in defaults.
pub fn load_config() -> Result<EngineConfig> {
    let env_set = env::var_os(CONFIG_ENV_VAR).is_some();
    let Some(path) = default_config_path() else {
        debug!("no config path could be determined; using defaults");
        return Ok(EngineConfig::default());
    };
    if path.exists() {
        debug!(path = %path.display(), "loading config");
        return load_config_from_xml_path(&path);
    }
    if env_set {
        bail!("{CONFIG_ENV_VAR} points to a missing file: {}", path.display());
    }
    Ok(EngineConfig::default())
}

/// Create default template config file and parent directory (best-effort permissions).
/// Refuses symlinked ancestors and never overwrites an existing file.
pub fn create_template_config(path: &Path) -> Result<()> {
    if path_has_symlink_ancestor(path)? {
        bail!(
            "Refusing to create config: ancestor of {} is a symlink",
            path.display()
        );
    }
    if path.exists() {
        bail!("Config file already exists: {}", path.display());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        let _ = set_dir_mode_0700(parent);
    }

    let defaults = EngineConfig::with_root(default_data_root());
    let suggested_log = default_log_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "/path/to/vault_mover.log".into());

    let content = format!(
        "<!--\n  vault_mover configuration (XML)\n\n  Roots (must not contain one another):\n    vault_root         -> archive root; canonical files land here\n    quarantine_root    -> holding area, one folder per reason\n    duplicates_root    -> duplicates/<YYYY-MM-DD>/<digest prefix>/<name>\n    store_path         -> record store database (redb)\n\n  Tuning:\n    capacity_margin    -> extra free space required per batch (0.10 = 10%)\n    workers            -> maximum batch worker threads\n    digest_algorithm   -> sha256 | blake3\n    preserve_metadata  -> keep timestamps and permission bits (true/false)\n\n  Logging:\n    log_level          -> quiet | normal | info | debug\n    log_file           -> path to log file (optional)\n\n  CLI flags override XML values.\n-->\n<config>\n  <vault_root>{}</vault_root>\n  <quarantine_root>{}</quarantine_root>\n  <duplicates_root>{}</duplicates_root>\n  <store_path>{}</store_path>\n  <capacity_margin>{}</capacity_margin>\n  <workers>{}</workers>\n  <digest_algorithm>{}</digest_algorithm>\n  <preserve_metadata>true</preserve_metadata>\n  <log_level>normal</log_level>\n  <log_file>{}</log_file>\n</config>\n",
        defaults.vault_root.display(),
        defaults.quarantine_root.display(),
        defaults.duplicates_root.display(),
        defaults.store_path.display(),
        CAPACITY_MARGIN_DEFAULT,
        defaults.workers,
        defaults.digest_algorithm,
        suggested_log,
    );

    atomic_write(path, content.as_bytes())
        .with_context(|| format!("write template config '{}'", path.display()))?;
    let _ = set_file_mode_0600(path);

    info!("Created template config at {}", path.display());
    Ok(())
}

/// Create default config if VAULT_MOVER_CONFIG not set; return created path so CLI can inform the user.
pub fn ensure_default_config_exists() -> Option<PathBuf> {
    if env::var_os(CONFIG_ENV_VAR).is_some() {
        return None;
    }
    let cfg_path = default_config_path()?;
    if cfg_path.exists() {
        return None;
    }
    match create_template_config(&cfg_path) {
        Ok(()) => Some(cfg_path),
        Err(e) => {
            debug!(path = %cfg_path.display(), error = %e, "template config not created");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn template_round_trips_through_loader() {
        let td = tempdir().unwrap();
        let path = td.path().join("cfg").join("config.xml");
        create_template_config(&path).unwrap();
        let cfg = load_config_from_xml_path(&path).unwrap();
        assert!((cfg.capacity_margin - CAPACITY_MARGIN_DEFAULT).abs() < f64::EPSILON);
        assert!(cfg.preserve_metadata);
        assert!(create_template_config(&path).is_err(), "never overwrites");
    }

    #[test]
    fn unknown_field_is_an_error() {
        let td = tempdir().unwrap();
        let path = td.path().join("config.xml");
        fs::write(&path, "<config><vault_root>/v</vault_root><bogus>1</bogus></config>").unwrap();
        assert!(load_config_from_xml_path(&path).is_err());
    }

    #[test]
    fn values_are_trimmed_and_parsed() {
        let td = tempdir().unwrap();
        let path = td.path().join("config.xml");
        fs::write(
            &path,
            "<config>\n  <vault_root> /data/vault </vault_root>\n  <workers> 3 </workers>\n  \
             <capacity_margin>0.25</capacity_margin>\n  <digest_algorithm>blake3</digest_algorithm>\n</config>",
        )
        .unwrap();
        let cfg = load_config_from_xml_path(&path).unwrap();
        assert_eq!(cfg.vault_root, PathBuf::from("/data/vault"));
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.digest_algorithm, DigestAlgorithm::Blake3);
        assert!((cfg.capacity_margin - 0.25).abs() < f64::EPSILON);
    }
}
