//! Config module.
//! Provides configuration types, default paths, XML loading, and validation.

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{default_config_path, default_data_root, default_log_path, path_has_symlink_ancestor};
pub use types::{EngineConfig, LogLevel};
pub use xml::{
    create_template_config, ensure_default_config_exists, load_config, load_config_from_xml_path,
};

/// Environment variable naming an explicit config.xml.
pub const CONFIG_ENV_VAR: &str = "VAULT_MOVER_CONFIG";

/// Free-space headroom required on top of a batch's bytes (10%).
pub const CAPACITY_MARGIN_DEFAULT: f64 = 0.10;
