//! Daemon config loader (strict parsing).

pub mod schema;

use std::fs;

use gubernator_core::error::{GubernatorError, Result};

pub use schema::{BehaviorSection, CacheSection, Config, ServerSection};

pub fn load_from_file(path: &str) -> Result<Config> {
    let s = fs::read_to_string(path)
        .map_err(|e| GubernatorError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<Config> {
    let cfg: Config = serde_yaml::from_str(s)
        .map_err(|e| GubernatorError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
