// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads the TOML config file, deserializes it into `ConfigStub`, and
//! validates it into the runtime `Config`.

use crate::config::model::{Config, ConfigError, ConfigStub};
use crate::queue_log;
use log::Level;
use std::{fs, path::Path};

/// Load, parse and validate the configuration at `path`.
/// Logs at DEBUG before reading and INFO on success.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    queue_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse(&txt)?;
    queue_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Parse and validate TOML text already in memory.
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let stub: ConfigStub = toml::from_str(txt)?;
    Config::try_from(stub)
}
