// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; durations and bounds are
/// checked by [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file, apply `TRACEWATCH_*` overrides from the
/// process environment and validate.
///
/// This is the entry point used by the CLI.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    load_with_env(path, std::env::vars())
}

/// Like [`load_and_validate`], with the environment supplied explicitly.
///
/// A missing file is accepted only at [`default_config_path`], in which case
/// every setting takes its default (or its environment override). A missing
/// file anywhere else was asked for by name and is an error.
pub fn load_with_env<I, K, V>(path: impl AsRef<Path>, vars: I) -> Result<ConfigFile>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let path = path.as_ref();

    let mut raw = if path == default_config_path() && !path.exists() {
        debug!(path = %path.display(), "no config file; using defaults");
        RawConfigFile::default()
    } else {
        load_from_path(path)?
    };

    raw.apply_env(vars)?;
    ConfigFile::try_from(raw)
}

/// Default config location: `Tracewatch.toml` in the current directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Tracewatch.toml")
}
