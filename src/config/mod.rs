// src/config/mod.rs

//! Configuration loading and validation for tracewatch.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk and layer env overrides (`loader.rs`).
//! - Parse durations and check bounds (`validate.rs`, `duration.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path, load_with_env};
pub use model::{ConfigFile, RawConfigFile};
