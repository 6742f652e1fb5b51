//! kubed-core — shared building blocks for kubed-sh.
//!
//! - [`types`]: the process record and its runtime kind / status enums
//! - [`env`]: the session's environment variable table
//! - [`version`]: server version parsing and the API version table
//! - [`manifest`]: per-runtime manifest generation
//! - [`config`]: the optional `~/.kubed-sh.toml` file

pub mod config;
pub mod env;
pub mod manifest;
pub mod types;
pub mod version;

pub use config::KubedConfig;
pub use env::EnvTable;
pub use manifest::{LaunchSpec, Manifest, ManifestGenerator, TemplateError};
pub use types::*;
pub use version::{ApiVersionTable, ServerVersion, VersionParseError};
