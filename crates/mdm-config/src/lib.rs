//! # mdm-config
//!
//! Host configuration describing the modems present on the platform and
//! the client libraries that drive them.
//!
//! The backend locator only consumes this crate through [`ConfigSource`],
//! so tests and embedders can supply configuration without touching disk.

pub mod error;
pub mod source;
pub mod topology;

pub use error::ConfigError;
pub use source::{load_config, ConfigSource, FileSource, StaticSource, Unavailable};
pub use topology::{LibraryEntry, ModemInfo, ModemType, PlatformConfig};

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "MDMCLI_CONFIG";

/// Configuration file used when [`CONFIG_ENV`] is not set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mdmcli/modems.toml";
