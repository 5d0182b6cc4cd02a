//! Modem topology schema.
//!
//! ```toml
//! modem_type = "xmm"
//!
//! [[modems]]
//! name = "modem0"
//! libs = [
//!     { name = "mdmcli", filename = "libmdmcli_xmm.so" },
//!     { name = "mdmcli", filename = "/vendor/lib/libmdmcli_override.so" },
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level host configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Shape of the per-modem records.
    #[serde(default)]
    pub modem_type: ModemType,

    /// One entry per modem instance, instance 1 first.
    #[serde(default)]
    pub modems: Vec<ModemInfo>,
}

/// Known per-modem record shapes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModemType {
    Xmm,
    Sofia,
    /// Anything this client does not know how to read.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ModemType {
    /// Whether per-modem records of this shape can be read.
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Configuration of one modem instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemInfo {
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Named libraries, in configuration layering order.
    #[serde(default)]
    pub libs: Vec<LibraryEntry>,
}

/// A named shared library.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    /// Role tag of the library.
    pub name: String,

    /// File name or path handed to the dynamic loader.
    pub filename: PathBuf,
}

impl LibraryEntry {
    pub fn new(name: impl Into<String>, filename: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
        }
    }
}

impl PlatformConfig {
    /// Library list of the modem at zero-based `index`.
    ///
    /// Returns `None` when the index is out of range or the declared record
    /// shape is unknown, in which case no instance is readable.
    pub fn libraries(&self, index: usize) -> Option<&[LibraryEntry]> {
        if !self.modem_type.is_known() {
            return None;
        }
        self.modems.get(index).map(|m| m.libs.as_slice())
    }
}
