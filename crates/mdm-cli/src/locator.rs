//! Backend resolution from host configuration.

use mdm_config::{ConfigSource, FileSource, LibraryEntry};
use mdm_types::InstanceId;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Library role tag naming the client backend in configuration.
pub const CLIENT_LIBRARY_TAG: &str = "mdmcli";

/// Identifier of the diagnostic backend.
pub const DIAGNOSTIC_BACKEND: &str = "libmdmcli_stub.so";

/// Where a backend comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendSource {
    /// A shared library to load.
    Library(PathBuf),
    /// The diagnostic backend.
    Diagnostic,
}

impl BackendSource {
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Diagnostic)
    }
}

impl fmt::Display for BackendSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library(path) => write!(f, "{}", path.display()),
            Self::Diagnostic => f.write_str(DIAGNOSTIC_BACKEND),
        }
    }
}

/// Pick the client library from an ordered library list.
///
/// Later entries override earlier ones, so the list is scanned from the end.
pub fn select_library(libs: &[LibraryEntry]) -> Option<&LibraryEntry> {
    libs.iter().rev().find(|lib| lib.name == CLIENT_LIBRARY_TAG)
}

/// Maps modem instances to backends.
#[derive(Clone)]
pub struct BackendLocator {
    config: Arc<dyn ConfigSource>,
}

impl BackendLocator {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self { config }
    }

    /// Locator reading the file named by `MDMCLI_CONFIG` or the default path.
    pub fn from_env() -> Self {
        Self::new(Arc::new(FileSource::from_env()))
    }

    /// Resolve the backend for `instance`.
    ///
    /// Never fails: unreadable configuration, an unknown record shape, an
    /// instance out of range or no client library all resolve to
    /// [`BackendSource::Diagnostic`].
    pub fn resolve(&self, instance: InstanceId) -> BackendSource {
        let config = match self.config.load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    source = %self.config.describe(),
                    error = %e,
                    "Modem configuration unavailable, using diagnostic backend"
                );
                return BackendSource::Diagnostic;
            }
        };

        let found = config
            .libraries(instance.index())
            .and_then(select_library)
            .map(|lib| lib.filename.clone());

        match found {
            Some(path) => {
                tracing::debug!(%instance, path = %path.display(), "Resolved modem backend");
                BackendSource::Library(path)
            }
            None => {
                tracing::warn!(
                    %instance,
                    modem_type = ?config.modem_type,
                    "No client library configured, using diagnostic backend"
                );
                BackendSource::Diagnostic
            }
        }
    }
}

impl Default for BackendLocator {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for BackendLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLocator")
            .field("config", &self.config.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdm_config::{ModemInfo, ModemType, PlatformConfig, StaticSource, Unavailable};
    use std::io::Write;

    fn locator(modem_type: ModemType, modems: Vec<Vec<LibraryEntry>>) -> BackendLocator {
        let config = PlatformConfig {
            modem_type,
            modems: modems
                .into_iter()
                .map(|libs| ModemInfo { name: None, libs })
                .collect(),
        };
        BackendLocator::new(Arc::new(StaticSource(config)))
    }

    fn id(raw: i64) -> InstanceId {
        InstanceId::new(raw).unwrap()
    }

    #[test]
    fn test_last_matching_entry_wins() {
        let locator = locator(
            ModemType::Xmm,
            vec![vec![
                LibraryEntry::new("mdmcli", "libmdmcli_base.so"),
                LibraryEntry::new("crashlog", "libcrash.so"),
                LibraryEntry::new("mdmcli", "libmdmcli_override.so"),
                LibraryEntry::new("nvm", "libnvm.so"),
            ]],
        );
        assert_eq!(
            locator.resolve(InstanceId::DEFAULT),
            BackendSource::Library("libmdmcli_override.so".into())
        );
    }

    #[test]
    fn test_instances_are_indexed_from_one() {
        let locator = locator(
            ModemType::Sofia,
            vec![
                vec![LibraryEntry::new("mdmcli", "first.so")],
                vec![LibraryEntry::new("mdmcli", "second.so")],
            ],
        );
        assert_eq!(locator.resolve(id(1)), BackendSource::Library("first.so".into()));
        assert_eq!(locator.resolve(id(2)), BackendSource::Library("second.so".into()));
        assert_eq!(locator.resolve(id(3)), BackendSource::Diagnostic);
    }

    #[test]
    fn test_no_client_library_falls_back() {
        let locator = locator(
            ModemType::Xmm,
            vec![vec![LibraryEntry::new("mdmcli-test", "libx.so")]],
        );
        assert!(locator.resolve(InstanceId::DEFAULT).is_diagnostic());
    }

    #[test]
    fn test_unknown_shape_falls_back() {
        let locator = locator(
            ModemType::Unknown,
            vec![vec![LibraryEntry::new("mdmcli", "libx.so")]],
        );
        assert!(locator.resolve(InstanceId::DEFAULT).is_diagnostic());
    }

    #[test]
    fn test_unavailable_config_falls_back() {
        let locator = BackendLocator::new(Arc::new(Unavailable));
        for raw in 1..=4 {
            assert_eq!(locator.resolve(id(raw)), BackendSource::Diagnostic);
        }
    }

    #[test]
    fn test_resolves_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(
            b"modem_type = \"xmm\"\n[[modems]]\nlibs = [{ name = \"mdmcli\", filename = \"/vendor/lib/libmdmcli.so\" }]\n",
        )
        .unwrap();
        let locator = BackendLocator::new(Arc::new(FileSource::new(file.path())));
        assert_eq!(
            locator.resolve(InstanceId::DEFAULT),
            BackendSource::Library("/vendor/lib/libmdmcli.so".into())
        );
    }

    #[test]
    fn test_diagnostic_display_uses_stub_name() {
        assert_eq!(BackendSource::Diagnostic.to_string(), DIAGNOSTIC_BACKEND);
    }
}
