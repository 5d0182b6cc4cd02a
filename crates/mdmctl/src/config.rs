//! Configuration selection for the command line.

use anyhow::{Context, Result};
use mdm_cli::{BackendLocator, Connector, DynamicLoader};
use mdm_config::{ConfigSource, FileSource, PlatformConfig};
use std::path::Path;
use std::sync::Arc;

/// Configuration source: the `--config` file if given, otherwise the
/// environment override or the default path.
pub fn source(path: Option<&Path>) -> FileSource {
    match path {
        Some(path) => FileSource::new(path),
        None => FileSource::from_env(),
    }
}

/// Connector resolving backends through `source`.
pub fn connector(source: FileSource) -> Connector {
    Connector::new(BackendLocator::new(Arc::new(source)), Arc::new(DynamicLoader))
}

/// Load the platform configuration, for display.
///
/// Unlike backend resolution, a missing or malformed file is an error here.
pub fn load_topology(source: &FileSource) -> Result<PlatformConfig> {
    source
        .load()
        .with_context(|| format!("Failed to load modem configuration from {}", source.describe()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdm_cli::{BackendSource, InstanceId};
    use std::io::Write;

    #[test]
    fn test_explicit_path_wins() {
        let src = source(Some(Path::new("/tmp/modems.json")));
        assert_eq!(src.path(), Path::new("/tmp/modems.json"));
    }

    #[test]
    fn test_connector_resolves_configured_library() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"modem_type":"sofia","modems":[{{"libs":[{{"name":"mdmcli","filename":"/opt/libmdmcli.so"}}]}}]}}"#
        )
        .unwrap();

        let src = source(Some(file.path()));
        assert_eq!(load_topology(&src).unwrap().modems.len(), 1);
        assert_eq!(
            connector(src).locator().resolve(InstanceId::DEFAULT),
            BackendSource::Library("/opt/libmdmcli.so".into())
        );
    }

    #[test]
    fn test_missing_topology_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let src = source(Some(path.as_path()));
        let err = load_topology(&src).unwrap_err();
        assert!(err.to_string().contains("Failed to load modem configuration"));
    }
}
