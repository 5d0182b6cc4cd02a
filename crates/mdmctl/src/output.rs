//! Result output formatting.

use crate::OutputFormat;
use anyhow::Result;
use mdm_cli::{status_code, BackendSource, InstanceId, MdmResult, ModemEvent};
use mdm_config::PlatformConfig;

/// Render a backend resolution.
pub fn format_resolution(
    instance: InstanceId,
    source: &BackendSource,
    topology: Option<&PlatformConfig>,
    format: OutputFormat,
) -> Result<String> {
    let libs = topology.and_then(|t| t.libraries(instance.index()));
    match format {
        OutputFormat::Text => {
            let mut out = format!("Instance {instance}: {source}");
            if source.is_diagnostic() {
                out.push_str(" (diagnostic)");
            }
            if let Some(topology) = topology {
                out.push_str(&format!("\n  Modem type: {:?}", topology.modem_type));
                out.push_str(&format!("\n  Modems:     {}", topology.modems.len()));
            }
            for lib in libs.unwrap_or_default() {
                out.push_str(&format!("\n  {:<12} {}", lib.name, lib.filename.display()));
            }
            Ok(out)
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "instance": instance,
                "backend": source.to_string(),
                "diagnostic": source.is_diagnostic(),
                "libs": libs,
            });
            Ok(serde_json::to_string_pretty(&json)?)
        }
    }
}

/// Render the outcome of one operation.
pub fn format_outcome(action: &str, result: &MdmResult<()>, format: OutputFormat) -> Result<String> {
    let code = status_code(result);
    match format {
        OutputFormat::Text => Ok(match result {
            Ok(()) => format!("{action}: ok"),
            Err(e) => format!("{action}: failed ({e})"),
        }),
        OutputFormat::Json => {
            let json = serde_json::json!({
                "action": action,
                "status": code,
                "error": result.as_ref().err().map(ToString::to_string),
            });
            Ok(serde_json::to_string(&json)?)
        }
    }
}

/// Render one received event.
pub fn format_event(event: &ModemEvent, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => {
            let mut out = event.kind.to_string();
            if let Some(info) = &event.debug_info {
                out.push_str(&format!(
                    " type={:?} ap={} bp={} time={} data={:?}",
                    info.kind,
                    info.ap_logs_size,
                    info.bp_logs_size,
                    info.bp_logs_time,
                    info.data()
                ));
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(event)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdm_cli::{DebugInfo, DebugType, EventKind, MdmError, Operation};
    use mdm_config::{LibraryEntry, ModemInfo, ModemType};

    #[test]
    fn test_text_resolution_lists_libraries() {
        let topology = PlatformConfig {
            modem_type: ModemType::Xmm,
            modems: vec![ModemInfo {
                name: None,
                libs: vec![LibraryEntry::new("mdmcli", "/vendor/libmdmcli.so")],
            }],
        };
        let source = BackendSource::Library("/vendor/libmdmcli.so".into());
        let out = format_resolution(InstanceId::DEFAULT, &source, Some(&topology), OutputFormat::Text)
            .unwrap();
        assert!(out.starts_with("Instance 1: /vendor/libmdmcli.so"));
        assert!(out.contains("mdmcli"));
    }

    #[test]
    fn test_json_resolution_flags_diagnostic() {
        let out = format_resolution(
            InstanceId::DEFAULT,
            &BackendSource::Diagnostic,
            None,
            OutputFormat::Json,
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["diagnostic"], true);
        assert_eq!(value["backend"], "libmdmcli_stub.so");
    }

    #[test]
    fn test_outcome_carries_status_code() {
        let failed: MdmResult<()> = Err(MdmError::Unsupported {
            operation: Operation::NvmBackup,
        });
        let out = format_outcome("nvm-backup", &failed, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["status"], -1);

        assert_eq!(
            format_outcome("acquire", &Ok(()), OutputFormat::Text).unwrap(),
            "acquire: ok"
        );
    }

    #[test]
    fn test_event_formats() {
        let event = ModemEvent {
            kind: EventKind::DebugInfo,
            debug_info: Some(DebugInfo::from_causes(DebugType::Info, ["x"]).unwrap()),
        };
        let text = format_event(&event, OutputFormat::Text).unwrap();
        assert!(text.starts_with("DEBUG_INFO type=Info"));

        let plain = ModemEvent {
            kind: EventKind::Up,
            debug_info: None,
        };
        assert_eq!(format_event(&plain, OutputFormat::Json).unwrap(), r#"{"kind":"UP"}"#);
    }
}
