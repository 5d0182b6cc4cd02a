//! Debug information attached to restart and notify requests.
//!
//! A [`DebugInfo`] is built by a client for a single call and describes why
//! the call is made: a type tag, how many logs the crash reporter should
//! collect and a handful of short text fields. It is forwarded to every
//! client subscribed to [`EventKind::DebugInfo`](crate::EventKind::DebugInfo).

use serde::{Deserialize, Serialize};
use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr;
use thiserror::Error;

/// Maximum number of text fields in a debug information record.
pub const MAX_NB_DATA: usize = 6;

/// Maximum size of one text field in bytes, including the C terminator.
pub const MAX_LEN_DATA: usize = 512;

/// Let the crash reporter pick the log size.
pub const DEFAULT_LOG_SIZE: i32 = -1;
/// Do not attach logs.
pub const NO_LOG: i32 = 0;
/// Let the crash reporter pick the log depth.
pub const DEFAULT_LOG_TIME: i32 = -1;

/// Core dump retrieval verdicts reported in debug information fields.
pub mod dump_verdict {
    pub const SUCCEED: &str = "CD_SUCCEED";
    pub const TIMEOUT: &str = "CD_TIMEOUT";
    pub const LINK_ERROR: &str = "CD_LINK_ERROR";
    pub const SELF_RESET: &str = "CD_SELF_RESET";
    pub const PROTOCOL: &str = "CD_PROTOCOL_ERROR";
    pub const OTHER: &str = "OTHER";
}

/// Errors building or decoding a debug information record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugInfoError {
    #[error("debug info holds at most {max} fields")]
    TooManyFields { max: usize },

    #[error("debug info field is {len} bytes, limit is {max} including terminator")]
    FieldTooLong { len: usize, max: usize },

    #[error("debug info field contains a NUL byte")]
    InteriorNul,

    #[error("unknown debug info type {0}")]
    UnknownType(c_int),
}

/// Category of a debug information record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum DebugType {
    Stats = 1,
    Info = 2,
    Error = 3,
    PlatformReboot = 4,
    DumpStart = 5,
    DumpEnd = 6,
    DumpSkip = 7,
    Apimr = 8,
    SelfReset = 9,
    FwSuccess = 10,
    FwFailure = 11,
    TlvNone = 12,
    TlvSuccess = 13,
    TlvFailure = 14,
    NvmBackupSuccess = 15,
    NvmBackupFailure = 16,
    CalUpdateSuccess = 17,
    CalUpdateFailure = 18,
}

impl DebugType {
    const ALL: [Self; 18] = [
        Self::Stats,
        Self::Info,
        Self::Error,
        Self::PlatformReboot,
        Self::DumpStart,
        Self::DumpEnd,
        Self::DumpSkip,
        Self::Apimr,
        Self::SelfReset,
        Self::FwSuccess,
        Self::FwFailure,
        Self::TlvNone,
        Self::TlvSuccess,
        Self::TlvFailure,
        Self::NvmBackupSuccess,
        Self::NvmBackupFailure,
        Self::CalUpdateSuccess,
        Self::CalUpdateFailure,
    ];

    /// Convert a raw wire value.
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as c_int == raw)
    }

    /// Raw wire value.
    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// Reason given for a restart request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum RestartCause {
    /// Deprecated. Only the NVM server uses it.
    OutOfService = 1,
    /// Generic modem error.
    Error = 2,
    /// Apply a firmware or configuration update.
    ApplyUpdate = 3,
}

impl RestartCause {
    /// Raw wire value.
    pub fn as_raw(self) -> c_int {
        self as c_int
    }

    /// Convert a raw wire value.
    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            1 => Some(Self::OutOfService),
            2 => Some(Self::Error),
            3 => Some(Self::ApplyUpdate),
            _ => None,
        }
    }

    /// Update restarts never carry debug information.
    pub fn discards_debug_info(self) -> bool {
        self == Self::ApplyUpdate
    }
}

/// Debug information record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    /// Record category.
    pub kind: DebugType,

    /// AP logs to attach, in MB. See [`DEFAULT_LOG_SIZE`] and [`NO_LOG`].
    pub ap_logs_size: i32,

    /// BP logs to attach, in MB.
    pub bp_logs_size: i32,

    /// BP log depth to capture, in seconds.
    pub bp_logs_time: i32,

    data: Vec<String>,
}

impl Default for DebugInfo {
    fn default() -> Self {
        Self::new(DebugType::Info)
    }
}

impl DebugInfo {
    /// Empty record of the given type with no logs requested.
    pub fn new(kind: DebugType) -> Self {
        Self {
            kind,
            ap_logs_size: NO_LOG,
            bp_logs_size: NO_LOG,
            bp_logs_time: NO_LOG,
            data: Vec::new(),
        }
    }

    /// Set the log budgets.
    pub fn with_logs(mut self, ap_logs_size: i32, bp_logs_size: i32, bp_logs_time: i32) -> Self {
        self.ap_logs_size = ap_logs_size;
        self.bp_logs_size = bp_logs_size;
        self.bp_logs_time = bp_logs_time;
        self
    }

    /// Build a record from caller-provided causes.
    ///
    /// Causes beyond [`MAX_NB_DATA`] are dropped, matching what runtime
    /// bindings do with arbitrarily long string arrays. Oversized or
    /// NUL-containing causes are still rejected.
    pub fn from_causes<I, S>(kind: DebugType, causes: I) -> Result<Self, DebugInfoError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut info = Self::new(kind);
        for cause in causes.into_iter().take(MAX_NB_DATA) {
            info.push(cause)?;
        }
        Ok(info)
    }

    /// Append one text field.
    pub fn push(&mut self, field: impl Into<String>) -> Result<(), DebugInfoError> {
        if self.data.len() >= MAX_NB_DATA {
            return Err(DebugInfoError::TooManyFields { max: MAX_NB_DATA });
        }
        let field = field.into();
        validate_field(&field)?;
        self.data.push(field);
        Ok(())
    }

    /// Text fields, in order.
    pub fn data(&self) -> &[String] {
        &self.data
    }

    /// Build the C layout of this record.
    ///
    /// The returned buffer owns every string the layout points to and must
    /// outlive any use of [`RawDebugInfoBuf::as_ptr`].
    pub fn to_raw(&self) -> Result<RawDebugInfoBuf, DebugInfoError> {
        if self.data.len() > MAX_NB_DATA {
            return Err(DebugInfoError::TooManyFields { max: MAX_NB_DATA });
        }
        let fields = self
            .data
            .iter()
            .map(|field| {
                validate_field(field)?;
                CString::new(field.as_str()).map_err(|_| DebugInfoError::InteriorNul)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pointers: Vec<*const c_char> = fields.iter().map(|f| f.as_ptr()).collect();

        let raw = RawDebugInfo {
            kind: self.kind.as_raw(),
            ap_logs_size: self.ap_logs_size,
            bp_logs_size: self.bp_logs_size,
            bp_logs_time: self.bp_logs_time,
            nb_data: pointers.len(),
            data: if pointers.is_empty() {
                ptr::null()
            } else {
                pointers.as_ptr()
            },
        };

        Ok(RawDebugInfoBuf {
            raw,
            _pointers: pointers,
            _fields: fields,
        })
    }

    /// Copy a record out of its C layout.
    ///
    /// At most [`MAX_NB_DATA`] fields are read. Null fields are skipped and
    /// invalid UTF-8 is replaced.
    ///
    /// # Safety
    ///
    /// `raw.data` must be null or point to `raw.nb_data` pointers, each null
    /// or pointing to a NUL-terminated string.
    pub unsafe fn from_raw(raw: &RawDebugInfo) -> Result<Self, DebugInfoError> {
        let kind = DebugType::from_raw(raw.kind).ok_or(DebugInfoError::UnknownType(raw.kind))?;
        let mut info = Self::new(kind).with_logs(raw.ap_logs_size, raw.bp_logs_size, raw.bp_logs_time);

        if !raw.data.is_null() {
            for i in 0..raw.nb_data.min(MAX_NB_DATA) {
                // SAFETY: caller guarantees `nb_data` readable entries
                let field = unsafe { *raw.data.add(i) };
                if field.is_null() {
                    continue;
                }
                // SAFETY: caller guarantees NUL-terminated strings
                let text = unsafe { CStr::from_ptr(field) }.to_string_lossy();
                let end = floor_char_boundary(&text, MAX_LEN_DATA - 1);
                info.data.push(text[..end].to_string());
            }
        }

        Ok(info)
    }
}

fn validate_field(field: &str) -> Result<(), DebugInfoError> {
    if field.len() >= MAX_LEN_DATA {
        return Err(DebugInfoError::FieldTooLong {
            len: field.len(),
            max: MAX_LEN_DATA,
        });
    }
    if field.as_bytes().contains(&0) {
        return Err(DebugInfoError::InteriorNul);
    }
    Ok(())
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

/// C layout of a debug information record.
#[repr(C)]
#[derive(Debug)]
pub struct RawDebugInfo {
    pub kind: c_int,
    pub ap_logs_size: c_int,
    pub bp_logs_size: c_int,
    pub bp_logs_time: c_int,
    pub nb_data: usize,
    pub data: *const *const c_char,
}

/// A [`RawDebugInfo`] together with the storage it points into.
#[derive(Debug)]
pub struct RawDebugInfoBuf {
    raw: RawDebugInfo,
    _pointers: Vec<*const c_char>,
    _fields: Vec<CString>,
}

impl RawDebugInfoBuf {
    /// Pointer valid for as long as `self` is alive.
    pub fn as_ptr(&self) -> *const RawDebugInfo {
        &self.raw
    }

    /// The C layout.
    pub fn raw(&self) -> &RawDebugInfo {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_record_requests_no_logs() {
        let info = DebugInfo::default();
        assert_eq!(info.kind, DebugType::Info);
        assert_eq!(info.ap_logs_size, NO_LOG);
        assert_eq!(info.bp_logs_size, NO_LOG);
        assert_eq!(info.bp_logs_time, NO_LOG);
        assert!(info.data().is_empty());
    }

    #[test]
    fn test_push_enforces_field_count() {
        let mut info = DebugInfo::new(DebugType::Error);
        for i in 0..MAX_NB_DATA {
            info.push(format!("cause {i}")).unwrap();
        }
        assert_eq!(
            info.push("one too many"),
            Err(DebugInfoError::TooManyFields { max: MAX_NB_DATA })
        );
    }

    #[test]
    fn test_push_enforces_field_length() {
        let mut info = DebugInfo::default();
        assert!(info.push("x".repeat(MAX_LEN_DATA - 1)).is_ok());
        assert!(matches!(
            info.push("x".repeat(MAX_LEN_DATA)),
            Err(DebugInfoError::FieldTooLong { .. })
        ));
        assert_eq!(info.push("a\0b"), Err(DebugInfoError::InteriorNul));
    }

    #[test]
    fn test_from_causes_truncates_to_max_fields() {
        let causes = (0..10).map(|i| format!("c{i}"));
        let info = DebugInfo::from_causes(DebugType::Apimr, causes).unwrap();
        assert_eq!(info.data().len(), MAX_NB_DATA);
        assert_eq!(info.data()[0], "c0");
        assert_eq!(info.data()[5], "c5");
    }

    #[test]
    fn test_raw_layout_points_at_fields() {
        let info = DebugInfo::from_causes(DebugType::DumpEnd, ["app", dump_verdict::TIMEOUT])
            .unwrap()
            .with_logs(DEFAULT_LOG_SIZE, 10, DEFAULT_LOG_TIME);
        let buf = info.to_raw().unwrap();
        let raw = buf.raw();

        assert_eq!(raw.kind, DebugType::DumpEnd as c_int);
        assert_eq!(raw.ap_logs_size, -1);
        assert_eq!(raw.bp_logs_size, 10);
        assert_eq!(raw.nb_data, 2);

        let second = unsafe { CStr::from_ptr(*raw.data.add(1)) };
        assert_eq!(second.to_str().unwrap(), "CD_TIMEOUT");

        let decoded = unsafe { DebugInfo::from_raw(raw) }.unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_empty_record_has_null_data() {
        let buf = DebugInfo::default().to_raw().unwrap();
        assert!(buf.raw().data.is_null());
        assert_eq!(buf.raw().nb_data, 0);
    }

    #[test]
    fn test_from_raw_rejects_unknown_type() {
        let raw = RawDebugInfo {
            kind: 99,
            ap_logs_size: 0,
            bp_logs_size: 0,
            bp_logs_time: 0,
            nb_data: 0,
            data: ptr::null(),
        };
        assert_eq!(
            unsafe { DebugInfo::from_raw(&raw) },
            Err(DebugInfoError::UnknownType(99))
        );
    }

    #[test]
    fn test_apply_update_discards_debug_info() {
        assert!(RestartCause::ApplyUpdate.discards_debug_info());
        assert!(!RestartCause::Error.discards_debug_info());
        assert_eq!(RestartCause::from_raw(2), Some(RestartCause::Error));
        assert_eq!(RestartCause::from_raw(7), None);
    }
}
