//! The backend capability set.
//!
//! Every backend operation except `connect` is optional. A backend that
//! does not implement an operation simply keeps the default method, which
//! reports it as unsupported by returning `None`.

use mdm_types::{DebugInfo, EventRegistration, InstanceId, RestartCause};
use std::ffi::{c_int, c_void, CStr};
use std::fmt;
use std::ptr::NonNull;

/// Entry points of the backend contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Disconnect,
    Acquire,
    Release,
    Restart,
    Shutdown,
    NvmBackup,
    AckColdReset,
    AckShutdown,
    NotifyDebug,
}

impl Operation {
    /// Every operation, in table order.
    pub const ALL: [Self; 10] = [
        Self::Connect,
        Self::Disconnect,
        Self::Acquire,
        Self::Release,
        Self::Restart,
        Self::Shutdown,
        Self::NvmBackup,
        Self::AckColdReset,
        Self::AckShutdown,
        Self::NotifyDebug,
    ];

    /// Exported symbol implementing this operation in a backend library.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Connect => "mdm_cli_connect",
            Self::Disconnect => "mdm_cli_disconnect",
            Self::Acquire => "mdm_cli_acquire",
            Self::Release => "mdm_cli_release",
            Self::Restart => "mdm_cli_restart",
            Self::Shutdown => "mdm_cli_shutdown",
            Self::NvmBackup => "mdm_cli_nvm_bckup",
            Self::AckColdReset => "mdm_cli_ack_cold_reset",
            Self::AckShutdown => "mdm_cli_ack_shutdown",
            Self::NotifyDebug => "mdm_cli_notify_dbg",
        }
    }

    /// Operation name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Acquire => "acquire",
            Self::Release => "release",
            Self::Restart => "restart",
            Self::Shutdown => "shutdown",
            Self::NvmBackup => "nvm_backup",
            Self::AckColdReset => "ack_cold_reset",
            Self::AckShutdown => "ack_shutdown",
            Self::NotifyDebug => "notify_debug",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque session handle returned by a backend's connect.
///
/// The facade never looks behind the pointer; it only hands it back to the
/// backend that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionToken(NonNull<c_void>);

impl SessionToken {
    /// Wrap a raw handle, `None` if null.
    pub fn from_raw(raw: *mut c_void) -> Option<Self> {
        NonNull::new(raw).map(Self)
    }

    /// The raw handle.
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

// The token is only ever passed back to the backend that issued it.
unsafe impl Send for SessionToken {}

/// A modem management backend.
///
/// Forwarding methods return `None` when the backend does not implement the
/// operation, otherwise the backend's own status (0 on success).
pub trait ModemBackend: Send {
    /// Name used in logs, usually the library path.
    fn name(&self) -> &str;

    /// Open a session for `client_name` on `instance`.
    ///
    /// The registration list is handed over unmodified. Returns `None` when
    /// the backend refuses the client.
    fn connect(
        &mut self,
        client_name: &CStr,
        instance: InstanceId,
        registrations: &[EventRegistration],
    ) -> Option<SessionToken>;

    fn disconnect(&mut self, _session: SessionToken) -> Option<c_int> {
        None
    }

    fn acquire(&mut self, _session: SessionToken) -> Option<c_int> {
        None
    }

    fn release(&mut self, _session: SessionToken) -> Option<c_int> {
        None
    }

    fn restart(
        &mut self,
        _session: SessionToken,
        _cause: RestartCause,
        _info: Option<&DebugInfo>,
    ) -> Option<c_int> {
        None
    }

    fn shutdown(&mut self, _session: SessionToken) -> Option<c_int> {
        None
    }

    fn nvm_backup(&mut self, _session: SessionToken) -> Option<c_int> {
        None
    }

    fn ack_cold_reset(&mut self, _session: SessionToken) -> Option<c_int> {
        None
    }

    fn ack_shutdown(&mut self, _session: SessionToken) -> Option<c_int> {
        None
    }

    fn notify_debug(&mut self, _session: SessionToken, _info: Option<&DebugInfo>) -> Option<c_int> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_symbols_are_unique() {
        let symbols: HashSet<_> = Operation::ALL.iter().map(|op| op.symbol()).collect();
        assert_eq!(symbols.len(), Operation::ALL.len());
        assert!(symbols.iter().all(|s| s.starts_with("mdm_cli_")));
    }

    #[test]
    fn test_null_session_is_rejected() {
        assert!(SessionToken::from_raw(std::ptr::null_mut()).is_none());
    }

    struct ConnectOnly;

    impl ModemBackend for ConnectOnly {
        fn name(&self) -> &str {
            "connect-only"
        }

        fn connect(&mut self, _: &CStr, _: InstanceId, _: &[EventRegistration]) -> Option<SessionToken> {
            None
        }
    }

    #[test]
    fn test_default_methods_report_unsupported() {
        let mut backend = ConnectOnly;
        let mut marker = 0u8;
        let token = SessionToken::from_raw(std::ptr::addr_of_mut!(marker).cast()).unwrap();
        assert_eq!(backend.acquire(token), None);
        assert_eq!(backend.restart(token, RestartCause::Error, None), None);
        assert_eq!(backend.notify_debug(token, None), None);
        assert_eq!(backend.disconnect(token), None);
    }
}
