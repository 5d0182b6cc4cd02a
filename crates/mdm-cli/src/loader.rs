//! Dynamic library loading for modem backends.
//!
//! This module opens backend shared libraries and binds the exported
//! `mdm_cli_*` entry points into an [`OperationTable`].

use crate::backend::{ModemBackend, Operation, SessionToken};
use crate::diagnostic::DiagnosticBackend;
use crate::error::{MdmError, MdmResult};
use crate::locator::BackendSource;
use libloading::Library;
use mdm_types::{DebugInfo, EventRegistration, InstanceId, RawDebugInfo, RestartCause};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::path::Path;
use std::ptr;

/// Function signature for `mdm_cli_connect`.
///
/// ```c
/// mdm_cli_hdle_t *mdm_cli_connect(
///     const char *client_name,
///     int inst_id,
///     int nb_evts,
///     const mdm_cli_register_t evts[]
/// );
/// ```
pub type ConnectFn = unsafe extern "C" fn(
    client_name: *const c_char,
    inst_id: c_int,
    nb_evts: c_int,
    evts: *const EventRegistration,
) -> *mut c_void;

/// Function signature shared by every handle-only entry point.
///
/// ```c
/// int mdm_cli_acquire(mdm_cli_hdle_t *hdle);
/// ```
pub type HandleFn = unsafe extern "C" fn(hdle: *mut c_void) -> c_int;

/// Function signature for `mdm_cli_restart`.
pub type RestartFn =
    unsafe extern "C" fn(hdle: *mut c_void, cause: c_int, data: *const RawDebugInfo) -> c_int;

/// Function signature for `mdm_cli_notify_dbg`.
pub type NotifyDebugFn = unsafe extern "C" fn(hdle: *mut c_void, data: *const RawDebugInfo) -> c_int;

/// Entry points resolved from a backend library. Unbound slots are `None`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OperationTable {
    pub connect: Option<ConnectFn>,
    pub disconnect: Option<HandleFn>,
    pub acquire: Option<HandleFn>,
    pub release: Option<HandleFn>,
    pub restart: Option<RestartFn>,
    pub shutdown: Option<HandleFn>,
    pub nvm_backup: Option<HandleFn>,
    pub ack_cold_reset: Option<HandleFn>,
    pub ack_shutdown: Option<HandleFn>,
    pub notify_debug: Option<NotifyDebugFn>,
}

impl OperationTable {
    /// Resolve every entry point `library` exports.
    ///
    /// Missing symbols leave their slot unbound; binding never fails.
    pub fn bind(library: &Library) -> Self {
        Self {
            connect: lookup(library, Operation::Connect),
            disconnect: lookup(library, Operation::Disconnect),
            acquire: lookup(library, Operation::Acquire),
            release: lookup(library, Operation::Release),
            restart: lookup(library, Operation::Restart),
            shutdown: lookup(library, Operation::Shutdown),
            nvm_backup: lookup(library, Operation::NvmBackup),
            ack_cold_reset: lookup(library, Operation::AckColdReset),
            ack_shutdown: lookup(library, Operation::AckShutdown),
            notify_debug: lookup(library, Operation::NotifyDebug),
        }
    }

    /// Check whether the slot for `op` is bound.
    pub fn is_bound(&self, op: Operation) -> bool {
        match op {
            Operation::Connect => self.connect.is_some(),
            Operation::Disconnect => self.disconnect.is_some(),
            Operation::Acquire => self.acquire.is_some(),
            Operation::Release => self.release.is_some(),
            Operation::Restart => self.restart.is_some(),
            Operation::Shutdown => self.shutdown.is_some(),
            Operation::NvmBackup => self.nvm_backup.is_some(),
            Operation::AckColdReset => self.ack_cold_reset.is_some(),
            Operation::AckShutdown => self.ack_shutdown.is_some(),
            Operation::NotifyDebug => self.notify_debug.is_some(),
        }
    }

    /// Operations the library does not export.
    pub fn missing(&self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| !self.is_bound(*op))
            .collect()
    }
}

fn lookup<T: Copy>(library: &Library, op: Operation) -> Option<T> {
    // SAFETY: every call site pairs `op` with the matching C signature.
    unsafe { library.get::<T>(op.symbol().as_bytes()).ok().map(|s| *s) }
}

/// Backend implemented by a shared library.
///
/// Owns the library handle; dropping the backend unloads it.
pub struct DynamicBackend {
    table: OperationTable,
    connect: ConnectFn,
    path: String,
    // Unloaded when the backend is dropped.
    _library: Library,
}

impl DynamicBackend {
    /// Load a backend from a shared library file.
    ///
    /// Symbols are resolved lazily by the platform loader. Only a library
    /// that cannot be opened or lacks `mdm_cli_connect` is refused.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initializers. The library must implement
    /// the `mdm_cli_*` contract with the expected signatures.
    pub fn load<P: AsRef<Path>>(path: P) -> MdmResult<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let library = unsafe { Library::new(path) }.map_err(|e| {
            tracing::error!(path = %path_str, error = %e, "Failed to open backend library");
            MdmError::load_error(&path_str, e)
        })?;

        let table = OperationTable::bind(&library);
        let connect = table
            .connect
            .ok_or_else(|| MdmError::symbol_not_found(Operation::Connect.symbol(), &path_str))?;

        tracing::info!(
            path = %path_str,
            missing = ?table.missing(),
            "Loaded modem backend"
        );

        Ok(Self {
            table,
            connect,
            path: path_str,
            _library: library,
        })
    }

    /// Entry points bound from the library.
    pub fn table(&self) -> &OperationTable {
        &self.table
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for DynamicBackend {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path, "Unloading modem backend");
    }
}

fn call(slot: Option<HandleFn>, session: SessionToken) -> Option<c_int> {
    // SAFETY: the session was produced by this library's connect.
    slot.map(|f| unsafe { f(session.as_ptr()) })
}

fn raw_debug_info(info: Option<&DebugInfo>) -> Result<Option<mdm_types::RawDebugInfoBuf>, c_int> {
    info.map(DebugInfo::to_raw).transpose().map_err(|e| {
        tracing::warn!(error = %e, "Refusing to forward malformed debug info");
        -1
    })
}

impl ModemBackend for DynamicBackend {
    fn name(&self) -> &str {
        &self.path
    }

    fn connect(
        &mut self,
        client_name: &CStr,
        instance: InstanceId,
        registrations: &[EventRegistration],
    ) -> Option<SessionToken> {
        let evts = if registrations.is_empty() {
            ptr::null()
        } else {
            registrations.as_ptr()
        };
        // SAFETY: name and registrations outlive the call; the backend copies
        // what it keeps.
        let raw = unsafe {
            (self.connect)(
                client_name.as_ptr(),
                instance.as_raw(),
                registrations.len() as c_int,
                evts,
            )
        };
        SessionToken::from_raw(raw)
    }

    fn disconnect(&mut self, session: SessionToken) -> Option<c_int> {
        call(self.table.disconnect, session)
    }

    fn acquire(&mut self, session: SessionToken) -> Option<c_int> {
        call(self.table.acquire, session)
    }

    fn release(&mut self, session: SessionToken) -> Option<c_int> {
        call(self.table.release, session)
    }

    fn restart(
        &mut self,
        session: SessionToken,
        cause: RestartCause,
        info: Option<&DebugInfo>,
    ) -> Option<c_int> {
        let restart = self.table.restart?;
        let raw = match raw_debug_info(info) {
            Ok(raw) => raw,
            Err(code) => return Some(code),
        };
        let data = raw.as_ref().map_or(ptr::null(), |b| b.as_ptr());
        // SAFETY: `raw` keeps the record alive for the duration of the call.
        Some(unsafe { restart(session.as_ptr(), cause.as_raw(), data) })
    }

    fn shutdown(&mut self, session: SessionToken) -> Option<c_int> {
        call(self.table.shutdown, session)
    }

    fn nvm_backup(&mut self, session: SessionToken) -> Option<c_int> {
        call(self.table.nvm_backup, session)
    }

    fn ack_cold_reset(&mut self, session: SessionToken) -> Option<c_int> {
        call(self.table.ack_cold_reset, session)
    }

    fn ack_shutdown(&mut self, session: SessionToken) -> Option<c_int> {
        call(self.table.ack_shutdown, session)
    }

    fn notify_debug(&mut self, session: SessionToken, info: Option<&DebugInfo>) -> Option<c_int> {
        let notify = self.table.notify_debug?;
        let raw = match raw_debug_info(info) {
            Ok(raw) => raw,
            Err(code) => return Some(code),
        };
        let data = raw.as_ref().map_or(ptr::null(), |b| b.as_ptr());
        // SAFETY: `raw` keeps the record alive for the duration of the call.
        Some(unsafe { notify(session.as_ptr(), data) })
    }
}

/// Turns a resolved [`BackendSource`] into a live backend.
pub trait BackendLoader: Send + Sync {
    fn load(&self, source: &BackendSource) -> MdmResult<Box<dyn ModemBackend>>;
}

/// Loads libraries with `libloading` and serves the diagnostic backend
/// in-process.
#[derive(Clone, Copy, Debug, Default)]
pub struct DynamicLoader;

impl BackendLoader for DynamicLoader {
    fn load(&self, source: &BackendSource) -> MdmResult<Box<dyn ModemBackend>> {
        match source {
            BackendSource::Library(path) => Ok(Box::new(DynamicBackend::load(path)?)),
            BackendSource::Diagnostic => Ok(Box::new(DiagnosticBackend::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_has_nothing_bound() {
        let table = OperationTable::default();
        assert_eq!(table.missing(), Operation::ALL.to_vec());
        assert!(!table.is_bound(Operation::Connect));
    }

    #[test]
    fn test_missing_library_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DynamicBackend::load(dir.path().join("libmdmcli_absent.so"))
            .err()
            .unwrap();
        assert!(matches!(err, MdmError::LoadError { .. }));
        assert!(err.is_load_failure());
    }

    #[test]
    fn test_garbage_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libgarbage.so");
        std::fs::write(&path, b"not a shared object").unwrap();
        assert!(matches!(
            DynamicBackend::load(&path),
            Err(MdmError::LoadError { .. })
        ));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_library_without_connect_is_refused() {
        let err = DynamicBackend::load("libc.so.6").err().unwrap();
        assert!(matches!(
            err,
            MdmError::SymbolNotFound { ref symbol, .. } if symbol == "mdm_cli_connect"
        ));
    }

    #[test]
    fn test_dynamic_loader_serves_diagnostic_in_process() {
        let backend = DynamicLoader.load(&BackendSource::Diagnostic).unwrap();
        assert_eq!(backend.name(), crate::locator::DIAGNOSTIC_BACKEND);
    }
}
