//! # mdm-cli-stub
//!
//! The diagnostic backend built as a shared library. Installing it as
//! `libmdmcli_stub.so` and naming it in the modem configuration gives a
//! platform without a modem management service a backend that logs every
//! call and reports success.
//!
//! Logging is off unless `MDMCLI_STUB_LOG` holds a filter directive, such
//! as `debug`.

use mdm_cli::{DiagnosticBackend, ModemBackend, Operation, SessionToken};
use mdm_types::{
    DebugInfo, DebugInfoError, EventRegistration, InstanceId, RawDebugInfo, RestartCause,
};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

/// Environment variable enabling the library's own log output.
pub const STUB_LOG_ENV: &str = "MDMCLI_STUB_LOG";

static LOG_INIT: Once = Once::new();

fn init_logging() {
    LOG_INIT.call_once(|| {
        if let Ok(filter) = std::env::var(STUB_LOG_ENV) {
            // The host process may already own a subscriber.
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .with_writer(std::io::stderr)
                .try_init();
        }
    });
}

/// State behind the handle returned by [`mdm_cli_connect`].
struct StubHandle {
    backend: DiagnosticBackend,
    session: SessionToken,
}

fn guarded<F>(operation: Operation, f: F) -> c_int
where
    F: FnOnce() -> Option<c_int>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Some(code)) => code,
        Ok(None) => -1,
        Err(_) => {
            tracing::error!(%operation, "Panic in diagnostic backend");
            -1
        }
    }
}

unsafe fn with_handle<F>(hdle: *mut c_void, operation: Operation, f: F) -> c_int
where
    F: FnOnce(&mut StubHandle) -> Option<c_int>,
{
    // SAFETY: non-null handles come from `mdm_cli_connect`.
    let Some(handle) = (unsafe { hdle.cast::<StubHandle>().as_mut() }) else {
        tracing::warn!(%operation, "Called with a null handle");
        return -1;
    };
    guarded(operation, || f(handle))
}

unsafe fn debug_info(data: *const RawDebugInfo) -> Result<Option<DebugInfo>, DebugInfoError> {
    // SAFETY: caller passes null or a valid record.
    match unsafe { data.as_ref() } {
        None => Ok(None),
        Some(raw) => unsafe { DebugInfo::from_raw(raw) }.map(Some),
    }
}

/// Open a session.
///
/// # Safety
///
/// `client_name` must be null or a NUL-terminated string. `evts` must be
/// null or point to `nb_evts` registrations.
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_connect(
    client_name: *const c_char,
    inst_id: c_int,
    nb_evts: c_int,
    evts: *const EventRegistration,
) -> *mut c_void {
    init_logging();

    if client_name.is_null() {
        tracing::warn!("Connect without a client name");
        return std::ptr::null_mut();
    }
    // SAFETY: checked non-null above, NUL-terminated per contract.
    let name = unsafe { CStr::from_ptr(client_name) };
    let Some(instance) = InstanceId::new(i64::from(inst_id)) else {
        tracing::warn!(inst_id, "Connect with an invalid instance");
        return std::ptr::null_mut();
    };
    let registrations: &[EventRegistration] = match usize::try_from(nb_evts) {
        // SAFETY: `evts` holds `nb_evts` entries per contract.
        Ok(len) if len > 0 && !evts.is_null() => unsafe { std::slice::from_raw_parts(evts, len) },
        _ => &[],
    };

    let connected = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut backend = DiagnosticBackend::new();
        backend
            .connect(name, instance, registrations)
            .map(|session| StubHandle { backend, session })
    }));

    match connected {
        Ok(Some(handle)) => Box::into_raw(Box::new(handle)).cast(),
        Ok(None) => std::ptr::null_mut(),
        Err(_) => {
            tracing::error!("Panic in diagnostic backend connect");
            std::ptr::null_mut()
        }
    }
}

/// Close a session and free its handle.
///
/// # Safety
///
/// `hdle` must be null or a handle from [`mdm_cli_connect`] not yet
/// disconnected.
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_disconnect(hdle: *mut c_void) -> c_int {
    if hdle.is_null() {
        tracing::warn!(operation = %Operation::Disconnect, "Called with a null handle");
        return -1;
    }
    // SAFETY: ownership returns from the caller.
    let mut handle = unsafe { Box::from_raw(hdle.cast::<StubHandle>()) };
    guarded(Operation::Disconnect, || {
        let session = handle.session;
        handle.backend.disconnect(session)
    })
}

/// # Safety
///
/// `hdle` must be null or a live handle from [`mdm_cli_connect`].
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_acquire(hdle: *mut c_void) -> c_int {
    unsafe { with_handle(hdle, Operation::Acquire, |h| h.backend.acquire(h.session)) }
}

/// # Safety
///
/// `hdle` must be null or a live handle from [`mdm_cli_connect`].
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_release(hdle: *mut c_void) -> c_int {
    unsafe { with_handle(hdle, Operation::Release, |h| h.backend.release(h.session)) }
}

/// # Safety
///
/// `hdle` must be null or a live handle from [`mdm_cli_connect`]. `data`
/// must be null or a valid debug information record.
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_restart(
    hdle: *mut c_void,
    cause: c_int,
    data: *const RawDebugInfo,
) -> c_int {
    let Some(cause) = RestartCause::from_raw(cause) else {
        tracing::warn!(cause, "Unknown restart cause");
        return -1;
    };
    let info = match unsafe { debug_info(data) } {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(operation = %Operation::Restart, error = %e, "Rejecting malformed debug info");
            return -1;
        }
    };
    unsafe {
        with_handle(hdle, Operation::Restart, |h| {
            h.backend.restart(h.session, cause, info.as_ref())
        })
    }
}

/// # Safety
///
/// `hdle` must be null or a live handle from [`mdm_cli_connect`].
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_shutdown(hdle: *mut c_void) -> c_int {
    unsafe { with_handle(hdle, Operation::Shutdown, |h| h.backend.shutdown(h.session)) }
}

/// # Safety
///
/// `hdle` must be null or a live handle from [`mdm_cli_connect`].
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_nvm_bckup(hdle: *mut c_void) -> c_int {
    unsafe { with_handle(hdle, Operation::NvmBackup, |h| h.backend.nvm_backup(h.session)) }
}

/// # Safety
///
/// `hdle` must be null or a live handle from [`mdm_cli_connect`].
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_ack_cold_reset(hdle: *mut c_void) -> c_int {
    unsafe {
        with_handle(hdle, Operation::AckColdReset, |h| {
            h.backend.ack_cold_reset(h.session)
        })
    }
}

/// # Safety
///
/// `hdle` must be null or a live handle from [`mdm_cli_connect`].
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_ack_shutdown(hdle: *mut c_void) -> c_int {
    unsafe {
        with_handle(hdle, Operation::AckShutdown, |h| {
            h.backend.ack_shutdown(h.session)
        })
    }
}

/// # Safety
///
/// `hdle` must be null or a live handle from [`mdm_cli_connect`]. `data`
/// must be null or a valid debug information record.
#[no_mangle]
pub unsafe extern "C" fn mdm_cli_notify_dbg(hdle: *mut c_void, data: *const RawDebugInfo) -> c_int {
    let info = match unsafe { debug_info(data) } {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(operation = %Operation::NotifyDebug, error = %e, "Rejecting malformed debug info");
            return -1;
        }
    };
    unsafe {
        with_handle(hdle, Operation::NotifyDebug, |h| {
            h.backend.notify_debug(h.session, info.as_ref())
        })
    }
}
