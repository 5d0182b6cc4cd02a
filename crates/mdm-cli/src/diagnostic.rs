//! In-process diagnostic backend.
//!
//! Performs no hardware control. Every call is logged and succeeds. On
//! connect the modem is reported out of service, like a platform without a
//! modem management service would.

use crate::backend::{ModemBackend, Operation, SessionToken};
use crate::locator::DIAGNOSTIC_BACKEND;
use mdm_types::{
    CallbackData, DebugInfo, EventCallback, EventKind, EventRegistration, InstanceId, RestartCause,
};
use std::collections::HashMap;
use std::ffi::{c_int, c_void, CStr};
use std::ptr;
use std::thread::JoinHandle;

struct DiagnosticSession {
    client_name: String,
    instance: InstanceId,
    events: HashMap<EventKind, EventRegistration>,
}

/// One callback invocation, movable to the notifier thread.
struct Delivery {
    kind: EventKind,
    callback: EventCallback,
    context: *mut c_void,
}

// The context belongs to the client, which accepted delivery on any thread
// when it registered.
unsafe impl Send for Delivery {}

impl Delivery {
    fn from_registration(kind: EventKind, reg: &EventRegistration) -> Option<Self> {
        reg.callback.map(|callback| Self {
            kind,
            callback,
            context: reg.context,
        })
    }

    fn run(self) -> c_int {
        let data = CallbackData {
            id: self.kind.as_raw(),
            context: self.context,
            data_size: 0,
            data: ptr::null_mut(),
        };
        // SAFETY: callback and context come from the client's registration.
        unsafe { (self.callback)(&data) }
    }
}

/// Backend used when no real implementation is configured.
///
/// Disconnecting or dropping it joins the notifier thread, so event
/// callbacks must not block on the thread that tears the backend down.
#[derive(Default)]
pub struct DiagnosticBackend {
    session: Option<Box<DiagnosticSession>>,
    notifier: Option<JoinHandle<()>>,
}

impl DiagnosticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the connected client.
    pub fn client_name(&self) -> Option<&str> {
        self.session.as_deref().map(|s| s.client_name.as_str())
    }

    /// Invoke the callback registered for `kind` on the calling thread.
    ///
    /// Returns the callback's return code, or `None` if nothing is
    /// registered for `kind`.
    pub fn emit(&self, kind: EventKind) -> Option<c_int> {
        let session = self.session.as_deref()?;
        let delivery = Delivery::from_registration(kind, session.events.get(&kind)?)?;
        tracing::debug!(client = %session.client_name, event = %kind, "Diagnostic backend emitting event");
        Some(delivery.run())
    }

    fn session(&self, token: SessionToken) -> Option<&DiagnosticSession> {
        self.session
            .as_deref()
            .filter(|s| ptr::eq(*s, token.as_ptr().cast_const().cast::<DiagnosticSession>()))
    }

    fn log_call(&self, operation: Operation, token: SessionToken) -> Option<c_int> {
        match self.session(token) {
            Some(session) => {
                tracing::debug!(
                    client = %session.client_name,
                    instance = %session.instance,
                    %operation,
                    "Diagnostic backend call"
                );
                Some(0)
            }
            None => {
                tracing::warn!(%operation, "Diagnostic backend called with a foreign session");
                Some(-1)
            }
        }
    }

    fn join_notifier(&mut self) {
        if let Some(handle) = self.notifier.take() {
            if handle.join().is_err() {
                tracing::warn!("Diagnostic notifier thread panicked");
            }
        }
    }
}

impl ModemBackend for DiagnosticBackend {
    fn name(&self) -> &str {
        DIAGNOSTIC_BACKEND
    }

    fn connect(
        &mut self,
        client_name: &CStr,
        instance: InstanceId,
        registrations: &[EventRegistration],
    ) -> Option<SessionToken> {
        if self.session.is_some() {
            tracing::warn!("Diagnostic backend already has a client");
            return None;
        }

        let mut events = HashMap::new();
        let mut mask = 0u32;
        for reg in registrations {
            match reg.kind() {
                Some(kind) => {
                    mask |= 1 << kind.as_raw();
                    events.insert(kind, *reg);
                }
                None => tracing::warn!(id = reg.id, "Ignoring registration for unknown event"),
            }
        }

        let client_name = client_name.to_string_lossy().into_owned();
        tracing::debug!(client = %client_name, mask = format_args!("{mask:#x}"), "Client connected");

        // The modem is out of service until a real service says otherwise.
        // Delivered from another thread, as a real backend would.
        let oos = events
            .get(&EventKind::OutOfService)
            .and_then(|reg| Delivery::from_registration(EventKind::OutOfService, reg));
        if let Some(delivery) = oos {
            tracing::debug!(client = %client_name, "Notifying client that modem is out of service");
            self.notifier = Some(std::thread::spawn(move || {
                delivery.run();
            }));
        }

        let session = self.session.insert(Box::new(DiagnosticSession {
            client_name,
            instance,
            events,
        }));
        SessionToken::from_raw(ptr::addr_of_mut!(**session).cast())
    }

    /// Blocks until the OUT_OF_SERVICE notifier thread has returned. A
    /// callback that waits on the disconnecting thread deadlocks here.
    fn disconnect(&mut self, session: SessionToken) -> Option<c_int> {
        let code = self.log_call(Operation::Disconnect, session)?;
        if code == 0 {
            self.join_notifier();
            self.session = None;
        }
        Some(code)
    }

    fn acquire(&mut self, session: SessionToken) -> Option<c_int> {
        self.log_call(Operation::Acquire, session)
    }

    fn release(&mut self, session: SessionToken) -> Option<c_int> {
        self.log_call(Operation::Release, session)
    }

    fn restart(
        &mut self,
        session: SessionToken,
        cause: RestartCause,
        info: Option<&DebugInfo>,
    ) -> Option<c_int> {
        tracing::debug!(?cause, fields = ?info.map(DebugInfo::data), "Diagnostic restart");
        self.log_call(Operation::Restart, session)
    }

    fn shutdown(&mut self, session: SessionToken) -> Option<c_int> {
        self.log_call(Operation::Shutdown, session)
    }

    fn nvm_backup(&mut self, session: SessionToken) -> Option<c_int> {
        self.log_call(Operation::NvmBackup, session)
    }

    fn ack_cold_reset(&mut self, session: SessionToken) -> Option<c_int> {
        self.log_call(Operation::AckColdReset, session)
    }

    fn ack_shutdown(&mut self, session: SessionToken) -> Option<c_int> {
        self.log_call(Operation::AckShutdown, session)
    }

    fn notify_debug(&mut self, session: SessionToken, info: Option<&DebugInfo>) -> Option<c_int> {
        tracing::debug!(kind = ?info.map(|i| i.kind), fields = ?info.map(DebugInfo::data), "Diagnostic debug info");
        self.log_call(Operation::NotifyDebug, session)
    }
}

impl Drop for DiagnosticBackend {
    fn drop(&mut self) {
        self.join_notifier();
    }
}
