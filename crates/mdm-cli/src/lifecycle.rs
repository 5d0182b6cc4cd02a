//! Client handle lifecycle.
//!
//! A [`Connector`] runs the connect sequence: argument validation, backend
//! resolution, loading and the backend's own connect. The resulting
//! [`ModemClient`] forwards operations to the backend and tears everything
//! down exactly once, either through [`ModemClient::disconnect`] or on drop.

use crate::backend::{ModemBackend, Operation, SessionToken};
use crate::error::{MdmError, MdmResult};
use crate::loader::{BackendLoader, DynamicLoader};
use crate::locator::BackendLocator;
use mdm_types::{
    ClientState, DebugInfo, EventKind, EventRegistration, InstanceId, RestartCause, NAME_LEN,
};
use std::ffi::{c_int, CStr, CString};
use std::fmt;
use std::sync::Arc;

/// Runs the connect sequence.
#[derive(Clone)]
pub struct Connector {
    locator: BackendLocator,
    loader: Arc<dyn BackendLoader>,
}

impl Connector {
    pub fn new(locator: BackendLocator, loader: Arc<dyn BackendLoader>) -> Self {
        Self { locator, loader }
    }

    /// The locator consulted on every connect.
    pub fn locator(&self) -> &BackendLocator {
        &self.locator
    }

    /// Connect `client_name` to the backend serving `instance`.
    ///
    /// Arguments are checked before configuration is read or anything is
    /// loaded. If the backend refuses the client, its library is released
    /// before the error is returned. No retry happens here.
    pub fn connect(
        &self,
        client_name: &str,
        instance: InstanceId,
        registrations: Vec<EventRegistration>,
    ) -> MdmResult<ModemClient> {
        let name = validate_name(client_name)?;
        validate_registrations(&registrations)?;

        let source = self.locator.resolve(instance);
        let mut backend = self.loader.load(&source)?;

        let Some(session) = backend.connect(&name, instance, &registrations) else {
            tracing::warn!(
                client = client_name,
                %instance,
                backend = backend.name(),
                "Backend refused client"
            );
            let err = MdmError::backend_rejected(backend.name(), client_name);
            drop(backend);
            return Err(err);
        };

        tracing::info!(
            client = client_name,
            %instance,
            backend = backend.name(),
            events = registrations.len(),
            "Client connected"
        );

        Ok(ModemClient {
            session: Some(session),
            backend,
            registrations,
            client_name: name,
            instance,
            state: ClientState::Connected,
            _not_sync: std::marker::PhantomData,
        })
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(BackendLocator::from_env(), Arc::new(DynamicLoader))
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

fn validate_name(client_name: &str) -> MdmResult<CString> {
    if client_name.is_empty() {
        return Err(MdmError::invalid_argument("client_name", "empty"));
    }
    if client_name.len() >= NAME_LEN {
        return Err(MdmError::invalid_argument(
            "client_name",
            format!("{} bytes, limit is {}", client_name.len(), NAME_LEN - 1),
        ));
    }
    CString::new(client_name)
        .map_err(|_| MdmError::invalid_argument("client_name", "contains NUL"))
}

fn validate_registrations(registrations: &[EventRegistration]) -> MdmResult<()> {
    let mut seen = [false; EventKind::COUNT];
    for reg in registrations {
        let kind = reg.kind().ok_or_else(|| {
            MdmError::invalid_argument("registrations", format!("unknown event id {}", reg.id))
        })?;
        if reg.callback.is_none() {
            return Err(MdmError::invalid_argument(
                "registrations",
                format!("no callback for {kind}"),
            ));
        }
        let slot = &mut seen[kind.as_raw() as usize - 1];
        if *slot {
            return Err(MdmError::invalid_argument(
                "registrations",
                format!("{kind} registered twice"),
            ));
        }
        *slot = true;
    }
    Ok(())
}

/// A connected client.
///
/// Owns the backend (and through it the loaded library) and the backend
/// session. Every operation takes `&mut self`; the handle may move between
/// threads but cannot be shared without external locking.
pub struct ModemClient {
    session: Option<SessionToken>,
    backend: Box<dyn ModemBackend>,
    registrations: Vec<EventRegistration>,
    client_name: CString,
    instance: InstanceId,
    state: ClientState,
    _not_sync: std::marker::PhantomData<std::cell::Cell<()>>,
}

impl ModemClient {
    /// Connect with the default [`Connector`].
    ///
    /// `instance` is the raw identifier; it must be in `1..=i32::MAX`.
    pub fn connect(
        client_name: &str,
        instance: i64,
        registrations: Vec<EventRegistration>,
    ) -> MdmResult<Self> {
        let instance = InstanceId::new(instance)
            .ok_or_else(|| MdmError::invalid_argument("instance", format!("{instance} is out of range")))?;
        Connector::default().connect(client_name, instance, registrations)
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn client_name(&self) -> &CStr {
        &self.client_name
    }

    /// Name of the backend serving this client.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Registration list handed to the backend at connect.
    pub fn registrations(&self) -> &[EventRegistration] {
        &self.registrations
    }

    fn forward<F>(&mut self, operation: Operation, f: F) -> MdmResult<()>
    where
        F: FnOnce(&mut dyn ModemBackend, SessionToken) -> Option<c_int>,
    {
        let session = match self.session {
            Some(session) if self.state.is_connected() => session,
            _ => return Err(MdmError::NotConnected),
        };
        let code = f(self.backend.as_mut(), session);
        tracing::debug!(
            client = ?self.client_name,
            %operation,
            ?code,
            "Forwarded to backend"
        );
        MdmError::check(operation, code)
    }

    /// Take the modem into use.
    pub fn acquire(&mut self) -> MdmResult<()> {
        self.forward(Operation::Acquire, |b, s| b.acquire(s))
    }

    /// Give the modem back.
    pub fn release(&mut self) -> MdmResult<()> {
        self.forward(Operation::Release, |b, s| b.release(s))
    }

    /// Ask for a modem restart.
    ///
    /// Debug information is never forwarded with
    /// [`RestartCause::ApplyUpdate`].
    pub fn restart(&mut self, cause: RestartCause, info: Option<&DebugInfo>) -> MdmResult<()> {
        let info = if cause.discards_debug_info() { None } else { info };
        self.forward(Operation::Restart, |b, s| b.restart(s, cause, info))
    }

    pub fn shutdown(&mut self) -> MdmResult<()> {
        self.forward(Operation::Shutdown, |b, s| b.shutdown(s))
    }

    /// Ask for a backup of the modem's non-volatile memory.
    pub fn nvm_backup(&mut self) -> MdmResult<()> {
        self.forward(Operation::NvmBackup, |b, s| b.nvm_backup(s))
    }

    pub fn ack_cold_reset(&mut self) -> MdmResult<()> {
        self.forward(Operation::AckColdReset, |b, s| b.ack_cold_reset(s))
    }

    pub fn ack_shutdown(&mut self) -> MdmResult<()> {
        self.forward(Operation::AckShutdown, |b, s| b.ack_shutdown(s))
    }

    /// Pass debug information to the modem service.
    pub fn notify_debug(&mut self, info: Option<&DebugInfo>) -> MdmResult<()> {
        self.forward(Operation::NotifyDebug, |b, s| b.notify_debug(s, info))
    }

    /// Send the acknowledgment matching `kind`.
    ///
    /// Fails with an invalid argument for events that need no
    /// acknowledgment.
    pub fn acknowledge(&mut self, kind: EventKind) -> MdmResult<()> {
        match kind {
            EventKind::ColdReset => self.ack_cold_reset(),
            EventKind::Shutdown => self.ack_shutdown(),
            other => Err(MdmError::invalid_argument(
                "kind",
                format!("{other} needs no acknowledgment"),
            )),
        }
    }

    /// Close the backend session and release the library.
    ///
    /// The library is released even when the backend reports a failure.
    pub fn disconnect(mut self) -> MdmResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> MdmResult<()> {
        if self.state == ClientState::Disconnected {
            return Ok(());
        }
        self.state = ClientState::Disconnected;

        let result = match self.session.take() {
            Some(session) => match self.backend.disconnect(session) {
                // Nothing to forward to.
                None => Ok(()),
                code => MdmError::check(Operation::Disconnect, code),
            },
            None => Ok(()),
        };

        tracing::info!(
            client = ?self.client_name,
            instance = %self.instance,
            backend = self.backend.name(),
            ok = result.is_ok(),
            "Client disconnected"
        );
        result
    }
}

impl Drop for ModemClient {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!(error = %e, "Error while disconnecting dropped client");
        }
    }
}

impl fmt::Debug for ModemClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModemClient")
            .field("client_name", &self.client_name)
            .field("instance", &self.instance)
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::BackendSource;
    use mdm_config::{
        ConfigError, ConfigSource, LibraryEntry, ModemInfo, ModemType, PlatformConfig,
        StaticSource, Unavailable,
    };
    use mdm_types::{CallbackData, DebugType};
    use std::ffi::c_void;
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        loads: AtomicUsize,
        drops: AtomicUsize,
        disconnects: AtomicUsize,
        acquires: AtomicUsize,
        restarts: AtomicUsize,
        restarts_with_info: AtomicUsize,
        releases: AtomicUsize,
        acks: AtomicUsize,
    }

    impl Counters {
        fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    struct TestBackend {
        counters: Arc<Counters>,
        accept: bool,
        full: bool,
        fail_disconnect: bool,
        marker: Box<u8>,
    }

    impl TestBackend {
        fn bump(&self, counter: &AtomicUsize) -> Option<c_int> {
            if !self.full {
                return None;
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Some(0)
        }
    }

    impl ModemBackend for TestBackend {
        fn name(&self) -> &str {
            "test-backend"
        }

        fn connect(&mut self, _: &CStr, _: InstanceId, _: &[EventRegistration]) -> Option<SessionToken> {
            if !self.accept {
                return None;
            }
            SessionToken::from_raw(ptr::addr_of_mut!(*self.marker).cast())
        }

        fn disconnect(&mut self, _session: SessionToken) -> Option<c_int> {
            let code = self.bump(&self.counters.disconnects)?;
            Some(if self.fail_disconnect { -1 } else { code })
        }

        fn acquire(&mut self, _session: SessionToken) -> Option<c_int> {
            self.bump(&self.counters.acquires)
        }

        fn release(&mut self, _session: SessionToken) -> Option<c_int> {
            self.bump(&self.counters.releases).map(|_| -1)
        }

        fn restart(
            &mut self,
            _session: SessionToken,
            _cause: RestartCause,
            info: Option<&DebugInfo>,
        ) -> Option<c_int> {
            let code = self.bump(&self.counters.restarts)?;
            if info.is_some() {
                self.counters.restarts_with_info.fetch_add(1, Ordering::SeqCst);
            }
            Some(code)
        }

        fn ack_cold_reset(&mut self, _session: SessionToken) -> Option<c_int> {
            self.bump(&self.counters.acks)
        }
    }

    impl Drop for TestBackend {
        fn drop(&mut self) {
            self.counters.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestLoader {
        counters: Arc<Counters>,
        accept: bool,
        full: bool,
        fail_disconnect: bool,
    }

    impl BackendLoader for TestLoader {
        fn load(&self, _source: &BackendSource) -> MdmResult<Box<dyn ModemBackend>> {
            self.counters.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TestBackend {
                counters: Arc::clone(&self.counters),
                accept: self.accept,
                full: self.full,
                fail_disconnect: self.fail_disconnect,
                marker: Box::new(0),
            }))
        }
    }

    struct CountingSource(AtomicUsize);

    impl ConfigSource for CountingSource {
        fn load(&self) -> Result<PlatformConfig, ConfigError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(PlatformConfig::default())
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn connector(accept: bool, full: bool) -> (Connector, Arc<Counters>) {
        test_connector(accept, full, false)
    }

    fn test_connector(accept: bool, full: bool, fail_disconnect: bool) -> (Connector, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let loader = TestLoader {
            counters: Arc::clone(&counters),
            accept,
            full,
            fail_disconnect,
        };
        let connector = Connector::new(
            BackendLocator::new(Arc::new(Unavailable)),
            Arc::new(loader),
        );
        (connector, counters)
    }

    unsafe extern "C" fn noop(_data: *const CallbackData) -> c_int {
        0
    }

    #[test]
    fn test_connect_disconnect_releases_image_once() {
        let (connector, counters) = connector(true, true);
        let client = connector.connect("app", InstanceId::DEFAULT, vec![]).unwrap();
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(Counters::get(&counters.drops), 0);

        client.disconnect().unwrap();
        assert_eq!(Counters::get(&counters.loads), 1);
        assert_eq!(Counters::get(&counters.disconnects), 1);
        assert_eq!(Counters::get(&counters.drops), 1);
    }

    #[test]
    fn test_drop_tears_down_once() {
        let (connector, counters) = connector(true, true);
        drop(connector.connect("app", InstanceId::DEFAULT, vec![]).unwrap());
        assert_eq!(Counters::get(&counters.disconnects), 1);
        assert_eq!(Counters::get(&counters.drops), 1);
    }

    #[test]
    fn test_rejected_connect_releases_image() {
        let (connector, counters) = connector(false, true);
        let err = connector
            .connect("app", InstanceId::DEFAULT, vec![])
            .unwrap_err();
        assert!(matches!(err, MdmError::BackendRejected { .. }));
        assert_eq!(Counters::get(&counters.loads), 1);
        assert_eq!(Counters::get(&counters.drops), 1);
        assert_eq!(Counters::get(&counters.disconnects), 0);
    }

    #[test]
    fn test_unsupported_operations_have_no_side_effects() {
        let (connector, counters) = connector(true, false);
        let mut client = connector.connect("app", InstanceId::DEFAULT, vec![]).unwrap();

        let info = DebugInfo::from_causes(DebugType::Apimr, ["boom"]).unwrap();
        let outcomes = [
            (Operation::Acquire, client.acquire()),
            (Operation::Release, client.release()),
            (Operation::Restart, client.restart(RestartCause::Error, Some(&info))),
            (Operation::Shutdown, client.shutdown()),
            (Operation::NvmBackup, client.nvm_backup()),
            (Operation::AckColdReset, client.ack_cold_reset()),
            (Operation::AckShutdown, client.ack_shutdown()),
            (Operation::NotifyDebug, client.notify_debug(Some(&info))),
        ];
        for (expected, outcome) in outcomes {
            assert!(
                matches!(outcome, Err(MdmError::Unsupported { operation }) if operation == expected),
                "{expected} should be unsupported"
            );
        }
        assert_eq!(Counters::get(&counters.acquires), 0);
        assert_eq!(Counters::get(&counters.releases), 0);
        assert_eq!(Counters::get(&counters.restarts), 0);
        assert_eq!(Counters::get(&counters.restarts_with_info), 0);
        assert_eq!(Counters::get(&counters.acks), 0);

        // Session still usable; unbound disconnect is not an error.
        assert_eq!(client.state(), ClientState::Connected);
        client.disconnect().unwrap();
        assert_eq!(Counters::get(&counters.drops), 1);
    }

    #[test]
    fn test_failed_disconnect_still_releases_image() {
        let (connector, counters) = test_connector(true, true, true);
        let client = connector.connect("app", InstanceId::DEFAULT, vec![]).unwrap();

        let err = client.disconnect().unwrap_err();
        assert!(matches!(
            err,
            MdmError::BackendFailed {
                operation: Operation::Disconnect,
                code: -1
            }
        ));
        assert_eq!(Counters::get(&counters.disconnects), 1);
        assert_eq!(Counters::get(&counters.drops), 1);
    }

    #[test]
    fn test_failed_disconnect_on_drop_releases_image_once() {
        let (connector, counters) = test_connector(true, true, true);
        drop(connector.connect("app", InstanceId::DEFAULT, vec![]).unwrap());
        assert_eq!(Counters::get(&counters.disconnects), 1);
        assert_eq!(Counters::get(&counters.drops), 1);
    }

    #[test]
    fn test_backend_failure_is_reported() {
        let (connector, _) = connector(true, true);
        let mut client = connector.connect("app", InstanceId::DEFAULT, vec![]).unwrap();
        let err = client.release().unwrap_err();
        assert!(matches!(err, MdmError::BackendFailed { code: -1, .. }));
        assert!(err.is_recoverable());
        client.acquire().unwrap();
    }

    #[test]
    fn test_apply_update_forwards_no_debug_info() {
        let (connector, counters) = connector(true, true);
        let mut client = connector.connect("app", InstanceId::DEFAULT, vec![]).unwrap();
        let info = DebugInfo::from_causes(DebugType::Apimr, ["boom"]).unwrap();

        client.restart(RestartCause::ApplyUpdate, Some(&info)).unwrap();
        assert_eq!(Counters::get(&counters.restarts), 1);
        assert_eq!(Counters::get(&counters.restarts_with_info), 0);

        client.restart(RestartCause::Error, Some(&info)).unwrap();
        assert_eq!(Counters::get(&counters.restarts_with_info), 1);
    }

    #[test]
    fn test_acknowledge_is_a_plain_forward() {
        let (connector, counters) = connector(true, true);
        let mut client = connector.connect("app", InstanceId::DEFAULT, vec![]).unwrap();
        client.acknowledge(EventKind::ColdReset).unwrap();
        assert_eq!(Counters::get(&counters.acks), 1);
        assert!(matches!(
            client.acknowledge(EventKind::Up),
            Err(MdmError::InvalidArgument { .. })
        ));
        assert_eq!(Counters::get(&counters.acks), 1);
    }

    #[test]
    fn test_invalid_name_touches_nothing() {
        let counters = Arc::new(Counters::default());
        let source = Arc::new(CountingSource(AtomicUsize::new(0)));
        let connector = Connector::new(
            BackendLocator::new(source.clone()),
            Arc::new(TestLoader {
                counters: Arc::clone(&counters),
                accept: true,
                full: true,
                fail_disconnect: false,
            }),
        );

        let long = "x".repeat(NAME_LEN);
        for name in ["", "a\0b", long.as_str()] {
            let err = connector.connect(name, InstanceId::DEFAULT, vec![]).unwrap_err();
            assert!(matches!(err, MdmError::InvalidArgument { .. }));
        }
        assert_eq!(source.0.load(Ordering::SeqCst), 0);
        assert_eq!(Counters::get(&counters.loads), 0);

        let longest = "x".repeat(NAME_LEN - 1);
        connector.connect(&longest, InstanceId::DEFAULT, vec![]).unwrap();
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_list_is_validated() {
        let (connector, counters) = connector(true, true);
        let up = EventRegistration::new(EventKind::Up, noop, ptr::null_mut());
        let down = EventRegistration::new(EventKind::Down, noop, ptr::null_mut());

        let duplicate = connector.connect("app", InstanceId::DEFAULT, vec![up, down, up]);
        assert!(matches!(duplicate, Err(MdmError::InvalidArgument { .. })));

        let unknown = EventRegistration {
            id: 42,
            callback: Some(noop),
            context: ptr::null_mut(),
        };
        assert!(connector.connect("app", InstanceId::DEFAULT, vec![unknown]).is_err());

        let no_callback = EventRegistration {
            id: EventKind::Up.as_raw(),
            callback: None,
            context: ptr::null_mut::<c_void>(),
        };
        assert!(connector.connect("app", InstanceId::DEFAULT, vec![no_callback]).is_err());
        assert_eq!(Counters::get(&counters.loads), 0);

        let client = connector.connect("app", InstanceId::DEFAULT, vec![up, down]).unwrap();
        assert_eq!(client.registrations().len(), 2);
    }

    #[test]
    fn test_raw_instance_must_fit_c_int() {
        for raw in [0, -1, i64::from(i32::MAX) + 1] {
            assert!(matches!(
                ModemClient::connect("app", raw, vec![]),
                Err(MdmError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn test_unmatched_instance_uses_diagnostic_backend() {
        let config = PlatformConfig {
            modem_type: ModemType::Xmm,
            modems: vec![ModemInfo {
                name: None,
                libs: vec![LibraryEntry::new("crashlog", "libcrash.so")],
            }],
        };
        let connector = Connector::new(
            BackendLocator::new(Arc::new(StaticSource(config))),
            Arc::new(DynamicLoader),
        );

        let mut client = connector.connect("app", InstanceId::DEFAULT, vec![]).unwrap();
        assert_eq!(client.backend_name(), crate::locator::DIAGNOSTIC_BACKEND);
        client.acquire().unwrap();
        client.restart(RestartCause::Error, None).unwrap();
        client.release().unwrap();
        client.disconnect().unwrap();
    }
}
