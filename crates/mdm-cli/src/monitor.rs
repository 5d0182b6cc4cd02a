//! Event relay and status tracking on top of a [`ModemClient`].
//!
//! Backends deliver events from their own threads. The monitor registers a
//! C-ABI trampoline whose context is a channel sender, so events are queued
//! by the backend thread and consumed wherever the monitor lives.

use crate::error::{MdmError, MdmResult};
use crate::lifecycle::{Connector, ModemClient};
use crossbeam::channel::{self, Receiver, Sender};
use mdm_types::{
    Acknowledgement, CallbackData, DebugInfo, DebugType, EventKind, EventRegistration, InstanceId,
    RawDebugInfo, RestartCause,
};
use serde::Serialize;
use std::ffi::{c_int, c_void};
use std::mem::size_of;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Bounded connect retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connect attempts, at least one.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. `f` receives the 1-based attempt number.
    pub fn run<T, F>(&self, mut f: F) -> MdmResult<T>
    where
        F: FnMut(u32) -> MdmResult<T>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match f(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= attempts => {
                    if attempts == 1 {
                        return Err(e);
                    }
                    return Err(MdmError::RetriesExhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Connect failed, retrying");
                    std::thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// How the relay answers acknowledge-required events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge from the callback itself.
    #[default]
    Immediate,
    /// Defer; the caller acknowledges later with [`ModemMonitor::acknowledge`].
    Deferred,
}

impl AckMode {
    fn answer(self) -> Acknowledgement {
        match self {
            Self::Immediate => Acknowledgement::Immediate,
            Self::Deferred => Acknowledgement::Deferred,
        }
    }
}

/// Settings for [`ModemMonitor::connect`].
#[derive(Clone, Debug)]
pub struct MonitorOptions {
    pub instance: InstanceId,
    /// Events to subscribe to. Duplicates are ignored.
    pub events: Vec<EventKind>,
    pub retry: RetryPolicy,
    pub ack_mode: AckMode,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            instance: InstanceId::DEFAULT,
            events: EventKind::ALL.to_vec(),
            retry: RetryPolicy::default(),
            ack_mode: AckMode::default(),
        }
    }
}

/// One event received from the backend.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModemEvent {
    pub kind: EventKind,
    /// Payload of [`EventKind::DebugInfo`] events, when the backend sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
}

impl ModemEvent {
    /// Whether this event reports a modem status.
    pub fn is_status(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Down | EventKind::On | EventKind::Up | EventKind::OutOfService
        )
    }
}

struct RelayContext {
    sender: Sender<ModemEvent>,
    ack_mode: AckMode,
}

/// Callback registered for every subscribed event.
///
/// Never unwinds into the backend; a malformed record is dropped and
/// answered with 0. A DEBUG_INFO payload is decoded only when `data_size`
/// covers a whole debug information record.
unsafe extern "C" fn relay_event(data: *const CallbackData) -> c_int {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the backend passes a record valid for the call, whose
        // context is the `RelayContext` registered by the monitor.
        let data = unsafe { data.as_ref() }?;
        let kind = data.event()?;
        let relay = unsafe { data.context.cast::<RelayContext>().as_ref() }?;

        let debug_info = if kind != EventKind::DebugInfo || data.data.is_null() {
            None
        } else if data.data_size < size_of::<RawDebugInfo>() {
            tracing::warn!(
                data_size = data.data_size,
                expected = size_of::<RawDebugInfo>(),
                "Dropping undersized debug info payload"
            );
            None
        } else {
            // SAFETY: non-null and at least one record long.
            match unsafe { DebugInfo::from_raw(&*data.data.cast::<RawDebugInfo>()) } {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed debug info payload");
                    None
                }
            }
        };

        if relay.sender.send(ModemEvent { kind, debug_info }).is_err() {
            tracing::warn!(event = %kind, "Event relay closed, dropping event");
        }

        Some(
            Acknowledgement::from_return_code(kind, relay.ack_mode.answer().return_code())
                .map_or(0, Acknowledgement::return_code),
        )
    }));

    match result {
        Ok(Some(code)) => code,
        Ok(None) => 0,
        Err(_) => {
            tracing::error!("Panic while relaying modem event");
            0
        }
    }
}

/// A connected client plus an event relay.
///
/// Tracks the last reported modem status and the acknowledge-required
/// events still waiting for an acknowledgment.
pub struct ModemMonitor {
    client: Option<ModemClient>,
    events: Receiver<ModemEvent>,
    // Must outlive the client: the backend holds a pointer to it.
    relay: Box<RelayContext>,
    status: Option<EventKind>,
    pending_acks: Vec<EventKind>,
}

impl ModemMonitor {
    /// Connect `client_name` and subscribe to `options.events`.
    pub fn connect(
        connector: &Connector,
        client_name: &str,
        options: &MonitorOptions,
    ) -> MdmResult<Self> {
        let (sender, events) = channel::unbounded();
        let relay = Box::new(RelayContext {
            sender,
            ack_mode: options.ack_mode,
        });
        let context = (&*relay as *const RelayContext).cast_mut().cast::<c_void>();

        let mut kinds: Vec<EventKind> = Vec::with_capacity(options.events.len());
        for kind in &options.events {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        let registrations: Vec<EventRegistration> = kinds
            .iter()
            .map(|kind| EventRegistration::new(*kind, relay_event, context))
            .collect();

        let client = options.retry.run(|attempt| {
            tracing::debug!(client = client_name, attempt, "Connecting monitor");
            connector.connect(client_name, options.instance, registrations.clone())
        })?;

        tracing::info!(
            client = client_name,
            events = ?kinds,
            ack_mode = ?options.ack_mode,
            "Monitoring modem"
        );

        Ok(Self {
            client: Some(client),
            events,
            relay,
            status: None,
            pending_acks: Vec::new(),
        })
    }

    /// The underlying client, `None` after disconnect.
    pub fn client(&self) -> Option<&ModemClient> {
        self.client.as_ref()
    }

    /// Last modem status received.
    pub fn status(&self) -> Option<EventKind> {
        self.status
    }

    /// Acknowledge-required events not yet acknowledged.
    pub fn pending_acks(&self) -> &[EventKind] {
        &self.pending_acks
    }

    fn observe(&mut self, event: &ModemEvent) {
        if event.is_status() {
            self.status = Some(event.kind);
        }
        if event.kind.requires_ack()
            && self.relay.ack_mode == AckMode::Deferred
            && !self.pending_acks.contains(&event.kind)
        {
            self.pending_acks.push(event.kind);
        }
        tracing::debug!(event = %event.kind, "Modem event");
    }

    // The monitor owns the relay's sender, so the channel never
    // disconnects while `self` is alive; an error here is a timeout.

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<ModemEvent> {
        let event = self.events.recv_timeout(timeout).ok()?;
        self.observe(&event);
        Some(event)
    }

    /// Next queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<ModemEvent> {
        let event = self.events.try_recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    /// Consume events until the modem reports `status` or `timeout` passes.
    ///
    /// Returns whether the status was reached.
    pub fn wait_for_status(&mut self, status: EventKind, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.status != Some(status) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.recv_timeout(remaining).is_none() {
                return false;
            }
        }
        true
    }

    fn client_mut(&mut self) -> MdmResult<&mut ModemClient> {
        self.client.as_mut().ok_or(MdmError::NotConnected)
    }

    pub fn acquire(&mut self) -> MdmResult<()> {
        self.client_mut()?.acquire()
    }

    pub fn release(&mut self) -> MdmResult<()> {
        self.client_mut()?.release()
    }

    /// Restart the modem after an application-detected failure.
    ///
    /// At most [`mdm_types::MAX_NB_DATA`] causes are kept.
    pub fn reset<I, S>(&mut self, causes: I, ap_logs: i32, bp_logs: i32, bp_time: i32) -> MdmResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let info = DebugInfo::from_causes(DebugType::Apimr, causes)?.with_logs(ap_logs, bp_logs, bp_time);
        self.client_mut()?.restart(RestartCause::Error, Some(&info))
    }

    /// Restart the modem to apply a firmware update.
    pub fn update(&mut self) -> MdmResult<()> {
        self.client_mut()?.restart(RestartCause::ApplyUpdate, None)
    }

    /// Pass debug information to the modem service.
    pub fn notify_debug_info<I, S>(
        &mut self,
        kind: DebugType,
        causes: I,
        ap_logs: i32,
        bp_logs: i32,
        bp_time: i32,
    ) -> MdmResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let info = DebugInfo::from_causes(kind, causes)?.with_logs(ap_logs, bp_logs, bp_time);
        self.client_mut()?.notify_debug(Some(&info))
    }

    pub fn shutdown(&mut self) -> MdmResult<()> {
        self.client_mut()?.shutdown()
    }

    pub fn nvm_backup(&mut self) -> MdmResult<()> {
        self.client_mut()?.nvm_backup()
    }

    /// Acknowledge a deferred cold reset or shutdown.
    pub fn acknowledge(&mut self, kind: EventKind) -> MdmResult<()> {
        self.client_mut()?.acknowledge(kind)?;
        self.pending_acks.retain(|pending| *pending != kind);
        Ok(())
    }

    /// Disconnect the client. Queued events stay readable until the monitor
    /// is dropped.
    pub fn disconnect(&mut self) -> MdmResult<()> {
        match self.client.take() {
            Some(client) => client.disconnect(),
            None => Ok(()),
        }
    }
}

impl Drop for ModemMonitor {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            tracing::warn!(error = %e, "Error while disconnecting dropped monitor");
        }
    }
}
