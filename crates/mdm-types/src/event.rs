//! Modem events and the C layout used to subscribe to them.
//!
//! Clients pass a list of [`EventRegistration`] entries once, at connect
//! time. The backend later invokes the registered callback with a
//! [`CallbackData`] record, possibly from one of its own threads.

use serde::{Deserialize, Serialize};
use std::ffi::{c_int, c_void};
use std::fmt;

/// Asynchronous notification categories delivered by the modem service.
///
/// Discriminants match the values exchanged with backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum EventKind {
    /// Modem not available (may still be powered).
    Down = 1,
    /// Modem powered on.
    On = 2,
    /// Modem running and usable.
    Up = 3,
    /// Modem out of service.
    OutOfService = 4,
    /// Cold reset pending. Requires acknowledgment.
    ColdReset = 5,
    /// Shutdown pending. Requires acknowledgment.
    Shutdown = 6,
    /// Pass-through debug information.
    DebugInfo = 7,
    /// TLV synchronization in progress.
    TlvSyncing = 8,
}

impl EventKind {
    /// Every event kind, in wire order.
    pub const ALL: [Self; 8] = [
        Self::Down,
        Self::On,
        Self::Up,
        Self::OutOfService,
        Self::ColdReset,
        Self::Shutdown,
        Self::DebugInfo,
        Self::TlvSyncing,
    ];

    /// Number of distinct event kinds. Upper bound of a registration list.
    pub const COUNT: usize = Self::ALL.len();

    /// Convert a raw wire value.
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_raw() == raw)
    }

    /// Raw wire value.
    pub fn as_raw(self) -> c_int {
        self as c_int
    }

    /// Whether the service waits for clients to acknowledge this event.
    pub fn requires_ack(self) -> bool {
        matches!(self, Self::ColdReset | Self::Shutdown)
    }

    /// Short upper-case name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Down => "DOWN",
            Self::On => "ON",
            Self::Up => "UP",
            Self::OutOfService => "OUT_OF_SERVICE",
            Self::ColdReset => "COLD_RESET",
            Self::Shutdown => "SHUTDOWN",
            Self::DebugInfo => "DEBUG_INFO",
            Self::TlvSyncing => "TLV_SYNCING",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<c_int> for EventKind {
    type Error = c_int;

    fn try_from(raw: c_int) -> Result<Self, Self::Error> {
        Self::from_raw(raw).ok_or(raw)
    }
}

/// How a client answered an acknowledge-required event.
///
/// A callback returning zero acknowledges immediately. Any other value
/// defers the acknowledgment: the client must later call the matching
/// acknowledge operation exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acknowledgement {
    Immediate,
    Deferred,
}

impl Acknowledgement {
    /// Interpret a callback return code.
    ///
    /// Returns `None` for events that carry no acknowledgment contract.
    pub fn from_return_code(kind: EventKind, code: c_int) -> Option<Self> {
        if !kind.requires_ack() {
            return None;
        }
        Some(if code == 0 { Self::Immediate } else { Self::Deferred })
    }

    /// Return code a callback should hand back to the backend.
    pub fn return_code(self) -> c_int {
        match self {
            Self::Immediate => 0,
            Self::Deferred => 1,
        }
    }
}

/// Record handed to an event callback.
///
/// `context` is the pointer supplied at registration. `data` points to a
/// payload whose type depends on the event (a debug information record for
/// [`EventKind::DebugInfo`]) and may be null.
#[repr(C)]
#[derive(Debug)]
pub struct CallbackData {
    pub id: c_int,
    pub context: *mut c_void,
    pub data_size: usize,
    pub data: *mut c_void,
}

impl CallbackData {
    /// Event carried by this record, if the id is known.
    pub fn event(&self) -> Option<EventKind> {
        EventKind::from_raw(self.id)
    }
}

/// Event callback signature.
pub type EventCallback = unsafe extern "C" fn(data: *const CallbackData) -> c_int;

/// One entry of the registration list passed at connect time.
///
/// The context pointer belongs to the caller; it is carried to the backend
/// untouched and never dereferenced or freed on this side.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EventRegistration {
    pub id: c_int,
    pub callback: Option<EventCallback>,
    pub context: *mut c_void,
}

impl EventRegistration {
    /// Subscribe `callback` to `kind`.
    pub fn new(kind: EventKind, callback: EventCallback, context: *mut c_void) -> Self {
        Self {
            id: kind.as_raw(),
            callback: Some(callback),
            context,
        }
    }

    /// Event this entry subscribes to, if the id is known.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_raw(self.id)
    }
}

// The context pointer is opaque and only ever round-tripped to the backend.
unsafe impl Send for EventRegistration {}
