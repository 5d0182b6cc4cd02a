//! Modem instance identifiers and client lifecycle states.

use serde::{Deserialize, Serialize};
use std::ffi::c_int;
use std::fmt;
use std::num::NonZeroU32;

/// Identifier of a modem management instance.
///
/// Instances are numbered from 1 and cross the backend boundary as a C
/// `int`, so the largest id is `i32::MAX`. Single-modem platforms use
/// [`InstanceId::DEFAULT`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct InstanceId(NonZeroU32);

impl InstanceId {
    /// The instance used on single-modem platforms.
    pub const DEFAULT: Self = Self(NonZeroU32::MIN);

    /// Create an instance id, rejecting values outside `1..=i32::MAX`.
    pub fn new(raw: i64) -> Option<Self> {
        c_int::try_from(raw)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .and_then(NonZeroU32::new)
            .map(Self)
    }

    /// The 1-based value passed across the backend boundary.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The value as passed to a backend's connect entry point.
    pub fn as_raw(self) -> c_int {
        // Bounded to i32::MAX by construction.
        self.0.get() as c_int
    }

    /// Zero-based position of this instance in the host configuration.
    pub fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for InstanceId {
    type Error = String;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("instance id must be in 1..={}, got {raw}", c_int::MAX))
    }
}

impl From<InstanceId> for u32 {
    fn from(id: InstanceId) -> Self {
        id.get()
    }
}

/// Lifecycle state of a client handle.
///
/// `Connecting` only exists inside the connect sequence; callers only ever
/// observe `Connected` or `Disconnected` on a handle they hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// No connect attempted yet.
    Unconnected,
    /// Locator, loader and backend connect are running.
    Connecting,
    /// Backend session established.
    Connected,
    /// Torn down. Terminal.
    Disconnected,
}

impl ClientState {
    /// Whether operations may be forwarded in this state.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}
