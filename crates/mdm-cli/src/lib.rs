//! # mdm-cli
//!
//! Client-side facade for the modem management service.
//!
//! Applications control a shared modem through a backend library chosen at
//! runtime from host configuration. This crate handles:
//!
//! - Backend resolution from the per-instance library list
//! - Dynamic loading with `libloading` and entry-point binding
//! - Call forwarding with a single rule for optional capabilities
//! - Fallback to an in-process diagnostic backend
//! - Event relay into the caller's own thread
//!
//! # Safety
//!
//! Backends are native code. The facade only checks that entry points
//! exist; it cannot check what they do. A [`ModemClient`] is `Send` but not
//! `Sync`: every operation takes `&mut self` and `disconnect` consumes the
//! handle, so the loaded library is always released exactly once.

pub mod backend;
pub mod diagnostic;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod locator;
pub mod monitor;

pub use backend::{ModemBackend, Operation, SessionToken};
pub use diagnostic::DiagnosticBackend;
pub use error::{status_code, MdmError, MdmResult};
pub use lifecycle::{Connector, ModemClient};
pub use loader::{BackendLoader, DynamicBackend, DynamicLoader, OperationTable};
pub use locator::{BackendLocator, BackendSource, CLIENT_LIBRARY_TAG, DIAGNOSTIC_BACKEND};
pub use monitor::{AckMode, ModemEvent, ModemMonitor, MonitorOptions, RetryPolicy};

pub use mdm_types::{
    ClientState, DebugInfo, DebugType, EventKind, EventRegistration, InstanceId, RestartCause,
};
