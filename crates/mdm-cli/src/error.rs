//! Error types for facade operations.

use crate::backend::Operation;
use mdm_types::DebugInfoError;
use std::ffi::c_int;
use thiserror::Error;

/// Errors that can occur while connecting to or driving a backend.
#[derive(Debug, Error)]
pub enum MdmError {
    /// Caller passed an argument the facade refuses before acquiring anything.
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    /// Failed to open the backend library.
    #[error("Failed to load backend '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: libloading::Error,
    },

    /// Backend library has no connect entry point.
    #[error("Entry point '{symbol}' not found in backend '{path}'")]
    SymbolNotFound { symbol: String, path: String },

    /// Backend connect returned no session.
    #[error("Backend '{backend}' rejected client '{client}'")]
    BackendRejected { backend: String, client: String },

    /// The backend does not implement this operation.
    #[error("Operation '{operation}' not supported by backend")]
    Unsupported { operation: Operation },

    /// The backend implements the operation but reported failure.
    #[error("Operation '{operation}' failed with code {code}")]
    BackendFailed { operation: Operation, code: c_int },

    /// The handle has no live backend session.
    #[error("Client is not connected")]
    NotConnected,

    /// Debug information could not be built.
    #[error("Invalid debug info: {0}")]
    DebugInfo(#[from] DebugInfoError),

    /// Every connect attempt allowed by the retry policy failed.
    #[error("Connect failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<MdmError>,
    },
}

impl MdmError {
    /// Create an invalid argument error.
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a load error.
    pub fn load_error(path: impl Into<String>, source: libloading::Error) -> Self {
        Self::LoadError {
            path: path.into(),
            source,
        }
    }

    /// Create a symbol not found error.
    pub fn symbol_not_found(symbol: impl Into<String>, path: impl Into<String>) -> Self {
        Self::SymbolNotFound {
            symbol: symbol.into(),
            path: path.into(),
        }
    }

    /// Create a backend rejected error.
    pub fn backend_rejected(backend: impl Into<String>, client: impl Into<String>) -> Self {
        Self::BackendRejected {
            backend: backend.into(),
            client: client.into(),
        }
    }

    /// Map a backend return code for `operation`.
    pub fn check(operation: Operation, code: Option<c_int>) -> MdmResult<()> {
        match code {
            None => Err(Self::Unsupported { operation }),
            Some(0) => Ok(()),
            Some(code) => Err(Self::BackendFailed { operation, code }),
        }
    }

    /// Check if the backend library could not be used at all.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::LoadError { .. } | Self::SymbolNotFound { .. })
    }

    /// Check if the session stays usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Unsupported { .. } | Self::BackendFailed { .. } | Self::DebugInfo(_)
        )
    }

    /// Check if retrying the same connect could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LoadError { .. } | Self::SymbolNotFound { .. } | Self::BackendRejected { .. }
        )
    }
}

/// Result type for facade operations.
pub type MdmResult<T> = Result<T, MdmError>;

/// Two-valued status of an outcome: 0 on success, -1 on any failure.
pub fn status_code<T>(result: &MdmResult<T>) -> c_int {
    if result.is_ok() {
        0
    } else {
        -1
    }
}
