//! # mdm-types
//!
//! Core type definitions for the modem client facade.
//!
//! This crate provides the vocabulary shared by the facade, its backends and
//! the command-line tool:
//! - Modem instance identifiers and client lifecycle states
//! - Event kinds and the C layout used to register and deliver events
//! - Debug information records attached to restart and notify requests
//! - Restart causes

pub mod debug;
pub mod event;
pub mod ids;

pub use debug::*;
pub use event::*;
pub use ids::*;

/// Maximum length of a client name in bytes, including the C terminator.
pub const NAME_LEN: usize = 64;
