//! idlelockd - locks the user session after a period of inactivity.
//!
//! The [`engine::IdleLockEngine`] turns idle samples and session lock/unlock
//! notifications into lock decisions. The host side is X11 for idle sampling
//! and systemd-logind for session state and locking.

pub mod config;
pub mod domain;
pub mod engine;
pub mod idle;
pub mod session;
pub mod settings;
