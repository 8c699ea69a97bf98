//! # wecard_core
//!
//! Credential and webhook protocol engine for WeCard: callback crypto, the
//! suite/tenant token lifecycle, event dispatch, permission resolution and
//! session tokens.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod events;
pub mod exchanger;
pub mod migrate;
pub mod models;
pub mod permission;
pub mod profile;
pub mod session;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
