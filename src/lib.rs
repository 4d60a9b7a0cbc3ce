#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # netresolv
//!
//! Layered DNS resolver configuration daemon.
//!
//! This library holds the daemon's CLI and configuration and re-exports the
//! workspace crates for convenience.

pub use netresolv_reconciler;
pub use netresolv_resources;

pub mod cli;
pub mod config;
pub mod daemon;
