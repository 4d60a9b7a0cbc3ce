//! Resolver merge controller.
//!
//! Several configuration layers each publish a `ResolverSpec` into the
//! `config` namespace. This crate reconciles them into the single
//! `operational/ResolverSpec/resolvers` resource:
//!
//! - **Merge**: layers are sorted ascending and folded by [`merge_resolver_specs`]
//! - **Lifecycle**: the output exists only while the merge yields DNS servers
//! - **Runtime**: input changes are coalesced into [`Notification`]s
//! - **Supervision**: a failed run loop is restarted with exponential backoff
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use netresolv_reconciler::{ResolverMergeController, Supervisor, SupervisorConfig};
//! use netresolv_resources::InMemoryResourceStore;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryResourceStore::new_arc();
//!     let supervisor = Supervisor::new(SupervisorConfig::default(), store);
//!     let shutdown = CancellationToken::new();
//!
//!     // Runs until `shutdown` is cancelled
//!     // supervisor.run(&ResolverMergeController::new(), shutdown).await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod merge;
pub mod runtime;
pub mod supervisor;

// Re-export main types
pub use controller::{Controller, Input, InputKind, Output, OutputKind, ResolverMergeController};
pub use error::{Error, Result};
pub use lifecycle::{Convergence, converge};
pub use merge::{merge_dns_servers, merge_resolver_specs, sort_by_layer};
pub use runtime::{ControllerRuntime, Notification, Runtime, list_typed, modify_typed};
pub use supervisor::{RestartBackoff, Supervisor, SupervisorConfig, calculate_backoff};
