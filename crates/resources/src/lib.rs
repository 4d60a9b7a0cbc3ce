//! Versioned resource store for network configuration.
//!
//! Resources are addressed by `(namespace, type, id)` and carry metadata the
//! store maintains on every write:
//!
//! - **Version**: bumped on every effective change, checked by [`ResourceStore::update`]
//! - **Owner**: the single writer allowed to modify, tear down or destroy the resource
//! - **Phase**: `Running`, or `TearingDown` once removal was requested
//! - **Finalizers**: dependents that must release the resource before it is destroyed
//!
//! Spec bodies are stored type-erased as JSON and decoded through
//! [`ResourceSpec`]. Every change is broadcast to [`ResourceStore::watch`]
//! subscribers.
//!
//! # Example
//!
//! ```ignore
//! use netresolv_resources::{
//!     ConfigLayer, InMemoryResourceStore, ResolverSpec, ResourceSpec, ResourceStore,
//!     layered_resolver_key,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryResourceStore::new();
//!     let mut events = store.watch();
//!
//!     let spec = ResolverSpec::new(ConfigLayer::Platform)
//!         .with_dns_servers(["1.1.1.1".parse().unwrap()]);
//!     store
//!         .create(&layered_resolver_key("platform"), None, spec.encode().unwrap())
//!         .await
//!         .unwrap();
//!
//!     let event = events.recv().await.unwrap();
//!     println!("{:?} {}", event.kind, event.key());
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod resolver;
pub mod store;
pub mod types;

// Re-export main types
pub use error::{Result, StoreError};
pub use resolver::{
    CONFIG_NAMESPACE, ConfigLayer, OPERATIONAL_NAMESPACE, RESOLVER_ID, RESOLVER_SPEC_TYPE,
    ResolverSpec, layered_resolver_key, merged_resolver_key,
};
pub use store::{
    DEFAULT_EVENT_CAPACITY, InMemoryResourceStore, Mutator, ResourceStore, TracingResourceStore,
};
pub use types::{
    EventKind, Metadata, Phase, RawResource, Resource, ResourceEvent, ResourceKey, ResourceSpec,
};
