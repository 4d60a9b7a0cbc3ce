//! Resource store trait and implementations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use crate::error::{Result, StoreError};
use crate::types::{EventKind, Metadata, Phase, RawResource, ResourceEvent, ResourceKey};

/// Default capacity of the change notification channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Transformation applied to a spec body by [`ResourceStore::modify`].
///
/// Receives `Value::Null` when the resource does not exist yet.
pub type Mutator = Box<dyn FnOnce(&mut Value) -> Result<()> + Send>;

/// Trait for resource storage backends.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List resources of a type within a namespace, ordered by id.
    async fn list(&self, namespace: &str, resource_type: &str) -> Result<Vec<RawResource>>;

    /// Get a single resource.
    async fn get(&self, key: &ResourceKey) -> Result<RawResource>;

    /// Subscribe to change notifications.
    fn watch(&self) -> broadcast::Receiver<ResourceEvent>;

    /// Create a resource that must not exist yet.
    async fn create(&self, key: &ResourceKey, owner: Option<&str>, spec: Value)
        -> Result<Metadata>;

    /// Replace a resource's spec if its version still matches.
    async fn update(
        &self,
        key: &ResourceKey,
        owner: Option<&str>,
        expected_version: u64,
        spec: Value,
    ) -> Result<Metadata>;

    /// Atomically create or modify a resource with a transformation.
    async fn modify(&self, key: &ResourceKey, owner: Option<&str>, mutator: Mutator)
        -> Result<Metadata>;

    /// Mark a resource for removal.
    ///
    /// Returns `true` once no finalizers hold the resource.
    async fn teardown(&self, key: &ResourceKey, owner: Option<&str>) -> Result<bool>;

    /// Remove a resource for good.
    ///
    /// Only a resource that was torn down and is no longer held by finalizers
    /// can be destroyed.
    async fn destroy(&self, key: &ResourceKey, owner: Option<&str>) -> Result<()>;

    /// Attach a finalizer on behalf of a dependent.
    async fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<Metadata>;

    /// Release a finalizer.
    async fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<Metadata>;
}

fn check_owner(metadata: &Metadata, owner: Option<&str>) -> Result<()> {
    if metadata.owner.as_deref() == owner {
        return Ok(());
    }
    Err(StoreError::OwnerConflict {
        key: metadata.key.clone(),
        owner: metadata.owner.clone().unwrap_or_default(),
        requested_by: owner.unwrap_or_default().to_string(),
    })
}

fn check_running(metadata: &Metadata) -> Result<()> {
    match metadata.phase {
        Phase::Running => Ok(()),
        Phase::TearingDown => Err(StoreError::phase_conflict(&metadata.key, Phase::TearingDown)),
    }
}

/// In-memory resource store.
pub struct InMemoryResourceStore {
    resources: RwLock<BTreeMap<ResourceKey, RawResource>>,
    events: broadcast::Sender<ResourceEvent>,
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl InMemoryResourceStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose notification channel holds `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            resources: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Create a new in-memory store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn publish(&self, kind: EventKind, resource: RawResource) {
        // No subscribers is not an error.
        let _ = self.events.send(ResourceEvent { kind, resource });
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn list(&self, namespace: &str, resource_type: &str) -> Result<Vec<RawResource>> {
        let resources = self.resources.read().await;
        Ok(resources
            .iter()
            .filter(|(key, _)| key.matches(namespace, resource_type))
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    async fn get(&self, key: &ResourceKey) -> Result<RawResource> {
        let resources = self.resources.read().await;
        resources
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn watch(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe()
    }

    async fn create(
        &self,
        key: &ResourceKey,
        owner: Option<&str>,
        spec: Value,
    ) -> Result<Metadata> {
        let mut resources = self.resources.write().await;
        if resources.contains_key(key) {
            return Err(StoreError::AlreadyExists { key: key.clone() });
        }

        let resource = RawResource {
            metadata: Metadata::new(key.clone(), owner.map(str::to_owned)),
            spec,
        };
        resources.insert(key.clone(), resource.clone());
        let metadata = resource.metadata.clone();
        self.publish(EventKind::Created, resource);
        Ok(metadata)
    }

    async fn update(
        &self,
        key: &ResourceKey,
        owner: Option<&str>,
        expected_version: u64,
        spec: Value,
    ) -> Result<Metadata> {
        let mut resources = self.resources.write().await;
        let existing = resources
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        check_owner(&existing.metadata, owner)?;
        check_running(&existing.metadata)?;
        if existing.metadata.version != expected_version {
            return Err(StoreError::VersionConflict {
                key: key.clone(),
                expected: expected_version,
                found: existing.metadata.version,
            });
        }

        if existing.spec != spec {
            existing.spec = spec;
            existing.metadata.bump();
            self.publish(EventKind::Updated, existing.clone());
        }
        Ok(existing.metadata.clone())
    }

    async fn modify(
        &self,
        key: &ResourceKey,
        owner: Option<&str>,
        mutator: Mutator,
    ) -> Result<Metadata> {
        let mut resources = self.resources.write().await;

        if let Some(existing) = resources.get_mut(key) {
            check_owner(&existing.metadata, owner)?;
            check_running(&existing.metadata)?;

            let mut spec = existing.spec.clone();
            mutator(&mut spec)?;
            if spec != existing.spec {
                existing.spec = spec;
                existing.metadata.bump();
                self.publish(EventKind::Updated, existing.clone());
            }
            return Ok(existing.metadata.clone());
        }

        let mut spec = Value::Null;
        mutator(&mut spec)?;
        let resource = RawResource {
            metadata: Metadata::new(key.clone(), owner.map(str::to_owned)),
            spec,
        };
        resources.insert(key.clone(), resource.clone());
        let metadata = resource.metadata.clone();
        self.publish(EventKind::Created, resource);
        Ok(metadata)
    }

    async fn teardown(&self, key: &ResourceKey, owner: Option<&str>) -> Result<bool> {
        let mut resources = self.resources.write().await;
        let existing = resources
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        check_owner(&existing.metadata, owner)?;
        if existing.metadata.phase == Phase::Running {
            existing.metadata.phase = Phase::TearingDown;
            existing.metadata.bump();
            self.publish(EventKind::Updated, existing.clone());
        }
        Ok(existing.metadata.finalizers.is_empty())
    }

    async fn destroy(&self, key: &ResourceKey, owner: Option<&str>) -> Result<()> {
        let mut resources = self.resources.write().await;
        let existing = resources
            .get(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        check_owner(&existing.metadata, owner)?;
        if existing.metadata.phase != Phase::TearingDown {
            return Err(StoreError::phase_conflict(key, existing.metadata.phase));
        }
        if !existing.metadata.finalizers.is_empty() {
            return Err(StoreError::FinalizersPending {
                key: key.clone(),
                finalizers: existing.metadata.finalizers.iter().cloned().collect(),
            });
        }

        if let Some(removed) = resources.remove(key) {
            self.publish(EventKind::Destroyed, removed);
        }
        Ok(())
    }

    async fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<Metadata> {
        let mut resources = self.resources.write().await;
        let existing = resources
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        check_running(&existing.metadata)?;
        if existing.metadata.finalizers.insert(finalizer.to_string()) {
            existing.metadata.bump();
            self.publish(EventKind::Updated, existing.clone());
        }
        Ok(existing.metadata.clone())
    }

    async fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<Metadata> {
        let mut resources = self.resources.write().await;
        let existing = resources
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        if existing.metadata.finalizers.remove(finalizer) {
            existing.metadata.bump();
            self.publish(EventKind::Updated, existing.clone());
        }
        Ok(existing.metadata.clone())
    }
}

/// A wrapper that adds tracing to a resource store.
pub struct TracingResourceStore<S: ResourceStore> {
    inner: S,
}

impl<S: ResourceStore> TracingResourceStore<S> {
    /// Create a new tracing resource store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Get the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ResourceStore> ResourceStore for TracingResourceStore<S> {
    async fn list(&self, namespace: &str, resource_type: &str) -> Result<Vec<RawResource>> {
        let result = self.inner.list(namespace, resource_type).await;
        if let Ok(ref items) = result {
            tracing::trace!(namespace, resource_type, count = items.len(), "Listed resources");
        }
        result
    }

    async fn get(&self, key: &ResourceKey) -> Result<RawResource> {
        tracing::trace!(key = %key, "Getting resource");
        self.inner.get(key).await
    }

    fn watch(&self) -> broadcast::Receiver<ResourceEvent> {
        self.inner.watch()
    }

    async fn create(
        &self,
        key: &ResourceKey,
        owner: Option<&str>,
        spec: Value,
    ) -> Result<Metadata> {
        tracing::debug!(key = %key, owner = ?owner, "Creating resource");
        self.inner.create(key, owner, spec).await
    }

    async fn update(
        &self,
        key: &ResourceKey,
        owner: Option<&str>,
        expected_version: u64,
        spec: Value,
    ) -> Result<Metadata> {
        tracing::debug!(key = %key, owner = ?owner, expected_version, "Updating resource");
        self.inner.update(key, owner, expected_version, spec).await
    }

    async fn modify(
        &self,
        key: &ResourceKey,
        owner: Option<&str>,
        mutator: Mutator,
    ) -> Result<Metadata> {
        let result = self.inner.modify(key, owner, mutator).await;
        match &result {
            Ok(metadata) => {
                tracing::debug!(key = %key, version = metadata.version, "Modified resource");
            }
            Err(e) => tracing::debug!(key = %key, error = %e, "Modify rejected"),
        }
        result
    }

    async fn teardown(&self, key: &ResourceKey, owner: Option<&str>) -> Result<bool> {
        let result = self.inner.teardown(key, owner).await;
        if let Ok(ready) = result {
            tracing::debug!(key = %key, ready, "Tore down resource");
        }
        result
    }

    async fn destroy(&self, key: &ResourceKey, owner: Option<&str>) -> Result<()> {
        tracing::debug!(key = %key, owner = ?owner, "Destroying resource");
        self.inner.destroy(key, owner).await
    }

    async fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<Metadata> {
        tracing::debug!(key = %key, finalizer, "Adding finalizer");
        self.inner.add_finalizer(key, finalizer).await
    }

    async fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<Metadata> {
        tracing::debug!(key = %key, finalizer, "Removing finalizer");
        self.inner.remove_finalizer(key, finalizer).await
    }
}
