//! Core resource model: keys, metadata, phases and typed views.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Composite identity of a resource: namespace, type and id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub resource_type: String,
    pub id: String,
}

impl ResourceKey {
    /// Create a new resource key.
    pub fn new(
        namespace: impl Into<String>,
        resource_type: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Check whether this key lives in the given namespace and type.
    pub fn matches(&self, namespace: &str, resource_type: &str) -> bool {
        self.namespace == namespace && self.resource_type == resource_type
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.resource_type, self.id)
    }
}

/// Lifecycle phase of a stored resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Normal operation, accepts writes.
    #[default]
    Running,
    /// Marked for removal; waits for finalizers before it can be destroyed.
    TearingDown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::TearingDown => write!(f, "tearing-down"),
        }
    }
}

/// Resource metadata tracked by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: ResourceKey,
    /// Bumped on every effective change.
    pub version: u64,
    /// Writer that owns the resource, if any.
    pub owner: Option<String>,
    pub phase: Phase,
    /// Dependents that must release the resource before it can be destroyed.
    pub finalizers: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Metadata {
    /// Create metadata for a freshly created resource.
    pub fn new(key: ResourceKey, owner: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            key,
            version: 1,
            owner,
            phase: Phase::Running,
            finalizers: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record an effective change.
    pub fn bump(&mut self) {
        self.version = self.version.saturating_add(1);
        self.updated_at = Utc::now();
    }

    /// Whether the resource is tearing down with nothing left holding it.
    pub fn is_destroy_ready(&self) -> bool {
        self.phase == Phase::TearingDown && self.finalizers.is_empty()
    }
}

/// Resource as held by the store: metadata plus a type-erased spec body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResource {
    pub metadata: Metadata,
    pub spec: serde_json::Value,
}

/// Spec body of a typed resource.
pub trait ResourceSpec:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + Send + Sync + 'static
{
    /// Type tag stored in every [`ResourceKey`] of this kind.
    const RESOURCE_TYPE: &'static str;

    /// Decode a spec body. A `null` body decodes as the default spec.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the body does not match `Self`.
    fn decode(value: &serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| StoreError::serialization(Self::RESOURCE_TYPE, e.to_string()))
    }

    /// Encode a spec body.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if encoding fails.
    fn encode(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| StoreError::serialization(Self::RESOURCE_TYPE, e.to_string()))
    }
}

/// Typed view of a stored resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<S: ResourceSpec> {
    pub metadata: Metadata,
    pub spec: S,
}

impl<S: ResourceSpec> Resource<S> {
    /// Decode a raw resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the type tag or body don't match `S`.
    pub fn from_raw(raw: &RawResource) -> Result<Self> {
        if raw.metadata.key.resource_type != S::RESOURCE_TYPE {
            return Err(StoreError::serialization(
                S::RESOURCE_TYPE,
                format!(
                    "resource '{}' has type '{}'",
                    raw.metadata.key, raw.metadata.key.resource_type
                ),
            ));
        }
        Ok(Self {
            metadata: raw.metadata.clone(),
            spec: S::decode(&raw.spec)?,
        })
    }

    /// Resource id.
    pub fn id(&self) -> &str {
        &self.metadata.key.id
    }
}

/// Kind of change carried by a [`ResourceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Updated,
    Destroyed,
}

/// Change notification broadcast by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub kind: EventKind,
    /// Snapshot after the change (before removal for `Destroyed`).
    pub resource: RawResource,
}

impl ResourceEvent {
    /// Key of the changed resource.
    pub fn key(&self) -> &ResourceKey {
        &self.resource.metadata.key
    }
}
