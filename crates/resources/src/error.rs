//! Error types for the resources crate.

use thiserror::Error;

use crate::types::{Phase, ResourceKey};

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types.
///
/// Every failure the store can report is a distinct variant, so callers
/// branch on the variant instead of inspecting error text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Resource does not exist.
    #[error("resource '{key}' not found")]
    NotFound { key: ResourceKey },

    /// Resource already exists.
    #[error("resource '{key}' already exists")]
    AlreadyExists { key: ResourceKey },

    /// The resource's phase does not allow the operation: writes need
    /// `Running`, destruction needs `TearingDown`.
    #[error("resource '{key}' is {phase}, operation rejected")]
    PhaseConflict { key: ResourceKey, phase: Phase },

    /// The caller's version does not match the stored version.
    #[error("resource '{key}' version mismatch: expected {expected}, found {found}")]
    VersionConflict {
        key: ResourceKey,
        expected: u64,
        found: u64,
    },

    /// The resource is owned by a different writer.
    #[error("resource '{key}' is owned by '{owner}', not '{requested_by}'")]
    OwnerConflict {
        key: ResourceKey,
        owner: String,
        requested_by: String,
    },

    /// The resource still has finalizers attached.
    #[error("resource '{key}' has pending finalizers: {finalizers:?}")]
    FinalizersPending {
        key: ResourceKey,
        finalizers: Vec<String>,
    },

    /// The spec body could not be encoded or decoded.
    #[error("serialization error for '{resource_type}': {reason}")]
    Serialization {
        resource_type: String,
        reason: String,
    },

    /// Backend failure.
    #[error("store operation '{operation}' failed: {reason}")]
    Backend { operation: String, reason: String },
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(key: &ResourceKey) -> Self {
        Self::NotFound { key: key.clone() }
    }

    /// Create a phase conflict error.
    pub fn phase_conflict(key: &ResourceKey, phase: Phase) -> Self {
        Self::PhaseConflict {
            key: key.clone(),
            phase,
        }
    }

    /// Create a serialization error.
    pub fn serialization(resource_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Serialization {
            resource_type: resource_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the resource was absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the resource was in the wrong phase for the operation.
    #[must_use]
    pub const fn is_phase_conflict(&self) -> bool {
        matches!(self, Self::PhaseConflict { .. })
    }
}
