//! Error types for the reconciler crate.

use std::fmt;

use netresolv_resources::{ResourceKey, StoreError};

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Every variant is fatal for the current pass; recoverable store outcomes
/// (phase conflicts on upsert, not-found on cleanup) never surface here.
#[derive(Debug, Clone)]
pub enum Error {
    /// Listing input resources failed.
    ListFailed {
        namespace: String,
        resource_type: String,
        source: StoreError,
    },
    /// Writing the output resource failed.
    UpdateFailed { key: ResourceKey, source: StoreError },
    /// Tearing down or destroying the output resource failed.
    CleanupFailed { key: ResourceKey, source: StoreError },
    /// The controller kept failing past the configured restart budget.
    RestartLimitExceeded { controller: String, restarts: u32 },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListFailed {
                namespace,
                resource_type,
                source,
            } => {
                write!(f, "error listing {namespace}/{resource_type}: {source}")
            }
            Self::UpdateFailed { key, source } => {
                write!(f, "error updating resource '{key}': {source}")
            }
            Self::CleanupFailed { key, source } => {
                write!(f, "error cleaning up resource '{key}': {source}")
            }
            Self::RestartLimitExceeded {
                controller,
                restarts,
            } => {
                write!(f, "controller '{controller}' failed {restarts} times in a row")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ListFailed { source, .. }
            | Self::UpdateFailed { source, .. }
            | Self::CleanupFailed { source, .. } => Some(source),
            Self::RestartLimitExceeded { .. } | Self::InvalidConfig { .. } => None,
        }
    }
}

impl Error {
    /// Create a list failed error.
    pub fn list_failed(
        namespace: impl Into<String>,
        resource_type: impl Into<String>,
        source: StoreError,
    ) -> Self {
        Self::ListFailed {
            namespace: namespace.into(),
            resource_type: resource_type.into(),
            source,
        }
    }

    /// Create an update failed error.
    pub fn update_failed(key: &ResourceKey, source: StoreError) -> Self {
        Self::UpdateFailed {
            key: key.clone(),
            source,
        }
    }

    /// Create a cleanup failed error.
    pub fn cleanup_failed(key: &ResourceKey, source: StoreError) -> Self {
        Self::CleanupFailed {
            key: key.clone(),
            source,
        }
    }

    /// Create a restart limit error.
    pub fn restart_limit_exceeded(controller: impl Into<String>, restarts: u32) -> Self {
        Self::RestartLimitExceeded {
            controller: controller.into(),
            restarts,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
