//! Output lifecycle: upsert when there is something to publish, otherwise
//! tear down and destroy.

use netresolv_resources::{ResolverSpec, ResourceKey};
use tracing::debug;

use crate::error::{Error, Result};
use crate::runtime::{Runtime, modify_typed};

/// What a convergence step did to the output resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// The output was created or updated; carries the stored version.
    Applied { version: u64 },
    /// The output is tearing down, dependents still hold it.
    TornDown,
    /// The output was destroyed.
    Destroyed,
    /// The output did not exist.
    Absent,
    /// The output was mid-teardown; cleanup ran and another pass is queued.
    Requeued,
}

/// Converge the output resource at `key` to `merged`.
///
/// The output exists only while `merged` has DNS servers.
///
/// # Errors
///
/// Returns [`Error::UpdateFailed`] or [`Error::CleanupFailed`] for store
/// failures other than a phase conflict on upsert or a missing resource
/// on cleanup.
pub async fn converge(
    runtime: &dyn Runtime,
    key: &ResourceKey,
    merged: ResolverSpec,
) -> Result<Convergence> {
    let mut requeued = false;

    if !merged.dns_servers.is_empty() {
        let servers = merged.dns_servers.len();
        let result = modify_typed::<ResolverSpec, _>(runtime, key, move |spec| {
            *spec = merged;
            Ok(())
        })
        .await;

        match result {
            Ok(metadata) => {
                debug!(key = %key, servers, version = metadata.version, "Output applied");
                return Ok(Convergence::Applied {
                    version: metadata.version,
                });
            }
            Err(e) if e.is_phase_conflict() => {
                debug!(key = %key, "Output is tearing down, cleaning up and requeueing");
                runtime.queue_reconcile();
                requeued = true;
            }
            Err(e) => return Err(Error::update_failed(key, e)),
        }
    }

    let cleanup = teardown_output(runtime, key).await?;
    Ok(if requeued {
        Convergence::Requeued
    } else {
        cleanup
    })
}

async fn teardown_output(runtime: &dyn Runtime, key: &ResourceKey) -> Result<Convergence> {
    let ready = match runtime.teardown(key).await {
        Ok(ready) => ready,
        Err(e) if e.is_not_found() => return Ok(Convergence::Absent),
        Err(e) => return Err(Error::cleanup_failed(key, e)),
    };

    if !ready {
        debug!(key = %key, "Output torn down, waiting for finalizers");
        return Ok(Convergence::TornDown);
    }

    match runtime.destroy(key).await {
        Ok(()) => {
            debug!(key = %key, "Output destroyed");
            Ok(Convergence::Destroyed)
        }
        Err(e) if e.is_not_found() => Ok(Convergence::Absent),
        Err(e) => Err(Error::cleanup_failed(key, e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use netresolv_resources::{
        ConfigLayer, InMemoryResourceStore, Metadata, Mutator, Phase, RawResource, ResourceSpec,
        ResourceStore, Result as StoreResult, StoreError, merged_resolver_key,
    };

    use super::*;

    const OWNER: &str = "test.Lifecycle";

    /// Runtime over an in-memory store with injectable failures.
    #[derive(Default)]
    struct FakeRuntime {
        store: InMemoryResourceStore,
        requeues: AtomicUsize,
        fail_modify: Mutex<Option<StoreError>>,
        fail_teardown: Mutex<Option<StoreError>>,
        fail_destroy: Mutex<Option<StoreError>>,
    }

    #[async_trait]
    impl Runtime for FakeRuntime {
        async fn list(
            &self,
            namespace: &str,
            resource_type: &str,
        ) -> StoreResult<Vec<RawResource>> {
            self.store.list(namespace, resource_type).await
        }

        async fn modify(&self, key: &ResourceKey, mutator: Mutator) -> StoreResult<Metadata> {
            let injected = self.fail_modify.lock().unwrap().take();
            if let Some(e) = injected {
                return Err(e);
            }
            self.store.modify(key, Some(OWNER), mutator).await
        }

        async fn teardown(&self, key: &ResourceKey) -> StoreResult<bool> {
            let injected = self.fail_teardown.lock().unwrap().take();
            if let Some(e) = injected {
                return Err(e);
            }
            self.store.teardown(key, Some(OWNER)).await
        }

        async fn destroy(&self, key: &ResourceKey) -> StoreResult<()> {
            let injected = self.fail_destroy.lock().unwrap().take();
            if let Some(e) = injected {
                return Err(e);
            }
            self.store.destroy(key, Some(OWNER)).await
        }

        fn queue_reconcile(&self) {
            self.requeues.fetch_add(1, Ordering::SeqCst);
        }

        fn reset_restart_backoff(&self) {}
    }

    fn with_servers() -> ResolverSpec {
        ResolverSpec::new(ConfigLayer::Platform)
            .with_search_domains(["example.org"])
            .with_dns_servers(["1.1.1.1".parse().unwrap()])
    }

    #[tokio::test]
    async fn test_applies_non_empty_spec() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();

        let outcome = converge(&runtime, &key, with_servers()).await.unwrap();
        assert_eq!(outcome, Convergence::Applied { version: 1 });

        let stored = runtime.store.get(&key).await.unwrap();
        assert_eq!(
            ResolverSpec::decode(&stored.spec).unwrap(),
            with_servers()
        );
    }

    #[tokio::test]
    async fn test_empty_spec_destroys_output() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();
        converge(&runtime, &key, with_servers()).await.unwrap();

        let outcome = converge(&runtime, &key, ResolverSpec::default()).await.unwrap();
        assert_eq!(outcome, Convergence::Destroyed);
        assert!(runtime.store.get(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();

        let first = converge(&runtime, &key, ResolverSpec::default()).await.unwrap();
        let second = converge(&runtime, &key, ResolverSpec::default()).await.unwrap();
        assert_eq!(first, Convergence::Absent);
        assert_eq!(second, Convergence::Absent);
    }

    #[tokio::test]
    async fn test_finalizers_hold_output() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();
        converge(&runtime, &key, with_servers()).await.unwrap();
        runtime.store.add_finalizer(&key, "dns-resolve-cache").await.unwrap();

        let outcome = converge(&runtime, &key, ResolverSpec::default()).await.unwrap();
        assert_eq!(outcome, Convergence::TornDown);
        assert!(runtime.store.get(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_phase_conflict_requeues_once() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();
        let conflict = StoreError::phase_conflict(&key, Phase::TearingDown);
        *runtime.fail_modify.lock().unwrap() = Some(conflict);

        let outcome = converge(&runtime, &key, with_servers()).await.unwrap();
        assert_eq!(outcome, Convergence::Requeued);
        assert_eq!(runtime.requeues.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_phase_conflict_against_real_teardown() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();
        converge(&runtime, &key, with_servers()).await.unwrap();
        runtime.store.teardown(&key, Some(OWNER)).await.unwrap();

        let outcome = converge(&runtime, &key, with_servers()).await.unwrap();
        assert_eq!(outcome, Convergence::Requeued);
        assert_eq!(runtime.requeues.load(Ordering::SeqCst), 1);
        // The half-torn-down output was finished off.
        assert!(runtime.store.get(&key).await.unwrap_err().is_not_found());

        let retried = converge(&runtime, &key, with_servers()).await.unwrap();
        assert_eq!(retried, Convergence::Applied { version: 1 });
    }

    #[tokio::test]
    async fn test_other_modify_errors_are_fatal() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();
        *runtime.fail_modify.lock().unwrap() = Some(StoreError::backend("modify", "io"));

        let err = converge(&runtime, &key, with_servers()).await.unwrap_err();
        assert!(matches!(err, Error::UpdateFailed { .. }));
        assert_eq!(runtime.requeues.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_teardown_errors_are_fatal() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();
        *runtime.fail_teardown.lock().unwrap() = Some(StoreError::backend("teardown", "io"));

        let err = converge(&runtime, &key, ResolverSpec::default()).await.unwrap_err();
        assert!(matches!(err, Error::CleanupFailed { .. }));
    }

    #[tokio::test]
    async fn test_destroy_not_found_is_converged() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();
        converge(&runtime, &key, with_servers()).await.unwrap();
        *runtime.fail_destroy.lock().unwrap() = Some(StoreError::not_found(&key));

        let outcome = converge(&runtime, &key, ResolverSpec::default()).await.unwrap();
        assert_eq!(outcome, Convergence::Absent);
    }

    #[tokio::test]
    async fn test_destroy_errors_are_fatal() {
        let runtime = FakeRuntime::default();
        let key = merged_resolver_key();
        converge(&runtime, &key, with_servers()).await.unwrap();
        *runtime.fail_destroy.lock().unwrap() = Some(StoreError::backend("destroy", "io"));

        let err = converge(&runtime, &key, ResolverSpec::default()).await.unwrap_err();
        assert!(matches!(err, Error::CleanupFailed { .. }));
    }
}
