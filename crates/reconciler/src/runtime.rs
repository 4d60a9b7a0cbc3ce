//! Controller runtime: the controller's view of the resource store.
//!
//! [`ControllerRuntime`] binds one controller to a store. It watches the
//! store for changes to the controller's declared inputs and turns them into
//! coalesced [`Notification`]s, tags every write with the controller as
//! owner, and carries the re-queue and backoff-reset signals.

use std::sync::Arc;

use async_trait::async_trait;
use netresolv_resources::{
    Metadata, Mutator, RawResource, Resource, ResourceEvent, ResourceKey, ResourceSpec,
    ResourceStore, Result as StoreResult,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::controller::{Controller, Input};
use crate::supervisor::RestartBackoff;

/// Reason the run loop was woken up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Delivered once when the runtime starts.
    Initial,
    /// An input resource changed.
    Changed,
    /// The controller asked for an immediate re-run.
    Requeued,
}

/// Store operations and signals available to a running controller.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// List resources of a type within a namespace.
    async fn list(&self, namespace: &str, resource_type: &str) -> StoreResult<Vec<RawResource>>;

    /// Create or modify a resource owned by this controller.
    async fn modify(&self, key: &ResourceKey, mutator: Mutator) -> StoreResult<Metadata>;

    /// Tear down a resource owned by this controller.
    async fn teardown(&self, key: &ResourceKey) -> StoreResult<bool>;

    /// Destroy a resource owned by this controller.
    async fn destroy(&self, key: &ResourceKey) -> StoreResult<()>;

    /// Schedule another pass without waiting for an input change.
    fn queue_reconcile(&self);

    /// Tell the supervisor the last pass was healthy.
    fn reset_restart_backoff(&self);
}

/// List and decode all resources of spec type `S` in a namespace.
///
/// # Errors
///
/// Returns the store error, or a serialization error if a body does not decode.
pub async fn list_typed<S: ResourceSpec>(
    runtime: &dyn Runtime,
    namespace: &str,
) -> StoreResult<Vec<Resource<S>>> {
    runtime
        .list(namespace, S::RESOURCE_TYPE)
        .await?
        .iter()
        .map(Resource::from_raw)
        .collect()
}

/// Create or modify a resource of spec type `S` with a typed transformation.
///
/// # Errors
///
/// Returns the store error, or whatever `mutate` returns.
pub async fn modify_typed<S, F>(
    runtime: &dyn Runtime,
    key: &ResourceKey,
    mutate: F,
) -> StoreResult<Metadata>
where
    S: ResourceSpec,
    F: FnOnce(&mut S) -> StoreResult<()> + Send + 'static,
{
    let mutator: Mutator = Box::new(move |value| {
        let mut spec = S::decode(value)?;
        mutate(&mut spec)?;
        *value = spec.encode()?;
        Ok(())
    });
    runtime.modify(key, mutator).await
}

/// Store-backed runtime for a single controller instance.
pub struct ControllerRuntime {
    owner: String,
    store: Arc<dyn ResourceStore>,
    queue: mpsc::Sender<Notification>,
    backoff: RestartBackoff,
    watcher: JoinHandle<()>,
}

impl ControllerRuntime {
    /// Bind `controller` to `store`.
    ///
    /// Returns the runtime and the receiving end of its notification channel.
    /// An [`Notification::Initial`] is already queued. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        controller: &dyn Controller,
        store: Arc<dyn ResourceStore>,
        backoff: RestartBackoff,
    ) -> (Self, mpsc::Receiver<Notification>) {
        // Capacity 1: bursts of changes coalesce into one pending wake-up.
        let (queue, events) = mpsc::channel(1);

        let watcher = spawn_watcher(store.watch(), controller.inputs(), queue.clone());
        notify(&queue, Notification::Initial);

        let runtime = Self {
            owner: controller.name().to_string(),
            store,
            queue,
            backoff,
            watcher,
        };
        (runtime, events)
    }

    /// Owner tag used for writes.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for ControllerRuntime {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[async_trait]
impl Runtime for ControllerRuntime {
    async fn list(&self, namespace: &str, resource_type: &str) -> StoreResult<Vec<RawResource>> {
        self.store.list(namespace, resource_type).await
    }

    async fn modify(&self, key: &ResourceKey, mutator: Mutator) -> StoreResult<Metadata> {
        self.store.modify(key, Some(&self.owner), mutator).await
    }

    async fn teardown(&self, key: &ResourceKey) -> StoreResult<bool> {
        self.store.teardown(key, Some(&self.owner)).await
    }

    async fn destroy(&self, key: &ResourceKey) -> StoreResult<()> {
        self.store.destroy(key, Some(&self.owner)).await
    }

    fn queue_reconcile(&self) {
        debug!(controller = %self.owner, "Reconcile queued");
        notify(&self.queue, Notification::Requeued);
    }

    fn reset_restart_backoff(&self) {
        self.backoff.reset();
    }
}

fn notify(queue: &mpsc::Sender<Notification>, notification: Notification) {
    // A full channel already holds a pending wake-up; a closed one has no reader left.
    let _ = queue.try_send(notification);
}

fn spawn_watcher(
    mut changes: broadcast::Receiver<ResourceEvent>,
    inputs: Vec<Input>,
    queue: mpsc::Sender<Notification>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(event) => {
                    if inputs.iter().any(|input| input.is_triggered_by(&event)) {
                        trace!(key = %event.key(), kind = ?event.kind, "Input changed");
                        notify(&queue, Notification::Changed);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Change stream lagged, forcing reconcile");
                    notify(&queue, Notification::Changed);
                }
                Err(RecvError::Closed) => break,
            }

            if queue.is_closed() {
                break;
            }
        }
    })
}
