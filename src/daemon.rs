//! Daemon wiring: store, seeded layers and the supervised merge controller.

use std::sync::Arc;

use anyhow::{Context, Result};
use netresolv_reconciler::{ControllerRuntime, ResolverMergeController, RestartBackoff, Supervisor};
use netresolv_resources::{
    EventKind, InMemoryResourceStore, ResolverSpec, ResourceSpec, ResourceStore,
    TracingResourceStore, merged_resolver_key,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{DaemonConfig, seed_layers};

/// Build the store and publish the configured layers into it.
///
/// # Errors
///
/// Returns an error if a layer can't be seeded.
pub async fn build_store(config: &DaemonConfig) -> Result<Arc<dyn ResourceStore>> {
    let store: Arc<dyn ResourceStore> = Arc::new(TracingResourceStore::new(
        InMemoryResourceStore::with_capacity(config.store.event_capacity),
    ));
    seed_layers(store.as_ref(), &config.layers).await?;
    Ok(store)
}

/// Run a single merge pass over the configured layers.
///
/// Returns the merged output, or `None` when no layer provides DNS servers.
///
/// # Errors
///
/// Returns an error if seeding, reconciling or decoding fails.
pub async fn merge_once(config: &DaemonConfig) -> Result<Option<ResolverSpec>> {
    let store = build_store(config).await?;
    let controller = ResolverMergeController::new();
    let (runtime, _events) =
        ControllerRuntime::new(&controller, Arc::clone(&store), RestartBackoff::new());

    let outcome = controller
        .reconcile(&runtime)
        .await
        .context("Merge pass failed")?;
    info!(outcome = ?outcome, "Merge pass complete");

    match store.get(&merged_resolver_key()).await {
        Ok(raw) => Ok(Some(ResolverSpec::decode(&raw.spec)?)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e).context("Failed to read merged resolvers"),
    }
}

/// Run the supervised merge controller until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if seeding fails or the controller exceeds its restart budget.
pub async fn run(config: DaemonConfig, shutdown: CancellationToken) -> Result<()> {
    let store = build_store(&config).await?;
    info!(layers = config.layers.len(), "Resolver layers seeded");

    let reporter = spawn_output_reporter(Arc::clone(&store), shutdown.clone());
    let supervisor = Supervisor::new(config.supervisor, store);
    let result = supervisor
        .run(&ResolverMergeController::new(), shutdown.clone())
        .await;

    shutdown.cancel();
    if let Err(e) = reporter.await {
        warn!(error = %e, "Output reporter task failed");
    }

    result.context("Resolver merge controller stopped")
}

/// Log every change of the merged output.
fn spawn_output_reporter(
    store: Arc<dyn ResourceStore>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut changes = store.watch();
    let output = merged_resolver_key();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = changes.recv() => event,
            };

            match event {
                Ok(event) if event.key() == &output => match event.kind {
                    EventKind::Destroyed => info!(key = %output, "Resolvers removed"),
                    EventKind::Created | EventKind::Updated => {
                        match ResolverSpec::decode(&event.resource.spec) {
                            Ok(spec) => info!(
                                key = %output,
                                layer = %spec.config_layer,
                                servers = ?spec.dns_servers,
                                search_domains = ?spec.search_domains,
                                phase = ?event.resource.metadata.phase,
                                "Resolvers updated"
                            ),
                            Err(e) => warn!(key = %output, error = %e, "Undecodable resolvers"),
                        }
                    }
                },
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Output reporter lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
