//! Controller contract and the resolver merge controller.

use async_trait::async_trait;
use netresolv_resources::{
    CONFIG_NAMESPACE, EventKind, OPERATIONAL_NAMESPACE, RESOLVER_SPEC_TYPE, ResolverSpec,
    ResourceEvent, merged_resolver_key,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lifecycle::{Convergence, converge};
use crate::merge::{merge_resolver_specs, sort_by_layer};
use crate::runtime::{Notification, Runtime, list_typed};

/// How a controller depends on an input resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Read dependency that does not block removal of the input.
    Weak,
    /// Read dependency that the input's lifecycle must respect.
    Strong,
    /// Wake only when an input is tearing down and no finalizer holds it.
    DestroyReady,
}

/// Declared input of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub namespace: String,
    pub resource_type: String,
    pub kind: InputKind,
}

impl Input {
    /// Create a new input declaration.
    pub fn new(
        namespace: impl Into<String>,
        resource_type: impl Into<String>,
        kind: InputKind,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            resource_type: resource_type.into(),
            kind,
        }
    }

    /// Whether a store change should wake a controller declaring this input.
    pub fn is_triggered_by(&self, event: &ResourceEvent) -> bool {
        if !event.key().matches(&self.namespace, &self.resource_type) {
            return false;
        }

        match self.kind {
            InputKind::Weak | InputKind::Strong => true,
            InputKind::DestroyReady => {
                event.kind != EventKind::Destroyed && event.resource.metadata.is_destroy_ready()
            }
        }
    }
}

/// How a controller writes an output resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Several controllers write this type, each to its own ids.
    Shared,
}

/// Declared output of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub resource_type: String,
    pub kind: OutputKind,
}

impl Output {
    /// Create a new output declaration.
    pub fn new(resource_type: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            resource_type: resource_type.into(),
            kind,
        }
    }
}

/// A reconciliation controller hosted by a [`Runtime`].
#[async_trait]
pub trait Controller: Send + Sync {
    /// Stable name, also used as owner tag for writes.
    fn name(&self) -> &str;

    /// Resources the controller reads.
    fn inputs(&self) -> Vec<Input>;

    /// Resources the controller writes.
    fn outputs(&self) -> Vec<Output>;

    /// Run until `shutdown` is cancelled or a pass fails.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failed pass.
    async fn run(
        &self,
        shutdown: CancellationToken,
        events: &mut mpsc::Receiver<Notification>,
        runtime: &dyn Runtime,
    ) -> Result<()>;
}

/// Tracks consecutive requeued passes so a held teardown is reported once.
#[derive(Debug, Default)]
struct ConflictStreak {
    passes: u64,
}

impl ConflictStreak {
    /// Record a pass outcome. Returns true when it opens a new streak.
    fn observe(&mut self, outcome: Convergence) -> bool {
        if outcome == Convergence::Requeued {
            self.passes += 1;
            self.passes == 1
        } else {
            self.passes = 0;
            false
        }
    }
}

/// Merges layered resolver specs from the config namespace into the single
/// operational resolver spec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverMergeController;

impl ResolverMergeController {
    /// Controller name.
    pub const NAME: &'static str = "network.ResolverMergeController";

    /// Create a new controller.
    pub const fn new() -> Self {
        Self
    }

    /// Run one full pass: list, merge, converge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListFailed`] if the inputs can't be listed, or the
    /// lifecycle error if the output can't be converged.
    pub async fn reconcile(&self, runtime: &dyn Runtime) -> Result<Convergence> {
        let inputs = list_typed::<ResolverSpec>(runtime, CONFIG_NAMESPACE)
            .await
            .map_err(|e| Error::list_failed(CONFIG_NAMESPACE, RESOLVER_SPEC_TYPE, e))?;

        let count = inputs.len();
        let specs = sort_by_layer(inputs);
        let merged = merge_resolver_specs(&specs);

        debug!(
            controller = Self::NAME,
            inputs = count,
            layer = %merged.config_layer,
            servers = ?merged.dns_servers,
            search_domains = ?merged.search_domains,
            "Merged resolver specs"
        );

        converge(runtime, &merged_resolver_key(), merged).await
    }
}

#[async_trait]
impl Controller for ResolverMergeController {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<Input> {
        vec![
            Input::new(CONFIG_NAMESPACE, RESOLVER_SPEC_TYPE, InputKind::Weak),
            Input::new(
                OPERATIONAL_NAMESPACE,
                RESOLVER_SPEC_TYPE,
                InputKind::DestroyReady,
            ),
        ]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::new(RESOLVER_SPEC_TYPE, OutputKind::Shared)]
    }

    async fn run(
        &self,
        shutdown: CancellationToken,
        events: &mut mpsc::Receiver<Notification>,
        runtime: &dyn Runtime,
    ) -> Result<()> {
        let mut conflicts = ConflictStreak::default();

        loop {
            let notification = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!(controller = Self::NAME, "Shutdown requested");
                    return Ok(());
                }
                notification = events.recv() => notification,
            };

            let Some(notification) = notification else {
                debug!(controller = Self::NAME, "Notification channel closed");
                return Ok(());
            };

            let outcome = self.reconcile(runtime).await?;
            let held = conflicts.passes;
            if conflicts.observe(outcome) {
                warn!(
                    controller = Self::NAME,
                    "Output is tearing down, requeueing until it is destroyed"
                );
            } else if held > 0 && outcome != Convergence::Requeued {
                info!(controller = Self::NAME, passes = held, "Output teardown conflict cleared");
            }

            match outcome {
                Convergence::Applied { version } => {
                    debug!(
                        controller = Self::NAME,
                        ?notification,
                        version,
                        "Resolvers applied"
                    );
                }
                Convergence::Destroyed => {
                    info!(controller = Self::NAME, "No DNS servers left, resolvers removed");
                }
                other => {
                    debug!(
                        controller = Self::NAME,
                        ?notification,
                        outcome = ?other,
                        "Pass complete"
                    );
                }
            }

            runtime.reset_restart_backoff();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use netresolv_resources::{Metadata, Phase, RawResource, ResourceKey};

    use super::*;

    fn event(
        namespace: &str,
        kind: EventKind,
        phase: Phase,
        finalizers: &[&str],
    ) -> ResourceEvent {
        let mut metadata = Metadata::new(
            ResourceKey::new(namespace, RESOLVER_SPEC_TYPE, "resolvers"),
            None,
        );
        metadata.phase = phase;
        metadata.finalizers = finalizers.iter().map(|f| (*f).to_string()).collect();
        ResourceEvent {
            kind,
            resource: RawResource {
                metadata,
                spec: serde_json::Value::Null,
            },
        }
    }

    #[test]
    fn test_declared_capabilities() {
        let controller = ResolverMergeController::new();
        assert_eq!(controller.name(), "network.ResolverMergeController");

        let inputs = controller.inputs();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].kind, InputKind::Weak);
        assert_eq!(inputs[0].namespace, CONFIG_NAMESPACE);
        assert_eq!(inputs[1].kind, InputKind::DestroyReady);
        assert_eq!(inputs[1].namespace, OPERATIONAL_NAMESPACE);

        assert_eq!(
            controller.outputs(),
            vec![Output::new(RESOLVER_SPEC_TYPE, OutputKind::Shared)]
        );
    }

    #[test]
    fn test_weak_input_matches_any_change_in_scope() {
        for kind in [InputKind::Weak, InputKind::Strong] {
            let input = Input::new(CONFIG_NAMESPACE, RESOLVER_SPEC_TYPE, kind);
            let created = event(CONFIG_NAMESPACE, EventKind::Created, Phase::Running, &[]);
            let held = event(CONFIG_NAMESPACE, EventKind::Updated, Phase::TearingDown, &["x"]);
            let destroyed = event(CONFIG_NAMESPACE, EventKind::Destroyed, Phase::Running, &[]);
            let elsewhere = event(OPERATIONAL_NAMESPACE, EventKind::Created, Phase::Running, &[]);

            assert!(input.is_triggered_by(&created), "{kind:?}");
            assert!(input.is_triggered_by(&held), "{kind:?}");
            assert!(input.is_triggered_by(&destroyed), "{kind:?}");
            assert!(!input.is_triggered_by(&elsewhere), "{kind:?}");
        }
    }

    #[test]
    fn test_destroy_ready_input() {
        let input = Input::new(
            OPERATIONAL_NAMESPACE,
            RESOLVER_SPEC_TYPE,
            InputKind::DestroyReady,
        );
        let updated = |phase, finalizers: &[&str]| {
            event(OPERATIONAL_NAMESPACE, EventKind::Updated, phase, finalizers)
        };

        assert!(!input.is_triggered_by(&updated(Phase::Running, &[])));
        assert!(!input.is_triggered_by(&updated(Phase::TearingDown, &["cache"])));
        assert!(input.is_triggered_by(&updated(Phase::TearingDown, &[])));
        assert!(!input.is_triggered_by(&event(
            OPERATIONAL_NAMESPACE,
            EventKind::Destroyed,
            Phase::TearingDown,
            &[]
        )));
    }

    #[test]
    fn test_conflict_streak_reports_once_per_streak() {
        let mut streak = ConflictStreak::default();
        let outcomes = [
            Convergence::Requeued,
            Convergence::Requeued,
            Convergence::Requeued,
            Convergence::Applied { version: 3 },
            Convergence::Requeued,
            Convergence::TornDown,
        ];

        let reported: Vec<bool> = outcomes.into_iter().map(|o| streak.observe(o)).collect();
        assert_eq!(reported, vec![true, false, false, false, true, false]);
        assert_eq!(streak.passes, 0);
    }

    #[test]
    fn test_conflict_streak_counts_held_passes() {
        let mut streak = ConflictStreak::default();
        for _ in 0..10_000 {
            streak.observe(Convergence::Requeued);
        }
        assert_eq!(streak.passes, 10_000);
        assert!(!streak.observe(Convergence::Requeued));
    }
}
