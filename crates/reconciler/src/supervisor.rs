//! Restart supervision for controllers.
//!
//! A [`Supervisor`] keeps one controller running against a store. When the
//! controller's run loop fails, the supervisor waits an exponential backoff
//! and starts it again with a fresh [`ControllerRuntime`]. The backoff is
//! reset by the controller itself after every clean pass, so only
//! consecutive failures count against `max_restarts`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use netresolv_resources::ResourceStore;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::runtime::ControllerRuntime;

/// Calculate exponential backoff duration.
#[must_use]
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

/// Consecutive failure counter shared between a supervisor and the runtime
/// it hands to the controller.
#[derive(Debug, Clone, Default)]
pub struct RestartBackoff {
    failures: Arc<AtomicU32>,
}

impl RestartBackoff {
    /// Create a counter with no recorded failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all recorded failures.
    pub fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Record a failure and return the number of consecutive failures.
    pub fn record_failure(&self) -> u32 {
        self.failures
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1)
    }

    /// Number of consecutive failures.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

const fn default_base_backoff_ms() -> u64 {
    100
}

const fn default_max_backoff_ms() -> u64 {
    3200
}

/// Supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Backoff after the first failure.
    pub base_backoff_ms: u64,
    /// Upper bound for the backoff.
    pub max_backoff_ms: u64,
    /// Consecutive failures tolerated before giving up; `None` retries forever.
    pub max_restarts: Option<u32>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_restarts: None,
        }
    }
}

impl SupervisorConfig {
    /// Short backoffs for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            base_backoff_ms: 1,
            max_backoff_ms: 10,
            max_restarts: Some(3),
        }
    }

    /// Check the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the base backoff is zero or larger
    /// than the maximum.
    pub fn validate(&self) -> Result<()> {
        if self.base_backoff_ms == 0 {
            return Err(Error::invalid_config("base_backoff_ms must be positive"));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(Error::invalid_config(format!(
                "base_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.base_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }

    /// Backoff before restart number `failures` (1-based).
    #[must_use]
    pub fn backoff_for(&self, failures: u32) -> Duration {
        calculate_backoff(
            failures.saturating_sub(1),
            self.base_backoff_ms,
            self.max_backoff_ms,
        )
    }
}

/// Runs a controller against a store and restarts it when it fails.
pub struct Supervisor {
    config: SupervisorConfig,
    store: Arc<dyn ResourceStore>,
    backoff: RestartBackoff,
}

impl Supervisor {
    /// Create a supervisor over `store`.
    pub fn new(config: SupervisorConfig, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            config,
            store,
            backoff: RestartBackoff::new(),
        }
    }

    /// Consecutive failures observed so far.
    pub fn failures(&self) -> u32 {
        self.backoff.failures()
    }

    /// Run `controller` until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RestartLimitExceeded`] once the controller has failed
    /// more than `max_restarts` times in a row.
    pub async fn run(
        &self,
        controller: &dyn Controller,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let name = controller.name().to_string();
        info!(controller = %name, "Starting controller");

        loop {
            let (runtime, mut events) =
                ControllerRuntime::new(controller, Arc::clone(&self.store), self.backoff.clone());

            let outcome = controller
                .run(shutdown.clone(), &mut events, &runtime)
                .await;
            drop(runtime);

            let err = match outcome {
                Ok(()) => {
                    info!(controller = %name, "Controller stopped");
                    return Ok(());
                }
                Err(e) => e,
            };

            if shutdown.is_cancelled() {
                warn!(controller = %name, error = %err, "Controller failed during shutdown");
                return Ok(());
            }

            let failures = self.backoff.record_failure();
            if self.config.max_restarts.is_some_and(|max| failures > max) {
                error!(controller = %name, failures, error = %err, "Restart limit exceeded");
                return Err(Error::restart_limit_exceeded(name, failures));
            }

            let delay = self.config.backoff_for(failures);
            warn!(
                controller = %name,
                failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Controller failed, restarting"
            );

            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(controller = %name, "Shutdown during restart backoff");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use netresolv_resources::{InMemoryResourceStore, StoreError};
    use tokio::sync::mpsc;

    use super::*;
    use crate::controller::{Input, Output};
    use crate::runtime::{Notification, Runtime};

    /// Fails the first `fail_times` runs, then waits for shutdown.
    struct Flaky {
        fail_times: usize,
        runs: AtomicUsize,
    }

    impl Flaky {
        fn new(fail_times: usize) -> Self {
            Self {
                fail_times,
                runs: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Controller for Flaky {
        fn name(&self) -> &str {
            "test.Flaky"
        }

        fn inputs(&self) -> Vec<Input> {
            Vec::new()
        }

        fn outputs(&self) -> Vec<Output> {
            Vec::new()
        }

        async fn run(
            &self,
            shutdown: CancellationToken,
            _events: &mut mpsc::Receiver<Notification>,
            _runtime: &dyn Runtime,
        ) -> Result<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.fail_times {
                return Err(Error::list_failed(
                    "config",
                    "ResolverSpec",
                    StoreError::backend("list", "unavailable"),
                ));
            }
            shutdown.cancel();
            Ok(())
        }
    }

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(0, 100, 3200).as_millis(), 100);
        assert_eq!(calculate_backoff(1, 100, 3200).as_millis(), 200);
        assert_eq!(calculate_backoff(5, 100, 3200).as_millis(), 3200);
        assert_eq!(calculate_backoff(10, 100, 3200).as_millis(), 3200);
        assert_eq!(calculate_backoff(u32::MAX, 100, 3200).as_millis(), 3200);
    }

    #[test]
    fn test_backoff_counter() {
        let backoff = RestartBackoff::new();
        assert_eq!(backoff.record_failure(), 1);
        assert_eq!(backoff.record_failure(), 2);

        let shared = backoff.clone();
        shared.reset();
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(SupervisorConfig::default().validate().is_ok());
        assert!(SupervisorConfig::for_testing().validate().is_ok());

        let zero = SupervisorConfig {
            base_backoff_ms: 0,
            ..SupervisorConfig::default()
        };
        assert!(matches!(zero.validate(), Err(Error::InvalidConfig { .. })));

        let inverted = SupervisorConfig {
            base_backoff_ms: 5000,
            ..SupervisorConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_backoff_for_is_one_based() {
        let config = SupervisorConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_restarts_after_failure() {
        let supervisor =
            Supervisor::new(SupervisorConfig::for_testing(), InMemoryResourceStore::new_arc());
        let controller = Flaky::new(2);

        supervisor
            .run(&controller, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(controller.runs.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.failures(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_past_restart_limit() {
        let supervisor =
            Supervisor::new(SupervisorConfig::for_testing(), InMemoryResourceStore::new_arc());
        let controller = Flaky::new(usize::MAX);

        let err = supervisor
            .run(&controller, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RestartLimitExceeded { restarts: 4, .. }
        ));
        assert_eq!(controller.runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let config = SupervisorConfig {
            base_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
            max_restarts: None,
        };
        let supervisor = Supervisor::new(config, InMemoryResourceStore::new_arc());
        let controller = Flaky::new(usize::MAX);
        let shutdown = CancellationToken::new();

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        supervisor.run(&controller, shutdown).await.unwrap();
        assert_eq!(controller.runs.load(Ordering::SeqCst), 1);
    }
}
