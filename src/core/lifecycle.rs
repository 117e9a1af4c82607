//! Service lifecycle: run long-lived services side by side and stop them together.
//!
//! ```text
//! Orchestrator::run
//!     spawn every service (NotStarted → Running)
//!     wait: termination signal | any service exits
//!     cancel shared token (Running → Draining)
//!     join barrier: every service Stopped, each bounded by the grace period
//! ```
//!
//! A service that is still draining when its grace period runs out is aborted
//! and reported as [`ServiceOutcome::GraceExceeded`]; shutdown carries on.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A long-running unit of work driven by the [`Orchestrator`].
#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    /// Runs until `shutdown` is cancelled (or the service fails).
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

/// How a service ended.
#[derive(Debug)]
pub enum ServiceOutcome {
    /// Returned after shutdown was requested.
    Stopped,
    /// Returned `Ok` without shutdown being requested.
    Exited,
    Failed(anyhow::Error),
    Panicked(String),
    /// Still running when its grace period ran out.
    GraceExceeded,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service `{service}` exited unexpectedly")]
    UnexpectedExit { service: &'static str },

    #[error("service `{service}` failed: {error:#}")]
    Failed { service: &'static str, error: anyhow::Error },

    #[error("service `{service}` panicked: {message}")]
    Panicked { service: &'static str, message: String },
}

/// Observer for one managed service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    name: &'static str,
    state: watch::Receiver<ServiceState>,
}

impl ServiceHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Resolves once the service reports [`ServiceState::Stopped`].
    pub async fn stopped(&mut self) {
        // A closed channel means the task is gone, which is stopped too.
        let _ = self.state.wait_for(|state| *state == ServiceState::Stopped).await;
    }
}

/// Outcomes of every managed service, in completion order.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub outcomes: Vec<(&'static str, ServiceOutcome)>,
}

impl ShutdownReport {
    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.outcomes.iter().find(|(name, _)| *name == service).map(|(_, o)| o)
    }

    /// First error among the outcomes. A missed grace period is not an error.
    pub fn into_result(self) -> Result<(), ServiceError> {
        for (service, outcome) in self.outcomes {
            match outcome {
                ServiceOutcome::Stopped | ServiceOutcome::GraceExceeded => {}
                ServiceOutcome::Exited => return Err(ServiceError::UnexpectedExit { service }),
                ServiceOutcome::Failed(error) => return Err(ServiceError::Failed { service, error }),
                ServiceOutcome::Panicked(message) => return Err(ServiceError::Panicked { service, message }),
            }
        }
        Ok(())
    }
}

struct Pending {
    service: Box<dyn Service>,
    state: watch::Sender<ServiceState>,
}

/// Runs services concurrently under one shared cancellation token.
pub struct Orchestrator {
    shutdown: CancellationToken,
    grace: Duration,
    pending: Vec<Pending>,
}

impl Orchestrator {
    pub fn new(grace: Duration) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            grace,
            pending: Vec::new(),
        }
    }

    /// The shared token. Cancelling it starts shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn add<S: Service>(&mut self, service: S) -> ServiceHandle {
        let name = service.name();
        let (state, rx) = watch::channel(ServiceState::NotStarted);
        self.pending.push(Pending {
            service: Box::new(service),
            state,
        });

        ServiceHandle { name, state: rx }
    }

    /// Starts every service and returns once all of them have stopped.
    ///
    /// Shutdown begins when `terminate` resolves, when the shared token is
    /// cancelled, or when any service exits.
    pub async fn run(self, terminate: impl Future<Output = ()>) -> ShutdownReport {
        let grace = self.grace;
        let mut tasks = JoinSet::new();

        for Pending { service, state } in self.pending {
            let shutdown = self.shutdown.clone();
            tasks.spawn(supervise(service, state, shutdown, grace));
        }

        tokio::select! {
            () = terminate => {
                tracing::info!("termination signal received, shutting down");
            }
            () = self.shutdown.cancelled() => {}
        }
        self.shutdown.cancel();

        let mut report = ShutdownReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => report.outcomes.push(entry),
                Err(err) => {
                    tracing::error!("supervisor task failed: {}", err);
                    report.outcomes.push(("unknown", ServiceOutcome::Panicked(err.to_string())));
                }
            }
        }

        tracing::info!("all services stopped");
        report
    }
}

async fn supervise(
    service: Box<dyn Service>,
    state: watch::Sender<ServiceState>,
    shutdown: CancellationToken,
    grace: Duration,
) -> (&'static str, ServiceOutcome) {
    let name = service.name();

    state.send_replace(ServiceState::Running);
    tracing::info!(service = name, "service started");

    // Own task, so a panic surfaces as a JoinError and a stuck service can be aborted.
    let mut run = tokio::spawn(service.run(shutdown.clone()));

    let finished = tokio::select! {
        joined = &mut run => Some((joined, shutdown.is_cancelled())),
        () = shutdown.cancelled() => {
            state.send_replace(ServiceState::Draining);
            tracing::info!(service = name, grace_secs = grace.as_secs(), "service draining");
            match tokio::time::timeout(grace, &mut run).await {
                Ok(joined) => Some((joined, true)),
                Err(_) => {
                    run.abort();
                    None
                }
            }
        }
    };

    state.send_replace(ServiceState::Stopped);
    // Whatever the reason, this service is gone: stop the others.
    shutdown.cancel();

    let outcome = match finished {
        Some((Ok(Ok(())), true)) => {
            tracing::info!(service = name, "service stopped");
            ServiceOutcome::Stopped
        }
        Some((Ok(Ok(())), false)) => {
            tracing::warn!(service = name, "service exited without a shutdown request");
            ServiceOutcome::Exited
        }
        Some((Ok(Err(error)), _)) => {
            tracing::error!(service = name, "service failed: {:#}", error);
            ServiceOutcome::Failed(error)
        }
        Some((Err(join_err), _)) => {
            tracing::error!(service = name, "service panicked: {}", join_err);
            ServiceOutcome::Panicked(join_err.to_string())
        }
        None => {
            tracing::error!(
                service = name,
                grace_secs = grace.as_secs(),
                "service did not stop within its grace period, aborting it"
            );
            ServiceOutcome::GraceExceeded
        }
    };

    (name, outcome)
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Waits for shutdown, then takes `drain` to stop.
    struct Draining {
        name: &'static str,
        drain: Duration,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Service for Draining {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
            shutdown.cancelled().await;
            tokio::time::sleep(self.drain).await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Service for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(self: Box<Self>, _shutdown: CancellationToken) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            anyhow::bail!("listener closed")
        }
    }

    fn draining(name: &'static str, drain: Duration) -> (Draining, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        let service = Draining {
            name,
            drain,
            stopped: Arc::clone(&stopped),
        };
        (service, stopped)
    }

    #[tokio::test]
    async fn test_states_progress_to_stopped() {
        let mut orchestrator = Orchestrator::new(Duration::from_secs(5));
        let (service, _) = draining("http", Duration::from_millis(10));
        let handle = orchestrator.add(service);
        assert_eq!(handle.state(), ServiceState::NotStarted);

        let token = orchestrator.shutdown_token();
        let mut observer = handle.clone();
        let run = tokio::spawn(orchestrator.run(std::future::pending()));

        observer
            .state
            .wait_for(|s| *s == ServiceState::Running)
            .await
            .unwrap();
        token.cancel();
        observer.stopped().await;

        let report = run.await.unwrap();
        assert_eq!(handle.state(), ServiceState::Stopped);
        assert!(matches!(report.outcome("http"), Some(ServiceOutcome::Stopped)));
    }

    #[tokio::test]
    async fn test_cancelling_shared_token_ends_run() {
        let mut orchestrator = Orchestrator::new(Duration::from_secs(5));
        let (service, stopped) = draining("bot", Duration::ZERO);
        orchestrator.add(service);
        let token = orchestrator.shutdown_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let report = orchestrator.run(std::future::pending()).await;
        assert!(stopped.load(Ordering::SeqCst));
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_failure_stops_the_other_service() {
        let mut orchestrator = Orchestrator::new(Duration::from_secs(5));
        let (service, stopped) = draining("bot", Duration::from_millis(10));
        orchestrator.add(service);
        orchestrator.add(Failing);

        let report = orchestrator.run(std::future::pending()).await;

        assert!(stopped.load(Ordering::SeqCst));
        assert!(matches!(report.outcome("failing"), Some(ServiceOutcome::Failed(_))));
        assert!(matches!(report.outcome("bot"), Some(ServiceOutcome::Stopped)));
        assert!(matches!(
            report.into_result(),
            Err(ServiceError::Failed { service: "failing", .. })
        ));
    }

    #[tokio::test]
    async fn test_grace_period_bounds_a_stuck_service() {
        let mut orchestrator = Orchestrator::new(Duration::from_millis(50));
        let (service, stopped) = draining("stuck", Duration::from_secs(3600));
        let handle = orchestrator.add(service);

        let started = std::time::Instant::now();
        let report = orchestrator
            .run(tokio::time::sleep(Duration::from_millis(10)))
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!stopped.load(Ordering::SeqCst));
        assert_eq!(handle.state(), ServiceState::Stopped);
        assert!(matches!(report.outcome("stuck"), Some(ServiceOutcome::GraceExceeded)));
        assert!(report.into_result().is_ok());
    }
}
