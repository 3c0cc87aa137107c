//! Top-level entry point: pre-flight checks, then probing, then the report.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::{Report, summarize};
use crate::model::{ServiceDescriptor, ServiceId};
use crate::poller::{Poller, PollerOptions};
use crate::ports::{PortConflict, SocketTable, detect_conflicts, port_requests};
use crate::probe::Prober;
use crate::reporter::{ProgressReporter, spawn_reporter};
use crate::state::{OrchestrationRun, SharedRun};
use crate::topology::{Levels, TopologyError, resolve};

/// Reasons a run stops before any service is touched
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("{} port conflict(s) detected", .0.len())]
    PortConflicts(Vec<PortConflict>),

    #[error(transparent)]
    Cycle(#[from] TopologyError),
}

pub struct Orchestrator {
    prober: Arc<dyn Prober>,
    sockets: Arc<dyn SocketTable>,
    options: PollerOptions,
}

impl Orchestrator {
    pub fn new(prober: Arc<dyn Prober>, sockets: Arc<dyn SocketTable>, options: PollerOptions) -> Self {
        Self {
            prober,
            sockets,
            options,
        }
    }

    /// Port and dependency checks only. Returns the startup levels.
    pub fn preflight(&self, descriptors: &[ServiceDescriptor]) -> Result<Levels, PreflightError> {
        let conflicts = detect_conflicts(&port_requests(descriptors), self.sockets.as_ref());
        if !conflicts.is_empty() {
            for c in &conflicts {
                tracing::error!(port = c.port, service = %c.service, "{}", c);
            }
            return Err(PreflightError::PortConflicts(conflicts));
        }

        let graph: BTreeMap<ServiceId, ServiceDescriptor> = descriptors
            .iter()
            .map(|d| (d.name.clone(), d.clone()))
            .collect();
        let levels = resolve(&graph)?;
        tracing::debug!(levels = levels.len(), "startup order resolved");
        Ok(levels)
    }

    /// Verify a stack: pre-flight, wait for every service to resolve, and
    /// build the report. The reporter sees every transition as it happens and
    /// the final report once.
    pub async fn verify(
        &self,
        descriptors: &[ServiceDescriptor],
        reporter: Box<dyn ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<Report, PreflightError> {
        let levels = self.preflight(descriptors)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let run = SharedRun::new(OrchestrationRun::new(descriptors.iter()), Some(tx));
        let reporter_task = spawn_reporter(rx, reporter);

        let services: BTreeMap<ServiceId, ServiceDescriptor> = descriptors
            .iter()
            .map(|d| (d.name.clone(), d.clone()))
            .collect();
        tracing::info!(services = services.len(), "verifying stack");

        Poller::new(self.prober.clone(), self.options.clone())
            .drive(&levels, &services, &run, cancel)
            .await;
        let status = run.finish().await;
        let report = summarize(&run.snapshot().await);
        tracing::info!(status = %status, elapsed = ?report.elapsed, "run finished");

        match reporter_task.await {
            Ok(mut reporter) => reporter.finish(&report),
            Err(e) => tracing::warn!(error = %e, "reporter task failed"),
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HealthCheckSpec, Outcome, Reason, ServiceState};
    use crate::ports::ProcessInfo;
    use crate::reporter::RecordingReporter;
    use crate::scripted::{Script, ScriptedProber};
    use crate::state::RunStatus;
    use std::collections::BTreeSet;
    use std::time::Duration;

    struct Busy(BTreeSet<u16>);

    impl SocketTable for Busy {
        fn is_available(&self, port: u16) -> bool {
            !self.0.contains(&port)
        }

        fn owner(&self, port: u16) -> Option<ProcessInfo> {
            self.0.contains(&port).then(|| ProcessInfo {
                pid: 7,
                name: "squatter".into(),
            })
        }
    }

    fn tcp(port: u16) -> HealthCheckSpec {
        HealthCheckSpec::Tcp {
            host: "127.0.0.1".into(),
            port,
        }
    }

    fn stack() -> Vec<ServiceDescriptor> {
        let timing = |d: ServiceDescriptor| {
            d.with_timing(
                Duration::from_millis(500),
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(5),
            )
        };
        vec![
            timing(ServiceDescriptor::new("db", "database", tcp(5432)).with_ports([5432])),
            timing(ServiceDescriptor::new("cache", "cache", tcp(6379)).with_ports([6379])),
            timing(
                ServiceDescriptor::new("backend", "api", tcp(8000))
                    .depends_on(["db", "cache"])
                    .with_ports([8000]),
            ),
        ]
    }

    fn orchestrator(prober: ScriptedProber, busy: &[u16]) -> Orchestrator {
        Orchestrator::new(
            Arc::new(prober),
            Arc::new(Busy(busy.iter().copied().collect())),
            PollerOptions::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_conflicts_abort_before_any_probe() {
        let recorder = RecordingReporter::default();
        let o = orchestrator(ScriptedProber::new(), &[5432, 8000]);

        let err = o
            .verify(&stack(), Box::new(recorder.clone()), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            PreflightError::PortConflicts(conflicts) => {
                let ports: Vec<u16> = conflicts.iter().map(|c| c.port).collect();
                assert_eq!(ports, vec![5432, 8000]);
                assert_eq!(conflicts[0].process_name.as_deref(), Some("squatter"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(recorder.transitions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_aborts() {
        let services = vec![
            ServiceDescriptor::new("a", "generic", tcp(1)).depends_on(["b"]),
            ServiceDescriptor::new("b", "generic", tcp(2)).depends_on(["a"]),
        ];
        let o = orchestrator(ScriptedProber::new(), &[]);
        let err = o
            .verify(&services, Box::new(RecordingReporter::default()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PreflightError::Cycle(TopologyError::CycleDetected { ref services }) if services.len() == 2
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_down_blocks_backend() {
        let prober = ScriptedProber::new().script(
            &tcp(6379),
            Script::Always(Outcome::unhealthy(Reason::ServiceDown, "connection refused")),
        );
        let recorder = RecordingReporter::default();
        let o = orchestrator(prober, &[]);

        let report = o
            .verify(&stack(), Box::new(recorder.clone()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Degraded);
        assert_eq!(report.service("db").unwrap().state, ServiceState::Healthy);
        let cache = report.service("cache").unwrap();
        assert_eq!(cache.state, ServiceState::Unhealthy);
        assert_eq!(cache.reason, Some(Reason::ServiceDown));
        let backend = report.service("backend").unwrap();
        assert_eq!(backend.state, ServiceState::Blocked);
        assert_eq!(backend.blocked_by, vec!["cache".to_string()]);

        // The reporter saw the block and got the same report
        assert!(recorder
            .transitions()
            .iter()
            .any(|t| t.service == "backend" && t.to == ServiceState::Blocked));
        let reports = recorder.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, RunStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_stack_is_ready() {
        let o = orchestrator(ScriptedProber::new(), &[]);
        let report = o
            .verify(&stack(), Box::new(RecordingReporter::default()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Ready);
        assert_eq!(report.healthy_count(), 3);
        assert!(report.root_causes.is_empty());
    }
}
