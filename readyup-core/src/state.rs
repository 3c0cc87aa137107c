use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::Instant;

use crate::model::{Reason, ServiceDescriptor, ServiceId, ServiceState};
use crate::reducer::{EventEnvelope, ProbeAttempt, RunEvent, Transition, reduce};

/// Overall verdict of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every service is healthy
    Ready,
    /// Some services are healthy, some are not
    Degraded,
    /// No service is healthy
    Failed,
}

impl RunStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        })
    }
}

/// What the run knows about one service
#[derive(Clone, Debug)]
pub struct ServiceRecord {
    pub name: ServiceId,
    pub kind: String,
    pub depends_on: Vec<ServiceId>,
    pub state: ServiceState,
    /// Last failure seen, kept even while the grace period absorbs it
    pub reason: Option<Reason>,
    pub detail: Option<String>,
    pub attempts: u32,
    pub entered_checking: Option<Instant>,
    pub resolved_at: Option<Instant>,
    pub blocked_by: Vec<ServiceId>,
}

impl ServiceRecord {
    fn new(desc: &ServiceDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
            kind: desc.kind.clone(),
            depends_on: desc.depends_on.iter().cloned().collect(),
            state: ServiceState::Pending,
            reason: None,
            detail: None,
            attempts: 0,
            entered_checking: None,
            resolved_at: None,
            blocked_by: Vec::new(),
        }
    }

    /// Time spent between entering `Checking` and resolving
    pub fn checking_time(&self) -> Option<Duration> {
        match (self.entered_checking, self.resolved_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }
}

/// The aggregate root of one verification run
#[derive(Clone, Debug)]
pub struct OrchestrationRun {
    pub started: Instant,
    pub finished: Option<Instant>,
    pub services: BTreeMap<ServiceId, ServiceRecord>,
    pub last_event_id: u64,
}

impl OrchestrationRun {
    pub fn new<'a>(descriptors: impl IntoIterator<Item = &'a ServiceDescriptor>) -> Self {
        Self {
            started: Instant::now(),
            finished: None,
            services: descriptors
                .into_iter()
                .map(|d| (d.name.clone(), ServiceRecord::new(d)))
                .collect(),
            last_event_id: 0,
        }
    }

    pub fn status(&self) -> RunStatus {
        let healthy = self
            .services
            .values()
            .filter(|r| r.state == ServiceState::Healthy)
            .count();
        if healthy == self.services.len() {
            RunStatus::Ready
        } else if healthy > 0 {
            RunStatus::Degraded
        } else {
            RunStatus::Failed
        }
    }

    pub fn state_of(&self, id: &str) -> Option<ServiceState> {
        self.services.get(id).map(|r| r.state)
    }

    pub fn is_settled(&self) -> bool {
        self.services.values().all(|r| r.state.is_terminal())
    }

    pub fn elapsed(&self) -> Duration {
        self.finished
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started)
    }
}

struct Inner {
    run: OrchestrationRun,
    next_id: u64,
    events: Option<mpsc::UnboundedSender<EventEnvelope>>,
}

/// The single write path into an [`OrchestrationRun`].
///
/// Every change is turned into an [`EventEnvelope`], reduced under the write
/// lock and forwarded to the progress channel while the lock is still held, so
/// observers see transitions in exactly the order they were applied.
#[derive(Clone)]
pub struct SharedRun {
    inner: Arc<RwLock<Inner>>,
    resolved: watch::Sender<u64>,
}

impl SharedRun {
    pub fn new(run: OrchestrationRun, events: Option<mpsc::UnboundedSender<EventEnvelope>>) -> Self {
        let (resolved, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                run,
                next_id: 1,
                events,
            })),
            resolved,
        }
    }

    async fn apply(&self, event: RunEvent) -> bool {
        let mut inner = self.inner.write().await;
        let env = EventEnvelope {
            id: inner.next_id,
            elapsed: inner.run.started.elapsed(),
            event,
        };
        if !reduce(&mut inner.run, &env) {
            return false;
        }
        inner.next_id += 1;

        let resolved = matches!(&env.event, RunEvent::Transition(t) if t.to.is_terminal());
        if let Some(tx) = &inner.events {
            // Reporter gone is not an error for the engine
            let _ = tx.send(env);
        }
        if resolved {
            self.resolved.send_modify(|n| *n += 1);
        }
        true
    }

    /// Apply a transition. Returns false if the service had already moved on.
    pub async fn transition(&self, t: Transition) -> bool {
        let (service, from, to) = (t.service.clone(), t.from, t.to);
        let applied = self.apply(RunEvent::Transition(t)).await;
        if applied {
            tracing::info!(service = %service, from = %from, to = %to, "transition");
        } else {
            tracing::debug!(service = %service, from = %from, to = %to, "transition rejected");
        }
        applied
    }

    pub async fn record_probe(&self, attempt: ProbeAttempt) -> bool {
        self.apply(RunEvent::Probe(attempt)).await
    }

    /// Force every unresolved service to `TimedOut`
    pub async fn settle(&self, reason: Reason, detail: &str) {
        let open: Vec<(ServiceId, ServiceState)> = {
            let inner = self.inner.read().await;
            inner
                .run
                .services
                .values()
                .filter(|r| !r.state.is_terminal())
                .map(|r| (r.name.clone(), r.state))
                .collect()
        };
        for (id, state) in open {
            self.transition(
                Transition::new(id, state, ServiceState::TimedOut).with_reason(reason, detail),
            )
            .await;
        }
    }

    /// Mark the run finished and close the progress channel
    pub async fn finish(&self) -> RunStatus {
        let status = self.inner.read().await.run.status();
        self.apply(RunEvent::Finished { status }).await;
        self.inner.write().await.events = None;
        status
    }

    pub async fn snapshot(&self) -> OrchestrationRun {
        self.inner.read().await.run.clone()
    }

    /// Current states of a set of services
    pub async fn states_of(&self, ids: &BTreeSet<ServiceId>) -> BTreeMap<ServiceId, ServiceState> {
        let inner = self.inner.read().await;
        ids.iter()
            .filter_map(|id| inner.run.state_of(id).map(|s| (id.clone(), s)))
            .collect()
    }

    /// Wakes whenever some service reaches a terminal state
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.resolved.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HealthCheckSpec;

    fn desc(name: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(
            name,
            "generic",
            HealthCheckSpec::Tcp {
                host: "127.0.0.1".into(),
                port: 1,
            },
        )
    }

    #[test]
    fn test_status_derivation() {
        let (a, b) = (desc("a"), desc("b"));
        let mut run = OrchestrationRun::new([&a, &b]);
        assert_eq!(run.status(), RunStatus::Failed);

        run.services.get_mut("a").unwrap().state = ServiceState::Healthy;
        assert_eq!(run.status(), RunStatus::Degraded);

        run.services.get_mut("b").unwrap().state = ServiceState::Healthy;
        assert_eq!(run.status(), RunStatus::Ready);
        assert!(run.is_settled());
    }

    #[test]
    fn test_empty_run_is_ready() {
        let run = OrchestrationRun::new(std::iter::empty());
        assert_eq!(run.status(), RunStatus::Ready);
    }

    #[tokio::test]
    async fn test_shared_run_forwards_events_in_order() {
        let a = desc("a");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = SharedRun::new(OrchestrationRun::new([&a]), Some(tx));
        let mut resolved = shared.subscribe();

        use ServiceState::*;
        assert!(shared.transition(Transition::new("a", Pending, Starting)).await);
        assert!(shared.transition(Transition::new("a", Starting, Checking)).await);
        assert!(shared.transition(Transition::new("a", Checking, Healthy)).await);
        assert!(!shared.transition(Transition::new("a", Checking, Unhealthy)).await);

        assert!(resolved.has_changed().unwrap());
        assert_eq!(shared.finish().await, RunStatus::Ready);

        let mut ids = Vec::new();
        while let Some(env) = rx.recv().await {
            ids.push(env.id);
        }
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_settle_times_out_open_services() {
        let (a, b) = (desc("a"), desc("b"));
        let shared = SharedRun::new(OrchestrationRun::new([&a, &b]), None);
        use ServiceState::*;
        shared.transition(Transition::new("a", Pending, Starting)).await;
        shared.transition(Transition::new("a", Starting, Checking)).await;

        shared.settle(Reason::GlobalTimeout, "deadline").await;

        let run = shared.snapshot().await;
        assert_eq!(run.services["a"].state, TimedOut);
        assert_eq!(run.services["b"].state, TimedOut);
        assert_eq!(run.services["a"].reason, Some(Reason::GlobalTimeout));
    }
}
