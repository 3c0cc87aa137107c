use std::time::Duration;

use serde::Serialize;

use crate::model::{Outcome, Reason, ServiceId, ServiceState};
use crate::state::{OrchestrationRun, RunStatus};

/// A state change of one service
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub service: ServiceId,
    pub from: ServiceState,
    pub to: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Failed dependencies, only set when `to` is `Blocked`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<ServiceId>,
}

impl Transition {
    pub fn new(service: impl Into<String>, from: ServiceState, to: ServiceState) -> Self {
        Self {
            service: service.into(),
            from,
            to,
            reason: None,
            detail: None,
            blocked_by: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: Reason, detail: impl Into<String>) -> Self {
        self.reason = Some(reason);
        self.detail = Some(detail.into());
        self
    }

    pub fn blocked_by(mut self, deps: Vec<ServiceId>) -> Self {
        self.blocked_by = deps;
        self
    }
}

/// One probe attempt against a service in `Checking`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub service: ServiceId,
    pub attempt: u32,
    pub outcome: Outcome,
    /// True while the service is still inside its grace period
    pub within_grace: bool,
}

#[derive(Clone, Debug)]
pub enum RunEvent {
    Transition(Transition),
    Probe(ProbeAttempt),
    Finished { status: RunStatus },
}

#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub id: u64,
    /// Time since the run started
    pub elapsed: Duration,
    pub event: RunEvent,
}

/// Apply an event to the run aggregate.
///
/// Returns false (and leaves the run untouched) when a transition does not
/// start from the service's current state or is not a legal edge, which keeps
/// terminal states final.
pub fn reduce(run: &mut OrchestrationRun, env: &EventEnvelope) -> bool {
    let now = run.started + env.elapsed;

    match &env.event {
        RunEvent::Transition(t) => {
            let Some(record) = run.services.get_mut(&t.service) else {
                return false;
            };
            if record.state != t.from || !t.from.can_transition_to(t.to) {
                return false;
            }
            record.state = t.to;
            if t.to == ServiceState::Checking {
                record.entered_checking = Some(now);
            }
            if t.to.is_terminal() {
                record.resolved_at = Some(now);
            }
            if t.reason.is_some() {
                record.reason = t.reason;
                record.detail = t.detail.clone();
            }
            if !t.blocked_by.is_empty() {
                record.blocked_by = t.blocked_by.clone();
            }
        }
        RunEvent::Probe(p) => {
            let Some(record) = run.services.get_mut(&p.service) else {
                return false;
            };
            if record.state != ServiceState::Checking {
                return false;
            }
            record.attempts = record.attempts.max(p.attempt);
            if let Outcome::Unhealthy { reason, detail } = &p.outcome {
                record.reason = Some(*reason);
                record.detail = Some(detail.clone());
            }
        }
        RunEvent::Finished { .. } => {
            run.finished = Some(now);
        }
    }

    run.last_event_id = env.id;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HealthCheckSpec, ServiceDescriptor};

    fn envelope(id: u64, event: RunEvent) -> EventEnvelope {
        EventEnvelope {
            id,
            elapsed: Duration::from_millis(id * 10),
            event,
        }
    }

    fn run() -> OrchestrationRun {
        let db = ServiceDescriptor::new(
            "db",
            "database",
            HealthCheckSpec::Tcp {
                host: "127.0.0.1".into(),
                port: 5432,
            },
        );
        OrchestrationRun::new([&db])
    }

    #[test]
    fn test_transitions_follow_state_machine() {
        let mut run = run();
        use ServiceState::*;

        assert!(reduce(&mut run, &envelope(1, RunEvent::Transition(Transition::new("db", Pending, Starting)))));
        assert!(reduce(&mut run, &envelope(2, RunEvent::Transition(Transition::new("db", Starting, Checking)))));
        assert!(run.services["db"].entered_checking.is_some());

        // Skipping ahead from a stale state is rejected
        assert!(!reduce(&mut run, &envelope(3, RunEvent::Transition(Transition::new("db", Pending, Blocked)))));
        assert_eq!(run.services["db"].state, Checking);
        assert_eq!(run.last_event_id, 2);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut run = run();
        use ServiceState::*;
        for (i, (from, to)) in [(Pending, Starting), (Starting, Checking), (Checking, Healthy)]
            .into_iter()
            .enumerate()
        {
            assert!(reduce(&mut run, &envelope(i as u64 + 1, RunEvent::Transition(Transition::new("db", from, to)))));
        }
        let late = Transition::new("db", Healthy, Unhealthy).with_reason(Reason::ServiceDown, "refused");
        assert!(!reduce(&mut run, &envelope(9, RunEvent::Transition(late))));
        assert_eq!(run.services["db"].state, Healthy);
        assert!(run.services["db"].resolved_at.is_some());
        assert_eq!(run.services["db"].reason, None);
    }

    #[test]
    fn test_probe_attempts_record_last_failure() {
        let mut run = run();
        use ServiceState::*;
        reduce(&mut run, &envelope(1, RunEvent::Transition(Transition::new("db", Pending, Starting))));
        reduce(&mut run, &envelope(2, RunEvent::Transition(Transition::new("db", Starting, Checking))));
        reduce(
            &mut run,
            &envelope(
                3,
                RunEvent::Probe(ProbeAttempt {
                    service: "db".into(),
                    attempt: 1,
                    outcome: Outcome::unhealthy(Reason::ServiceDown, "connection refused"),
                    within_grace: true,
                }),
            ),
        );
        let rec = &run.services["db"];
        assert_eq!(rec.attempts, 1);
        assert_eq!(rec.reason, Some(Reason::ServiceDown));
        assert_eq!(rec.state, Checking);
    }
}
