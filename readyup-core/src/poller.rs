//! Poller / retry engine
//!
//! One task per service, spawned in level order. A task waits until its
//! dependencies resolve, then probes until the service is healthy, fails
//! after its grace period, or runs out of time. All state changes go through
//! [`SharedRun`].

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::model::{Outcome, Reason, ServiceDescriptor, ServiceId, ServiceState};
use crate::probe::Prober;
use crate::reducer::{ProbeAttempt, Transition};
use crate::state::SharedRun;
use crate::topology::Levels;

/// Default run-wide ceiling
pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(120);

/// What to do with the rest of the run once one service fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Keep probing every service that can still become healthy
    #[default]
    Continue,
    /// Cancel the run on the first failure
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "fail-fast" | "fail_fast" | "failfast" => Ok(Self::FailFast),
            other => Err(format!("unknown failure policy '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PollerOptions {
    pub global_timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            global_timeout: DEFAULT_GLOBAL_TIMEOUT,
            failure_policy: FailurePolicy::Continue,
        }
    }
}

/// Cancellation shared by every task of one run, with the reason it fired
struct RunControl {
    token: CancellationToken,
    cause: OnceLock<Reason>,
}

impl RunControl {
    fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            cause: OnceLock::new(),
        }
    }

    /// First cause wins
    fn cancel(&self, reason: Reason) {
        let _ = self.cause.set(reason);
        self.token.cancel();
    }

    /// A parent cancellation without a recorded cause is an operator interrupt
    fn cause(&self) -> Reason {
        self.cause.get().copied().unwrap_or(Reason::Interrupted)
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct Poller {
    prober: Arc<dyn Prober>,
    options: PollerOptions,
}

impl Poller {
    pub fn new(prober: Arc<dyn Prober>, options: PollerOptions) -> Self {
        Self { prober, options }
    }

    /// Drive every service to a terminal state.
    ///
    /// Returns once all services are resolved. Cancelling `cancel` (or the
    /// global deadline elapsing) turns every unresolved service into
    /// `TimedOut`; it never stops the services themselves.
    pub async fn drive(
        &self,
        levels: &Levels,
        services: &BTreeMap<ServiceId, ServiceDescriptor>,
        run: &SharedRun,
        cancel: &CancellationToken,
    ) {
        let control = Arc::new(RunControl::new(cancel));
        let mut tasks = JoinSet::new();

        for level in levels.iter() {
            for id in level {
                let Some(desc) = services.get(id) else {
                    continue;
                };
                let supervisor = Supervisor {
                    desc: desc.clone(),
                    prober: self.prober.clone(),
                    run: run.clone(),
                    control: control.clone(),
                    policy: self.options.failure_policy,
                };
                tasks.spawn(supervisor.run());
            }
        }

        let deadline = tokio::time::sleep(self.options.global_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "service task failed");
                        control.cancel(Reason::Unknown);
                        run.settle(Reason::Unknown, "service task failed").await;
                    }
                    Some(Ok(())) => {}
                },
                _ = &mut deadline, if !control.is_cancelled() => {
                    tracing::warn!(timeout = ?self.options.global_timeout, "global deadline reached");
                    control.cancel(Reason::GlobalTimeout);
                }
            }
        }

        // Every task resolves its own service; this only catches stragglers
        if !run.snapshot().await.is_settled() {
            run.settle(control.cause(), "service task ended without resolving").await;
        }
    }
}

enum Admission {
    Admitted,
    Blocked(Vec<ServiceId>),
    Cancelled,
}

/// Drives one service through its state machine
struct Supervisor {
    desc: ServiceDescriptor,
    prober: Arc<dyn Prober>,
    run: SharedRun,
    control: Arc<RunControl>,
    policy: FailurePolicy,
}

impl Supervisor {
    async fn run(self) {
        let name = self.desc.name.clone();

        match self.wait_for_dependencies().await {
            Admission::Admitted => {}
            Admission::Blocked(failed) => {
                let t = Transition::new(&name, ServiceState::Pending, ServiceState::Blocked)
                    .blocked_by(failed);
                self.run.transition(t).await;
                self.on_failure();
                return;
            }
            Admission::Cancelled => {
                let reason = self.control.cause();
                let t = Transition::new(&name, ServiceState::Pending, ServiceState::TimedOut)
                    .with_reason(reason, "run ended before dependencies were ready");
                self.run.transition(t).await;
                return;
            }
        }

        // The container runtime owns the actual start; Starting marks admission
        for (from, to) in [
            (ServiceState::Pending, ServiceState::Starting),
            (ServiceState::Starting, ServiceState::Checking),
        ] {
            if !self.run.transition(Transition::new(&name, from, to)).await {
                return;
            }
        }

        let (state, failure) = self.check().await;
        let mut t = Transition::new(&name, ServiceState::Checking, state);
        if let Some((reason, detail)) = failure {
            t = t.with_reason(reason, detail);
        }
        self.run.transition(t).await;
        if state.is_failure() {
            self.on_failure();
        }
    }

    fn on_failure(&self) {
        if self.policy == FailurePolicy::FailFast && !self.control.is_cancelled() {
            tracing::warn!(service = %self.desc.name, "fail-fast: cancelling remaining checks");
            self.control.cancel(Reason::Interrupted);
        }
    }

    /// Wait until every dependency is healthy, or one of them fails.
    ///
    /// After cancellation the task keeps waiting until its dependencies are
    /// terminal, so a dependent of a timed-out service ends `Blocked`.
    async fn wait_for_dependencies(&self) -> Admission {
        let mut resolved = self.run.subscribe();
        let mut cancelled = false;

        loop {
            cancelled |= self.control.is_cancelled();
            let states = self.run.states_of(&self.desc.depends_on).await;
            let failed: Vec<ServiceId> = states
                .iter()
                .filter(|(_, s)| s.is_failure())
                .map(|(id, _)| id.clone())
                .collect();
            if !failed.is_empty() {
                return Admission::Blocked(failed);
            }
            if cancelled {
                if states.values().all(|s| s.is_terminal()) {
                    return Admission::Cancelled;
                }
            } else if states.values().all(|s| *s == ServiceState::Healthy) {
                return Admission::Admitted;
            }

            tokio::select! {
                _ = self.control.token.cancelled(), if !cancelled => cancelled = true,
                changed = resolved.changed() => {
                    if changed.is_err() {
                        return Admission::Cancelled;
                    }
                }
            }
        }
    }

    /// Probe until a terminal state. Returns the state plus the failure to record.
    async fn check(&self) -> (ServiceState, Option<(Reason, String)>) {
        let desc = &self.desc;
        let entered = Instant::now();
        let grace_ends = entered + desc.grace_period;
        let deadline = entered + desc.max_wait;
        let mut last: Option<(Reason, String)> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let probe = tokio::time::timeout(
                desc.attempt_timeout,
                self.prober.probe(&desc.health_check, desc.attempt_timeout),
            );

            let outcome = tokio::select! {
                biased;
                _ = self.control.token.cancelled() => return self.cancelled(last),
                _ = tokio::time::sleep_until(deadline) => return self.deadline_passed(last),
                res = probe => res.unwrap_or_else(|_| {
                    Outcome::unhealthy(
                        Reason::Timeout,
                        format!("no answer within {:?}", desc.attempt_timeout),
                    )
                }),
            };

            let within_grace = Instant::now() < grace_ends;
            tracing::debug!(
                service = %desc.name,
                attempt,
                healthy = outcome.is_healthy(),
                within_grace,
                "probe"
            );
            self.run
                .record_probe(ProbeAttempt {
                    service: desc.name.clone(),
                    attempt,
                    outcome: outcome.clone(),
                    within_grace,
                })
                .await;

            match outcome {
                Outcome::Healthy => return (ServiceState::Healthy, None),
                Outcome::Unhealthy { reason, detail } => {
                    if !within_grace {
                        return (ServiceState::Unhealthy, Some((reason, detail)));
                    }
                    last = Some((reason, detail));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return self.deadline_passed(last);
            }
            let wake = (now + desc.poll_interval).min(deadline);
            tokio::select! {
                biased;
                _ = self.control.token.cancelled() => return self.cancelled(last),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    fn cancelled(&self, last: Option<(Reason, String)>) -> (ServiceState, Option<(Reason, String)>) {
        let cause = self.control.cause();
        let detail = match last {
            Some((reason, detail)) => format!("{} while checking; last probe: {} ({})", cause, reason, detail),
            None => format!("{} while checking", cause),
        };
        (ServiceState::TimedOut, Some((cause, detail)))
    }

    fn deadline_passed(&self, last: Option<(Reason, String)>) -> (ServiceState, Option<(Reason, String)>) {
        let waited = format!("not healthy within {:?}", self.desc.max_wait);
        let failure = match last {
            Some((reason, detail)) => (reason, format!("{}; last probe: {}", waited, detail)),
            None => (Reason::Timeout, waited),
        };
        (ServiceState::TimedOut, Some(failure))
    }
}
