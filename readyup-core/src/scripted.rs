//! Scripted prober
//!
//! Plays back canned outcomes per health check spec. Used by tests and by
//! `readyup verify --demo` to exercise the engine without real services.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{HealthCheckSpec, Outcome, Reason};
use crate::probe::Prober;

#[derive(Clone, Debug)]
pub enum Script {
    /// Same outcome on every call
    Always(Outcome),
    /// Outcomes in order; the last one repeats
    Sequence(Vec<Outcome>),
    /// Fail with `reason` for the first `n` calls, then succeed
    HealthyAfter { failures: u32, reason: Reason },
    /// Succeed after a delay (slow but healthy)
    Delayed(Duration),
    /// Never answer
    Hang,
}

#[derive(Default)]
pub struct ScriptedProber {
    scripts: HashMap<HealthCheckSpec, Script>,
    calls: Mutex<HashMap<HealthCheckSpec, u32>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, spec: &HealthCheckSpec, script: Script) -> Self {
        self.scripts.insert(spec.clone(), script);
        self
    }

    /// Number of probes made against `spec` so far
    pub fn calls(&self, spec: &HealthCheckSpec) -> u32 {
        self.calls
            .lock()
            .map(|c| c.get(spec).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn next_call(&self, spec: &HealthCheckSpec) -> u32 {
        let Ok(mut calls) = self.calls.lock() else {
            return 0;
        };
        let n = calls.entry(spec.clone()).or_insert(0);
        *n += 1;
        *n
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, spec: &HealthCheckSpec, _timeout: Duration) -> Outcome {
        let call = self.next_call(spec);
        match self.scripts.get(spec) {
            None => Outcome::Healthy,
            Some(Script::Always(outcome)) => outcome.clone(),
            Some(Script::Sequence(outcomes)) => outcomes
                .get(call.saturating_sub(1) as usize)
                .or_else(|| outcomes.last())
                .cloned()
                .unwrap_or(Outcome::Healthy),
            Some(Script::HealthyAfter { failures, reason }) => {
                if call > *failures {
                    Outcome::Healthy
                } else {
                    Outcome::unhealthy(*reason, format!("scripted failure {}/{}", call, failures))
                }
            }
            Some(Script::Delayed(delay)) => {
                tokio::time::sleep(*delay).await;
                Outcome::Healthy
            }
            Some(Script::Hang) => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
