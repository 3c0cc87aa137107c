//! Health check registry
//!
//! The poller only knows the [`Prober`] contract. Concrete checkers (TCP,
//! HTTP, database query, cache ping, exec) are registered per [`ProbeKind`]
//! by the binary, so new kinds never touch the engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{HealthCheckSpec, Outcome, ProbeKind, Reason};

/// Turns a health check spec into one pass/fail result.
///
/// Implementations must not return errors: every failure is mapped onto a
/// [`Reason`]. The caller also enforces `timeout`, but well-behaved probes
/// apply it to their own I/O so the reported reason is accurate.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, spec: &HealthCheckSpec, timeout: Duration) -> Outcome;

    /// Human-readable name of this prober
    fn name(&self) -> &'static str;
}

/// Dispatches each spec to the checker registered for its kind
#[derive(Default, Clone)]
pub struct ProbeRegistry {
    checkers: BTreeMap<ProbeKind, Arc<dyn Prober>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ProbeKind, checker: Arc<dyn Prober>) -> &mut Self {
        self.checkers.insert(kind, checker);
        self
    }

    pub fn with(mut self, kind: ProbeKind, checker: Arc<dyn Prober>) -> Self {
        self.register(kind, checker);
        self
    }

    pub fn supports(&self, kind: ProbeKind) -> bool {
        self.checkers.contains_key(&kind)
    }
}

#[async_trait]
impl Prober for ProbeRegistry {
    async fn probe(&self, spec: &HealthCheckSpec, timeout: Duration) -> Outcome {
        match self.checkers.get(&spec.kind()) {
            Some(checker) => {
                tracing::trace!(checker = checker.name(), target = %spec, "dispatch");
                checker.probe(spec, timeout).await
            }
            None => Outcome::unhealthy(
                Reason::Unknown,
                format!("no checker registered for {:?} probes", spec.kind()),
            ),
        }
    }

    fn name(&self) -> &'static str {
        "registry"
    }
}
