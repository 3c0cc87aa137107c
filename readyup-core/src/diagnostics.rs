//! Diagnostics aggregator
//!
//! Builds the final report from a settled run: one entry per service, with
//! troubleshooting steps picked by service kind and failure reason.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::model::{Reason, ServiceId, ServiceState};
use crate::state::{OrchestrationRun, RunStatus};

struct KindGuidance {
    kinds: &'static [&'static str],
    steps: &'static [&'static str],
}

const KIND_GUIDANCE: &[KindGuidance] = &[
    KindGuidance {
        kinds: &["database", "db", "postgres", "postgresql", "mysql", "mariadb"],
        steps: &[
            "Check the database container logs for startup or initialization errors",
            "Verify the connection URL, user and password match the container environment",
            "First start runs init scripts and can take longer than later ones",
        ],
    },
    KindGuidance {
        kinds: &["cache", "redis", "valkey", "memcached"],
        steps: &[
            "Check the cache container logs for startup errors",
            "Verify host and port, and whether the cache expects a password",
            "Look for memory or persistence errors that stop the cache from accepting connections",
        ],
    },
    KindGuidance {
        kinds: &["api", "backend", "http", "server", "service"],
        steps: &[
            "Check the API logs for crash loops or missing configuration",
            "Verify the health endpoint path and the expected status range",
            "Confirm the API can reach its own dependencies (database, cache)",
        ],
    },
    KindGuidance {
        kinds: &["ui", "frontend", "web"],
        steps: &[
            "Check the dev server output for build errors",
            "Verify the port and that the bundler finished compiling",
            "Confirm the API URL the frontend points at is reachable",
        ],
    },
];

const GENERIC_GUIDANCE: &[&str] = &[
    "Check the service logs for errors",
    "Verify the health check target matches the service configuration",
    "Run the probe by hand to reproduce the failure",
];

/// Troubleshooting steps for a service kind, generic for unknown kinds
pub fn guidance_for(kind: &str) -> &'static [&'static str] {
    let kind = kind.to_lowercase();
    KIND_GUIDANCE
        .iter()
        .find(|g| g.kinds.contains(&kind.as_str()))
        .map(|g| g.steps)
        .unwrap_or(GENERIC_GUIDANCE)
}

/// One-line hint for a failure reason
pub fn reason_hint(reason: Reason) -> &'static str {
    match reason {
        Reason::ServiceDown => {
            "Nothing accepts connections: is the service running and listening on the expected port?"
        }
        Reason::Timeout => {
            "No answer in time: the service may still be starting; consider a longer grace period"
        }
        Reason::DnsFailure => {
            "Host name did not resolve: use localhost from the host, the service name inside the container network"
        }
        Reason::NetworkUnreachable => "No route to the host: check the container network and the address",
        Reason::ConnectionReset => "Connection was reset: the service may be crashing or restarting",
        Reason::ProtocolError => {
            "The service answered, but not as expected: check status code, credentials and reply"
        }
        Reason::Unknown => "Unexpected error: rerun with READYUP_LOG=debug for details",
        Reason::GlobalTimeout => {
            "The run-wide deadline elapsed: raise READYUP_GLOBAL_TIMEOUT if the stack is just slow"
        }
        Reason::Interrupted => "The run was cancelled before this service resolved",
    }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn opt_as_millis<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&(d.as_millis() as u64)),
        None => s.serialize_none(),
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceReport {
    pub name: ServiceId,
    pub kind: String,
    pub state: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub attempts: u32,
    #[serde(rename = "checking_ms", serialize_with = "opt_as_millis")]
    pub checking_time: Option<Duration>,
    /// Direct dependencies that failed (Blocked services only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<ServiceId>,
    /// Failed services at the bottom of the blocking chain
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub root_blockers: Vec<ServiceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub guidance: Vec<&'static str>,
}

impl ServiceReport {
    /// Failed on its own, as opposed to being blocked by a dependency
    pub fn is_root_cause(&self) -> bool {
        matches!(self.state, ServiceState::Unhealthy | ServiceState::TimedOut)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub status: RunStatus,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Every service, sorted by name
    pub services: Vec<ServiceReport>,
    /// Services that failed on their own, sorted by name
    pub root_causes: Vec<ServiceId>,
    pub blocked: Vec<ServiceId>,
}

impl Report {
    pub fn service(&self, name: &str) -> Option<&ServiceReport> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn healthy_count(&self) -> usize {
        self.services
            .iter()
            .filter(|s| s.state == ServiceState::Healthy)
            .count()
    }
}

/// Follow `blocked_by` edges down to services that failed on their own
fn root_blockers(run: &OrchestrationRun, id: &str) -> Vec<ServiceId> {
    let mut roots = BTreeSet::new();
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = vec![id];

    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        let Some(record) = run.services.get(current) else {
            continue;
        };
        if record.state == ServiceState::Blocked {
            stack.extend(record.blocked_by.iter().map(String::as_str));
        } else if current != id && record.state.is_failure() {
            roots.insert(current.to_string());
        }
    }
    roots.into_iter().collect()
}

/// Build the report for a run. Pure; covers every service in the run.
pub fn summarize(run: &OrchestrationRun) -> Report {
    let mut services = Vec::with_capacity(run.services.len());
    let mut root_causes = Vec::new();
    let mut blocked = Vec::new();

    for (id, record) in &run.services {
        let failed = record.state.is_failure();
        let is_blocked = record.state == ServiceState::Blocked;
        let entry = ServiceReport {
            name: id.clone(),
            kind: record.kind.clone(),
            state: record.state,
            reason: if record.state == ServiceState::Healthy {
                None
            } else {
                record.reason
            },
            detail: if record.state == ServiceState::Healthy {
                None
            } else {
                record.detail.clone()
            },
            attempts: record.attempts,
            checking_time: record.checking_time(),
            blocked_by: record.blocked_by.clone(),
            root_blockers: if is_blocked {
                root_blockers(run, id)
            } else {
                Vec::new()
            },
            hint: match (failed && !is_blocked, record.reason) {
                (true, Some(reason)) => Some(reason_hint(reason)),
                _ => None,
            },
            guidance: if failed && !is_blocked {
                guidance_for(&record.kind).to_vec()
            } else {
                Vec::new()
            },
        };
        if entry.is_root_cause() {
            root_causes.push(id.clone());
        }
        if is_blocked {
            blocked.push(id.clone());
        }
        services.push(entry);
    }

    Report {
        status: run.status(),
        elapsed: run.elapsed(),
        services,
        root_causes,
        blocked,
    }
}
