use std::io::Write;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use readyup_core::diagnostics::Report;
use readyup_core::orchestrator::PreflightError;
use readyup_core::reducer::Transition;
use readyup_core::reporter::ProgressReporter;
use readyup_core::topology::TopologyError;

#[derive(Serialize)]
struct Record<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    run_id: &'a str,
    /// Summaries carry their own elapsed time
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
    #[serde(flatten)]
    body: &'a T,
}

/// Machine-readable progress: one JSON object per line
pub struct JsonReporter<W: Write + Send> {
    out: W,
    run_id: String,
}

impl<W: Write + Send> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self::with_run_id(out, Uuid::new_v4().to_string())
    }

    pub fn with_run_id(out: W, run_id: String) -> Self {
        Self { out, run_id }
    }

    fn emit<T: Serialize>(&mut self, kind: &'static str, elapsed: Option<Duration>, body: &T) {
        let record = Record {
            kind,
            run_id: &self.run_id,
            elapsed_ms: elapsed.map(|d| d.as_millis() as u64),
            body,
        };
        let res = serde_json::to_writer(&mut self.out, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(self.out))
            .and_then(|_| self.out.flush());
        if let Err(e) = res {
            tracing::debug!(error = %e, "json output failed");
        }
    }
}

impl<W: Write + Send> ProgressReporter for JsonReporter<W> {
    fn on_transition(&mut self, elapsed: Duration, transition: &Transition) {
        self.emit("transition", Some(elapsed), transition);
    }

    fn finish(&mut self, report: &Report) {
        self.emit("summary", None, report);
    }
}

/// Single record describing a pre-flight abort
pub fn preflight_record(err: &PreflightError) -> serde_json::Value {
    match err {
        PreflightError::PortConflicts(conflicts) => json!({
            "type": "preflight_error",
            "error": "port_conflict",
            "message": err.to_string(),
            "conflicts": conflicts,
        }),
        PreflightError::Cycle(TopologyError::CycleDetected { services }) => json!({
            "type": "preflight_error",
            "error": "cycle_detected",
            "message": err.to_string(),
            "services": services,
        }),
        PreflightError::Cycle(other) => json!({
            "type": "preflight_error",
            "error": "invalid_topology",
            "message": other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readyup_core::model::{Reason, ServiceState};
    use readyup_core::ports::PortConflict;

    #[test]
    fn test_transition_lines_parse() {
        let mut reporter = JsonReporter::with_run_id(Vec::new(), "run-1".into());
        reporter.on_transition(
            Duration::from_millis(1500),
            &Transition::new("cache", ServiceState::Checking, ServiceState::TimedOut)
                .with_reason(Reason::GlobalTimeout, "global timeout while checking"),
        );
        reporter.on_transition(
            Duration::from_millis(1500),
            &Transition::new("api", ServiceState::Pending, ServiceState::Blocked)
                .blocked_by(vec!["cache".into()]),
        );

        let text = String::from_utf8(reporter.out.clone()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "transition");
        assert_eq!(lines[0]["run_id"], "run-1");
        assert_eq!(lines[0]["elapsed_ms"], 1500);
        assert_eq!(lines[0]["to"], "timed_out");
        assert_eq!(lines[0]["reason"], "global_timeout");
        assert_eq!(lines[1]["blocked_by"][0], "cache");
    }

    #[test]
    fn test_summary_line_has_single_elapsed() {
        use readyup_core::diagnostics::summarize;
        use readyup_core::model::{HealthCheckSpec, ServiceDescriptor};
        use readyup_core::state::OrchestrationRun;

        let desc = ServiceDescriptor::new(
            "db",
            "database",
            HealthCheckSpec::Tcp {
                host: "127.0.0.1".into(),
                port: 5432,
            },
        );
        let mut run = OrchestrationRun::new([&desc]);
        if let Some(db) = run.services.get_mut("db") {
            db.state = ServiceState::Healthy;
            db.attempts = 2;
        }
        let report = summarize(&run);

        let mut reporter = JsonReporter::with_run_id(Vec::new(), "run-2".into());
        reporter.finish(&report);

        let text = String::from_utf8(reporter.out.clone()).unwrap();
        let line = text.lines().next().unwrap();
        assert_eq!(line.matches("\"elapsed_ms\"").count(), 1);

        let summary: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(summary["type"], "summary");
        assert_eq!(summary["run_id"], "run-2");
        assert_eq!(summary["status"], "ready");
        assert!(summary["elapsed_ms"].is_u64());
        assert_eq!(summary["services"][0]["name"], "db");
        assert_eq!(summary["services"][0]["attempts"], 2);
    }

    #[test]
    fn test_preflight_record() {
        let err = PreflightError::PortConflicts(vec![PortConflict {
            port: 5432,
            service: "db".into(),
            pid: Some(10),
            process_name: Some("postgres".into()),
            claimed_by: vec![],
            occupied: true,
        }]);
        let record = preflight_record(&err);
        assert_eq!(record["error"], "port_conflict");
        assert_eq!(record["conflicts"][0]["port"], 5432);

        let err = PreflightError::Cycle(TopologyError::CycleDetected {
            services: vec!["a".into(), "b".into()],
        });
        assert_eq!(preflight_record(&err)["services"][1], "b");
    }
}
