use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::diagnostics::Report;
use crate::reducer::{EventEnvelope, ProbeAttempt, RunEvent, Transition};

/// Renders progress as the engine makes it.
///
/// Reporters run on their own task, fed through an unbounded channel, so a
/// slow terminal never holds up probing. They only ever see copies of events.
pub trait ProgressReporter: Send {
    fn on_transition(&mut self, elapsed: Duration, transition: &Transition);

    fn on_probe(&mut self, elapsed: Duration, attempt: &ProbeAttempt) {
        let _ = (elapsed, attempt);
    }

    /// Called once with the final report
    fn finish(&mut self, report: &Report) {
        let _ = report;
    }
}

/// Drain events into a reporter until the channel closes, then hand it back
pub fn spawn_reporter(
    mut rx: mpsc::UnboundedReceiver<EventEnvelope>,
    mut reporter: Box<dyn ProgressReporter>,
) -> JoinHandle<Box<dyn ProgressReporter>> {
    tokio::spawn(async move {
        while let Some(env) = rx.recv().await {
            match &env.event {
                RunEvent::Transition(t) => reporter.on_transition(env.elapsed, t),
                RunEvent::Probe(p) => reporter.on_probe(env.elapsed, p),
                RunEvent::Finished { .. } => {}
            }
        }
        reporter
    })
}

/// Discards everything
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn on_transition(&mut self, _elapsed: Duration, _transition: &Transition) {}
}

/// Keeps every transition; handy for tests and embedding
#[derive(Clone, Default)]
pub struct RecordingReporter {
    pub transitions: Arc<Mutex<Vec<Transition>>>,
    pub reports: Arc<Mutex<Vec<Report>>>,
}

impl RecordingReporter {
    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingReporter {
    fn on_transition(&mut self, _elapsed: Duration, transition: &Transition) {
        if let Ok(mut t) = self.transitions.lock() {
            t.push(transition.clone());
        }
    }

    fn finish(&mut self, report: &Report) {
        if let Ok(mut r) = self.reports.lock() {
            r.push(report.clone());
        }
    }
}
