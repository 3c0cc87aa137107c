use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::Duration;

use crossterm::{
    cursor::MoveUp,
    queue,
    terminal::{Clear, ClearType},
};

use readyup_core::diagnostics::Report;
use readyup_core::model::{ServiceId, ServiceState};
use readyup_core::reducer::{ProbeAttempt, Transition};
use readyup_core::reporter::ProgressReporter;

use super::render;
use crate::ui::Theme;

#[derive(Clone, Debug)]
struct Row {
    state: ServiceState,
    attempts: u32,
    note: Option<String>,
}

/// Human-readable progress.
///
/// On a terminal the table of services is redrawn in place after every
/// change; otherwise each transition is appended as its own line.
pub struct InteractiveReporter<W: Write + Send> {
    out: W,
    theme: Theme,
    live: bool,
    order: Vec<ServiceId>,
    rows: BTreeMap<ServiceId, Row>,
    width: usize,
    drawn: bool,
}

impl<W: Write + Send> InteractiveReporter<W> {
    /// `order` is the display order, normally the start levels flattened
    pub fn new(out: W, order: Vec<ServiceId>, live: bool, color: bool) -> Self {
        let rows = order
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    Row {
                        state: ServiceState::Pending,
                        attempts: 0,
                        note: None,
                    },
                )
            })
            .collect();
        let width = order.iter().map(String::len).max().unwrap_or(0);
        Self {
            out,
            theme: Theme::new(color),
            live,
            order,
            rows,
            width,
            drawn: false,
        }
    }

    fn redraw(&mut self) -> io::Result<()> {
        if self.drawn && !self.order.is_empty() {
            queue!(self.out, MoveUp(self.order.len() as u16))?;
        }
        for id in &self.order {
            let Some(row) = self.rows.get(id) else {
                continue;
            };
            queue!(self.out, Clear(ClearType::CurrentLine))?;
            let line = render::service_line(
                &self.theme,
                id,
                self.width,
                row.state,
                row.attempts,
                row.note.as_deref(),
            );
            writeln!(self.out, "{}", line)?;
        }
        self.drawn = true;
        self.out.flush()
    }

    fn append(&mut self, elapsed: Duration, t: &Transition) -> io::Result<()> {
        let mut line = format!(
            "[{:>6}] {:<width$}  {} -> {}",
            render::secs(elapsed),
            t.service,
            t.from.label(),
            self.theme.state(t.to),
            width = self.width
        );
        if let Some(reason) = t.reason {
            line.push_str(&format!(" ({})", reason));
        }
        if !t.blocked_by.is_empty() {
            line.push_str(&format!(" by {}", t.blocked_by.join(", ")));
        }
        writeln!(self.out, "{}", line)?;
        self.out.flush()
    }
}

fn note_for(t: &Transition) -> Option<String> {
    if !t.blocked_by.is_empty() {
        Some(format!("by {}", t.blocked_by.join(", ")))
    } else {
        t.reason.map(|r| r.to_string())
    }
}

impl<W: Write + Send> ProgressReporter for InteractiveReporter<W> {
    fn on_transition(&mut self, elapsed: Duration, transition: &Transition) {
        if let Some(row) = self.rows.get_mut(&transition.service) {
            row.state = transition.to;
            row.note = note_for(transition);
        }
        let res = if self.live {
            self.redraw()
        } else {
            self.append(elapsed, transition)
        };
        if let Err(e) = res {
            tracing::debug!(error = %e, "progress output failed");
        }
    }

    fn on_probe(&mut self, _elapsed: Duration, attempt: &ProbeAttempt) {
        let Some(row) = self.rows.get_mut(&attempt.service) else {
            return;
        };
        row.attempts = attempt.attempt;
        if let Some(reason) = attempt.outcome.reason() {
            row.note = Some(if attempt.within_grace {
                format!("{} (in grace period)", reason)
            } else {
                reason.to_string()
            });
        }
        if self.live {
            if let Err(e) = self.redraw() {
                tracing::debug!(error = %e, "progress output failed");
            }
        }
    }

    fn finish(&mut self, report: &Report) {
        let text = render::report(&self.theme, report);
        if let Err(e) = writeln!(self.out, "\n{}", text).and_then(|_| self.out.flush()) {
            tracing::debug!(error = %e, "report output failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readyup_core::model::Reason;

    #[test]
    fn test_append_mode_writes_one_line_per_transition() {
        let mut reporter = InteractiveReporter::new(Vec::new(), vec!["db".into(), "backend".into()], false, false);
        reporter.on_transition(
            Duration::from_millis(1200),
            &Transition::new("db", ServiceState::Checking, ServiceState::Unhealthy)
                .with_reason(Reason::ServiceDown, "refused"),
        );
        reporter.on_transition(
            Duration::from_millis(1300),
            &Transition::new("backend", ServiceState::Pending, ServiceState::Blocked)
                .blocked_by(vec!["db".into()]),
        );

        let text = String::from_utf8(reporter.out.clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "[  1.2s] db       checking -> ✗ unhealthy (service down)");
        assert!(lines[1].ends_with("⊘ blocked by db"));
    }

    #[test]
    fn test_live_mode_tracks_rows() {
        let mut reporter = InteractiveReporter::new(Vec::new(), vec!["db".into()], true, false);
        reporter.on_transition(
            Duration::ZERO,
            &Transition::new("db", ServiceState::Pending, ServiceState::Starting),
        );
        reporter.on_transition(
            Duration::ZERO,
            &Transition::new("db", ServiceState::Starting, ServiceState::Checking),
        );
        assert_eq!(reporter.rows["db"].state, ServiceState::Checking);
        let text = String::from_utf8_lossy(&reporter.out).to_string();
        assert!(text.contains("◑ checking"));
    }
}
