//! Plain-text rendering shared by the interactive reporter and subcommands

use std::fmt::Write as _;
use std::time::Duration;

use readyup_core::diagnostics::{Report, ServiceReport};
use readyup_core::model::ServiceState;
use readyup_core::ports::PortConflict;

use crate::ui::Theme;

pub fn secs(d: Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}

/// One status line for a service
pub fn service_line(
    theme: &Theme,
    name: &str,
    width: usize,
    state: ServiceState,
    attempts: u32,
    note: Option<&str>,
) -> String {
    let mut line = format!("  {:<width$}  {}", name, theme.state(state), width = width);
    if attempts > 0 {
        let _ = write!(line, " {}", theme.dim(&format!("({} attempts)", attempts)));
    }
    if let Some(note) = note {
        let _ = write!(line, " {}", theme.dim(note));
    }
    line
}

fn failure_summary(s: &ServiceReport) -> String {
    match (&s.reason, &s.detail) {
        (Some(reason), Some(detail)) if !detail.is_empty() => format!("{}: {}", reason, detail),
        (Some(reason), _) => reason.to_string(),
        (None, Some(detail)) => detail.clone(),
        (None, None) => s.state.label().to_string(),
    }
}

/// Final report, root causes first
pub fn report(theme: &Theme, report: &Report) -> String {
    let mut out = String::new();

    let roots: Vec<&ServiceReport> = report.services.iter().filter(|s| s.is_root_cause()).collect();
    if !roots.is_empty() {
        let _ = writeln!(out, "{}", theme.bold("Root causes:"));
        for s in roots {
            let _ = writeln!(
                out,
                "  {} {} {}",
                theme.paint(theme.state_icon(s.state), theme.state_color(s.state)),
                theme.bold(&s.name),
                theme.dim(&format!("[{}]", s.kind)),
            );
            let _ = writeln!(
                out,
                "      {} after {} attempt(s)",
                theme.paint(&format!("{}: {}", s.state.label(), failure_summary(s)), theme.state_color(s.state)),
                s.attempts
            );
            if let Some(hint) = s.hint {
                let _ = writeln!(out, "      {} {}", theme.accent("hint:"), hint);
            }
            for step in &s.guidance {
                let _ = writeln!(out, "      - {}", step);
            }
        }
        let _ = writeln!(out);
    }

    let blocked: Vec<&ServiceReport> = report
        .services
        .iter()
        .filter(|s| s.state == ServiceState::Blocked)
        .collect();
    if !blocked.is_empty() {
        let _ = writeln!(out, "{}", theme.bold("Blocked:"));
        for s in blocked {
            let mut line = format!(
                "  {} {} waiting on {}",
                theme.paint(theme.state_icon(s.state), theme.state_color(s.state)),
                s.name,
                s.blocked_by.join(", ")
            );
            if !s.root_blockers.is_empty() && s.root_blockers != s.blocked_by {
                let _ = write!(line, " {}", theme.dim(&format!("(root: {})", s.root_blockers.join(", "))));
            }
            let _ = writeln!(out, "{}", line);
        }
        let _ = writeln!(out);
    }

    let healthy: Vec<&ServiceReport> = report
        .services
        .iter()
        .filter(|s| s.state == ServiceState::Healthy)
        .collect();
    if !healthy.is_empty() {
        let _ = writeln!(out, "{}", theme.bold("Healthy:"));
        for s in healthy {
            let took = s.checking_time.map(secs).unwrap_or_default();
            let _ = writeln!(
                out,
                "  {} {} {}",
                theme.paint(theme.state_icon(s.state), theme.state_color(s.state)),
                s.name,
                theme.dim(&format!("{} attempt(s), {}", s.attempts, took))
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(
        out,
        "{} {} ({}/{} healthy, {})",
        theme.bold("Status:"),
        theme.paint(&report.status.to_string().to_uppercase(), theme.status_color(report.status)),
        report.healthy_count(),
        report.services.len(),
        secs(report.elapsed)
    );
    out
}

pub fn conflicts(theme: &Theme, conflicts: &[PortConflict]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        theme.paint(
            &format!("{} port conflict(s), nothing was started:", conflicts.len()),
            theme.palette.error
        )
    );
    for c in conflicts {
        let _ = writeln!(out, "  ✗ {}", c);
    }
    out
}
