use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use readyup_core::config::{OutputMode, Settings};
use readyup_core::model::{ServiceDescriptor, ServiceId};
use readyup_core::orchestrator::{Orchestrator, PreflightError};
use readyup_core::poller::FailurePolicy;
use readyup_core::probe::Prober;
use readyup_core::topology::{self, TopologyError};

use super::{EXIT_NOT_READY, EXIT_PREFLIGHT, EXIT_READY, config_failure, demo, load};
use crate::host::HostSocketTable;
use crate::probes;
use crate::reporters::{self, render};
use crate::ui::Theme;

/// Flags for `readyup verify`; applied on top of the file and environment
#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    pub config: Option<PathBuf>,
    pub profile: Option<String>,
    pub global_timeout_secs: Option<f64>,
    pub poll_interval_secs: Option<f64>,
    pub output: Option<OutputMode>,
    pub fail_fast: bool,
    pub demo: bool,
}

impl VerifyOptions {
    fn apply(&self, settings: &mut Settings) {
        if let Some(secs) = self.global_timeout_secs {
            settings.global_timeout_ms = (secs * 1000.0).round().max(1.0) as u64;
        }
        if let Some(secs) = self.poll_interval_secs {
            settings.poll_interval_ms = (secs * 1000.0).round().max(1.0) as u64;
        }
        if let Some(output) = self.output {
            settings.output = output;
        }
        if self.fail_fast {
            settings.failure_policy = FailurePolicy::FailFast;
        }
    }
}

/// Services in start order for display; falls back to name order when the
/// graph does not resolve (pre-flight reports that)
fn display_order(services: &[ServiceDescriptor]) -> Vec<ServiceId> {
    let map: BTreeMap<ServiceId, ServiceDescriptor> =
        services.iter().map(|s| (s.name.clone(), s.clone())).collect();
    match topology::resolve(&map) {
        Ok(levels) => levels.ordered(),
        Err(_) => map.into_keys().collect(),
    }
}

/// Cancel the run on Ctrl-C. Services that are already up keep running.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if res.is_ok() {
                    tracing::warn!("interrupted, resolving remaining services as timed out");
                    token.cancel();
                }
            }
            _ = token.cancelled() => {}
        }
    });
}

fn report_preflight(err: &PreflightError, mode: OutputMode) {
    if mode == OutputMode::Json {
        println!("{}", reporters::preflight_record(err));
        return;
    }
    let theme = Theme::new(false);
    match err {
        PreflightError::PortConflicts(conflicts) => eprint!("{}", render::conflicts(&theme, conflicts)),
        PreflightError::Cycle(TopologyError::CycleDetected { services }) => {
            eprintln!("Dependency cycle, nothing was started:");
            eprintln!("  {}", services.join(" <-> "));
            eprintln!("  Break the cycle in depends_on and try again");
        }
        PreflightError::Cycle(other) => eprintln!("Error: {}", other),
    }
}

pub async fn run_verify(opts: VerifyOptions) -> ExitCode {
    let (services, settings, prober): (Vec<ServiceDescriptor>, Settings, Arc<dyn Prober>) = if opts.demo {
        let (services, prober) = demo::stack();
        let mut settings = Settings::default();
        opts.apply(&mut settings);
        let prober: Arc<dyn Prober> = Arc::new(prober);
        (services, settings, prober)
    } else {
        let mut config = match load(opts.config.as_deref()) {
            Ok((_, config)) => config,
            Err(e) => return config_failure(&e),
        };
        if let Err(e) = config.settings.apply_env(|k| std::env::var(k).ok()) {
            return config_failure(&e);
        }
        opts.apply(&mut config.settings);
        // Poll interval overrides only reach services without their own
        let services = match config.descriptors(opts.profile.as_deref()) {
            Ok(s) => s,
            Err(e) => return config_failure(&e),
        };
        let prober: Arc<dyn Prober> = Arc::new(probes::registry());
        (services, config.settings, prober)
    };

    let mode = reporters::resolve_mode(settings.output);
    tracing::debug!(?mode, policy = ?settings.failure_policy, timeout = ?settings.global_timeout(), "verify");

    let reporter = reporters::for_mode(mode, display_order(&services));
    let orchestrator = Orchestrator::new(prober, Arc::new(HostSocketTable), settings.poller_options());

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    let result = orchestrator.verify(&services, reporter, &cancel).await;
    cancel.cancel();

    match result {
        Ok(report) if report.status.is_ready() => ExitCode::from(EXIT_READY),
        Ok(_) => ExitCode::from(EXIT_NOT_READY),
        Err(e) => {
            report_preflight(&e, mode);
            ExitCode::from(EXIT_PREFLIGHT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readyup_core::model::{HealthCheckSpec, ServiceState};
    use readyup_core::reporter::NullReporter;
    use readyup_core::state::RunStatus;

    #[test]
    fn test_flags_override_settings() {
        let mut settings = Settings::default();
        VerifyOptions {
            global_timeout_secs: Some(30.0),
            poll_interval_secs: Some(0.25),
            output: Some(OutputMode::Json),
            fail_fast: true,
            ..Default::default()
        }
        .apply(&mut settings);
        assert_eq!(settings.global_timeout_ms, 30_000);
        assert_eq!(settings.poll_interval_ms, 250);
        assert_eq!(settings.output, OutputMode::Json);
        assert_eq!(settings.failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn test_display_order_follows_levels() {
        let tcp = |port| HealthCheckSpec::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        let services = vec![
            ServiceDescriptor::new("api", "api", tcp(1)).depends_on(["db"]),
            ServiceDescriptor::new("db", "database", tcp(2)),
        ];
        assert_eq!(display_order(&services), vec!["db".to_string(), "api".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_stack_is_degraded() {
        let (services, prober) = demo::stack();
        let orchestrator = Orchestrator::new(
            Arc::new(prober),
            Arc::new(HostSocketTable),
            Settings::default().poller_options(),
        );
        let report = orchestrator
            .verify(&services, Box::new(NullReporter), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Degraded);
        assert_eq!(report.service("db").unwrap().state, ServiceState::Healthy);
        assert_eq!(report.service("db").unwrap().attempts, 4);
        assert_eq!(report.service("worker").unwrap().state, ServiceState::Healthy);
        assert_eq!(report.service("cache").unwrap().state, ServiceState::Unhealthy);
        assert_eq!(report.service("backend").unwrap().state, ServiceState::Blocked);
        assert_eq!(
            report.service("ui").unwrap().root_blockers,
            vec!["cache".to_string()]
        );
        assert_eq!(report.root_causes, vec!["cache".to_string()]);
    }
}
