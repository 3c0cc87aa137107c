//! Canned stack for `readyup verify --demo`

use std::time::Duration;

use readyup_core::model::{CommandProbe, HealthCheckSpec, Outcome, Reason, ServiceDescriptor};
use readyup_core::scripted::{Script, ScriptedProber};

fn command(probe: CommandProbe, target: &str) -> HealthCheckSpec {
    HealthCheckSpec::Command {
        probe,
        target: target.into(),
    }
}

fn http(url: &str) -> HealthCheckSpec {
    HealthCheckSpec::Http {
        url: url.into(),
        expected_status: Default::default(),
    }
}

/// A database that needs a few tries, a cache that never comes up, and the
/// services that depend on them
pub fn stack() -> (Vec<ServiceDescriptor>, ScriptedProber) {
    let db = command(CommandProbe::DatabaseQuery, "postgres://postgres@localhost:5432/postgres");
    let cache = command(CommandProbe::CachePing, "localhost:6379");
    let backend = http("http://localhost:8000/health");
    let worker = command(CommandProbe::Exec, "demo-worker --check");
    let ui = HealthCheckSpec::Tcp {
        host: "127.0.0.1".into(),
        port: 3000,
    };

    let timing = |d: ServiceDescriptor| {
        d.with_timing(
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_millis(500),
            Duration::from_secs(6),
        )
    };
    let services = vec![
        timing(ServiceDescriptor::new("db", "database", db.clone())),
        timing(ServiceDescriptor::new("cache", "cache", cache.clone())),
        timing(ServiceDescriptor::new("backend", "api", backend).depends_on(["db", "cache"])),
        timing(ServiceDescriptor::new("worker", "service", worker.clone()).depends_on(["db"])),
        timing(ServiceDescriptor::new("ui", "ui", ui).depends_on(["backend"])),
    ];

    let prober = ScriptedProber::new()
        .script(
            &db,
            Script::HealthyAfter {
                failures: 3,
                reason: Reason::ServiceDown,
            },
        )
        .script(
            &cache,
            Script::Always(Outcome::unhealthy(
                Reason::ServiceDown,
                "connection refused (127.0.0.1:6379)",
            )),
        )
        .script(&worker, Script::Delayed(Duration::from_millis(700)));

    (services, prober)
}
