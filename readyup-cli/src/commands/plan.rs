use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;

use readyup_core::model::{ServiceDescriptor, ServiceId};
use readyup_core::topology;

use super::{EXIT_PREFLIGHT, EXIT_READY, config_failure, load};

/// Print the start levels and what each service is checked with
pub fn run_plan(config: Option<&Path>, profile: Option<&str>) -> ExitCode {
    let services = match load(config).and_then(|(_, c)| c.descriptors(profile)) {
        Ok(s) => s,
        Err(e) => return config_failure(&e),
    };
    let map: BTreeMap<ServiceId, ServiceDescriptor> =
        services.into_iter().map(|s| (s.name.clone(), s)).collect();

    let levels = match topology::resolve(&map) {
        Ok(levels) => levels,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_PREFLIGHT);
        }
    };

    for (i, level) in levels.iter().enumerate() {
        println!("Level {}:", i);
        for id in level {
            let Some(svc) = map.get(id) else {
                continue;
            };
            println!("  {} [{}]  {}", svc.name, svc.kind, svc.health_check);
            if !svc.depends_on.is_empty() {
                let deps: Vec<&str> = svc.depends_on.iter().map(String::as_str).collect();
                println!("      after: {}", deps.join(", "));
            }
            println!(
                "      grace {:?}, poll {:?}, attempt timeout {:?}, max wait {:?}",
                svc.grace_period, svc.poll_interval, svc.attempt_timeout, svc.max_wait
            );
        }
    }
    ExitCode::from(EXIT_READY)
}
