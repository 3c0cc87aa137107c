use std::path::Path;
use std::process::ExitCode;

use readyup_core::ports::{detect_conflicts, port_requests};

use super::{EXIT_PREFLIGHT, EXIT_READY, config_failure, load};
use crate::host::HostSocketTable;
use crate::reporters::render;
use crate::ui::Theme;

/// Port pre-flight only; nothing is probed
pub fn run_ports(config: Option<&Path>, profile: Option<&str>) -> ExitCode {
    let services = match load(config).and_then(|(_, c)| c.descriptors(profile)) {
        Ok(s) => s,
        Err(e) => return config_failure(&e),
    };

    let requests = port_requests(&services);
    let conflicts = detect_conflicts(&requests, &HostSocketTable);
    let theme = Theme::new(false);

    if conflicts.is_empty() {
        println!("All {} requested port(s) are free", requests.len());
        for (service, port) in &requests {
            println!("  ✓ {:>5}  {}", port, service);
        }
        ExitCode::from(EXIT_READY)
    } else {
        print!("{}", render::conflicts(&theme, &conflicts));
        ExitCode::from(EXIT_PREFLIGHT)
    }
}
