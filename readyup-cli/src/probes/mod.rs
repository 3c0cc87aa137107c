//! Concrete health checkers for the probe registry

mod command;
mod errors;
mod http;
mod tcp;

use std::sync::Arc;

use readyup_core::model::ProbeKind;
use readyup_core::probe::ProbeRegistry;

pub use command::{CachePingProber, DatabaseQueryProber, ExecProber};
pub use http::HttpProber;
pub use tcp::TcpProber;

/// Registry with every built-in checker
pub fn registry() -> ProbeRegistry {
    ProbeRegistry::new()
        .with(ProbeKind::Tcp, Arc::new(TcpProber))
        .with(ProbeKind::Http, Arc::new(HttpProber::new()))
        .with(ProbeKind::DatabaseQuery, Arc::new(DatabaseQueryProber::new()))
        .with(ProbeKind::CachePing, Arc::new(CachePingProber))
        .with(ProbeKind::Exec, Arc::new(ExecProber))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_registered() {
        let reg = registry();
        for kind in [
            ProbeKind::Tcp,
            ProbeKind::Http,
            ProbeKind::DatabaseQuery,
            ProbeKind::CachePing,
            ProbeKind::Exec,
        ] {
            assert!(reg.supports(kind), "{:?} missing", kind);
        }
    }
}
