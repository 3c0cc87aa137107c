//! Port conflict detection
//!
//! Runs once before anything starts. Every requested port is checked and every
//! conflict collected, so the operator can fix the configuration in one go.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::model::{ServiceDescriptor, ServiceId};

/// A process holding a socket
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// View of the host's socket table.
///
/// `readyup-cli` provides the real implementation (bind probe plus a
/// per-platform process lookup); tests use an in-memory table.
pub trait SocketTable: Send + Sync {
    /// True if a listener could be bound to `port` right now
    fn is_available(&self, port: u16) -> bool;

    /// Process listening on `port`, if the OS will tell us
    fn owner(&self, port: u16) -> Option<ProcessInfo>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortConflict {
    pub port: u16,
    /// Service that asked for the port
    pub service: ServiceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    /// Other configured services asking for the same port
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub claimed_by: Vec<ServiceId>,
    /// False when the only problem is a duplicate claim in the configuration
    pub occupied: bool,
}

impl fmt::Display for PortConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {} requested by '{}'", self.port, self.service)?;
        if self.occupied {
            match (&self.process_name, self.pid) {
                (Some(name), Some(pid)) => write!(f, " is in use by {} (PID {})", name, pid)?,
                (None, Some(pid)) => write!(f, " is in use by PID {}", pid)?,
                _ => write!(f, " is in use by an unknown process")?,
            }
        }
        if !self.claimed_by.is_empty() {
            let sep = if self.occupied { " and" } else { "" };
            write!(f, "{} is also requested by {}", sep, self.claimed_by.join(", "))?;
        }
        Ok(())
    }
}

/// (service, port) pairs for every port a set of services requires
pub fn port_requests<'a>(
    services: impl IntoIterator<Item = &'a ServiceDescriptor>,
) -> Vec<(ServiceId, u16)> {
    services
        .into_iter()
        .flat_map(|s| s.ports.iter().map(move |p| (s.name.clone(), *p)))
        .collect()
}

/// Check every requested port and return all conflicts, sorted by port then
/// service. A port requested by two services conflicts for both, whether or
/// not it is free on the host.
pub fn detect_conflicts(requests: &[(ServiceId, u16)], table: &dyn SocketTable) -> Vec<PortConflict> {
    let mut by_port: BTreeMap<u16, Vec<&ServiceId>> = BTreeMap::new();
    for (service, port) in requests {
        let claimants = by_port.entry(*port).or_default();
        if !claimants.contains(&service) {
            claimants.push(service);
        }
    }

    let mut conflicts = Vec::new();
    for (port, claimants) in by_port {
        let occupied = !table.is_available(port);
        let owner = if occupied { table.owner(port) } else { None };
        if occupied {
            tracing::warn!(port, owner = ?owner, "port already in use");
        }
        if !occupied && claimants.len() < 2 {
            continue;
        }

        let mut sorted = claimants.clone();
        sorted.sort();
        for service in &sorted {
            conflicts.push(PortConflict {
                port,
                service: (*service).clone(),
                pid: owner.as_ref().map(|o| o.pid),
                process_name: owner.as_ref().map(|o| o.name.clone()),
                claimed_by: sorted
                    .iter()
                    .filter(|other| *other != service)
                    .map(|other| (*other).clone())
                    .collect(),
                occupied,
            });
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct FakeTable {
        busy: BTreeMap<u16, Option<ProcessInfo>>,
    }

    impl SocketTable for FakeTable {
        fn is_available(&self, port: u16) -> bool {
            !self.busy.contains_key(&port)
        }

        fn owner(&self, port: u16) -> Option<ProcessInfo> {
            self.busy.get(&port).cloned().flatten()
        }
    }

    fn req(pairs: &[(&str, u16)]) -> Vec<(ServiceId, u16)> {
        pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    #[test]
    fn test_no_conflicts() {
        let table = FakeTable::default();
        assert!(detect_conflicts(&req(&[("db", 5432), ("cache", 6379)]), &table).is_empty());
    }

    #[test]
    fn test_all_occupied_ports_reported() {
        let mut table = FakeTable::default();
        table.busy.insert(
            5432,
            Some(ProcessInfo {
                pid: 42,
                name: "postgres".into(),
            }),
        );
        table.busy.insert(6379, None);

        let conflicts = detect_conflicts(&req(&[("db", 5432), ("cache", 6379), ("api", 8000)]), &table);
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].port, 5432);
        assert_eq!(conflicts[0].pid, Some(42));
        assert_eq!(conflicts[0].process_name.as_deref(), Some("postgres"));
        assert_eq!(conflicts[1].service, "cache");
        assert_eq!(conflicts[1].pid, None);
        assert!(conflicts[1].to_string().contains("unknown process"));
    }

    #[test]
    fn test_same_port_requested_twice_reports_both() {
        let table = FakeTable::default();
        let conflicts = detect_conflicts(&req(&[("api", 8000), ("ui", 8000)]), &table);
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].service, "api");
        assert_eq!(conflicts[0].claimed_by, vec!["ui".to_string()]);
        assert_eq!(conflicts[1].service, "ui");
        assert!(!conflicts[1].occupied);
        assert_eq!(
            conflicts[1].to_string(),
            "port 8000 requested by 'ui' is also requested by api"
        );
    }

    #[test]
    fn test_same_service_repeating_a_port_is_not_a_conflict() {
        let table = FakeTable::default();
        assert!(detect_conflicts(&req(&[("api", 8000), ("api", 8000)]), &table).is_empty());
    }
}
