//! Host socket table: bind probing plus listener ownership lookup

use std::net::{Ipv4Addr, TcpListener};

use sysinfo::{Pid, ProcessesToUpdate, System};

use readyup_core::ports::{ProcessInfo, SocketTable};

/// TCP state code for LISTEN in /proc/net/tcp
const TCP_LISTEN: &str = "0A";

pub struct HostSocketTable;

impl SocketTable for HostSocketTable {
    fn is_available(&self, port: u16) -> bool {
        // A listener on either address blocks the service's own bind
        [Ipv4Addr::LOCALHOST, Ipv4Addr::UNSPECIFIED]
            .into_iter()
            .all(|ip| TcpListener::bind((ip, port)).is_ok())
    }

    fn owner(&self, port: u16) -> Option<ProcessInfo> {
        let pid = listener_pid(port)?;
        let name = process_name(pid).unwrap_or_else(|| "unknown".into());
        Some(ProcessInfo { pid, name })
    }
}

fn process_name(pid: u32) -> Option<String> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .map(|p| p.name().to_string_lossy().into_owned())
}

#[cfg(target_os = "linux")]
fn listener_pid(port: u16) -> Option<u32> {
    let mut inodes = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(text) = std::fs::read_to_string(table) {
            inodes.extend(listening_inodes(&text, port));
        }
    }
    if inodes.is_empty() {
        tracing::debug!(port, "no listening inode found");
        return None;
    }
    pid_owning_inode(&inodes)
}

#[cfg(target_os = "macos")]
fn listener_pid(port: u16) -> Option<u32> {
    let output = std::process::Command::new("lsof")
        .args(["-nP", &format!("-iTCP:{}", port), "-sTCP:LISTEN", "-Fp"])
        .output()
        .ok()?;
    lsof_pids(&String::from_utf8_lossy(&output.stdout)).into_iter().next()
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn listener_pid(_port: u16) -> Option<u32> {
    None
}

/// Socket inodes listening on `port` in a /proc/net/tcp{,6} dump
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn listening_inodes(table: &str, port: u16) -> Vec<u64> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let state = fields.get(3)?;
            let inode = fields.get(9)?;
            let (_, hex_port) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(hex_port, 16).ok()?;
            (local_port == port && *state == TCP_LISTEN)
                .then(|| inode.parse().ok())
                .flatten()
        })
        .filter(|inode| *inode != 0)
        .collect()
}

/// Scan /proc/<pid>/fd for a socket link to one of `inodes`
#[cfg(target_os = "linux")]
fn pid_owning_inode(inodes: &[u64]) -> Option<u32> {
    let targets: Vec<String> = inodes.iter().map(|i| format!("socket:[{}]", i)).collect();
    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Other users' processes are unreadable without privileges
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path()) {
                if targets.iter().any(|t| link.as_os_str() == t.as_str()) {
                    return Some(pid);
                }
            }
        }
    }
    None
}

/// PIDs from `lsof -F p` output
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn lsof_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|l| l.strip_prefix('p'))
        .filter_map(|p| p.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_NET_TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1538 00000000:0000 0A 00000000:00000000 00:00000000 00000000   999        0 41234 1 0000000000000000 100 0 0 10 0
   1: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 55321 1 0000000000000000 100 0 0 10 0
   2: 0100007F:1F90 0100007F:C350 01 00000000:00000000 00:00000000 00000000  1000        0 55999 1 0000000000000000 20 4 30 10 -1
";

    #[test]
    fn test_listening_inodes() {
        // 0x1538 = 5432, 0x1F90 = 8080
        assert_eq!(listening_inodes(PROC_NET_TCP, 5432), vec![41234]);
        // The established connection on 8080 is not a listener
        assert_eq!(listening_inodes(PROC_NET_TCP, 8080), vec![55321]);
        assert!(listening_inodes(PROC_NET_TCP, 6379).is_empty());
    }

    #[test]
    fn test_lsof_pids() {
        assert_eq!(lsof_pids("p4242\nf7\np99\n"), vec![4242, 99]);
        assert!(lsof_pids("").is_empty());
    }

    #[test]
    fn test_bound_port_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let table = HostSocketTable;
        assert!(!table.is_available(port));

        drop(listener);
        assert!(table.is_available(port));
    }

    #[test]
    fn test_process_name_of_self() {
        let name = process_name(std::process::id()).unwrap();
        assert!(!name.is_empty());
        assert!(process_name(u32::MAX).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_owner_is_this_process() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let owner = HostSocketTable.owner(port).unwrap();
        assert_eq!(owner.pid, std::process::id());
    }
}
