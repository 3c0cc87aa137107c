//! Map raw failures onto readiness reasons

use std::io;

use readyup_core::model::Reason;

/// Classify a socket error by errno first, then by `ErrorKind`
pub fn classify_io(err: &io::Error) -> Reason {
    if let Some(code) = err.raw_os_error() {
        match code {
            libc::ECONNREFUSED => return Reason::ServiceDown,
            libc::ETIMEDOUT => return Reason::Timeout,
            libc::ENETUNREACH | libc::EHOSTUNREACH => return Reason::NetworkUnreachable,
            libc::ECONNRESET | libc::EPIPE | libc::ECONNABORTED => return Reason::ConnectionReset,
            _ => {}
        }
    }
    match err.kind() {
        io::ErrorKind::ConnectionRefused => Reason::ServiceDown,
        io::ErrorKind::TimedOut => Reason::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => Reason::ConnectionReset,
        io::ErrorKind::NetworkUnreachable | io::ErrorKind::HostUnreachable => {
            Reason::NetworkUnreachable
        }
        _ => Reason::Unknown,
    }
}

/// Classify the stderr of an external client (psql and friends)
pub fn classify_stderr(stderr: &str) -> Reason {
    let s = stderr.to_lowercase();
    if s.contains("could not translate host name")
        || s.contains("name or service not known")
        || s.contains("nodename nor servname")
        || s.contains("temporary failure in name resolution")
    {
        Reason::DnsFailure
    } else if s.contains("connection refused") {
        Reason::ServiceDown
    } else if s.contains("timeout expired") || s.contains("timed out") {
        Reason::Timeout
    } else if s.contains("network is unreachable") || s.contains("no route to host") {
        Reason::NetworkUnreachable
    } else if s.contains("connection reset")
        || s.contains("server closed the connection unexpectedly")
        || s.contains("broken pipe")
    {
        Reason::ConnectionReset
    } else if s.contains("authentication failed")
        || s.contains("does not exist")
        || s.contains("starting up")
        || s.contains("shutting down")
        || s.contains("in recovery mode")
    {
        Reason::ProtocolError
    } else {
        Reason::Unknown
    }
}

/// Short, single-line description of an error for the report
pub fn short(err: &dyn std::fmt::Display) -> String {
    let text = err.to_string();
    match text.lines().next() {
        Some(first) => first.trim().to_string(),
        None => text,
    }
}
