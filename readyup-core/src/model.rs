use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type ServiceId = String;

/// Default time a single probe may take before it counts as `Timeout`
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default window after entering `Checking` during which failures are absorbed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);
/// Default delay between two probes of the same service
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default per-service ceiling on time spent in `Checking`
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// Inclusive range of HTTP status codes treated as success
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u16, u16)", into = "(u16, u16)")]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, status: u16) -> bool {
        (self.min..=self.max).contains(&status)
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max && (100..=599).contains(&self.min) && (100..=599).contains(&self.max)
    }
}

impl Default for StatusRange {
    fn default() -> Self {
        Self { min: 200, max: 299 }
    }
}

impl From<(u16, u16)> for StatusRange {
    fn from((min, max): (u16, u16)) -> Self {
        Self { min, max }
    }
}

impl From<StatusRange> for (u16, u16) {
    fn from(r: StatusRange) -> Self {
        (r.min, r.max)
    }
}

impl fmt::Display for StatusRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Command-style probes: a round trip that proves the service answers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandProbe {
    /// Run a trivial query (`SELECT 1`) against a database URL
    DatabaseQuery,
    /// Send `PING` to a cache at `host:port` and expect `PONG`
    CachePing,
    /// Run a shell command; exit 0 = healthy
    Exec,
}

/// How a service proves it is ready
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthCheckSpec {
    /// TCP reachability - connect and close
    Tcp {
        #[serde(default = "default_host")]
        host: String,
        port: u16,
    },
    /// HTTP GET expecting a status in `expected_status`
    Http {
        url: String,
        #[serde(default)]
        expected_status: StatusRange,
    },
    /// Command-style check (database query, cache ping, arbitrary command)
    Command { probe: CommandProbe, target: String },
}

fn default_host() -> String {
    "127.0.0.1".into()
}

/// Discriminant used by the probe registry to pick a checker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProbeKind {
    Tcp,
    Http,
    DatabaseQuery,
    CachePing,
    Exec,
}

impl HealthCheckSpec {
    pub fn kind(&self) -> ProbeKind {
        match self {
            Self::Tcp { .. } => ProbeKind::Tcp,
            Self::Http { .. } => ProbeKind::Http,
            Self::Command { probe, .. } => match probe {
                CommandProbe::DatabaseQuery => ProbeKind::DatabaseQuery,
                CommandProbe::CachePing => ProbeKind::CachePing,
                CommandProbe::Exec => ProbeKind::Exec,
            },
        }
    }
}

impl fmt::Display for HealthCheckSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp {}:{}", host, port),
            Self::Http {
                url,
                expected_status,
            } => write!(f, "http {} (expect {})", url, expected_status),
            Self::Command { probe, target } => match probe {
                CommandProbe::DatabaseQuery => write!(f, "query {}", target),
                CommandProbe::CachePing => write!(f, "ping {}", target),
                CommandProbe::Exec => write!(f, "exec `{}`", target),
            },
        }
    }
}

/// Why a probe (or a whole service) failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Connection refused - nothing is listening
    ServiceDown,
    /// No answer within the per-attempt timeout
    Timeout,
    /// Host name could not be resolved
    DnsFailure,
    NetworkUnreachable,
    ConnectionReset,
    /// Transport worked but the answer was wrong (HTTP status, bad reply)
    ProtocolError,
    Unknown,
    /// Run-wide deadline elapsed before the service resolved
    GlobalTimeout,
    /// Run was cancelled (operator interrupt or fail-fast)
    Interrupted,
}

impl Reason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ServiceDown => "service down",
            Self::Timeout => "timeout",
            Self::DnsFailure => "DNS failure",
            Self::NetworkUnreachable => "network unreachable",
            Self::ConnectionReset => "connection reset",
            Self::ProtocolError => "protocol error",
            Self::Unknown => "unknown error",
            Self::GlobalTimeout => "global timeout",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a single probe
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Healthy,
    Unhealthy { reason: Reason, detail: String },
}

impl Outcome {
    pub fn unhealthy(reason: Reason, detail: impl Into<String>) -> Self {
        Self::Unhealthy {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn reason(&self) -> Option<Reason> {
        match self {
            Self::Healthy => None,
            Self::Unhealthy { reason, .. } => Some(*reason),
        }
    }
}

/// Per-service state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Pending,
    Starting,
    Checking,
    Healthy,
    Unhealthy,
    TimedOut,
    /// A dependency did not become healthy; never probed
    Blocked,
}

impl ServiceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Healthy | Self::Unhealthy | Self::TimedOut | Self::Blocked
        )
    }

    /// Terminal and not healthy
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != Self::Healthy
    }

    /// Legal edges of the state machine. Terminal states have none.
    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Pending, Starting | Blocked | TimedOut)
                | (Starting, Checking | TimedOut)
                | (Checking, Healthy | Unhealthy | TimedOut)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Checking => "checking",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::TimedOut => "timed out",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything the engine needs to know about one service. Immutable for a run.
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    pub name: ServiceId,
    /// Free-form tag (database, cache, api, ui, ...) used to pick diagnostics
    pub kind: String,
    pub depends_on: BTreeSet<ServiceId>,
    pub health_check: HealthCheckSpec,
    pub attempt_timeout: Duration,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    /// Host ports this service needs free before the stack starts
    pub ports: Vec<u16>,
    pub description: Option<String>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, check: HealthCheckSpec) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            depends_on: BTreeSet::new(),
            health_check: check,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            ports: Vec::new(),
            description: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_timing(
        mut self,
        attempt_timeout: Duration,
        grace_period: Duration,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Self {
        self.attempt_timeout = attempt_timeout;
        self.grace_period = grace_period;
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self
    }

    pub fn with_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.ports.extend(ports);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        use ServiceState::*;
        let all = [Pending, Starting, Checking, Healthy, Unhealthy, TimedOut, Blocked];
        for from in [Healthy, Unhealthy, TimedOut, Blocked] {
            for to in all {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
        assert!(Pending.can_transition_to(Starting));
        assert!(Checking.can_transition_to(Healthy));
        assert!(!Pending.can_transition_to(Checking));
        assert!(!Checking.can_transition_to(Blocked));
    }

    #[test]
    fn test_status_range() {
        let r = StatusRange::default();
        assert!(r.contains(200));
        assert!(r.contains(299));
        assert!(!r.contains(301));
        assert!(!StatusRange::new(500, 200).is_valid());
    }

    #[test]
    fn test_health_check_yaml_shapes() {
        let tcp: HealthCheckSpec = serde_yaml::from_str("type: tcp\nport: 6379").unwrap();
        assert_eq!(
            tcp,
            HealthCheckSpec::Tcp {
                host: "127.0.0.1".into(),
                port: 6379
            }
        );

        let http: HealthCheckSpec =
            serde_yaml::from_str("type: http\nurl: http://localhost/health\nexpected_status: [200, 204]")
                .unwrap();
        assert_eq!(http.kind(), ProbeKind::Http);

        let cmd: HealthCheckSpec =
            serde_yaml::from_str("type: command\nprobe: cache-ping\ntarget: localhost:6379").unwrap();
        assert_eq!(cmd.kind(), ProbeKind::CachePing);
    }
}
