use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    CommandProbe, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_GRACE_PERIOD, DEFAULT_MAX_WAIT,
    DEFAULT_POLL_INTERVAL, HealthCheckSpec, ServiceDescriptor, ServiceId,
};
use crate::poller::{DEFAULT_GLOBAL_TIMEOUT, FailurePolicy, PollerOptions};

pub const CONFIG_ENV: &str = "READYUP_CONFIG";
pub const GLOBAL_TIMEOUT_ENV: &str = "READYUP_GLOBAL_TIMEOUT";
pub const POLL_INTERVAL_ENV: &str = "READYUP_POLL_INTERVAL";
pub const OUTPUT_ENV: &str = "READYUP_OUTPUT";
pub const FAIL_FAST_ENV: &str = "READYUP_FAIL_FAST";
pub const PROFILE_ENV: &str = "READYUP_PROFILE";

const CONFIG_NAMES: [&str; 4] = ["readyup.yml", "readyup.yaml", ".readyup.yml", ".readyup.yaml"];

/// How progress is rendered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Interactive on a terminal, JSON otherwise
    #[default]
    Auto,
    Interactive,
    Json,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "interactive" | "tty" | "human" => Ok(Self::Interactive),
            "json" | "jsonl" | "machine" => Ok(Self::Json),
            other => Err(format!("unknown output mode '{}'", other)),
        }
    }
}

/// Run-wide tunables
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_global_timeout")]
    pub global_timeout_ms: u64,

    /// Poll interval for services that do not set their own
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub output: OutputMode,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_global_timeout() -> u64 {
    DEFAULT_GLOBAL_TIMEOUT.as_millis() as u64
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            global_timeout_ms: default_global_timeout(),
            poll_interval_ms: default_poll_interval(),
            output: OutputMode::Auto,
            failure_policy: FailurePolicy::Continue,
        }
    }
}

impl Settings {
    /// Apply `READYUP_*` overrides. `lookup` is `std::env::var` in the binary.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup(GLOBAL_TIMEOUT_ENV) {
            self.global_timeout_ms = parse_seconds(GLOBAL_TIMEOUT_ENV, &v)?;
        }
        if let Some(v) = lookup(POLL_INTERVAL_ENV) {
            self.poll_interval_ms = parse_seconds(POLL_INTERVAL_ENV, &v)?;
        }
        if let Some(v) = lookup(OUTPUT_ENV) {
            self.output = v.parse().map_err(|reason| ConfigError::InvalidEnv {
                var: OUTPUT_ENV,
                reason,
            })?;
        }
        if let Some(v) = lookup(FAIL_FAST_ENV) {
            if matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes") {
                self.failure_policy = FailurePolicy::FailFast;
            }
        }
        Ok(())
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            global_timeout: self.global_timeout(),
            failure_policy: self.failure_policy,
        }
    }
}

/// Seconds (fractions allowed) to milliseconds, never below 1ms
fn parse_seconds(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok((secs * 1000.0).round().max(1.0) as u64),
        _ => Err(ConfigError::InvalidEnv {
            var,
            reason: format!("expected a positive number of seconds, got '{}'", value),
        }),
    }
}

/// Service definition in the config file
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service kind (database, cache, api, ui, ...); selects diagnostics
    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Services that must be healthy before this one is checked
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Host ports that must be free before the stack starts
    #[serde(default)]
    pub ports: Vec<u16>,

    pub health_check: HealthCheckSpec,

    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,

    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    /// Falls back to `settings.poll_interval_ms`
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,
}

fn default_kind() -> String {
    "generic".into()
}
fn default_attempt_timeout() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT.as_millis() as u64
}
fn default_grace_period() -> u64 {
    DEFAULT_GRACE_PERIOD.as_millis() as u64
}
fn default_max_wait() -> u64 {
    DEFAULT_MAX_WAIT.as_millis() as u64
}

/// Root configuration file structure
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReadyupConfig {
    #[serde(default = "default_version")]
    pub version: String,

    /// Project name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub settings: Settings,

    /// Named subsets of services
    #[serde(default)]
    pub profiles: BTreeMap<String, Vec<String>>,

    pub services: BTreeMap<String, ServiceConfig>,
}

fn default_version() -> String {
    "1".into()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    InvalidDependency { service: String, dependency: String },

    #[error("service '{service}': {reason}")]
    InvalidService { service: String, reason: String },

    #[error("unknown profile '{profile}', available: {}", .available.join(", "))]
    UnknownProfile {
        profile: String,
        available: Vec<String>,
    },

    #[error("profile '{profile}' names unknown service '{service}'")]
    InvalidProfile { profile: String, service: String },

    #[error("invalid {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },

    #[error("no config file found, searched: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
}

impl ReadyupConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a string (useful for testing)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ReadyupConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search for a config file: `$READYUP_CONFIG`, then the directory and its parents
    pub fn discover(start_dir: &Path) -> Result<(PathBuf, Self), ConfigError> {
        let mut searched = Vec::new();

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok((path.clone(), Self::load(&path)?));
            }
            searched.push(path);
        }

        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in &CONFIG_NAMES {
                let path = current.join(name);
                if path.exists() {
                    return Ok((path.clone(), Self::load(&path)?));
                }
                searched.push(path);
            }
            dir = current.parent();
        }

        Err(ConfigError::NotFound { searched })
    }

    /// Validate the configuration. Cycles are left to the topology resolver so
    /// they surface as a pre-flight abort with every member named.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidService {
                service: "settings".into(),
                reason: "poll_interval_ms must be greater than zero".into(),
            });
        }

        for (id, svc) in &self.services {
            for dep in &svc.depends_on {
                if !self.services.contains_key(dep) {
                    return Err(ConfigError::InvalidDependency {
                        service: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }

            let invalid = |reason: &str| ConfigError::InvalidService {
                service: id.clone(),
                reason: reason.to_string(),
            };
            match &svc.health_check {
                HealthCheckSpec::Http {
                    url,
                    expected_status,
                } => {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        return Err(invalid("health check url must start with http:// or https://"));
                    }
                    if !expected_status.is_valid() {
                        return Err(invalid("expected_status must be a [min, max] range of HTTP codes"));
                    }
                }
                HealthCheckSpec::Command { probe, target } => {
                    if target.trim().is_empty() {
                        return Err(invalid("command health check needs a target"));
                    }
                    if *probe == CommandProbe::CachePing && !target.contains(':') {
                        return Err(invalid("cache-ping target must be host:port"));
                    }
                }
                HealthCheckSpec::Tcp { host, .. } => {
                    if host.trim().is_empty() {
                        return Err(invalid("tcp health check needs a host"));
                    }
                }
            }
            if svc.poll_interval_ms == Some(0) {
                return Err(invalid("poll_interval_ms must be greater than zero"));
            }
            if svc.attempt_timeout_ms == 0 {
                return Err(invalid("attempt_timeout_ms must be greater than zero"));
            }
        }

        for (profile, members) in &self.profiles {
            for service in members {
                if !self.services.contains_key(service) {
                    return Err(ConfigError::InvalidProfile {
                        profile: profile.clone(),
                        service: service.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Service names selected by a profile, plus everything they depend on.
    /// No profile selects every service.
    pub fn select(&self, profile: Option<&str>) -> Result<BTreeSet<ServiceId>, ConfigError> {
        let Some(profile) = profile else {
            return Ok(self.services.keys().cloned().collect());
        };
        let members = self
            .profiles
            .get(profile)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: profile.to_string(),
                available: self.profiles.keys().cloned().collect(),
            })?;

        let mut selected: BTreeSet<ServiceId> = members.iter().cloned().collect();
        let mut stack: Vec<&String> = members.iter().collect();
        while let Some(id) = stack.pop() {
            let Some(svc) = self.services.get(id) else {
                continue;
            };
            for dep in &svc.depends_on {
                if selected.insert(dep.clone()) {
                    tracing::warn!(
                        profile,
                        service = %id,
                        dependency = %dep,
                        "including dependency not listed in profile"
                    );
                    stack.push(dep);
                }
            }
        }
        Ok(selected)
    }

    /// Build immutable descriptors for the selected services
    pub fn descriptors(&self, profile: Option<&str>) -> Result<Vec<ServiceDescriptor>, ConfigError> {
        let selected = self.select(profile)?;
        Ok(self
            .services
            .iter()
            .filter(|(id, _)| selected.contains(*id))
            .map(|(id, svc)| self.descriptor(id, svc))
            .collect())
    }

    fn descriptor(&self, id: &str, svc: &ServiceConfig) -> ServiceDescriptor {
        let poll = svc.poll_interval_ms.unwrap_or(self.settings.poll_interval_ms);
        let mut desc = ServiceDescriptor::new(id, svc.kind.clone(), svc.health_check.clone())
            .depends_on(svc.depends_on.iter().cloned())
            .with_timing(
                Duration::from_millis(svc.attempt_timeout_ms),
                Duration::from_millis(svc.grace_period_ms),
                Duration::from_millis(poll),
                Duration::from_millis(svc.max_wait_ms),
            )
            .with_ports(svc.ports.iter().copied());
        desc.description = svc.description.clone();
        desc
    }
}
