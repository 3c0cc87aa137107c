pub mod config;
pub mod model;
pub mod topology;

// Run state: events, reducer and the shared aggregate
pub mod reducer;
pub mod state;

// Probing
pub mod poller;
pub mod probe;
pub mod scripted;

// Pre-flight + reporting
pub mod diagnostics;
pub mod ports;
pub mod reporter;

pub mod orchestrator;

pub use config::{ConfigError, OutputMode, ReadyupConfig, Settings};
pub use diagnostics::{Report, ServiceReport};
pub use model::{HealthCheckSpec, Outcome, Reason, ServiceDescriptor, ServiceId, ServiceState};
pub use orchestrator::{Orchestrator, PreflightError};
pub use poller::{FailurePolicy, PollerOptions};
pub use state::RunStatus;
