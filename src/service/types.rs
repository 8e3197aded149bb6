use crate::error::ServiceError;
use crate::signals::ProcessSignal;
use std::fmt;
use std::str::FromStr;

/// Service lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

/// Component lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Why `Service::start` returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Interrupt or terminate signal
    Signal(ProcessSignal),
    /// Hangup signal; the service can be reconfigured and started again
    Reload,
    /// A runnable returned without error
    RunnableExited(String),
    /// `Service::stop` was called
    UserRequest,
}

/// Whether every component acknowledged its stop request in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    Forced { pending: Vec<String> },
}

impl ShutdownOutcome {
    pub fn is_graceful(&self) -> bool {
        matches!(self, ShutdownOutcome::Graceful)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shutdown {
    pub reason: ShutdownReason,
    pub outcome: ShutdownOutcome,
}

/// Deployment environment, set with the `app-env` flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppEnv {
    #[default]
    Dev,
    Stg,
    Prd,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Dev => "dev",
            AppEnv::Stg => "stg",
            AppEnv::Prd => "prd",
        }
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppEnv {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(AppEnv::Dev),
            "stg" => Ok(AppEnv::Stg),
            "prd" => Ok(AppEnv::Prd),
            other => Err(ServiceError::config(format!(
                "unknown app env '{}', expected dev | stg | prd",
                other
            ))),
        }
    }
}

/// Result of `Service::configure`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureOutcome {
    /// Every component is configured, the service can be started
    Ready,
    /// `--outenv` was given; components were left unconfigured
    EnvTableRequested,
}
