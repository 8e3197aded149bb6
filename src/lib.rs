//! Service bootstrap layer.
//!
//! A [`Service`] wires pluggable components, command-line and environment
//! configuration and an HTTP listener together, then manages the process
//! lifecycle: initializers run in order, runnables run concurrently, and
//! termination signals or the first failing runnable lead to one bounded
//! stop of every component.

pub mod component;
pub mod env_file;
pub mod error;
pub mod flags;
pub mod logging;
pub mod service;
pub mod signals;
pub mod util;

#[cfg(feature = "http")]
pub mod http;

pub use component::{
    Component, ConfigProvider, InitRunnable, Provided, Provider, Runnable, StopTrigger,
};
pub use error::{Result, ServiceError};
pub use flags::{FlagSet, FlagSource, FlagValue, FlagValues};
pub use logging::{LogFormat, LoggingComponent};
pub use service::{
    AppEnv, ComponentState, ConfigureOutcome, LifecycleState, Service, ServiceBuilder, Shutdown,
    ShutdownOutcome, ShutdownReason,
};
pub use signals::{ProcessSignal, SignalHandle};

#[cfg(feature = "http")]
pub use http::{AppError, HttpConfig, HttpServer};
