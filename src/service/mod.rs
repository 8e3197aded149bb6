mod builder;
mod orchestrator;
mod registry;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use builder::ServiceBuilder;
pub use orchestrator::Service;
pub use types::{
    AppEnv, ComponentState, ConfigureOutcome, LifecycleState, Shutdown, ShutdownOutcome,
    ShutdownReason,
};
