//! Capability contract of every component managed by a [`Service`].
//!
//! - [`Runnable`]: long-lived, started concurrently with the other runnables
//!   (e.g. the HTTP listener).
//! - [`InitRunnable`]: a runnable with a unique prefix that runs to
//!   completion, in registration order, before the service is ready
//!   (e.g. a database connection).
//! - [`ConfigProvider`]: no run/stop, only produces a value retrievable by
//!   prefix (e.g. a third-party client configured from flags).
//!
//! [`Service`]: crate::Service

use crate::error::Result;
use crate::flags::{FlagSet, FlagValues};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Value produced by a prefixed component
pub type Provided = Arc<dyn Any + Send + Sync>;

pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Register this component's options. Called once, before parsing.
    fn init_flags(&self, _flags: &mut FlagSet) {}

    /// Apply parsed options. Called once, before `run`.
    fn configure(&self, _values: &FlagValues) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Runnable: Component {
    /// Blocking entry point; must return on success and on failure
    async fn run(&self) -> Result<()>;

    /// Release resources. Resolving the future acknowledges the stop request;
    /// errors are logged by the service and never propagated.
    async fn stop(&self) -> Result<()>;
}

pub trait Provider {
    /// Unique key the produced value is registered under
    fn prefix(&self) -> &str;

    fn get(&self) -> Provided;
}

pub trait InitRunnable: Runnable + Provider {}

impl<T: Runnable + Provider> InitRunnable for T {}

pub trait ConfigProvider: Component + Provider {}

impl<T: Component + Provider> ConfigProvider for T {}

/// Stop request of a runnable that may be run again after being stopped,
/// e.g. across a reload.
///
/// `stop` calls [`trigger`](Self::trigger), `run` calls [`arm`](Self::arm)
/// and waits on the returned token. A stop requested before `run` starts
/// applies to that run; once a run has seen the request, the next `arm`
/// starts over with a fresh token.
#[derive(Debug, Default)]
pub struct StopTrigger {
    state: Mutex<TriggerState>,
}

#[derive(Debug, Default)]
struct TriggerState {
    token: CancellationToken,
    claimed: bool,
}

impl StopTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for the run that is starting, `None` if a stop was already
    /// requested for it
    pub fn arm(&self) -> Option<CancellationToken> {
        let mut state = self.state.lock();
        if state.token.is_cancelled() {
            if !state.claimed {
                state.claimed = true;
                return None;
            }
            state.token = CancellationToken::new();
        }
        state.claimed = true;
        Some(state.token.clone())
    }

    /// Request a stop of the current or next run
    pub fn trigger(&self) {
        self.state.lock().token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.state.lock().token.is_cancelled()
    }

    /// Drop any pending stop request
    pub fn reset(&self) {
        *self.state.lock() = TriggerState::default();
    }
}
