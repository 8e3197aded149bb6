use super::{ComponentState, LifecycleState, Service};
use crate::error::{Result, ServiceError};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

impl Service {
    /// Run every initializer to completion, in registration order.
    ///
    /// The first failure aborts: later initializers never run and the error
    /// is returned as is. A [`stop`](Self::stop) issued meanwhile lets the
    /// current initializer finish and skips the rest. Calling `init` again
    /// re-runs all of them.
    pub async fn init(&self) -> Result<()> {
        let stop_token = self.current_stop_token();
        if !self.run_initializers(&stop_token).await? {
            self.reset_stop_token();
        }
        Ok(())
    }

    /// Returns `false` when a stop request cut the sequence short
    pub(super) async fn run_initializers(&self, stop_token: &CancellationToken) -> Result<bool> {
        if self.lifecycle_state() == LifecycleState::Running {
            return Err(ServiceError::system(format!(
                "cannot initialize {} while it is running",
                self.name
            )));
        }

        self.set_lifecycle(LifecycleState::Initializing);
        self.initialized.store(false, Ordering::SeqCst);
        info!(
            "Initializing {} ({} initializers)",
            self.name,
            self.registry.initializers.len()
        );

        for slot in &self.registry.initializers {
            let _step = self.startup_lock.lock().await;
            if stop_token.is_cancelled() {
                info!("Initialization of {} interrupted by stop request", self.name);
                return Ok(false);
            }

            slot.set_state(ComponentState::Starting);

            if let Err(e) = slot.component.run().await {
                slot.set_state(ComponentState::Failed);
                error!("Initializer {} failed: {}", slot.name(), e);
                self.set_lifecycle(LifecycleState::Stopped);
                return Err(e);
            }

            slot.set_state(ComponentState::Running);
            info!("Initializer {} completed", slot.name());
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("All initializers completed successfully");
        Ok(true)
    }
}
