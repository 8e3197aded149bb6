use super::registry::Slot;
use super::{ComponentState, LifecycleState, Service, ShutdownOutcome};
use crate::component::Runnable;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl Service {
    /// Ask every started component to stop and wait for them, at most the
    /// shutdown timeout.
    ///
    /// Safe to call from any task, also while [`start`](Self::start) is
    /// running: `start` then returns with [`ShutdownReason::UserRequest`].
    /// During initialization the current initializer completes first and
    /// no runnable is launched afterwards.
    /// Concurrent calls are serialized and never issue a second stop request
    /// to the same component.
    ///
    /// [`ShutdownReason::UserRequest`]: super::ShutdownReason::UserRequest
    pub async fn stop(&self) -> ShutdownOutcome {
        if matches!(
            self.lifecycle_state(),
            LifecycleState::Initializing | LifecycleState::Running
        ) {
            self.current_stop_token().cancel();
        }
        // An initializer still running is stopped only once it has returned
        let _startup = self.startup_lock.lock().await;
        self.stop_components().await
    }

    /// Fan out stop requests and wait for the acknowledgments
    pub(super) async fn stop_components(&self) -> ShutdownOutcome {
        let _guard = self.stop_lock.lock().await;

        info!("Beginning graceful shutdown of {}", self.name);
        self.set_lifecycle(LifecycleState::Stopping);

        let mut requests = JoinSet::new();
        for slot in &self.registry.runnables {
            if slot.begin_stop() {
                spawn_stop(&mut requests, slot.clone());
            }
        }
        for slot in &self.registry.initializers {
            if slot.begin_stop() {
                spawn_stop(&mut requests, slot.clone());
            }
        }

        let issued = requests.len();
        let grace = self.shutdown_timeout();
        let drained = timeout(grace, async {
            while let Some(joined) = requests.join_next().await {
                if let Err(e) = joined {
                    error!("Stop request task failed: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timed out after {:?}", grace);
        }

        // Includes components abandoned by an earlier stop in this cycle
        let pending = self.pending_stops();
        let outcome = if pending.is_empty() {
            ShutdownOutcome::Graceful
        } else {
            warn!("Abandoning components: {}", pending.join(", "));
            ShutdownOutcome::Forced { pending }
        };

        self.initialized.store(false, Ordering::SeqCst);
        self.set_lifecycle(LifecycleState::Stopped);
        info!(
            "{} stopped ({} stop requests, {:?})",
            self.name, issued, outcome
        );
        outcome
    }

    /// Components still waiting to acknowledge a stop request
    fn pending_stops(&self) -> Vec<String> {
        let runnables = self
            .registry
            .runnables
            .iter()
            .filter(|slot| slot.state() == ComponentState::Stopping)
            .map(|slot| slot.name().to_string());
        let initializers = self
            .registry
            .initializers
            .iter()
            .filter(|slot| slot.state() == ComponentState::Stopping)
            .map(|slot| slot.name().to_string());
        runnables.chain(initializers).collect()
    }
}

fn spawn_stop<T>(requests: &mut JoinSet<()>, slot: Arc<Slot<T>>)
where
    T: Runnable + ?Sized + 'static,
{
    requests.spawn(async move {
        info!("Stopping {} component", slot.name());
        match slot.component.stop().await {
            Ok(()) => info!("{} component stopped", slot.name()),
            Err(e) => error!("Error stopping {} component: {}", slot.name(), e),
        }
        slot.set_state(ComponentState::Stopped);
    });
}
