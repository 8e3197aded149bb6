use super::{ComponentState, LifecycleState, Service, Shutdown, ShutdownReason};
use crate::error::{Result, ServiceError};
use crate::signals::ProcessSignal;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

impl Service {
    /// Run the service until a runnable returns, a signal arrives or
    /// [`stop`](Self::stop) is called.
    ///
    /// Initializers run first unless [`init`](Self::init) already succeeded.
    /// Every runnable is then started on its own task. Whatever ends the run,
    /// each started component receives exactly one stop request before this
    /// returns.
    ///
    /// A runnable error is returned as [`ServiceError::RunnableFailed`]. After
    /// [`ShutdownReason::Reload`] the same service can be started again,
    /// with or without a new `configure`. A stop requested before the
    /// runnables are launched ends `start` without launching any.
    pub async fn start(&self) -> Result<Shutdown> {
        let mut signals = self
            .signals
            .try_receiver()
            .ok_or_else(|| ServiceError::system("service is already started"))?;

        let stop_token = self.current_stop_token();
        if !self.is_initialized() {
            self.run_initializers(&stop_token).await?;
        }

        let runnables = &self.registry.runnables;
        let (completion_tx, mut completions) = mpsc::channel(runnables.len().max(1));

        let launch = self.startup_lock.lock().await;
        if stop_token.is_cancelled() {
            drop(launch);
            info!("{} stopped before its runnables were launched", self.name);
            let outcome = self.stop_components().await;
            discard_signals(&mut signals);
            self.reset_stop_token();
            return Ok(Shutdown {
                reason: ShutdownReason::UserRequest,
                outcome,
            });
        }

        let listeners = self.signals.listen();
        self.set_lifecycle(LifecycleState::Running);
        info!("{} is running ({} runnables)", self.name, runnables.len());

        for slot in runnables {
            slot.set_state(ComponentState::Running);

            let slot = slot.clone();
            let completion_tx = completion_tx.clone();
            tokio::spawn(async move {
                let result = slot.component.run().await;
                if result.is_err() {
                    slot.mark_failed();
                }
                // Capacity covers every runnable, so this never waits
                let _ = completion_tx
                    .send((slot.name().to_string(), result))
                    .await;
            });
        }
        drop(completion_tx);
        drop(launch);

        let mut failure = None;
        let reason = tokio::select! {
            Some((name, result)) = completions.recv() => {
                if stop_token.is_cancelled() {
                    if let Err(e) = result {
                        warn!("Runnable {} failed after stop was requested: {}", name, e);
                    }
                    ShutdownReason::UserRequest
                } else {
                    match result {
                        Ok(()) => info!("Runnable {} exited", name),
                        Err(e) => {
                            error!("Runnable {} failed: {}", name, e);
                            failure = Some(ServiceError::RunnableFailed {
                                component: name.clone(),
                                source: Box::new(e),
                            });
                        }
                    }
                    ShutdownReason::RunnableExited(name)
                }
            }
            Some(signal) = signals.recv() => {
                info!("Shutdown initiated by {}", signal);
                if signal.is_reload() {
                    ShutdownReason::Reload
                } else {
                    ShutdownReason::Signal(signal)
                }
            }
            _ = stop_token.cancelled() => {
                info!("Shutdown requested");
                ShutdownReason::UserRequest
            }
        };

        let outcome = self.stop_components().await;
        drop(listeners);
        discard_signals(&mut signals);

        if reason == ShutdownReason::Reload {
            self.initialized.store(false, Ordering::SeqCst);
            self.set_lifecycle(LifecycleState::Initializing);
            info!("{} stopped for reload", self.name);
        }
        self.reset_stop_token();

        match failure {
            Some(e) => Err(e),
            None => Ok(Shutdown { reason, outcome }),
        }
    }
}

/// Signals that arrived after the run was decided belong to no later run
fn discard_signals(signals: &mut mpsc::Receiver<ProcessSignal>) {
    while let Ok(signal) = signals.try_recv() {
        debug!("Discarding {} received during shutdown", signal);
    }
}
