//! OS signal routing.
//!
//! SIGINT/SIGTERM request shutdown, SIGHUP requests a reload. Signals are
//! delivered on a single channel consumed by `Service::start`; nothing else
//! observes raw signals.

use crate::error::{Result, ServiceError};
use std::fmt;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SIGNAL_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Interrupt,
    Terminate,
    Hangup,
}

impl ProcessSignal {
    pub fn is_reload(&self) -> bool {
        matches!(self, ProcessSignal::Hangup)
    }
}

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessSignal::Interrupt => "SIGINT",
            ProcessSignal::Terminate => "SIGTERM",
            ProcessSignal::Hangup => "SIGHUP",
        };
        f.write_str(name)
    }
}

/// Cloneable sender used to inject signals without the OS
#[derive(Debug, Clone)]
pub struct SignalHandle {
    sender: mpsc::Sender<ProcessSignal>,
}

impl SignalHandle {
    pub async fn send(&self, signal: ProcessSignal) -> Result<()> {
        self.sender
            .send(signal)
            .await
            .map_err(|_| ServiceError::system("Signal channel closed"))
    }
}

pub struct SignalRouter {
    sender: mpsc::Sender<ProcessSignal>,
    receiver: Mutex<mpsc::Receiver<ProcessSignal>>,
}

impl SignalRouter {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn handle(&self) -> SignalHandle {
        SignalHandle {
            sender: self.sender.clone(),
        }
    }

    /// Exclusive access to the signal stream; `None` while another caller
    /// holds it.
    pub(crate) fn try_receiver(&self) -> Option<MutexGuard<'_, mpsc::Receiver<ProcessSignal>>> {
        self.receiver.try_lock().ok()
    }

    /// Forward OS signals into the channel until the returned guard is dropped
    pub(crate) fn listen(&self) -> SignalListeners {
        let mut tasks = Vec::new();

        #[cfg(unix)]
        {
            use tokio::signal::unix::SignalKind;

            let routes = [
                (SignalKind::interrupt(), ProcessSignal::Interrupt),
                (SignalKind::terminate(), ProcessSignal::Terminate),
                (SignalKind::hangup(), ProcessSignal::Hangup),
            ];
            for (kind, signal) in routes {
                if let Some(task) = forward_unix(kind, signal, self.sender.clone()) {
                    tasks.push(task);
                }
            }
        }

        #[cfg(not(unix))]
        {
            let sender = self.sender.clone();
            tasks.push(tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT signal (Ctrl+C)");
                    if sender.send(ProcessSignal::Interrupt).await.is_err() {
                        break;
                    }
                }
            }));
        }

        SignalListeners { tasks }
    }
}

impl Default for SignalRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn forward_unix(
    kind: tokio::signal::unix::SignalKind,
    signal: ProcessSignal,
    sender: mpsc::Sender<ProcessSignal>,
) -> Option<JoinHandle<()>> {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => Some(tokio::spawn(async move {
            while stream.recv().await.is_some() {
                info!("Received {} signal", signal);
                if sender.send(signal).await.is_err() {
                    break;
                }
            }
        })),
        Err(e) => {
            warn!("Failed to register {} handler: {}", signal, e);
            None
        }
    }
}

/// OS listener tasks; aborted on drop
pub(crate) struct SignalListeners {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for SignalListeners {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
