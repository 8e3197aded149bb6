use super::registry::Registry;
use super::{AppEnv, LifecycleState, Service};
use crate::component::{ConfigProvider, InitRunnable, Runnable};
use crate::error::Result;
use crate::logging::LoggingComponent;
use crate::signals::SignalRouter;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(feature = "http")]
use crate::http::HttpServer;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Assembles a [`Service`] from its components.
///
/// ```no_run
/// use servicekit::ServiceBuilder;
///
/// # fn main() -> servicekit::Result<()> {
/// let service = ServiceBuilder::new()
///     .name("billing")
///     .version("1.4.0")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ServiceBuilder {
    name: String,
    version: String,
    env_prefix: String,
    runnables: Vec<Arc<dyn Runnable>>,
    initializers: Vec<Arc<dyn InitRunnable>>,
    configs: Vec<Arc<dyn ConfigProvider>>,
    log_directory: Option<PathBuf>,
    #[cfg(feature = "http")]
    http_enabled: bool,
    shutdown_timeout: Duration,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            env_prefix: String::new(),
            runnables: Vec::new(),
            initializers: Vec::new(),
            configs: Vec::new(),
            log_directory: None,
            #[cfg(feature = "http")]
            http_enabled: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Service name used in logs; defaults to the binary name
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = version.into();
        self
    }

    /// Prefix of every environment variable read for a flag
    pub fn env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Default of the `shutdown-timeout` flag
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Add a component started concurrently with the other runnables
    pub fn with_runnable<R: Runnable + 'static>(mut self, runnable: Arc<R>) -> Self {
        self.runnables.push(runnable);
        self
    }

    /// Add a component run to completion, in registration order, before any
    /// runnable starts
    pub fn with_init_runnable<R: InitRunnable + 'static>(mut self, initializer: Arc<R>) -> Self {
        self.initializers.push(initializer);
        self
    }

    /// Add a component that is only configured and provides a value
    pub fn with_init_config<C: ConfigProvider + 'static>(mut self, config: Arc<C>) -> Self {
        self.configs.push(config);
        self
    }

    /// Also write logs to a daily-rolling file in `directory`
    pub fn with_file_logger<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.log_directory = Some(directory.into());
        self
    }

    /// Build without the built-in HTTP server
    #[cfg(feature = "http")]
    pub fn without_http_server(mut self) -> Self {
        self.http_enabled = false;
        self
    }

    /// Validate the registrations and create the service.
    ///
    /// Fails with `ServiceError::DuplicatePrefix` when two initializers, or
    /// two configure-only components, share a prefix.
    pub fn build(self) -> Result<Service> {
        let name = if self.name.is_empty() {
            binary_name()
        } else {
            self.name
        };

        let mut registry = Registry::default();
        for runnable in self.runnables {
            registry.add_runnable(runnable);
        }

        #[cfg(feature = "http")]
        let http = if self.http_enabled {
            let server = Arc::new(HttpServer::new(&name));
            registry.add_runnable(server.clone());
            Some(server)
        } else {
            None
        };

        for initializer in self.initializers {
            registry.add_initializer(initializer)?;
        }
        for config in self.configs {
            registry.add_config(config)?;
        }

        let logger = match self.log_directory {
            Some(directory) => LoggingComponent::with_file(directory, name.clone()),
            None => LoggingComponent::new(),
        };

        debug!(
            "Built service {} with {} runnables, {} initializers, {} configs",
            name,
            registry.runnables.len(),
            registry.initializers.len(),
            registry.configs.len()
        );

        Ok(Service {
            name,
            version: self.version,
            env_prefix: self.env_prefix,
            registry,
            logger: Arc::new(logger),
            #[cfg(feature = "http")]
            http,
            signals: SignalRouter::new(),
            lifecycle: Mutex::new(LifecycleState::Created),
            initialized: AtomicBool::new(false),
            app_env: Mutex::new(AppEnv::default()),
            default_shutdown_timeout: self.shutdown_timeout,
            shutdown_timeout: Mutex::new(self.shutdown_timeout),
            flag_values: Mutex::new(None),
            stop_token: Mutex::new(CancellationToken::new()),
            stop_lock: tokio::sync::Mutex::new(()),
            startup_lock: tokio::sync::Mutex::new(()),
        })
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn binary_name() -> String {
    std::env::args_os()
        .next()
        .and_then(|arg| {
            Path::new(&arg)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "service".to_string())
}
