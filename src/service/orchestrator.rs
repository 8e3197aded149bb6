use super::registry::Registry;
use super::{AppEnv, ConfigureOutcome, LifecycleState};
use crate::component::{Component, Provided};
use crate::env_file::load_env_file;
use crate::error::{Result, ServiceError};
use crate::flags::{FlagSet, FlagValues, OUTENV_FLAG};
use crate::logging::LoggingComponent;
use crate::signals::{SignalHandle, SignalRouter};
use parking_lot::Mutex;
use std::any::Any;
use std::ffi::OsString;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(feature = "http")]
use crate::http::HttpServer;

pub(super) const APP_ENV_FLAG: &str = "app-env";
pub(super) const SHUTDOWN_TIMEOUT_FLAG: &str = "shutdown-timeout";

/// A service process: named components plus their shared lifecycle.
///
/// Built with [`ServiceBuilder`](super::ServiceBuilder). Every method takes
/// `&self`, so a service can be shared behind an `Arc` and stopped from
/// another task while `start` is waiting.
pub struct Service {
    pub(super) name: String,
    pub(super) version: String,
    pub(super) env_prefix: String,
    pub(super) registry: Registry,
    pub(super) logger: Arc<LoggingComponent>,
    #[cfg(feature = "http")]
    pub(super) http: Option<Arc<HttpServer>>,

    // Lifecycle management
    pub(super) signals: SignalRouter,
    pub(super) lifecycle: Mutex<LifecycleState>,
    pub(super) initialized: AtomicBool,
    pub(super) app_env: Mutex<AppEnv>,
    pub(super) default_shutdown_timeout: Duration,
    pub(super) shutdown_timeout: Mutex<Duration>,
    pub(super) flag_values: Mutex<Option<FlagValues>>,
    pub(super) stop_token: Mutex<CancellationToken>,
    pub(super) stop_lock: tokio::sync::Mutex<()>,
    /// Held while an initializer runs or runnables are launched
    pub(super) startup_lock: tokio::sync::Mutex<()>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Deployment environment from the `app-env` flag
    pub fn env(&self) -> AppEnv {
        *self.app_env.lock()
    }

    /// Grace period given to components to acknowledge a stop request
    pub fn shutdown_timeout(&self) -> Duration {
        *self.shutdown_timeout.lock()
    }

    /// Values of the last successful `configure`
    pub fn flag_values(&self) -> Option<FlagValues> {
        self.flag_values.lock().clone()
    }

    pub fn logger(&self) -> &LoggingComponent {
        &self.logger
    }

    /// Built-in HTTP server; `None` when built without it
    #[cfg(feature = "http")]
    pub fn http_server(&self) -> Option<&Arc<HttpServer>> {
        self.http.as_ref()
    }

    /// Sender for injecting process signals, e.g. from tests
    pub fn signal_handle(&self) -> SignalHandle {
        self.signals.handle()
    }

    /// Value produced by the initializer or configure-only component
    /// registered under `prefix`
    pub fn get(&self, prefix: &str) -> Option<Provided> {
        self.registry.get(prefix)
    }

    /// Like [`get`](Self::get), for dependencies the service cannot run
    /// without.
    ///
    /// # Panics
    ///
    /// Panics when nothing is registered under `prefix`.
    pub fn must_get(&self, prefix: &str) -> Provided {
        match self.get(prefix) {
            Some(value) => value,
            None => panic!("can not get {}", prefix),
        }
    }

    /// Typed lookup; `None` if the prefix is unknown or holds another type
    pub fn get_as<T: Any + Send + Sync>(&self, prefix: &str) -> Option<Arc<T>> {
        self.get(prefix)?.downcast::<T>().ok()
    }

    /// Run `f` against this service and return its result
    pub fn run_function<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Service) -> R,
    {
        f(self)
    }

    /// Options of every component, in registration order: service options,
    /// logger, runnables, initializers, configure-only components.
    pub fn collect_flags(&self) -> FlagSet {
        let mut flags = FlagSet::new(self.name.clone())
            .with_version(self.version.clone())
            .with_env_prefix(self.env_prefix.clone());

        flags.string(
            APP_ENV_FLAG,
            AppEnv::default().as_str(),
            "Env for service. Ex: dev | stg | prd",
        );
        flags.int(
            SHUTDOWN_TIMEOUT_FLAG,
            self.default_shutdown_timeout.as_secs() as i64,
            "Seconds components are given to stop before shutdown is forced",
        );
        flags.bool(OUTENV_FLAG, false, "Print the sample environment table and exit");

        self.logger.init_flags(&mut flags);
        for slot in &self.registry.runnables {
            slot.component.init_flags(&mut flags);
        }
        for slot in &self.registry.initializers {
            slot.component.init_flags(&mut flags);
        }
        for config in &self.registry.configs {
            config.init_flags(&mut flags);
        }

        flags
    }

    /// Load the env file, parse the process arguments and configure every
    /// component.
    pub fn configure(&self) -> Result<ConfigureOutcome> {
        self.configure_from(std::env::args_os())
    }

    /// Same as [`configure`](Self::configure) with explicit arguments, binary
    /// name first.
    pub fn configure_from<I, T>(&self, args: I) -> Result<ConfigureOutcome>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        load_env_file()?;

        let values = self.collect_flags().parse_from(args)?;

        *self.app_env.lock() = values.parse(APP_ENV_FLAG)?;

        let seconds = values.int(SHUTDOWN_TIMEOUT_FLAG)?;
        let seconds = u64::try_from(seconds).map_err(|_| {
            ServiceError::config(format!("{} must not be negative", SHUTDOWN_TIMEOUT_FLAG))
        })?;
        *self.shutdown_timeout.lock() = Duration::from_secs(seconds);

        if values.bool(OUTENV_FLAG)? {
            *self.flag_values.lock() = Some(values);
            return Ok(ConfigureOutcome::EnvTableRequested);
        }

        self.logger.configure(&values)?;
        for slot in &self.registry.runnables {
            slot.component.configure(&values)?;
        }
        for slot in &self.registry.initializers {
            slot.component.configure(&values)?;
        }
        for config in &self.registry.configs {
            config.configure(&values)?;
        }

        info!(
            "Configured {} {} (env: {}, {} flags)",
            self.name,
            self.version,
            self.env(),
            values.len()
        );
        *self.flag_values.lock() = Some(values);
        Ok(ConfigureOutcome::Ready)
    }

    /// Sample environment table of every registered option
    pub fn env_table(&self) -> String {
        self.collect_flags().render_env_table()
    }

    /// Print the environment table, and the route table when routes are
    /// registered, to stdout
    pub fn print_env_table(&self) {
        println!("{}", self.env_table());

        #[cfg(feature = "http")]
        {
            if let Some(http) = &self.http {
                if !http.routes().is_empty() {
                    println!("{}", http.render_route_table());
                }
            }
        }
    }

    /// Replace a cancelled stop token once a run cycle is over
    pub(super) fn reset_stop_token(&self) {
        let mut token = self.stop_token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    pub(super) fn current_stop_token(&self) -> CancellationToken {
        self.stop_token.lock().clone()
    }
}
