use crate::component::Component;
use crate::error::{Result, ServiceError};
use crate::flags::{FlagSet, FlagValues};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl FromStr for LogFormat {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(ServiceError::config(format!(
                "unknown log format '{}', expected pretty | json | compact",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Subscriber installed by this module; there is one per process
struct ActiveSubscriber {
    filter: reload::Handle<EnvFilter, Registry>,
    format: LogFormat,
}

static ACTIVE: Mutex<Option<ActiveSubscriber>> = parking_lot::const_mutex(None);

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

struct FileTarget {
    directory: PathBuf,
    file_prefix: String,
}

/// Structured logging, configured from flags like any other component.
///
/// Lines go to stderr; with a file target they are also written to a
/// daily-rolling file. The global subscriber is installed at most once per
/// process: later configurations swap its level filter, the output format
/// stays the one it was installed with.
pub struct LoggingComponent {
    file: Option<FileTarget>,
    settings: Mutex<LogSettings>,
    guard: Mutex<Option<WorkerGuard>>,
}

impl LoggingComponent {
    pub fn new() -> Self {
        Self {
            file: None,
            settings: Mutex::new(LogSettings::default()),
            guard: Mutex::new(None),
        }
    }

    pub fn with_file<P: Into<PathBuf>, S: Into<String>>(directory: P, file_prefix: S) -> Self {
        Self {
            file: Some(FileTarget {
                directory: directory.into(),
                file_prefix: file_prefix.into(),
            }),
            ..Self::new()
        }
    }

    /// Settings actually in effect
    pub fn settings(&self) -> LogSettings {
        self.settings.lock().clone()
    }

    fn install(&self, settings: &LogSettings) -> Option<ActiveSubscriber> {
        let (filter_layer, filter) = reload::Layer::new(env_filter(&settings.level));

        let stderr_layer = match settings.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed(),
        };

        let file_layer = self.file.as_ref().map(|target| {
            let appender =
                tracing_appender::rolling::daily(&target.directory, &target.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            *self.guard.lock() = Some(guard);
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        });

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
            .ok()?;

        Some(ActiveSubscriber {
            filter,
            format: settings.format,
        })
    }

    /// Install the subscriber or update the installed one; returns the
    /// settings in effect, `None` when another subscriber owns the process
    fn apply(&self, requested: LogSettings) -> Result<Option<LogSettings>> {
        let mut active = ACTIVE.lock();

        if let Some(current) = active.as_ref() {
            current
                .filter
                .reload(env_filter(&requested.level))
                .map_err(|e| ServiceError::config(format!("failed to update log level: {}", e)))?;
            if requested.format != current.format {
                warn!(
                    "Log format {:?} ignored, {:?} stays in effect until restart",
                    requested.format, current.format
                );
            }
            return Ok(Some(LogSettings {
                level: requested.level,
                format: current.format,
            }));
        }

        match self.install(&requested) {
            Some(installed) => {
                *active = Some(installed);
                Ok(Some(requested))
            }
            None => Ok(None),
        }
    }
}

impl Default for LoggingComponent {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for LoggingComponent {
    fn name(&self) -> &str {
        "logger"
    }

    fn init_flags(&self, flags: &mut FlagSet) {
        flags.string(
            "log-level",
            DEFAULT_LEVEL,
            "Log level or filter directives. Ex: info | debug | servicekit=trace",
        );
        flags.string("log-format", "pretty", "Log output format: pretty | json | compact");
    }

    fn configure(&self, values: &FlagValues) -> Result<()> {
        let level = values.string("log-level")?;
        EnvFilter::try_new(&level).map_err(|e| {
            ServiceError::config(format!("invalid log level '{}': {}", level, e))
        })?;

        let requested = LogSettings {
            level,
            format: values.parse("log-format")?,
        };

        match self.apply(requested)? {
            Some(applied) => {
                debug!("Logging configured: {:?}", applied);
                *self.settings.lock() = applied;
            }
            None => warn!("A foreign global subscriber is installed, log flags have no effect"),
        }
        Ok(())
    }
}
