use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use servicekit::{
    Component, ConfigureOutcome, FlagSet, FlagValues, Runnable, ServiceBuilder, ServiceError,
    ShutdownReason, StopTrigger,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Logs a line at a fixed interval while the service runs
struct Heartbeat {
    interval: Mutex<Duration>,
    shutdown: StopTrigger,
}

impl Heartbeat {
    fn new() -> Self {
        Self {
            interval: Mutex::new(Duration::from_secs(60)),
            shutdown: StopTrigger::new(),
        }
    }
}

impl Component for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn init_flags(&self, flags: &mut FlagSet) {
        flags.int("heartbeat-interval", 60, "Seconds between heartbeat log lines");
    }

    fn configure(&self, values: &FlagValues) -> servicekit::Result<()> {
        let seconds: u64 = values.parse("heartbeat-interval")?;
        if seconds == 0 {
            return Err(ServiceError::config("heartbeat-interval must be positive"));
        }
        *self.interval.lock() = Duration::from_secs(seconds);
        Ok(())
    }
}

#[async_trait]
impl Runnable for Heartbeat {
    async fn run(&self) -> servicekit::Result<()> {
        let Some(shutdown) = self.shutdown.arm() else {
            return Ok(());
        };
        let period = *self.interval.lock();
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        let mut beats: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    beats += 1;
                    info!(beats, "heartbeat");
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> servicekit::Result<()> {
        self.shutdown.trigger();
        Ok(())
    }
}

#[cfg(feature = "http")]
fn register_routes(service: &servicekit::Service) -> servicekit::Result<()> {
    use axum::http::Method;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Json;
    use servicekit::http::allow_cors;

    let Some(http) = service.http_server() else {
        return Ok(());
    };

    http.add_route(Method::GET, "/ping", ping)?;

    let health = serde_json::json!({
        "name": service.name(),
        "version": service.version(),
    });
    http.add_handler(move |router| {
        let health = health.clone();
        router.route(
            "/health",
            get(move || {
                let health = health.clone();
                async move { Json(health) }
            }),
        )
    });

    http.add_middleware(|router| router.layer(from_fn(allow_cors)));
    Ok(())
}

#[cfg(feature = "http")]
async fn ping() -> &'static str {
    "pong"
}

#[tokio::main]
async fn main() -> Result<()> {
    let service = ServiceBuilder::new()
        .name("servicekit")
        .version(env!("CARGO_PKG_VERSION"))
        .with_runnable(Arc::new(Heartbeat::new()))
        .build()?;

    #[cfg(feature = "http")]
    register_routes(&service)?;

    loop {
        match service.configure() {
            Ok(ConfigureOutcome::Ready) => {}
            Ok(ConfigureOutcome::EnvTableRequested) => {
                service.print_env_table();
                return Ok(());
            }
            Err(ServiceError::Cli(e)) => e.exit(),
            Err(e) => return Err(e.into()),
        }

        info!("Starting {} v{}", service.name(), service.version());

        let shutdown = match service.start().await {
            Ok(shutdown) => shutdown,
            Err(e) => {
                error!("{} stopped with error: {}", service.name(), e);
                std::process::exit(1);
            }
        };

        if shutdown.reason == ShutdownReason::Reload {
            info!("Reloading {}", service.name());
            continue;
        }

        info!(
            "{} exited: {:?} ({:?})",
            service.name(),
            shutdown.reason,
            shutdown.outcome
        );
        if !shutdown.outcome.is_graceful() {
            std::process::exit(1);
        }
        return Ok(());
    }
}
