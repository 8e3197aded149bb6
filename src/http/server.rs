use super::middleware::{panic_response, request_logger};
use crate::component::{Component, Runnable, StopTrigger};
use crate::error::{Result, ServiceError};
use crate::flags::{FlagSet, FlagValues};
use crate::util::render_table;
use async_trait::async_trait;
use axum::handler::Handler;
use axum::http::Method;
use axum::routing::{on, MethodFilter};
use axum::Router;
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, info};

pub const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Options of the HTTP server, filled from its flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpConfig {
    /// Listening port; 0 picks a random port, replaced by the bound one
    pub port: u16,
    pub bind_addr: String,
    /// Skip the request logger and the panic catcher
    pub no_default: bool,
    /// Skip only the request logger
    pub no_logger: bool,
    /// Time given to in-flight requests once a stop is requested
    pub shutdown_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_addr: String::new(),
            no_default: false,
            no_logger: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Route registered with [`HttpServer::add_route`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub path: String,
    pub handler: String,
}

type RouterFn = Box<dyn Fn(Router) -> Router + Send>;

/// Built-in HTTP listener, managed like any other runnable.
///
/// Routes and middleware are registered as closures and applied to a fresh
/// router every time the server starts. A server without any handler binds
/// nothing and only waits for its stop request.
pub struct HttpServer {
    name: String,
    config: Mutex<HttpConfig>,
    handlers: Mutex<Vec<RouterFn>>,
    middlewares: Mutex<Vec<RouterFn>>,
    routes: Mutex<Vec<RouteInfo>>,
    shutdown: StopTrigger,
    running: watch::Sender<bool>,
}

impl HttpServer {
    pub fn new(service_name: &str) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            name: format!("{}-http", service_name),
            config: Mutex::new(HttpConfig::default()),
            handlers: Mutex::new(Vec::new()),
            middlewares: Mutex::new(Vec::new()),
            routes: Mutex::new(Vec::new()),
            shutdown: StopTrigger::new(),
            running,
        }
    }

    /// Register routes on the router
    pub fn add_handler<F>(&self, handler: F)
    where
        F: Fn(Router) -> Router + Send + 'static,
    {
        self.handlers.lock().push(Box::new(handler));
    }

    /// Register a single route and record it in the route table
    pub fn add_route<H, T>(&self, method: Method, path: &str, handler: H) -> Result<()>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let filter = MethodFilter::try_from(method.clone()).map_err(|e| {
            ServiceError::component(&self.name, format!("cannot route {} {}: {}", method, path, e))
        })?;

        self.routes.lock().push(RouteInfo {
            method,
            path: path.to_string(),
            handler: std::any::type_name::<H>().to_string(),
        });

        let path = path.to_string();
        self.add_handler(move |router| router.route(&path, on(filter, handler.clone())));
        Ok(())
    }

    /// Wrap every route, e.g. `|router| router.layer(from_fn(allow_cors))`.
    /// Middlewares run inside the default ones, the last added outermost.
    pub fn add_middleware<F>(&self, middleware: F)
    where
        F: Fn(Router) -> Router + Send + 'static,
    {
        self.middlewares.lock().push(Box::new(middleware));
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        self.routes.lock().clone()
    }

    pub fn render_route_table(&self) -> String {
        let rows: Vec<Vec<String>> = self
            .routes
            .lock()
            .iter()
            .map(|route| {
                vec![
                    route.path.clone(),
                    route.method.to_string(),
                    route.handler.clone(),
                ]
            })
            .collect();
        render_table(&["PATH", "METHOD", "HANDLER"], &rows)
    }

    pub fn config(&self) -> HttpConfig {
        self.config.lock().clone()
    }

    /// Bound port once listening, the configured one before
    pub fn port(&self) -> u16 {
        self.config.lock().port
    }

    pub fn uri(&self) -> String {
        let config = self.config.lock();
        format_bind_addr(&config.bind_addr, config.port)
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub(crate) fn build_router(&self) -> Router {
        let config = self.config();

        let mut router = Router::new();
        for handler in self.handlers.lock().iter() {
            router = handler(router);
        }
        for middleware in self.middlewares.lock().iter() {
            router = middleware(router);
        }

        if !config.no_default {
            router = router.layer(CatchPanicLayer::custom(panic_response));
            if !config.no_logger {
                router = router.layer(axum::middleware::from_fn(request_logger));
            }
        }

        router
    }
}

/// `host:port`, with IPv6 literals bracketed and all interfaces when the
/// host is empty
pub fn format_bind_addr(host: &str, port: u16) -> String {
    if host.is_empty() {
        format!("0.0.0.0:{}", port)
    } else if host.contains(':') && !host.contains('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl Component for HttpServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_flags(&self, flags: &mut FlagSet) {
        flags.int(
            "http-port",
            i64::from(DEFAULT_PORT),
            "HTTP server port. If 0 => get a random port",
        );
        flags.string("http-addr", "", "HTTP server bind address");
        flags.bool(
            "http-no-default",
            false,
            "Disable default HTTP middlewares (request logger, panic recovery)",
        );
        flags.bool("http-no-logger", false, "Disable the HTTP request logger");
        flags.int(
            "http-shutdown-timeout",
            DEFAULT_SHUTDOWN_TIMEOUT.as_secs() as i64,
            "Seconds in-flight HTTP requests are given to complete on stop",
        );
    }

    fn configure(&self, values: &FlagValues) -> Result<()> {
        let config = HttpConfig {
            port: values.parse("http-port")?,
            bind_addr: values.string("http-addr")?,
            no_default: values.bool("http-no-default")?,
            no_logger: values.bool("http-no-logger")?,
            shutdown_timeout: Duration::from_secs(values.parse("http-shutdown-timeout")?),
        };
        debug!("{} configured: {:?}", self.name, config);

        *self.config.lock() = config;
        self.shutdown.reset();
        Ok(())
    }
}

#[async_trait]
impl Runnable for HttpServer {
    async fn run(&self) -> Result<()> {
        let Some(shutdown) = self.shutdown.arm() else {
            debug!("{} stopped before it started", self.name);
            return Ok(());
        };

        let has_handlers = !self.handlers.lock().is_empty();
        if !has_handlers {
            debug!("{} has no handlers, waiting for stop", self.name);
            shutdown.cancelled().await;
            return Ok(());
        }

        let config = self.config();
        let addr = format_bind_addr(&config.bind_addr, config.port);
        debug!("start listen tcp {}...", addr);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            ServiceError::component(&self.name, format!("failed to listen on {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        self.config.lock().port = local_addr.port();
        info!("{} listening on {}", self.name, local_addr);

        let app = self
            .build_router()
            .into_make_service_with_connect_info::<SocketAddr>();

        self.running.send_replace(true);
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        self.running.send_replace(false);

        served.map_err(|e| ServiceError::component(&self.name, format!("server error: {}", e)))?;
        info!("{} stopped listening", self.name);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let grace = self.config().shutdown_timeout;
        self.shutdown.trigger();

        let mut running = self.running.subscribe();
        let drained = async move {
            while *running.borrow_and_update() {
                if running.changed().await.is_err() {
                    break;
                }
            }
        };

        tokio::time::timeout(grace, drained).await.map_err(|_| {
            ServiceError::component(
                &self.name,
                format!("in-flight requests still running after {:?}", grace),
            )
        })
    }
}
