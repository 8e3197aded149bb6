use super::*;
use crate::component::{Component, Provided, Provider, Runnable, StopTrigger};
use crate::error::{Result, ServiceError};
use crate::flags::{FlagSet, FlagValues};
use crate::signals::ProcessSignal;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Events = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    /// `run` returns Ok right away
    Succeed,
    /// `run` returns an error right away
    Fail,
    /// `run` blocks until `stop`
    Block,
    /// `run` blocks and `stop` never acknowledges
    Hang,
    /// `run` takes a while, then returns Ok
    Slow,
    /// `run` blocks until `stop`, which takes a while to acknowledge
    SlowStop,
}

struct TestComponent {
    name: String,
    mode: Mode,
    events: Events,
    runs: AtomicUsize,
    stops: AtomicUsize,
    release: StopTrigger,
    flag: Option<String>,
    configured: Mutex<Option<i64>>,
}

impl TestComponent {
    fn new(name: &str, mode: Mode, events: &Events) -> Arc<Self> {
        Arc::new(Self::build(name, mode, events, None))
    }

    fn with_flag(name: &str, flag: &str, events: &Events) -> Arc<Self> {
        Arc::new(Self::build(name, Mode::Block, events, Some(flag.to_string())))
    }

    fn build(name: &str, mode: Mode, events: &Events, flag: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            mode,
            events: events.clone(),
            runs: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            release: StopTrigger::new(),
            flag,
            configured: Mutex::new(None),
        }
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Component for TestComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_flags(&self, flags: &mut FlagSet) {
        if let Some(flag) = &self.flag {
            flags.int(flag, 1, "TestComponent option");
        }
    }

    fn configure(&self, values: &FlagValues) -> Result<()> {
        if let Some(flag) = &self.flag {
            *self.configured.lock() = Some(values.int(flag)?);
        }
        Ok(())
    }
}

#[async_trait]
impl Runnable for TestComponent {
    async fn run(&self) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(format!("run {}", self.name));

        match self.mode {
            Mode::Succeed => Ok(()),
            Mode::Fail => Err(ServiceError::component(&self.name, "component failure")),
            Mode::Slow => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                self.events.lock().push(format!("{} done", self.name));
                Ok(())
            }
            Mode::Block | Mode::Hang | Mode::SlowStop => {
                if let Some(release) = self.release.arm() {
                    release.cancelled().await;
                }
                Ok(())
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(format!("stop {}", self.name));

        match self.mode {
            Mode::Hang => std::future::pending::<()>().await,
            Mode::SlowStop => tokio::time::sleep(Duration::from_millis(100)).await,
            _ => {}
        }
        self.release.trigger();
        Ok(())
    }
}

impl Provider for TestComponent {
    fn prefix(&self) -> &str {
        &self.name
    }

    fn get(&self) -> Provided {
        Arc::new(format!("{} value", self.name))
    }
}

struct StaticConfig {
    prefix: String,
    value: u32,
}

impl Component for StaticConfig {
    fn name(&self) -> &str {
        "static-config"
    }
}

impl Provider for StaticConfig {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get(&self) -> Provided {
        Arc::new(self.value)
    }
}

fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

fn builder() -> ServiceBuilder {
    let builder = ServiceBuilder::new().name("test-service").version("0.0.1");
    #[cfg(feature = "http")]
    let builder = builder.without_http_server();
    builder
}

async fn wait_for_state(service: &Service, state: LifecycleState) {
    for _ in 0..200 {
        if service.lifecycle_state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "service never reached {:?}, currently {:?}",
        state,
        service.lifecycle_state()
    );
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never met");
}

fn spawn_start(service: &Arc<Service>) -> tokio::task::JoinHandle<Result<Shutdown>> {
    let service = service.clone();
    tokio::spawn(async move { service.start().await })
}

#[tokio::test]
async fn test_init_runs_initializers_in_order() {
    let events = events();
    let first = TestComponent::new("first", Mode::Succeed, &events);
    let second = TestComponent::new("second", Mode::Succeed, &events);
    let third = TestComponent::new("third", Mode::Succeed, &events);

    let service = builder()
        .with_init_runnable(first.clone())
        .with_init_runnable(second.clone())
        .with_init_runnable(third.clone())
        .build()
        .unwrap();

    service.init().await.unwrap();

    assert_eq!(
        *events.lock(),
        vec!["run first", "run second", "run third"]
    );
    assert!(service.is_initialized());
    assert_eq!(service.component_state("second"), Some(ComponentState::Running));
}

#[tokio::test]
async fn test_init_stops_at_first_failure() {
    let events = events();
    let first = TestComponent::new("first", Mode::Succeed, &events);
    let second = TestComponent::new("second", Mode::Fail, &events);
    let third = TestComponent::new("third", Mode::Succeed, &events);
    let worker = TestComponent::new("worker", Mode::Block, &events);

    let service = builder()
        .with_runnable(worker.clone())
        .with_init_runnable(first.clone())
        .with_init_runnable(second.clone())
        .with_init_runnable(third.clone())
        .build()
        .unwrap();

    let result = service.init().await;

    assert!(matches!(result, Err(ServiceError::Component { .. })));
    assert_eq!(first.runs(), 1);
    assert_eq!(second.runs(), 1);
    assert_eq!(third.runs(), 0);
    assert_eq!(worker.runs(), 0);
    assert_eq!(first.stops() + second.stops(), 0);
    assert!(!service.is_initialized());
    assert_eq!(service.component_state("second"), Some(ComponentState::Failed));
}

#[tokio::test]
async fn test_start_propagates_initializer_failure() {
    let events = events();
    let broken = TestComponent::new("broken", Mode::Fail, &events);
    let worker = TestComponent::new("worker", Mode::Block, &events);

    let service = builder()
        .with_runnable(worker.clone())
        .with_init_runnable(broken)
        .build()
        .unwrap();

    let result = service.start().await;

    assert!(matches!(result, Err(ServiceError::Component { .. })));
    assert_eq!(worker.runs(), 0);
    assert_eq!(service.lifecycle_state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_terminate_signal_stops_every_component_once() {
    let events = events();
    let db = TestComponent::new("db", Mode::Succeed, &events);
    let api = TestComponent::new("api", Mode::Block, &events);
    let consumer = TestComponent::new("consumer", Mode::Block, &events);

    let service = Arc::new(
        builder()
            .with_runnable(api.clone())
            .with_runnable(consumer.clone())
            .with_init_runnable(db.clone())
            .build()
            .unwrap(),
    );

    service.init().await.unwrap();
    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;

    service
        .signal_handle()
        .send(ProcessSignal::Terminate)
        .await
        .unwrap();
    let shutdown = handle.await.unwrap().unwrap();

    assert_eq!(shutdown.reason, ShutdownReason::Signal(ProcessSignal::Terminate));
    assert!(shutdown.outcome.is_graceful());
    assert_eq!(db.runs(), 1);
    assert_eq!(api.runs(), 1);
    assert_eq!(consumer.runs(), 1);
    assert_eq!(db.stops(), 1);
    assert_eq!(api.stops(), 1);
    assert_eq!(consumer.stops(), 1);
    assert_eq!(service.lifecycle_state(), LifecycleState::Stopped);
    assert!(service
        .component_states()
        .values()
        .all(|state| *state == ComponentState::Stopped));
}

#[tokio::test]
async fn test_runnable_failure_is_returned_after_stop() {
    let events = events();
    let db = TestComponent::new("db", Mode::Succeed, &events);
    let api = TestComponent::new("api", Mode::Block, &events);
    let failing = TestComponent::new("failing", Mode::Fail, &events);

    let service = builder()
        .with_runnable(api.clone())
        .with_runnable(failing.clone())
        .with_init_runnable(db.clone())
        .build()
        .unwrap();

    let result = service.start().await;

    match result {
        Err(ServiceError::RunnableFailed { component, source }) => {
            assert_eq!(component, "failing");
            assert!(source.to_string().contains("component failure"));
        }
        other => panic!("expected runnable failure, got {:?}", other),
    }
    assert_eq!(failing.runs(), 1);
    assert_eq!(db.stops(), 1);
    assert_eq!(api.stops(), 1);
    assert_eq!(failing.stops(), 1);
}

#[tokio::test]
async fn test_clean_runnable_exit_ends_service() {
    let events = events();
    let api = TestComponent::new("api", Mode::Block, &events);
    let job = TestComponent::new("job", Mode::Succeed, &events);

    let service = builder()
        .with_runnable(api.clone())
        .with_runnable(job.clone())
        .build()
        .unwrap();

    let shutdown = service.start().await.unwrap();

    assert_eq!(shutdown.reason, ShutdownReason::RunnableExited("job".to_string()));
    assert_eq!(api.stops(), 1);
    assert_eq!(job.stops(), 1);
}

#[tokio::test]
async fn test_concurrent_stop_and_signal_stop_once() {
    let events = events();
    let api = TestComponent::new("api", Mode::Block, &events);
    let db = TestComponent::new("db", Mode::Succeed, &events);

    let service = Arc::new(
        builder()
            .with_runnable(api.clone())
            .with_init_runnable(db.clone())
            .build()
            .unwrap(),
    );

    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;

    let signals = service.signal_handle();
    let (sent, outcome) = tokio::join!(signals.send(ProcessSignal::Interrupt), service.stop());
    sent.unwrap();
    let shutdown = handle.await.unwrap().unwrap();

    assert!(outcome.is_graceful());
    assert!(shutdown.outcome.is_graceful());
    assert_eq!(api.stops(), 1);
    assert_eq!(db.stops(), 1);

    // Nothing left to stop
    assert!(service.stop().await.is_graceful());
    assert_eq!(api.stops(), 1);
    assert_eq!(db.stops(), 1);
}

#[tokio::test]
async fn test_external_stop_ends_start() {
    let events = events();
    let api = TestComponent::new("api", Mode::Block, &events);

    let service = Arc::new(builder().with_runnable(api.clone()).build().unwrap());

    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;

    service.stop().await;
    let shutdown = handle.await.unwrap().unwrap();

    assert_eq!(shutdown.reason, ShutdownReason::UserRequest);
    assert_eq!(api.stops(), 1);
}

#[tokio::test]
async fn test_service_without_runnables_waits_for_stop() {
    let events = events();
    let db = TestComponent::new("db", Mode::Succeed, &events);
    let service = Arc::new(builder().with_init_runnable(db.clone()).build().unwrap());

    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;
    assert!(!handle.is_finished());

    service.stop().await;
    let shutdown = handle.await.unwrap().unwrap();

    assert_eq!(shutdown.reason, ShutdownReason::UserRequest);
    assert_eq!(db.stops(), 1);
}

#[tokio::test]
async fn test_unacknowledged_stop_is_forced_after_timeout() {
    let events = events();
    let stuck = TestComponent::new("stuck", Mode::Hang, &events);
    let api = TestComponent::new("api", Mode::Block, &events);

    let service = Arc::new(
        builder()
            .with_runnable(stuck.clone())
            .with_runnable(api.clone())
            .shutdown_timeout(Duration::from_millis(100))
            .build()
            .unwrap(),
    );

    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;

    service
        .signal_handle()
        .send(ProcessSignal::Terminate)
        .await
        .unwrap();
    let shutdown = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("start did not return after the grace period")
        .unwrap()
        .unwrap();

    assert_eq!(
        shutdown.outcome,
        ShutdownOutcome::Forced {
            pending: vec!["stuck".to_string()]
        }
    );
    assert_eq!(stuck.stops(), 1);
    assert_eq!(api.stops(), 1);
    assert_eq!(service.component_state("api"), Some(ComponentState::Stopped));
    assert_eq!(service.component_state("stuck"), Some(ComponentState::Stopping));
}

#[tokio::test]
async fn test_hangup_reloads_and_restart_reruns_initializers() {
    let events = events();
    let db = TestComponent::new("db", Mode::Succeed, &events);
    let api = TestComponent::new("api", Mode::Block, &events);

    let service = Arc::new(
        builder()
            .with_runnable(api.clone())
            .with_init_runnable(db.clone())
            .build()
            .unwrap(),
    );

    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;
    service
        .signal_handle()
        .send(ProcessSignal::Hangup)
        .await
        .unwrap();
    let shutdown = handle.await.unwrap().unwrap();

    assert_eq!(shutdown.reason, ShutdownReason::Reload);
    assert_eq!(service.lifecycle_state(), LifecycleState::Initializing);
    assert!(!service.is_initialized());
    assert_eq!((db.runs(), db.stops()), (1, 1));
    assert_eq!((api.runs(), api.stops()), (1, 1));

    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    service.stop().await;
    let shutdown = handle.await.unwrap().unwrap();

    assert_eq!(shutdown.reason, ShutdownReason::UserRequest);
    assert_eq!((db.runs(), db.stops()), (2, 2));
    assert_eq!((api.runs(), api.stops()), (2, 2));
}

#[tokio::test]
async fn test_stop_during_init_launches_nothing() {
    let events = events();
    let slow = TestComponent::new("slow", Mode::Slow, &events);
    let cache = TestComponent::new("cache", Mode::Succeed, &events);
    let api = TestComponent::new("api", Mode::Block, &events);

    let service = Arc::new(
        builder()
            .with_runnable(api.clone())
            .with_init_runnable(slow.clone())
            .with_init_runnable(cache.clone())
            .build()
            .unwrap(),
    );

    let handle = spawn_start(&service);
    wait_until(|| slow.runs() == 1).await;
    assert_eq!(service.lifecycle_state(), LifecycleState::Initializing);

    let outcome = service.stop().await;
    let shutdown = handle.await.unwrap().unwrap();

    assert!(outcome.is_graceful());
    assert_eq!(shutdown.reason, ShutdownReason::UserRequest);
    assert_eq!(*events.lock(), vec!["run slow", "slow done", "stop slow"]);
    assert_eq!(cache.runs(), 0);
    assert_eq!(api.runs(), 0);
    assert_eq!(service.lifecycle_state(), LifecycleState::Stopped);
    assert!(!service.is_initialized());

    // The interrupted start does not leave a pending stop behind
    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;
    service.stop().await;
    handle.await.unwrap().unwrap();

    assert_eq!((slow.runs(), slow.stops()), (2, 2));
    assert_eq!((api.runs(), api.stops()), (1, 1));
}

#[tokio::test]
async fn test_signal_during_teardown_does_not_end_next_run() {
    let events = events();
    let api = TestComponent::new("api", Mode::SlowStop, &events);

    let service = Arc::new(builder().with_runnable(api.clone()).build().unwrap());

    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;

    let stopper = service.clone();
    let stopping = tokio::spawn(async move { stopper.stop().await });
    wait_until(|| api.stops() == 1).await;
    service
        .signal_handle()
        .send(ProcessSignal::Terminate)
        .await
        .unwrap();

    let shutdown = handle.await.unwrap().unwrap();
    stopping.await.unwrap();
    assert_eq!(shutdown.reason, ShutdownReason::UserRequest);

    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    service.stop().await;
    let shutdown = handle.await.unwrap().unwrap();
    assert_eq!(shutdown.reason, ShutdownReason::UserRequest);
    assert_eq!((api.runs(), api.stops()), (2, 2));
}

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let events = events();
    let api = TestComponent::new("api", Mode::Block, &events);
    let service = Arc::new(builder().with_runnable(api.clone()).build().unwrap());

    let handle = spawn_start(&service);
    wait_for_state(&service, LifecycleState::Running).await;

    assert!(matches!(
        service.start().await,
        Err(ServiceError::System { .. })
    ));
    assert!(matches!(
        service.init().await,
        Err(ServiceError::System { .. })
    ));

    service.stop().await;
    handle.await.unwrap().unwrap();
    assert_eq!(api.runs(), 1);
}

#[test]
fn test_duplicate_prefix_is_rejected() {
    let events = events();
    let result = builder()
        .with_init_runnable(TestComponent::new("db", Mode::Succeed, &events))
        .with_init_runnable(TestComponent::new("db", Mode::Succeed, &events))
        .build();

    match result {
        Err(ServiceError::DuplicatePrefix { prefix }) => assert_eq!(prefix, "db"),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("duplicate prefix was accepted"),
    }

    let result = builder()
        .with_init_config(Arc::new(StaticConfig {
            prefix: "jwt".to_string(),
            value: 1,
        }))
        .with_init_config(Arc::new(StaticConfig {
            prefix: "jwt".to_string(),
            value: 2,
        }))
        .build();
    assert!(matches!(result, Err(ServiceError::DuplicatePrefix { .. })));
}

#[test]
fn test_get_prefers_initializers_over_configs() {
    let events = events();
    let service = builder()
        .with_init_runnable(TestComponent::new("db", Mode::Succeed, &events))
        .with_init_config(Arc::new(StaticConfig {
            prefix: "db".to_string(),
            value: 7,
        }))
        .with_init_config(Arc::new(StaticConfig {
            prefix: "limits".to_string(),
            value: 42,
        }))
        .build()
        .unwrap();

    assert_eq!(
        service.get_as::<String>("db").as_deref().map(String::as_str),
        Some("db value")
    );
    assert_eq!(service.get_as::<u32>("limits").as_deref(), Some(&42));
    assert!(service.get_as::<String>("limits").is_none());
    assert!(service.get("missing").is_none());
    assert!(service.must_get("limits").downcast::<u32>().is_ok());
}

#[test]
#[should_panic(expected = "can not get cache")]
fn test_must_get_panics_on_missing_prefix() {
    let service = builder().build().unwrap();
    service.must_get("cache");
}

#[test]
fn test_configure_applies_flags_to_components() {
    let events = events();
    let worker = TestComponent::with_flag("worker", "worker-size", &events);
    let service = builder()
        .with_runnable(worker.clone())
        .shutdown_timeout(Duration::from_secs(12))
        .build()
        .unwrap();

    let outcome = service
        .configure_from(["test-service", "--worker-size", "5", "--app-env", "stg"])
        .unwrap();

    assert_eq!(outcome, ConfigureOutcome::Ready);
    assert_eq!(*worker.configured.lock(), Some(5));
    assert_eq!(service.env(), AppEnv::Stg);
    assert_eq!(service.shutdown_timeout(), Duration::from_secs(12));
    assert!(service.flag_values().is_some());
}

#[test]
fn test_configure_with_outenv_skips_components() {
    let events = events();
    let worker = TestComponent::with_flag("worker", "worker-size", &events);
    let service = builder().with_runnable(worker.clone()).build().unwrap();

    let outcome = service
        .configure_from(["test-service", "--outenv", "--shutdown-timeout", "3"])
        .unwrap();

    assert_eq!(outcome, ConfigureOutcome::EnvTableRequested);
    assert_eq!(*worker.configured.lock(), None);
    assert_eq!(service.shutdown_timeout(), Duration::from_secs(3));

    let table = service.env_table();
    assert!(table.contains("WORKER_SIZE"));
    assert!(table.contains("APP_ENV"));
    assert!(table.contains("LOG_LEVEL"));
}

#[test]
fn test_configure_rejects_bad_values() {
    let service = builder().build().unwrap();

    assert!(matches!(
        service.configure_from(["test-service", "--app-env", "qa"]),
        Err(ServiceError::Flag { .. })
    ));
    assert!(matches!(
        service.configure_from(["test-service", "--shutdown-timeout", "-1"]),
        Err(ServiceError::Config { .. })
    ));
    assert!(matches!(
        service.configure_from(["test-service", "--unknown"]),
        Err(ServiceError::Cli(_))
    ));
}

#[test]
fn test_flags_are_collected_in_registration_order() {
    let events = events();
    let service = builder()
        .with_runnable(TestComponent::with_flag("worker", "worker-size", &events))
        .with_init_config(Arc::new(StaticConfig {
            prefix: "jwt".to_string(),
            value: 1,
        }))
        .build()
        .unwrap();

    let flags = service.collect_flags();
    let names: Vec<_> = flags.flags().iter().map(|f| f.name.as_str()).collect();

    assert_eq!(
        names,
        vec![
            "app-env",
            "shutdown-timeout",
            "outenv",
            "log-level",
            "log-format",
            "worker-size"
        ]
    );
}

#[test]
fn test_run_function_and_identity() {
    let service = builder().build().unwrap();

    assert_eq!(service.name(), "test-service");
    assert_eq!(service.version(), "0.0.1");
    assert_eq!(service.env(), AppEnv::Dev);
    assert_eq!(service.lifecycle_state(), LifecycleState::Created);
    assert_eq!(service.run_function(|s| s.name().len()), 12);
}

#[test]
fn test_app_env_parsing() {
    assert_eq!("prd".parse::<AppEnv>().unwrap(), AppEnv::Prd);
    assert_eq!(AppEnv::Stg.to_string(), "stg");
    assert!("production".parse::<AppEnv>().is_err());
}
