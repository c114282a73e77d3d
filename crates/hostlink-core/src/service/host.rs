use super::{Service, ServiceState};
use crate::error::{AgentError, AgentResult};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives failures that must take the agent down
pub trait FatalHandler: Send + Sync {
    fn fatal(&self, service: &str, message: &str);
}

/// Production handler: log and abort the process
#[derive(Debug, Default)]
pub struct AbortOnFatal;

impl FatalHandler for AbortOnFatal {
    fn fatal(&self, service: &str, message: &str) {
        error!(service, "Fatal service failure, terminating: {}", message);
        std::process::abort();
    }
}

/// Handler that only records failures
#[derive(Debug, Default)]
pub struct RecordingFatalHandler {
    failures: Mutex<Vec<(String, String)>>,
}

impl RecordingFatalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(service, message)` pairs
    pub fn failures(&self) -> Vec<(String, String)> {
        self.failures.lock().clone()
    }
}

impl FatalHandler for RecordingFatalHandler {
    fn fatal(&self, service: &str, message: &str) {
        error!(service, "Fatal service failure: {}", message);
        self.failures
            .lock()
            .push((service.to_string(), message.to_string()));
    }
}

/// Result of [`ServiceHost::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    TimedOut,
}

struct RunningTask {
    token: CancellationToken,
    deadline: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs one service on its own task
pub struct ServiceHost {
    service: Arc<dyn Service>,
    fatal: Arc<dyn FatalHandler>,
    parent: CancellationToken,
    state: Arc<Mutex<ServiceState>>,
    task: Mutex<Option<RunningTask>>,
}

impl ServiceHost {
    /// The service's token is a child of `parent`
    pub fn new(
        service: Arc<dyn Service>,
        fatal: Arc<dyn FatalHandler>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            service,
            fatal,
            parent: parent.clone(),
            state: Arc::new(Mutex::new(ServiceState::Created)),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Spawn the service task
    ///
    /// Returns `false` when the service is disabled. Starting a service
    /// whose previous run is still active is a fatal programming error.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            self.fatal.fatal(
                self.name(),
                "Critical invalid operation while starting service: already running",
            );
            return false;
        }

        if !self.service.is_enabled() {
            info!(service = self.name(), "Service disabled, skipping start");
            *self.state.lock() = ServiceState::Stopped;
            return false;
        }

        *self.state.lock() = ServiceState::Starting;
        let token = self.parent.child_token();
        let deadline = CancellationToken::new();
        let handle = tokio::spawn(run_service(
            self.service.clone(),
            self.fatal.clone(),
            self.state.clone(),
            token.clone(),
            deadline.clone(),
        ));
        *task = Some(RunningTask {
            token,
            deadline,
            handle,
        });
        true
    }

    /// Cancel the service and wait up to `grace` for it to finish
    pub async fn stop(&self, grace: Duration) -> StopOutcome {
        let task = self.task.lock().take();
        let Some(mut task) = task else {
            return StopOutcome::Stopped;
        };
        if task.handle.is_finished() {
            return StopOutcome::Stopped;
        }

        {
            let mut state = self.state.lock();
            if *state != ServiceState::Stopped {
                *state = ServiceState::Stopping;
            }
        }
        task.token.cancel();

        match tokio::time::timeout(grace, &mut task.handle).await {
            Ok(_) => {
                debug!(service = self.name(), "Service task finished");
                StopOutcome::Stopped
            }
            Err(_) => {
                task.deadline.cancel();
                task.handle.abort();
                *self.state.lock() = ServiceState::Stopped;
                warn!(
                    service = self.name(),
                    grace_ms = grace.as_millis() as u64,
                    "Service did not stop within the grace period, aborted"
                );
                StopOutcome::TimedOut
            }
        }
    }
}

async fn run_service(
    service: Arc<dyn Service>,
    fatal: Arc<dyn FatalHandler>,
    state: Arc<Mutex<ServiceState>>,
    token: CancellationToken,
    deadline: CancellationToken,
) {
    let name = service.name().to_string();
    let outcome = AssertUnwindSafe(drive(service.as_ref(), &state, &token, &deadline))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(message)) => fatal.fatal(&name, &message),
        Err(panic) => {
            let message = format!("Service panicked: {}", panic_message(&*panic));
            fatal.fatal(&name, &message);
        }
    }
    *state.lock() = ServiceState::Stopped;
}

/// Run the three phases; the error is the message handed to the fatal handler
async fn drive(
    service: &dyn Service,
    state: &Mutex<ServiceState>,
    token: &CancellationToken,
    deadline: &CancellationToken,
) -> Result<(), String> {
    let name = service.name();

    debug!(service = name, "Starting service");
    phase(service.on_start(token).await, token).map_err(|e| {
        error!(service = name, error = %e, "Exception thrown during startup");
        format!("Exception thrown during startup: {}", e)
    })?;

    *state.lock() = ServiceState::Running;
    phase(service.execute(token).await, token).map_err(|e| {
        error!(service = name, error = %e, "Exception thrown during execution");
        format!("Exception thrown during execution: {}", e)
    })?;

    *state.lock() = ServiceState::Stopping;
    phase(service.on_stop(deadline).await, deadline).map_err(|e| {
        error!(service = name, error = %e, "Exception thrown during shutdown");
        format!("Exception thrown during shutdown: {}", e)
    })?;

    info!(service = name, "Successfully stopped service");
    Ok(())
}

/// `Cancelled` is a clean exit only when `token` itself was cancelled
fn phase(result: AgentResult<()>, token: &CancellationToken) -> AgentResult<()> {
    match result {
        Err(AgentError::Cancelled) if token.is_cancelled() => Ok(()),
        other => other,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        /// Run until cancelled
        UntilCancelled,
        /// Ignore cancellation
        Stubborn,
        FailStart,
        FailExecute,
        CancelledError,
        /// Returns `Cancelled` without its token being cancelled
        SpuriousCancel,
        Panic,
    }

    struct TestService {
        behavior: Behavior,
        enabled: bool,
        executions: AtomicUsize,
        stops: AtomicUsize,
    }

    impl TestService {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                enabled: true,
                executions: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }

        fn disabled() -> Arc<Self> {
            Arc::new(Self {
                behavior: Behavior::UntilCancelled,
                enabled: false,
                executions: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Service for TestService {
        fn name(&self) -> &str {
            "test"
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn on_start(&self, _token: &CancellationToken) -> AgentResult<()> {
            match self.behavior {
                Behavior::FailStart => Err(AgentError::service("bind failed")),
                _ => Ok(()),
            }
        }

        async fn execute(&self, token: &CancellationToken) -> AgentResult<()> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::UntilCancelled | Behavior::FailStart => {
                    token.cancelled().await;
                    Ok(())
                }
                Behavior::Stubborn => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
                Behavior::FailExecute => Err(AgentError::service("collector broke")),
                Behavior::CancelledError => {
                    token.cancelled().await;
                    Err(AgentError::Cancelled)
                }
                Behavior::SpuriousCancel => Err(AgentError::Cancelled),
                Behavior::Panic => panic!("collector exploded"),
            }
        }

        async fn on_stop(&self, _token: &CancellationToken) -> AgentResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn host(service: Arc<TestService>) -> (ServiceHost, Arc<RecordingFatalHandler>) {
        let fatal = Arc::new(RecordingFatalHandler::new());
        let host = ServiceHost::new(service, fatal.clone(), &CancellationToken::new());
        (host, fatal)
    }

    async fn wait_until_stopped(host: &ServiceHost) {
        for _ in 0..100 {
            if host.state() == ServiceState::Stopped {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("service did not stop, state {:?}", host.state());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let service = TestService::new(Behavior::UntilCancelled);
        let (host, fatal) = host(service.clone());
        assert_eq!(host.state(), ServiceState::Created);

        assert!(host.start());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(host.state(), ServiceState::Running);
        assert!(host.is_running());

        assert_eq!(host.stop(Duration::from_secs(1)).await, StopOutcome::Stopped);
        assert_eq!(host.state(), ServiceState::Stopped);
        assert_eq!(service.executions.load(Ordering::SeqCst), 1);
        assert_eq!(service.stops.load(Ordering::SeqCst), 1);
        assert!(fatal.failures().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_service_never_runs() {
        let service = TestService::disabled();
        let (host, _fatal) = host(service.clone());

        assert!(!host.start());
        assert_eq!(host.state(), ServiceState::Stopped);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.executions.load(Ordering::SeqCst), 0);
        assert_eq!(host.stop(Duration::from_secs(1)).await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_is_fatal() {
        let (host, fatal) = host(TestService::new(Behavior::UntilCancelled));
        assert!(host.start());
        assert!(!host.start());

        let failures = fatal.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.contains("already running"));
        host.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let service = TestService::new(Behavior::UntilCancelled);
        let (host, fatal) = host(service.clone());
        host.start();
        host.stop(Duration::from_secs(1)).await;
        assert!(host.start());
        host.stop(Duration::from_secs(1)).await;

        assert_eq!(service.executions.load(Ordering::SeqCst), 2);
        assert!(fatal.failures().is_empty());
    }

    #[tokio::test]
    async fn test_execute_error_escalates() {
        let service = TestService::new(Behavior::FailExecute);
        let (host, fatal) = host(service.clone());
        host.start();
        wait_until_stopped(&host).await;

        let failures = fatal.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "test");
        assert!(failures[0].1.contains("collector broke"));
        assert_eq!(service.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_error_escalates_without_execute() {
        let service = TestService::new(Behavior::FailStart);
        let (host, fatal) = host(service.clone());
        host.start();
        wait_until_stopped(&host).await;

        assert_eq!(fatal.failures().len(), 1);
        assert!(fatal.failures()[0].1.contains("startup"));
        assert_eq!(service.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_error_is_not_fatal() {
        let (host, fatal) = host(TestService::new(Behavior::CancelledError));
        host.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(host.stop(Duration::from_secs(1)).await, StopOutcome::Stopped);
        assert!(fatal.failures().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_error_with_live_token_escalates() {
        let service = TestService::new(Behavior::SpuriousCancel);
        let (host, fatal) = host(service.clone());
        host.start();
        wait_until_stopped(&host).await;

        let failures = fatal.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.contains("execution"));
        assert_eq!(service.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_escalates() {
        let (host, fatal) = host(TestService::new(Behavior::Panic));
        host.start();
        wait_until_stopped(&host).await;

        let failures = fatal.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.contains("collector exploded"));
    }

    #[tokio::test]
    async fn test_stop_times_out() {
        let (host, fatal) = host(TestService::new(Behavior::Stubborn));
        host.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            host.stop(Duration::from_millis(50)).await,
            StopOutcome::TimedOut
        );
        assert_eq!(host.state(), ServiceState::Stopped);
        assert!(!host.is_running());
        assert!(fatal.failures().is_empty());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_service() {
        let parent = CancellationToken::new();
        let fatal = Arc::new(RecordingFatalHandler::new());
        let host = ServiceHost::new(TestService::new(Behavior::UntilCancelled), fatal, &parent);
        host.start();

        parent.cancel();
        wait_until_stopped(&host).await;
    }
}
