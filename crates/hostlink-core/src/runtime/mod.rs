//! Agent runtime: owns the buffer, the sink and every hosted service
//!
//! Collectors are created from the [`CollectorFactories`] registry for each
//! `[[sources]]` block. The push service and the agent health service are
//! always present. Services start in registration order and stop in
//! registration order, health and push last so the push service's final
//! flush sees everything the collectors produced.

mod health;
mod push;
mod registry;
mod watch;

pub use health::{AgentHealthService, AGENT_UPTIME_SCHEMA};
pub use push::PushService;
pub use registry::{CollectorFactories, CollectorFactoriesBuilder, CollectorFactory};
pub use watch::ConfigWatcher;

use crate::buffer::{EventBuffer, InMemoryBuffer};
use crate::config::{AgentConfig, SourceConfig};
use crate::output::{ConsoleEventOutput, EventOutput};
use crate::service::{
    AbortOnFatal, FatalHandler, IntervalRunner, ServiceHost, ServiceState, StopOutcome,
};
use crate::sink::EventSink;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period for stopping every service
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct AgentRuntimeBuilder {
    config: AgentConfig,
    output: Option<Arc<dyn EventOutput>>,
    factories: CollectorFactories,
    fatal: Option<Arc<dyn FatalHandler>>,
    shutdown_grace: Duration,
}

impl AgentRuntimeBuilder {
    /// Output transport; defaults to the console output
    pub fn output(mut self, output: Arc<dyn EventOutput>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn factories(mut self, factories: CollectorFactories) -> Self {
        self.factories = factories;
        self
    }

    /// Fatal failure handler; defaults to [`AbortOnFatal`]
    pub fn fatal_handler(mut self, fatal: Arc<dyn FatalHandler>) -> Self {
        self.fatal = Some(fatal);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> AgentRuntime {
        let output = self
            .output
            .unwrap_or_else(|| Arc::new(ConsoleEventOutput::new()));
        let fatal = self.fatal.unwrap_or_else(|| Arc::new(AbortOnFatal));
        let root = CancellationToken::new();

        let buffer = Arc::new(InMemoryBuffer::new(self.config.output.maximum_buffer_size));
        let sink = Arc::new(EventSink::new(
            buffer.clone(),
            output,
            self.config.output.maximum_flush_size,
        ));

        let push = Arc::new(PushService::new(sink.clone(), self.config.output.interval));
        let health = Arc::new(IntervalRunner::new(AgentHealthService::new(
            buffer.clone(),
            self.config.output.health.interval,
        )));
        let push_host = Arc::new(ServiceHost::new(push.clone(), fatal.clone(), &root));
        let health_host = Arc::new(ServiceHost::new(health.clone(), fatal.clone(), &root));

        AgentRuntime {
            config: RwLock::new(self.config),
            factories: self.factories,
            buffer,
            sink,
            fatal,
            root,
            push,
            push_host,
            health,
            health_host,
            collectors: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shutdown_grace: self.shutdown_grace,
        }
    }
}

pub struct AgentRuntime {
    config: RwLock<AgentConfig>,
    factories: CollectorFactories,
    buffer: Arc<InMemoryBuffer>,
    sink: Arc<EventSink>,
    fatal: Arc<dyn FatalHandler>,
    root: CancellationToken,
    push: Arc<PushService>,
    push_host: Arc<ServiceHost>,
    health: Arc<IntervalRunner<AgentHealthService>>,
    health_host: Arc<ServiceHost>,
    /// Collector hosts keyed by lowercase type name, in registration order
    collectors: Mutex<Vec<(String, Arc<ServiceHost>)>>,
    started: AtomicBool,
    shutdown_grace: Duration,
}

impl AgentRuntime {
    pub fn builder(config: AgentConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            config,
            output: None,
            factories: CollectorFactories::default(),
            fatal: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn config(&self) -> AgentConfig {
        self.config.read().clone()
    }

    pub fn buffer(&self) -> &Arc<InMemoryBuffer> {
        &self.buffer
    }

    pub fn sink(&self) -> &Arc<EventSink> {
        &self.sink
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Names of every hosted service, in stop order
    pub fn service_names(&self) -> Vec<String> {
        self.hosts().iter().map(|h| h.name().to_string()).collect()
    }

    /// State of the service with the given name
    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.hosts()
            .into_iter()
            .find(|h| h.name() == name)
            .map(|h| h.state())
    }

    /// Collector hosts followed by health and push
    fn hosts(&self) -> Vec<Arc<ServiceHost>> {
        let mut hosts: Vec<Arc<ServiceHost>> =
            self.collectors.lock().iter().map(|(_, h)| h.clone()).collect();
        hosts.push(self.health_host.clone());
        hosts.push(self.push_host.clone());
        hosts
    }

    /// Create or reconfigure collectors from the current configuration
    ///
    /// Collectors whose block disappeared keep their last configuration.
    fn load_configure_services(&self) {
        let config = self.config.read().clone();
        self.push.set_interval(config.output.interval);
        self.health.inner().set_interval(config.output.health.interval);

        let mut collectors = self.collectors.lock();
        for source in &config.sources {
            if let SourceConfig::Unknown(name) = source {
                warn!(source_type = %name, "Skipping source with an unknown type");
                continue;
            }

            let key = source.type_name();
            if let Some((_, host)) = collectors.iter().find(|(k, _)| k == key) {
                host.service().update_configuration(source);
                continue;
            }

            match self.factories.get(key) {
                Some(factory) => {
                    let buffer: Arc<dyn EventBuffer> = self.buffer.clone();
                    let service = factory(buffer);
                    service.update_configuration(source);
                    info!("Registered input service {}", key);
                    collectors.push((
                        key.to_string(),
                        Arc::new(ServiceHost::new(service, self.fatal.clone(), &self.root)),
                    ));
                }
                None => warn!("Invalid configuration for input type {}: no such collector", key),
            }
        }
    }

    /// Build collectors and start every service
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Agent runtime already started");
            return;
        }

        self.load_configure_services();
        for host in self.hosts() {
            info!("Starting service {}", host.name());
            host.start();
        }
        info!("Agent runtime started");
    }

    /// Stop every service within the shutdown grace period
    pub async fn stop(&self) -> Vec<(String, StopOutcome)> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Vec::new();
        }

        let deadline = Instant::now() + self.shutdown_grace;
        let mut outcomes = Vec::new();
        for host in self.hosts() {
            info!("Stopping service {}", host.name());
            let outcome = host.stop(deadline.saturating_duration_since(Instant::now())).await;
            info!("Stopped service {} ({:?})", host.name(), outcome);
            outcomes.push((host.name().to_string(), outcome));
        }
        self.root.cancel();
        info!("Agent runtime stopped");
        outcomes
    }

    /// Apply a new configuration to a running (or not yet started) runtime
    ///
    /// New collector types are created and existing ones reconfigured in
    /// place. Collectors that became enabled are started, collectors that
    /// became disabled are stopped. A collector whose block was removed keeps
    /// running with its previous configuration. Buffer sizes and connection
    /// settings are fixed at startup; changes to them are logged and ignored
    /// until restart.
    pub async fn reload(&self, config: AgentConfig) {
        let ignored = self.config.read().restart_required(&config);
        if !ignored.is_empty() {
            warn!(
                settings = %ignored.join(", "),
                "Changed settings require an agent restart to take effect"
            );
        }
        *self.config.write() = config;
        self.load_configure_services();
        if !self.is_started() {
            return;
        }

        let collectors: Vec<Arc<ServiceHost>> =
            self.collectors.lock().iter().map(|(_, h)| h.clone()).collect();
        for host in collectors {
            let enabled = host.service().is_enabled();
            if enabled && !host.is_running() {
                info!("Starting service {}", host.name());
                host.start();
            } else if !enabled && host.is_running() {
                info!("Stopping disabled service {}", host.name());
                host.stop(self.shutdown_grace).await;
            }
        }
        info!("Configuration reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntervalSourceConfig;
    use crate::error::AgentResult;
    use crate::record::Record;
    use crate::service::{IntervalService, RecordingFatalHandler};
    use async_trait::async_trait;

    /// Collector emitting one `Test.Tick` record per run
    struct TickCollector {
        buffer: Arc<dyn EventBuffer>,
        config: RwLock<IntervalSourceConfig>,
    }

    #[async_trait]
    impl IntervalService for TickCollector {
        fn name(&self) -> &str {
            "tick"
        }

        fn interval(&self) -> Duration {
            self.config.read().interval
        }

        fn is_enabled(&self) -> bool {
            self.config.read().enabled
        }

        async fn execute_single(&self, _token: &CancellationToken) -> AgentResult<()> {
            self.buffer.add(Record::new("Test.Tick"));
            Ok(())
        }

        fn update_configuration(&self, config: &SourceConfig) {
            if let SourceConfig::DiskInformation(c) = config {
                *self.config.write() = c.clone();
            }
        }
    }

    fn factories() -> CollectorFactories {
        CollectorFactories::builder()
            .register("DiskInformation", |buffer| {
                Arc::new(IntervalRunner::new(TickCollector {
                    buffer,
                    config: RwLock::new(IntervalSourceConfig::default()),
                }))
            })
            .build()
    }

    fn tick_source(enabled: bool) -> SourceConfig {
        SourceConfig::DiskInformation(IntervalSourceConfig {
            enabled,
            interval: Duration::from_secs(60),
        })
    }

    fn runtime(sources: Vec<SourceConfig>) -> (AgentRuntime, Arc<RecordingFatalHandler>) {
        let mut config = AgentConfig::default();
        config.sources = sources;
        let fatal = Arc::new(RecordingFatalHandler::new());
        let runtime = AgentRuntime::builder(config)
            .factories(factories())
            .fatal_handler(fatal.clone())
            .shutdown_grace(Duration::from_secs(1))
            .build();
        (runtime, fatal)
    }

    #[tokio::test]
    async fn test_start_creates_configured_collectors() {
        let (runtime, fatal) = runtime(vec![
            tick_source(true),
            SourceConfig::Unknown("Telepathy".to_string()),
            SourceConfig::ProcessInformation(IntervalSourceConfig::default()),
        ]);
        runtime.start();

        assert_eq!(runtime.service_names(), vec!["tick", "agenthealth", "output"]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runtime.service_state("tick"), Some(ServiceState::Running));

        let outcomes = runtime.stop().await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|(_, o)| *o == StopOutcome::Stopped));
        assert!(fatal.failures().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_collector_is_not_started() {
        let (runtime, _fatal) = runtime(vec![tick_source(false)]);
        runtime.start();
        assert_eq!(runtime.service_state("tick"), Some(ServiceState::Stopped));
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_stop_flushes_collected_records() {
        let (runtime, _fatal) = runtime(vec![tick_source(true)]);
        runtime.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!runtime.buffer().is_empty());

        runtime.stop().await;
        assert!(runtime.buffer().is_empty());
        assert!(runtime.sink().stats().records_flushed >= 2);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let (runtime, _fatal) = runtime(vec![]);
        assert!(runtime.stop().await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_starts_and_stops_collectors() {
        let (runtime, _fatal) = runtime(vec![]);
        runtime.start();
        assert_eq!(runtime.service_names(), vec!["agenthealth", "output"]);

        let mut config = runtime.config();
        config.sources = vec![tick_source(true)];
        runtime.reload(config.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runtime.service_state("tick"), Some(ServiceState::Running));

        config.sources = vec![tick_source(false)];
        runtime.reload(config.clone()).await;
        assert_eq!(runtime.service_state("tick"), Some(ServiceState::Stopped));

        config.sources = vec![tick_source(true)];
        runtime.reload(config.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runtime.service_state("tick"), Some(ServiceState::Running));

        // Removing the block leaves the collector as it was
        config.sources.clear();
        config.output.interval = Duration::from_secs(42);
        runtime.reload(config).await;
        assert_eq!(runtime.service_state("tick"), Some(ServiceState::Running));
        assert_eq!(runtime.push.interval(), Duration::from_secs(42));

        runtime.stop().await;
    }
}
