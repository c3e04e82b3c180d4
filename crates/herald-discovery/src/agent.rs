//! Discovery agent
//!
//! TigerStyle: Single entry point; every background task has an owner and a
//! shutdown path.
//!
//! The agent wires the pieces together and runs two tasks:
//! - probe task: samples health every check interval
//! - lifecycle task: connects to the store, ticks the registration
//!   lifecycle every check interval, and applies connection events
//!
//! Store connection callbacks only enqueue into a bounded channel; the
//! lifecycle task is the sole caller of publish and unpublish.

use crate::client::DiscoveryClient;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::health::{HealthAggregator, HealthConfig, HealthProbe};
use crate::lifecycle::{LifecycleState, RegistrationLifecycle};
use crate::node_id::NodeIdAllocator;
use crate::registration::{validate_service_name, ServiceRegistration};
use crate::rotation::RotationStatus;
use crate::shutdown::ShutdownSignal;
use crate::status::ServerStatus;
use crate::tasks::{AdminTask, BirTask, OorTask};
use herald_core::constants::{HEALTH_STALENESS_SLACK_MS_DEFAULT, STORE_EVENT_QUEUE_DEPTH_MAX};
use herald_core::{DiscoveryConfig, IoContext, TimeProvider};
use herald_idgen::{IdGenerator, NodeId};
use herald_registry::{ConnectionEvent, CoordinationStore, StoreError, StoreResult};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Agent state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Built, not yet started
    Idle,
    /// Connecting and spawning tasks
    Starting,
    /// Tasks are running
    Running,
    /// Unpublishing and tearing down
    ShuttingDown,
    /// Terminal
    Stopped,
}

/// Timing knobs, all in milliseconds
///
/// Derived from [`DiscoveryConfig`]; tests override them to run sub-second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentTimings {
    pub check_interval_ms: u64,
    pub check_staleness_ms: u64,
    /// Widens the staleness bound beyond `dropwizardCheckStaleness`
    ///
    /// A sample counts until it is `max(check_staleness_ms, check_interval_ms)
    /// + staleness_slack_ms` old, so timer jitter between two probes never
    /// empties a healthy window. Zero gives the exact configured bound.
    pub staleness_slack_ms: u64,
    pub connection_retry_interval_ms: u64,
    pub store_operation_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl AgentTimings {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            check_interval_ms: config.check_interval_ms(),
            check_staleness_ms: config.check_staleness_ms(),
            staleness_slack_ms: HEALTH_STALENESS_SLACK_MS_DEFAULT,
            connection_retry_interval_ms: config.connection_retry_interval_millis,
            store_operation_timeout_ms: config.store_operation_timeout_ms,
            shutdown_timeout_ms: config.shutdown_timeout_ms,
        }
    }

    pub fn validate(&self) -> DiscoveryResult<()> {
        let positive = [
            ("check_interval_ms", self.check_interval_ms),
            ("check_staleness_ms", self.check_staleness_ms),
            ("connection_retry_interval_ms", self.connection_retry_interval_ms),
            ("store_operation_timeout_ms", self.store_operation_timeout_ms),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(DiscoveryError::invalid_config(field, "must be positive"));
            }
        }
        Ok(())
    }

    fn health_config(&self) -> HealthConfig {
        HealthConfig::new(self.check_interval_ms, self.check_staleness_ms)
            .with_slack_ms(self.staleness_slack_ms)
    }
}

/// Builder for [`DiscoveryAgent`]
pub struct DiscoveryAgentBuilder {
    config: DiscoveryConfig,
    service_name: String,
    port: u16,
    host: Option<String>,
    store: Option<Arc<dyn CoordinationStore>>,
    io: Option<IoContext>,
    probes: Vec<Arc<dyn HealthProbe>>,
    tags: Vec<String>,
    node_data: BTreeMap<String, String>,
    timings: Option<AgentTimings>,
}

impl DiscoveryAgentBuilder {
    /// Host used when the config has no `publishedHost`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn io(mut self, io: IoContext) -> Self {
        self.io = Some(io);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Opaque key/value forwarded in the published node
    pub fn node_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node_data.insert(key.into(), value.into());
        self
    }

    pub fn timings(mut self, timings: AgentTimings) -> Self {
        self.timings = Some(timings);
        self
    }

    pub fn build(self) -> DiscoveryResult<DiscoveryAgent> {
        self.config.validate()?;
        validate_service_name(&self.service_name)?;
        let timings = self
            .timings
            .unwrap_or_else(|| AgentTimings::from_config(&self.config));
        timings.validate()?;
        let store = self.store.ok_or_else(|| {
            DiscoveryError::invalid_config("store", "a coordination store is required")
        })?;
        let io = self.io.unwrap_or_default();

        let host = match (&self.config.published_host, self.host) {
            (Some(published), _) => published.clone(),
            (None, Some(host)) => host,
            (None, None) => local_hostname(),
        };
        let port = self.config.published_port.unwrap_or(self.port);
        let mut registration =
            ServiceRegistration::new(
                self.service_name,
                self.config.environment.clone(),
                host,
                port,
            );
        registration.tags = self.tags;
        registration.node_data = self.node_data;
        registration.validate()?;

        let preferred_node = match self.config.node_id {
            Some(id) => NodeId::new(id).map_err(DiscoveryError::Id)?,
            None => NodeId::derive(
                &registration.host,
                registration.port,
                &registration.environment,
            ),
        };

        let health = Arc::new(HealthAggregator::new(timings.health_config(), io.time.clone()));
        for probe in self.probes {
            health.register_probe(probe);
        }

        let (lifecycle_tx, _) = watch::channel(LifecycleState::Boot);
        info!(
            service = %registration.service_name,
            host = %registration.host,
            port = registration.port,
            environment = %registration.environment,
            node_id = %preferred_node,
            "Discovery agent configured"
        );

        Ok(DiscoveryAgent {
            rotation: RotationStatus::new(self.config.initial_rotation_status),
            config: self.config,
            registration,
            timings,
            store,
            io,
            server_status: ServerStatus::new(),
            health,
            preferred_node,
            id_generator: std::sync::RwLock::new(None),
            state: RwLock::new(AgentState::Idle),
            lifecycle_state: Arc::new(lifecycle_tx),
            probe_task: RwLock::new(None),
            lifecycle_task: RwLock::new(None),
            shutdown: Arc::new(ShutdownSignal::new()),
        })
    }
}

fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!(error = %e, "Could not resolve local hostname; publishing as localhost");
            "localhost".to_string()
        }
    }
}

/// Registers this process in the coordination store while it is healthy,
/// in rotation, and serving
pub struct DiscoveryAgent {
    config: DiscoveryConfig,
    registration: ServiceRegistration,
    timings: AgentTimings,
    store: Arc<dyn CoordinationStore>,
    io: IoContext,
    rotation: RotationStatus,
    server_status: ServerStatus,
    health: Arc<HealthAggregator>,
    preferred_node: NodeId,
    id_generator: std::sync::RwLock<Option<Arc<IdGenerator>>>,
    state: RwLock<AgentState>,
    lifecycle_state: Arc<watch::Sender<LifecycleState>>,
    probe_task: RwLock<Option<JoinHandle<()>>>,
    lifecycle_task: RwLock<Option<JoinHandle<()>>>,
    shutdown: Arc<ShutdownSignal>,
}

impl std::fmt::Debug for DiscoveryAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryAgent")
            .field("registration", &self.registration)
            .field("timings", &self.timings)
            .field("lifecycle", &self.state())
            .finish_non_exhaustive()
    }
}

impl DiscoveryAgent {
    pub fn builder(
        config: DiscoveryConfig,
        service_name: impl Into<String>,
        port: u16,
    ) -> DiscoveryAgentBuilder {
        DiscoveryAgentBuilder {
            config,
            service_name: service_name.into(),
            port,
            host: None,
            store: None,
            io: None,
            probes: Vec::new(),
            tags: Vec::new(),
            node_data: BTreeMap::new(),
            timings: None,
        }
    }

    /// Connect, reserve a node id and spawn the background tasks
    pub async fn start(&self) -> DiscoveryResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != AgentState::Idle {
                return Err(DiscoveryError::AlreadyStarted);
            }
            *state = AgentState::Starting;
        }

        info!(service = %self.registration.service_name, "Starting discovery agent");

        let (events_tx, events_rx) = mpsc::channel::<ConnectionEvent>(STORE_EVENT_QUEUE_DEPTH_MAX);
        self.store.on_connection_event(Arc::new(move |event: ConnectionEvent| {
            if let Err(e) = events_tx.try_send(event) {
                warn!(event = ?event, error = %e, "Dropped store connection event");
            }
        }));

        let connected = match self.connect_once().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Initial store connection failed; retrying in background");
                false
            }
        };

        let node = match (self.config.node_id, connected) {
            (Some(_), _) | (None, false) => self.preferred_node,
            (None, true) => {
                NodeIdAllocator::default()
                    .reserve(
                        self.store.as_ref(),
                        &self.registration.service_name,
                        self.preferred_node,
                    )
                    .await
            }
        };
        let generator = Arc::new(IdGenerator::new(node, self.io.time.clone())?);
        *self
            .id_generator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(generator);

        self.start_probe_task().await;
        self.start_lifecycle_task(events_rx, connected).await;

        *self.state.write().await = AgentState::Running;
        info!(
            service = %self.registration.service_name,
            node_id = %node,
            "Discovery agent started"
        );
        Ok(())
    }

    async fn connect_once(&self) -> StoreResult<()> {
        bounded_connect(self.store.as_ref(), self.timings.store_operation_timeout_ms).await
    }

    async fn start_probe_task(&self) {
        let health = self.health.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(health.run(shutdown));
        *self.probe_task.write().await = Some(task);
    }

    async fn start_lifecycle_task(
        &self,
        events: mpsc::Receiver<ConnectionEvent>,
        connected: bool,
    ) {
        let lifecycle = RegistrationLifecycle::new(
            self.registration.clone(),
            self.store.clone(),
            self.rotation.clone(),
            self.health.clone(),
            self.server_status.clone(),
            self.io.time.clone(),
            self.timings.store_operation_timeout_ms,
            self.lifecycle_state.clone(),
        );
        let task = tokio::spawn(run_lifecycle(
            lifecycle,
            self.store.clone(),
            events,
            self.shutdown.clone(),
            self.io.time.clone(),
            self.timings,
            connected,
        ));
        *self.lifecycle_task.write().await = Some(task);
    }

    /// Unpublish within the shutdown budget, then close the store
    pub async fn stop(&self) -> DiscoveryResult<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                AgentState::Idle => {
                    *state = AgentState::Stopped;
                    return Ok(());
                }
                AgentState::Stopped | AgentState::ShuttingDown => return Ok(()),
                AgentState::Starting => return Err(DiscoveryError::NotStarted),
                AgentState::Running => *state = AgentState::ShuttingDown,
            }
        }

        info!(service = %self.registration.service_name, "Stopping discovery agent");
        self.shutdown.trigger();

        let budget = Duration::from_millis(self.timings.shutdown_timeout_ms);
        let mut result = Ok(());
        if let Some(task) = self.lifecycle_task.write().await.take() {
            if !join_within(task, budget, "lifecycle").await {
                result = Err(DiscoveryError::ShutdownTimeout {
                    timeout_ms: self.timings.shutdown_timeout_ms,
                });
            }
        }
        if let Some(task) = self.probe_task.write().await.take() {
            join_within(task, budget, "probe").await;
        }

        self.store.close().await;
        *self.state.write().await = AgentState::Stopped;
        info!(service = %self.registration.service_name, "Discovery agent stopped");
        result
    }

    pub async fn agent_state(&self) -> AgentState {
        *self.state.read().await
    }

    /// Current registration state
    pub fn state(&self) -> LifecycleState {
        *self.lifecycle_state.borrow()
    }

    /// Watch registration state changes
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle_state.subscribe()
    }

    pub fn registration(&self) -> &ServiceRegistration {
        &self.registration
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn timings(&self) -> &AgentTimings {
        &self.timings
    }

    pub fn rotation(&self) -> &RotationStatus {
        &self.rotation
    }

    /// Latch the hosting server trips once it accepts connections
    pub fn server_status(&self) -> &ServerStatus {
        &self.server_status
    }

    pub fn health(&self) -> &Arc<HealthAggregator> {
        &self.health
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Add a health probe at runtime
    pub fn register_probe(&self, probe: Arc<dyn HealthProbe>) {
        self.health.register_probe(probe);
    }

    /// Generator bound to the node id reserved at start
    pub fn id_generator(&self) -> DiscoveryResult<Arc<IdGenerator>> {
        self.id_generator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DiscoveryError::NotStarted)
    }

    /// `oor` and `bir`, bound to this agent's rotation flag
    pub fn admin_tasks(&self) -> Vec<Arc<dyn AdminTask>> {
        vec![
            Arc::new(OorTask::new(self.rotation.clone())),
            Arc::new(BirTask::new(self.rotation.clone())),
        ]
    }

    /// Client for this agent's own service
    pub fn client(&self) -> DiscoveryClient {
        self.client_for(self.registration.service_name.clone())
    }

    /// Client for any service in this agent's environment
    pub fn client_for(&self, service_name: impl Into<String>) -> DiscoveryClient {
        DiscoveryClient::new(
            self.store.clone(),
            service_name,
            self.registration.environment.clone(),
            self.io.clone(),
        )
        .with_stale_after_ms(self.timings.check_interval_ms + self.timings.check_staleness_ms)
    }
}

async fn bounded_connect(store: &dyn CoordinationStore, timeout_ms: u64) -> StoreResult<()> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), store.connect()).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::timeout("connect", timeout_ms)),
    }
}

/// Returns false if the task had to be aborted
async fn join_within(mut task: JoinHandle<()>, budget: Duration, name: &str) -> bool {
    match tokio::time::timeout(budget, &mut task).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(task = name, error = %e, "Task ended abnormally");
            true
        }
        Err(_) => {
            warn!(
                task = name,
                budget_ms = budget.as_millis() as u64,
                "Task missed shutdown budget; aborting"
            );
            task.abort();
            false
        }
    }
}

/// Retry connecting until it succeeds; false if shutdown came first
async fn connect_with_retry(
    store: &dyn CoordinationStore,
    shutdown: &ShutdownSignal,
    time: &Arc<dyn TimeProvider>,
    timings: AgentTimings,
) -> bool {
    loop {
        match bounded_connect(store, timings.store_operation_timeout_ms).await {
            Ok(()) => {
                info!("Coordination store connected");
                return true;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_in_ms = timings.connection_retry_interval_ms,
                    "Store connection failed"
                );
            }
        }
        tokio::select! {
            _ = time.sleep_ms(timings.connection_retry_interval_ms) => {}
            _ = shutdown.wait() => return false,
        }
    }
}

async fn run_lifecycle(
    mut lifecycle: RegistrationLifecycle,
    store: Arc<dyn CoordinationStore>,
    mut events: mpsc::Receiver<ConnectionEvent>,
    shutdown: Arc<ShutdownSignal>,
    time: Arc<dyn TimeProvider>,
    timings: AgentTimings,
    connected: bool,
) {
    if !connected && !connect_with_retry(store.as_ref(), &shutdown, &time, timings).await {
        lifecycle.stop().await;
        debug!("Lifecycle task shutting down before first connection");
        return;
    }

    let tick_ms = timings.check_interval_ms;
    let mut next_tick_ms = time.monotonic_ms();
    loop {
        let now_ms = time.monotonic_ms();
        if now_ms >= next_tick_ms {
            lifecycle.tick().await;
            next_tick_ms += tick_ms;
            if next_tick_ms <= now_ms {
                next_tick_ms = now_ms + tick_ms;
            }
            continue;
        }

        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            Some(event) = events.recv() => lifecycle.handle_event(event).await,
            _ = time.sleep_ms(next_tick_ms - now_ms) => {}
        }
    }

    lifecycle.stop().await;
    debug!("Lifecycle task shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_dst::{settle, DeterministicRng, SimClock};
    use herald_registry::{HealthStatus, MemoryStore, StoreOp};

    fn config() -> DiscoveryConfig {
        DiscoveryConfig::default()
            .with_environment("testing")
            .with_published_host("CustomHost")
            .with_published_port(21000)
    }

    fn io(clock: &SimClock) -> IoContext {
        IoContext::new(Arc::new(clock.clone()), Arc::new(DeterministicRng::new(7)))
    }

    #[test]
    fn test_builder_requires_store() {
        let err = DiscoveryAgent::builder(config(), "TestService", 8080)
            .build()
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Config(_)));
    }

    #[test]
    fn test_published_overrides_win() {
        let agent = DiscoveryAgent::builder(config(), "TestService", 8080)
            .host("ignored")
            .store(Arc::new(MemoryStore::standalone("herald")))
            .build()
            .unwrap();
        assert_eq!(agent.registration().host, "CustomHost");
        assert_eq!(agent.registration().port, 21000);
        assert_eq!(agent.registration().environment, "testing");
    }

    #[test]
    fn test_builder_host_used_without_override() {
        let agent = DiscoveryAgent::builder(DiscoveryConfig::default(), "TestService", 8080)
            .host("builder-host")
            .store(Arc::new(MemoryStore::standalone("herald")))
            .build()
            .unwrap();
        assert_eq!(agent.registration().host, "builder-host");
        assert_eq!(agent.registration().port, 8080);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::standalone("herald"));
        assert!(DiscoveryAgent::builder(config(), "", 8080)
            .store(store.clone())
            .build()
            .is_err());
        assert!(DiscoveryAgent::builder(config().with_node_id(1000), "svc", 8080)
            .store(store.clone())
            .build()
            .is_err());
        let mut timings = AgentTimings::from_config(&config());
        timings.check_interval_ms = 0;
        assert!(DiscoveryAgent::builder(config(), "svc", 8080)
            .store(store)
            .timings(timings)
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_id_generator_available_after_start() {
        let clock = SimClock::default();
        let agent = DiscoveryAgent::builder(config().with_node_id(7), "TestService", 8080)
            .store(Arc::new(MemoryStore::standalone("herald")))
            .io(io(&clock))
            .build()
            .unwrap();
        assert!(matches!(agent.id_generator(), Err(DiscoveryError::NotStarted)));

        agent.start().await.unwrap();
        let generator = agent.id_generator().unwrap();
        assert_eq!(generator.node().get(), 7);
        assert_eq!(generator.generate("X").unwrap().node().get(), 7);

        assert!(matches!(agent.start().await, Err(DiscoveryError::AlreadyStarted)));
        agent.stop().await.unwrap();
        assert_eq!(agent.agent_state().await, AgentState::Stopped);
    }

    #[tokio::test]
    async fn test_derived_node_id_is_reserved() {
        let clock = SimClock::default();
        let store = Arc::new(MemoryStore::standalone("herald"));
        let agent = DiscoveryAgent::builder(config(), "TestService", 8080)
            .store(store.clone())
            .io(io(&clock))
            .build()
            .unwrap();
        agent.start().await.unwrap();

        // "CustomHost:21000:testing" derives 502
        assert_eq!(agent.id_generator().unwrap().node().get(), 502);
        assert_eq!(store.call_count(StoreOp::ClaimNodeId), 1);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_retried_in_background() {
        let clock = SimClock::default();
        let store = Arc::new(MemoryStore::standalone("herald"));
        store.fail_next(StoreOp::Connect, StoreError::disconnected("refused"), 2);

        let mut timings = AgentTimings::from_config(&config());
        timings.connection_retry_interval_ms = 500;
        let agent = DiscoveryAgent::builder(config(), "TestService", 8080)
            .store(store.clone())
            .io(io(&clock))
            .probe(Arc::new(|| HealthStatus::Healthy))
            .timings(timings)
            .build()
            .unwrap();
        agent.server_status().mark_started();
        agent.start().await.unwrap();
        settle().await;
        assert_eq!(store.call_count(StoreOp::Connect), 2);
        assert!(!store.is_connected());

        clock.advance_ms(500);
        settle().await;
        assert!(store.is_connected());
        assert_eq!(agent.state(), LifecycleState::PublishedIn);

        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let agent = DiscoveryAgent::builder(config(), "TestService", 8080)
            .store(Arc::new(MemoryStore::standalone("herald")))
            .build()
            .unwrap();
        agent.stop().await.unwrap();
        assert_eq!(agent.agent_state().await, AgentState::Stopped);
        assert!(matches!(agent.start().await, Err(DiscoveryError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_admin_tasks_share_rotation() {
        let agent = DiscoveryAgent::builder(config(), "TestService", 8080)
            .store(Arc::new(MemoryStore::standalone("herald")))
            .build()
            .unwrap();
        let tasks = agent.admin_tasks();
        let names: Vec<&str> = tasks.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["oor", "bir"]);

        tasks[0].execute();
        assert!(!agent.rotation().is_in_rotation());
        tasks[1].execute();
        assert!(agent.rotation().is_in_rotation());
    }
}
