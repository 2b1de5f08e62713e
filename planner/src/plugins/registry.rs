//! Plugin registry
//!
//! Accepts plugin registrations, keeps a client stub per plugin and evicts
//! plugins that stop answering their health checks. Local actuators and
//! registered plugins are handed to the planner through one uniform list.

use super::client_stub::ActuatorClientStub;
use super::protocol::{
    PluginInfo, RegisterRequest, RegistrationStatusResponse, HEALTH_PATH, PLUGIN_VERSION,
    REGISTER_PATH,
};
use super::{base_url, poll_until_ready, probe_addr, wait_for_shutdown, PluginError};
use crate::config::AStarConfig;
use crate::planner::actuators::Actuator;
use axum::extract::State as AxumState;
use axum::routing::{get, post};
use axum::{Json, Router};
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Registry settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Host to listen on
    pub endpoint: String,
    /// Port to listen on; 0 picks a free port
    pub port: u16,
    /// Failed health checks before eviction, also the dial retry budget
    pub retries: u32,
    /// Interval between health checks
    pub reconcile_period: Duration,
    /// Pause between two dial attempts
    pub dial_backoff: Duration,
    /// Timeout of a single health probe
    pub probe_timeout: Duration,
    /// Interval of the readiness poll after start
    pub ready_poll_interval: Duration,
    /// Deadline of the readiness poll after start
    pub ready_timeout: Duration,
    /// Deadline of a single remote actuator call
    pub call_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost".to_string(),
            port: 33333,
            retries: 3,
            reconcile_period: Duration::from_secs(5),
            dial_backoff: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            ready_poll_interval: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&AStarConfig> for RegistryConfig {
    fn from(cfg: &AStarConfig) -> Self {
        Self {
            endpoint: cfg.plugin_manager_endpoint.clone(),
            port: cfg.plugin_manager_port,
            retries: cfg.health_check_retries,
            reconcile_period: cfg.health_check_interval(),
            call_timeout: cfg.plugin_call_timeout(),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct Registered {
    plugins: IndexMap<String, Arc<ActuatorClientStub>>,
    retries: HashMap<String, u32>,
}

pub struct PluginRegistry {
    actuators: Vec<Arc<dyn Actuator>>,
    config: RegistryConfig,
    client: reqwest::Client,
    registered: Mutex<Registered>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: OnceLock<SocketAddr>,
    stopped: AtomicBool,
}

impl PluginRegistry {
    pub fn new(actuators: Vec<Arc<dyn Actuator>>, config: RegistryConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            actuators,
            config,
            client: reqwest::Client::new(),
            registered: Mutex::new(Registered::default()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            local_addr: OnceLock::new(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Address the registration server listens on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Start serving registrations and the periodic health reconciliation.
    /// Repeated calls return the bound address; a stopped registry cannot be
    /// started again.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, PluginError> {
        if self.is_stopped() {
            return Err(PluginError::Stopped);
        }
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }
        let bind_addr = format!("{}:{}", self.config.endpoint, self.config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| PluginError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| PluginError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;
        let _ = self.local_addr.set(addr);

        let router = Router::new()
            .route(REGISTER_PATH, post(register_handler))
            .route(HEALTH_PATH, get(health_handler))
            .with_state(Arc::clone(self));
        let shutdown = self.shutdown.subscribe();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(wait_for_shutdown(shutdown))
                .await;
            if let Err(e) = result {
                error!("Error during serving: {}", e);
            }
        });

        let reconciler = tokio::spawn(reconcile_loop(Arc::clone(self), self.shutdown.subscribe()));
        self.tasks.lock().await.extend([server, reconciler]);

        poll_until_ready(
            &self.client,
            &base_url(&probe_addr(addr).to_string()),
            self.config.ready_poll_interval,
            self.config.ready_timeout,
        )
        .await?;
        info!("Starting to serve on endpoint {}.", addr);
        Ok(addr)
    }

    /// Handle one registration request.
    pub async fn register(&self, plugin_info: PluginInfo) -> RegistrationStatusResponse {
        info!(
            "Received plugin registration for plugin name: {} with endpoint: {}.",
            plugin_info.name, plugin_info.endpoint
        );
        if self.is_stopped() {
            return RegistrationStatusResponse::rejected("Registry is stopped.");
        }
        if plugin_info.name.is_empty() || plugin_info.endpoint.is_empty() {
            return RegistrationStatusResponse::rejected("Plugin name and endpoint must not be empty.");
        }
        if plugin_info.supported_versions != PLUGIN_VERSION {
            return RegistrationStatusResponse::rejected(format!(
                "Unsupported plugin version: {}.",
                plugin_info.supported_versions
            ));
        }
        if self.is_registered(&plugin_info.name).await {
            warn!("Plugin {} is already registered.", plugin_info.name);
            return RegistrationStatusResponse::rejected("Plugin is already registered.");
        }

        let name = plugin_info.name.clone();
        let stub = match ActuatorClientStub::connect(plugin_info, self.client.clone(), &self.config).await {
            Ok(stub) => Arc::new(stub),
            Err(e) => {
                return RegistrationStatusResponse::rejected(format!(
                    "Actuator client stub error: {}.",
                    e
                ))
            }
        };

        let mut registered = self.registered.lock().await;
        // a concurrent registration may have won while dialing
        if registered.plugins.contains_key(&name) {
            drop(registered);
            stub.stop().await;
            warn!("Plugin {} is already registered.", name);
            return RegistrationStatusResponse::rejected("Plugin is already registered.");
        }
        if self.is_stopped() {
            drop(registered);
            stub.stop().await;
            return RegistrationStatusResponse::rejected("Registry is stopped.");
        }
        registered.plugins.insert(name.clone(), stub);
        registered.retries.insert(name, 0);
        RegistrationStatusResponse::accepted()
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.registered.lock().await.plugins.contains_key(name)
    }

    pub async fn plugin_count(&self) -> usize {
        self.registered.lock().await.plugins.len()
    }

    /// Snapshot of all actuators: local ones first, then registered plugins in
    /// registration order.
    pub async fn actuators(&self) -> Vec<Arc<dyn Actuator>> {
        let mut all = self.actuators.clone();
        let registered = self.registered.lock().await;
        all.extend(
            registered
                .plugins
                .values()
                .map(|stub| Arc::clone(stub) as Arc<dyn Actuator>),
        );
        all
    }

    /// Probe every registered plugin and evict those that failed `retries`
    /// consecutive checks. The lock is not held while probing.
    pub async fn refresh_registered_plugins(&self) {
        let snapshot: Vec<(String, Arc<ActuatorClientStub>)> = {
            let registered = self.registered.lock().await;
            registered
                .plugins
                .iter()
                .map(|(name, stub)| (name.clone(), Arc::clone(stub)))
                .collect()
        };
        let probes = snapshot
            .iter()
            .map(|(_, stub)| stub.check_connection(self.config.probe_timeout));
        let ready = futures::future::join_all(probes).await;

        let mut evicted = Vec::new();
        {
            let mut registered = self.registered.lock().await;
            let mut failed = Vec::new();
            for ((name, stub), ready) in snapshot.into_iter().zip(ready) {
                match registered.plugins.get(&name) {
                    Some(current) if Arc::ptr_eq(current, &stub) => {}
                    _ => continue,
                }
                if ready {
                    registered.retries.insert(name, 0);
                    continue;
                }
                let counter = registered.retries.entry(name.clone()).or_insert(0);
                *counter += 1;
                if *counter >= self.config.retries {
                    failed.push(name);
                }
            }
            debug!(
                "Active plugins vs to be removed plugins: {}/{}",
                registered.plugins.len(),
                failed.len()
            );
            for name in failed {
                registered.retries.remove(&name);
                if let Some(stub) = registered.plugins.shift_remove(&name) {
                    info!("Evicting plugin {} after failed health checks.", name);
                    evicted.push(stub);
                }
            }
        }
        for stub in evicted {
            stub.stop().await;
        }
    }

    /// Stop serving, close every plugin connection and wait for the
    /// background tasks. Safe to call more than once.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let stubs: Vec<Arc<ActuatorClientStub>> = {
            let mut registered = self.registered.lock().await;
            registered.retries.clear();
            registered.plugins.drain(..).map(|(_, stub)| stub).collect()
        };
        for stub in stubs {
            stub.stop().await;
        }
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                error!("Registry task failed: {}", e);
            }
        }
    }
}

async fn reconcile_loop(registry: Arc<PluginRegistry>, shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(registry.config.reconcile_period);
    // the first tick completes immediately
    ticker.tick().await;
    let stopped = wait_for_shutdown(shutdown);
    tokio::pin!(stopped);
    loop {
        tokio::select! {
            _ = ticker.tick() => registry.refresh_registered_plugins().await,
            _ = &mut stopped => break,
        }
    }
}

async fn register_handler(
    AxumState(registry): AxumState<Arc<PluginRegistry>>,
    Json(request): Json<RegisterRequest>,
) -> Json<RegistrationStatusResponse> {
    Json(registry.register(request.plugin_info).await)
}

async fn health_handler() -> &'static str {
    "ok"
}
