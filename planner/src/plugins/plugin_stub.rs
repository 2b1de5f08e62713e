//! Plugin-side server: serves an [`Actuator`] to the registry's client stubs.

use super::protocol::{
    EffectRequest, Empty, NextStateRequest, NextStateResponse, PerformRequest, PluginInfo,
    RegisterRequest, RegistrationStatusResponse, EFFECT_PATH, HEALTH_PATH, NEXT_STATE_PATH,
    PERFORM_PATH, REGISTER_PATH,
};
use super::{base_url, dial, poll_until_ready, probe_addr, wait_for_shutdown, PluginError};
use crate::planner::actuators::Actuator;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State as AxumState;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Where the plugin serves and where it registers.
#[derive(Debug, Clone)]
pub struct PluginStubConfig {
    pub name: String,
    /// Host the plugin serves on and announces
    pub endpoint: String,
    /// Port the plugin serves on; 0 picks a free port
    pub port: u16,
    pub plugin_manager_endpoint: String,
    pub plugin_manager_port: u16,
    /// Dial retries when registering
    pub retries: u32,
    pub retry_backoff: Duration,
    pub probe_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl PluginStubConfig {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        port: u16,
        plugin_manager_endpoint: impl Into<String>,
        plugin_manager_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            port,
            plugin_manager_endpoint: plugin_manager_endpoint.into(),
            plugin_manager_port,
            retries: 3,
            retry_backoff: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            ready_poll_interval: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

struct Serving {
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
    addr: SocketAddr,
}

#[derive(Default)]
struct Lifecycle {
    serving: Option<Serving>,
    stopped: bool,
}

struct ServerState {
    actuator: Arc<dyn Actuator>,
    shutdown: watch::Receiver<bool>,
}

/// Serves one actuator over HTTP/WebSocket and registers it with the
/// registry. Once stopped the stub cannot be started again.
pub struct ActuatorPluginStub {
    config: PluginStubConfig,
    actuator: Arc<dyn Actuator>,
    client: reqwest::Client,
    lifecycle: Mutex<Lifecycle>,
}

impl ActuatorPluginStub {
    pub fn new(config: PluginStubConfig, actuator: Arc<dyn Actuator>) -> Self {
        Self {
            config,
            actuator,
            client: reqwest::Client::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Address the plugin serves on, once started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.lock().await.serving.as_ref().map(|s| s.addr)
    }

    /// Start serving and wait until the server answers.
    pub async fn start(&self) -> Result<SocketAddr, PluginError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.stopped {
            return Err(PluginError::Stopped);
        }
        if let Some(serving) = &lifecycle.serving {
            return Ok(serving.addr);
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

        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ServerState {
            actuator: Arc::clone(&self.actuator),
            shutdown: shutdown_rx.clone(),
        });
        let router = Router::new()
            .route(NEXT_STATE_PATH, get(next_state_handler))
            .route(PERFORM_PATH, post(perform_handler))
            .route(EFFECT_PATH, post(effect_handler))
            .route(HEALTH_PATH, get(health_handler))
            .with_state(state);
        let name = self.config.name.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
                .await;
            if let Err(e) = result {
                error!("Error while serving actuator {}: {}", name, e);
            }
        });
        lifecycle.serving = Some(Serving {
            shutdown,
            server,
            addr,
        });
        drop(lifecycle);

        poll_until_ready(
            &self.client,
            &base_url(&probe_addr(addr).to_string()),
            self.config.ready_poll_interval,
            self.config.ready_timeout,
        )
        .await?;
        info!(
            "Actuator {}: starting to serve on endpoint: {}.",
            self.config.name, addr
        );
        Ok(addr)
    }

    /// Stop serving. Safe without a prior start and safe to repeat; a stopped
    /// stub refuses to start again.
    pub async fn stop(&self) {
        let serving = {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.stopped = true;
            lifecycle.serving.take()
        };
        if let Some(serving) = serving {
            serving.shutdown.send_replace(true);
            if let Err(e) = serving.server.await {
                error!("Plugin server task for {} failed: {}", self.config.name, e);
            }
            info!("Stopping plugin stub for {}.", self.config.name);
        }
    }

    /// Register this plugin with the registry.
    pub async fn register(&self) -> Result<(), PluginError> {
        let port = match self.local_addr().await {
            Some(addr) => addr.port(),
            None => self.config.port,
        };
        let manager_port = self.config.plugin_manager_port;
        if port == 0 || manager_port == 0 {
            return Err(PluginError::InvalidPort { port, manager_port });
        }
        let manager = base_url(&format!(
            "{}:{}",
            self.config.plugin_manager_endpoint, manager_port
        ));
        info!(
            "Actuator {}: performing plugin registration at {}.",
            self.config.name, manager
        );
        dial(
            &self.client,
            &manager,
            self.config.retries,
            self.config.retry_backoff,
            self.config.probe_timeout,
        )
        .await?;

        let mut plugin_info = PluginInfo::new(
            self.config.name.clone(),
            format!("{}:{}", self.config.endpoint, port),
        );
        plugin_info.group = self.actuator.group().to_string();
        let response: RegistrationStatusResponse = self
            .client
            .post(format!("{}{}", manager, REGISTER_PATH))
            .json(&RegisterRequest { plugin_info })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !response.error.is_empty() {
            return Err(PluginError::Rejected(response.error));
        }
        if !response.plugin_registered {
            return Err(PluginError::Rejected("registration not accepted".to_string()));
        }
        Ok(())
    }
}

async fn next_state_handler(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| next_state_session(socket, state))
}

/// Answer NextState requests on one stream until the client leaves or the
/// server shuts down.
async fn next_state_session(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sender, mut receiver) = socket.split();
    let stopped = wait_for_shutdown(state.shutdown.clone());
    tokio::pin!(stopped);
    loop {
        let text = tokio::select! {
            biased;
            _ = &mut stopped => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("NextState stream error: {}", e);
                    break;
                }
            },
        };
        let response = match serde_json::from_str::<NextStateRequest>(&text) {
            Ok(request) => {
                let result = tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    result = state
                        .actuator
                        .next_state(&request.state, &request.goal, &request.profiles) => result,
                };
                match result {
                    Ok(candidates) => NextStateResponse::from_candidates(candidates),
                    Err(e) => {
                        warn!("Actuator {} failed in NextState: {}", state.actuator.name(), e);
                        NextStateResponse::default()
                    }
                }
            }
            Err(e) => {
                warn!("Malformed NextState request: {}", e);
                NextStateResponse::default()
            }
        };
        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot encode NextState response: {}", e);
                break;
            }
        };
        if sender.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
}

async fn perform_handler(
    AxumState(state): AxumState<Arc<ServerState>>,
    Json(request): Json<PerformRequest>,
) -> Result<Json<Empty>, (StatusCode, String)> {
    debug!("Perform call for {}", state.actuator.name());
    state
        .actuator
        .perform(&request.state, &request.plan)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(Empty {}))
}

async fn effect_handler(
    AxumState(state): AxumState<Arc<ServerState>>,
    Json(request): Json<EffectRequest>,
) -> Result<Json<Empty>, (StatusCode, String)> {
    debug!("Effect call for {}", state.actuator.name());
    state
        .actuator
        .effect(&request.state, &request.profiles)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(Empty {}))
}

async fn health_handler() -> &'static str {
    "ok"
}
