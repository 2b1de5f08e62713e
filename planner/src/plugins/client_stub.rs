//! Remote actuator: forwards the actuator contract to a plugin process.

use super::protocol::{
    EffectRequest, NextStateRequest, NextStateResponse, PerformRequest, PluginInfo, EFFECT_PATH,
    NEXT_STATE_PATH, PERFORM_PATH,
};
use super::registry::RegistryConfig;
use super::{base_url, dial, probe_ready, wait_for_shutdown, PluginError};
use crate::planner::actuators::{Actuator, ActuatorError};
use crate::types::{Action, Candidate, Profiles, State};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type NextStateStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client side of a registered plugin.
///
/// Unary calls go over plain HTTP. NextState uses one WebSocket opened on
/// first use and kept for later calls; a broken or timed out stream is
/// dropped and reopened by the next call. Every call is bounded by
/// `call_timeout` and aborted as soon as the stub is stopped.
pub struct ActuatorClientStub {
    info: PluginInfo,
    base_url: String,
    stream_url: String,
    client: reqwest::Client,
    call_timeout: Duration,
    stream: Mutex<Option<NextStateStream>>,
    stopped: AtomicBool,
    cancel: watch::Sender<bool>,
}

impl ActuatorClientStub {
    /// Dial the plugin with the registry's retry budget and build a stub for
    /// it.
    pub async fn connect(
        info: PluginInfo,
        client: reqwest::Client,
        config: &RegistryConfig,
    ) -> Result<Self, PluginError> {
        debug!("Connecting to plugin endpoint: {}.", info.endpoint);
        let base_url = base_url(&info.endpoint);
        dial(
            &client,
            &base_url,
            config.retries,
            config.dial_backoff,
            config.probe_timeout,
        )
        .await?;
        let (cancel, _) = watch::channel(false);
        Ok(Self {
            stream_url: format!("ws://{}{}", info.endpoint, NEXT_STATE_PATH),
            base_url,
            info,
            client,
            call_timeout: config.call_timeout,
            stream: Mutex::new(None),
            stopped: AtomicBool::new(false),
            cancel,
        })
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Whether the plugin currently answers its health endpoint.
    pub async fn check_connection(&self, probe_timeout: Duration) -> bool {
        !self.is_stopped() && probe_ready(&self.client, &self.base_url, probe_timeout).await
    }

    /// Abort calls in flight and close the NextState stream; later calls fail
    /// with [`ActuatorError::Stopped`]. Never waits for a call in flight.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel.send_replace(true);
        // a call in flight holds the lock and drops its stream when aborted
        let stream = match self.stream.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(mut stream) = stream {
            match timeout(self.call_timeout, stream.close(None)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Closing stream to plugin {} failed: {}", self.info.name, e),
                Err(_) => debug!("Closing stream to plugin {} timed out", self.info.name),
            }
        }
    }

    /// Run `call` unless the stub is stopped first.
    async fn unless_stopped<T>(
        &self,
        call: impl Future<Output = Result<T, ActuatorError>>,
    ) -> Result<T, ActuatorError> {
        if self.is_stopped() {
            return Err(ActuatorError::Stopped);
        }
        let outcome = tokio::select! {
            biased;
            _ = wait_for_shutdown(self.cancel.subscribe()) => None,
            result = call => Some(result),
        };
        match outcome {
            Some(result) => result,
            None => {
                // the aborted call left its stream mid-exchange
                if let Ok(mut guard) = self.stream.try_lock() {
                    *guard = None;
                }
                Err(ActuatorError::Stopped)
            }
        }
    }

    async fn call_next_state(&self, payload: String) -> Result<NextStateResponse, ActuatorError> {
        let mut guard = self.stream.lock().await;
        let result = timeout(
            self.call_timeout,
            Self::open_and_exchange(&mut guard, &self.stream_url, payload),
        )
        .await;
        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                // reopen on the next call
                *guard = None;
                Err(e)
            }
            Err(_) => {
                warn!(
                    "NextState of plugin {} timed out after {:?}",
                    self.info.name, self.call_timeout
                );
                // a late answer would desynchronize the stream
                *guard = None;
                Err(ActuatorError::Timeout(self.call_timeout))
            }
        }
    }

    async fn open_and_exchange(
        slot: &mut Option<NextStateStream>,
        url: &str,
        payload: String,
    ) -> Result<NextStateResponse, ActuatorError> {
        if slot.is_none() {
            let (stream, _) = connect_async(url).await?;
            *slot = Some(stream);
        }
        let Some(stream) = slot.as_mut() else {
            return Err(ActuatorError::StreamClosed);
        };
        Self::exchange(stream, payload).await
    }

    async fn exchange(
        stream: &mut NextStateStream,
        payload: String,
    ) -> Result<NextStateResponse, ActuatorError> {
        stream.send(Message::Text(payload)).await?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Binary(data))) => return Ok(serde_json::from_slice(&data)?),
                Some(Ok(Message::Close(_))) | None => return Err(ActuatorError::StreamClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn post<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<(), ActuatorError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .timeout(self.call_timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ActuatorError::Remote {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for ActuatorClientStub {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn group(&self) -> &str {
        &self.info.group
    }

    async fn next_state(
        &self,
        state: &State,
        goal: &State,
        profiles: &Profiles,
    ) -> Result<Vec<Candidate>, ActuatorError> {
        debug!(
            "Invoking NextState for actuator client name: {} endpoint: {}",
            self.info.name, self.info.endpoint
        );
        let payload = serde_json::to_string(&NextStateRequest {
            state: state.clone(),
            goal: goal.clone(),
            profiles: profiles.clone(),
        })?;
        let response = self.unless_stopped(self.call_next_state(payload)).await?;
        Ok(response.into_candidates(&self.info.name))
    }

    async fn perform(&self, state: &State, plan: &[Action]) -> Result<(), ActuatorError> {
        debug!(
            "Invoking Perform for actuator client name: {} endpoint: {}",
            self.info.name, self.info.endpoint
        );
        let request = PerformRequest {
            state: state.clone(),
            plan: plan.to_vec(),
        };
        self.unless_stopped(self.post(PERFORM_PATH, &request)).await
    }

    async fn effect(&self, state: &State, profiles: &Profiles) -> Result<(), ActuatorError> {
        debug!(
            "Invoking Effect for actuator client name: {} endpoint: {}",
            self.info.name, self.info.endpoint
        );
        let request = EffectRequest {
            state: state.clone(),
            profiles: profiles.clone(),
        };
        self.unless_stopped(self.post(EFFECT_PATH, &request)).await
    }
}
