//! Actuator plugins
//!
//! Out-of-process actuators register with the [`PluginRegistry`] over HTTP.
//! The registry then reaches each plugin through an [`ActuatorClientStub`],
//! which implements [`crate::Actuator`] so the planner cannot tell it apart
//! from an in-process actuator. Plugin processes wrap their actuator in an
//! [`ActuatorPluginStub`] to serve it.

pub mod client_stub;
pub mod plugin_stub;
pub mod protocol;
pub mod registry;

pub use client_stub::ActuatorClientStub;
pub use plugin_stub::{ActuatorPluginStub, PluginStubConfig};
pub use protocol::{PluginInfo, PLUGIN_VERSION};
pub use registry::{PluginRegistry, RegistryConfig};

use log::{debug, warn};
use protocol::HEALTH_PATH;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed establishing a connection to endpoint {endpoint} after {retries} retries")]
    Unreachable { endpoint: String, retries: u32 },

    #[error("Server at {endpoint} did not become ready within {timeout:?}")]
    NotReady { endpoint: String, timeout: Duration },

    #[error("Both ports need to be in a valid range: {port} - {manager_port}")]
    InvalidPort { port: u16, manager_port: u16 },

    #[error("Server side registration error: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stub has been stopped")]
    Stopped,
}

/// `http://` base URL for a `host:port` endpoint.
pub(crate) fn base_url(endpoint: &str) -> String {
    format!("http://{}", endpoint)
}

/// Address to probe a listener on; wildcard binds are probed on loopback.
pub(crate) fn probe_addr(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        let loopback = match addr {
            SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        };
        SocketAddr::new(loopback, addr.port())
    } else {
        addr
    }
}

/// Resolves once `true` has been sent on the shutdown channel or the sender
/// is gone.
pub(crate) async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let stopped = *shutdown.borrow_and_update();
    if stopped {
        return;
    }
    while shutdown.changed().await.is_ok() {
        let stopped = *shutdown.borrow_and_update();
        if stopped {
            return;
        }
    }
}

/// True when `GET {base_url}/healthz` succeeds within `probe_timeout`.
pub async fn probe_ready(client: &reqwest::Client, base_url: &str, probe_timeout: Duration) -> bool {
    let url = format!("{}{}", base_url, HEALTH_PATH);
    match timeout(probe_timeout, client.get(&url).send()).await {
        Ok(Ok(response)) => response.status().is_success(),
        Ok(Err(e)) => {
            debug!("Health probe of {} failed: {}", url, e);
            false
        }
        Err(_) => {
            debug!("Health probe of {} timed out", url);
            false
        }
    }
}

/// Probe `base_url` until it is ready, retrying at most `max_retries` times
/// with a fixed `backoff` in between.
pub async fn dial(
    client: &reqwest::Client,
    base_url: &str,
    max_retries: u32,
    backoff: Duration,
    probe_timeout: Duration,
) -> Result<(), PluginError> {
    let mut retry_count = 0;
    loop {
        if probe_ready(client, base_url, probe_timeout).await {
            return Ok(());
        }
        retry_count += 1;
        if retry_count > max_retries {
            return Err(PluginError::Unreachable {
                endpoint: base_url.to_string(),
                retries: max_retries,
            });
        }
        warn!(
            "Cannot connect to {} (attempt {}/{}), retrying in {:?}",
            base_url, retry_count, max_retries, backoff
        );
        sleep(backoff).await;
    }
}

/// Poll a freshly started server every `interval` until it answers or
/// `deadline` has passed.
pub async fn poll_until_ready(
    client: &reqwest::Client,
    base_url: &str,
    interval: Duration,
    deadline: Duration,
) -> Result<(), PluginError> {
    let started = Instant::now();
    loop {
        if probe_ready(client, base_url, interval).await {
            return Ok(());
        }
        if started.elapsed() >= deadline {
            return Err(PluginError::NotReady {
                endpoint: base_url.to_string(),
                timeout: deadline,
            });
        }
        sleep(interval).await;
    }
}
