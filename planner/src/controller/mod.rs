//! Reconciliation driver around a [`crate::Planner`].
//!
//! The [`IntentController`] keeps the known intents and profiles, hands every
//! intent without a recent plan to a pool of workers and lets them plan,
//! execute and trace. Observing the managed workload is left to a
//! [`StateSource`].

pub mod intent_controller;
pub mod tracer;
pub mod ttl_cache;

pub use intent_controller::IntentController;
pub use tracer::{LogTracer, Tracer, TracerError};
pub use ttl_cache::TtlCache;

use crate::types::{Intent, Profiles, State};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateSourceError {
    #[error("Target {0} not found")]
    NotFound(String),

    #[error("State source unavailable: {0}")]
    Unavailable(String),
}

/// Provides the observed state of an intent's target.
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn current_state(&self, intent: &Intent, profiles: &Profiles) -> Result<State, StateSourceError>;
}
