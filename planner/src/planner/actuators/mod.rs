//! Actuator capability
//!
//! An actuator proposes follow-up states for one class of intervention,
//! performs the chosen actions and refreshes its model of their effect. The
//! planner only sees this trait, so an in-process actuator and a remote plugin
//! (see [`crate::plugins::ActuatorClientStub`]) are interchangeable.

use crate::types::{Action, Candidate, Profiles, State};
use async_trait::async_trait;
use thiserror::Error;

/// Errors an actuator call can surface to the planner. The planner logs them
/// and treats the actuator as having contributed nothing.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Plugin answered with status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Stream closed")]
    StreamClosed,

    #[error("Call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Actuator stopped")]
    Stopped,

    #[error("{0}")]
    Failed(String),
}

impl From<reqwest::Error> for ActuatorError {
    fn from(err: reqwest::Error) -> Self {
        ActuatorError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ActuatorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ActuatorError::Transport(err.to_string())
    }
}

/// Capability contract every actuator satisfies.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Stable identifier.
    fn name(&self) -> &str;

    /// Logical category, e.g. `scaling`.
    fn group(&self) -> &str;

    /// Propose follow-up states of `state` on the way to `goal`.
    async fn next_state(
        &self,
        state: &State,
        goal: &State,
        profiles: &Profiles,
    ) -> Result<Vec<Candidate>, ActuatorError>;

    /// Execute the actions of `plan` this actuator is responsible for.
    async fn perform(&self, state: &State, plan: &[Action]) -> Result<(), ActuatorError>;

    /// Recompute the observed effect of past actions.
    async fn effect(&self, state: &State, profiles: &Profiles) -> Result<(), ActuatorError>;
}
