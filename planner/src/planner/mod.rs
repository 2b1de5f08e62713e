//! Planning
//!
//! The [`Planner`] trait is what the controller drives each reconciliation
//! cycle. [`astar::astar_planner::APlanner`] is the only implementation.

pub mod actuators;
pub mod astar;

use crate::types::{Action, Profiles, State};
use async_trait::async_trait;

/// Name of the synthetic action linking a state to the goal.
pub const EMPTY_ACTION_NAME: &str = "done";

/// Name of the synthetic action used by opportunistic planning.
pub const OPPORTUNISTIC_ACTION_NAME: &str = "opportunistic";

/// True for the planner's own graph-closing actions, which are never executed.
pub fn is_synthetic_action(action: &Action) -> bool {
    action.name == EMPTY_ACTION_NAME || action.name == OPPORTUNISTIC_ACTION_NAME
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Find the actions that move `current` toward `desired`. An empty plan is
    /// a normal outcome.
    async fn create_plan(&self, current: &State, desired: &State, profiles: &Profiles)
        -> Vec<Action>;

    /// Hand `plan` to every actuator.
    async fn execute_plan(&self, state: &State, plan: &[Action]);

    /// Ask every actuator to refresh its effect model.
    async fn trigger_effect(&self, current: &State, profiles: &Profiles);

    /// Release background resources.
    async fn stop(&self);
}
