//! Intent planner
//!
//! Closed-loop planner that searches for a sequence of actuator actions moving
//! a workload from its current state toward a desired set of objectives.
//! Actuators run either in-process or as remote plugins managed by the
//! [`plugins::PluginRegistry`].

pub mod config;
pub mod controller;
pub mod planner;
pub mod plugins;
pub mod types;

pub use config::{ConfigError, PlannerSettings};
pub use planner::actuators::{Actuator, ActuatorError};
pub use planner::astar::astar_planner::APlanner;
pub use planner::Planner;
pub use types::{Action, ActionProperties, Candidate, Intent, PodState, Profile, ProfileType, Profiles, State};
