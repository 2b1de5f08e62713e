//! Wire shapes exchanged between the registry, plugins and client stubs.

use crate::types::{Action, Candidate, Profiles, State};
use log::warn;
use serde::{Deserialize, Serialize};

/// Protocol version; registration requires an exact match.
pub const PLUGIN_VERSION: &str = "v1alpha1";

pub const REGISTER_PATH: &str = "/v1alpha1/register";
pub const NEXT_STATE_PATH: &str = "/v1alpha1/next_state";
pub const PERFORM_PATH: &str = "/v1alpha1/perform";
pub const EFFECT_PATH: &str = "/v1alpha1/effect";
pub const HEALTH_PATH: &str = "/healthz";

/// Group reported by remote actuators that do not announce one.
pub const DEFAULT_PLUGIN_GROUP: &str = "plugin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    #[default]
    Actuator,
}

fn default_group() -> String {
    DEFAULT_PLUGIN_GROUP.to_string()
}

/// Identity of a plugin as announced at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Unique key of the plugin.
    pub name: String,
    /// `host:port` the plugin serves on.
    pub endpoint: String,
    pub supported_versions: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub plugin_type: PluginType,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            supported_versions: PLUGIN_VERSION.to_string(),
            group: default_group(),
            plugin_type: PluginType::Actuator,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub plugin_info: PluginInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationStatusResponse {
    pub plugin_registered: bool,
    #[serde(default)]
    pub error: String,
}

impl RegistrationStatusResponse {
    pub fn accepted() -> Self {
        Self {
            plugin_registered: true,
            error: String::new(),
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            plugin_registered: false,
            error: error.into(),
        }
    }
}

/// One request on the NextState stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextStateRequest {
    pub state: State,
    pub goal: State,
    #[serde(default)]
    pub profiles: Profiles,
}

/// Answer to a [`NextStateRequest`]: three parallel arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextStateResponse {
    #[serde(default)]
    pub states: Vec<State>,
    #[serde(default)]
    pub utilities: Vec<f64>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl NextStateResponse {
    pub fn from_candidates(candidates: Vec<Candidate>) -> Self {
        let mut response = Self {
            states: Vec::with_capacity(candidates.len()),
            utilities: Vec::with_capacity(candidates.len()),
            actions: Vec::with_capacity(candidates.len()),
        };
        for candidate in candidates {
            response.states.push(candidate.state);
            response.utilities.push(candidate.utility);
            response.actions.push(candidate.action);
        }
        response
    }

    /// Pair up the arrays again. Arrays of unequal length are cut to the
    /// shortest one.
    pub fn into_candidates(self, plugin: &str) -> Vec<Candidate> {
        let (n_states, n_utilities, n_actions) =
            (self.states.len(), self.utilities.len(), self.actions.len());
        if n_states != n_utilities || n_states != n_actions {
            warn!(
                "Plugin {} returned {} states, {} utilities and {} actions; using the first {}.",
                plugin,
                n_states,
                n_utilities,
                n_actions,
                n_states.min(n_utilities).min(n_actions)
            );
        }
        self.states
            .into_iter()
            .zip(self.utilities)
            .zip(self.actions)
            .map(|((state, utility), action)| Candidate::new(state, utility, action))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformRequest {
    pub state: State,
    #[serde(default)]
    pub plan: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectRequest {
    pub state: State,
    #[serde(default)]
    pub profiles: Profiles,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}
