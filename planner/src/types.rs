//! Planning state model
//!
//! A [`State`] is a point in the workload's configuration/objective space. The
//! planner treats it as a value: actuators clone it and mutate the copy, and the
//! state graph deduplicates nodes by the explicit canonical equality defined here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Objective metadata keyed by objective name (e.g. `p99latency`).
pub type Profiles = BTreeMap<String, Profile>;

/// Kind of a KPI profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    #[default]
    Obsolete,
    Latency,
    Availability,
    Throughput,
    Power,
}

impl ProfileType {
    /// Parse a profile type from its textual form; unknown text maps to `Obsolete`.
    pub fn from_text(text: &str) -> Self {
        match text.to_lowercase().as_str() {
            "latency" => ProfileType::Latency,
            "availability" => ProfileType::Availability,
            "throughput" => ProfileType::Throughput,
            "power" => ProfileType::Power,
            _ => ProfileType::Obsolete,
        }
    }
}

/// Metadata describing one objective.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub key: String,
    pub profile_type: ProfileType,
    #[serde(default)]
    pub minimize: bool,
}

impl Profile {
    pub fn new(key: impl Into<String>, profile_type: ProfileType) -> Self {
        Self {
            key: key.into(),
            profile_type,
            minimize: false,
        }
    }

    /// Whether smaller values of this objective are better.
    pub fn is_minimized(&self) -> bool {
        self.minimize || matches!(self.profile_type, ProfileType::Latency | ProfileType::Power)
    }
}

/// An intent: the objectives a workload should meet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Intent {
    pub key: String,
    pub priority: f64,
    pub target_key: String,
    pub target_kind: String,
    #[serde(default)]
    pub objectives: BTreeMap<String, f64>,
}

/// Observed state of a single pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodState {
    pub availability: f64,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub qos_class: String,
}

/// State a set of pods can be in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    pub intent: Intent,
    #[serde(default)]
    pub current_pods: BTreeMap<String, PodState>,
    #[serde(default)]
    pub current_data: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    pub resources: BTreeMap<String, i64>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl State {
    /// Returns true if this state meets or beats `other` on every objective.
    ///
    /// Both states must define the same objective set; a missing objective makes
    /// them incomparable. Two empty objective sets are never better than each other.
    pub fn is_better(&self, other: &State, profiles: &Profiles) -> bool {
        let mine = &self.intent.objectives;
        let theirs = &other.intent.objectives;
        if mine.len() != theirs.len() {
            return false;
        }
        let mut res = false;
        for (key, value) in mine {
            let Some(target) = theirs.get(key) else {
                return false;
            };
            let minimized = profiles.get(key).map(Profile::is_minimized).unwrap_or(false);
            let favorable = if minimized {
                value <= target
            } else {
                value >= target
            };
            if !favorable {
                return false;
            }
            res = true;
        }
        res
    }

    /// Euclidean distance between the objective vectors of two states.
    ///
    /// When this state already dominates `other` the distance is inverted to
    /// `-1/d` so dominating states closer to the target rank first.
    pub fn distance(&self, other: &State, profiles: &Profiles) -> f64 {
        let squares_sum: f64 = self
            .intent
            .objectives
            .iter()
            .map(|(key, value)| {
                let target = other.intent.objectives.get(key).copied().unwrap_or(0.0);
                (value - target).powi(2)
            })
            .sum();
        if squares_sum != 0.0 && self.is_better(other, profiles) {
            return -1.0 / squares_sum.sqrt();
        }
        squares_sum.sqrt()
    }

    /// True if the summed resource footprint is smaller than `other`'s.
    pub fn less_resources(&self, other: &State) -> bool {
        let mine: i64 = self.resources.values().sum();
        let theirs: i64 = other.resources.values().sum();
        mine < theirs
    }

    /// Explicit structural equality over the canonical fields.
    ///
    /// Floats are compared bitwise so that the relation stays reflexive; the
    /// state graph relies on this to deduplicate nodes.
    pub fn canonical_eq(&self, other: &State) -> bool {
        intent_eq(&self.intent, &other.intent)
            && self.current_pods.len() == other.current_pods.len()
            && self
                .current_pods
                .iter()
                .zip(other.current_pods.iter())
                .all(|((ka, a), (kb, b))| ka == kb && pod_eq(a, b))
            && self.current_data.len() == other.current_data.len()
            && self
                .current_data
                .iter()
                .zip(other.current_data.iter())
                .all(|((ka, a), (kb, b))| ka == kb && float_map_eq(a, b))
            && self.resources == other.resources
            && self.annotations == other.annotations
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_eq(other)
    }
}

impl Eq for State {}

fn intent_eq(a: &Intent, b: &Intent) -> bool {
    a.key == b.key
        && a.priority.to_bits() == b.priority.to_bits()
        && a.target_key == b.target_key
        && a.target_kind == b.target_kind
        && float_map_eq(&a.objectives, &b.objectives)
}

fn pod_eq(a: &PodState, b: &PodState) -> bool {
    a.availability.to_bits() == b.availability.to_bits()
        && a.node_name == b.node_name
        && a.state == b.state
        && a.qos_class == b.qos_class
}

fn float_map_eq(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
}

/// Properties attached to an action. Only the actuator that emitted an action
/// interprets its properties.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ActionProperties {
    #[default]
    None,
    Str(BTreeMap<String, String>),
    Int(BTreeMap<String, i64>),
}

/// A named step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub properties: ActionProperties,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: ActionProperties::None,
        }
    }

    pub fn with_str_properties<I, K, V>(name: impl Into<String>, props: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            properties: ActionProperties::Str(
                props
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn with_int_properties<I, K>(name: impl Into<String>, props: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self {
            name: name.into(),
            properties: ActionProperties::Int(
                props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ),
        }
    }
}

/// One follow-up state proposed by an actuator, together with the cost of the
/// edge leading to it and the action that would get there.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub state: State,
    pub utility: f64,
    pub action: Action,
}

impl Candidate {
    pub fn new(state: State, utility: f64, action: Action) -> Self {
        Self {
            state,
            utility,
            action,
        }
    }
}
