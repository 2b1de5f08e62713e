//! Recording of planning events and lookup of actuator effects.

use crate::types::{Action, State};
use log::info;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("No effect recorded for {name} ({group}) and profile {profile}")]
    NotFound {
        name: String,
        group: String,
        profile: String,
    },

    #[error("Effect document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Tracer backend unavailable: {0}")]
    Unavailable(String),
}

/// Sink for planning events and source of actuator effect data.
pub trait Tracer: Send + Sync {
    /// Record one planning round.
    fn trace_event(&self, current: &State, desired: &State, plan: &[Action]);

    /// Latest effect document of actuator `name` in `group` for the profile
    /// `profile`, not older than `look_back_minutes`.
    fn get_effect(
        &self,
        name: &str,
        group: &str,
        profile: &str,
        look_back_minutes: u32,
    ) -> Result<serde_json::Value, TracerError>;
}

/// Fetch an effect and decode it into the caller's model type.
pub fn effect_as<T: DeserializeOwned>(
    tracer: &dyn Tracer,
    name: &str,
    group: &str,
    profile: &str,
    look_back_minutes: u32,
) -> Result<T, TracerError> {
    let document = tracer.get_effect(name, group, profile, look_back_minutes)?;
    Ok(serde_json::from_value(document)?)
}

type EffectKey = (String, String, String);

/// Tracer that writes events to the log and keeps effects in memory.
#[derive(Default)]
pub struct LogTracer {
    effects: Mutex<HashMap<EffectKey, serde_json::Value>>,
}

impl LogTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the effect document of an actuator for a profile.
    pub fn store_effect(&self, name: &str, group: &str, profile: &str, effect: serde_json::Value) {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((name.to_string(), group.to_string(), profile.to_string()), effect);
    }
}

impl Tracer for LogTracer {
    fn trace_event(&self, current: &State, desired: &State, plan: &[Action]) {
        let plan: Vec<&str> = plan.iter().map(|a| a.name.as_str()).collect();
        info!(
            "Planning event for {}: current {:?}, desired {:?}, plan {:?}",
            desired.intent.key, current.intent.objectives, desired.intent.objectives, plan
        );
    }

    fn get_effect(
        &self,
        name: &str,
        group: &str,
        profile: &str,
        _look_back_minutes: u32,
    ) -> Result<serde_json::Value, TracerError> {
        let key = (name.to_string(), group.to_string(), profile.to_string());
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or_else(|| TracerError::NotFound {
                name: name.to_string(),
                group: group.to_string(),
                profile: profile.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct ScalingEffect {
        popt: Vec<f64>,
        replicas_range: (i64, i64),
    }

    #[test]
    fn test_effect_lookup() {
        let tracer = LogTracer::new();
        tracer.store_effect(
            "default/my-deployment",
            "scaling",
            "default/p99",
            serde_json::json!({"popt": [1.0, 2.0, 3.0], "replicas_range": [1, 10]}),
        );

        let effect: ScalingEffect =
            effect_as(&tracer, "default/my-deployment", "scaling", "default/p99", 30).unwrap();
        assert_eq!(
            effect,
            ScalingEffect {
                popt: vec![1.0, 2.0, 3.0],
                replicas_range: (1, 10),
            }
        );

        let missing = tracer.get_effect("default/my-deployment", "vertical_scaling", "default/p99", 30);
        assert!(matches!(missing, Err(TracerError::NotFound { .. })));
    }

    #[test]
    fn test_effect_of_wrong_shape() {
        let tracer = LogTracer::new();
        tracer.store_effect("a", "b", "c", serde_json::json!({"popt": "nope"}));
        let effect = effect_as::<ScalingEffect>(&tracer, "a", "b", "c", 30);
        assert!(matches!(effect, Err(TracerError::Malformed(_))));
    }
}
