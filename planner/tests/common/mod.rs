//! Test actuators and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use intent_planner::config::AStarConfig;
use intent_planner::planner::astar::APlanner;
use intent_planner::plugins::{ActuatorPluginStub, PluginRegistry, PluginStubConfig, RegistryConfig};
use intent_planner::types::{Intent, PodState, Profile, ProfileType};
use intent_planner::{Action, Actuator, ActuatorError, Candidate, Profiles, State};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collects the events fired by test actuators.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

fn predicted_p99(pods: usize) -> f64 {
    match pods {
        2 => 90.0,
        3 => 40.0,
        4 => 30.0,
        _ => 120.0,
    }
}

fn record_effects(recorder: &Recorder, state: &State, name: &str) {
    for objective in state.intent.objectives.keys() {
        recorder.record(format!("{}_{}", objective, name));
    }
}

/// Scales out by adding `dummy_` pods up to a replica count derived from the
/// goal latency.
pub struct ScaleAction {
    pub recorder: Recorder,
}

#[async_trait]
impl Actuator for ScaleAction {
    fn name(&self) -> &str {
        "set_replicas"
    }

    fn group(&self) -> &str {
        "scaling"
    }

    async fn next_state(
        &self,
        state: &State,
        goal: &State,
        _profiles: &Profiles,
    ) -> Result<Vec<Candidate>, ActuatorError> {
        let target = goal.intent.objectives.get("p99latency").copied().unwrap_or(0.0);
        let replicas = if target <= 50.0 {
            3
        } else if target <= 100.0 {
            2
        } else {
            1
        };
        if state.current_pods.len() >= replicas {
            return Ok(vec![]);
        }

        let mut next = state.clone();
        let mut j = state
            .current_pods
            .keys()
            .filter(|k| k.contains("dummy_"))
            .count();
        for _ in state.current_pods.len()..replicas {
            next.current_pods.insert(
                format!("dummy_{}", j),
                PodState {
                    availability: 1.0,
                    state: "Running".to_string(),
                    ..Default::default()
                },
            );
            j += 1;
        }
        next.intent
            .objectives
            .insert("p99latency".to_string(), predicted_p99(replicas));
        Ok(vec![Candidate::new(
            next,
            1.0,
            Action::with_int_properties(self.name(), [("replicas", replicas as i64)]),
        )])
    }

    async fn perform(&self, _state: &State, plan: &[Action]) -> Result<(), ActuatorError> {
        if plan.iter().any(|a| a.name == self.name()) {
            self.recorder.record(self.name());
        }
        Ok(())
    }

    async fn effect(&self, state: &State, _profiles: &Profiles) -> Result<(), ActuatorError> {
        record_effects(&self.recorder, state, self.name());
        Ok(())
    }
}

/// Removes one non-dummy pod at a time; utility is the removed pod's
/// availability.
pub struct RmAction {
    pub recorder: Recorder,
}

#[async_trait]
impl Actuator for RmAction {
    fn name(&self) -> &str {
        "rm_pod"
    }

    fn group(&self) -> &str {
        "scaling"
    }

    async fn next_state(
        &self,
        state: &State,
        _goal: &State,
        _profiles: &Profiles,
    ) -> Result<Vec<Candidate>, ActuatorError> {
        let mut candidates = Vec::new();
        for (pod, pod_state) in &state.current_pods {
            if pod.contains("dummy_") {
                continue;
            }
            let mut next = state.clone();
            next.current_pods.remove(pod);
            let remaining = next.current_pods.len();
            if remaining < 1 {
                break;
            }
            next.intent
                .objectives
                .insert("p99latency".to_string(), predicted_p99(remaining));
            candidates.push(Candidate::new(
                next,
                pod_state.availability,
                Action::with_str_properties(self.name(), [("pod", pod.as_str())]),
            ));
        }
        Ok(candidates)
    }

    async fn perform(&self, _state: &State, plan: &[Action]) -> Result<(), ActuatorError> {
        if plan.iter().any(|a| a.name == self.name()) {
            self.recorder.record(self.name());
        }
        Ok(())
    }

    async fn effect(&self, state: &State, _profiles: &Profiles) -> Result<(), ActuatorError> {
        record_effects(&self.recorder, state, self.name());
        Ok(())
    }
}

/// Proposes ten fresh states on every call and records each call.
pub struct FaultyAction {
    pub recorder: Recorder,
    serial: Mutex<u64>,
}

impl FaultyAction {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            serial: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Actuator for FaultyAction {
    fn name(&self) -> &str {
        "dawdle"
    }

    fn group(&self) -> &str {
        "faulty"
    }

    async fn next_state(
        &self,
        state: &State,
        _goal: &State,
        _profiles: &Profiles,
    ) -> Result<Vec<Candidate>, ActuatorError> {
        let mut candidates = Vec::with_capacity(10);
        for _ in 0..10 {
            let mut serial = self.serial.lock().unwrap();
            *serial += 1;
            let mut next = state.clone();
            next.current_pods
                .insert(format!("pod-{:016x}", *serial), PodState::default());
            candidates.push(Candidate::new(next, 0.0, Action::new(self.name())));
        }
        self.recorder.record(self.name());
        Ok(candidates)
    }

    async fn perform(&self, _state: &State, _plan: &[Action]) -> Result<(), ActuatorError> {
        Err(ActuatorError::Failed("perform is not supported".to_string()))
    }

    async fn effect(&self, _state: &State, _profiles: &Profiles) -> Result<(), ActuatorError> {
        Err(ActuatorError::Failed("effect is not supported".to_string()))
    }
}

/// Never answers NextState.
pub struct HangingAction;

#[async_trait]
impl Actuator for HangingAction {
    fn name(&self) -> &str {
        "stall"
    }

    fn group(&self) -> &str {
        "faulty"
    }

    async fn next_state(
        &self,
        _state: &State,
        _goal: &State,
        _profiles: &Profiles,
    ) -> Result<Vec<Candidate>, ActuatorError> {
        futures::future::pending().await
    }

    async fn perform(&self, _state: &State, _plan: &[Action]) -> Result<(), ActuatorError> {
        Ok(())
    }

    async fn effect(&self, _state: &State, _profiles: &Profiles) -> Result<(), ActuatorError> {
        Ok(())
    }
}

pub fn intent(key: &str, objectives: &[(&str, f64)]) -> Intent {
    Intent {
        key: key.to_string(),
        objectives: objectives
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<BTreeMap<_, _>>(),
        ..Default::default()
    }
}

/// Two pods at p99 150ms on my-deployment.
pub fn start_state() -> State {
    let mut intent = intent("test-my-objective", &[("p99latency", 150.0)]);
    intent.target_key = "my-deployment".to_string();
    intent.target_kind = "Deployment".to_string();
    State {
        intent,
        current_pods: BTreeMap::from([
            (
                "pod_0".to_string(),
                PodState {
                    availability: 0.7,
                    ..Default::default()
                },
            ),
            (
                "pod_1".to_string(),
                PodState {
                    availability: 1.0,
                    ..Default::default()
                },
            ),
        ]),
        current_data: BTreeMap::from([(
            "cpu_value".to_string(),
            BTreeMap::from([("host0".to_string(), 20.0)]),
        )]),
        ..Default::default()
    }
}

pub fn goal_state(p99: f64) -> State {
    State {
        intent: intent("goal", &[("p99latency", p99)]),
        ..Default::default()
    }
}

pub fn latency_profiles(key: &str) -> Profiles {
    Profiles::from([(key.to_string(), Profile::new(key, ProfileType::from_text("latency")))])
}

pub fn astar_config(opportunistic_candidates: usize) -> AStarConfig {
    AStarConfig {
        max_candidates: 10,
        max_states: 1000,
        opportunistic_candidates,
        ..Default::default()
    }
}

/// Registry on a free loopback port with short timings.
pub fn registry_config(retries: u32) -> RegistryConfig {
    RegistryConfig {
        endpoint: "127.0.0.1".to_string(),
        port: 0,
        retries,
        reconcile_period: Duration::from_secs(3600),
        dial_backoff: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(500),
        ready_poll_interval: Duration::from_millis(50),
        ready_timeout: Duration::from_secs(5),
        call_timeout: Duration::from_secs(2),
    }
}

pub async fn start_registry(actuators: Vec<Arc<dyn Actuator>>, retries: u32) -> Arc<PluginRegistry> {
    let registry = PluginRegistry::new(actuators, registry_config(retries));
    registry.start().await.unwrap();
    registry
}

pub fn stub_config(name: &str, registry: &PluginRegistry) -> PluginStubConfig {
    let manager_port = registry.local_addr().map(|addr| addr.port()).unwrap_or(0);
    let mut config = PluginStubConfig::new(name, "127.0.0.1", 0, "127.0.0.1", manager_port);
    config.retries = 2;
    config.retry_backoff = Duration::from_millis(50);
    config.probe_timeout = Duration::from_millis(500);
    config.ready_poll_interval = Duration::from_millis(50);
    config.ready_timeout = Duration::from_secs(5);
    config
}

/// Serve `actuator` as plugin `name` and register it with `registry`.
pub async fn create_plugin(
    name: &str,
    actuator: Arc<dyn Actuator>,
    registry: &PluginRegistry,
) -> ActuatorPluginStub {
    let stub = ActuatorPluginStub::new(stub_config(name, registry), actuator);
    stub.start().await.unwrap();
    stub.register().await.unwrap();
    stub
}

/// Planner without local actuators whose registry serves on a free port.
pub async fn remote_planner(cfg: AStarConfig, retries: u32) -> APlanner {
    APlanner::with_registry(cfg, start_registry(vec![], retries).await)
}

pub fn local_planner(cfg: AStarConfig, recorder: &Recorder) -> APlanner {
    let actuators: Vec<Arc<dyn Actuator>> = vec![
        Arc::new(ScaleAction {
            recorder: recorder.clone(),
        }),
        Arc::new(RmAction {
            recorder: recorder.clone(),
        }),
    ];
    APlanner::with_registry(cfg, PluginRegistry::new(actuators, registry_config(3)))
}

/// Planner backed by `set_replicas` and `rm_pod` plugins.
pub async fn plugin_planner(cfg: AStarConfig, recorder: &Recorder) -> (APlanner, Vec<ActuatorPluginStub>) {
    let planner = remote_planner(cfg, 3).await;
    let scale = create_plugin(
        "scale_out",
        Arc::new(ScaleAction {
            recorder: recorder.clone(),
        }),
        planner.registry(),
    )
    .await;
    let rm = create_plugin(
        "rm_pod",
        Arc::new(RmAction {
            recorder: recorder.clone(),
        }),
        planner.registry(),
    )
    .await;
    (planner, vec![scale, rm])
}
