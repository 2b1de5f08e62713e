//! A* planner
//!
//! Builds a state graph breadth-first by asking every actuator for follow-up
//! states, links states that already satisfy the goal to it and searches the
//! cheapest path. When the start state is already good enough a shortcut
//! through an intermediate copy of the start is offered, and when nothing
//! reaches the goal the states closest to it can be wired to it
//! opportunistically.

use super::priority_queue::PriorityQueue;
use super::search::{h, h_empty, solve};
use super::state_graph::{NodeId, StateGraph};
use crate::config::AStarConfig;
use crate::planner::actuators::Actuator;
use crate::planner::{is_synthetic_action, Planner, EMPTY_ACTION_NAME, OPPORTUNISTIC_ACTION_NAME};
use crate::plugins::{PluginError, PluginRegistry, RegistryConfig};
use crate::types::{Action, Profiles, State};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;

/// Inflation of the shortcut cost once the explored graph already changed
/// pods or resources, making the shortcut slightly less attractive.
pub const SHORTCUT_PENALTY: f64 = 1.01;

/// Target key of the intermediate node on the shortcut path.
pub const INTERMEDIATE_TARGET_KEY: &str = "intermediate";

/// Result of graph synthesis.
#[derive(Debug, Clone)]
pub struct SynthesizedGraph {
    pub graph: StateGraph<State>,
    pub start: NodeId,
    pub goal: NodeId,
    /// Whether any path to the goal exists.
    pub has_goal: bool,
}

/// Planner using the A* algorithm.
pub struct APlanner {
    cfg: AStarConfig,
    registry: Arc<PluginRegistry>,
}

impl APlanner {
    /// Create a planner over `actuators` and start its plugin registry.
    pub async fn start(actuators: Vec<Arc<dyn Actuator>>, cfg: AStarConfig) -> Result<Self, PluginError> {
        let registry = PluginRegistry::new(actuators, RegistryConfig::from(&cfg));
        registry.start().await?;
        Ok(Self { cfg, registry })
    }

    /// Create a planner over an existing registry. The registry is not
    /// started.
    pub fn with_registry(cfg: AStarConfig, registry: Arc<PluginRegistry>) -> Self {
        Self { cfg, registry }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AStarConfig {
        &self.cfg
    }

    /// Build the state graph between `start` and `goal`.
    pub async fn generate_state_graph(
        &self,
        start: &State,
        goal: &State,
        profiles: &Profiles,
    ) -> SynthesizedGraph {
        let actuators = self.registry.actuators().await;
        let max_states = self.cfg.max_states;

        let mut sg = StateGraph::new();
        let start_id = sg.add_node(start.clone());
        let goal_id = sg.add_node(goal.clone());
        let mut queue = VecDeque::from([start_id]);
        let mut has_goal = false;

        'expansion: while sg.node_count() < max_states {
            let Some(current) = queue.pop_front() else {
                break;
            };
            let Some(current_state) = sg.node(current).cloned() else {
                continue;
            };
            for actuator in &actuators {
                let candidates = match actuator.next_state(&current_state, goal, profiles).await {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        warn!("Actuator {} contributed no states: {}", actuator.name(), e);
                        continue;
                    }
                };
                for candidate in candidates.into_iter().take(self.cfg.max_candidates) {
                    let reaches_goal = candidate.state.is_better(goal, profiles);
                    let (node, found) = match sg.lookup_by_value(&candidate.state) {
                        Some(node) => (node, true),
                        None if sg.node_count() >= max_states => continue,
                        None => {
                            let node = sg.add_node(candidate.state);
                            queue.push_back(node);
                            (node, false)
                        }
                    };
                    sg.add_edge(current, node, candidate.utility, candidate.action);
                    if reaches_goal && !found {
                        sg.add_edge(node, goal_id, 0.0, Action::new(EMPTY_ACTION_NAME));
                        has_goal = true;
                    }
                }
                if sg.node_count() >= max_states {
                    break 'expansion;
                }
            }
        }

        if start.is_better(goal, profiles) && sg.edge_count() > 0 {
            has_goal |= add_shortcut(&mut sg, start, start_id, goal_id, profiles);
        }

        SynthesizedGraph {
            graph: sg,
            start: start_id,
            goal: goal_id,
            has_goal,
        }
    }

    /// Wire the states closest to the goal directly to it.
    fn add_opportunistic_edges(
        &self,
        sg: &mut StateGraph<State>,
        start: NodeId,
        goal: NodeId,
        profiles: &Profiles,
    ) {
        let mut min_distances = PriorityQueue::new();
        if let Some(goal_state) = sg.node(goal) {
            for (id, state) in sg.nodes().iter().enumerate() {
                if id == start || id == goal {
                    continue;
                }
                min_distances.push(id, state.distance(goal_state, profiles));
            }
        }
        for _ in 0..self.cfg.opportunistic_candidates {
            let Some(item) = min_distances.pop() else {
                break;
            };
            sg.add_edge(item.value, goal, 0.0, Action::new(OPPORTUNISTIC_ACTION_NAME));
        }
    }
}

/// Offer a path start -> intermediate -> goal whose cost is the hop count of
/// the shortest real path. Returns whether it was added.
fn add_shortcut(
    sg: &mut StateGraph<State>,
    start: &State,
    start_id: NodeId,
    goal_id: NodeId,
    profiles: &Profiles,
) -> bool {
    let Some((path, _)) = solve(sg, start_id, goal_id, h_empty::<State>, false, profiles) else {
        return false;
    };
    let Some(hops) = path.len().checked_sub(2) else {
        return false;
    };
    let mut cost = hops as f64;
    if let Some(last) = sg.node(path[path.len() - 2]) {
        if start.current_pods.len() > last.current_pods.len() || last.less_resources(start) {
            cost *= SHORTCUT_PENALTY;
        }
    }
    let mut intermediate = start.clone();
    intermediate.intent.target_key = INTERMEDIATE_TARGET_KEY.to_string();
    let intermediate_id = sg.add_node(intermediate);
    sg.add_edge(start_id, intermediate_id, cost, Action::new(EMPTY_ACTION_NAME));
    sg.add_edge(intermediate_id, goal_id, 0.0, Action::new(EMPTY_ACTION_NAME));
    true
}

#[async_trait]
impl Planner for APlanner {
    async fn create_plan(&self, current: &State, desired: &State, profiles: &Profiles) -> Vec<Action> {
        debug!(
            "Trying to create a plan to get from {:?} to {:?}.",
            current.intent.objectives, desired.intent.objectives
        );
        let SynthesizedGraph {
            mut graph,
            start,
            goal,
            has_goal,
        } = self.generate_state_graph(current, desired, profiles).await;
        debug!("State graph has {} nodes.", graph.node_count());

        let solution = if has_goal {
            solve(&graph, start, goal, h, true, profiles)
        } else {
            warn!("No path to goal state possible!");
            if self.cfg.opportunistic_candidates > 0 {
                info!(
                    "Opportunistic planning is enabled - will add {} states with closest distance to the desired state to the state graph.",
                    self.cfg.opportunistic_candidates
                );
                self.add_opportunistic_edges(&mut graph, start, goal, profiles);
                solve(&graph, start, goal, h, true, profiles)
            } else {
                None
            }
        };

        let plan: Vec<Action> = solution
            .map(|(_, actions)| actions)
            .unwrap_or_default()
            .into_iter()
            .filter(|action| !is_synthetic_action(action))
            .collect();
        debug!(
            "A* planner found: {:?}.",
            plan.iter().map(|a| a.name.as_str()).collect::<Vec<_>>()
        );
        plan
    }

    async fn execute_plan(&self, state: &State, plan: &[Action]) {
        debug!("Execute plan called.");
        for actuator in self.registry.actuators().await {
            if let Err(e) = actuator.perform(state, plan).await {
                warn!("Actuator {} failed to perform the plan: {}", actuator.name(), e);
            }
        }
    }

    async fn trigger_effect(&self, current: &State, profiles: &Profiles) {
        debug!("Trigger effect re-calculation on all actuators.");
        let actuators = self.registry.actuators().await;
        let calls = actuators.iter().map(|actuator| async move {
            if let Err(e) = actuator.effect(current, profiles).await {
                warn!("Actuator {} failed to recalculate its effect: {}", actuator.name(), e);
            }
        });
        futures::future::join_all(calls).await;
    }

    async fn stop(&self) {
        self.registry.stop().await;
    }
}
