//! A*-style search over a [`StateGraph`].

use super::priority_queue::PriorityQueue;
use super::state_graph::{NodeId, StateGraph};
use crate::types::{Action, Profiles, State};
use log::warn;

/// Bookkeeping for a visited node: how it was reached.
#[derive(Debug, Clone)]
pub(crate) struct DataEntry {
    pub predecessor: NodeId,
    pub action: Action,
    /// Marks the start node, which has no predecessor.
    pub done: bool,
}

impl DataEntry {
    fn root() -> Self {
        Self {
            predecessor: 0,
            action: Action::default(),
            done: true,
        }
    }
}

/// Walk the predecessor chain from `current` back to the root.
pub(crate) fn resolve_path(
    data: &[Option<DataEntry>],
    current: NodeId,
) -> (Vec<NodeId>, Vec<Action>) {
    let mut path = vec![current];
    let mut actions = Vec::new();
    let mut cursor = current;
    while let Some(Some(entry)) = data.get(cursor) {
        if entry.done {
            break;
        }
        path.push(entry.predecessor);
        actions.push(entry.action.clone());
        cursor = entry.predecessor;
    }
    path.reverse();
    actions.reverse();
    (path, actions)
}

/// Find the cheapest path from `start` to `goal`.
///
/// `h` estimates the remaining cost from a node to the goal. With
/// `use_utility` each edge costs its utility; otherwise every hop costs 1.
/// Returns `None` when the goal is unreachable.
pub fn solve<T, H>(
    sg: &StateGraph<T>,
    start: NodeId,
    goal: NodeId,
    h: H,
    use_utility: bool,
    profiles: &Profiles,
) -> Option<(Vec<NodeId>, Vec<Action>)>
where
    H: Fn(&T, &T, &Profiles) -> f64,
{
    let goal_value = sg.node(goal)?;
    sg.node(start)?;

    let mut open = PriorityQueue::new();
    open.push(start, 0.0);
    let mut g_score: Vec<Option<f64>> = vec![None; sg.node_count()];
    let mut data: Vec<Option<DataEntry>> = vec![None; sg.node_count()];
    g_score[start] = Some(0.0);
    data[start] = Some(DataEntry::root());

    while let Some(item) = open.pop() {
        let current = item.value;
        if current == goal {
            return Some(resolve_path(&data, current));
        }
        let current_score = g_score[current].unwrap_or(0.0);
        for edge in sg.successors(current) {
            let tentative = if use_utility {
                current_score + edge.utility
            } else {
                current_score + 1.0
            };
            let improves = match g_score[edge.target] {
                Some(known) => tentative < known,
                None => true,
            };
            if improves {
                let Some(target_value) = sg.node(edge.target) else {
                    continue;
                };
                g_score[edge.target] = Some(tentative);
                let priority = tentative + h(target_value, goal_value, profiles);
                open.push(edge.target, priority);
                data[edge.target] = Some(DataEntry {
                    predecessor: current,
                    action: edge.action.clone(),
                    done: false,
                });
            }
        }
    }
    warn!("Could not find path from node {} to node {}", start, goal);
    None
}

/// Zero heuristic; turns the search into uniform-cost search.
pub fn h_empty<T>(_one: &T, _goal: &T, _profiles: &Profiles) -> f64 {
    0.0
}

/// Distance between the objective vectors of two states.
pub fn h(one: &State, goal: &State, profiles: &Profiles) -> f64 {
    one.distance(goal, profiles)
}
