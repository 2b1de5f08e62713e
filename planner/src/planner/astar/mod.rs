//! A* planning: priority queue, state graph, search and the plan synthesizer.

pub mod astar_planner;
pub mod priority_queue;
pub mod search;
pub mod state_graph;

pub use astar_planner::APlanner;
pub use priority_queue::PriorityQueue;
pub use search::{h, h_empty, solve};
pub use state_graph::{Edge, NodeId, StateGraph};
