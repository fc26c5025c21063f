// src/dag/mod.rs

//! Container dependency graph for a single task.
//!
//! - [`graph`] resolves the containers a task needs, validates that their
//!   dependencies are acyclic, and exposes direct edges in both directions.
//! - [`task_order`] resolves which tasks run, prerequisites first.

pub mod graph;
pub mod task_order;

pub use graph::{DependencyGraph, DependencyGraphNode};
pub use task_order::resolve_execution_order;
