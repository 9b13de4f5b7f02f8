//! Per-question answering graph:
//! `classify -> {retrieve -> solve_with_context | solve_without_context} -> parse -> {end | recover -> end}`.

pub mod classifier;
pub mod graph;
pub mod parser;
pub mod prompts;
pub mod recovery;
pub mod retrieve;
pub mod solver;
pub mod state;

pub use graph::{Workflow, WorkflowOutcome};

#[cfg(test)]
mod tests;
