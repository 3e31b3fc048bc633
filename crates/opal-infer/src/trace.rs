//! Tracing types for solver observability.
//!
//! These types capture step-by-step traces of constraint simplification and
//! search, so tools can inspect how a solution was found (or why none was).
//! All tracing is opt-in via `ConstraintSystem::enable_tracing()` — zero
//! overhead when disabled.

use serde::Serialize;

/// A single step in a solve trace.
#[derive(Debug, Clone, Serialize)]
pub struct SolveStep {
    pub step: usize,
    pub action: SolveAction,
    pub detail: String,
}

/// What action was taken during a solve step.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveAction {
    /// One constraint was taken off the worklist and simplified.
    Simplify,
    /// Two variable equivalence classes were unified.
    Merge,
    /// A variable was fixed to a concrete type.
    Assign,
    /// A disjunction alternative was entered.
    Disjunction,
    /// Solver state was checkpointed before attempting a binding.
    Checkpoint,
    /// Solver state was rolled back after an attempt.
    Restore,
    /// A complete solution was snapshotted.
    Solution,
    /// A constraint failed, poisoning the current branch.
    Failure,
}
