//! Parallel GRASP + ALNS metaheuristic solver.
//!
//! Workers repeatedly build randomized initial solutions (GRASP) and
//! improve them with destroy/repair moves under a simulated-annealing
//! acceptance rule, publishing the best solution found and a timeline of
//! progress snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{Assignment, OptimizeResponse};

mod solution;
mod solver;

pub use solver::{solve, solve_with_callbacks};

/// Caller-facing solver knobs. Zero values mean "use the default".
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct HybridSolveOptions {
    /// Restart count across all workers (default 400).
    pub iterations: i64,
    /// Worker threads (default: hardware parallelism, capped at iterations).
    pub workers: i64,
    /// Retained timeline length (default: iterations).
    pub candidate_pool: i64,
    /// Restricted-candidate-list size for randomized choices (default 3).
    pub randomized_list_size: i64,
    /// Fraction of orders removed per destroy step (default 0.35).
    pub destroy_rate: f64,
    /// Local-search iterations per restart (default 50).
    pub local_search_iterations: i64,
    /// Minimum interval between periodic snapshots (default 250).
    pub emit_interval_millis: i64,
    /// Seed for the worker generators; 0 draws from the wallclock.
    pub random_seed: i64,
    /// Decorate analytics with road geometries at the boundary.
    pub use_real_routes: bool,
    /// Road-routing provider credential, pass-through only.
    pub api_key: String,
}

/// Options with defaults applied, as used inside the solver.
#[derive(Debug, Clone)]
pub(crate) struct NormalizedOptions {
    pub iterations: usize,
    pub workers: usize,
    pub candidate_pool: usize,
    pub rcl_size: usize,
    pub destroy_rate: f64,
    pub local_search: usize,
    pub emit_interval: Duration,
    pub random_seed: u64,
}

impl HybridSolveOptions {
    pub(crate) fn normalize(&self) -> NormalizedOptions {
        let iterations = if self.iterations <= 0 { 400 } else { self.iterations as usize };

        let mut workers = if self.workers <= 0 {
            num_cpus::get().max(1)
        } else {
            self.workers as usize
        };
        workers = workers.min(iterations).max(1);

        let candidate_pool = if self.candidate_pool <= 0 {
            iterations
        } else {
            self.candidate_pool as usize
        };

        let rcl_size = if self.randomized_list_size <= 0 {
            3
        } else {
            self.randomized_list_size as usize
        };

        let destroy_rate = if self.destroy_rate <= 0.0 { 0.35 } else { self.destroy_rate };

        let local_search = if self.local_search_iterations <= 0 {
            50
        } else {
            self.local_search_iterations as usize
        };

        let emit_interval = if self.emit_interval_millis <= 0 {
            Duration::from_millis(250)
        } else {
            Duration::from_millis(self.emit_interval_millis as u64)
        };

        let random_seed = if self.random_seed == 0 {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos() as u64)
                .unwrap_or(0x9e37_79b9_7f4a_7c15)
        } else {
            self.random_seed as u64
        };

        NormalizedOptions {
            iterations,
            workers,
            candidate_pool,
            rcl_size,
            destroy_rate,
            local_search,
            emit_interval,
            random_seed,
        }
    }
}

/// One intermediate solver snapshot. Appended to the shared timeline and
/// handed to the emit callback while the timeline lock is held, so
/// callbacks must return quickly and must not call back into the solver.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HybridProgress {
    pub timestamp: DateTime<Utc>,
    pub iteration: usize,
    pub worker_id: usize,
    pub best_distance: f64,
    pub candidate_distance: f64,
    pub accepted_improvement: bool,
    pub explored_solutions: i64,
    pub improvement_count: i64,
    pub temperature: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HybridSolverStats {
    #[serde(rename = "runtime")]
    pub runtime_ms: u64,
    pub iterations: usize,
    pub best_iteration: usize,
    pub workers: usize,
    pub explored_solutions: i64,
    pub accepted_improvements: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HybridSolveResponse {
    pub optimization: OptimizeResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics: Option<crate::analytics::AnalyticsResponse>,
    pub stats: HybridSolverStats,
    pub timeline: Vec<HybridProgress>,
}

impl HybridSolveResponse {
    /// All route assignments of the winning solution.
    pub fn assignments(&self) -> &[Assignment] {
        &self.optimization.assignments
    }
}
