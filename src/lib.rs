use serde::{Deserialize, Serialize};
use std::fmt;

pub mod analytics;
pub mod astar;
pub mod cache;
pub mod geo;
pub mod greedy;
pub mod hybrid;
pub mod logging;
pub mod routing;

pub use cache::DistanceCache;
pub use hybrid::{HybridProgress, HybridSolveOptions, HybridSolveResponse, HybridSolverStats};
pub use logging::{
    default_log_path, fingerprint_request, LogFormat, LoggerConfig, RunEvent, RunRecorder,
};

/// Assumed average driving speed for duration estimates, in km/h.
pub(crate) const AVERAGE_SPEED_KMPH: f64 = 40.0;

pub type CancelCallback = Box<dyn Fn() -> bool + Send + Sync>;
pub type EmitCallback = Box<dyn Fn(&HybridProgress) + Send + Sync>;

pub(crate) fn should_abort(cancel: Option<&CancelCallback>) -> bool {
    cancel.map(|cb| cb()).unwrap_or(false)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// --- Data Structures ---

/// A delivery order. Immutable for the duration of a solve.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub item_count: i64,
    pub delivery_window: String,
}

/// A courier with a start position and an order-count capacity.
/// A capacity of zero or less means the courier is uncapped.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Courier {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub capacity: i64,
}

/// One courier's optimized route: ordered order ids plus the route
/// distance in kilometers, rounded to two decimals.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(rename = "shopperId")]
    pub courier_id: String,
    pub route: Vec<String>,
    pub total_distance: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OptimizeRequest {
    pub orders: Vec<Order>,
    #[serde(rename = "shoppers")]
    pub couriers: Vec<Courier>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub assignments: Vec<Assignment>,
    pub total_distance_before: f64,
    pub total_distance_after: f64,
}

/// Which sequencing engine a caller asked for.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    #[serde(rename = "nearest-neighbor")]
    NearestNeighbor,
    #[serde(rename = "astar")]
    AStar,
    #[serde(rename = "hybrid")]
    Hybrid,
}

// --- Errors ---

#[derive(Debug)]
pub enum Error {
    /// Malformed or unusable request data. Not retryable.
    InvalidInput(String),
    /// The solver was interrupted; no partial result is exposed.
    Cancelled,
    /// Post-solve verification found a duplicated or missing order.
    InvariantBroken(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Error::Cancelled => write!(f, "solve cancelled"),
            Error::InvariantBroken(msg) => write!(f, "solution invariant broken: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
