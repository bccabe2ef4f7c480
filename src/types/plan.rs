//! Plan types

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Coordinates, OptimizedStop, Stop};

/// One depot-to-depot leg of a planned day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: Uuid,
    /// Moment the driver is available at the depot to begin this leg
    pub start_time: NaiveDateTime,
    /// Departure from the last entry of the leg (the depot arrival, normally)
    pub end_time: NaiveDateTime,
    pub stops: Vec<OptimizedStop>,
    pub duration_seconds: i64,
    pub distance_meters: i64,
    pub cost: f64,
    pub average_cost_per_drop: f64,
}

impl Route {
    /// Number of real (non depot-return) stops in this leg
    pub fn drop_count(&self) -> usize {
        self.stops.iter().filter(|s| !s.is_depot_return).count()
    }
}

/// Which solver orders the stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SolverKind {
    #[default]
    Greedy,
    TrafficAware,
}

impl SolverKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            SolverKind::Greedy => "greedy",
            SolverKind::TrafficAware => "traffic_aware",
        }
    }
}

/// How stops are grouped before solving
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanningMode {
    /// One solver run over all stops
    #[default]
    Single,
    /// Independent runs per fixed daily band
    TimeSlots,
}

/// Kind of a plan warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningKind {
    GeocodingFailed,
    ApproximateLocation,
    OutOfBand,
    TimeWindowMissed,
    Unreachable,
    TrafficRefinementFailed,
}

/// Warning about a plan issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanWarning {
    pub stop_id: Option<String>,
    pub warning_type: WarningKind,
    pub message: String,
}

impl PlanWarning {
    pub fn new(warning_type: WarningKind, stop_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            stop_id: stop_id.map(str::to_string),
            warning_type,
            message: message.into(),
        }
    }
}

/// Request to plan one vehicle's day
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub depot: Coordinates,
    pub stops: Vec<Stop>,
    /// Departure from the depot; derived from the earliest window when absent
    #[serde(default)]
    pub driver_start: Option<NaiveDateTime>,
    #[serde(default)]
    pub mode: PlanningMode,
    #[serde(default)]
    pub solver: SolverKind,
    #[serde(default)]
    pub avoid_rush_hour: bool,
    #[serde(default)]
    pub refine_with_traffic: bool,
}

/// Planned day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub stops: Vec<OptimizedStop>,
    pub routes: Vec<Route>,
    pub total_distance_meters: i64,
    pub total_duration_seconds: i64,
    pub driver_start_time: Option<NaiveDateTime>,
    pub warnings: Vec<PlanWarning>,
    /// Solver that ordered the stops; absent for re-timed plans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solver: Option<SolverKind>,
}

impl Plan {
    pub fn empty() -> Self {
        Self {
            stops: vec![],
            routes: vec![],
            total_distance_meters: 0,
            total_duration_seconds: 0,
            driver_start_time: None,
            warnings: vec![],
            solver: None,
        }
    }
}

/// Plan re-timed against live traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinedPlan {
    #[serde(flatten)]
    pub plan: Plan,
    pub traffic_delay_seconds: i64,
}

/// Request to re-time an already ordered plan.
///
/// When `routes` is non-empty the legs are driven back to back; otherwise the
/// flat `stops` sequence is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineRequest {
    pub depot: Coordinates,
    pub driver_start: NaiveDateTime,
    #[serde(default)]
    pub stops: Vec<OptimizedStop>,
    #[serde(default)]
    pub routes: Vec<Route>,
}
