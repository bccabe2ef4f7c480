//! Route construction and timing engine
//!
//! Matrix → solver → timing simulator → route splitter, with an optional
//! live-traffic refinement pass and a time-slot batching mode.

mod batcher;
mod config;
mod error;
mod planner;
mod refine;
mod solver;
mod splitter;
mod timing;
mod traffic_solver;

pub use batcher::{merge_plans, partition_by_band, BandBatch};
pub use config::{
    DayPeriod, HourRange, OutOfBandPolicy, PeriodBoundaries, PlanningConfig, TimeSlotBand,
    LATENESS_PENALTY,
};
pub use error::PlanningError;
pub use planner::RoutePlanner;
pub use refine::{RefinedSequence, TrafficRefiner};
pub use solver::{GreedySolver, SolveInput, Solver};
pub use splitter::{round_up_cents, split_routes, summarize_leg};
pub use timing::{lateness_minutes, matrix_node, needs_depot_return, simulate, Simulation, DEPOT_NODE};
pub use traffic_solver::TrafficAwareSolver;
