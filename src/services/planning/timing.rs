//! ETA simulation.
//!
//! Replays a visiting order through the matrix and places every stop on the
//! timeline: travel from the previous node, waiting for the window to open,
//! service, and lateness. Long idle gaps and period changes are turned into
//! synthetic depot round trips.
//!
//! Matrix layout: node 0 is the depot, stop `i` is node `i + 1`.

use chrono::{Duration, NaiveDateTime};

use crate::services::routing::DistanceTimeMatrices;
use crate::types::{Coordinates, OptimizedStop, RoutableStop, TimeWindow};

use super::config::PlanningConfig;

pub const DEPOT_NODE: usize = 0;

/// Matrix node of the stop with original index `stop_index`
pub fn matrix_node(stop_index: usize) -> usize {
    stop_index + 1
}

/// Simulated timeline of one visiting order
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub stops: Vec<OptimizedStop>,
    pub total_distance_meters: i64,
    pub total_duration_seconds: i64,
}

impl Simulation {
    pub fn empty() -> Self {
        Self {
            stops: vec![],
            total_distance_meters: 0,
            total_duration_seconds: 0,
        }
    }
}

/// Whether the driver should go back to the depot before serving the next stop.
///
/// `previous` is the window of the stop just served, `None` when the vehicle
/// is still at the depot (nothing to return from). A return is due when the
/// wait before `next` opens exceeds the threshold, or when both windows fall
/// in known periods and the periods differ.
pub fn needs_depot_return(
    config: &PlanningConfig,
    previous: Option<&TimeWindow>,
    next: &TimeWindow,
    wait_seconds: i64,
) -> bool {
    let Some(previous) = previous else {
        return false;
    };

    if wait_seconds > config.wait_threshold_minutes * 60 {
        return true;
    }

    match (
        config.periods.period_of(previous.start_hour()),
        config.periods.period_of(next.start_hour()),
    ) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}

/// Whole minutes past the window end, rounded up; 0 when on time
pub fn lateness_minutes(eta: NaiveDateTime, window: &TimeWindow) -> i64 {
    let late_seconds = (eta - window.end).num_seconds();
    if late_seconds <= 0 {
        0
    } else {
        (late_seconds + 59) / 60
    }
}

fn seconds(value: u64) -> i64 {
    value as i64
}

/// Simulate `order` (original stop indices) starting at the depot at `start`.
pub fn simulate(
    order: &[usize],
    stops: &[RoutableStop],
    depot: Coordinates,
    matrices: &DistanceTimeMatrices,
    start: NaiveDateTime,
    config: &PlanningConfig,
) -> Simulation {
    if order.is_empty() {
        return Simulation::empty();
    }

    let mut timeline: Vec<OptimizedStop> = Vec::with_capacity(order.len() + 2);
    let mut clock = start;
    let mut current = DEPOT_NODE;
    let mut previous_window: Option<TimeWindow> = None;
    let mut total_distance: i64 = 0;
    let mut total_duration: i64 = 0;

    for &index in order {
        let stop = &stops[index];
        let node = matrix_node(index);
        let window = stop.time_window;

        // No direct leg between two stops: route the hop through the depot
        let stranded = current != DEPOT_NODE && !matrices.is_reachable(current, node);
        let (mut travel, mut distance, mut wait) = if stranded {
            (0, 0, 0)
        } else {
            let travel = seconds(matrices.duration(current, node));
            let arrival = clock + Duration::seconds(travel);
            (
                travel,
                seconds(matrices.distance(current, node)),
                (window.start - arrival).num_seconds().max(0),
            )
        };

        if stranded || needs_depot_return(config, previous_window.as_ref(), &window, wait) {
            let back = seconds(matrices.duration(current, DEPOT_NODE));
            let back_distance = seconds(matrices.distance(current, DEPOT_NODE));
            let depot_eta = clock + Duration::seconds(back);
            timeline.push(OptimizedStop::depot_return(depot, depot_eta, back, back_distance));
            total_distance += back_distance;
            total_duration += back;

            // Leave the depot just in time; idle time there is not driver work
            travel = seconds(matrices.duration(DEPOT_NODE, node));
            distance = seconds(matrices.distance(DEPOT_NODE, node));
            clock = depot_eta;
            wait = 0;
        }

        let arrival = clock + Duration::seconds(travel);
        let eta = arrival.max(window.start);
        let service = stop.service_seconds();

        timeline.push(OptimizedStop {
            stop_id: Some(stop.id.clone()),
            label: stop.label.clone(),
            coordinates: stop.coordinates,
            time_window: Some(window),
            service_seconds: service,
            eta,
            arrival_delay_minutes: lateness_minutes(eta, &window),
            travel_seconds_from_prev: travel,
            distance_meters_from_prev: distance,
            wait_seconds_before_window: wait,
            is_depot_return: false,
        });

        total_distance += distance;
        total_duration += travel + wait + service;
        clock = eta + Duration::seconds(service);
        current = node;
        previous_window = Some(window);
    }

    if timeline.last().is_some_and(|s| !s.is_depot_return) {
        let back = seconds(matrices.duration(current, DEPOT_NODE));
        let back_distance = seconds(matrices.distance(current, DEPOT_NODE));
        timeline.push(OptimizedStop::depot_return(
            depot,
            clock + Duration::seconds(back),
            back,
            back_distance,
        ));
        total_distance += back_distance;
        total_duration += back;
    }

    Simulation {
        stops: timeline,
        total_distance_meters: total_distance,
        total_duration_seconds: total_duration,
    }
}
