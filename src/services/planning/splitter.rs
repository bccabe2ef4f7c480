//! Cuts a simulated day into depot-to-depot legs.

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::types::{OptimizedStop, Route};

/// Round a money amount up to whole cents
pub fn round_up_cents(amount: f64) -> f64 {
    if amount <= 0.0 {
        return 0.0;
    }
    // Epsilon keeps exact cent values like 12.5 * 100 from rounding up a cent
    ((amount * 100.0 - 1e-9).ceil()) / 100.0
}

/// Aggregate one leg. `start_time` is when the driver is available at the
/// depot to begin it.
pub fn summarize_leg(stops: Vec<OptimizedStop>, start_time: NaiveDateTime, hourly_rate: f64) -> Route {
    let duration_seconds: i64 = stops.iter().map(OptimizedStop::busy_seconds).sum();
    let distance_meters: i64 = stops.iter().map(|s| s.distance_meters_from_prev).sum();
    let end_time = stops.last().map(OptimizedStop::departure).unwrap_or(start_time);

    let cost = round_up_cents(duration_seconds as f64 / 3600.0 * hourly_rate);
    let drops = stops.iter().filter(|s| !s.is_depot_return).count();
    let average_cost_per_drop = if drops == 0 {
        0.0
    } else {
        round_up_cents(cost / drops as f64)
    };

    Route {
        id: Uuid::new_v4(),
        start_time,
        end_time,
        stops,
        duration_seconds,
        distance_meters,
        cost,
        average_cost_per_drop,
    }
}

/// Partition a simulated sequence at every depot return (inclusive).
///
/// Trailing stops without a closing depot return still form a final leg.
/// Legs are back to back: each starts when the previous one ended.
pub fn split_routes(stops: &[OptimizedStop], start_time: NaiveDateTime, hourly_rate: f64) -> Vec<Route> {
    let mut routes = Vec::new();
    let mut leg_start = start_time;
    let mut current: Vec<OptimizedStop> = Vec::new();

    for stop in stops {
        current.push(stop.clone());
        if stop.is_depot_return {
            let route = summarize_leg(std::mem::take(&mut current), leg_start, hourly_rate);
            leg_start = route.end_time;
            routes.push(route);
        }
    }

    if !current.is_empty() {
        routes.push(summarize_leg(current, leg_start, hourly_rate));
    }

    routes
}
