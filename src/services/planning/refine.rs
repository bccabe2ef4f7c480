//! Re-times an already ordered plan against live traffic.
//!
//! Every segment is queried from the directions service at the moment the
//! driver would actually depart, so the queries are strictly sequential. Any
//! failed segment fails the whole pass; static matrix values are never used
//! as a substitute.

use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::services::routing::{DirectionsService, SegmentEstimate};
use crate::types::{Coordinates, OptimizedStop, Route};

use super::error::{with_timeout, PlanningError};
use super::splitter::summarize_leg;
use super::timing::lateness_minutes;

/// One re-timed sequence
#[derive(Debug, Clone, PartialEq)]
pub struct RefinedSequence {
    pub stops: Vec<OptimizedStop>,
    pub traffic_delay_seconds: i64,
    pub total_distance_meters: i64,
    pub total_duration_seconds: i64,
}

/// Sequential segment walker shared by the flat and per-leg modes
pub struct TrafficRefiner<'a> {
    directions: &'a dyn DirectionsService,
    depot: Coordinates,
    call_timeout: StdDuration,
}

impl<'a> TrafficRefiner<'a> {
    pub fn new(directions: &'a dyn DirectionsService, depot: Coordinates, call_timeout: StdDuration) -> Self {
        Self {
            directions,
            depot,
            call_timeout,
        }
    }

    /// Re-time `stops` departing the depot at `start`.
    ///
    /// With `from_depot_visit` set, the first stop is treated like any stop
    /// after a depot return: the driver leaves no earlier than needed to reach
    /// its window. That departure is aimed with the live travel time, at most
    /// one extra query per stop; when traffic changes again between the two
    /// departures the stop can still show a small wait or arrive late. The
    /// very first leg of a day starts at the driver start.
    pub async fn refine_sequence(
        &self,
        stops: &[OptimizedStop],
        start: NaiveDateTime,
        from_depot_visit: bool,
    ) -> Result<RefinedSequence, PlanningError> {
        let mut refined = Vec::with_capacity(stops.len());
        let mut clock = start;
        let mut position = self.depot;
        let mut after_depot = from_depot_visit;
        let mut traffic_delay: i64 = 0;
        let mut total_distance: i64 = 0;
        let mut total_duration: i64 = 0;

        for stop in stops {
            if stop.is_depot_return {
                let segment = self.segment(position, self.depot, clock).await?;
                let travel = segment.traffic_seconds as i64;
                let eta = clock + Duration::seconds(travel);
                refined.push(OptimizedStop::depot_return(
                    self.depot,
                    eta,
                    travel,
                    segment.distance_meters as i64,
                ));
                traffic_delay += segment.traffic_delay_seconds() as i64;
                total_distance += segment.distance_meters as i64;
                total_duration += travel;
                clock = eta;
                position = self.depot;
                after_depot = true;
                continue;
            }

            // After a depot visit the driver leaves just in time for the window.
            // The first guess uses the planned travel time; if live traffic
            // disagrees the departure is moved once and the segment re-queried.
            let mut departure = clock;
            let mut timed_for = None;
            if after_depot {
                if let Some(window) = stop.time_window {
                    let leave_at = window.start - Duration::seconds(stop.travel_seconds_from_prev);
                    if leave_at > clock {
                        departure = leave_at;
                        timed_for = Some(window);
                    }
                }
            }

            let mut segment = self.segment(position, stop.coordinates, departure).await?;
            if let Some(window) = timed_for {
                let adjusted = clock.max(window.start - Duration::seconds(segment.traffic_seconds as i64));
                if adjusted != departure {
                    debug!(
                        "Live travel to {} differs from plan, leaving at {} instead of {}",
                        stop.label, adjusted, departure
                    );
                    departure = adjusted;
                    segment = self.segment(position, stop.coordinates, departure).await?;
                }
            }
            let travel = segment.traffic_seconds as i64;
            let arrival = departure + Duration::seconds(travel);
            let (eta, wait, delay) = match stop.time_window {
                Some(window) => {
                    let eta = arrival.max(window.start);
                    (eta, (eta - arrival).num_seconds(), lateness_minutes(eta, &window))
                }
                None => (arrival, 0, 0),
            };

            refined.push(OptimizedStop {
                eta,
                arrival_delay_minutes: delay,
                travel_seconds_from_prev: travel,
                distance_meters_from_prev: segment.distance_meters as i64,
                wait_seconds_before_window: wait,
                ..stop.clone()
            });

            traffic_delay += segment.traffic_delay_seconds() as i64;
            total_distance += segment.distance_meters as i64;
            total_duration += travel + wait + stop.service_seconds;
            clock = eta + Duration::seconds(stop.service_seconds);
            position = stop.coordinates;
            after_depot = false;
        }

        Ok(RefinedSequence {
            stops: refined,
            traffic_delay_seconds: traffic_delay,
            total_distance_meters: total_distance,
            total_duration_seconds: total_duration,
        })
    }

    /// Re-time legs driven back to back by one driver: leg k+1 starts when
    /// leg k ends.
    pub async fn refine_routes(
        &self,
        routes: &[Route],
        start: NaiveDateTime,
        hourly_rate: f64,
    ) -> Result<(Vec<Route>, i64), PlanningError> {
        let mut refined = Vec::with_capacity(routes.len());
        let mut leg_start = start;
        let mut traffic_delay = 0;

        for (k, route) in routes.iter().enumerate() {
            let sequence = self.refine_sequence(&route.stops, leg_start, k > 0).await?;
            traffic_delay += sequence.traffic_delay_seconds;

            let mut leg = summarize_leg(sequence.stops, leg_start, hourly_rate);
            leg.id = route.id;
            debug!(
                "Leg {} re-timed: {} -> {} ({} stops)",
                k,
                leg.start_time,
                leg.end_time,
                leg.stops.len()
            );
            leg_start = leg.end_time;
            refined.push(leg);
        }

        Ok((refined, traffic_delay))
    }

    async fn segment(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: NaiveDateTime,
    ) -> Result<SegmentEstimate, PlanningError> {
        with_timeout(
            "directions",
            self.call_timeout,
            self.directions.segment(origin, destination, departure),
        )
        .await
    }
}
