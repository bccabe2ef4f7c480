//! Time-slot planning: one independent mini-route per daily band.
//!
//! Stops are bucketed by the hour their window opens. Each band gets its own
//! matrix request at the band's start, its own solve and simulation. Bands run
//! concurrently (bounded) and the results are concatenated in band order.

use chrono::NaiveDateTime;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use crate::types::{Coordinates, Plan, PlanWarning, RoutableStop, WarningKind};

use super::config::{OutOfBandPolicy, PlanningConfig, TimeSlotBand};
use super::error::PlanningError;
use super::planner::RoutePlanner;
use super::solver::Solver;

/// Stops that fall into one band
#[derive(Debug, Clone, PartialEq)]
pub struct BandBatch {
    pub band: TimeSlotBand,
    pub stops: Vec<RoutableStop>,
}

impl BandBatch {
    /// Driver start for the band: the band's opening hour on the day of its
    /// earliest window
    pub fn driver_start(&self) -> Option<NaiveDateTime> {
        self.stops
            .iter()
            .map(|s| s.time_window.start)
            .min()
            .and_then(|t| t.date().and_hms_opt(self.band.start_hour, 0, 0))
    }
}

/// Bucket stops into the configured bands, keeping input order inside each
/// band. Empty bands are omitted.
pub fn partition_by_band(
    stops: Vec<RoutableStop>,
    config: &PlanningConfig,
) -> Result<(Vec<BandBatch>, Vec<PlanWarning>), PlanningError> {
    let mut batches: Vec<BandBatch> = config
        .bands
        .iter()
        .map(|band| BandBatch {
            band: band.clone(),
            stops: vec![],
        })
        .collect();
    let mut warnings = Vec::new();

    for stop in stops {
        let hour = stop.time_window.start_hour();
        match batches.iter_mut().find(|b| b.band.contains(hour)) {
            Some(batch) => batch.stops.push(stop),
            None => match config.out_of_band {
                OutOfBandPolicy::Drop => {
                    warn!("Stop {} starts at {}:00, outside every time slot; dropped", stop.id, hour);
                    warnings.push(PlanWarning::new(
                        WarningKind::OutOfBand,
                        Some(stop.id.as_str()),
                        format!("Window starting at {}:00 matches no time slot", hour),
                    ));
                }
                OutOfBandPolicy::Reject => {
                    return Err(PlanningError::invalid(format!(
                        "stop '{}' window starts at {}:00, outside every time slot",
                        stop.id, hour
                    )));
                }
            },
        }
    }

    batches.retain(|b| !b.stops.is_empty());
    Ok((batches, warnings))
}

impl RoutePlanner {
    pub(crate) async fn plan_time_slots(
        &self,
        depot: Coordinates,
        stops: Vec<RoutableStop>,
        solver: &dyn Solver,
    ) -> Result<Plan, PlanningError> {
        let (batches, warnings) = partition_by_band(stops, self.config())?;

        let bands: Vec<BoxFuture<'_, Result<Plan, PlanningError>>> = batches
            .iter()
            .map(|batch| {
                async move {
                    let start = batch.driver_start();
                    debug!(
                        "Planning band {} with {} stops from {:?}",
                        batch.band.name,
                        batch.stops.len(),
                        start
                    );
                    self.plan_batch(depot, &batch.stops, start, solver).await
                }
                .boxed()
            })
            .collect();

        let plans: Vec<Plan> = stream::iter(bands)
            .buffered(self.config().band_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(merge_plans(plans, warnings))
    }
}

/// Concatenate band plans in order and sum their totals
pub fn merge_plans(plans: Vec<Plan>, warnings: Vec<PlanWarning>) -> Plan {
    let mut merged = Plan {
        warnings,
        ..Plan::empty()
    };

    for plan in plans {
        merged.driver_start_time = merged.driver_start_time.or(plan.driver_start_time);
        merged.stops.extend(plan.stops);
        merged.routes.extend(plan.routes);
        merged.total_distance_meters += plan.total_distance_meters;
        merged.total_duration_seconds += plan.total_duration_seconds;
        merged.warnings.extend(plan.warnings);
    }

    merged
}
