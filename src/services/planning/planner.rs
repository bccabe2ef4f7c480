//! End-to-end planning pipeline:
//! validate → geocode → matrix → solve → simulate → split (→ refine).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::services::geocoding::Geocoder;
use crate::services::routing::{DirectionsService, DistanceTimeMatrices, RoutingService};
use crate::types::{
    Coordinates, OptimizedStop, Plan, PlanRequest, PlanWarning, PlanningMode, RefineRequest,
    RefinedPlan, RoutableStop, SolverKind, Stop, TimeWindow, WarningKind,
};

use super::config::PlanningConfig;
use super::error::{with_timeout, PlanningError};
use super::refine::TrafficRefiner;
use super::solver::{GreedySolver, SolveInput, Solver};
use super::splitter::split_routes;
use super::timing::{matrix_node, simulate, DEPOT_NODE};
use super::traffic_solver::TrafficAwareSolver;

/// Routable stop with an optional geocoding warning, or the reason it was excluded
type StopResolution = Result<(RoutableStop, Option<PlanWarning>), PlanWarning>;

/// Plans one vehicle's day against the injected collaborators
pub struct RoutePlanner {
    routing: Arc<dyn RoutingService>,
    directions: Arc<dyn DirectionsService>,
    geocoder: Arc<dyn Geocoder>,
    config: PlanningConfig,
}

impl RoutePlanner {
    pub fn new(
        routing: Arc<dyn RoutingService>,
        directions: Arc<dyn DirectionsService>,
        geocoder: Arc<dyn Geocoder>,
        config: PlanningConfig,
    ) -> Self {
        Self {
            routing,
            directions,
            geocoder,
            config,
        }
    }

    pub fn config(&self) -> &PlanningConfig {
        &self.config
    }

    /// Build a plan. Runs under the request-level timeout.
    pub async fn plan(&self, request: PlanRequest) -> Result<Plan, PlanningError> {
        let after = self.config.request_timeout;
        tokio::time::timeout(after, self.plan_inner(request))
            .await
            .map_err(|_| PlanningError::Timeout { stage: "plan", after })?
    }

    /// Re-time an ordered plan against live traffic. Runs under the
    /// request-level timeout.
    pub async fn refine(&self, request: RefineRequest) -> Result<RefinedPlan, PlanningError> {
        let after = self.config.request_timeout;
        tokio::time::timeout(after, self.refine_inner(request))
            .await
            .map_err(|_| PlanningError::Timeout { stage: "refine", after })?
    }

    /// Plan and, when requested, refine. A failed refinement falls back to
    /// the static plan with a `TRAFFIC_REFINEMENT_FAILED` warning.
    pub async fn optimize(&self, request: PlanRequest) -> Result<RefinedPlan, PlanningError> {
        let after = self.config.request_timeout;
        tokio::time::timeout(after, self.optimize_inner(request))
            .await
            .map_err(|_| PlanningError::Timeout { stage: "optimize", after })?
    }

    async fn optimize_inner(&self, request: PlanRequest) -> Result<RefinedPlan, PlanningError> {
        let depot = request.depot;
        let refine = request.refine_with_traffic;
        let plan = self.plan_inner(request).await?;

        let start = match plan.driver_start_time {
            Some(start) if refine && !plan.routes.is_empty() => start,
            _ => {
                return Ok(RefinedPlan {
                    plan,
                    traffic_delay_seconds: 0,
                })
            }
        };

        let refine_request = RefineRequest {
            depot,
            driver_start: start,
            stops: vec![],
            routes: plan.routes.clone(),
        };

        match self.refine_inner(refine_request).await {
            Ok(mut refined) => {
                let mut warnings: Vec<PlanWarning> = plan
                    .warnings
                    .into_iter()
                    .filter(|w| w.warning_type != WarningKind::TimeWindowMissed)
                    .collect();
                warnings.append(&mut refined.plan.warnings);
                refined.plan.warnings = warnings;
                refined.plan.solver = plan.solver;
                Ok(refined)
            }
            Err(e) => {
                warn!("Traffic refinement failed, keeping static plan: {}", e);
                let mut plan = plan;
                plan.warnings.push(PlanWarning::new(
                    WarningKind::TrafficRefinementFailed,
                    None,
                    format!("Traffic refinement failed: {}", e),
                ));
                Ok(RefinedPlan {
                    plan,
                    traffic_delay_seconds: 0,
                })
            }
        }
    }

    async fn plan_inner(&self, request: PlanRequest) -> Result<Plan, PlanningError> {
        validate_request(&request)?;
        debug!(
            "Planning {} stops, mode {:?}, solver {}",
            request.stops.len(),
            request.mode,
            request.solver.as_str()
        );

        let (stops, mut warnings) = self.resolve_stops(&request.stops).await;
        if stops.is_empty() {
            return Err(PlanningError::invalid("no routable stops left after geocoding"));
        }

        let solver = self.solver_for(request.solver, request.avoid_rush_hour);
        let mut plan = match request.mode {
            PlanningMode::Single => {
                self.plan_batch(request.depot, &stops, request.driver_start, solver.as_ref())
                    .await?
            }
            PlanningMode::TimeSlots => {
                if request.driver_start.is_some() {
                    debug!("Explicit driver start ignored in time-slot mode");
                }
                self.plan_time_slots(request.depot, stops, solver.as_ref()).await?
            }
        };

        warnings.append(&mut plan.warnings);
        plan.warnings = warnings;
        plan.solver = Some(request.solver);

        info!(
            "Planned {} stops in {} legs: {} m, {} s, {} warnings",
            plan.stops.iter().filter(|s| !s.is_depot_return).count(),
            plan.routes.len(),
            plan.total_distance_meters,
            plan.total_duration_seconds,
            plan.warnings.len()
        );

        Ok(plan)
    }

    async fn refine_inner(&self, request: RefineRequest) -> Result<RefinedPlan, PlanningError> {
        if !request.depot.is_valid() {
            return Err(PlanningError::invalid("depot coordinates are out of range"));
        }

        let start = request.driver_start;
        let rate = self.config.hourly_rate;
        let refiner = TrafficRefiner::new(
            self.directions.as_ref(),
            request.depot,
            self.config.external_call_timeout,
        );

        let (routes, traffic_delay) = if request.routes.is_empty() {
            let sequence = refiner.refine_sequence(&request.stops, start, false).await?;
            (split_routes(&sequence.stops, start, rate), sequence.traffic_delay_seconds)
        } else {
            refiner.refine_routes(&request.routes, start, rate).await?
        };

        let stops: Vec<OptimizedStop> = routes.iter().flat_map(|r| r.stops.iter().cloned()).collect();
        let warnings = lateness_warnings(&stops);
        info!(
            "Refined {} legs against {}: {} s traffic delay",
            routes.len(),
            self.directions.name(),
            traffic_delay
        );

        Ok(RefinedPlan {
            plan: Plan {
                total_distance_meters: routes.iter().map(|r| r.distance_meters).sum(),
                total_duration_seconds: routes.iter().map(|r| r.duration_seconds).sum(),
                stops,
                routes,
                driver_start_time: Some(start),
                warnings,
                solver: None,
            },
            traffic_delay_seconds: traffic_delay,
        })
    }

    fn solver_for(&self, kind: SolverKind, avoid_rush_hour: bool) -> Box<dyn Solver> {
        match kind {
            SolverKind::Greedy => Box::new(GreedySolver::new(&self.config)),
            SolverKind::TrafficAware => Box::new(TrafficAwareSolver::new(&self.config, avoid_rush_hour)),
        }
    }

    /// Geocode stops lacking coordinates, keeping input order.
    async fn resolve_stops(&self, stops: &[Stop]) -> (Vec<RoutableStop>, Vec<PlanWarning>) {
        let lookups: Vec<BoxFuture<'_, (usize, StopResolution)>> = stops
            .iter()
            .enumerate()
            .map(|(i, stop)| async move { (i, self.resolve_stop(stop).await) }.boxed())
            .collect();
        let mut resolved: Vec<(usize, StopResolution)> = stream::iter(lookups)
            .buffer_unordered(self.config.geocode_concurrency.max(1))
            .collect()
            .await;
        resolved.sort_by_key(|(i, _)| *i);

        let mut routable = Vec::with_capacity(stops.len());
        let mut warnings = Vec::new();
        for (_, outcome) in resolved {
            match outcome {
                Ok((stop, warning)) => {
                    routable.push(stop);
                    warnings.extend(warning);
                }
                Err(warning) => {
                    warn!("Excluding stop: {}", warning.message);
                    warnings.push(warning);
                }
            }
        }
        (routable, warnings)
    }

    async fn resolve_stop(&self, stop: &Stop) -> StopResolution {
        if let Some(routable) = RoutableStop::from_stop(stop) {
            return Ok((routable, None));
        }

        let failed = |message: String| PlanWarning::new(WarningKind::GeocodingFailed, Some(stop.id.as_str()), message);

        let Some(address) = stop.address.as_deref().filter(|a| !a.trim().is_empty()) else {
            return Err(failed(format!("Stop {} has neither coordinates nor an address", stop.id)));
        };

        match with_timeout(
            "geocoding",
            self.config.external_call_timeout,
            self.geocoder.geocode(address),
        )
        .await
        {
            Ok(Some(found)) if found.coordinates.is_valid() => {
                let warning = found.approximate.then(|| {
                    PlanWarning::new(
                        WarningKind::ApproximateLocation,
                        Some(stop.id.as_str()),
                        format!("'{}' matched approximately as '{}'", address, found.display_name),
                    )
                });
                Ok((RoutableStop::with_coordinates(stop, found.coordinates), warning))
            }
            Ok(Some(_)) => Err(failed(format!("Geocoder returned invalid coordinates for '{}'", address))),
            Ok(None) => Err(failed(format!("Address not found: '{}'", address))),
            Err(e) => Err(failed(format!("Geocoding '{}' failed: {}", address, e))),
        }
    }

    /// Matrix → solver → simulator → splitter for one group of stops.
    pub(crate) async fn plan_batch(
        &self,
        depot: Coordinates,
        stops: &[RoutableStop],
        driver_start: Option<NaiveDateTime>,
        solver: &dyn Solver,
    ) -> Result<Plan, PlanningError> {
        let windows: Vec<TimeWindow> = stops.iter().map(|s| s.time_window).collect();
        let Some(start) = driver_start.or_else(|| solver.default_start(&windows)) else {
            return Ok(Plan::empty());
        };

        let mut locations = Vec::with_capacity(stops.len() + 1);
        locations.push(depot);
        locations.extend(stops.iter().map(|s| s.coordinates));

        let matrices = with_timeout(
            "matrix",
            self.config.external_call_timeout,
            self.routing.get_matrices(&locations, start),
        )
        .await?;
        matrices
            .ensure_size(locations.len())
            .map_err(|e| PlanningError::external("matrix", e))?;

        let (stops, matrices, mut warnings) = drop_unreachable(stops, matrices);
        if stops.is_empty() {
            return Ok(Plan {
                driver_start_time: Some(start),
                warnings,
                ..Plan::empty()
            });
        }

        let windows: Vec<TimeWindow> = stops.iter().map(|s| s.time_window).collect();
        let service_minutes: Vec<u32> = stops.iter().map(|s| s.service_minutes).collect();
        let order = solver.solve(&SolveInput {
            matrices: &matrices,
            service_minutes: &service_minutes,
            windows: &windows,
            start: Some(start),
        });
        debug!("{} solver order: {:?}", solver.name(), order);

        let simulation = simulate(&order, &stops, depot, &matrices, start, &self.config);
        let routes = split_routes(&simulation.stops, start, self.config.hourly_rate);
        warnings.extend(lateness_warnings(&simulation.stops));

        Ok(Plan {
            stops: simulation.stops,
            routes,
            total_distance_meters: simulation.total_distance_meters,
            total_duration_seconds: simulation.total_duration_seconds,
            driver_start_time: Some(start),
            warnings,
            solver: None,
        })
    }
}

fn validate_request(request: &PlanRequest) -> Result<(), PlanningError> {
    if request.stops.is_empty() {
        return Err(PlanningError::invalid("stop list is empty"));
    }
    if !request.depot.is_valid() {
        return Err(PlanningError::invalid("depot coordinates are out of range"));
    }

    let mut seen = HashSet::with_capacity(request.stops.len());
    for stop in &request.stops {
        if stop.id.trim().is_empty() {
            return Err(PlanningError::invalid("stop id must not be empty"));
        }
        if !seen.insert(stop.id.as_str()) {
            return Err(PlanningError::invalid(format!("duplicate stop id '{}'", stop.id)));
        }
        if !stop.time_window.is_valid() {
            return Err(PlanningError::invalid(format!(
                "stop '{}' has a time window ending before it starts",
                stop.id
            )));
        }
        if stop.coordinates.is_some_and(|c| !c.is_valid()) {
            return Err(PlanningError::invalid(format!(
                "stop '{}' has coordinates out of range",
                stop.id
            )));
        }
    }
    Ok(())
}

/// Exclude stops the routing engine cannot connect to the depot.
fn drop_unreachable(
    stops: &[RoutableStop],
    matrices: DistanceTimeMatrices,
) -> (Vec<RoutableStop>, DistanceTimeMatrices, Vec<PlanWarning>) {
    let mut kept = Vec::with_capacity(stops.len());
    let mut nodes = vec![DEPOT_NODE];
    let mut warnings = Vec::new();

    for (index, stop) in stops.iter().enumerate() {
        let node = matrix_node(index);
        if matrices.is_reachable(DEPOT_NODE, node) && matrices.is_reachable(node, DEPOT_NODE) {
            kept.push(stop.clone());
            nodes.push(node);
        } else {
            warn!("Stop {} is unreachable from the depot", stop.id);
            warnings.push(PlanWarning::new(
                WarningKind::Unreachable,
                Some(stop.id.as_str()),
                format!("Stop {} cannot be reached from the depot", stop.id),
            ));
        }
    }

    if warnings.is_empty() {
        return (kept, matrices, warnings);
    }
    let matrices = matrices.submatrix(&nodes);
    (kept, matrices, warnings)
}

pub(crate) fn lateness_warnings(stops: &[OptimizedStop]) -> Vec<PlanWarning> {
    stops
        .iter()
        .filter(|s| !s.is_depot_return && s.arrival_delay_minutes > 0)
        .map(|s| {
            PlanWarning::new(
                WarningKind::TimeWindowMissed,
                s.stop_id.as_deref(),
                format!("{} is served {} min after its window closes", s.label, s.arrival_delay_minutes),
            )
        })
        .collect()
}
