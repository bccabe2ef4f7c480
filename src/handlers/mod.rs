//! NATS message handlers

pub mod ping;
pub mod route;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::services::geocoding::{create_geocoder, Geocoder};
use crate::services::planning::RoutePlanner;
use crate::services::routing::{create_routing_service_with_fallback, CachedRoutingService, RoutingService};

/// Planner plus the backend names it was built with
pub struct PlannerSetup {
    pub planner: Arc<RoutePlanner>,
    pub routing_name: String,
    pub geocoder_name: String,
}

/// Build the planner against the configured backends
pub async fn build_planner(config: &Config) -> Result<PlannerSetup> {
    let geocoder: Arc<dyn Geocoder> = Arc::from(create_geocoder(&config.geocoder_backend, &config.nominatim_url)?);
    info!("Geocoder initialized: {}", geocoder.name());

    // Routing with automatic Valhalla detection; matrices go through the TTL cache
    let backends = create_routing_service_with_fallback(config.valhalla_url.clone()).await;
    let routing_name = backends.matrix.name().to_string();
    let routing: Arc<dyn RoutingService> =
        Arc::new(CachedRoutingService::new(backends.matrix, config.matrix_cache_ttl));
    info!("Routing service initialized: {}", routing_name);

    let planner = RoutePlanner::new(routing, backends.directions, geocoder.clone(), config.planning.clone());

    Ok(PlannerSetup {
        planner: Arc::new(planner),
        routing_name,
        geocoder_name: geocoder.name().to_string(),
    })
}

/// Start all message handlers
pub async fn start_handlers(client: Client, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let setup = build_planner(config).await?;

    let ping_sub = client.subscribe("dispatch.ping").await?;
    let optimize_sub = client.subscribe("dispatch.route.optimize").await?;
    let refine_sub = client.subscribe("dispatch.route.refine").await?;

    info!("Subscribed to NATS subjects");

    let client_ping = client.clone();
    let (routing_name, geocoder_name) = (setup.routing_name.clone(), setup.geocoder_name.clone());
    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(client_ping, ping_sub, routing_name, geocoder_name).await
    });

    let client_optimize = client.clone();
    let planner_optimize = Arc::clone(&setup.planner);
    let optimize_handle = tokio::spawn(async move {
        route::handle_optimize(client_optimize, optimize_sub, planner_optimize).await
    });

    let client_refine = client.clone();
    let planner_refine = Arc::clone(&setup.planner);
    let refine_handle = tokio::spawn(async move {
        route::handle_refine(client_refine, refine_sub, planner_refine).await
    });

    info!("All handlers started");

    // Wait for any handler to finish (which would indicate an error)
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = optimize_handle => {
            error!("Route optimize handler finished: {:?}", result);
        }
        result = refine_handle => {
            error!("Route refine handler finished: {:?}", result);
        }
    }

    Ok(())
}
