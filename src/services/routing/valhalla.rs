//! Valhalla routing engine client
//!
//! Valhalla API documentation:
//! https://valhalla.github.io/valhalla/api/matrix/api-reference/
//! https://valhalla.github.io/valhalla/api/turn-by-turn/api-reference/

use async_trait::async_trait;
use anyhow::{Result, Context};
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Coordinates;
use super::{DirectionsService, DistanceTimeMatrices, RoutingService, SegmentEstimate, UNREACHABLE};

/// `date_time.type` for "depart at"
const DATE_TIME_DEPART_AT: u8 = 1;

/// Valhalla client configuration
#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    /// Base URL of Valhalla server (e.g., "http://localhost:8002")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl ValhallaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// Valhalla routing client
pub struct ValhallaClient {
    client: Client,
    config: ValhallaConfig,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn location(c: &Coordinates) -> ValhallaLocation {
        ValhallaLocation {
            lat: c.lat,
            lon: c.lng,
            // 500m radius – geocoded coordinates are often a building
            // centroid rather than a point on the road edge
            radius: Some(500),
        }
    }

    /// Build the sources_to_targets request
    fn build_matrix_request(&self, locations: &[Coordinates], departure: NaiveDateTime) -> MatrixRequest {
        let locs: Vec<ValhallaLocation> = locations.iter().map(Self::location).collect();

        MatrixRequest {
            sources: locs.clone(),
            targets: locs,
            costing: "auto".to_string(),
            units: "kilometers".to_string(),
            date_time: Some(DateTimeOption::depart_at(departure)),
        }
    }

    /// Build a two-point route request, time-dependent when `departure` is set
    fn build_route_request(
        &self,
        origin: &Coordinates,
        destination: &Coordinates,
        departure: Option<NaiveDateTime>,
    ) -> RouteRequest {
        RouteRequest {
            locations: vec![Self::location(origin), Self::location(destination)],
            costing: "auto".to_string(),
            units: "kilometers".to_string(),
            directions_type: "none".to_string(), // only the summary is needed
            date_time: departure.map(DateTimeOption::depart_at),
        }
    }

    async fn route_summary(&self, request: &RouteRequest) -> Result<Summary> {
        let url = format!("{}/route", self.config.base_url);

        let response = self.client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to send route request to Valhalla")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Valhalla route returned error {}: {}", status, body);
        }

        let route_response: RouteResponse = response
            .json()
            .await
            .context("Failed to parse Valhalla route response")?;

        Ok(route_response.trip.summary)
    }
}

/// Convert a matrix response into meters/seconds, validating its shape.
fn convert_matrix(response: MatrixResponse, n: usize) -> Result<DistanceTimeMatrices> {
    let rows = &response.sources_to_targets;
    if rows.len() != n || rows.iter().any(|row| row.len() != n) {
        anyhow::bail!(
            "Valhalla matrix size mismatch: requested {}x{}, received {} rows",
            n,
            n,
            rows.len()
        );
    }

    let mut distances = vec![vec![0u64; n]; n];
    let mut durations = vec![vec![0u64; n]; n];

    for (i, row) in rows.iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            match (cell.distance, cell.time) {
                (Some(distance_km), Some(time_s)) => {
                    distances[i][j] = (distance_km * 1000.0) as u64;
                    durations[i][j] = time_s as u64;
                }
                _ => {
                    warn!("No route for {} -> {}", i, j);
                    distances[i][j] = UNREACHABLE;
                    durations[i][j] = UNREACHABLE;
                }
            }
        }
    }

    Ok(DistanceTimeMatrices {
        distances,
        durations,
        size: n,
    })
}

#[async_trait]
impl RoutingService for ValhallaClient {
    async fn get_matrices(
        &self,
        locations: &[Coordinates],
        departure: NaiveDateTime,
    ) -> Result<DistanceTimeMatrices> {
        let n = locations.len();

        if n == 0 {
            return Ok(DistanceTimeMatrices::empty());
        }

        if n == 1 {
            return Ok(DistanceTimeMatrices {
                distances: vec![vec![0]],
                durations: vec![vec![0]],
                size: 1,
            });
        }

        let request = self.build_matrix_request(locations, departure);
        let url = format!("{}/sources_to_targets", self.config.base_url);

        debug!("Requesting distance matrix from Valhalla for {} locations departing {}", n, departure);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Valhalla")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Valhalla returned error {}: {}", status, body);
        }

        let matrix_response: MatrixResponse = response
            .json()
            .await
            .context("Failed to parse Valhalla response")?;

        let matrices = convert_matrix(matrix_response, n)?;
        debug!("Received distance matrix from Valhalla: {}x{}", n, n);
        Ok(matrices)
    }

    fn name(&self) -> &str {
        "Valhalla"
    }
}

#[async_trait]
impl DirectionsService for ValhallaClient {
    async fn segment(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: NaiveDateTime,
    ) -> Result<SegmentEstimate> {
        let free_flow = self.build_route_request(&origin, &destination, None);
        let timed = self.build_route_request(&origin, &destination, Some(departure));

        let (base, traffic) = tokio::try_join!(
            self.route_summary(&free_flow),
            self.route_summary(&timed),
        )?;

        Ok(SegmentEstimate {
            base_seconds: base.time.max(0.0).round() as u64,
            traffic_seconds: traffic.time.max(0.0).round() as u64,
            distance_meters: (traffic.length.max(0.0) * 1000.0).round() as u64,
        })
    }

    fn name(&self) -> &str {
        "Valhalla"
    }
}

// Valhalla API types

#[derive(Debug, Serialize, Clone)]
struct DateTimeOption {
    #[serde(rename = "type")]
    kind: u8,
    /// Local time, `YYYY-MM-DDTHH:MM`
    value: String,
}

impl DateTimeOption {
    fn depart_at(at: NaiveDateTime) -> Self {
        Self {
            kind: DATE_TIME_DEPART_AT,
            value: at.format("%Y-%m-%dT%H:%M").to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MatrixRequest {
    sources: Vec<ValhallaLocation>,
    targets: Vec<ValhallaLocation>,
    costing: String,
    units: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<DateTimeOption>,
}

#[derive(Debug, Serialize, Clone)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
    /// Radius in meters for snapping to roads
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    sources_to_targets: Vec<Vec<MatrixCell>>,
}

#[derive(Debug, Deserialize)]
struct MatrixCell {
    /// Distance in kilometers (when units="kilometers")
    distance: Option<f64>,
    /// Time in seconds
    time: Option<f64>,
}

// Route API types

#[derive(Debug, Serialize)]
struct RouteRequest {
    locations: Vec<ValhallaLocation>,
    costing: String,
    units: String,
    directions_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<DateTimeOption>,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    trip: Trip,
}

#[derive(Debug, Deserialize)]
struct Trip {
    summary: Summary,
}

#[derive(Debug, Deserialize)]
struct Summary {
    /// Seconds
    time: f64,
    /// Kilometers
    length: f64,
}
