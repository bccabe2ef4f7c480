//! Routing services: distance/time matrices and live per-segment timing
//!
//! Uses Valhalla for production, mock for tests.

mod cache;
mod valhalla;

pub use cache::{CachedRoutingService, MatrixCache};
pub use valhalla::{ValhallaClient, ValhallaConfig};

use std::sync::Arc;

use async_trait::async_trait;
use anyhow::Result;
use chrono::{NaiveDateTime, Timelike};

use crate::services::planning::HourRange;
use crate::types::Coordinates;

/// Sentinel for matrix cells the routing engine could not connect.
///
/// Small enough that adding it to a timestamp never overflows.
pub const UNREACHABLE: u64 = u32::MAX as u64;

/// Distance and time matrices between locations
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceTimeMatrices {
    /// Distance in meters [i][j] from location i to location j
    pub distances: Vec<Vec<u64>>,
    /// Duration in seconds [i][j] from location i to location j
    pub durations: Vec<Vec<u64>>,
    /// Number of locations
    pub size: usize,
}

impl DistanceTimeMatrices {
    /// Create empty matrices
    pub fn empty() -> Self {
        Self {
            distances: vec![],
            durations: vec![],
            size: 0,
        }
    }

    /// Get distance from location i to location j in meters
    pub fn distance(&self, from: usize, to: usize) -> u64 {
        self.distances[from][to]
    }

    /// Get duration from location i to location j in seconds
    pub fn duration(&self, from: usize, to: usize) -> u64 {
        self.durations[from][to]
    }

    pub fn is_reachable(&self, from: usize, to: usize) -> bool {
        self.durations[from][to] < UNREACHABLE
    }

    /// Matrices restricted to `nodes`, in that order
    pub fn submatrix(&self, nodes: &[usize]) -> Self {
        let pick = |m: &Vec<Vec<u64>>| -> Vec<Vec<u64>> {
            nodes
                .iter()
                .map(|&i| nodes.iter().map(|&j| m[i][j]).collect())
                .collect()
        };
        Self {
            distances: pick(&self.distances),
            durations: pick(&self.durations),
            size: nodes.len(),
        }
    }

    /// Check that both matrices are `expected` × `expected`
    pub fn ensure_size(&self, expected: usize) -> Result<()> {
        let square = |m: &Vec<Vec<u64>>| m.len() == expected && m.iter().all(|row| row.len() == expected);
        if self.size != expected || !square(&self.distances) || !square(&self.durations) {
            anyhow::bail!(
                "Matrix size mismatch: expected {}x{}, got {} rows (declared size {})",
                expected,
                expected,
                self.durations.len(),
                self.size
            );
        }
        Ok(())
    }
}

/// Timing of a single origin → destination segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEstimate {
    /// Free-flow duration in seconds
    pub base_seconds: u64,
    /// Duration in seconds at the requested departure time
    pub traffic_seconds: u64,
    pub distance_meters: u64,
}

impl SegmentEstimate {
    /// Extra time caused by traffic, never negative
    pub fn traffic_delay_seconds(&self) -> u64 {
        self.traffic_seconds.saturating_sub(self.base_seconds)
    }
}

/// Routing service trait for abstraction (Valhalla, mock, etc.)
#[async_trait]
pub trait RoutingService: Send + Sync {
    /// Get distance and time matrices for a list of locations.
    /// First location is the depot. `departure` is the approximate time the
    /// vehicle leaves, used by engines with time-dependent costing.
    async fn get_matrices(
        &self,
        locations: &[Coordinates],
        departure: NaiveDateTime,
    ) -> Result<DistanceTimeMatrices>;

    /// Get service name for logging
    fn name(&self) -> &str;
}

/// Live per-segment timing
#[async_trait]
pub trait DirectionsService: Send + Sync {
    async fn segment(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: NaiveDateTime,
    ) -> Result<SegmentEstimate>;

    fn name(&self) -> &str;
}

/// Mock routing service for tests
/// Uses Haversine distance × coefficient for estimation
pub struct MockRoutingService {
    /// Coefficient for converting straight-line to road distance (default: 1.3)
    road_coefficient: f64,
    /// Average speed in km/h for time estimation (default: 40)
    average_speed_kmh: f64,
    /// Slowdown applied to segments departing in a rush window (default: 1.25)
    rush_hour_multiplier: f64,
    rush_hours: Vec<HourRange>,
}

impl Default for MockRoutingService {
    fn default() -> Self {
        Self {
            road_coefficient: 1.3,
            average_speed_kmh: 40.0,
            rush_hour_multiplier: 1.25,
            rush_hours: vec![HourRange::new(8, 10), HourRange::new(16, 19)],
        }
    }
}

impl MockRoutingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(road_coefficient: f64, average_speed_kmh: f64) -> Self {
        Self {
            road_coefficient,
            average_speed_kmh,
            ..Default::default()
        }
    }

    pub fn with_rush_hour_multiplier(mut self, multiplier: f64) -> Self {
        self.rush_hour_multiplier = multiplier;
        self
    }

    /// Free-flow (road distance in meters, travel time in seconds)
    fn estimate(&self, from: &Coordinates, to: &Coordinates) -> (u64, u64) {
        use crate::services::geo::haversine_distance;

        let straight_line_km = haversine_distance(from, to);
        let road_distance_m = (straight_line_km * self.road_coefficient * 1000.0) as u64;
        let travel_time_s =
            ((straight_line_km * self.road_coefficient) / self.average_speed_kmh * 3600.0) as u64;
        (road_distance_m, travel_time_s)
    }
}

#[async_trait]
impl RoutingService for MockRoutingService {
    async fn get_matrices(
        &self,
        locations: &[Coordinates],
        _departure: NaiveDateTime,
    ) -> Result<DistanceTimeMatrices> {
        let n = locations.len();
        if n == 0 {
            return Ok(DistanceTimeMatrices::empty());
        }

        let mut distances = vec![vec![0u64; n]; n];
        let mut durations = vec![vec![0u64; n]; n];

        for i in 0..n {
            for j in 0..n {
                if i != j {
                    let (distance_m, duration_s) = self.estimate(&locations[i], &locations[j]);
                    distances[i][j] = distance_m;
                    durations[i][j] = duration_s;
                }
            }
        }

        Ok(DistanceTimeMatrices {
            distances,
            durations,
            size: n,
        })
    }

    fn name(&self) -> &str {
        "MockRouting"
    }
}

#[async_trait]
impl DirectionsService for MockRoutingService {
    async fn segment(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: NaiveDateTime,
    ) -> Result<SegmentEstimate> {
        let (distance_meters, base_seconds) = self.estimate(&origin, &destination);
        let hour = departure.hour();
        let traffic_seconds = if self.rush_hours.iter().any(|r| r.contains(hour)) {
            (base_seconds as f64 * self.rush_hour_multiplier).round() as u64
        } else {
            base_seconds
        };

        Ok(SegmentEstimate {
            base_seconds,
            traffic_seconds,
            distance_meters,
        })
    }

    fn name(&self) -> &str {
        "MockRouting"
    }
}

/// Matrix and directions backends selected at startup
pub struct RoutingBackends {
    pub matrix: Arc<dyn RoutingService>,
    pub directions: Arc<dyn DirectionsService>,
}

/// Create routing backends with automatic Valhalla detection and fallback
///
/// Tries to connect to Valhalla if URL is provided. Falls back to mock
/// routing service if Valhalla is unavailable or URL is not configured.
pub async fn create_routing_service_with_fallback(valhalla_url: Option<String>) -> RoutingBackends {
    use tracing::{info, warn};

    if let Some(url) = valhalla_url {
        // Test connection with a simple health check
        match check_valhalla_health(&url).await {
            Ok(()) => match ValhallaClient::new(ValhallaConfig::new(&url)) {
                Ok(client) => {
                    info!("Valhalla routing service available at {}", url);
                    let client = Arc::new(client);
                    return RoutingBackends {
                        matrix: client.clone(),
                        directions: client,
                    };
                }
                Err(e) => {
                    warn!("Failed to build Valhalla client: {}. Falling back to mock routing.", e);
                }
            },
            Err(e) => {
                warn!("Valhalla not available at {}: {}. Falling back to mock routing.", url, e);
            }
        }
    }

    info!("Using mock routing service (Valhalla not configured or unavailable)");
    let mock = Arc::new(MockRoutingService::new());
    RoutingBackends {
        matrix: mock.clone(),
        directions: mock,
    }
}

/// Check if Valhalla is healthy by making a simple status request
async fn check_valhalla_health(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    // Try the status endpoint
    let url = format!("{}/status", base_url);
    let response = client.get(&url).send().await?;

    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("Valhalla returned status {}", response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn prague() -> Coordinates {
        Coordinates { lat: 50.0755, lng: 14.4378 }
    }

    fn brno() -> Coordinates {
        Coordinates { lat: 49.1951, lng: 16.6068 }
    }

    fn ostrava() -> Coordinates {
        Coordinates { lat: 49.8209, lng: 18.2625 }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_mock_routing_empty_locations() {
        let service = MockRoutingService::new();
        let matrices = service.get_matrices(&[], at(8, 0)).await.unwrap();

        assert_eq!(matrices.size, 0);
        assert!(matrices.distances.is_empty());
        assert!(matrices.durations.is_empty());
    }

    #[tokio::test]
    async fn test_mock_routing_single_location() {
        let service = MockRoutingService::new();
        let matrices = service.get_matrices(&[prague()], at(8, 0)).await.unwrap();

        assert_eq!(matrices.size, 1);
        assert_eq!(matrices.distance(0, 0), 0);
        assert_eq!(matrices.duration(0, 0), 0);
    }

    #[tokio::test]
    async fn test_mock_routing_two_locations() {
        let service = MockRoutingService::new();
        let matrices = service.get_matrices(&[prague(), brno()], at(8, 0)).await.unwrap();

        assert_eq!(matrices.size, 2);
        assert_eq!(matrices.distance(0, 0), 0);
        assert_eq!(matrices.distance(1, 1), 0);

        // Prague to Brno is ~185 km straight line, ~240 km road
        let distance_km = matrices.distance(0, 1) as f64 / 1000.0;
        assert!(distance_km > 200.0 && distance_km < 280.0,
            "Expected ~240 km, got {} km", distance_km);

        assert_eq!(matrices.distance(0, 1), matrices.distance(1, 0));
        assert_eq!(matrices.duration(0, 1), matrices.duration(1, 0));
    }

    #[tokio::test]
    async fn test_mock_routing_three_locations_matrix() {
        let service = MockRoutingService::new();
        let locations = vec![prague(), brno(), ostrava()];
        let matrices = service.get_matrices(&locations, at(8, 0)).await.unwrap();

        matrices.ensure_size(3).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                if i != j {
                    assert!(matrices.distance(i, j) > 0);
                    assert!(matrices.is_reachable(i, j));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_mock_routing_custom_params() {
        let service = MockRoutingService::with_params(1.5, 60.0);
        let matrices = service.get_matrices(&[prague(), brno()], at(8, 0)).await.unwrap();

        let distance_km = matrices.distance(0, 1) as f64 / 1000.0;
        assert!(distance_km > 250.0 && distance_km < 320.0,
            "Expected ~280 km with 1.5 coefficient, got {} km", distance_km);
    }

    #[tokio::test]
    async fn test_mock_directions_slower_in_rush_hour() {
        let service = MockRoutingService::new().with_rush_hour_multiplier(1.5);

        let off_peak = service.segment(prague(), brno(), at(11, 0)).await.unwrap();
        assert_eq!(off_peak.traffic_seconds, off_peak.base_seconds);
        assert_eq!(off_peak.traffic_delay_seconds(), 0);

        let peak = service.segment(prague(), brno(), at(8, 30)).await.unwrap();
        assert!(peak.traffic_seconds > peak.base_seconds);
        assert_eq!(peak.base_seconds, off_peak.base_seconds);
        assert_eq!(peak.distance_meters, off_peak.distance_meters);
    }

    #[test]
    fn test_ensure_size_rejects_mismatch() {
        let matrices = DistanceTimeMatrices {
            distances: vec![vec![0, 1], vec![1, 0]],
            durations: vec![vec![0, 1], vec![1, 0]],
            size: 2,
        };
        assert!(matrices.ensure_size(2).is_ok());
        let err = matrices.ensure_size(3).unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
    }

    #[test]
    fn test_unreachable_cells() {
        let matrices = DistanceTimeMatrices {
            distances: vec![vec![0, UNREACHABLE], vec![10, 0]],
            durations: vec![vec![0, UNREACHABLE], vec![10, 0]],
            size: 2,
        };
        assert!(!matrices.is_reachable(0, 1));
        assert!(matrices.is_reachable(1, 0));
    }

    #[test]
    fn test_submatrix_keeps_requested_nodes() {
        let matrices = DistanceTimeMatrices {
            distances: vec![vec![0, 1, 2], vec![3, 0, 4], vec![5, 6, 0]],
            durations: vec![vec![0, 10, 20], vec![30, 0, 40], vec![50, 60, 0]],
            size: 3,
        };
        let sub = matrices.submatrix(&[0, 2]);
        assert_eq!(sub.size, 2);
        assert_eq!(sub.distances, vec![vec![0, 2], vec![5, 0]]);
        assert_eq!(sub.durations, vec![vec![0, 20], vec![50, 0]]);
        sub.ensure_size(2).unwrap();
    }

    #[test]
    fn test_routing_service_name() {
        let mock = MockRoutingService::new();
        assert_eq!(RoutingService::name(&mock), "MockRouting");
    }

    #[tokio::test]
    async fn test_create_routing_service_with_fallback_no_url() {
        let backends = create_routing_service_with_fallback(None).await;
        assert_eq!(backends.matrix.name(), "MockRouting");
        assert_eq!(backends.directions.name(), "MockRouting");
    }

    #[tokio::test]
    async fn test_create_routing_service_with_fallback_invalid_url() {
        let backends = create_routing_service_with_fallback(
            Some("http://localhost:99999".to_string())
        ).await;
        assert_eq!(backends.matrix.name(), "MockRouting");
    }

    #[tokio::test]
    #[ignore = "Requires running Valhalla server"]
    async fn test_create_routing_service_with_fallback_valhalla_available() {
        let backends = create_routing_service_with_fallback(
            Some("http://localhost:8002".to_string())
        ).await;
        assert_eq!(backends.matrix.name(), "Valhalla");
    }
}
