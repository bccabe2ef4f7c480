//! Geocoding abstraction layer with safety features
//!
//! - MockGeocoder for tests (deterministic, no network)
//! - RateLimitedNominatimGeocoder for production (strict rate limiting and a
//!   circuit breaker, so a failing upstream is not hammered)
//!
//! Backend is selected by `GEOCODER_BACKEND` ("mock" or "nominatim").

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::services::nominatim::NominatimClient;
use crate::types::Coordinates;

/// Geocoder trait - abstraction for all geocoding implementations
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Geocode a free-text address to coordinates.
    /// Returns None if the address cannot be geocoded.
    async fn geocode(&self, address: &str) -> Result<Option<GeocodingResult>>;

    /// Get the name of this geocoder implementation
    fn name(&self) -> &'static str;
}

/// Result of geocoding operation
#[derive(Debug, Clone)]
pub struct GeocodingResult {
    pub coordinates: Coordinates,
    /// Confidence score 0.0-1.0
    pub confidence: f64,
    /// Display name returned by geocoder
    pub display_name: String,
    /// Matched a coarser fallback (e.g. the town) rather than the full address
    pub approximate: bool,
}

// ==========================================================================
// MockGeocoder Implementation
// ==========================================================================

/// Mock geocoder for testing - returns deterministic fake coordinates
pub struct MockGeocoder;

impl MockGeocoder {
    pub fn new() -> Self {
        Self
    }

    /// Generate deterministic coordinates from the address hash,
    /// always inside the mock service area
    fn hash_to_coordinates(address: &str) -> Coordinates {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        address.trim().to_lowercase().hash(&mut hasher);
        let hash = hasher.finish();

        const LAT_MIN: f64 = 49.9;
        const LAT_MAX: f64 = 50.2;
        const LNG_MIN: f64 = 14.2;
        const LNG_MAX: f64 = 14.7;

        let lat_normalized = ((hash >> 32) as f64) / (u32::MAX as f64);
        let lng_normalized = ((hash & 0xFFFFFFFF) as f64) / (u32::MAX as f64);

        Coordinates {
            lat: LAT_MIN + (lat_normalized * (LAT_MAX - LAT_MIN)),
            lng: LNG_MIN + (lng_normalized * (LNG_MAX - LNG_MIN)),
        }
    }
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodingResult>> {
        if address.trim().is_empty() {
            return Ok(None);
        }

        // Without a house number the mock treats the hit as street/town level
        let approximate = !address.chars().any(|c| c.is_ascii_digit());

        Ok(Some(GeocodingResult {
            coordinates: Self::hash_to_coordinates(address),
            confidence: if approximate { 0.5 } else { 0.95 },
            display_name: address.trim().to_string(),
            approximate,
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ==========================================================================
// RateLimiter Implementation
// ==========================================================================

/// Rate limiter that enforces minimum interval between calls
pub struct RateLimiter {
    last_call: Arc<Mutex<Option<Instant>>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: Arc::new(Mutex::new(None)),
            min_interval,
        }
    }

    /// Wait until it's safe to make another call.
    ///
    /// The lock is held while sleeping so concurrent callers queue up and
    /// are released one interval apart.
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        *last = Some(Instant::now());
    }
}

// ==========================================================================
// CircuitBreaker Implementation
// ==========================================================================

/// Circuit breaker to prevent hammering a failing service
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    last_failure: parking_lot::Mutex<Option<Instant>>,
    recovery_time: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
            last_failure: parking_lot::Mutex::new(None),
            recovery_time,
        }
    }

    /// Check if circuit is open (blocking calls)
    pub fn is_open(&self) -> bool {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            return false;
        }
        match *self.last_failure.lock() {
            // Half-open: allow a retry once the recovery time has passed
            Some(last_time) => last_time.elapsed() < self.recovery_time,
            None => true,
        }
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Instant::now());
    }

    /// Record a success (resets failure count)
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }
}

// ==========================================================================
// RateLimitedNominatimGeocoder Implementation
// ==========================================================================

/// Default rate limit interval (Nominatim's public policy is 1 req/s)
const DEFAULT_RATE_LIMIT_MS: u64 = 1100;

/// Default circuit breaker threshold (3 failures)
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Default circuit breaker recovery time (5 minutes)
const DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS: u64 = 300;

/// Coarser query used when the full address has no match: the last
/// comma-separated component (usually postcode + town).
fn fallback_query(address: &str) -> Option<&str> {
    let parts: Vec<&str> = address
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        return None;
    }
    parts.last().copied()
}

/// Rate-limited Nominatim geocoder with circuit breaker protection
pub struct RateLimitedNominatimGeocoder {
    client: NominatimClient,
    rate_limiter: RateLimiter,
    pub(crate) circuit_breaker: CircuitBreaker,
}

impl RateLimitedNominatimGeocoder {
    pub fn with_config(
        base_url: &str,
        rate_limit_interval: Duration,
        circuit_breaker_threshold: u32,
        circuit_breaker_recovery: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: NominatimClient::new(base_url)?,
            rate_limiter: RateLimiter::new(rate_limit_interval),
            circuit_breaker: CircuitBreaker::new(circuit_breaker_threshold, circuit_breaker_recovery),
        })
    }

    /// Create with limits from environment variables
    pub fn from_env(base_url: &str) -> Result<Self> {
        let rate_limit_ms = std::env::var("NOMINATIM_RATE_LIMIT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_MS);

        let cb_threshold = std::env::var("NOMINATIM_CB_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CIRCUIT_BREAKER_THRESHOLD);

        let cb_recovery_secs = std::env::var("NOMINATIM_CB_RECOVERY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS);

        Self::with_config(
            base_url,
            Duration::from_millis(rate_limit_ms),
            cb_threshold,
            Duration::from_secs(cb_recovery_secs),
        )
    }

    /// One rate-limited, breaker-guarded lookup
    async fn lookup(&self, query: &str) -> Result<Option<crate::services::nominatim::NominatimMatch>> {
        if self.circuit_breaker.is_open() {
            tracing::warn!("Circuit breaker is open, rejecting geocoding request");
            anyhow::bail!("Geocoding service temporarily unavailable (circuit breaker open)");
        }

        self.rate_limiter.wait().await;

        match self.client.geocode(query).await {
            Ok(found) => {
                // No result found is not a failure
                self.circuit_breaker.record_success();
                Ok(found)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!("Geocoding failed: {}", e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Geocoder for RateLimitedNominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodingResult>> {
        if let Some(hit) = self.lookup(address).await? {
            return Ok(Some(GeocodingResult {
                coordinates: hit.coordinates,
                // Nominatim doesn't provide confidence, use default
                confidence: 0.8,
                display_name: hit.display_name,
                approximate: false,
            }));
        }

        let Some(fallback) = fallback_query(address) else {
            return Ok(None);
        };
        tracing::debug!("No match for '{}', retrying with '{}'", address, fallback);

        Ok(self.lookup(fallback).await?.map(|hit| GeocodingResult {
            coordinates: hit.coordinates,
            confidence: 0.4,
            display_name: hit.display_name,
            approximate: true,
        }))
    }

    fn name(&self) -> &'static str {
        "nominatim"
    }
}

// ==========================================================================
// Factory function
// ==========================================================================

/// Create geocoder for the configured backend
///
/// # Environment Variables
///
/// - `NOMINATIM_RATE_LIMIT_MS`: Minimum interval between requests (default: 1100)
/// - `NOMINATIM_CB_THRESHOLD`: Circuit breaker failure threshold (default: 3)
/// - `NOMINATIM_CB_RECOVERY_SECS`: Circuit breaker recovery time (default: 300)
pub fn create_geocoder(backend: &str, nominatim_url: &str) -> Result<Box<dyn Geocoder>> {
    match backend {
        "mock" => {
            tracing::info!("Using MockGeocoder");
            Ok(Box::new(MockGeocoder::new()))
        }
        "nominatim" => {
            tracing::info!("Using RateLimitedNominatimGeocoder at {}", nominatim_url);
            Ok(Box::new(RateLimitedNominatimGeocoder::from_env(nominatim_url)?))
        }
        _ => {
            tracing::warn!("Unknown GEOCODER_BACKEND '{}', using mock", backend);
            Ok(Box::new(MockGeocoder::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // MockGeocoder Tests
    // ==========================================================================

    #[tokio::test]
    async fn mock_geocoder_returns_deterministic_coordinates() {
        let geocoder = MockGeocoder::new();

        let a = geocoder.geocode("Main Street 1, Springfield").await.unwrap().unwrap();
        let b = geocoder.geocode("Main Street 1, Springfield").await.unwrap().unwrap();

        assert_eq!(a.coordinates, b.coordinates);
    }

    #[tokio::test]
    async fn mock_geocoder_returns_different_coordinates_for_different_addresses() {
        let geocoder = MockGeocoder::new();

        let a = geocoder.geocode("Main Street 1, Springfield").await.unwrap().unwrap();
        let b = geocoder.geocode("Elm Street 7, Shelbyville").await.unwrap().unwrap();

        assert_ne!(a.coordinates, b.coordinates);
    }

    #[tokio::test]
    async fn mock_geocoder_stays_inside_service_area() {
        let geocoder = MockGeocoder::new();

        for address in ["A 1", "B 2", "C 3", "D 4"] {
            let result = geocoder.geocode(address).await.unwrap().unwrap();
            assert!(result.coordinates.lat >= 49.9 && result.coordinates.lat <= 50.2);
            assert!(result.coordinates.lng >= 14.2 && result.coordinates.lng <= 14.7);
        }
    }

    #[tokio::test]
    async fn mock_geocoder_flags_addresses_without_number_as_approximate() {
        let geocoder = MockGeocoder::new();

        let exact = geocoder.geocode("Main Street 1").await.unwrap().unwrap();
        assert!(!exact.approximate);
        assert!(exact.confidence >= 0.9);

        let rough = geocoder.geocode("Springfield").await.unwrap().unwrap();
        assert!(rough.approximate);
    }

    #[tokio::test]
    async fn mock_geocoder_blank_address_not_found() {
        let geocoder = MockGeocoder::new();
        assert!(geocoder.geocode("   ").await.unwrap().is_none());
        assert_eq!(geocoder.name(), "mock");
    }

    // ==========================================================================
    // RateLimiter Tests
    // ==========================================================================

    #[tokio::test]
    async fn rate_limiter_enforces_minimum_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(100));

        let start = Instant::now();

        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50), "First call should be immediate");

        limiter.wait().await;
        let after_second = start.elapsed();
        assert!(after_second >= Duration::from_millis(100),
            "Second call should wait at least 100ms, took {:?}", after_second);
    }

    #[tokio::test]
    async fn rate_limiter_allows_call_after_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(50));

        limiter.wait().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    // ==========================================================================
    // CircuitBreaker Tests
    // ==========================================================================

    #[test]
    fn circuit_breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.is_open());

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open(), "Should not open after 2 failures");

        breaker.record_failure();
        assert!(breaker.is_open(), "Should open after 3 failures");
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open(), "Should not be open, count was reset");
    }

    #[tokio::test]
    async fn circuit_breaker_closes_after_recovery_time() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));

        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!breaker.is_open(), "Circuit breaker should close after recovery time");
    }

    // ==========================================================================
    // RateLimitedNominatimGeocoder Tests
    // ==========================================================================

    #[test]
    fn fallback_query_uses_last_component() {
        assert_eq!(fallback_query("Main Street 1, 11000 Springfield"), Some("11000 Springfield"));
        assert_eq!(fallback_query("Main Street 1, , Springfield "), Some("Springfield"));
        assert_eq!(fallback_query("Springfield"), None);
    }

    #[tokio::test]
    async fn rate_limited_nominatim_geocoder_rejects_when_circuit_breaker_open() {
        let geocoder = RateLimitedNominatimGeocoder::with_config(
            "https://nominatim.openstreetmap.org",
            Duration::from_millis(100),
            1,
            Duration::from_secs(300),
        ).unwrap();

        geocoder.circuit_breaker.record_failure();
        assert!(geocoder.circuit_breaker.is_open());

        let result = geocoder.geocode("Main Street 1, Springfield").await;
        assert!(result.unwrap_err().to_string().contains("circuit breaker"));
        assert_eq!(geocoder.name(), "nominatim");
    }

    #[test]
    fn factory_defaults_to_mock_for_unknown_backend() {
        let geocoder = create_geocoder("something-else", "http://localhost").unwrap();
        assert_eq!(geocoder.name(), "mock");
    }
}
