//! Configuration management

use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::planning::PlanningConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Nominatim API URL (for geocoding)
    pub nominatim_url: String,

    /// Valhalla routing engine URL (optional, falls back to mock if unavailable)
    pub valhalla_url: Option<String>,

    /// Geocoder backend: "mock" or "nominatim"
    pub geocoder_backend: String,

    /// Directory for daily rolling log files
    pub logs_dir: String,

    /// How long a fetched matrix stays cached
    pub matrix_cache_ttl: Duration,

    /// Engine tunables
    pub planning: PlanningConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let nominatim_url = std::env::var("NOMINATIM_URL")
            .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string());

        let valhalla_url = std::env::var("VALHALLA_URL").ok().filter(|url| !url.is_empty());

        let geocoder_backend = std::env::var("GEOCODER_BACKEND")
            .unwrap_or_else(|_| "mock".to_string());

        let logs_dir = logs_dir_from_env();

        let matrix_cache_ttl = match std::env::var("MATRIX_CACHE_TTL_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .with_context(|| format!("MATRIX_CACHE_TTL_SECS must be a number of seconds, got '{}'", raw))?,
            ),
            Err(_) => Duration::from_secs(900),
        };

        Ok(Self {
            nats_url,
            nominatim_url,
            valhalla_url,
            geocoder_backend,
            logs_dir,
            matrix_cache_ttl,
            planning: PlanningConfig::from_env(),
        })
    }
}

/// Logs directory - LOGS_DIR env var or ../logs (relative to worker).
/// Read before the rest of the config so logging is up first.
pub fn logs_dir_from_env() -> String {
    std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_valhalla_url_none_when_not_set() {
        std::env::remove_var("VALHALLA_URL");

        let config = Config::from_env().unwrap();
        assert!(config.valhalla_url.is_none());
    }

    #[test]
    fn test_config_valhalla_url_some_when_set() {
        std::env::set_var("VALHALLA_URL", "http://localhost:8002");

        let config = Config::from_env().unwrap();
        assert_eq!(config.valhalla_url, Some("http://localhost:8002".to_string()));

        std::env::remove_var("VALHALLA_URL");
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_defaults() {
        std::env::remove_var("GEOCODER_BACKEND");
        std::env::remove_var("MATRIX_CACHE_TTL_SECS");
        std::env::remove_var("NOMINATIM_URL");

        let config = Config::from_env().unwrap();
        assert_eq!(config.geocoder_backend, "mock");
        assert_eq!(config.matrix_cache_ttl, Duration::from_secs(900));
        assert_eq!(config.nominatim_url, "https://nominatim.openstreetmap.org");
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_rejects_bad_cache_ttl() {
        std::env::set_var("MATRIX_CACHE_TTL_SECS", "soon");

        let result = Config::from_env();
        std::env::remove_var("MATRIX_CACHE_TTL_SECS");

        assert!(result.is_err());
    }
}
