//! Nominatim geocoding client

use anyhow::{Context, Result};
use serde::Deserialize;
use crate::types::Coordinates;

/// Nominatim API response
#[derive(Debug, Deserialize)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    pub display_name: String,
}

/// A parsed search hit
#[derive(Debug, Clone, PartialEq)]
pub struct NominatimMatch {
    pub coordinates: Coordinates,
    pub display_name: String,
}

/// Nominatim geocoding client
pub struct NominatimClient {
    base_url: String,
    client: reqwest::Client,
}

impl NominatimClient {
    /// Create a new client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("DispatchWorker/0.1")
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search?q={}&format=json&limit=1",
            self.base_url,
            urlencoding::encode(query)
        )
    }

    /// Geocode a free-text address. `Ok(None)` when nothing matches.
    pub async fn geocode(&self, query: &str) -> Result<Option<NominatimMatch>> {
        let response = self.client
            .get(self.search_url(query))
            .send()
            .await
            .context("Failed to send geocoding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Nominatim returned status {}", response.status());
        }

        let results: Vec<NominatimResult> = response
            .json()
            .await
            .context("Failed to parse geocoding response")?;

        match results.into_iter().next() {
            Some(result) => {
                let lat: f64 = result.lat.parse().context("Invalid latitude")?;
                let lng: f64 = result.lon.parse().context("Invalid longitude")?;

                Ok(Some(NominatimMatch {
                    coordinates: Coordinates { lat, lng },
                    display_name: result.display_name,
                }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_encodes_query() {
        let client = NominatimClient::new("https://nominatim.example.org/").unwrap();
        let url = client.search_url("Main Street 1, Springfield");
        assert_eq!(
            url,
            "https://nominatim.example.org/search?q=Main%20Street%201%2C%20Springfield&format=json&limit=1"
        );
    }

    #[test]
    fn test_result_parses() {
        let raw = r#"[{"lat":"50.08","lon":"14.43","display_name":"Wenceslas Square"}]"#;
        let results: Vec<NominatimResult> = serde_json::from_str(raw).unwrap();
        assert_eq!(results[0].display_name, "Wenceslas Square");
    }

    // Requires network access and hits the public Nominatim API
    #[tokio::test]
    #[ignore]
    async fn test_geocode_prague() {
        let client = NominatimClient::new("https://nominatim.openstreetmap.org").unwrap();

        let result = client
            .geocode("Václavské náměstí, 110 00 Praha")
            .await
            .unwrap()
            .unwrap();

        assert!((result.coordinates.lat - 50.08).abs() < 0.1);
        assert!((result.coordinates.lng - 14.43).abs() < 0.1);
    }
}
