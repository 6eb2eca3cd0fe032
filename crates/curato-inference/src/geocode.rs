//! Nominatim geocoding client.
//!
//! Resolves free-text location strings to coordinates. Geocoding is a
//! best-effort enrichment; `Ok(None)` means the service answered and found
//! nothing, which callers treat the same as a miss.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use curato_core::{defaults, Error, GeoPoint, GeocodingBackend, Result};

/// Default Nominatim endpoint.
pub const DEFAULT_GEOCODE_URL: &str = defaults::GEOCODE_URL;

/// Configuration for the Nominatim client.
#[derive(Debug, Clone)]
pub struct NominatimConfig {
    /// Search endpoint URL.
    pub base_url: String,
    /// User-Agent header (required by Nominatim's usage policy).
    pub user_agent: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEOCODE_URL.to_string(),
            user_agent: format!("curato/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: defaults::GEOCODE_TIMEOUT_SECS,
        }
    }
}

/// Geocoding backend backed by a Nominatim-compatible search endpoint.
pub struct NominatimGeocoder {
    client: Client,
    config: NominatimConfig,
}

/// One result row in `jsonv2` format. Coordinates arrive as strings.
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    town: Option<String>,
    #[serde(default)]
    village: Option<String>,
    #[serde(default)]
    suburb: Option<String>,
    #[serde(default)]
    neighbourhood: Option<String>,
}

impl NominatimAddress {
    fn city(&self) -> Option<String> {
        self.city
            .clone()
            .or_else(|| self.town.clone())
            .or_else(|| self.village.clone())
    }

    fn neighborhood(&self) -> Option<String> {
        self.neighbourhood.clone().or_else(|| self.suburb.clone())
    }
}

impl NominatimGeocoder {
    /// Create a new geocoder with the given configuration.
    pub fn new(config: NominatimConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Request(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(NominatimConfig::default())
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = NominatimConfig::default();
        if let Ok(url) = std::env::var("GEOCODE_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(secs) = std::env::var("GEOCODE_TIMEOUT") {
            if let Ok(secs) = secs.parse() {
                config.timeout_seconds = secs;
            }
        }
        Self::new(config)
    }
}

#[async_trait]
impl GeocodingBackend for NominatimGeocoder {
    async fn resolve(&self, location: &str) -> Result<Option<GeoPoint>> {
        if location.trim().is_empty() {
            return Ok(None);
        }

        debug!(location, "Geocoding location");

        let response = self
            .client
            .get(&self.config.base_url)
            .header("User-Agent", &self.config.user_agent)
            .query(&[
                ("q", location),
                ("format", "jsonv2"),
                ("limit", "1"),
                ("addressdetails", "1"),
            ])
            .send()
            .await
            .map_err(|e| Error::Geocoding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Geocoding(format!(
                "Geocoder returned {}",
                response.status()
            )));
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|e| Error::Geocoding(format!("Failed to parse response: {}", e)))?;

        let Some(place) = places.into_iter().next() else {
            debug!(location, "No geocoding match");
            return Ok(None);
        };

        let (Ok(lat), Ok(lon)) = (place.lat.parse::<f64>(), place.lon.parse::<f64>()) else {
            warn!(location, lat = %place.lat, lon = %place.lon, "Unparseable coordinates");
            return Err(Error::Geocoding(format!(
                "unparseable coordinates for '{}'",
                location
            )));
        };

        let address = place.address.unwrap_or_default();
        Ok(Some(GeoPoint {
            lat,
            lon,
            country: address.country.clone(),
            city: address.city(),
            neighborhood: address.neighborhood(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn geocoder_for(server: &MockServer) -> NominatimGeocoder {
        NominatimGeocoder::new(NominatimConfig {
            base_url: format!("{}/search", server.uri()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_parses_string_coordinates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "Trastevere, Rome"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "lat": "41.8897",
                "lon": "12.4694",
                "address": {
                    "country": "Italy",
                    "city": "Rome",
                    "suburb": "Trastevere"
                }
            }])))
            .mount(&server)
            .await;

        let geo = geocoder_for(&server)
            .resolve("Trastevere, Rome")
            .await
            .unwrap()
            .unwrap();
        assert!((geo.lat - 41.8897).abs() < 1e-9);
        assert_eq!(geo.country.as_deref(), Some("Italy"));
        assert_eq!(geo.city.as_deref(), Some("Rome"));
        assert_eq!(geo.neighborhood.as_deref(), Some("Trastevere"));
    }

    #[tokio::test]
    async fn test_resolve_empty_results_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let result = geocoder_for(&server).resolve("Nowhereville").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_resolve_blank_input_skips_request() {
        let server = MockServer::start().await;
        let result = geocoder_for(&server).resolve("   ").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_resolve_town_falls_back_as_city() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "lat": "45.0",
                "lon": "7.0",
                "address": { "town": "Alba", "country": "Italy" }
            }])))
            .mount(&server)
            .await;

        let geo = geocoder_for(&server).resolve("Alba").await.unwrap().unwrap();
        assert_eq!(geo.city.as_deref(), Some("Alba"));
    }

    #[tokio::test]
    async fn test_resolve_server_error_is_geocoding_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = geocoder_for(&server).resolve("Rome").await.unwrap_err();
        assert!(matches!(err, Error::Geocoding(_)));
    }
}
