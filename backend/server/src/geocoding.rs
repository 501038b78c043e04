//! Address lookups against a Google-compatible geocoding JSON API.
//!
//! Lookups never fail the caller. Reverse lookups degrade to the raw
//! coordinate label and forward lookups to `None`, with the cause logged.
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use tracker::geo::Coordinates;

pub const GOOGLE_GEOCODING_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

const STREET_ADDRESS: &str = "street_address";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeHit {
    pub coordinates: Coordinates,
    pub address: String,
}

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    formatted_address: String,
    #[serde(default)]
    types: Vec<String>,
    geometry: Geometry,
}

#[derive(Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

pub struct Geocoder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    language: String,
}

impl Geocoder {
    pub fn new(api_key: Option<String>, language: &str) -> Self {
        Self::with_base_url(GOOGLE_GEOCODING_URL, api_key, language)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>, language: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            language: language.to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn lookup(&self, param: (&str, String)) -> Option<Vec<GeocodeResult>> {
        let Some(key) = self.api_key.as_deref() else {
            warn!("Geocoding key not configured");
            return None;
        };

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                param,
                ("key", key.to_string()),
                ("language", self.language.clone()),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status());

        let body: GeocodeResponse = match response {
            Ok(response) => match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    error!("Malformed geocoding response: {e}");
                    return None;
                }
            },
            Err(e) => {
                error!("Geocoding request failed: {e}");
                return None;
            }
        };

        if body.status != "OK" || body.results.is_empty() {
            warn!(status = %body.status, "Geocoding returned no results");
            return None;
        }

        Some(body.results)
    }

    /// Human readable address for `coords`, or `"lat, lng"` when unavailable.
    pub async fn reverse(&self, coords: Coordinates) -> String {
        let latlng = format!("{},{}", coords.latitude, coords.longitude);

        let Some(results) = self.lookup(("latlng", latlng)).await else {
            return coords.raw_label();
        };

        results
            .iter()
            .find(|result| result.types.iter().any(|kind| kind == STREET_ADDRESS))
            .or_else(|| results.first())
            .map(|result| result.formatted_address.clone())
            .unwrap_or_else(|| coords.raw_label())
    }

    pub async fn forward(&self, address: &str) -> Option<GeocodeHit> {
        let results = self.lookup(("address", address.to_string())).await?;
        let first = results.into_iter().next()?;

        match Coordinates::new(first.geometry.location.lat, first.geometry.location.lng) {
            Ok(coordinates) => Some(GeocodeHit {
                coordinates,
                address: first.formatted_address,
            }),
            Err(e) => {
                warn!("Geocoding returned {e}");
                None
            }
        }
    }
}
