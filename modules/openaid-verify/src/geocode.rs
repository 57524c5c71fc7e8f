//! Address resolution via the Google Maps Geocoding API.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::traits::{GeocodeRequest, GeocodeResult, Geocoder};

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GoogleGeocoder {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleGeocoder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: GEOCODE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Build the query string: the raw address enriched with whichever of
/// city/state/zip it does not already contain.
pub fn enrich_address(request: &GeocodeRequest) -> String {
    let mut out = request.address.clone();
    if let Some(city) = &request.city {
        if !out.to_lowercase().contains(&city.to_lowercase()) {
            out.push_str(", ");
            out.push_str(city);
        }
    }
    if let Some(state) = &request.state {
        if !out.to_lowercase().contains(&state.to_lowercase()) {
            out.push_str(", ");
            out.push_str(state);
        }
    }
    if let Some(zip) = &request.zip {
        if !out.contains(zip.as_str()) {
            out.push(' ');
            out.push_str(zip);
        }
    }
    out
}

// --- Wire types ---

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeRow>,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct GeocodeRow {
    formatted_address: String,
    place_id: String,
    geometry: Geometry,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Deserialize)]
struct Geometry {
    location: Location,
    location_type: String,
}

#[derive(Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct AddressComponent {
    long_name: String,
    types: Vec<String>,
}

fn confidence_for(location_type: &str) -> f32 {
    match location_type {
        "ROOFTOP" => 0.95,
        "RANGE_INTERPOLATED" => 0.8,
        "GEOMETRIC_CENTER" => 0.6,
        _ => 0.4,
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, request: &GeocodeRequest) -> Result<GeocodeResult> {
        let address = enrich_address(request);

        let response = self
            .http
            .get(&self.base_url)
            .timeout(GEOCODE_TIMEOUT)
            .query(&[("address", address.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("geocoder returned status {}", response.status()));
        }

        let body: GeocodeResponse = response.json().await?;
        if body.status != "OK" {
            return Err(anyhow!(
                "geocode failed ({}): {}",
                body.status,
                body.error_message.unwrap_or_default()
            ));
        }

        let row = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("geocode returned no results for {address}"))?;

        let county = row
            .address_components
            .iter()
            .find(|c| c.types.iter().any(|t| t == "administrative_area_level_2"))
            .map(|c| c.long_name.clone());

        debug!(
            address = address.as_str(),
            place_id = row.place_id.as_str(),
            "Geocode resolved"
        );

        Ok(GeocodeResult {
            latitude: row.geometry.location.lat,
            longitude: row.geometry.location.lng,
            formatted_address: row.formatted_address,
            place_id: row.place_id,
            county,
            confidence: confidence_for(&row.geometry.location_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrich_appends_missing_parts() {
        let req = GeocodeRequest {
            address: "1010 Currie Ave".to_string(),
            city: Some("Minneapolis".to_string()),
            state: Some("MN".to_string()),
            zip: Some("55403".to_string()),
        };
        assert_eq!(enrich_address(&req), "1010 Currie Ave, Minneapolis, MN 55403");
    }

    #[test]
    fn enrich_leaves_complete_address_alone() {
        let req = GeocodeRequest {
            address: "1010 Currie Ave, Minneapolis, MN 55403".to_string(),
            city: Some("Minneapolis".to_string()),
            state: Some("MN".to_string()),
            zip: Some("55403".to_string()),
        };
        assert_eq!(
            enrich_address(&req),
            "1010 Currie Ave, Minneapolis, MN 55403"
        );
    }

    #[test]
    fn rooftop_precision_scores_highest() {
        assert!(confidence_for("ROOFTOP") > confidence_for("RANGE_INTERPOLATED"));
        assert!(confidence_for("RANGE_INTERPOLATED") > confidence_for("APPROXIMATE"));
    }
}
