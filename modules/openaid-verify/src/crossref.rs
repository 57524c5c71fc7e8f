//! Cross-reference sources: external directories queried to corroborate
//! a candidate's existence and compare observed field values.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::conflict::name_similarity;
use crate::traits::{CrossRefMatch, CrossReference};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Google Places
// ---------------------------------------------------------------------------

const PLACES_URL: &str = "https://maps.googleapis.com/maps/api/place/textsearch/json";

/// A text-search result counts as a match when its name is at least this
/// similar to the candidate's.
const PLACES_MATCH_THRESHOLD: f32 = 0.5;

pub struct GooglePlacesSource {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GooglePlacesSource {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: PLACES_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct PlacesResponse {
    status: String,
    #[serde(default)]
    results: Vec<PlaceRow>,
}

#[derive(Deserialize)]
struct PlaceRow {
    name: String,
    #[serde(default)]
    formatted_address: Option<String>,
    place_id: String,
    geometry: Option<PlaceGeometry>,
}

#[derive(Deserialize)]
struct PlaceGeometry {
    location: PlaceLocation,
}

#[derive(Deserialize)]
struct PlaceLocation {
    lat: f64,
    lng: f64,
}

#[async_trait]
impl CrossReference for GooglePlacesSource {
    fn name(&self) -> &str {
        "google_places"
    }

    async fn lookup(&self, name: &str, address: &str) -> Result<CrossRefMatch> {
        let query = format!("{name} {address}");

        let response = self
            .http
            .get(&self.base_url)
            .timeout(LOOKUP_TIMEOUT)
            .query(&[("query", query.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("places returned status {}", response.status()));
        }

        let body: PlacesResponse = response.json().await?;
        if body.status == "ZERO_RESULTS" {
            return Ok(CrossRefMatch::default());
        }
        if body.status != "OK" {
            return Err(anyhow!("places lookup failed: {}", body.status));
        }

        let Some(row) = body.results.into_iter().next() else {
            return Ok(CrossRefMatch::default());
        };

        let score = name_similarity(name, &row.name);
        debug!(query = query.as_str(), score, "Places lookup scored");
        if score < PLACES_MATCH_THRESHOLD {
            return Ok(CrossRefMatch::default());
        }

        let mut data = serde_json::Map::new();
        data.insert("name".to_string(), Value::String(row.name));
        if let Some(addr) = row.formatted_address {
            data.insert("address".to_string(), Value::String(addr));
        }
        if let Some(geometry) = row.geometry {
            data.insert("latitude".to_string(), json!(geometry.location.lat));
            data.insert("longitude".to_string(), json!(geometry.location.lng));
        }

        Ok(CrossRefMatch {
            found: true,
            match_score: Some(score),
            url: Some(format!(
                "https://www.google.com/maps/place/?q=place_id:{}",
                row.place_id
            )),
            data: Some(data),
        })
    }
}

// ---------------------------------------------------------------------------
// Civic directory
// ---------------------------------------------------------------------------

/// Generic JSON directory speaking the lookup protocol directly:
/// `GET {base}/lookup?name=..&address=..` →
/// `{found, match_score?, url?, data?}`.
pub struct CivicDirectorySource {
    http: reqwest::Client,
    base_url: String,
    source_name: String,
}

impl CivicDirectorySource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            source_name: "civic_directory".to_string(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }
}

#[derive(Deserialize)]
struct DirectoryResponse {
    found: bool,
    match_score: Option<f32>,
    url: Option<String>,
    data: Option<serde_json::Map<String, Value>>,
}

#[async_trait]
impl CrossReference for CivicDirectorySource {
    fn name(&self) -> &str {
        &self.source_name
    }

    async fn lookup(&self, name: &str, address: &str) -> Result<CrossRefMatch> {
        let url = format!("{}/lookup", self.base_url.trim_end_matches('/'));

        let response = self
            .http
            .get(&url)
            .timeout(LOOKUP_TIMEOUT)
            .query(&[("name", name), ("address", address)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "directory {} returned status {}",
                self.source_name,
                response.status()
            ));
        }

        let body: DirectoryResponse = response.json().await?;
        Ok(CrossRefMatch {
            found: body.found,
            match_score: body.match_score,
            url: body.url,
            data: body.data,
        })
    }
}
