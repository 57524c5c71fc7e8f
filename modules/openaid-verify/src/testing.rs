//! Mock implementations of the verification seams.
//!
//! Deterministic, in-memory, no network. Tests wire these into the agent
//! to script exactly which checks pass.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{
    CrossRefMatch, CrossReference, GeocodeRequest, GeocodeResult, Geocoder, ProbeOutcome, WebProbe,
};

// ---------------------------------------------------------------------------
// MockProbe
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockProbe {
    reachable: HashSet<String>,
    pages: HashMap<String, String>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a URL as reachable.
    pub fn reachable(mut self, url: impl Into<String>) -> Self {
        self.reachable.insert(url.into());
        self
    }

    /// Serve this text for a URL's content fetch.
    pub fn with_page(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        let url = url.into();
        self.reachable.insert(url.clone());
        self.pages.insert(url, text.into());
        self
    }
}

#[async_trait]
impl WebProbe for MockProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        if self.reachable.contains(url) {
            ProbeOutcome {
                reachable: true,
                status: Some(200),
                final_url: None,
            }
        } else {
            ProbeOutcome {
                reachable: false,
                status: None,
                final_url: None,
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no page scripted for {url}"))
    }
}

// ---------------------------------------------------------------------------
// MockGeocoder
// ---------------------------------------------------------------------------

pub struct MockGeocoder {
    result: Option<GeocodeResult>,
}

impl MockGeocoder {
    /// Every lookup resolves to these coordinates.
    pub fn resolving(latitude: f64, longitude: f64, confidence: f32) -> Self {
        Self {
            result: Some(GeocodeResult {
                latitude,
                longitude,
                formatted_address: "scripted formatted address".to_string(),
                place_id: "mock-place".to_string(),
                county: Some("Hennepin County".to_string()),
                confidence,
            }),
        }
    }

    /// Every lookup fails.
    pub fn failing() -> Self {
        Self { result: None }
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, request: &GeocodeRequest) -> Result<GeocodeResult> {
        self.result
            .clone()
            .ok_or_else(|| anyhow!("no geocode scripted for {}", request.address))
    }
}

// ---------------------------------------------------------------------------
// MockCrossReference
// ---------------------------------------------------------------------------

pub struct MockCrossReference {
    name: String,
    outcome: Option<CrossRefMatch>,
}

impl MockCrossReference {
    /// Reports a match at the given score.
    pub fn matching(name: impl Into<String>, match_score: f32) -> Self {
        Self {
            name: name.into(),
            outcome: Some(CrossRefMatch {
                found: true,
                match_score: Some(match_score),
                url: None,
                data: None,
            }),
        }
    }

    /// Reports no match.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Some(CrossRefMatch::default()),
        }
    }

    /// Every lookup errors, as if the directory were down.
    pub fn erroring(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: None,
        }
    }

    /// Attach a field snapshot to the match for conflict detection.
    pub fn with_data(mut self, data: Value) -> Self {
        if let (Some(outcome), Value::Object(map)) = (self.outcome.as_mut(), data) {
            outcome.data = Some(map);
        }
        self
    }
}

#[async_trait]
impl CrossReference for MockCrossReference {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, _name: &str, _address: &str) -> Result<CrossRefMatch> {
        self.outcome
            .clone()
            .ok_or_else(|| anyhow!("directory {} is down", self.name))
    }
}
