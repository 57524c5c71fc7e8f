// Trait abstractions for the Verification Agent's external dependencies.
//
// Geocoder, WebProbe, and CrossReference each sit in front of a real
// network service. The agent only sees the traits, so tests run against
// mocks: no network, no API keys, no Docker.

use anyhow::Result;
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Geocoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GeocodeRequest {
    pub address: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeocodeResult {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted_address: String,
    pub place_id: String,
    pub county: Option<String>,
    /// 0.0–1.0, derived from the provider's location precision.
    pub confidence: f32,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve an address to coordinates. Err means the address did not
    /// resolve; callers treat that as a failed check, not a fatal error.
    async fn geocode(&self, request: &GeocodeRequest) -> Result<GeocodeResult>;
}

// ---------------------------------------------------------------------------
// WebProbe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub status: Option<u16>,
    /// URL after redirects, when it differs from the input.
    pub final_url: Option<String>,
}

#[async_trait]
pub trait WebProbe: Send + Sync {
    /// Bounded-timeout reachability probe. Network failure is an
    /// unreachable outcome, never an Err.
    async fn probe(&self, url: &str) -> ProbeOutcome;

    /// Fetch a page and reduce it to plain text for content judgment.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// CrossReference
// ---------------------------------------------------------------------------

/// What one external directory reports for a name+address lookup.
#[derive(Debug, Clone, Default)]
pub struct CrossRefMatch {
    pub found: bool,
    pub match_score: Option<f32>,
    pub url: Option<String>,
    /// Field-level snapshot for conflict comparison, when the source
    /// exposes one. Values keep their JSON types so numeric fields can be
    /// compared with tolerance.
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
}

#[async_trait]
pub trait CrossReference: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(&self, name: &str, address: &str) -> Result<CrossRefMatch>;
}
