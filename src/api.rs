use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::USGS_HOST;
use crate::config::BoundsConfig;
use crate::types::{EventBatch, FeatureCollection};

/// Errors raised by a feed fetch. None of these are fatal to the process;
/// the poll loop logs them and skips the cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed unreachable: {0}")]
    Unreachable(String),
    #[error("feed returned HTTP {0}")]
    BadStatus(u16),
    #[error("malformed feed payload: {0}")]
    MalformedPayload(String),
}

/// Parameters for one feed query. The geographic bounding box is fixed at
/// client construction; these vary per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedQuery {
    pub min_magnitude: f64,
    pub start_time: DateTime<Utc>,
    pub limit: u32,
}

/// Source of seismic event batches. Stateless and idempotent per call.
#[async_trait]
pub trait EventFeed {
    async fn fetch(&self, query: &FeedQuery) -> Result<EventBatch, FetchError>;
}

/// Feed client for the USGS FDSN event service.
pub struct UsgsClient {
    http: reqwest::Client,
    host: String,
    bounds: BoundsConfig,
}

impl UsgsClient {
    pub fn new(host: impl Into<String>, bounds: BoundsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into(),
            bounds,
        }
    }

    /// Build the full query URL for the given parameters.
    fn query_url(&self, query: &FeedQuery) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("https://{}/fdsnws/event/1/query", self.host))
            .map_err(|e| FetchError::Unreachable(format!("invalid feed host: {e}")))?;
        url.query_pairs_mut()
            .append_pair("format", "geojson")
            .append_pair("minlatitude", &self.bounds.min_latitude.to_string())
            .append_pair("minlongitude", &self.bounds.min_longitude.to_string())
            .append_pair("maxlatitude", &self.bounds.max_latitude.to_string())
            .append_pair("maxlongitude", &self.bounds.max_longitude.to_string())
            .append_pair("minmagnitude", &query.min_magnitude.to_string())
            .append_pair(
                "starttime",
                &query
                    .start_time
                    .format("%Y-%m-%dT%H:%M:%S+00:00")
                    .to_string(),
            )
            .append_pair("limit", &query.limit.to_string());
        Ok(url)
    }
}

impl Default for UsgsClient {
    fn default() -> Self {
        Self::new(USGS_HOST, BoundsConfig::default())
    }
}

#[async_trait]
impl EventFeed for UsgsClient {
    async fn fetch(&self, query: &FeedQuery) -> Result<EventBatch, FetchError> {
        let url = self.query_url(query)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        let raw: FeatureCollection = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;

        let batch = EventBatch::from_geojson(raw);
        debug!("Fetched {} events (declared {})", batch.events.len(), batch.count);
        Ok(batch)
    }
}
