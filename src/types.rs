use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// A single seismic event as reported by the feed.
///
/// `id` is the sole identity key: two fetch results with the same id refer
/// to the same physical event even when other fields drift between polls
/// (e.g. status upgraded from automatic to reviewed).
#[derive(Debug, Clone, PartialEq)]
pub struct SeismicEvent {
    pub id: String,
    pub magnitude: f64,
    pub place: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Depth in kilometers. Non-negative by convention, not enforced upstream.
    pub depth: f64,
    pub kind: String,
    pub status: String,
    pub url: String,
    pub felt_reports: Option<u32>,
}

/// One batch of events as returned by a single feed query.
///
/// `events` is in feed order (not guaranteed sorted by time) and is the
/// ground truth for iteration; `count` is the feed's declared total, kept
/// for reporting only.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub events: Vec<SeismicEvent>,
    pub count: u32,
    pub generated: DateTime<Utc>,
}

/// Raw GeoJSON feature collection as served by the FDSN event endpoint.
#[derive(Debug, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub metadata: FeedMetadata,
    #[serde(default)]
    pub features: Vec<Feature>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedMetadata {
    /// Batch generation time in epoch milliseconds.
    #[serde(default)]
    pub generated: i64,
    pub count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct Feature {
    pub id: String,
    #[serde(default)]
    pub properties: FeatureProperties,
    pub geometry: Geometry,
}

#[derive(Debug, Default, Deserialize)]
pub struct FeatureProperties {
    pub mag: Option<f64>,
    pub place: Option<String>,
    /// Event time in epoch milliseconds.
    pub time: Option<i64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub url: Option<String>,
    pub felt: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct Geometry {
    /// `[longitude, latitude, depth_km]`
    pub coordinates: [f64; 3],
}

/// Convert epoch milliseconds to a UTC instant, falling back to the epoch
/// itself when the value is unrepresentable.
fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

impl SeismicEvent {
    /// Build an event from a raw GeoJSON feature. Missing optional
    /// properties normalize the same way the feed's own viewers do:
    /// magnitude 0, empty strings, epoch time.
    pub fn from_feature(feature: Feature) -> Self {
        let props = feature.properties;
        let [longitude, latitude, depth] = feature.geometry.coordinates;
        Self {
            id: feature.id,
            magnitude: props.mag.unwrap_or(0.0),
            place: props.place.unwrap_or_default(),
            time: millis_to_utc(props.time.unwrap_or(0)),
            latitude,
            longitude,
            depth,
            kind: props.kind.unwrap_or_default(),
            status: props.status.unwrap_or_default(),
            url: props.url.unwrap_or_default(),
            felt_reports: props.felt,
        }
    }

    /// Occurrence time in epoch milliseconds.
    pub fn time_ms(&self) -> i64 {
        self.time.timestamp_millis()
    }
}

impl EventBatch {
    /// Build a batch from a decoded GeoJSON feature collection. The
    /// declared count falls back to the feature count when absent.
    pub fn from_geojson(raw: FeatureCollection) -> Self {
        let generated = millis_to_utc(raw.metadata.generated);
        let declared = raw.metadata.count;
        let events: Vec<SeismicEvent> = raw
            .features
            .into_iter()
            .map(SeismicEvent::from_feature)
            .collect();
        Self {
            count: declared.unwrap_or(events.len() as u32),
            events,
            generated,
        }
    }
}
