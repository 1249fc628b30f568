use std::time::Duration;

use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::transport::MeshTransport;
use crate::types::SeismicEvent;

/// Magnitude above which (strictly) a text alert accompanies the
/// announcement and position packets.
pub const TEXT_ALERT_THRESHOLD: f64 = 3.5;

/// Maximum length of the long node label derived from the place name.
const MAX_LONG_LABEL: usize = 20;

/// Altitude floor/ceiling in meters for the position packet.
const MIN_ALTITUDE_M: f64 = -10000.0;
const MAX_ALTITUDE_M: f64 = 0.0;

/// Sentinel rendered when an occurrence timestamp cannot be converted.
const UNKNOWN_TIME: &str = "Unknown time";

/// Result of dispatching one event to the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every send reached the transport.
    Sent,
    /// At least one send succeeded and at least one failed.
    SentPartially(String),
    /// Nothing reached the transport.
    Skipped(String),
}

/// Sends the up-to-three packets for each new event, spacing sends with a
/// pacing delay to respect the transport's duty-cycle constraints.
///
/// Transport failures are caught and logged here; dispatch always returns
/// normally so one failed alert never aborts the poll cycle.
pub struct AlertDispatcher<T> {
    transport: T,
    pacing: Duration,
}

impl<T: MeshTransport> AlertDispatcher<T> {
    pub fn new(transport: T, pacing: Duration) -> Self {
        Self { transport, pacing }
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn dispatch(&self, event: &SeismicEvent) -> DispatchOutcome {
        let token = alert_token(event.magnitude, &event.place, event.time_ms());
        let long_label = truncate_label(&event.place, MAX_LONG_LABEL);
        let short_label = format!("{}", event.magnitude);

        let mut sent = 0usize;
        let mut failures: Vec<String> = Vec::new();

        self.attempt(
            "announce",
            self.transport
                .announce_identity(&token, &long_label, &short_label),
            &mut sent,
            &mut failures,
        )
        .await;

        if event.magnitude > TEXT_ALERT_THRESHOLD {
            let message = format_alert_message(event);
            self.attempt(
                "text",
                self.transport.send_text(&message),
                &mut sent,
                &mut failures,
            )
            .await;
        }

        let altitude = clamp_altitude_m(event.depth);
        self.attempt(
            "position",
            self.transport
                .send_position(event.latitude, event.longitude, altitude),
            &mut sent,
            &mut failures,
        )
        .await;

        if failures.is_empty() {
            info!(
                "Sent alert for M{:.1} at {} (node !{token})",
                event.magnitude, event.place
            );
            DispatchOutcome::Sent
        } else if sent > 0 {
            DispatchOutcome::SentPartially(failures.join("; "))
        } else {
            DispatchOutcome::Skipped(failures.join("; "))
        }
    }

    /// Run one transport send, swallowing any error. The pacing delay
    /// follows every attempt, success or not.
    async fn attempt(
        &self,
        what: &str,
        send: impl Future<Output = Result<(), crate::transport::TransportError>>,
        sent: &mut usize,
        failures: &mut Vec<String>,
    ) {
        match send.await {
            Ok(()) => *sent += 1,
            Err(e) => {
                warn!("transport error during {what}: {e}");
                failures.push(format!("{what}: {e}"));
            }
        }
        if !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }
    }
}

/// Stable per-alert identity token: SHA-256 over magnitude, place, and
/// occurrence time, truncated to 8 hex chars. Deterministic for identical
/// inputs; unrelated to the feed id.
pub fn alert_token(magnitude: f64, place: &str, when_ms: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{magnitude}{place}{when_ms}").as_bytes());
    let digest = hasher.finalize();
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// Truncate a label on a char boundary.
pub fn truncate_label(label: &str, max_chars: usize) -> String {
    label.chars().take(max_chars).collect()
}

/// Position-packet altitude: depth in km, negated into meters and clamped
/// to `[-10000, 0]`, rounded to an integer.
pub fn clamp_altitude_m(depth_km: f64) -> i32 {
    (-(depth_km * 1000.0)).clamp(MIN_ALTITUDE_M, MAX_ALTITUDE_M).round() as i32
}

/// Render an epoch-milliseconds occurrence time for the alert text,
/// substituting a sentinel when the value is unrepresentable.
pub fn format_alert_time(when_ms: i64) -> String {
    match Utc.timestamp_millis_opt(when_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => {
            warn!("Invalid alert timestamp {when_ms}");
            UNKNOWN_TIME.to_string()
        }
    }
}

/// Human-readable multi-line alert body.
pub fn format_alert_message(event: &SeismicEvent) -> String {
    format!(
        "🚨 EARTHQUAKE ALERT 🚨\n{}\n{}\nMag: {:.1} Depth: {:.1} km",
        format_alert_time(event.time_ms()),
        event.place,
        event.magnitude,
        event.depth,
    )
}
