use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::types::{EventBatch, SeismicEvent};

/// How long an alerted event id is remembered, in hours.
pub const RETENTION_HOURS: i64 = 2;

/// Already-alerted event ids, keyed by id with the event's occurrence time.
pub type SeenSet = HashMap<String, DateTime<Utc>>;

/// Split a batch into genuinely new events and the next seen set.
///
/// New events are the sub-sequence of `batch.events` whose id is not in
/// `seen`, in original batch order. The returned set is rebuilt from the
/// batch alone: every event with `time > now - RETENTION` is retained,
/// everything else forgotten. An id absent from this batch is dropped even
/// if its event is still inside the horizon.
pub fn admit(batch: &EventBatch, seen: &SeenSet, now: DateTime<Utc>) -> (Vec<SeismicEvent>, SeenSet) {
    let new_events: Vec<SeismicEvent> = batch
        .events
        .iter()
        .filter(|event| !seen.contains_key(&event.id))
        .cloned()
        .collect();

    let cutoff = now - Duration::hours(RETENTION_HOURS);
    let updated: SeenSet = batch
        .events
        .iter()
        .filter(|event| event.time > cutoff)
        .map(|event| (event.id.clone(), event.time))
        .collect();

    (new_events, updated)
}
