use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::api::{EventFeed, FeedQuery};
use crate::dispatch::{AlertDispatcher, DispatchOutcome};
use crate::tracker::{self, SeenSet};
use crate::transport::MeshTransport;

/// Lookback window for the very first feed query, in hours. Wide so a
/// fresh process reports the recent past once.
pub const FIRST_LOOKBACK_HOURS: i64 = 72;

/// Lookback window for every subsequent query, in hours.
pub const STEADY_LOOKBACK_HOURS: i64 = 1;

/// New events at or above this magnitude are counted in the per-cycle
/// significant-event summary.
const SIGNIFICANT_MAGNITUDE: f64 = 4.0;

/// Granularity at which the sleeping state re-checks the shutdown signal,
/// bounding cancellation latency to about a second.
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Cooperative cancellation flag. Cloneable; `request` is safe to call
/// from a signal-handler task.
#[derive(Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-cycle query parameters and cadence.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub min_magnitude: f64,
    pub limit: u32,
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_magnitude: 2.0,
            limit: 50,
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// The monitoring loop: fetch a batch, admit new events, dispatch alerts,
/// sleep. Owns all loop state; one sequential worker, no overlap between
/// cycles.
pub struct QuakeMonitor<F, T> {
    feed: F,
    dispatcher: AlertDispatcher<T>,
    config: MonitorConfig,
    shutdown: ShutdownSignal,
    seen: SeenSet,
    first_cycle: bool,
}

impl<F: EventFeed, T: MeshTransport> QuakeMonitor<F, T> {
    pub fn new(
        feed: F,
        dispatcher: AlertDispatcher<T>,
        config: MonitorConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            feed,
            dispatcher,
            config,
            shutdown,
            seen: SeenSet::new(),
            first_cycle: true,
        }
    }

    /// Run until the shutdown signal is observed. Only cancellation stops
    /// the loop; fetch and dispatch errors are logged and survived.
    pub async fn run(mut self) {
        info!(
            "Entering polling loop (interval: {}s). Press Ctrl+C to stop.",
            self.config.poll_interval.as_secs()
        );
        while !self.shutdown.is_requested() {
            self.cycle().await;
            if !self.sleep_between_cycles().await {
                break;
            }
        }
        info!("Monitor stopped");
    }

    /// One poll cycle: fetch, admit, dispatch. A fetch failure abandons
    /// the cycle with the seen set untouched.
    async fn cycle(&mut self) {
        let lookback_hours = if self.first_cycle {
            FIRST_LOOKBACK_HOURS
        } else {
            STEADY_LOOKBACK_HOURS
        };
        // Flips on the attempt, not on success.
        self.first_cycle = false;

        let now = Utc::now();
        let query = FeedQuery {
            min_magnitude: self.config.min_magnitude,
            start_time: now - chrono::Duration::hours(lookback_hours),
            limit: self.config.limit,
        };

        let batch = match self.feed.fetch(&query).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("feed error: {e}");
                return;
            }
        };

        info!(
            "Found {} event(s) in the last {}h (tracking {} id(s))",
            batch.events.len(),
            lookback_hours,
            self.seen.len()
        );

        let (new_events, updated) = tracker::admit(&batch, &self.seen, now);
        // Replace before dispatching: an id counts as alerted the moment
        // its dispatch is initiated, giving at-most-once-attempt semantics.
        self.seen = updated;

        if new_events.is_empty() {
            info!("No new events detected");
            return;
        }
        info!("New events detected: {}", new_events.len());

        for event in &new_events {
            if self.shutdown.is_requested() {
                info!("Shutdown requested, stopping dispatch burst");
                return;
            }
            info!(
                "M{:.1} | {} | {:.3}, {:.3} | depth {:.1} km | {}",
                event.magnitude,
                event.place,
                event.latitude,
                event.longitude,
                event.depth,
                event.status,
            );
            match self.dispatcher.dispatch(event).await {
                DispatchOutcome::Sent => {}
                DispatchOutcome::SentPartially(reason) => {
                    warn!("Alert for {} sent partially: {reason}", event.id);
                }
                DispatchOutcome::Skipped(reason) => {
                    warn!("Alert for {} skipped: {reason}", event.id);
                }
            }
        }

        let significant = new_events
            .iter()
            .filter(|e| e.magnitude >= SIGNIFICANT_MAGNITUDE)
            .count();
        if significant > 0 {
            info!("{significant} significant event(s) (M >= {SIGNIFICANT_MAGNITUDE:.1}) in this batch");
        }
    }

    /// Sleep one poll interval in short slices, watching the shutdown
    /// signal. Returns false when shutdown was observed.
    async fn sleep_between_cycles(&self) -> bool {
        let slices = self.config.poll_interval.as_secs();
        for _ in 0..slices {
            if self.shutdown.is_requested() {
                return false;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
        !self.shutdown.is_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FetchError;
    use crate::transport::TransportError;
    use crate::types::{EventBatch, SeismicEvent};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedFeed {
        queries: Mutex<Vec<FeedQuery>>,
        responses: Mutex<VecDeque<Result<EventBatch, FetchError>>>,
    }

    impl ScriptedFeed {
        fn new(responses: Vec<Result<EventBatch, FetchError>>) -> Self {
            Self {
                queries: Mutex::new(Vec::new()),
                responses: Mutex::new(responses.into()),
            }
        }

        fn queries(&self) -> Vec<FeedQuery> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventFeed for ScriptedFeed {
        async fn fetch(&self, query: &FeedQuery) -> Result<EventBatch, FetchError> {
            self.queries.lock().unwrap().push(query.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Unreachable("script exhausted".into())))
        }
    }

    /// Counts sends; fails every call while `attempts < fail_first`.
    #[derive(Default)]
    struct CountingTransport {
        positions: Mutex<Vec<(f64, f64)>>,
        announces: AtomicUsize,
        attempts: AtomicUsize,
        fail_first: usize,
    }

    impl CountingTransport {
        fn check(&self) -> Result<(), TransportError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(TransportError::Io(std::io::Error::other("radio offline")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MeshTransport for CountingTransport {
        async fn announce_identity(
            &self,
            _token: &str,
            _long_label: &str,
            _short_label: &str,
        ) -> Result<(), TransportError> {
            self.check()?;
            self.announces.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_text(&self, _message: &str) -> Result<(), TransportError> {
            self.check()
        }

        async fn send_position(
            &self,
            latitude: f64,
            longitude: f64,
            _altitude_m: i32,
        ) -> Result<(), TransportError> {
            self.check()?;
            self.positions.lock().unwrap().push((latitude, longitude));
            Ok(())
        }
    }

    fn make_event(id: &str, magnitude: f64, time: DateTime<Utc>) -> SeismicEvent {
        SeismicEvent {
            id: id.to_string(),
            magnitude,
            place: format!("near {id}"),
            time,
            latitude: 34.0,
            longitude: -118.0,
            depth: 5.0,
            kind: "earthquake".to_string(),
            status: "automatic".to_string(),
            url: String::new(),
            felt_reports: None,
        }
    }

    fn make_batch(events: Vec<SeismicEvent>) -> EventBatch {
        EventBatch {
            count: events.len() as u32,
            events,
            generated: Utc::now(),
        }
    }

    fn make_monitor(
        responses: Vec<Result<EventBatch, FetchError>>,
        transport: CountingTransport,
    ) -> QuakeMonitor<ScriptedFeed, CountingTransport> {
        QuakeMonitor::new(
            ScriptedFeed::new(responses),
            AlertDispatcher::new(transport, Duration::ZERO),
            MonitorConfig::default(),
            ShutdownSignal::new(),
        )
    }

    fn lookback_minutes(query: &FeedQuery) -> i64 {
        (Utc::now() - query.start_time).num_minutes()
    }

    #[tokio::test]
    async fn first_cycle_uses_wide_window_then_narrow() {
        let mut monitor = make_monitor(
            vec![Ok(make_batch(vec![])), Ok(make_batch(vec![]))],
            CountingTransport::default(),
        );

        monitor.cycle().await;
        monitor.cycle().await;

        let queries = monitor.feed.queries();
        assert_eq!(queries.len(), 2);
        let first = lookback_minutes(&queries[0]);
        let second = lookback_minutes(&queries[1]);
        assert!((4319..=4321).contains(&first), "first lookback {first}min");
        assert!((59..=61).contains(&second), "second lookback {second}min");
    }

    #[tokio::test]
    async fn first_cycle_flag_flips_even_on_fetch_failure() {
        let mut monitor = make_monitor(
            vec![
                Err(FetchError::BadStatus(503)),
                Ok(make_batch(vec![])),
            ],
            CountingTransport::default(),
        );

        monitor.cycle().await;
        monitor.cycle().await;

        let queries = monitor.feed.queries();
        let second = lookback_minutes(&queries[1]);
        assert!((59..=61).contains(&second), "second lookback {second}min");
    }

    #[tokio::test]
    async fn fetch_failure_leaves_seen_set_untouched() {
        let mut monitor = make_monitor(
            vec![Err(FetchError::Unreachable("down".into()))],
            CountingTransport::default(),
        );
        monitor
            .seen
            .insert("kept".to_string(), Utc::now() - ChronoDuration::minutes(10));

        monitor.cycle().await;

        assert!(monitor.seen.contains_key("kept"));
    }

    #[tokio::test]
    async fn query_carries_configured_filters() {
        let mut monitor = QuakeMonitor::new(
            ScriptedFeed::new(vec![Ok(make_batch(vec![]))]),
            AlertDispatcher::new(CountingTransport::default(), Duration::ZERO),
            MonitorConfig {
                min_magnitude: 3.0,
                limit: 25,
                poll_interval: Duration::from_secs(1),
            },
            ShutdownSignal::new(),
        );

        monitor.cycle().await;

        let queries = monitor.feed.queries();
        assert_eq!(queries[0].min_magnitude, 3.0);
        assert_eq!(queries[0].limit, 25);
    }

    #[tokio::test]
    async fn repeated_batch_dispatches_only_once() {
        let now = Utc::now();
        let batch = make_batch(vec![
            make_event("q1", 2.5, now - ChronoDuration::minutes(10)),
            make_event("q2", 2.5, now - ChronoDuration::minutes(5)),
        ]);
        let mut monitor = make_monitor(
            vec![Ok(batch.clone()), Ok(batch)],
            CountingTransport::default(),
        );

        monitor.cycle().await;
        monitor.cycle().await;

        assert_eq!(monitor.dispatcher.transport().announces.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispatch_failure_does_not_stop_later_events() {
        let now = Utc::now();
        let batch = make_batch(vec![
            make_event("fails", 5.0, now - ChronoDuration::minutes(10)),
            make_event("works", 5.0, now - ChronoDuration::minutes(5)),
        ]);
        // First event needs announce + text + position: fail all three.
        let mut monitor = make_monitor(
            vec![Ok(batch)],
            CountingTransport {
                fail_first: 3,
                ..CountingTransport::default()
            },
        );

        monitor.cycle().await;

        // Second event still dispatched...
        let positions = monitor.dispatcher.transport().positions.lock().unwrap().clone();
        assert_eq!(positions, vec![(34.0, -118.0)]);
        // ...and the seen set was updated from the full batch.
        assert!(monitor.seen.contains_key("fails"));
        assert!(monitor.seen.contains_key("works"));
    }

    #[tokio::test]
    async fn stale_batch_event_not_retained_in_seen() {
        let now = Utc::now();
        let batch = make_batch(vec![make_event("old", 2.5, now - ChronoDuration::hours(3))]);
        let mut monitor = make_monitor(vec![Ok(batch)], CountingTransport::default());

        monitor.cycle().await;

        // Alerted (it was new) but aged straight out of the seen set.
        assert_eq!(monitor.dispatcher.transport().announces.load(Ordering::SeqCst), 1);
        assert!(!monitor.seen.contains_key("old"));
    }

    #[tokio::test]
    async fn shutdown_short_circuits_sleep() {
        let monitor = make_monitor(vec![], CountingTransport::default());
        monitor.shutdown.request();
        assert!(!monitor.sleep_between_cycles().await);
    }

    #[tokio::test]
    async fn run_exits_when_shutdown_pre_requested() {
        let monitor = make_monitor(vec![], CountingTransport::default());
        let shutdown = monitor.shutdown.clone();
        shutdown.request();
        monitor.run().await;
    }

    #[tokio::test]
    async fn shutdown_checked_between_dispatches() {
        let now = Utc::now();
        let batch = make_batch(vec![
            make_event("first", 2.5, now - ChronoDuration::minutes(10)),
            make_event("second", 2.5, now - ChronoDuration::minutes(5)),
        ]);
        let mut monitor = make_monitor(vec![Ok(batch)], CountingTransport::default());
        // Requested before the cycle: the burst stops before any dispatch.
        monitor.shutdown.request();

        monitor.cycle().await;

        assert_eq!(monitor.dispatcher.transport().announces.load(Ordering::SeqCst), 0);
        // The seen set was still replaced from the batch.
        assert!(monitor.seen.contains_key("first"));
    }
}
