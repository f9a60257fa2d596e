//! Session aggregation.
//!
//! Raw listener connections are clamped to the report window and either
//! passed through one-to-one or merged per identity hash into a single
//! session with a union of connection intervals.

use std::collections::HashMap;

use crate::enrich::{Enrich, ListenerDetails};
use crate::error::ReportError;
use crate::event::RawEvent;
use crate::interval::{Interval, union_seconds};
use crate::window::Window;

/// One listener in the finished report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub details: ListenerDetails,
    /// Clamped intervals in the order they were observed.
    pub intervals: Vec<Interval>,
    pub connected_on: i64,
    pub connected_until: i64,
    /// Seconds covered by the union of `intervals`.
    pub connected_seconds: i64,
}

impl SessionRecord {
    fn single(details: ListenerDetails, interval: Interval) -> Self {
        Self {
            details,
            intervals: vec![interval],
            connected_on: interval.start,
            connected_until: interval.end,
            connected_seconds: interval.seconds(),
        }
    }
}

/// A session still collecting intervals.
struct Accumulator {
    details: ListenerDetails,
    intervals: Vec<Interval>,
}

impl Accumulator {
    fn finish(self, now: i64) -> SessionRecord {
        let connected_on = self.intervals.iter().fold(now, |acc, i| acc.min(i.start));
        let connected_until = self.intervals.iter().fold(0, |acc, i| acc.max(i.end));
        let connected_seconds = union_seconds(&self.intervals);
        SessionRecord {
            details: self.details,
            intervals: self.intervals,
            connected_on,
            connected_until,
            connected_seconds,
        }
    }
}

/// Builds session records from a stream of raw events.
///
/// `events` must be ordered by start time. With `dedupe` off, every event
/// becomes its own record in input order. With `dedupe` on, events sharing an
/// identity hash collapse into one record, emitted in first-seen order.
/// Either way `enricher` runs once per emitted record.
///
/// The first error from `events` or `enricher` aborts aggregation.
pub fn aggregate<I, E>(
    events: I,
    window: &Window,
    dedupe: bool,
    enricher: &E,
) -> Result<Vec<SessionRecord>, ReportError>
where
    I: IntoIterator<Item = Result<RawEvent, ReportError>>,
    E: Enrich + ?Sized,
{
    if !dedupe {
        let mut records = Vec::new();
        for event in events {
            let event = event?;
            let interval = window.clamp(&event);
            records.push(SessionRecord::single(enricher.enrich(&event)?, interval));
        }
        tracing::debug!(records = records.len(), "listed raw listener sessions");
        return Ok(records);
    }

    let mut sessions: Vec<Accumulator> = Vec::new();
    let mut by_hash: HashMap<String, usize> = HashMap::new();
    let mut seen = 0_usize;

    for event in events {
        let event = event?;
        seen += 1;
        let interval = window.clamp(&event);

        if let Some(&slot) = by_hash.get(&event.identity_hash) {
            sessions[slot].intervals.push(interval);
            continue;
        }

        let details = enricher.enrich(&event)?;
        by_hash.insert(event.identity_hash, sessions.len());
        sessions.push(Accumulator {
            details,
            intervals: vec![interval],
        });
    }

    tracing::debug!(
        events = seen,
        listeners = sessions.len(),
        "merged listener sessions"
    );

    let now = window.now;
    Ok(sessions.into_iter().map(|s| s.finish(now)).collect())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::enrich::{Location, UNKNOWN_CLIENT};
    use crate::event::MountRef;
    use crate::window::WindowMode;

    /// Enricher that counts its calls.
    #[derive(Default)]
    struct CountingEnricher {
        calls: Cell<usize>,
    }

    impl Enrich for CountingEnricher {
        fn enrich(&self, event: &RawEvent) -> Result<ListenerDetails, ReportError> {
            self.calls.set(self.calls.get() + 1);
            Ok(ListenerDetails {
                ip: event.ip.clone(),
                user_agent: event.user_agent.clone(),
                hash: event.identity_hash.clone(),
                client: UNKNOWN_CLIENT.to_string(),
                is_mobile: false,
                mount: None,
                location: Location::Failure { message: None },
            })
        }
    }

    fn ev(hash: &str, start: i64, end: i64) -> Result<RawEvent, ReportError> {
        Ok(RawEvent {
            identity_hash: hash.to_string(),
            ip: format!("198.51.100.{start}"),
            user_agent: "Test/1.0".into(),
            mount_ref: MountRef::None,
            interval_start: start,
            interval_end: end,
        })
    }

    fn historical(start: i64, end: i64) -> Window {
        Window {
            mode: WindowMode::Historical,
            start,
            end,
            label: "test".into(),
            now: end,
        }
    }

    #[test]
    fn dedupe_merges_overlapping_connections() {
        let enricher = CountingEnricher::default();
        let events = vec![ev("a", 100, 200), ev("a", 150, 300)];

        let records = aggregate(events, &historical(0, 1000), true, &enricher).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(
            record.intervals,
            vec![Interval::new(100, 200), Interval::new(150, 300)]
        );
        assert_eq!(record.connected_on, 100);
        assert_eq!(record.connected_until, 300);
        assert_eq!(record.connected_seconds, 200);
    }

    #[test]
    fn raw_mode_keeps_each_connection() {
        let enricher = CountingEnricher::default();
        let events = vec![ev("a", 100, 200), ev("a", 150, 300)];

        let records = aggregate(events, &historical(0, 1000), false, &enricher).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].connected_seconds, 100);
        assert_eq!(records[1].connected_seconds, 150);
        assert_eq!(records[1].connected_on, 150);
        assert_eq!(records[1].connected_until, 300);
        assert!(records.iter().all(|r| r.intervals.len() == 1));
    }

    #[test]
    fn live_session_runs_to_now() {
        let enricher = CountingEnricher::default();
        let records = aggregate(vec![ev("a", 50, 0)], &Window::live(1000), true, &enricher).unwrap();

        assert_eq!(records[0].connected_on, 50);
        assert_eq!(records[0].connected_until, 1000);
        assert_eq!(records[0].connected_seconds, 950);
    }

    #[test]
    fn live_ignores_stored_end() {
        let enricher = CountingEnricher::default();
        let events = vec![ev("a", 50, 0), ev("b", 60, 70), ev("c", 900, 0)];
        let records = aggregate(events, &Window::live(1000), false, &enricher).unwrap();
        assert!(records.iter().all(|r| r.connected_until == 1000));
    }

    #[test]
    fn historical_intervals_stay_inside_window() {
        let enricher = CountingEnricher::default();
        let window = historical(100, 500);
        let build = || {
            vec![
                ev("a", 20, 150),
                ev("b", 120, 0),
                ev("a", 400, 900),
                ev("c", 200, 300),
            ]
        };

        for dedupe in [true, false] {
            let records = aggregate(build(), &window, dedupe, &enricher).unwrap();
            for interval in records.iter().flat_map(|r| &r.intervals) {
                assert!(interval.start >= window.start, "{interval:?}");
                assert!(interval.end <= window.end, "{interval:?}");
            }
        }
    }

    #[test]
    fn dedupe_emits_one_record_per_hash_in_first_seen_order() {
        let enricher = CountingEnricher::default();
        let events = vec![
            ev("b", 10, 20),
            ev("a", 15, 40),
            ev("b", 30, 50),
            ev("c", 35, 45),
            ev("a", 60, 70),
        ];

        let records = aggregate(events, &historical(0, 100), true, &enricher).unwrap();

        let hashes: Vec<_> = records.iter().map(|r| r.details.hash.as_str()).collect();
        assert_eq!(hashes, ["b", "a", "c"]);
        assert_eq!(records[0].connected_on, 10);
        assert_eq!(records[0].connected_until, 50);
        assert_eq!(records[0].connected_seconds, 30);
        assert_eq!(records[1].connected_seconds, 35);
    }

    #[test]
    fn representative_is_first_event_for_hash() {
        let enricher = CountingEnricher::default();
        let events = vec![ev("a", 1, 2), ev("a", 3, 4)];
        let records = aggregate(events, &historical(0, 100), true, &enricher).unwrap();
        assert_eq!(records[0].details.ip, "198.51.100.1");
    }

    #[test]
    fn enrichment_runs_once_per_listener() {
        let enricher = CountingEnricher::default();
        let events = vec![ev("a", 1, 2), ev("a", 3, 4), ev("b", 5, 6), ev("a", 7, 8)];
        aggregate(events, &historical(0, 100), true, &enricher).unwrap();
        assert_eq!(enricher.calls.get(), 2);

        let enricher = CountingEnricher::default();
        let events = vec![ev("a", 1, 2), ev("a", 3, 4), ev("b", 5, 6), ev("a", 7, 8)];
        aggregate(events, &historical(0, 100), false, &enricher).unwrap();
        assert_eq!(enricher.calls.get(), 4);
    }

    #[test]
    fn aggregation_is_repeatable() {
        let enricher = CountingEnricher::default();
        let build = || vec![ev("a", 100, 200), ev("b", 120, 0), ev("a", 150, 300)];
        let window = historical(0, 1000);

        let first = aggregate(build(), &window, true, &enricher).unwrap();
        let second = aggregate(build(), &window, true, &enricher).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_event_yields_negative_seconds() {
        let enricher = CountingEnricher::default();
        let records =
            aggregate(vec![ev("a", 300, 200)], &historical(0, 1000), false, &enricher).unwrap();
        assert_eq!(records[0].connected_seconds, -100);
    }

    #[test]
    fn stream_error_aborts_without_output() {
        let enricher = CountingEnricher::default();
        let events = vec![
            ev("a", 1, 2),
            Err(ReportError::upstream("event source", "connection reset")),
            ev("b", 3, 4),
        ];

        let err = aggregate(events, &historical(0, 100), true, &enricher).unwrap_err();
        assert!(matches!(err, ReportError::UpstreamUnavailable { .. }));
        assert_eq!(enricher.calls.get(), 1);
    }

    #[test]
    fn empty_stream_yields_no_records() {
        let enricher = CountingEnricher::default();
        let records = aggregate(Vec::new(), &Window::live(10), true, &enricher).unwrap();
        assert!(records.is_empty());
    }
}
