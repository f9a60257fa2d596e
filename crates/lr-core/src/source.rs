//! Collaborators that supply listener records and display names.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::ReportError;
use crate::event::RawEvent;
use crate::window::Window;

/// Rows fetched per round trip by batched event sources.
pub const EVENT_BATCH_SIZE: usize = 250;

/// A store of raw listener connections.
pub trait EventSource {
    type Events<'a>: Iterator<Item = Result<RawEvent, ReportError>>
    where
        Self: 'a;

    /// Streams a station's connections overlapping `window`.
    ///
    /// Events must be ordered by `interval_start` ascending. Live windows
    /// return only connections that are still open; historical windows
    /// return connections with `start < window.end` and either an open end
    /// or `end > window.start`. `dedupe` is a hint the source may ignore.
    fn query_events<'a>(
        &'a self,
        station_id: i64,
        window: &Window,
        dedupe: bool,
    ) -> Result<Self::Events<'a>, ReportError>;
}

/// Display names for a station's mounts and remote relays.
///
/// Both maps must cover every id the event source can return for the station.
pub trait NameLookup {
    fn mount_names(&self, station_id: i64) -> Result<HashMap<i64, String>, ReportError>;

    fn remote_names(&self, station_id: i64) -> Result<HashMap<i64, String>, ReportError>;
}

/// Event iterator that fails once an execution budget is spent.
#[derive(Debug)]
pub struct Deadline<I> {
    inner: I,
    deadline: Instant,
    budget: Duration,
    expired: bool,
}

/// Wraps `events` so that pulling an item after `budget` has elapsed yields
/// [`ReportError::DeadlineExceeded`] and ends the stream.
pub fn with_deadline<I>(events: I, budget: Duration) -> Deadline<I::IntoIter>
where
    I: IntoIterator<Item = Result<RawEvent, ReportError>>,
{
    Deadline {
        inner: events.into_iter(),
        deadline: Instant::now() + budget,
        budget,
        expired: false,
    }
}

impl<I> Iterator for Deadline<I>
where
    I: Iterator<Item = Result<RawEvent, ReportError>>,
{
    type Item = Result<RawEvent, ReportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.expired {
            return None;
        }
        if Instant::now() >= self.deadline {
            self.expired = true;
            tracing::warn!(budget_secs = self.budget.as_secs(), "listener report over budget");
            return Some(Err(ReportError::DeadlineExceeded {
                budget_secs: self.budget.as_secs(),
            }));
        }
        self.inner.next()
    }
}
