//! Resolution of the reporting window from request parameters.

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::ReportError;
use crate::event::RawEvent;
use crate::interval::Interval;

/// Label used for live windows.
pub const LIVE_LABEL: &str = "live";

/// Naive forms accepted for `start` / `end`, tried in order.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Format of each bound inside a historical label.
const LABEL_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// Who is connected right now.
    Live,
    /// A fixed, caller-specified range.
    Historical,
}

/// The resolved scope of one report, in epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Window {
    pub mode: WindowMode,
    pub start: i64,
    pub end: i64,
    pub label: String,
    /// When the report was requested.
    pub now: i64,
}

impl Window {
    /// A live window where both bounds are `now`.
    pub fn live(now: i64) -> Self {
        Self {
            mode: WindowMode::Live,
            start: now,
            end: now,
            label: LIVE_LABEL.to_string(),
            now,
        }
    }

    pub const fn is_live(&self) -> bool {
        matches!(self.mode, WindowMode::Live)
    }

    /// The part of `event`'s connection attributable to this window.
    ///
    /// Live windows keep the event's own start and always run to `now`, even
    /// when the stored connection already has an end.
    pub fn clamp(&self, event: &RawEvent) -> Interval {
        match self.mode {
            WindowMode::Live => Interval::new(event.interval_start, self.end),
            WindowMode::Historical => event.interval().clamp_to(self.start, self.end),
        }
    }
}

/// Resolves the report window.
///
/// An absent or blank `start` selects a live window. Otherwise `start` and
/// `end` are read in the station's timezone, `start` rounded down to second
/// `:00` and `end` (defaulting to `start`) rounded up to second `:59`.
pub fn resolve_window(
    start: Option<&str>,
    end: Option<&str>,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<Window, ReportError> {
    let Some(start_raw) = start.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Window::live(now.timestamp()));
    };
    let end_raw = end
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(start_raw);

    let start_at = parse_bound(start_raw, tz, 0)?;
    let end_at = parse_bound(end_raw, tz, 59)?;

    if end_at < start_at {
        return Err(ReportError::invalid_range(format!(
            "end ({end_raw}) is before start ({start_raw})"
        )));
    }

    let label = format!(
        "{}_to_{}",
        start_at.format(LABEL_FORMAT),
        end_at.format(LABEL_FORMAT)
    );

    Ok(Window {
        mode: WindowMode::Historical,
        start: start_at.timestamp(),
        end: end_at.timestamp(),
        label,
        now: now.timestamp(),
    })
}

/// Parses a date/time string as a moment in `tz` with its seconds set to `second`.
///
/// Strings carrying an explicit offset name an instant and are rounded on the
/// epoch; naive ones are taken as local wall-clock time there and rounded
/// before being placed on the timeline.
fn parse_bound(input: &str, tz: Tz, second: u32) -> Result<DateTime<Tz>, ReportError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        let ts = dt.timestamp();
        let rounded = ts - ts.rem_euclid(60) + i64::from(second);
        return DateTime::from_timestamp(rounded, 0)
            .map(|utc| utc.with_timezone(&tz))
            .ok_or_else(|| ReportError::invalid_range(format!("out of range: {input}")));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .and_then(|naive| naive.with_second(second))
        .ok_or_else(|| {
            ReportError::invalid_range(format!("unrecognized date/time: {input}"))
        })?;

    localize(naive, tz)
}

/// Maps local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) use the earlier instant; times inside a
/// spring-forward gap are shifted one hour later.
fn localize(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Tz>, ReportError> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .ok_or_else(|| {
                ReportError::invalid_range(format!("{naive} does not exist in {}", tz.name()))
            }),
    }
}
