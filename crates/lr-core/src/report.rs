//! One listener report request, end to end.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::aggregate::{SessionRecord, aggregate};
use crate::enrich::{DeviceClassifier, GeoLocator, Locale, RecordEnricher};
use crate::error::ReportError;
use crate::source::{EventSource, NameLookup, with_deadline};
use crate::window::{Window, resolve_window};

/// A radio station whose listeners are reported on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub id: i64,
    pub short_name: String,
    pub timezone: Tz,
}

/// Output encoding of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    /// Reads the `format` parameter. Anything other than `csv` means JSON.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("csv") => Self::Csv,
            _ => Self::Json,
        }
    }
}

/// Raw request parameters, as a transport would hand them over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerQuery {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub unique: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

impl ListenerQuery {
    /// Whether listeners are merged by identity; only `unique=false` disables it.
    pub fn dedupe(&self) -> bool {
        self.unique.as_deref() != Some("false")
    }

    pub fn format(&self) -> ExportFormat {
        ExportFormat::from_param(self.format.as_deref())
    }

    pub fn window(&self, tz: Tz, now: DateTime<Utc>) -> Result<Window, ReportError> {
        resolve_window(self.start.as_deref(), self.end.as_deref(), tz, now)
    }
}

/// Everything needed to run a report apart from the collaborators.
#[derive(Debug, Clone)]
pub struct ReportRequest<'a> {
    pub station: &'a Station,
    pub query: &'a ListenerQuery,
    pub locale: Option<Locale>,
    pub now: DateTime<Utc>,
    /// Execution budget for consuming the event stream.
    pub budget: Option<Duration>,
}

/// The finished, immutable report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerReport {
    pub window: Window,
    pub dedupe: bool,
    pub format: ExportFormat,
    pub records: Vec<SessionRecord>,
}

/// Resolves the window, streams the station's events and aggregates them.
pub fn build_report<S, C, G>(
    request: &ReportRequest<'_>,
    store: &S,
    classifier: &C,
    geolocator: &G,
) -> Result<ListenerReport, ReportError>
where
    S: EventSource + NameLookup,
    C: DeviceClassifier,
    G: GeoLocator,
{
    let station = request.station;
    let window = request.query.window(station.timezone, request.now)?;
    let dedupe = request.query.dedupe();

    tracing::debug!(
        station = %station.short_name,
        window = %window.label,
        dedupe,
        "building listener report"
    );

    let enricher = RecordEnricher::for_station(
        store,
        station.id,
        classifier,
        geolocator,
        request.locale.clone(),
    )?;
    let events = store.query_events(station.id, &window, dedupe)?;

    let records = match request.budget {
        Some(budget) => aggregate(with_deadline(events, budget), &window, dedupe, &enricher)?,
        None => aggregate(events, &window, dedupe, &enricher)?,
    };

    tracing::info!(
        station = %station.short_name,
        window = %window.label,
        listeners = records.len(),
        "listener report ready"
    );

    Ok(ListenerReport {
        window,
        dedupe,
        format: request.query.format(),
        records,
    })
}
