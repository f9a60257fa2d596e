//! Rendering of finished listener records as JSON or CSV.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat};
use chrono_tz::Tz;
use serde::Serialize;

use crate::aggregate::SessionRecord;
use crate::enrich::Location;
use crate::error::ReportError;
use crate::interval::Interval;
use crate::window::Window;

/// Column headings of the CSV export, in order.
pub const CSV_HEADER: [&str; 13] = [
    "IP",
    "Start Time",
    "End Time",
    "Seconds Connected",
    "User Agent",
    "Client",
    "Is Mobile",
    "Mount Type",
    "Mount Name",
    "Location",
    "Country",
    "Region",
    "City",
];

pub const CSV_MIME_TYPE: &str = "text/csv";

const UNKNOWN_MOUNT: &str = "Unknown";

/// A written export ready to be handed to the caller as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub filename: String,
    pub mime_type: &'static str,
}

/// JSON shape of one listener.
#[derive(Debug, Serialize)]
pub struct ListenerExport<'a> {
    pub ip: &'a str,
    pub user_agent: &'a str,
    pub hash: &'a str,
    pub client: &'a str,
    pub is_mobile: bool,
    pub mount_is_local: bool,
    pub mount_name: &'a str,
    pub location: &'a Location,
    pub connected_on: i64,
    pub connected_until: i64,
    #[serde(rename = "connected_time")]
    pub connected_seconds: i64,
    pub intervals: &'a [Interval],
}

impl<'a> From<&'a SessionRecord> for ListenerExport<'a> {
    fn from(record: &'a SessionRecord) -> Self {
        let details = &record.details;
        let (mount_is_local, mount_name) = details
            .mount
            .as_ref()
            .map_or((false, ""), |m| (m.is_local, m.name.as_str()));
        Self {
            ip: &details.ip,
            user_agent: &details.user_agent,
            hash: &details.hash,
            client: &details.client,
            is_mobile: details.is_mobile,
            mount_is_local,
            mount_name,
            location: &details.location,
            connected_on: record.connected_on,
            connected_until: record.connected_until,
            connected_seconds: record.connected_seconds,
            intervals: &record.intervals,
        }
    }
}

/// Download name for a station's CSV export.
pub fn csv_filename(station_short_name: &str, window: &Window) -> String {
    format!("{station_short_name}_listeners_{}.csv", window.label)
}

/// Writes records as a JSON array.
pub fn write_json<W: Write>(records: &[SessionRecord], writer: W) -> Result<(), ReportError> {
    let rows: Vec<ListenerExport<'_>> = records.iter().map(ListenerExport::from).collect();
    serde_json::to_writer_pretty(writer, &rows).map_err(|e| ReportError::Export(e.into()))
}

/// Writes records as CSV with [`CSV_HEADER`], timestamps in `tz`.
///
/// Returns the number of data rows written.
pub fn write_csv<W: Write>(
    records: &[SessionRecord],
    tz: Tz,
    writer: W,
) -> Result<usize, ReportError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(CSV_HEADER)?;
    for record in records {
        out.write_record(csv_row(record, tz))?;
    }
    out.flush()?;
    Ok(records.len())
}

fn csv_row(record: &SessionRecord, tz: Tz) -> [String; 13] {
    let details = &record.details;

    let (mount_type, mount_name) = match &details.mount {
        Some(mount) if !mount.name.is_empty() => {
            let kind = if mount.is_local { "Local" } else { "Remote" };
            (kind.to_string(), mount.name.clone())
        }
        _ => (UNKNOWN_MOUNT.to_string(), UNKNOWN_MOUNT.to_string()),
    };

    let [location, country, region, city] = match &details.location {
        Location::Success {
            country,
            region,
            city,
        } => [
            format!("{region}, {country}"),
            country.clone(),
            region.clone(),
            city.clone(),
        ],
        Location::Failure { message } => [
            message.clone().unwrap_or_else(|| "N/A".to_string()),
            String::new(),
            String::new(),
            String::new(),
        ],
    };

    [
        details.ip.clone(),
        iso8601(record.connected_on, tz),
        iso8601(record.connected_until, tz),
        record.connected_seconds.to_string(),
        details.user_agent.clone(),
        details.client.clone(),
        if details.is_mobile { "True" } else { "False" }.to_string(),
        mount_type,
        mount_name,
        location,
        country,
        region,
        city,
    ]
}

/// Epoch seconds as an ISO-8601 timestamp with the zone's offset.
fn iso8601(timestamp: i64, tz: Tz) -> String {
    DateTime::from_timestamp(timestamp, 0).map_or_else(
        || timestamp.to_string(),
        |dt| {
            dt.with_timezone(&tz)
                .to_rfc3339_opts(SecondsFormat::Secs, false)
        },
    )
}
