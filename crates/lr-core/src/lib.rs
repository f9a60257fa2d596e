//! Core logic for station listener reports.
//!
//! This crate contains:
//! - Window resolution: live snapshots vs. historical ranges
//! - Aggregation: clamping connections to a window and merging them per listener
//! - Enrichment: mount names, device classification and geolocation
//! - Export: JSON records and the fixed-column CSV download

mod aggregate;
mod enrich;
mod error;
mod event;
mod export;
mod interval;
mod report;
mod source;
mod window;

pub use aggregate::{SessionRecord, aggregate};
pub use enrich::{
    DEFAULT_LOCALE, DeviceClassifier, DeviceInfo, Enrich, GeoLocator, ListenerDetails, Locale,
    Location, MountInfo, RecordEnricher, UNKNOWN_CLIENT,
};
pub use error::{BoxError, ReportError};
pub use event::{MountRef, RawEvent};
pub use export::{
    CSV_HEADER, CSV_MIME_TYPE, ExportArtifact, ListenerExport, csv_filename, write_csv,
    write_json,
};
pub use interval::{Interval, union_seconds};
pub use report::{
    ExportFormat, ListenerQuery, ListenerReport, ReportRequest, Station, build_report,
};
pub use source::{Deadline, EVENT_BATCH_SIZE, EventSource, NameLookup, with_deadline};
pub use window::{LIVE_LABEL, Window, WindowMode, resolve_window};
