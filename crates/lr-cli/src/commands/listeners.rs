//! Listener report command.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use tempfile::NamedTempFile;

use lr_core::{
    CSV_MIME_TYPE, ExportArtifact, ExportFormat, ListenerQuery, ListenerReport, Locale,
    ReportRequest, Station, build_report, csv_filename, write_csv, write_json,
};
use lr_db::Database;

use crate::Config;
use crate::device::RegexClassifier;
use crate::geo::StaticGeoLocator;

#[derive(Debug, Args)]
pub struct ListenersArgs {
    /// Station short name.
    #[arg(long)]
    pub station: String,

    /// Range start in the station's timezone (e.g. "2024-05-01 08:00"). Omit for live listeners.
    #[arg(long)]
    pub start: Option<String>,

    /// Range end; defaults to the start.
    #[arg(long)]
    pub end: Option<String>,

    /// Merge connections per listener; only "false" disables it.
    #[arg(long)]
    pub unique: Option<String>,

    /// Output format: json (default) or csv.
    #[arg(long)]
    pub format: Option<String>,

    /// Locale for geolocation results.
    #[arg(long)]
    pub locale: Option<String>,
}

impl ListenersArgs {
    fn query(&self) -> ListenerQuery {
        ListenerQuery {
            start: self.start.clone(),
            end: self.end.clone(),
            unique: self.unique.clone(),
            format: self.format.clone(),
        }
    }
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    config: &Config,
    args: &ListenersArgs,
    now: DateTime<Utc>,
) -> Result<()> {
    let station = db
        .station_by_short_name(&args.station)
        .context("failed to look up station")?
        .ok_or_else(|| anyhow::anyhow!("station not found: {}", args.station))?;

    let geolocator = match &config.geo_database {
        Some(path) => StaticGeoLocator::from_file(path)?,
        None => StaticGeoLocator::default(),
    };

    let query = args.query();
    let request = ReportRequest {
        station: &station,
        query: &query,
        locale: Some(
            args.locale
                .as_deref()
                .map_or_else(|| config.default_locale(), Locale::new),
        ),
        now,
        budget: config.budget(),
    };

    let report = build_report(&request, db, &RegexClassifier, &geolocator).map_err(|err| {
        let status = err.status_code();
        anyhow::Error::new(err).context(format!("listener report failed (status {status})"))
    })?;

    match report.format {
        ExportFormat::Json => {
            write_json(&report.records, &mut *writer)?;
            writeln!(writer)?;
        }
        ExportFormat::Csv => {
            let artifact = export_csv(&report, &station, &config.export_dir)?;
            writeln!(
                writer,
                "Wrote {} listeners to {} ({})",
                report.records.len(),
                artifact.path.display(),
                artifact.mime_type
            )?;
        }
    }
    Ok(())
}

/// Writes the CSV next to its final name and moves it into place once complete.
fn export_csv(report: &ListenerReport, station: &Station, dir: &Path) -> Result<ExportArtifact> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let filename = csv_filename(&station.short_name, &report.window);
    let path = dir.join(&filename);

    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    let rows = write_csv(&report.records, station.timezone, temp.as_file_mut())?;
    temp.persist(&path)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!(path = %path.display(), rows, "wrote listener export");
    Ok(ExportArtifact {
        path,
        filename,
        mime_type: CSV_MIME_TYPE,
    })
}
