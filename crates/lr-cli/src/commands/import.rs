//! Import command for loading stations and listener rows into the local `SQLite` store.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde::Deserialize;

use lr_core::MountRef;
use lr_db::{Database, ListenerRecord, NameRecord, StationRecord};

/// Counts of imported rows, by kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub stations: usize,
    pub mounts: usize,
    pub remotes: usize,
    pub listeners: usize,
}

/// Reads JSONL from `reader` and stores it.
///
/// Stations are written before mounts and remotes, and those before
/// listeners, regardless of their order in the input.
pub fn run<R: BufRead, W: Write>(
    reader: R,
    writer: &mut W,
    db: &mut Database,
) -> Result<ImportSummary> {
    let batch = parse_records(reader)?;
    let summary = ImportSummary {
        stations: batch.stations.len(),
        mounts: batch.mounts.len(),
        remotes: batch.remotes.len(),
        listeners: batch.listeners.len(),
    };

    for station in &batch.stations {
        db.upsert_station(station)
            .with_context(|| format!("failed to store station {}", station.short_name))?;
    }
    for mount in &batch.mounts {
        db.upsert_mount(mount)
            .with_context(|| format!("failed to store mount {}", mount.id))?;
    }
    for remote in &batch.remotes {
        db.upsert_remote(remote)
            .with_context(|| format!("failed to store remote {}", remote.id))?;
    }
    db.insert_listeners(&batch.listeners)
        .context("failed to store listeners")?;

    tracing::info!(?summary, "import finished");
    writeln!(
        writer,
        "Imported {} stations, {} mounts, {} remotes, {} listeners",
        summary.stations, summary.mounts, summary.remotes, summary.listeners
    )?;
    Ok(summary)
}

#[derive(Debug, Default)]
struct ImportBatch {
    stations: Vec<StationRecord>,
    mounts: Vec<NameRecord>,
    remotes: Vec<NameRecord>,
    listeners: Vec<ListenerRecord>,
}

fn parse_records<R: BufRead>(reader: R) -> Result<ImportBatch> {
    let mut batch = ImportBatch::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: ImportRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON on line {}", idx + 1))?;
        match parsed {
            ImportRecord::Station(station) => batch.stations.push(StationRecord {
                id: station.id,
                short_name: station.short_name,
                timezone: station.timezone,
            }),
            ImportRecord::Mount(mount) => batch.mounts.push(mount.into()),
            ImportRecord::Remote(remote) => batch.remotes.push(remote.into()),
            ImportRecord::Listener(listener) => batch.listeners.push(
                listener
                    .into_record()
                    .with_context(|| format!("invalid listener on line {}", idx + 1))?,
            ),
        }
    }
    Ok(batch)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ImportRecord {
    Station(ImportStation),
    Mount(ImportName),
    Remote(ImportName),
    Listener(ImportListener),
}

#[derive(Debug, Deserialize)]
struct ImportStation {
    id: i64,
    short_name: String,
    #[serde(default = "default_timezone")]
    timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Deserialize)]
struct ImportName {
    id: i64,
    station_id: i64,
    display_name: String,
}

impl From<ImportName> for NameRecord {
    fn from(name: ImportName) -> Self {
        Self {
            id: name.id,
            station_id: name.station_id,
            display_name: name.display_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImportListener {
    station_id: i64,
    hash: String,
    ip: String,
    #[serde(default)]
    user_agent: String,
    #[serde(default)]
    mount_id: Option<i64>,
    #[serde(default)]
    remote_id: Option<i64>,
    timestamp_start: i64,
    #[serde(default)]
    timestamp_end: i64,
}

impl ImportListener {
    fn into_record(self) -> Result<ListenerRecord> {
        if self.hash.trim().is_empty() {
            anyhow::bail!("missing hash");
        }
        let mount_ref = MountRef::from_ids(self.mount_id, self.remote_id)
            .ok_or_else(|| anyhow::anyhow!("listener has both mount_id and remote_id"))?;
        Ok(ListenerRecord {
            station_id: self.station_id,
            hash: self.hash,
            ip: self.ip,
            user_agent: self.user_agent,
            mount_ref,
            timestamp_start: self.timestamp_start,
            timestamp_end: self.timestamp_end,
        })
    }
}
