//! Storage layer for listener records.
//!
//! Provides persistence for stations, their mounts and remote relays, and the
//! raw listener connections reported on by `lr-core`, using `rusqlite`.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A report runs on one thread and owns its connection for the duration.
//!
//! # Schema
//!
//! Connection times are stored as INTEGER epoch seconds. `timestamp_end = 0`
//! marks a connection that is still open. A listener row references at most
//! one of `mount_id` / `remote_id`; the table enforces this with a CHECK.

use std::collections::HashMap;
use std::path::Path;

use chrono_tz::Tz;
use lr_core::{
    EVENT_BATCH_SIZE, EventSource, MountRef, NameLookup, RawEvent, ReportError, Station, Window,
};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A station row holds a timezone name chrono-tz does not know.
    #[error("invalid timezone for station {station}: {timezone}")]
    InvalidTimezone { station: String, timezone: String },
    /// A listener row references both a mount and a remote.
    #[error("listener row {id} references both a mount and a remote")]
    ConflictingMount { id: i64 },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A station as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationRecord {
    pub id: i64,
    pub short_name: String,
    /// IANA timezone name, e.g. `America/Chicago`.
    pub timezone: String,
}

/// A mount or remote relay display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRecord {
    pub id: i64,
    pub station_id: i64,
    pub display_name: String,
}

/// A listener connection ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRecord {
    pub station_id: i64,
    pub hash: String,
    pub ip: String,
    pub user_agent: String,
    pub mount_ref: MountRef,
    pub timestamp_start: i64,
    pub timestamp_end: i64,
}

const LISTENER_COLUMNS: &str = "id, listener_hash, listener_ip, listener_user_agent, mount_id, remote_id, timestamp_start, timestamp_end";

/// Connections still open, for live windows.
const LIVE_FILTER: &str = "timestamp_end = 0";

/// Rows overlapping `[?5, ?6)`, for historical windows.
const RANGE_FILTER: &str =
    "timestamp_start < ?6 AND (timestamp_end = 0 OR timestamp_end > ?5)";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS stations (
                id INTEGER PRIMARY KEY,
                short_name TEXT NOT NULL UNIQUE,
                timezone TEXT NOT NULL DEFAULT 'UTC'
            );

            CREATE TABLE IF NOT EXISTS station_mounts (
                id INTEGER PRIMARY KEY,
                station_id INTEGER NOT NULL,
                display_name TEXT NOT NULL,
                FOREIGN KEY (station_id) REFERENCES stations(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS station_remotes (
                id INTEGER PRIMARY KEY,
                station_id INTEGER NOT NULL,
                display_name TEXT NOT NULL,
                FOREIGN KEY (station_id) REFERENCES stations(id) ON DELETE CASCADE
            );

            -- Listeners table: one row per client connection
            -- timestamp_end: 0 while the connection is open
            CREATE TABLE IF NOT EXISTS listeners (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                station_id INTEGER NOT NULL,
                listener_hash TEXT NOT NULL,
                listener_ip TEXT NOT NULL,
                listener_user_agent TEXT NOT NULL DEFAULT '',
                mount_id INTEGER,
                remote_id INTEGER,
                timestamp_start INTEGER NOT NULL,
                timestamp_end INTEGER NOT NULL DEFAULT 0,
                CHECK (mount_id IS NULL OR remote_id IS NULL),
                FOREIGN KEY (station_id) REFERENCES stations(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_listeners_station_start
                ON listeners(station_id, timestamp_start);
            CREATE INDEX IF NOT EXISTS idx_listeners_station_end
                ON listeners(station_id, timestamp_end);
            ",
        )?;
        Ok(())
    }

    /// Inserts or replaces a station.
    pub fn upsert_station(&self, station: &StationRecord) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO stations (id, short_name, timezone) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET short_name = excluded.short_name, timezone = excluded.timezone
            ",
            params![station.id, station.short_name, station.timezone],
        )?;
        Ok(())
    }

    /// Inserts or renames a local mount.
    pub fn upsert_mount(&self, mount: &NameRecord) -> Result<(), DbError> {
        self.upsert_name("station_mounts", mount)
    }

    /// Inserts or renames a remote relay.
    pub fn upsert_remote(&self, remote: &NameRecord) -> Result<(), DbError> {
        self.upsert_name("station_remotes", remote)
    }

    fn upsert_name(&self, table: &str, record: &NameRecord) -> Result<(), DbError> {
        self.conn.execute(
            &format!(
                "
                INSERT INTO {table} (id, station_id, display_name) VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET station_id = excluded.station_id, display_name = excluded.display_name
                "
            ),
            params![record.id, record.station_id, record.display_name],
        )?;
        Ok(())
    }

    /// Inserts a batch of listener connections in one transaction.
    pub fn insert_listeners(&mut self, listeners: &[ListenerRecord]) -> Result<usize, DbError> {
        if listeners.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO listeners
                (station_id, listener_hash, listener_ip, listener_user_agent, mount_id, remote_id, timestamp_start, timestamp_end)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for listener in listeners {
                let (mount_id, remote_id) = match listener.mount_ref {
                    MountRef::Local(id) => (Some(id), None),
                    MountRef::Remote(id) => (None, Some(id)),
                    MountRef::None => (None, None),
                };
                inserted += stmt.execute(params![
                    listener.station_id,
                    listener.hash,
                    listener.ip,
                    listener.user_agent,
                    mount_id,
                    remote_id,
                    listener.timestamp_start,
                    listener.timestamp_end,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Looks up a station by its short name.
    pub fn station_by_short_name(&self, short_name: &str) -> Result<Option<Station>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, short_name, timezone FROM stations WHERE short_name = ?",
                [short_name],
                |row| {
                    Ok(StationRecord {
                        id: row.get(0)?,
                        short_name: row.get(1)?,
                        timezone: row.get(2)?,
                    })
                },
            )
            .optional()?;

        row.map(|record| {
            let timezone: Tz = record
                .timezone
                .parse()
                .map_err(|_| DbError::InvalidTimezone {
                    station: record.short_name.clone(),
                    timezone: record.timezone.clone(),
                })?;
            Ok(Station {
                id: record.id,
                short_name: record.short_name,
                timezone,
            })
        })
        .transpose()
    }

    /// Number of stations.
    pub fn station_count(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM stations", [], |row| row.get(0))?)
    }

    /// Number of stored listener connections.
    pub fn listener_count(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM listeners", [], |row| row.get(0))?)
    }

    /// Pages through a station's connections overlapping `window`.
    ///
    /// Rows are ordered by `(timestamp_start, id)` and fetched `batch_size`
    /// at a time using that pair as a keyset cursor.
    pub fn listener_events(
        &self,
        station_id: i64,
        window: &Window,
        batch_size: usize,
    ) -> ListenerBatches<'_> {
        ListenerBatches {
            db: self,
            station_id,
            window: window.clone(),
            batch_size: batch_size.max(1),
            cursor: (i64::MIN, i64::MIN),
            buffer: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    fn names(&self, table: &str, station_id: i64) -> Result<HashMap<i64, String>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, display_name FROM {table} WHERE station_id = ?"
        ))?;
        let rows = stmt.query_map([station_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut names = HashMap::new();
        for row in rows {
            let (id, name) = row?;
            names.insert(id, name);
        }
        Ok(names)
    }

    fn fetch_batch(
        &self,
        station_id: i64,
        window: &Window,
        cursor: (i64, i64),
        limit: usize,
    ) -> Result<Vec<(i64, RawEvent)>, DbError> {
        let filter = if window.is_live() {
            LIVE_FILTER
        } else {
            RANGE_FILTER
        };
        let sql = format!(
            "
            SELECT {LISTENER_COLUMNS}
            FROM listeners
            WHERE station_id = ?1
              AND (timestamp_start > ?2 OR (timestamp_start = ?2 AND id > ?3))
              AND {filter}
            ORDER BY timestamp_start ASC, id ASC
            LIMIT ?4
            "
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(ListenerRow {
                id: row.get(0)?,
                hash: row.get(1)?,
                ip: row.get(2)?,
                user_agent: row.get(3)?,
                mount_id: row.get(4)?,
                remote_id: row.get(5)?,
                timestamp_start: row.get(6)?,
                timestamp_end: row.get(7)?,
            })
        };
        let rows = if window.is_live() {
            stmt.query_map(params![station_id, cursor.0, cursor.1, limit], map_row)?
        } else {
            stmt.query_map(
                params![station_id, cursor.0, cursor.1, limit, window.start, window.end],
                map_row,
            )?
        };

        let mut events = Vec::new();
        for row in rows {
            let row = row?;
            events.push((row.id, row.into_event()?));
        }
        Ok(events)
    }
}

/// A listener row as read back.
struct ListenerRow {
    id: i64,
    hash: String,
    ip: String,
    user_agent: String,
    mount_id: Option<i64>,
    remote_id: Option<i64>,
    timestamp_start: i64,
    timestamp_end: i64,
}

impl ListenerRow {
    fn into_event(self) -> Result<RawEvent, DbError> {
        let mount_ref = MountRef::from_ids(self.mount_id, self.remote_id)
            .ok_or(DbError::ConflictingMount { id: self.id })?;
        Ok(RawEvent {
            identity_hash: self.hash,
            ip: self.ip,
            user_agent: self.user_agent,
            mount_ref,
            interval_start: self.timestamp_start,
            interval_end: self.timestamp_end,
        })
    }
}

/// Batched iterator over a station's listener connections.
///
/// Holds at most one batch in memory. A failed fetch yields one error and
/// ends the iteration.
pub struct ListenerBatches<'a> {
    db: &'a Database,
    station_id: i64,
    window: Window,
    batch_size: usize,
    cursor: (i64, i64),
    buffer: std::vec::IntoIter<RawEvent>,
    exhausted: bool,
}

impl Iterator for ListenerBatches<'_> {
    type Item = Result<RawEvent, ReportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.buffer.next() {
            return Some(Ok(event));
        }
        if self.exhausted {
            return None;
        }

        match self
            .db
            .fetch_batch(self.station_id, &self.window, self.cursor, self.batch_size)
        {
            Ok(batch) => {
                tracing::trace!(
                    station_id = self.station_id,
                    rows = batch.len(),
                    "fetched listener batch"
                );
                if batch.len() < self.batch_size {
                    self.exhausted = true;
                }
                if let Some((id, last)) = batch.last() {
                    self.cursor = (last.interval_start, *id);
                }
                self.buffer = batch
                    .into_iter()
                    .map(|(_, event)| event)
                    .collect::<Vec<_>>()
                    .into_iter();
                self.buffer.next().map(Ok)
            }
            Err(err) => {
                self.exhausted = true;
                Some(Err(ReportError::upstream("listener store", err)))
            }
        }
    }
}

impl EventSource for Database {
    type Events<'a> = ListenerBatches<'a>;

    fn query_events<'a>(
        &'a self,
        station_id: i64,
        window: &Window,
        _dedupe: bool,
    ) -> Result<Self::Events<'a>, ReportError> {
        Ok(self.listener_events(station_id, window, EVENT_BATCH_SIZE))
    }
}

impl NameLookup for Database {
    fn mount_names(&self, station_id: i64) -> Result<HashMap<i64, String>, ReportError> {
        self.names("station_mounts", station_id)
            .map_err(|e| ReportError::upstream("listener store", e))
    }

    fn remote_names(&self, station_id: i64) -> Result<HashMap<i64, String>, ReportError> {
        self.names("station_remotes", station_id)
            .map_err(|e| ReportError::upstream("listener store", e))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use lr_core::WindowMode;

    use super::*;

    fn seeded() -> Database {
        let db = Database::open_in_memory().expect("open in-memory db");
        db.upsert_station(&StationRecord {
            id: 1,
            short_name: "night_owl".into(),
            timezone: "America/Chicago".into(),
        })
        .unwrap();
        db.upsert_mount(&NameRecord {
            id: 10,
            station_id: 1,
            display_name: "/radio.mp3".into(),
        })
        .unwrap();
        db.upsert_remote(&NameRecord {
            id: 20,
            station_id: 1,
            display_name: "Relay East".into(),
        })
        .unwrap();
        db
    }

    fn listener(hash: &str, start: i64, end: i64) -> ListenerRecord {
        ListenerRecord {
            station_id: 1,
            hash: hash.into(),
            ip: "203.0.113.20".into(),
            user_agent: "VLC/3.0.20".into(),
            mount_ref: MountRef::Local(10),
            timestamp_start: start,
            timestamp_end: end,
        }
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

    fn collect(iter: ListenerBatches<'_>) -> Vec<RawEvent> {
        iter.collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn schema_creates_tables_and_indexes() {
        let db = Database::open_in_memory().unwrap();
        let mut stmt = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'index')")
            .unwrap();
        let names: HashSet<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        for expected in [
            "stations",
            "station_mounts",
            "station_remotes",
            "listeners",
            "idx_listeners_station_start",
            "idx_listeners_station_end",
        ] {
            assert!(names.contains(expected), "missing {expected}");
        }
    }

    #[test]
    fn open_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("lr.db");
        Database::open(&path).unwrap();
        let db = Database::open(&path).unwrap();
        assert_eq!(db.listener_count().unwrap(), 0);
    }

    #[test]
    fn station_lookup_parses_timezone() {
        let db = seeded();
        let station = db.station_by_short_name("night_owl").unwrap().unwrap();
        assert_eq!(station.id, 1);
        assert_eq!(station.timezone, chrono_tz::America::Chicago);
        assert!(db.station_by_short_name("missing").unwrap().is_none());
    }

    #[test]
    fn station_lookup_rejects_unknown_timezone() {
        let db = seeded();
        db.upsert_station(&StationRecord {
            id: 2,
            short_name: "broken".into(),
            timezone: "Mars/Olympus_Mons".into(),
        })
        .unwrap();
        let err = db.station_by_short_name("broken").unwrap_err();
        assert!(matches!(err, DbError::InvalidTimezone { .. }));
    }

    #[test]
    fn check_constraint_rejects_both_mount_and_remote() {
        let db = seeded();
        let result = db.conn.execute(
            "INSERT INTO listeners (station_id, listener_hash, listener_ip, mount_id, remote_id, timestamp_start)
             VALUES (1, 'h', '192.0.2.1', 10, 20, 5)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn names_are_scoped_to_station() {
        let db = seeded();
        db.upsert_station(&StationRecord {
            id: 2,
            short_name: "other".into(),
            timezone: "UTC".into(),
        })
        .unwrap();
        db.upsert_mount(&NameRecord {
            id: 11,
            station_id: 2,
            display_name: "/other.aac".into(),
        })
        .unwrap();

        let mounts = db.mount_names(1).unwrap();
        assert_eq!(mounts, HashMap::from([(10, "/radio.mp3".to_string())]));
        let remotes = db.remote_names(1).unwrap();
        assert_eq!(remotes, HashMap::from([(20, "Relay East".to_string())]));
    }

    #[test]
    fn mount_refs_round_trip() {
        let mut db = seeded();
        let mut remote = listener("r", 5, 6);
        remote.mount_ref = MountRef::Remote(20);
        let mut detached = listener("n", 7, 8);
        detached.mount_ref = MountRef::None;
        db.insert_listeners(&[listener("l", 1, 2), remote, detached])
            .unwrap();

        let events = collect(db.listener_events(1, &historical(0, 100), 10));
        let refs: Vec<_> = events.iter().map(|e| e.mount_ref).collect();
        assert_eq!(
            refs,
            [MountRef::Local(10), MountRef::Remote(20), MountRef::None]
        );
    }

    #[test]
    fn live_query_returns_only_open_connections() {
        let mut db = seeded();
        db.insert_listeners(&[
            listener("a", 100, 0),
            listener("b", 50, 80),
            listener("c", 90, 0),
        ])
        .unwrap();

        let events = collect(db.listener_events(1, &Window::live(1000), 250));
        let hashes: Vec<_> = events.iter().map(|e| e.identity_hash.as_str()).collect();
        assert_eq!(hashes, ["c", "a"]);
    }

    #[test]
    fn range_query_returns_overlapping_connections() {
        let mut db = seeded();
        db.insert_listeners(&[
            listener("before", 10, 90),
            listener("touches_start", 50, 100),
            listener("spans", 50, 300),
            listener("open", 150, 0),
            listener("inside", 120, 130),
            listener("at_end", 200, 260),
            listener("after", 250, 260),
        ])
        .unwrap();

        let events = collect(db.listener_events(1, &historical(100, 200), 250));
        let hashes: Vec<_> = events.iter().map(|e| e.identity_hash.as_str()).collect();
        assert_eq!(hashes, ["spans", "inside", "open"]);
    }

    #[test]
    fn small_batches_page_through_everything_in_order() {
        let mut db = seeded();
        let rows: Vec<_> = (0..7)
            .map(|i| listener(&format!("h{i}"), 100 + (i / 2), 0))
            .collect();
        db.insert_listeners(&rows).unwrap();

        let events = collect(db.listener_events(1, &Window::live(1000), 2));
        let hashes: Vec<_> = events.iter().map(|e| e.identity_hash.clone()).collect();
        assert_eq!(hashes, ["h0", "h1", "h2", "h3", "h4", "h5", "h6"]);
    }

    #[test]
    fn default_batches_cover_more_than_one_page() {
        let mut db = seeded();
        let rows: Vec<_> = (0..600)
            .map(|i| listener(&format!("h{}", i % 40), i, i + 30))
            .collect();
        db.insert_listeners(&rows).unwrap();

        let events: Vec<_> = db
            .query_events(1, &historical(0, 10_000), true)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(events.len(), 600);
        assert!(
            events
                .windows(2)
                .all(|w| w[0].interval_start <= w[1].interval_start)
        );
    }

    #[test]
    fn other_stations_are_excluded() {
        let mut db = seeded();
        db.upsert_station(&StationRecord {
            id: 2,
            short_name: "other".into(),
            timezone: "UTC".into(),
        })
        .unwrap();
        let mut foreign = listener("x", 5, 0);
        foreign.station_id = 2;
        foreign.mount_ref = MountRef::None;
        db.insert_listeners(&[listener("mine", 5, 0), foreign])
            .unwrap();

        let events = collect(db.listener_events(1, &Window::live(1000), 250));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identity_hash, "mine");
    }
}
