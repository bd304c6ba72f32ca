//! SQLite record store.
//!
//! Implements [`RecordStore`] with one table per log.  Every append is a
//! single `INSERT`, which SQLite commits atomically, so concurrent readers
//! never see a partial record.  Each thread opens its own connection;
//! WAL mode plus a busy timeout lets the hub cycles write side by side.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text, which sorts the
//! same lexically and chronologically.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use rusqlite::{Connection, OptionalExtension, params};

use crate::app::ports::{RecordStore, StoreError};
use crate::records::{Baseline, Reading, SensorId, Signal, SignalLog, Source, SwitchState};

const SCHEMA_VERSION: i32 = 2;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS readings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT    NOT NULL,
    source      TEXT    NOT NULL,
    sensor      INTEGER NOT NULL DEFAULT 0,
    pm25        REAL    NOT NULL,
    temperature REAL,
    humidity    REAL
);
CREATE INDEX IF NOT EXISTS idx_readings_source_ts ON readings (source, timestamp);

CREATE TABLE IF NOT EXISTS baseline (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    value     REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS system_control (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    state     TEXT NOT NULL CHECK (state IN ('ON', 'OFF'))
);

CREATE TABLE IF NOT EXISTS user_control (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    state     TEXT NOT NULL CHECK (state IN ('ON', 'OFF'))
);

CREATE TABLE IF NOT EXISTS filter_state (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    state     TEXT NOT NULL CHECK (state IN ('ON', 'OFF'))
);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and make sure every table
    /// exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(unavailable)?;
        let store = Self::with_connection(conn)?;
        info!("SqliteStore: opened {}", path.display());
        Ok(store)
    }

    /// Private in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(unavailable)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(unavailable)?;

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(unavailable)?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::Corrupted(format!(
                "database schema {version} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        if version == 1 {
            info!("SqliteStore: adding readings.sensor column");
            conn.execute_batch("ALTER TABLE readings ADD COLUMN sensor INTEGER NOT NULL DEFAULT 0;")
                .map_err(unavailable)?;
        }
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(unavailable)?;
        Ok(Self { conn })
    }

    fn query_signals(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Signal>, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(unavailable)?;
        let rows = stmt
            .query_map(args, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(unavailable)?;

        let mut out = Vec::new();
        for row in rows {
            let (ts, state) = row.map_err(unavailable)?;
            out.push(Signal::new(parse_ts(&ts)?, parse_state(&state)?));
        }
        Ok(out)
    }
}

impl RecordStore for SqliteStore {
    fn insert_reading(&mut self, reading: &Reading) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO readings (timestamp, source, sensor, pm25, temperature, humidity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    format_ts(reading.timestamp),
                    reading.source.as_str(),
                    reading.sensor,
                    reading.pm25,
                    reading.temperature,
                    reading.humidity,
                ],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn readings_since(
        &self,
        source: Source,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT timestamp, pm25, temperature, humidity, sensor
                 FROM readings
                 WHERE source = ?1 AND timestamp >= ?2
                 ORDER BY timestamp ASC, id ASC",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![source.as_str(), format_ts(since)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, SensorId>(4)?,
                ))
            })
            .map_err(unavailable)?;

        let mut out = Vec::new();
        for row in rows {
            let (ts, pm25, temperature, humidity, sensor) = row.map_err(unavailable)?;
            out.push(Reading {
                timestamp: parse_ts(&ts)?,
                pm25,
                temperature,
                humidity,
                source,
                sensor,
            });
        }
        Ok(out)
    }

    fn insert_baseline(&mut self, baseline: &Baseline) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO baseline (timestamp, value) VALUES (?1, ?2)",
                params![format_ts(baseline.timestamp), baseline.value],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn latest_baseline(&self) -> Result<Option<Baseline>, StoreError> {
        Ok(self.recent_baselines(1)?.pop())
    }

    fn recent_baselines(&self, limit: usize) -> Result<Vec<Baseline>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare("SELECT timestamp, value FROM baseline ORDER BY id DESC LIMIT ?1")
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .map_err(unavailable)?;

        let mut out = Vec::new();
        for row in rows {
            let (ts, value) = row.map_err(unavailable)?;
            out.push(Baseline {
                timestamp: parse_ts(&ts)?,
                value,
            });
        }
        out.reverse();
        Ok(out)
    }

    fn append_signal(&mut self, log: SignalLog, signal: &Signal) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (timestamp, state) VALUES (?1, ?2)",
            log.name()
        );
        self.conn
            .execute(&sql, params![format_ts(signal.timestamp), signal.state.token()])
            .map_err(unavailable)?;
        Ok(())
    }

    fn latest_signal(&self, log: SignalLog) -> Result<Option<Signal>, StoreError> {
        let sql = format!(
            "SELECT timestamp, state FROM {} ORDER BY id DESC LIMIT 1",
            log.name()
        );
        let row = self
            .conn
            .query_row(&sql, [], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()
            .map_err(unavailable)?;

        row.map(|(ts, state)| Ok(Signal::new(parse_ts(&ts)?, parse_state(&state)?)))
            .transpose()
    }

    fn signals_since(
        &self,
        log: SignalLog,
        since: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StoreError> {
        let sql = format!(
            "SELECT timestamp, state FROM {} WHERE timestamp >= ?1 ORDER BY id ASC",
            log.name()
        );
        self.query_signals(&sql, params![format_ts(since)])
    }
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupted(format!("invalid timestamp '{value}': {e}")))
}

fn parse_state(value: &str) -> Result<SwitchState, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::Corrupted(format!("invalid state '{value}'")))
}
