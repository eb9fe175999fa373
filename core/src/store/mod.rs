//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Pipeline components call store methods — they never execute SQL
//! directly. All derived-row writes are keyed upserts so a re-run is
//! safe; snapshot and job writes go through the same door.

use crate::{
    canonical::{CanonicalMember, CanonicalSnapshot},
    error::{PipelineError, PipelineResult},
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};

mod derived_day;
mod job;
mod tenure;

pub struct Store {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl Store {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database
    /// (isolated). For file-based databases, this opens the same file.
    pub fn reopen(&self) -> PipelineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_snapshots.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_derived_days.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_tenure_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_ingest_jobs.sql"))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Snapshots ──────────────────────────────────────────────

    /// Persist one snapshot. Snapshots are append-only by date; a
    /// conflict on (clan_tag, date) means the upstream corrected an
    /// already-fetched day, so the member payload is replaced and the
    /// hash guard downstream decides what re-derives.
    pub fn upsert_snapshot(&self, snapshot: &CanonicalSnapshot) -> PipelineResult<()> {
        let members_json = serde_json::to_string(&snapshot.members)?;
        self.conn.execute(
            "INSERT INTO snapshot (clan_tag, snapshot_date, fetched_at, members_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(clan_tag, snapshot_date) DO UPDATE SET
                fetched_at = excluded.fetched_at,
                members_json = excluded.members_json",
            params![
                snapshot.clan_tag,
                day_str(snapshot.date),
                snapshot.fetched_at.to_rfc3339(),
                members_json,
            ],
        )?;
        Ok(())
    }

    /// All snapshots for a clan, ordered by date ascending. The explicit
    /// ORDER BY is what recovers out-of-order ingestion.
    pub fn snapshots_for_clan(&self, clan_tag: &str) -> PipelineResult<Vec<CanonicalSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_date, fetched_at, members_json
             FROM snapshot WHERE clan_tag = ?1
             ORDER BY snapshot_date ASC",
        )?;
        let raw: Vec<(String, String, String)> = stmt
            .query_map(params![clan_tag], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut snapshots = Vec::with_capacity(raw.len());
        for (date, fetched_at, members_json) in raw {
            let members: Vec<CanonicalMember> = serde_json::from_str(&members_json)?;
            snapshots.push(CanonicalSnapshot {
                clan_tag: clan_tag.to_string(),
                date: parse_day(&date)?,
                fetched_at: parse_timestamp(&fetched_at)?,
                members,
            });
        }
        Ok(snapshots)
    }

    pub fn earliest_snapshot_date(&self, clan_tag: &str) -> PipelineResult<Option<NaiveDate>> {
        let date: Option<String> = self
            .conn
            .query_row(
                "SELECT MIN(snapshot_date) FROM snapshot WHERE clan_tag = ?1",
                params![clan_tag],
                |row| row.get(0),
            )
            .unwrap_or(None);
        date.map(|d| parse_day(&d)).transpose()
    }

    pub fn snapshot_count(&self, clan_tag: &str) -> PipelineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM snapshot WHERE clan_tag = ?1",
                params![clan_tag],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// The most recent snapshot for a clan, if any. Reporting surfaces
    /// (comparison, ACE) score the latest roster.
    pub fn latest_snapshot(&self, clan_tag: &str) -> PipelineResult<Option<CanonicalSnapshot>> {
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT snapshot_date, fetched_at, members_json
                 FROM snapshot WHERE clan_tag = ?1
                 ORDER BY snapshot_date DESC LIMIT 1",
                params![clan_tag],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();
        match row {
            None => Ok(None),
            Some((date, fetched_at, members_json)) => {
                let members: Vec<CanonicalMember> = serde_json::from_str(&members_json)?;
                Ok(Some(CanonicalSnapshot {
                    clan_tag: clan_tag.to_string(),
                    date: parse_day(&date)?,
                    fetched_at: parse_timestamp(&fetched_at)?,
                    members,
                }))
            }
        }
    }
}

// ── Column conversion helpers ────────────────────────────────────────

pub(crate) fn day_str(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_day(s: &str) -> PipelineResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| PipelineError::Other(anyhow::anyhow!("bad date column '{s}': {e}")))
}

pub(crate) fn parse_timestamp(s: &str) -> PipelineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PipelineError::Other(anyhow::anyhow!("bad timestamp column '{s}': {e}")))
}
