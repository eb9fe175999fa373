//! Tenure ledger persistence: appends and latest-write-wins reads.

use super::{day_str, parse_day, parse_timestamp, Store};
use crate::{error::PipelineResult, tenure::TenureLedgerEntry};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl Store {
    /// Append one ledger entry. Entries are never edited; a new entry
    /// supersedes older reads for the same tag.
    pub fn append_tenure_entry(
        &self,
        tag: &str,
        base: i64,
        as_of: chrono::NaiveDate,
        recorded_at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        self.conn().execute(
            "INSERT INTO tenure_ledger (member_tag, base, as_of, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![tag, base, day_str(as_of), recorded_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// The winning entry for a tag: latest by write timestamp, with the
    /// rowid as the final tie-break. Explicit ordering — never iteration
    /// order of an unordered collection.
    pub fn latest_tenure_entry(&self, tag: &str) -> PipelineResult<Option<TenureLedgerEntry>> {
        let raw: Option<(i64, String, String)> = self
            .conn()
            .query_row(
                "SELECT base, as_of, recorded_at FROM tenure_ledger
                 WHERE member_tag = ?1
                 ORDER BY recorded_at DESC, id DESC LIMIT 1",
                params![tag],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();
        match raw {
            None => Ok(None),
            Some((base, as_of, recorded_at)) => Ok(Some(TenureLedgerEntry {
                tag: tag.to_string(),
                base,
                as_of: parse_day(&as_of)?,
                recorded_at: parse_timestamp(&recorded_at)?,
            })),
        }
    }

    pub fn has_tenure_entry(&self, tag: &str) -> PipelineResult<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM tenure_ledger WHERE member_tag = ?1",
            params![tag],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn tenure_entry_count(&self) -> PipelineResult<i64> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM tenure_ledger", [], |row| row.get(0))
            .map_err(Into::into)
    }
}
