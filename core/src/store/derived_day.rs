//! Derived-day row persistence: hash-guarded keyed upserts and ordered
//! history reads.

use super::{day_str, parse_day, Store};
use crate::{error::PipelineResult, player_day::DerivedDayRow};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::params;

impl Store {
    /// Stored content hash for (member, day), if a row exists. The
    /// caller compares against a freshly computed hash: equal means
    /// skip, different means overwrite.
    pub fn stored_row_hash(&self, tag: &str, day: NaiveDate) -> PipelineResult<Option<String>> {
        let hash: Option<String> = self
            .conn()
            .query_row(
                "SELECT snapshot_hash FROM derived_day
                 WHERE member_tag = ?1 AND day = ?2",
                params![tag, day_str(day)],
                |row| row.get(0),
            )
            .ok();
        Ok(hash)
    }

    /// Idempotent keyed upsert for one derived row. A whole row is
    /// written or nothing is — there is no partial update path.
    pub fn upsert_derived_row(
        &self,
        clan_tag: &str,
        row: &DerivedDayRow,
        written_at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        self.conn().execute(
            "INSERT INTO derived_day (
                member_tag, day, clan_tag, member_json, deltas_json,
                events_json, notability, snapshot_hash, written_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(member_tag, day) DO UPDATE SET
                clan_tag = excluded.clan_tag,
                member_json = excluded.member_json,
                deltas_json = excluded.deltas_json,
                events_json = excluded.events_json,
                notability = excluded.notability,
                snapshot_hash = excluded.snapshot_hash,
                written_at = excluded.written_at",
            params![
                row.tag,
                day_str(row.day),
                clan_tag,
                serde_json::to_string(&row.member)?,
                serde_json::to_string(&row.deltas)?,
                serde_json::to_string(&row.events)?,
                row.notability,
                row.snapshot_hash,
                written_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// The member's most recent row strictly before `day`. Derivation
    /// resumes from here when a pass starts mid-history.
    pub fn latest_row_before(
        &self,
        tag: &str,
        day: NaiveDate,
    ) -> PipelineResult<Option<DerivedDayRow>> {
        let raw: Option<(String, String, String, String, f64, String)> = self
            .conn()
            .query_row(
                "SELECT day, member_json, deltas_json, events_json, notability, snapshot_hash
                 FROM derived_day
                 WHERE member_tag = ?1 AND day < ?2
                 ORDER BY day DESC LIMIT 1",
                params![tag, day_str(day)],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .ok();
        raw.map(|r| hydrate_row(tag, r)).transpose()
    }

    /// Ordered rows for one member covering the last `days` days up to
    /// and including `today`. The window is clamped to [1, 90], the same
    /// ceiling the upstream API enforces.
    pub fn player_history(
        &self,
        tag: &str,
        days: u32,
        today: NaiveDate,
    ) -> PipelineResult<Vec<DerivedDayRow>> {
        let days = days.clamp(1, crate::config::HISTORY_MAX_DAYS);
        let since = today - chrono::Duration::days(i64::from(days));
        let mut stmt = self.conn().prepare(
            "SELECT day, member_json, deltas_json, events_json, notability, snapshot_hash
             FROM derived_day
             WHERE member_tag = ?1 AND day > ?2 AND day <= ?3
             ORDER BY day ASC",
        )?;
        let raw: Vec<(String, String, String, String, f64, String)> = stmt
            .query_map(params![tag, day_str(since), day_str(today)], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(|r| hydrate_row(tag, r)).collect()
    }

    pub fn derived_row_count(&self, clan_tag: &str) -> PipelineResult<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM derived_day WHERE clan_tag = ?1",
                params![clan_tag],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}

fn hydrate_row(
    tag: &str,
    (day, member_json, deltas_json, events_json, notability, snapshot_hash): (
        String,
        String,
        String,
        String,
        f64,
        String,
    ),
) -> PipelineResult<DerivedDayRow> {
    Ok(DerivedDayRow {
        tag: tag.to_string(),
        day: parse_day(&day)?,
        member: serde_json::from_str(&member_json)?,
        deltas: serde_json::from_str(&deltas_json)?,
        events: serde_json::from_str(&events_json)?,
        notability,
        snapshot_hash,
    })
}
