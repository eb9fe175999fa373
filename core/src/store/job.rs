//! Ingestion job persistence. The dedup check-and-insert runs inside a
//! single immediate transaction so two concurrent enqueues for the same
//! clan can never both insert.

use super::{parse_timestamp, Store};
use crate::{
    error::PipelineResult,
    job_queue::{JobRecord, JobState},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

impl Store {
    /// Atomic dedup: return the id of an existing pending-or-running job
    /// for the clan, or insert a fresh pending job under `new_job_id`.
    /// The bool is true when a new job was created.
    pub fn find_or_create_job(
        &self,
        clan_tag: &str,
        new_job_id: &str,
        created_at: DateTime<Utc>,
    ) -> PipelineResult<(String, bool)> {
        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT job_id FROM ingest_job
                 WHERE clan_tag = ?1 AND state IN ('pending', 'running')
                 ORDER BY created_at ASC LIMIT 1",
                params![clan_tag],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(job_id) = existing {
            tx.commit()?;
            return Ok((job_id, false));
        }

        tx.execute(
            "INSERT INTO ingest_job (job_id, clan_tag, state, attempts, created_at)
             VALUES (?1, ?2, 'pending', 0, ?3)",
            params![new_job_id, clan_tag, created_at.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok((new_job_id.to_string(), true))
    }

    pub fn get_job(&self, job_id: &str) -> PipelineResult<Option<JobRecord>> {
        let raw: Option<(String, String, i64, Option<String>, String, Option<String>, Option<String>)> =
            self.conn()
                .query_row(
                    "SELECT clan_tag, state, attempts, error,
                            created_at, started_at, finished_at
                     FROM ingest_job WHERE job_id = ?1",
                    params![job_id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    },
                )
                .optional()?;

        match raw {
            None => Ok(None),
            Some((clan_tag, state, attempts, error, created_at, started_at, finished_at)) => {
                Ok(Some(JobRecord {
                    job_id: job_id.to_string(),
                    clan_tag,
                    state: JobState::parse(&state)?,
                    attempts,
                    error,
                    created_at: parse_timestamp(&created_at)?,
                    started_at: started_at.as_deref().map(parse_timestamp).transpose()?,
                    finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
                }))
            }
        }
    }

    /// Move a pending job to running, bumping the attempt counter.
    pub fn mark_job_running(
        &self,
        job_id: &str,
        started_at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE ingest_job
             SET state = 'running', attempts = attempts + 1, started_at = ?1
             WHERE job_id = ?2",
            params![started_at.to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    /// Record a terminal state (`completed` or `failed`).
    pub fn finish_job(
        &self,
        job_id: &str,
        state: JobState,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE ingest_job
             SET state = ?1, error = ?2, finished_at = ?3
             WHERE job_id = ?4",
            params![state.as_str(), error, finished_at.to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    /// Oldest pending job id for a clan, if any.
    pub fn next_pending_job(&self, clan_tag: &str) -> PipelineResult<Option<String>> {
        self.conn()
            .query_row(
                "SELECT job_id FROM ingest_job
                 WHERE clan_tag = ?1 AND state = 'pending'
                 ORDER BY created_at ASC LIMIT 1",
                params![clan_tag],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }
}
