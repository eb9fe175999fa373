//! Ingestion job queue — dedup, sequencing, and status for derivation
//! passes.
//!
//! RULES:
//!   - At most one pending-or-running job per clan. Enqueueing while one
//!     is in flight returns the existing job's id (not an error).
//!   - The state machine is monotonic: pending -> running ->
//!     {completed | failed}. No backward transitions, ever.
//!   - Polling is advisory. The queue guarantees an eventual terminal
//!     state, not a latency bound.

use crate::{
    error::{PipelineError, PipelineResult},
    fetcher::SnapshotFetcher,
    pipeline::{DerivationSummary, Pipeline},
    store::Store,
    types::{is_valid_tag, normalize_tag, ClanTag},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> PipelineResult<Self> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(PipelineError::Other(anyhow::anyhow!(
                "unknown job state '{other}'"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Position in the monotonic state machine.
    fn rank(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Completed | JobState::Failed => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub clan_tag: ClanTag,
    pub state: JobState,
    pub attempts: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub struct IngestionJobQueue<'a> {
    store: &'a Store,
}

impl<'a> IngestionJobQueue<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Enqueue a derivation pass for a clan. Returns the id of the
    /// existing pending/running job when one is already in flight.
    /// Rejects tags outside the upstream alphabet at this boundary, the
    /// same way the dashboard API does.
    pub fn enqueue(&self, clan_tag: &str) -> PipelineResult<String> {
        let clan_tag = normalize_tag(clan_tag);
        if !is_valid_tag(&clan_tag) {
            return Err(PipelineError::MissingIdentity {
                context: format!("clan tag '{clan_tag}' is not a valid tag"),
            });
        }
        let candidate = uuid::Uuid::new_v4().to_string();
        let (job_id, created) = self
            .store
            .find_or_create_job(&clan_tag, &candidate, Utc::now())?;
        if created {
            log::info!("job {job_id}: enqueued derivation for {clan_tag}");
        } else {
            log::debug!("job {job_id}: already in flight for {clan_tag}, deduped");
        }
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: &str) -> PipelineResult<JobState> {
        self.store
            .get_job(job_id)?
            .map(|job| job.state)
            .ok_or_else(|| PipelineError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    pub fn get_job(&self, job_id: &str) -> PipelineResult<JobRecord> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| PipelineError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Execute the oldest pending job for a clan: fetch one snapshot,
    /// ingest it, run the derivation pass. Fetch failures become the
    /// job's terminal `failed` state — retry policy belongs to callers,
    /// and a re-run is safe because every write is idempotent.
    pub fn run_pending(
        &self,
        clan_tag: &str,
        fetcher: &dyn SnapshotFetcher,
        pipeline: &Pipeline<'_>,
    ) -> PipelineResult<Option<(String, DerivationSummary)>> {
        let clan_tag = normalize_tag(clan_tag);
        let job_id = match self.store.next_pending_job(&clan_tag)? {
            Some(id) => id,
            None => return Ok(None),
        };

        self.transition(&job_id, JobState::Running)?;

        let outcome = fetcher
            .fetch(&clan_tag)
            .and_then(|raw| pipeline.ingest_snapshot(&raw))
            .and_then(|_| pipeline.run_derivation(&clan_tag));

        match outcome {
            Ok(summary) => {
                self.transition(&job_id, JobState::Completed)?;
                log::info!(
                    "job {job_id}: completed ({} written, {} skipped, {} overwritten)",
                    summary.rows_written, summary.rows_skipped, summary.rows_overwritten,
                );
                Ok(Some((job_id, summary)))
            }
            Err(e) => {
                let message = e.to_string();
                self.fail(&job_id, &message)?;
                log::warn!("job {job_id}: failed: {message}");
                Err(e)
            }
        }
    }

    /// Apply a forward-only state transition.
    fn transition(&self, job_id: &str, to: JobState) -> PipelineResult<()> {
        let job = self.get_job(job_id)?;
        if to.rank() <= job.state.rank() {
            return Err(PipelineError::InvalidStateTransition {
                from: job.state.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        match to {
            JobState::Running => self.store.mark_job_running(job_id, Utc::now()),
            JobState::Completed => self.store.finish_job(job_id, to, None, Utc::now()),
            JobState::Failed => self.store.finish_job(job_id, to, None, Utc::now()),
            JobState::Pending => unreachable!("pending is never a transition target"),
        }
    }

    fn fail(&self, job_id: &str, message: &str) -> PipelineResult<()> {
        let job = self.get_job(job_id)?;
        if job.state.is_terminal() {
            return Err(PipelineError::InvalidStateTransition {
                from: job.state.as_str().to_string(),
                to: JobState::Failed.as_str().to_string(),
            });
        }
        self.store
            .finish_job(job_id, JobState::Failed, Some(message), Utc::now())
    }
}
