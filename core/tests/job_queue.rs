use clashintel_core::canonical::RawSnapshot;
use clashintel_core::config::PipelineConfig;
use clashintel_core::error::{PipelineError, PipelineResult};
use clashintel_core::fetcher::SnapshotFetcher;
use clashintel_core::job_queue::{IngestionJobQueue, JobState};
use clashintel_core::pipeline::Pipeline;
use clashintel_core::store::Store;
use serde_json::json;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn test_store() -> Store {
    let store = Store::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

/// Deterministic fetcher: either serves a one-member snapshot or fails
/// the way a timed-out upstream call does.
struct FakeFetcher {
    fail: bool,
}

impl SnapshotFetcher for FakeFetcher {
    fn fetch(&self, clan_tag: &str) -> PipelineResult<RawSnapshot> {
        if self.fail {
            return Err(PipelineError::UpstreamFetchFailure {
                message: "connection timed out after 30s".to_string(),
            });
        }
        let raw = json!({
            "clanTag": clan_tag,
            "snapshotDate": "2025-01-05",
            "members": [
                { "tag": "#2PP", "name": "Alpha", "trophies": 3000, "donations": 40 }
            ]
        });
        Ok(serde_json::from_value(raw)?)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Enqueueing while a job is pending returns the existing job's id — at
/// most one in-flight derivation pass per clan.
#[test]
fn enqueue_dedupes_per_clan() {
    let store = test_store();
    let queue = IngestionJobQueue::new(&store);

    let first = queue.enqueue("#2PR8R8V8P").unwrap();
    let second = queue.enqueue("#2PR8R8V8P").unwrap();
    assert_eq!(first, second);

    // A different clan gets its own job.
    let other = queue.enqueue("#8GGG22").unwrap();
    assert_ne!(first, other);
}

/// Dedup keys on the normalized tag: case differences are one clan.
#[test]
fn dedup_is_case_insensitive() {
    let store = test_store();
    let queue = IngestionJobQueue::new(&store);

    let first = queue.enqueue("#2pr8r8v8p").unwrap();
    let second = queue.enqueue("#2PR8R8V8P").unwrap();
    assert_eq!(first, second);
}

/// pending -> running -> completed, with timestamps and attempts filled.
#[test]
fn successful_run_reaches_completed() {
    let store = test_store();
    let queue = IngestionJobQueue::new(&store);
    let pipeline = Pipeline::new(&store, PipelineConfig::default());

    let job_id = queue.enqueue("#2PR8R8V8P").unwrap();
    assert_eq!(queue.get_status(&job_id).unwrap(), JobState::Pending);

    let result = queue
        .run_pending("#2PR8R8V8P", &FakeFetcher { fail: false }, &pipeline)
        .unwrap();
    let (ran_id, summary) = result.unwrap();
    assert_eq!(ran_id, job_id);
    assert_eq!(summary.rows_written, 1);

    let job = queue.get_job(&job_id).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());
    assert!(job.error.is_none());
}

/// An upstream fetch failure lands the job in `failed` with the message
/// attached; it is not retried inline.
#[test]
fn fetch_failure_fails_the_job_with_a_message() {
    let store = test_store();
    let queue = IngestionJobQueue::new(&store);
    let pipeline = Pipeline::new(&store, PipelineConfig::default());

    let job_id = queue.enqueue("#2PR8R8V8P").unwrap();
    let err = queue
        .run_pending("#2PR8R8V8P", &FakeFetcher { fail: true }, &pipeline)
        .unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamFetchFailure { .. }));

    let job = queue.get_job(&job_id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error.as_deref().unwrap_or("").contains("timed out"));
}

/// Terminal states are terminal: after completion there is nothing
/// pending, and a new enqueue creates a fresh job.
#[test]
fn terminal_jobs_never_move_backwards() {
    let store = test_store();
    let queue = IngestionJobQueue::new(&store);
    let pipeline = Pipeline::new(&store, PipelineConfig::default());

    let first = queue.enqueue("#2PR8R8V8P").unwrap();
    queue
        .run_pending("#2PR8R8V8P", &FakeFetcher { fail: false }, &pipeline)
        .unwrap();

    // Nothing pending anymore.
    let nothing = queue
        .run_pending("#2PR8R8V8P", &FakeFetcher { fail: false }, &pipeline)
        .unwrap();
    assert!(nothing.is_none());

    // The completed job is unchanged; a new enqueue is a new job.
    assert_eq!(queue.get_status(&first).unwrap(), JobState::Completed);
    let second = queue.enqueue("#2PR8R8V8P").unwrap();
    assert_ne!(first, second);
}

/// Tags outside the upstream alphabet are rejected at the enqueue
/// boundary instead of producing a junk job.
#[test]
fn invalid_clan_tag_is_rejected() {
    let store = test_store();
    let queue = IngestionJobQueue::new(&store);
    let err = queue.enqueue("#INVALID!").unwrap_err();
    assert!(matches!(err, PipelineError::MissingIdentity { .. }));
}

/// Unknown job ids are reported as such.
#[test]
fn unknown_job_is_an_error() {
    let store = test_store();
    let queue = IngestionJobQueue::new(&store);
    let err = queue.get_status("no-such-job").unwrap_err();
    assert!(matches!(err, PipelineError::JobNotFound { .. }));
}
