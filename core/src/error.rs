use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record has no usable member tag: {context}")]
    MissingIdentity { context: String },

    #[error("Snapshots out of chronological order for {tag}")]
    InvalidDateOrdering { tag: String },

    #[error("Upstream fetch failed: {message}")]
    UpstreamFetchFailure { message: String },

    #[error("Job '{job_id}' not found")]
    JobNotFound { job_id: String },

    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
