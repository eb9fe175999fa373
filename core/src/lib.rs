//! clashintel-core — the analytics derivation pipeline behind the clan
//! intelligence dashboard.
//!
//! Raw daily snapshots flow one direction:
//!   snapshot -> change detection (informational)
//!            -> derived-day rows (persisted, hash-guarded)
//!            -> tenure ledger   (persisted, append-only)
//!            -> ACE scores      (computed on demand)
//! with the ingestion job queue wrapping the fetch-and-derive unit of
//! work. Every write is idempotent: re-running a pass over unchanged
//! input is a no-op.

pub mod ace;
pub mod cache;
pub mod canonical;
pub mod change_detector;
pub mod comparison;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod job_queue;
pub mod pipeline;
pub mod player_day;
pub mod store;
pub mod tenure;
pub mod types;
