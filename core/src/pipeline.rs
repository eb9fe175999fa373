//! The derivation pass — the unit of work the job queue wraps.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Load the clan's snapshot history, ordered by date. The explicit
//!      sort is what recovers out-of-order or backfilled ingestion.
//!   2. Change detection over adjacent snapshot pairs (informational).
//!   3. Per-member derived-day rows, strictly in date order per member,
//!      persisted through the hash guard (skip / insert / overwrite).
//!   4. Tenure seeding for roster tags with no ledger entry.
//!
//! RULES:
//!   - A pass is single-threaded and deterministic. Passes for different
//!     clans share no mutable state and may run concurrently.
//!   - A record without a usable identity is rejected with a warning;
//!     the batch continues. No partial row is ever written.
//!   - Re-running a pass over unchanged input produces zero net writes.

use crate::{
    canonical::{CanonicalMember, CanonicalSnapshot, RawSnapshot},
    change_detector::detect_changes,
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    player_day::derive_day,
    store::Store,
    tenure::TenureLedger,
    types::{normalize_tag, ClanTag},
};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DerivationSummary {
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub rows_overwritten: u64,
    pub members_seeded: u64,
    pub records_rejected: u64,
    pub change_events: u64,
}

pub struct Pipeline<'a> {
    store: &'a Store,
    config: PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a Store, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Canonicalize and persist one raw snapshot. Returns the clan tag
    /// the snapshot was stored under.
    pub fn ingest_snapshot(&self, raw: &RawSnapshot) -> PipelineResult<ClanTag> {
        let snapshot = CanonicalSnapshot::from_raw(raw)?;
        self.store.upsert_snapshot(&snapshot)?;
        log::debug!(
            "ingested snapshot {} for {} ({} members)",
            snapshot.date,
            snapshot.clan_tag,
            snapshot.members.len(),
        );
        Ok(snapshot.clan_tag)
    }

    /// Run one full derivation pass over a clan's snapshot history.
    pub fn run_derivation(&self, clan_tag: &str) -> PipelineResult<DerivationSummary> {
        let clan_tag = normalize_tag(clan_tag);
        let history = self.store.snapshots_for_clan(&clan_tag)?;
        let mut summary = DerivationSummary::default();

        if history.is_empty() {
            log::info!("derivation for {clan_tag}: no snapshots, nothing to do");
            return Ok(summary);
        }

        // Informational change detection over adjacent pairs.
        for pair in history.windows(2) {
            let events = detect_changes(&pair[0], &pair[1]);
            summary.change_events += events.len() as u64;
            if !events.is_empty() {
                log::info!(
                    "{clan_tag} {} -> {}: {} change events",
                    pair[0].date,
                    pair[1].date,
                    events.len(),
                );
            }
        }

        // Per-member timelines, in date order. BTreeMap keeps the member
        // iteration order stable across runs.
        let mut timelines: BTreeMap<&str, Vec<(NaiveDate, &CanonicalMember)>> = BTreeMap::new();
        for snapshot in &history {
            for member in &snapshot.members {
                let timeline = timelines.entry(member.tag.as_str()).or_default();
                // A duplicated tag inside one snapshot is a data anomaly;
                // first match wins so the date chain stays strict.
                if timeline.last().is_some_and(|(d, _)| *d == snapshot.date) {
                    log::warn!(
                        "data anomaly: {} listed twice in snapshot {}",
                        member.tag, snapshot.date,
                    );
                    continue;
                }
                timeline.push((snapshot.date, member));
            }
        }

        for (tag, timeline) in &timelines {
            match self.derive_member(&clan_tag, timeline, &mut summary) {
                Ok(()) => {}
                Err(PipelineError::MissingIdentity { context }) => {
                    // Fatal for this record only; the batch continues.
                    summary.records_rejected += timeline.len() as u64;
                    log::warn!("derivation for {clan_tag}: rejected {tag}: {context}");
                }
                Err(e) => return Err(e),
            }
        }

        // Tenure seeding uses the latest snapshot date as "today" so a
        // backfill pass stays deterministic regardless of when it runs.
        // History is sorted ascending, so the last snapshot is newest.
        if let Some(latest) = history.last() {
            let ledger = TenureLedger::new(self.store);
            summary.members_seeded = ledger.seed_from_history(&history, latest.date)? as u64;
        }

        log::info!(
            "derivation for {clan_tag}: {} written, {} skipped, {} overwritten, {} seeded",
            summary.rows_written,
            summary.rows_skipped,
            summary.rows_overwritten,
            summary.members_seeded,
        );
        Ok(summary)
    }

    /// Derive and persist every day row for one member, oldest first.
    /// Deltas chain strictly against the immediately preceding row.
    fn derive_member(
        &self,
        clan_tag: &str,
        timeline: &[(NaiveDate, &CanonicalMember)],
        summary: &mut DerivationSummary,
    ) -> PipelineResult<()> {
        let first_day = match timeline.first() {
            Some((day, _)) => *day,
            None => return Ok(()),
        };
        let tag = &timeline[0].1.tag;
        let mut previous = self.store.latest_row_before(tag, first_day)?;

        for (day, member) in timeline {
            let row = derive_day(previous.as_ref(), member, *day, &self.config.notability)?;

            match self.store.stored_row_hash(tag, *day)? {
                Some(stored) if stored == row.snapshot_hash => {
                    summary.rows_skipped += 1;
                }
                Some(_) => {
                    // Source snapshot was corrected: overwrite.
                    self.store.upsert_derived_row(clan_tag, &row, Utc::now())?;
                    summary.rows_overwritten += 1;
                }
                None => {
                    self.store.upsert_derived_row(clan_tag, &row, Utc::now())?;
                    summary.rows_written += 1;
                }
            }

            previous = Some(row);
        }
        Ok(())
    }
}
