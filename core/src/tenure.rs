//! Tenure ledger — running estimate of continuous membership.
//!
//! The ledger is append-only: an entry fixes a `base` day count as of a
//! date, and the current tenure on day D reads the most recently written
//! entry as `base + max(0, D - as_of)`. Seeding fills gaps for tags with
//! no entry and never overwrites an existing one.

use crate::{
    canonical::CanonicalSnapshot,
    error::PipelineResult,
    store::Store,
    types::{has_identity, normalize_tag, PlayerTag},
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct TenureLedgerEntry {
    pub tag: PlayerTag,
    pub base: i64,
    pub as_of: NaiveDate,
    pub recorded_at: DateTime<Utc>,
}

/// Whole-day difference, clamped to a minimum of 0. A date ordering
/// inversion is 0 days, not an error.
pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    b.signed_duration_since(a).num_days().max(0)
}

pub struct TenureLedger<'a> {
    store: &'a Store,
}

impl<'a> TenureLedger<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Append a base entry for a tag. `base` is floored at 0.
    pub fn record_base(&self, tag: &str, base: i64, as_of: NaiveDate) -> PipelineResult<()> {
        let tag = normalize_tag(tag);
        self.store
            .append_tenure_entry(&tag, base.max(0), as_of, Utc::now())
    }

    /// Current tenure in whole days, from the most recently written
    /// entry for the tag. None when the tag has no ledger entry yet.
    pub fn current_tenure(&self, tag: &str, today: NaiveDate) -> PipelineResult<Option<i64>> {
        let tag = normalize_tag(tag);
        Ok(self
            .store
            .latest_tenure_entry(&tag)?
            .map(|entry| entry.base + days_between(entry.as_of, today)))
    }

    /// Seed ledger entries for every tag in the snapshot history that
    /// has none yet. Returns the number of tags seeded.
    ///
    /// Seeding policy, in order of preference:
    ///   1. earliest snapshot date in which the tag appears,
    ///   2. earliest snapshot date for the clan at all,
    ///   3. a nominal base of 1 — a present member never has zero tenure.
    pub fn seed_from_history(
        &self,
        history: &[CanonicalSnapshot],
        today: NaiveDate,
    ) -> PipelineResult<usize> {
        let mut first_seen: BTreeMap<&str, NaiveDate> = BTreeMap::new();
        for snapshot in history {
            for member in &snapshot.members {
                first_seen
                    .entry(member.tag.as_str())
                    .and_modify(|d| {
                        if snapshot.date < *d {
                            *d = snapshot.date;
                        }
                    })
                    .or_insert(snapshot.date);
            }
        }
        let earliest_clan_date = history.iter().map(|s| s.date).min();

        // Seeding only targets tags still on the roster: members of the
        // latest snapshot. Departed members keep whatever the ledger
        // already says about them. BTreeSet keeps the append order
        // stable across runs.
        let roster: BTreeSet<&str> = match history.iter().max_by_key(|s| s.date) {
            Some(latest) => latest.members.iter().map(|m| m.tag.as_str()).collect(),
            None => return Ok(0),
        };

        let mut seeded = 0;
        for tag in &roster {
            if !has_identity(tag) {
                continue; // identity-less records never reach the ledger
            }
            if self.store.has_tenure_entry(tag)? {
                continue; // never overwrite — seeding fills gaps only
            }
            let base = match first_seen.get(tag).or(earliest_clan_date.as_ref()) {
                Some(first) => days_between(*first, today),
                None => 1, // no history at all: nominal tenure, never zero
            };
            self.record_base(tag, base, today)?;
            seeded += 1;
            log::debug!("tenure: seeded {tag} with base {base} as of {today}");
        }
        Ok(seeded)
    }

    /// Current tenure for every tag in the given roster that has a
    /// ledger entry, as a tag -> days map.
    pub fn effective_tenure_map(
        &self,
        tags: &[PlayerTag],
        today: NaiveDate,
    ) -> PipelineResult<BTreeMap<PlayerTag, i64>> {
        let mut map = BTreeMap::new();
        for tag in tags {
            if let Some(days) = self.current_tenure(tag, today)? {
                map.insert(normalize_tag(tag), days);
            }
        }
        Ok(map)
    }
}
