//! Upstream snapshot boundary.
//!
//! The game API client is a black box behind `SnapshotFetcher`. Fetch
//! failures surface as `UpstreamFetchFailure` and become the enclosing
//! job's terminal `failed` state — retry policy belongs to the caller,
//! not to the derivation components. Implementations must not block
//! indefinitely: a stalled call has to fail within the configured fetch
//! budget so jobs never hang.

use crate::{
    cache::TtlCache,
    canonical::RawSnapshot,
    error::{PipelineError, PipelineResult},
    types::normalize_tag,
};
use chrono::Utc;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

pub trait SnapshotFetcher {
    /// Fetch the current snapshot for a clan. One snapshot per call.
    fn fetch(&self, clan_tag: &str) -> PipelineResult<RawSnapshot>;
}

/// Fixture-backed fetcher: reads snapshot JSON files from a directory.
/// Used by the runner and by tests; real HTTP clients live outside this
/// crate and only need to implement the trait.
pub struct FixtureFetcher {
    dir: PathBuf,
}

impl FixtureFetcher {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Every snapshot fixture in the directory, sorted by file name so
    /// ingestion order is reproducible.
    pub fn load_all(&self) -> PipelineResult<Vec<RawSnapshot>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|e| PipelineError::UpstreamFetchFailure {
                message: format!("fixture dir {}: {e}", self.dir.display()),
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut snapshots = Vec::with_capacity(paths.len());
        for path in paths {
            snapshots.push(Self::read_snapshot(&path)?);
        }
        Ok(snapshots)
    }

    fn read_snapshot(path: &Path) -> PipelineResult<RawSnapshot> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::UpstreamFetchFailure {
                message: format!("read {}: {e}", path.display()),
            }
        })?;
        serde_json::from_str(&text).map_err(|e| PipelineError::UpstreamFetchFailure {
            message: format!("parse {}: {e}", path.display()),
        })
    }
}

impl SnapshotFetcher for FixtureFetcher {
    /// The newest fixture for the clan (by snapshot date).
    fn fetch(&self, clan_tag: &str) -> PipelineResult<RawSnapshot> {
        let wanted = normalize_tag(clan_tag);
        self.load_all()?
            .into_iter()
            .filter(|s| normalize_tag(&s.clan_tag) == wanted)
            .max_by_key(|s| s.snapshot_date)
            .ok_or_else(|| PipelineError::UpstreamFetchFailure {
                message: format!("no fixture snapshot for {wanted}"),
            })
    }
}

/// Decorator that memoizes upstream fetches through an injected TTL
/// cache, keyed by normalized clan tag. Sits at the orchestration
/// boundary so derivation itself stays cache-free.
pub struct CachedFetcher<F> {
    inner: F,
    cache: RefCell<TtlCache<String, RawSnapshot>>,
}

impl<F: SnapshotFetcher> CachedFetcher<F> {
    pub fn new(inner: F, ttl: chrono::Duration) -> Self {
        Self {
            inner,
            cache: RefCell::new(TtlCache::new(ttl)),
        }
    }
}

impl<F: SnapshotFetcher> SnapshotFetcher for CachedFetcher<F> {
    fn fetch(&self, clan_tag: &str) -> PipelineResult<RawSnapshot> {
        let key = normalize_tag(clan_tag);
        let now = Utc::now();
        if let Some(hit) = self.cache.borrow().get(&key, now) {
            log::debug!("fetch {key}: cache hit");
            return Ok(hit);
        }
        let fresh = self.inner.fetch(&key)?;
        self.cache.borrow_mut().insert(key, fresh.clone(), now);
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingFetcher {
        calls: Cell<usize>,
    }

    impl SnapshotFetcher for CountingFetcher {
        fn fetch(&self, clan_tag: &str) -> PipelineResult<RawSnapshot> {
            self.calls.set(self.calls.get() + 1);
            let raw = serde_json::json!({
                "clanTag": clan_tag,
                "snapshotDate": "2025-01-01",
                "members": [],
            });
            Ok(serde_json::from_value(raw)?)
        }
    }

    #[test]
    fn cached_fetcher_memoizes_within_the_ttl() {
        let fetcher = CachedFetcher::new(
            CountingFetcher { calls: Cell::new(0) },
            chrono::Duration::minutes(10),
        );

        fetcher.fetch("#2PR8R8V8P").unwrap();
        fetcher.fetch("#2PR8R8V8P").unwrap();
        assert_eq!(fetcher.inner.calls.get(), 1);

        // A different clan is a different key.
        fetcher.fetch("#8GGG22").unwrap();
        assert_eq!(fetcher.inner.calls.get(), 2);
    }
}
