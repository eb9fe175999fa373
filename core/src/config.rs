//! Pipeline configuration and the versioned constant tables.
//!
//! The notability weights and ACE weights are deliberately named with a
//! version suffix: scores persisted or cached under one table must never
//! silently change meaning. Bump the version when a weight changes.

use serde::{Deserialize, Serialize};

// ── Notability weights (v1) ──────────────────────────────────────────

/// Weights for the notability score: a non-negative weighted sum over
/// event significance and delta magnitudes. Every weight is >= 0, so the
/// score is monotonic — adding an event or growing a delta magnitude can
/// never lower it — and a day with no deltas and no events scores 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotabilityWeights {
    pub town_hall_upgrade:  f64,
    pub hero_upgrade:       f64,
    pub exp_level_up:       f64,
    pub joined:             f64,
    // Per-unit-of-|delta| weights.
    pub war_stars:          f64,
    pub attack_wins:        f64,
    pub defense_wins:       f64,
    pub trophies:           f64,
    pub ranked_trophies:    f64,
    pub donations:          f64,
    pub donations_received: f64,
    pub capital_contributions: f64,
}

pub const NOTABILITY_WEIGHTS_V1: NotabilityWeights = NotabilityWeights {
    town_hall_upgrade:  40.0,
    hero_upgrade:       25.0,
    exp_level_up:       8.0,
    joined:             10.0,
    war_stars:          3.0,
    attack_wins:        1.0,
    defense_wins:       0.5,
    trophies:           0.05,
    ranked_trophies:    0.05,
    donations:          0.02,
    donations_received: 0.01,
    capital_contributions: 0.01,
};

impl Default for NotabilityWeights {
    fn default() -> Self {
        NOTABILITY_WEIGHTS_V1
    }
}

// ── ACE weights (v1) ─────────────────────────────────────────────────

/// The fixed weight vector for the five ACE sub-metrics. Must sum to 1
/// so the composite stays on the 0-100 scale of its components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AceWeights {
    pub offense:       f64,
    pub defense:       f64,
    pub participation: f64,
    pub capital:       f64,
    pub donation:      f64,
}

impl AceWeights {
    pub fn sum(&self) -> f64 {
        self.offense + self.defense + self.participation + self.capital + self.donation
    }
}

pub const ACE_WEIGHTS_V1: AceWeights = AceWeights {
    offense:       0.40,
    defense:       0.15,
    participation: 0.20,
    capital:       0.15,
    donation:      0.10,
};

impl Default for AceWeights {
    fn default() -> Self {
        ACE_WEIGHTS_V1
    }
}

/// Calibration constant for the inverse-logit "core" value:
/// core = ln(p / (1 - p)) / ACE_ALPHA, with p clamped to [0.001, 0.999].
pub const ACE_ALPHA: f64 = 2.0;

/// Hard ceiling on history query windows, matching the upstream API's
/// own limit.
pub const HISTORY_MAX_DAYS: u32 = 90;

// ── Runtime knobs ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub notability: NotabilityWeights,
    pub ace_weights: AceWeights,
    /// Bounded worker count for backfill parallelism across members.
    /// Kept small to respect upstream rate limits.
    pub max_workers: usize,
    /// Upstream fetch budget; a stalled call fails after this interval
    /// so the enclosing job goes to `failed` instead of hanging.
    pub fetch_timeout_secs: u64,
    /// History queries clamp their day window to this many days.
    pub history_max_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            notability: NOTABILITY_WEIGHTS_V1,
            ace_weights: ACE_WEIGHTS_V1,
            max_workers: 4,
            fetch_timeout_secs: 30,
            history_max_days: HISTORY_MAX_DAYS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ace_weights_sum_to_one() {
        assert!((ACE_WEIGHTS_V1.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn notability_weights_are_non_negative() {
        let w = NOTABILITY_WEIGHTS_V1;
        for v in [
            w.town_hall_upgrade, w.hero_upgrade, w.exp_level_up, w.joined,
            w.war_stars, w.attack_wins, w.defense_wins, w.trophies,
            w.ranked_trophies, w.donations, w.donations_received,
            w.capital_contributions,
        ] {
            assert!(v >= 0.0);
        }
    }
}
