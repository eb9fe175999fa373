//! ACE scoring — the composite performance score.
//!
//! Five sub-metrics (offense, defense, participation, capital, donation)
//! are normalized across the roster with a robust statistic (median and
//! IQR, IQR floored to 1), clamped to [-2, +2] as z-scores, rescaled to
//! [0, 100], and combined with the fixed `ACE_WEIGHTS_V1` vector. The
//! "core" value re-expresses the bounded composite on an unbounded scale
//! through an inverse logit, for cross-period comparison.
//!
//! Everything here is a pure function of its inputs: no randomness, no
//! wall clock, bit-for-bit reproducible.

use crate::{
    config::{AceWeights, ACE_ALPHA},
    player_day::DerivedDayRow,
    types::PlayerTag,
};
use serde::{Deserialize, Serialize};

// ── Public types ─────────────────────────────────────────────────────

/// Raw sub-metric values for one member, plus the availability fraction.
/// Members with availability <= 0 are excluded from scoring rather than
/// producing a division error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AceInput {
    pub tag: PlayerTag,
    pub offense: f64,
    pub defense: f64,
    pub participation: f64,
    pub capital: f64,
    pub donation: f64,
    /// Fraction of the scoring period the member was present, in (0, 1].
    pub availability: f64,
}

/// The five shrunk sub-component values, each in [0, 100].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AceComponents {
    pub offense: f64,
    pub defense: f64,
    pub participation: f64,
    pub capital: f64,
    pub donation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AceScore {
    pub tag: PlayerTag,
    pub components: AceComponents,
    /// Weighted composite, on a 0-100 scale when the weights sum to 1.
    pub ace: f64,
    /// Availability-adjusted ratio fed to the inverse logit.
    pub logistic: f64,
    /// Unbounded re-expression: ln(p / (1 - p)) / ACE_ALPHA.
    pub core: f64,
}

/// Operator-facing label for the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityBand {
    Inactive,
    Low,
    Moderate,
    High,
    VeryHigh,
}

pub fn activity_band(ace: f64) -> ActivityBand {
    if ace < 25.0 {
        ActivityBand::Inactive
    } else if ace < 45.0 {
        ActivityBand::Low
    } else if ace < 65.0 {
        ActivityBand::Moderate
    } else if ace < 85.0 {
        ActivityBand::High
    } else {
        ActivityBand::VeryHigh
    }
}

// ── Scoring ──────────────────────────────────────────────────────────

/// Score a roster. Members with availability <= 0 are dropped; the
/// result preserves input order for the rest (callers sort as needed).
pub fn score(inputs: &[AceInput], weights: &AceWeights) -> Vec<AceScore> {
    let eligible: Vec<&AceInput> = inputs.iter().filter(|i| i.availability > 0.0).collect();
    if eligible.is_empty() {
        return Vec::new();
    }

    // Per-metric robust normalization parameters across the roster.
    let norms = [
        robust_norm(eligible.iter().map(|i| i.offense)),
        robust_norm(eligible.iter().map(|i| i.defense)),
        robust_norm(eligible.iter().map(|i| i.participation)),
        robust_norm(eligible.iter().map(|i| i.capital)),
        robust_norm(eligible.iter().map(|i| i.donation)),
    ];

    eligible
        .iter()
        .map(|input| {
            let components = AceComponents {
                offense: shrink(input.offense, norms[0]),
                defense: shrink(input.defense, norms[1]),
                participation: shrink(input.participation, norms[2]),
                capital: shrink(input.capital, norms[3]),
                donation: shrink(input.donation, norms[4]),
            };
            let ace = weights.offense * components.offense
                + weights.defense * components.defense
                + weights.participation * components.participation
                + weights.capital * components.capital
                + weights.donation * components.donation;

            let logistic = ace / (100.0 * input.availability);
            let p = logistic.clamp(0.001, 0.999);
            let core = (p / (1.0 - p)).ln() / ACE_ALPHA;

            AceScore {
                tag: input.tag.clone(),
                components,
                ace,
                logistic,
                core,
            }
        })
        .collect()
}

/// (median, iqr) with the IQR floored to 1 so a degenerate, near-constant
/// roster divides by 1 instead of 0.
fn robust_norm(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = percentile(&sorted, 0.5);
    let iqr = (percentile(&sorted, 0.75) - percentile(&sorted, 0.25)).max(1.0);
    (median, iqr)
}

/// Standardize, clamp to [-2, +2] to bound outlier influence, rescale to
/// [0, 100]. The clamp is the shrinkage: one extreme value saturates at
/// the bound instead of dominating the composite.
fn shrink(value: f64, (median, iqr): (f64, f64)) -> f64 {
    let z = ((value - median) / iqr).clamp(-2.0, 2.0);
    ((z + 2.0) / 4.0) * 100.0
}

/// Linear-interpolation percentile on a sorted sample.
pub(crate) fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = p * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

// ── Input assembly ───────────────────────────────────────────────────

impl AceInput {
    /// Build one member's raw sub-metrics from their derived-day window.
    ///
    /// `rows` is the member's derived history inside the scoring window
    /// (ordered, at most one row per day); `window_days` is the window
    /// length. A member with no rows gets availability 0 and is excluded
    /// by `score`.
    pub fn from_history(tag: &str, rows: &[DerivedDayRow], window_days: u32) -> Self {
        let days_present = rows.len() as f64;
        let availability = if window_days == 0 || rows.is_empty() {
            0.0
        } else {
            (days_present / f64::from(window_days)).min(1.0)
        };

        let sum = |field: &str| -> f64 {
            rows.iter()
                .filter_map(|r| r.deltas.get(field))
                .map(|d| *d as f64)
                .sum()
        };
        // Monotonic counters can only grow; a negative delta is a data
        // anomaly upstream and must not subtract here.
        let gain = |field: &str| -> f64 {
            rows.iter()
                .filter_map(|r| r.deltas.get(field))
                .map(|d| (*d).max(0) as f64)
                .sum()
        };

        let active_days = rows
            .iter()
            .filter(|r| {
                r.deltas.values().any(|d| *d != 0)
                    || r.events.iter().any(|e| e != "joined")
            })
            .count() as f64;

        let per_day = days_present.max(1.0);

        Self {
            tag: tag.to_string(),
            offense: (gain("war_stars") * 3.0 + gain("attack_wins")) / per_day,
            defense: gain("defense_wins") / per_day,
            participation: if days_present > 0.0 {
                active_days / days_present
            } else {
                0.0
            },
            capital: gain("capital_contributions") / per_day,
            donation: (sum("donations") - 0.5 * sum("donations_received")) / per_day,
            availability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates_linearly() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 4.0);
        assert_eq!(percentile(&sorted, 0.5), 2.5);
    }

    #[test]
    fn shrink_saturates_at_bounds() {
        let norm = (0.0, 1.0);
        assert_eq!(shrink(1_000_000.0, norm), 100.0);
        assert_eq!(shrink(-1_000_000.0, norm), 0.0);
        assert_eq!(shrink(0.0, norm), 50.0);
    }

    #[test]
    fn bands_match_the_calibration() {
        assert_eq!(activity_band(12.0), ActivityBand::Inactive);
        assert_eq!(activity_band(38.0), ActivityBand::Low);
        assert_eq!(activity_band(47.0), ActivityBand::Moderate);
        assert_eq!(activity_band(70.0), ActivityBand::High);
        assert_eq!(activity_band(90.0), ActivityBand::VeryHigh);
    }
}
