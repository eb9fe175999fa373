//! Roster comparison — one member's standing against the clan.
//!
//! For each tracked metric: the member's value, the clan average and
//! median, a percentile in [0, 100], and a competition rank (1 = best,
//! ties share the better rank). Pure function over the roster; members
//! with an unknown value for a metric are excluded from that metric's
//! population, and an unknown value for the member skips that metric.

use crate::{ace::percentile, canonical::CanonicalMember, types::normalize_tag};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricComparison {
    pub player_value: f64,
    pub clan_average: f64,
    pub clan_median: f64,
    /// Fraction of the roster with a strictly lower value, x100.
    pub percentile: f64,
    /// 1 = highest value; ties share the better rank.
    pub rank: usize,
    pub total_players: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub tag: String,
    pub trophies: Option<MetricComparison>,
    pub donations: Option<MetricComparison>,
    pub donations_received: Option<MetricComparison>,
    pub war_stars: Option<MetricComparison>,
    pub capital_contributions: Option<MetricComparison>,
    pub donation_ratio: Option<MetricComparison>,
}

/// Compare one member against the roster. None when the tag is not on
/// the roster.
pub fn compare_member(tag: &str, roster: &[CanonicalMember]) -> Option<ComparisonReport> {
    let tag = normalize_tag(tag);
    roster.iter().find(|m| m.tag == tag)?;

    let metric = |extract: &dyn Fn(&CanonicalMember) -> Option<f64>| -> Option<MetricComparison> {
        let values: Vec<(bool, f64)> = roster
            .iter()
            .filter_map(|m| extract(m).map(|v| (m.tag == tag, v)))
            .collect();
        let player_value = values.iter().find(|(is_me, _)| *is_me).map(|(_, v)| *v)?;
        Some(compare_value(player_value, &values))
    };

    Some(ComparisonReport {
        tag: tag.clone(),
        trophies: metric(&|m| m.trophies.map(|v| v as f64)),
        donations: metric(&|m| m.donations.map(|v| v as f64)),
        donations_received: metric(&|m| m.donations_received.map(|v| v as f64)),
        war_stars: metric(&|m| m.war_stars.map(|v| v as f64)),
        capital_contributions: metric(&|m| m.capital_contributions.map(|v| v as f64)),
        donation_ratio: metric(&|m| {
            m.donations
                .map(|d| d as f64 / (m.donations_received.unwrap_or(0).max(1)) as f64)
        }),
    })
}

fn compare_value(player_value: f64, values: &[(bool, f64)]) -> MetricComparison {
    let n = values.len();
    let all: Vec<f64> = values.iter().map(|(_, v)| *v).collect();

    let mut sorted = all.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let clan_average = all.iter().sum::<f64>() / n as f64;
    let clan_median = percentile(&sorted, 0.5);

    let below = all.iter().filter(|v| **v < player_value).count();
    let above = all.iter().filter(|v| **v > player_value).count();

    MetricComparison {
        player_value,
        clan_average,
        clan_median,
        percentile: (below as f64 / (n - 1).max(1) as f64 * 100.0).clamp(0.0, 100.0),
        rank: above + 1,
        total_players: n,
    }
}
