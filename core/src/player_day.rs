//! Derived-day rows — the append-only per-member-per-day fact table.
//!
//! `derive_day` turns (previous row, current canonical state) into one
//! new row: field deltas, semantic events, a notability score, and a
//! content hash over the comparable fields. The hash is the idempotence
//! mechanism: the persisting caller skips the write when the stored hash
//! for (member, day) matches, and overwrites when it differs (the source
//! snapshot was corrected).

use crate::{
    canonical::CanonicalMember,
    config::NotabilityWeights,
    error::{PipelineError, PipelineResult},
    types::{has_identity, PlayerTag},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedDayRow {
    pub tag: PlayerTag,
    pub day: NaiveDate,
    pub member: CanonicalMember,
    /// Signed change per numeric field vs. the immediately preceding row.
    /// Empty on a member's first-ever row. A field unknown on either side
    /// produces no entry — deltas are never computed across an unknown.
    pub deltas: BTreeMap<String, i64>,
    pub events: Vec<String>,
    pub notability: f64,
    pub snapshot_hash: String,
}

/// Derive the row for one member on one day.
///
/// `previous` is the member's immediately preceding derived row, or None
/// on the member's first-ever day. Errors with `MissingIdentity` when
/// `current` lacks a usable tag — fatal for this record only.
pub fn derive_day(
    previous: Option<&DerivedDayRow>,
    current: &CanonicalMember,
    day: NaiveDate,
    weights: &NotabilityWeights,
) -> PipelineResult<DerivedDayRow> {
    if !has_identity(&current.tag) {
        return Err(PipelineError::MissingIdentity {
            context: format!("member '{}' on {day}", current.name),
        });
    }
    if let Some(prev) = previous {
        // Deltas are only meaningful against the immediate predecessor.
        if prev.day >= day {
            return Err(PipelineError::InvalidDateOrdering {
                tag: current.tag.clone(),
            });
        }
    }

    let deltas = compute_deltas(previous.map(|p| &p.member), current);
    let events = compute_events(previous.map(|p| &p.member), current, day);
    let notability = notability_score(&deltas, &events, weights);
    let snapshot_hash = row_hash(current, day, &deltas, &events);

    Ok(DerivedDayRow {
        tag: current.tag.clone(),
        day,
        member: current.clone(),
        deltas,
        events,
        notability,
        snapshot_hash,
    })
}

fn compute_deltas(
    previous: Option<&CanonicalMember>,
    current: &CanonicalMember,
) -> BTreeMap<String, i64> {
    let mut deltas = BTreeMap::new();
    let prev = match previous {
        Some(p) => p,
        None => return deltas,
    };
    let old_fields = prev.numeric_fields();
    for (idx, (field, new_value)) in current.numeric_fields().iter().enumerate() {
        let (_, old_value) = old_fields[idx];
        if let (Some(old), Some(new)) = (old_value, *new_value) {
            deltas.insert((*field).to_string(), new - old);
        }
    }
    deltas
}

fn compute_events(
    previous: Option<&CanonicalMember>,
    current: &CanonicalMember,
    day: NaiveDate,
) -> Vec<String> {
    let mut events = Vec::new();
    let prev = match previous {
        Some(p) => p,
        None => {
            events.push("joined".to_string());
            return events;
        }
    };

    let old_fields = prev.upgrade_fields();
    for (idx, (field, event_tag, new_value)) in current.upgrade_fields().iter().enumerate() {
        let (_, _, old_value) = old_fields[idx];
        if let (Some(old), Some(new)) = (old_value, *new_value) {
            if new > old {
                events.push((*event_tag).to_string());
            } else if new < old {
                log::warn!(
                    "data anomaly: {} {} decreased {} -> {} on {}",
                    current.tag, field, old, new, day,
                );
            }
        }
    }
    events
}

/// Non-negative weighted sum over event significance and delta
/// magnitudes. Monotonic by construction: all weights are >= 0 and
/// deltas contribute by absolute value.
fn notability_score(
    deltas: &BTreeMap<String, i64>,
    events: &[String],
    weights: &NotabilityWeights,
) -> f64 {
    let mut score = 0.0;

    for event in events {
        score += match event.as_str() {
            "town_hall_upgrade" => weights.town_hall_upgrade,
            "exp_level_up" => weights.exp_level_up,
            "joined" => weights.joined,
            e if e.starts_with("hero_upgrade:") => weights.hero_upgrade,
            _ => 0.0,
        };
    }

    for (field, delta) in deltas {
        let per_unit = match field.as_str() {
            "war_stars" => weights.war_stars,
            "attack_wins" => weights.attack_wins,
            "defense_wins" => weights.defense_wins,
            "trophies" => weights.trophies,
            "ranked_trophies" => weights.ranked_trophies,
            "donations" => weights.donations,
            "donations_received" => weights.donations_received,
            "capital_contributions" => weights.capital_contributions,
            _ => 0.0,
        };
        score += per_unit * delta.unsigned_abs() as f64;
    }

    score
}

/// Stable content hash over the row's comparable fields. Write
/// timestamps are excluded. The field order is fixed — append new fields
/// at the end, never reorder — so identical comparable content always
/// produces the same hash across call order and process restarts.
fn row_hash(
    member: &CanonicalMember,
    day: NaiveDate,
    deltas: &BTreeMap<String, i64>,
    events: &[String],
) -> String {
    let mut hasher = blake3::Hasher::new();
    let mut feed = |part: &str| {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    };

    feed(&member.tag);
    feed(&day.format("%Y-%m-%d").to_string());
    feed(&member.name);
    feed(member.role.as_deref().unwrap_or("?"));
    for (field, value) in member.numeric_fields() {
        match value {
            Some(v) => feed(&format!("{field}={v}")),
            None => feed(&format!("{field}=?")),
        }
    }
    for (field, delta) in deltas {
        feed(&format!("d:{field}={delta}"));
    }
    for event in events {
        feed(&format!("e:{event}"));
    }

    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NOTABILITY_WEIGHTS_V1;

    fn member(tag: &str) -> CanonicalMember {
        CanonicalMember {
            tag: tag.to_string(),
            name: "Test".to_string(),
            role: Some("member".to_string()),
            town_hall: Some(14),
            exp_level: Some(180),
            trophies: Some(4000),
            ranked_trophies: None,
            donations: Some(100),
            donations_received: Some(50),
            war_stars: Some(900),
            attack_wins: Some(10),
            defense_wins: Some(2),
            capital_contributions: Some(50_000),
            achievements: None,
            hero_bk: Some(50),
            hero_aq: Some(55),
            hero_gw: Some(30),
            hero_rc: None,
            hero_mp: None,
        }
    }

    #[test]
    fn first_row_has_empty_deltas_and_a_joined_event() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let row = derive_day(None, &member("#2PP"), date, &NOTABILITY_WEIGHTS_V1).unwrap();
        assert!(row.deltas.is_empty());
        assert_eq!(row.events, vec!["joined".to_string()]);
        assert!(row.notability > 0.0);
    }

    #[test]
    fn invalid_tag_is_missing_identity() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut m = member("#2PP");
        m.tag = "#".to_string();
        let err = derive_day(None, &m, date, &NOTABILITY_WEIGHTS_V1).unwrap_err();
        assert!(matches!(err, PipelineError::MissingIdentity { .. }));
    }

    #[test]
    fn unknown_fields_never_produce_deltas() {
        let d1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let first = derive_day(None, &member("#2PP"), d1, &NOTABILITY_WEIGHTS_V1).unwrap();

        let mut today = member("#2PP");
        today.trophies = None; // unknown today, known yesterday
        let row = derive_day(Some(&first), &today, d2, &NOTABILITY_WEIGHTS_V1).unwrap();
        assert!(!row.deltas.contains_key("trophies"));
        assert!(row.deltas.contains_key("donations"));
    }
}
