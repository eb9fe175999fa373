//! Canonical record types and the raw-payload mapping layer.
//!
//! RULE: The upstream payload is loosely typed — optional fields and
//! multiple aliases for the same logical field. It is translated into
//! the canonical shape exactly once, here, upstream of all derivation.
//! No derivation code ever touches a raw record.

use crate::{
    error::{PipelineError, PipelineResult},
    types::{normalize_tag, ClanTag, PlayerTag},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Raw upstream shapes ──────────────────────────────────────────────

/// One member as the upstream returns it. Absent numeric fields mean
/// "unknown", never zero.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMember {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, alias = "th")]
    pub town_hall_level: Option<i64>,
    #[serde(default)]
    pub trophies: Option<i64>,
    #[serde(default)]
    pub ranked_trophies: Option<i64>,
    #[serde(default)]
    pub donations: Option<i64>,
    #[serde(default)]
    pub donations_received: Option<i64>,
    #[serde(default)]
    pub war_stars: Option<i64>,
    #[serde(default)]
    pub attack_wins: Option<i64>,
    #[serde(default)]
    pub defense_wins: Option<i64>,
    #[serde(default, alias = "capitalContributions")]
    pub clan_capital_contributions: Option<i64>,
    #[serde(default)]
    pub exp_level: Option<i64>,
    #[serde(default)]
    pub achievements: Option<i64>,
    // Hero levels, under the short aliases the snapshot writer uses and
    // the long names the game API uses.
    #[serde(default, alias = "barbarianKing")]
    pub bk: Option<i64>,
    #[serde(default, alias = "archerQueen")]
    pub aq: Option<i64>,
    #[serde(default, alias = "grandWarden")]
    pub gw: Option<i64>,
    #[serde(default, alias = "royalChampion")]
    pub rc: Option<i64>,
    #[serde(default, alias = "minionPrince")]
    pub mp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    pub clan_tag: String,
    pub snapshot_date: NaiveDate,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    pub members: Vec<RawMember>,
}

// ── Canonical shapes ─────────────────────────────────────────────────

/// The strictly-typed member shape all derivation consumes. Tags are
/// normalized on construction; every numeric field beyond identity is
/// optional (unknown, not zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMember {
    pub tag: PlayerTag,
    pub name: String,
    pub role: Option<String>,
    pub town_hall: Option<i64>,
    pub exp_level: Option<i64>,
    pub trophies: Option<i64>,
    pub ranked_trophies: Option<i64>,
    pub donations: Option<i64>,
    pub donations_received: Option<i64>,
    pub war_stars: Option<i64>,
    pub attack_wins: Option<i64>,
    pub defense_wins: Option<i64>,
    pub capital_contributions: Option<i64>,
    pub achievements: Option<i64>,
    pub hero_bk: Option<i64>,
    pub hero_aq: Option<i64>,
    pub hero_gw: Option<i64>,
    pub hero_rc: Option<i64>,
    pub hero_mp: Option<i64>,
}

impl CanonicalMember {
    pub fn from_raw(raw: &RawMember) -> Self {
        Self {
            tag: normalize_tag(&raw.tag),
            name: raw.name.clone(),
            role: raw.role.clone(),
            town_hall: raw.town_hall_level,
            exp_level: raw.exp_level,
            trophies: raw.trophies,
            ranked_trophies: raw.ranked_trophies,
            donations: raw.donations,
            donations_received: raw.donations_received,
            war_stars: raw.war_stars,
            attack_wins: raw.attack_wins,
            defense_wins: raw.defense_wins,
            capital_contributions: raw.clan_capital_contributions,
            achievements: raw.achievements,
            hero_bk: raw.bk,
            hero_aq: raw.aq,
            hero_gw: raw.gw,
            hero_rc: raw.rc,
            hero_mp: raw.mp,
        }
    }

    /// Every numeric field, in the fixed order used for deltas and for
    /// the content hash. The order is part of the hash contract — append
    /// only, never reorder.
    pub fn numeric_fields(&self) -> [(&'static str, Option<i64>); 16] {
        [
            ("town_hall", self.town_hall),
            ("exp_level", self.exp_level),
            ("trophies", self.trophies),
            ("ranked_trophies", self.ranked_trophies),
            ("donations", self.donations),
            ("donations_received", self.donations_received),
            ("war_stars", self.war_stars),
            ("attack_wins", self.attack_wins),
            ("defense_wins", self.defense_wins),
            ("capital_contributions", self.capital_contributions),
            ("achievements", self.achievements),
            ("hero_bk", self.hero_bk),
            ("hero_aq", self.hero_aq),
            ("hero_gw", self.hero_gw),
            ("hero_rc", self.hero_rc),
            ("hero_mp", self.hero_mp),
        ]
    }

    /// Monotonic-upgrade fields: the upstream never decreases these.
    /// A strict increase emits the paired event tag; a decrease is a
    /// data anomaly (logged, never an event).
    pub fn upgrade_fields(&self) -> [(&'static str, &'static str, Option<i64>); 7] {
        [
            ("town_hall", "town_hall_upgrade", self.town_hall),
            ("exp_level", "exp_level_up", self.exp_level),
            ("hero_bk", "hero_upgrade:bk", self.hero_bk),
            ("hero_aq", "hero_upgrade:aq", self.hero_aq),
            ("hero_gw", "hero_upgrade:gw", self.hero_gw),
            ("hero_rc", "hero_upgrade:rc", self.hero_rc),
            ("hero_mp", "hero_upgrade:mp", self.hero_mp),
        ]
    }
}

/// One immutable roster snapshot: a clan's members on a calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalSnapshot {
    pub clan_tag: ClanTag,
    pub date: NaiveDate,
    pub fetched_at: DateTime<Utc>,
    pub members: Vec<CanonicalMember>,
}

impl CanonicalSnapshot {
    /// Map a raw upstream snapshot into canonical form. Member tags are
    /// normalized here; records that still lack a usable tag are kept —
    /// the deriver rejects them per record so one bad entry never aborts
    /// a batch.
    pub fn from_raw(raw: &RawSnapshot) -> PipelineResult<Self> {
        if raw.clan_tag.trim().is_empty() {
            return Err(PipelineError::MissingIdentity {
                context: format!("snapshot for {} has no clan tag", raw.snapshot_date),
            });
        }
        Ok(Self {
            clan_tag: normalize_tag(&raw.clan_tag),
            date: raw.snapshot_date,
            fetched_at: raw.fetched_at.unwrap_or_default(),
            members: raw.members.iter().map(CanonicalMember::from_raw).collect(),
        })
    }

    pub fn member(&self, tag: &str) -> Option<&CanonicalMember> {
        self.members.iter().find(|m| m.tag == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_aliases_map_to_the_same_canonical_field() {
        let short: RawMember =
            serde_json::from_str(r##"{"tag":"#abc","name":"A","bk":50}"##).unwrap();
        let long: RawMember =
            serde_json::from_str(r##"{"tag":"#abc","name":"A","barbarianKing":50}"##).unwrap();

        assert_eq!(CanonicalMember::from_raw(&short).hero_bk, Some(50));
        assert_eq!(CanonicalMember::from_raw(&long).hero_bk, Some(50));
    }

    #[test]
    fn absent_fields_stay_unknown() {
        let raw: RawMember = serde_json::from_str(r##"{"tag":"#abc","name":"A"}"##).unwrap();
        let member = CanonicalMember::from_raw(&raw);
        assert_eq!(member.trophies, None);
        assert_eq!(member.hero_aq, None);
    }

    #[test]
    fn mapping_normalizes_tags() {
        let raw: RawMember = serde_json::from_str(r##"{"tag":"#def456","name":"B"}"##).unwrap();
        assert_eq!(CanonicalMember::from_raw(&raw).tag, "#DEF456");
    }
}
