use chrono::NaiveDate;
use clashintel_core::ace::AceInput;
use clashintel_core::canonical::RawSnapshot;
use clashintel_core::config::PipelineConfig;
use clashintel_core::pipeline::Pipeline;
use clashintel_core::store::Store;
use clashintel_core::tenure::TenureLedger;
use serde_json::json;

// ── Helpers ──────────────────────────────────────────────────────────────────

const CLAN: &str = "#2PR8R8V8P";

fn test_store() -> Store {
    let store = Store::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn raw_snapshot(date: &str, members: serde_json::Value) -> RawSnapshot {
    serde_json::from_value(json!({
        "clanTag": CLAN,
        "snapshotDate": date,
        "members": members,
    }))
    .unwrap()
}

fn alpha(trophies: i64, donations: i64, bk: i64) -> serde_json::Value {
    json!({
        "tag": "#ABC123", "name": "Alpha", "role": "leader",
        "townHallLevel": 14, "trophies": trophies, "donations": donations,
        "donationsReceived": 30, "warStars": 500, "bk": bk, "aq": 55,
        "clanCapitalContributions": 10000,
    })
}

fn bravo(trophies: i64) -> serde_json::Value {
    json!({
        "tag": "#DEF456", "name": "Bravo", "role": "member",
        "townHallLevel": 12, "trophies": trophies, "donations": 10,
        "donationsReceived": 60, "warStars": 120, "bk": 40,
    })
}

fn three_day_history(pipeline: &Pipeline<'_>) {
    let days = [
        raw_snapshot("2025-01-01", json!([alpha(3000, 100, 50), bravo(2000)])),
        raw_snapshot("2025-01-02", json!([alpha(3050, 140, 50), bravo(2010)])),
        raw_snapshot("2025-01-03", json!([alpha(3060, 180, 51), bravo(2010)])),
    ];
    for raw in &days {
        pipeline.ingest_snapshot(raw).unwrap();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Re-running the full pipeline over an unchanged snapshot sequence
/// produces zero net writes — every stored hash matches.
#[test]
fn rerun_over_unchanged_input_is_a_no_op() {
    let store = test_store();
    let pipeline = Pipeline::new(&store, PipelineConfig::default());
    three_day_history(&pipeline);

    let first = pipeline.run_derivation(CLAN).unwrap();
    assert_eq!(first.rows_written, 6, "2 members x 3 days");
    assert_eq!(first.rows_skipped, 0);

    let second = pipeline.run_derivation(CLAN).unwrap();
    assert_eq!(second.rows_written, 0);
    assert_eq!(second.rows_overwritten, 0);
    assert_eq!(second.rows_skipped, 6);
    assert_eq!(store.derived_row_count(CLAN).unwrap(), 6);
}

/// A corrected source snapshot overwrites exactly the rows whose
/// comparable content changed; everything else skips.
#[test]
fn corrected_snapshot_overwrites_only_affected_rows() {
    let store = test_store();
    let pipeline = Pipeline::new(&store, PipelineConfig::default());
    three_day_history(&pipeline);
    pipeline.run_derivation(CLAN).unwrap();

    // Upstream corrects Alpha's trophies for day 2. Bravo is untouched.
    let corrected = raw_snapshot("2025-01-02", json!([alpha(3055, 140, 50), bravo(2010)]));
    pipeline.ingest_snapshot(&corrected).unwrap();

    let rerun = pipeline.run_derivation(CLAN).unwrap();
    assert_eq!(rerun.rows_written, 0);
    // Alpha day 2 changes directly; Alpha day 3's deltas chain off day 2,
    // so that row's content changes too. Bravo's three rows all skip.
    assert_eq!(rerun.rows_overwritten, 2);
    assert_eq!(rerun.rows_skipped, 4);
}

/// Snapshots ingested out of chronological order are recovered by
/// sorting before derivation: deltas still chain day by day.
#[test]
fn out_of_order_ingestion_is_recovered_by_sorting() {
    let store = test_store();
    let pipeline = Pipeline::new(&store, PipelineConfig::default());

    // Day 3 arrives first, then day 1, then day 2.
    pipeline
        .ingest_snapshot(&raw_snapshot("2025-01-03", json!([alpha(3060, 180, 51)])))
        .unwrap();
    pipeline
        .ingest_snapshot(&raw_snapshot("2025-01-01", json!([alpha(3000, 100, 50)])))
        .unwrap();
    pipeline
        .ingest_snapshot(&raw_snapshot("2025-01-02", json!([alpha(3050, 140, 50)])))
        .unwrap();

    pipeline.run_derivation(CLAN).unwrap();

    assert_eq!(
        store.earliest_snapshot_date(CLAN).unwrap(),
        Some(day("2025-01-01")),
    );

    let history = store
        .player_history("#ABC123", 30, day("2025-01-03"))
        .unwrap();
    assert_eq!(history.len(), 3);
    assert!(history[0].deltas.is_empty(), "first-ever row has no deltas");
    assert_eq!(history[1].deltas.get("trophies"), Some(&50));
    assert_eq!(history[2].deltas.get("trophies"), Some(&10));
    assert!(history[2].events.contains(&"hero_upgrade:bk".to_string()));
}

/// A record without a usable tag is rejected with a warning; the rest of
/// the batch derives normally and nothing partial is written for it.
#[test]
fn missing_identity_does_not_abort_the_batch() {
    let store = test_store();
    let pipeline = Pipeline::new(&store, PipelineConfig::default());

    let mixed = raw_snapshot(
        "2025-01-01",
        json!([
            alpha(3000, 100, 50),
            { "tag": "", "name": "Ghost", "trophies": 1 },
        ]),
    );
    pipeline.ingest_snapshot(&mixed).unwrap();

    let summary = pipeline.run_derivation(CLAN).unwrap();
    assert_eq!(summary.rows_written, 1);
    assert_eq!(summary.records_rejected, 1);
    assert_eq!(store.derived_row_count(CLAN).unwrap(), 1);
}

/// The pass seeds tenure for roster tags with no ledger entry, using the
/// latest snapshot date as "today" so backfills stay deterministic.
#[test]
fn derivation_seeds_tenure_from_first_appearance() {
    let store = test_store();
    let pipeline = Pipeline::new(&store, PipelineConfig::default());

    // Bravo joins on day 2.
    pipeline
        .ingest_snapshot(&raw_snapshot("2025-01-01", json!([alpha(3000, 100, 50)])))
        .unwrap();
    pipeline
        .ingest_snapshot(&raw_snapshot(
            "2025-01-11",
            json!([alpha(3050, 140, 50), bravo(2000)]),
        ))
        .unwrap();

    let summary = pipeline.run_derivation(CLAN).unwrap();
    assert_eq!(summary.members_seeded, 2);

    let ledger = TenureLedger::new(&store);
    assert_eq!(
        ledger.current_tenure("#ABC123", day("2025-01-11")).unwrap(),
        Some(10),
    );
    assert_eq!(
        ledger.current_tenure("#DEF456", day("2025-01-11")).unwrap(),
        Some(0),
    );
}

/// History windows clamp to the 90-day ceiling.
#[test]
fn history_window_clamps_to_ninety_days() {
    let store = test_store();
    let pipeline = Pipeline::new(&store, PipelineConfig::default());

    // 120 daily snapshots of a single member.
    let start = day("2025-01-01");
    for offset in 0..120 {
        let date = start + chrono::Duration::days(offset);
        let raw = raw_snapshot(
            &date.format("%Y-%m-%d").to_string(),
            json!([alpha(3000 + offset, 100, 50)]),
        );
        pipeline.ingest_snapshot(&raw).unwrap();
    }
    pipeline.run_derivation(CLAN).unwrap();

    let today = start + chrono::Duration::days(119);
    let history = store.player_history("#ABC123", 200, today).unwrap();
    assert_eq!(history.len(), 90);
}

/// ACE inputs assemble from the derived history: a member active every
/// day has full availability; an absent member is excluded downstream.
#[test]
fn ace_inputs_assemble_from_derived_history() {
    let store = test_store();
    let pipeline = Pipeline::new(&store, PipelineConfig::default());
    three_day_history(&pipeline);
    pipeline.run_derivation(CLAN).unwrap();

    let today = day("2025-01-03");
    let rows = store.player_history("#ABC123", 30, today).unwrap();
    let input = AceInput::from_history("#ABC123", &rows, 30);
    assert!(input.availability > 0.0 && input.availability <= 1.0);
    assert!(input.donation > 0.0, "Alpha donates more than they receive");

    let no_rows = store.player_history("#NOBODY", 30, today).unwrap();
    let absent = AceInput::from_history("#NOBODY", &no_rows, 30);
    assert_eq!(absent.availability, 0.0);
}
