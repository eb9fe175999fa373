//! ingest-runner: headless ingestion runner for the clan intelligence
//! pipeline.
//!
//! Usage:
//!   ingest-runner --fixtures ./fixtures --db clan.db
//!   ingest-runner --fixtures ./fixtures --clan '#2PR8R8V8P' --window 30

use anyhow::Result;
use clashintel_core::{
    ace::{self, AceInput},
    comparison,
    config::PipelineConfig,
    fetcher::{CachedFetcher, FixtureFetcher},
    job_queue::IngestionJobQueue,
    pipeline::Pipeline,
    store::Store,
    tenure::TenureLedger,
    types::normalize_tag,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = arg_value(&args, "--db").unwrap_or_else(|| ":memory:".to_string());
    let fixtures = arg_value(&args, "--fixtures").unwrap_or_else(|| "./fixtures".to_string());
    let clan_arg = arg_value(&args, "--clan");
    let window: u32 = arg_value(&args, "--window")
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);

    println!("clashintel — ingest-runner");
    println!("  db:       {db}");
    println!("  fixtures: {fixtures}");
    println!("  window:   {window} days");
    println!();

    let store = Store::open(&db)?;
    store.migrate()?;

    let config = PipelineConfig::default();
    let pipeline = Pipeline::new(&store, config.clone());
    let fetcher = FixtureFetcher::new(&fixtures);

    // Backfill: ingest every fixture snapshot, oldest first.
    let snapshots = fetcher.load_all()?;
    if snapshots.is_empty() {
        anyhow::bail!("no snapshot fixtures under {fixtures}");
    }
    let clan_tag = match clan_arg {
        Some(tag) => normalize_tag(&tag),
        None => normalize_tag(&snapshots[0].clan_tag),
    };
    let mut ingested = 0usize;
    for raw in &snapshots {
        if normalize_tag(&raw.clan_tag) == clan_tag {
            pipeline.ingest_snapshot(raw)?;
            ingested += 1;
        }
    }
    log::info!("ingested {ingested} fixture snapshots for {clan_tag}");

    // Drive the derivation through the job queue, like production does.
    // The TTL cache keeps repeated runs from re-reading the fixtures.
    let cached = CachedFetcher::new(fetcher, chrono::Duration::minutes(10));
    let queue = IngestionJobQueue::new(&store);
    let job_id = queue.enqueue(&clan_tag)?;
    let (_, summary) = queue
        .run_pending(&clan_tag, &cached, &pipeline)?
        .ok_or_else(|| anyhow::anyhow!("no pending job after enqueue"))?;
    let job = queue.get_job(&job_id)?;

    println!("=== RUN SUMMARY ===");
    println!("  clan:            {clan_tag}");
    println!("  job:             {job_id} ({})", job.state.as_str());
    println!("  snapshots:       {}", store.snapshot_count(&clan_tag)?);
    println!("  rows written:    {}", summary.rows_written);
    println!("  rows skipped:    {}", summary.rows_skipped);
    println!("  rows overwritten: {}", summary.rows_overwritten);
    println!("  members seeded:  {}", summary.members_seeded);
    println!("  change events:   {}", summary.change_events);
    println!("  tenure entries:  {}", store.tenure_entry_count()?);
    println!();

    print_ace_table(&store, &clan_tag, window, &config)?;
    Ok(())
}

fn print_ace_table(
    store: &Store,
    clan_tag: &str,
    window: u32,
    config: &PipelineConfig,
) -> Result<()> {
    let latest = match store.latest_snapshot(clan_tag)? {
        Some(s) => s,
        None => return Ok(()),
    };

    let inputs: Vec<AceInput> = latest
        .members
        .iter()
        .map(|m| {
            let rows = store.player_history(&m.tag, window, latest.date)?;
            Ok(AceInput::from_history(&m.tag, &rows, window))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut scores = ace::score(&inputs, &config.ace_weights);
    scores.sort_by(|a, b| b.ace.partial_cmp(&a.ace).unwrap_or(std::cmp::Ordering::Equal));

    let roster_tags: Vec<String> = latest.members.iter().map(|m| m.tag.clone()).collect();
    let tenure = TenureLedger::new(store).effective_tenure_map(&roster_tags, latest.date)?;

    println!("=== ACE ({} members, {}-day window) ===", scores.len(), window);
    for s in &scores {
        let name = latest
            .member(&s.tag)
            .map(|m| m.name.as_str())
            .unwrap_or("?");
        println!(
            "  {:<12} {:<16} ace={:>6.1} core={:>6.2} tenure={:>4}d band={:?}",
            s.tag,
            name,
            s.ace,
            s.core,
            tenure.get(&s.tag).copied().unwrap_or(0),
            ace::activity_band(s.ace),
        );
    }

    // Roster standing for the top scorer.
    if let Some(top) = scores.first() {
        if let Some(report) = comparison::compare_member(&top.tag, &latest.members) {
            println!();
            println!("=== TOP MEMBER vs CLAN ({}) ===", top.tag);
            for (label, metric) in [
                ("trophies", &report.trophies),
                ("donations", &report.donations),
                ("war stars", &report.war_stars),
                ("capital", &report.capital_contributions),
            ] {
                if let Some(m) = metric {
                    println!(
                        "  {:<10} value={:>8.0} median={:>8.1} pct={:>5.1} rank={}/{}",
                        label, m.player_value, m.clan_median, m.percentile, m.rank, m.total_players,
                    );
                }
            }
        }
    }
    Ok(())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}
