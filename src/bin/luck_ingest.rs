use std::fs;

use anyhow::{Context, Result, anyhow};

use threes_luck::args::{arg_value, cli_args, date_arg, has_flag, path_arg};
use threes_luck::config::LuckConfig;
use threes_luck::logging::init_tracing;
use threes_luck::pipeline::{self, CareerSeed};
use threes_luck::source::JsonDirSource;
use threes_luck::store;

fn main() -> Result<()> {
    init_tracing();
    let args = cli_args();

    let cfg = LuckConfig::load(path_arg(&args, "config").as_deref())?;
    let db_path = path_arg(&args, "db")
        .or_else(|| cfg.db_path.clone())
        .unwrap_or_else(store::default_db_path);

    if has_flag(&args, "recompute-existing") {
        let mut conn = store::open_db(&db_path)?;
        let (recency, summary) = pipeline::recompute_existing(&mut conn, &cfg)?;
        println!("Recompute complete");
        println!("DB: {}", db_path.display());
        println!("Games recomputed: {}", summary.ingested);
        println!("Players tracked: {}", recency.len());
        println!("State digest: {}", recency.digest());
        for f in summary.failures.iter().take(10) {
            println!("  - {f}");
        }
        return Ok(());
    }

    let source_dir = path_arg(&args, "source")
        .or_else(|| std::env::var("LUCK_SOURCE_DIR").ok().map(Into::into))
        .context("pass --source <dir> or set LUCK_SOURCE_DIR")?;
    let start = date_arg(&args, "start")?
        .or(cfg.start_date)
        .context("pass --start YYYY-MM-DD or set start_date in config")?;
    let end = date_arg(&args, "end")?.or(cfg.end_date).unwrap_or(start);
    if end < start {
        return Err(anyhow!("end {end} is before start {start}"));
    }

    let mut conn = store::open_db(&db_path)?;
    let mut recency = store::load_recency(&conn, cfg.half_life_3pa)?;

    if let Some(seed_path) = arg_value(&args, "seeds") {
        let raw = fs::read_to_string(&seed_path)
            .with_context(|| format!("read seeds {seed_path}"))?;
        let seeds: Vec<CareerSeed> =
            serde_json::from_str(&raw).with_context(|| format!("parse seeds {seed_path}"))?;
        let applied = pipeline::seed_players(&mut conn, &mut recency, &seeds)?;
        println!("Seeds applied: {applied}/{}", seeds.len());
    }

    let mut source = JsonDirSource::new(source_dir);
    let summary =
        pipeline::run_and_record(&mut conn, &mut recency, &mut source, &cfg, start, end)?;

    println!("Ingest complete");
    println!("DB: {}", db_path.display());
    println!("Range: {start} .. {end} ({} dates)", summary.dates);
    println!("Games ingested: {}", summary.ingested);
    println!("Games skipped (already ingested): {}", summary.skipped);
    println!("Players tracked: {}", recency.len());
    println!("State digest: {}", recency.digest());
    if !summary.failures.is_empty() {
        println!("Failures: {}", summary.failures.len());
        for f in summary.failures.iter().take(10) {
            println!("  - {f}");
        }
    }
    if summary.halted {
        return Err(anyhow!(
            "run halted on an ordering violation; state is valid up to the last committed game"
        ));
    }
    Ok(())
}
