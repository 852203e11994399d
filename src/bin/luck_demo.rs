use anyhow::{Context, Result, anyhow};

use threes_luck::args::{arg_value, cli_args, has_flag, path_arg};
use threes_luck::config::LuckConfig;
use threes_luck::history::{SeasonWindow, build_history};
use threes_luck::logging::init_tracing;
use threes_luck::pipeline;
use threes_luck::rapm::{fit_ratings, player_directory};
use threes_luck::recency::RecencyStore;
use threes_luck::source::MemorySource;
use threes_luck::store;
use threes_luck::synthetic::{SyntheticConfig, generate_season, star_id};

fn main() -> Result<()> {
    init_tracing();
    let args = cli_args();

    let mut synth = SyntheticConfig::default();
    if let Some(raw) = arg_value(&args, "seed") {
        synth.seed = raw.parse().with_context(|| format!("--seed expects an integer, got {raw}"))?;
    }
    if let Some(raw) = arg_value(&args, "days") {
        synth.days = raw.parse().with_context(|| format!("--days expects an integer, got {raw}"))?;
    }
    if let Some(raw) = arg_value(&args, "star-impact") {
        synth.star_impact = raw
            .parse()
            .with_context(|| format!("--star-impact expects a number, got {raw}"))?;
    }

    let mut cfg = LuckConfig::load(path_arg(&args, "config").as_deref())?;
    if !has_flag(&args, "keep-min-minutes") {
        // A demo season is far shorter than a real one.
        cfg.rapm_min_minutes = cfg.rapm_min_minutes.min(100.0);
    }
    let games = generate_season(&synth);
    let (Some(first), Some(last)) = (games.first(), games.last()) else {
        return Err(anyhow!("synthetic season produced no games"));
    };
    let (start, end) = (first.date, last.date);

    let mut conn = match path_arg(&args, "db") {
        Some(path) => store::open_db(&path)?,
        None => store::open_in_memory()?,
    };
    let mut recency = store::load_recency(&conn, cfg.half_life_3pa)?;
    let mut source = MemorySource::from_games(games.iter().cloned());
    let summary =
        pipeline::run_and_record(&mut conn, &mut recency, &mut source, &cfg, start, end)?;

    let replayed = RecencyStore::replay(cfg.half_life_3pa, recency.log())?;
    let adjusted = store::load_adjusted_games(&conn)?;
    let rows = store::load_onoff_rows(&conn)?;
    let hist = build_history(&rows, SeasonWindow::default());
    store::replace_history(&mut conn, &hist)?;
    let stints = store::load_stints(&conn)?;
    let ratings = fit_ratings(&stints, &player_directory(&rows), &cfg)?;
    store::replace_ratings(&mut conn, &ratings)?;

    println!("Synthetic season: {} games {start} .. {end}", games.len());
    println!(
        "Ingested {} skipped {} failed {}",
        summary.ingested,
        summary.skipped,
        summary.failures.len()
    );
    println!("State digest: {}", recency.digest());
    println!(
        "Replay digest matches: {}",
        replayed.digest() == recency.digest()
    );

    let mut swings = adjusted.iter().collect::<Vec<_>>();
    swings.sort_by(|a, b| b.margin_delta.abs().total_cmp(&a.margin_delta.abs()));
    println!();
    println!("Biggest luck swings");
    for g in swings.iter().take(5) {
        let who = g
            .swing
            .as_ref()
            .map(|s| format!("{} {:+.1}", s.name, s.delta_pts))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {} {}v{} {:.0}-{:.0} -> {:.1}-{:.1}  swing {who}",
            g.date,
            g.game_id,
            g.home.abbr,
            g.away.abbr,
            g.home.points_actual,
            g.away.points_actual,
            g.home.points_adj,
            g.away.points_adj
        );
    }

    println!();
    println!("Top adjusted on/off");
    for h in hist.iter().take(5) {
        println!(
            "{:<16} {:>6.1} min  on/off {:+6.2}  adj {:+6.2}",
            h.player_name, h.minutes_total, h.on_off_diff_avg, h.on_off_diff_adj_avg
        );
    }

    println!();
    println!("Top impact (alpha={})", cfg.ridge_penalty);
    for r in ratings
        .iter()
        .filter(|r| r.alpha == cfg.ridge_penalty && !r.window_label.starts_with("Last"))
        .take(5)
    {
        let mark = if r.player_id == star_id() { " *" } else { "" };
        println!(
            "{:<16} {} rapm {:+6.2}  o {:+6.2}  d {:+6.2}{mark}",
            r.player_name, r.window_label, r.rapm, r.orapm, r.drapm
        );
    }
    Ok(())
}
