use anyhow::{Result, anyhow};

use threes_luck::args::{arg_value, cli_args, date_arg, has_flag, path_arg};
use threes_luck::config::LuckConfig;
use threes_luck::logging::init_tracing;
use threes_luck::rapm::{fit_ratings, player_directory};
use threes_luck::store;

fn main() -> Result<()> {
    init_tracing();
    let args = cli_args();
    let mut cfg = LuckConfig::load(path_arg(&args, "config").as_deref())?;
    if let Some(raw) = arg_value(&args, "alpha") {
        cfg.ridge_penalty = raw
            .parse::<f64>()
            .map_err(|_| anyhow!("--alpha expects a number, got {raw}"))?;
    }
    if let Some(start) = date_arg(&args, "start")? {
        cfg.rapm_start_date = Some(start);
    }
    if let Some(end) = date_arg(&args, "end")? {
        cfg.rapm_end_date = Some(end);
    }
    if has_flag(&args, "playoffs") {
        cfg.playoffs = true;
    }
    cfg.validate()?;
    let top = arg_value(&args, "top")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(10);
    let db_path = path_arg(&args, "db")
        .or_else(|| cfg.db_path.clone())
        .unwrap_or_else(store::default_db_path);

    let mut conn = store::open_db(&db_path)?;
    let stints = store::load_stints(&conn)?;
    let directory = player_directory(&store::load_onoff_rows(&conn)?);
    let ratings = fit_ratings(&stints, &directory, &cfg)?;
    let written = store::replace_ratings(&mut conn, &ratings)?;

    let scope = cfg.rapm_window();
    println!("Impact ratings fitted from {} stints", stints.len());
    println!(
        "Scope: {:?} {} .. {}",
        scope.season_type,
        scope.start.map_or_else(|| "open".to_string(), |d| d.to_string()),
        scope.end.map_or_else(|| "open".to_string(), |d| d.to_string())
    );
    println!("DB: {}", db_path.display());
    println!("Ratings written: {written}");

    let mut labels = ratings
        .iter()
        .map(|r| r.window_label.as_str())
        .collect::<Vec<_>>();
    labels.dedup();
    for label in labels {
        println!();
        println!("{label} (alpha={})", cfg.ridge_penalty);
        for r in ratings
            .iter()
            .filter(|r| r.window_label == label && r.alpha == cfg.ridge_penalty)
            .take(top)
        {
            println!(
                "{:<24} {:>7.0} min  rapm {:+6.2}  o {:+6.2}  d {:+6.2}  raw {:+6.2}",
                r.player_name, r.minutes, r.rapm, r.orapm, r.drapm, r.rapm_raw
            );
        }
    }
    Ok(())
}
