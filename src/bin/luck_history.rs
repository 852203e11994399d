use anyhow::Result;

use threes_luck::args::{arg_value, cli_args, date_arg, has_flag, path_arg};
use threes_luck::accuracy::{MINUTES_TOLERANCE, onoff_accuracy};
use threes_luck::config::LuckConfig;
use threes_luck::history::{build_history, daily_boxscore};
use threes_luck::logging::init_tracing;
use threes_luck::store;

fn main() -> Result<()> {
    init_tracing();
    let args = cli_args();
    let mut cfg = LuckConfig::load(path_arg(&args, "config").as_deref())?;
    let db_path = path_arg(&args, "db")
        .or_else(|| cfg.db_path.clone())
        .unwrap_or_else(store::default_db_path);
    let top = arg_value(&args, "top")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(15);

    if let Some(start) = date_arg(&args, "season-start")? {
        cfg.season_start = Some(start);
    }
    if let Some(end) = date_arg(&args, "season-end")? {
        cfg.season_end = Some(end);
    }
    if has_flag(&args, "playoffs") {
        cfg.playoffs = true;
    }
    cfg.validate()?;
    let window = cfg.history_window();

    let mut conn = store::open_db(&db_path)?;
    let rows = store::load_onoff_rows(&conn)?;
    let hist = build_history(&rows, window);
    let written = store::replace_history(&mut conn, &hist)?;

    println!("History rebuilt from {} on/off rows", rows.len());
    println!("DB: {}", db_path.display());
    println!("Player seasons: {written}");
    println!(
        "{:<24} {:>8} {:>6} {:>8} {:>10} {:>10}",
        "player", "season", "games", "min", "on/off", "on/off adj"
    );
    for h in hist.iter().take(top) {
        println!(
            "{:<24} {:>8} {:>6} {:>8.1} {:>10.2} {:>10.2}",
            h.player_name, h.season, h.games, h.minutes_total, h.on_off_diff_avg, h.on_off_diff_adj_avg
        );
    }

    if has_flag(&args, "accuracy") {
        let acc = onoff_accuracy(&store::load_games(&conn)?, &rows);
        println!();
        println!("Lineup reconstruction vs official box ({} rows)", acc.rows);
        println!(
            "plus-minus: n={} mean_abs={:.3} max_abs={:.1} exact={:.1}%",
            acc.plus_minus.samples,
            acc.plus_minus.mean_abs,
            acc.plus_minus.max_abs,
            acc.plus_minus.match_rate * 100.0
        );
        println!(
            "minutes:    n={} mean_abs={:.3} max_abs={:.2} within {MINUTES_TOLERANCE} min={:.1}%",
            acc.minutes.samples,
            acc.minutes.mean_abs,
            acc.minutes.max_abs,
            acc.minutes.match_rate * 100.0
        );
    }

    if let Some(date) = date_arg(&args, "boxscore-date")? {
        let day = rows.iter().filter(|r| r.date == date).cloned().collect::<Vec<_>>();
        println!();
        println!("Daily box score {date}");
        for line in daily_boxscore(&day) {
            println!(
                "{} {:<24} {:>6.1} +/- {:>6.1} -> {:>6.1} ({:+.2})  on/off {:>6.1} -> {:>6.1} ({:+.2})",
                line.game_id,
                line.player_name,
                line.minutes,
                line.plus_minus_actual,
                line.plus_minus_adjusted,
                line.plus_minus_delta,
                line.on_off_actual,
                line.on_off_adjusted,
                line.on_off_delta
            );
        }
    }
    Ok(())
}
