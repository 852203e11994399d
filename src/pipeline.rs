//! Date-range ingestion.
//!
//! Dates run ascending and games within a date by `game_id`. For each game
//! the adjusted row, on/off rows and stints are computed from one pre-game
//! snapshot, the state transition is planned, and everything commits in one
//! transaction before the in-memory state moves. A failed game leaves both
//! the db and the state untouched and the run continues; an ordering
//! violation stops it.
//!
//! `recompute_existing` replays the stored games into freshly cleared
//! derived tables, for a config change that must apply to history.

use std::fmt;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::adjust::{GameAdjustment, adjust_game};
use crate::config::LuckConfig;
use crate::error::LuckError;
use crate::model::{GameRecord, PlayerId};
use crate::onoff::{OnOffGame, compute_onoff};
use crate::recency::{RecencyStore, tallies_for};
use crate::source::BoxScoreSource;
use crate::store;

#[derive(Debug, Clone, PartialEq)]
pub struct GameFailure {
    pub date: NaiveDate,
    /// `None` when the whole date failed at the source.
    pub game_id: Option<String>,
    pub error: LuckError,
}

impl fmt::Display for GameFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.game_id {
            Some(id) => write!(f, "{} {id}: {}", self.date, self.error),
            None => write!(f, "{}: {}", self.date, self.error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    pub dates: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub failures: Vec<GameFailure>,
    /// Set when an ordering violation stopped the run early.
    pub halted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Ingested,
    Skipped,
}

/// Everything a game yields, computed without touching any state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredGame {
    pub adjustment: GameAdjustment,
    pub onoff: OnOffGame,
}

/// Both views from the same snapshot.
pub fn score_game(
    game: &GameRecord,
    recency: &RecencyStore,
    cfg: &LuckConfig,
) -> Result<ScoredGame, LuckError> {
    let adjustment = adjust_game(game, recency, cfg)?;
    let onoff = compute_onoff(game, &adjustment.players, cfg)?;
    Ok(ScoredGame { adjustment, onoff })
}

fn storage(err: anyhow::Error) -> LuckError {
    LuckError::Storage(format!("{err:#}"))
}

pub fn ingest_game(
    conn: &mut Connection,
    recency: &mut RecencyStore,
    game: &GameRecord,
    cfg: &LuckConfig,
) -> Result<GameOutcome, LuckError> {
    if recency.has_game(&game.game_id) || store::has_game(conn, &game.game_id).map_err(storage)? {
        debug!(game_id = %game.game_id, "already ingested; skipped");
        return Ok(GameOutcome::Skipped);
    }
    score_and_commit(conn, recency, game, cfg)?;
    Ok(GameOutcome::Ingested)
}

fn score_and_commit(
    conn: &mut Connection,
    recency: &mut RecencyStore,
    game: &GameRecord,
    cfg: &LuckConfig,
) -> Result<(), LuckError> {
    let scored = score_game(game, recency, cfg)?;
    let update = recency.plan_game(&game.game_id, game.date, &tallies_for(game))?;
    store::commit_game(conn, game, &scored.adjustment.row, &scored.onoff, &update).map_err(storage)?;
    recency.commit(update);

    let row = &scored.adjustment.row;
    info!(
        game_id = %game.game_id,
        date = %game.date,
        home = %row.home.abbr,
        away = %row.away.abbr,
        margin_actual = row.margin_actual,
        margin_adj = row.margin_adj,
        onoff_rows = scored.onoff.rows.len(),
        "game ingested"
    );
    Ok(())
}

pub fn run_range(
    conn: &mut Connection,
    recency: &mut RecencyStore,
    source: &mut impl BoxScoreSource,
    cfg: &LuckConfig,
    start: NaiveDate,
    end: NaiveDate,
) -> RunSummary {
    let mut summary = RunSummary::default();
    'dates: for date in start.iter_days().take_while(|d| *d <= end) {
        summary.dates += 1;
        let mut ids = match source.game_ids_for_date(date) {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%date, error = %err, "source failed; date skipped");
                summary.failures.push(GameFailure {
                    date,
                    game_id: None,
                    error: err,
                });
                continue;
            }
        };
        ids.sort();
        ids.dedup();

        for game_id in ids {
            let result = source
                .load_game(date, &game_id)
                .and_then(|game| ingest_game(conn, recency, &game, cfg));
            match result {
                Ok(GameOutcome::Ingested) => summary.ingested += 1,
                Ok(GameOutcome::Skipped) => summary.skipped += 1,
                Err(err) => {
                    let fatal = err.is_fatal();
                    if fatal {
                        error!(%date, game_id = %game_id, error = %err, "ordering violation; run halted");
                    } else {
                        warn!(%date, game_id = %game_id, error = %err, "game failed");
                    }
                    summary.failures.push(GameFailure {
                        date,
                        game_id: Some(game_id),
                        error: err,
                    });
                    if fatal {
                        summary.halted = true;
                        break 'dates;
                    }
                }
            }
        }
    }
    info!(
        %start,
        %end,
        ingested = summary.ingested,
        skipped = summary.skipped,
        failures = summary.failures.len(),
        halted = summary.halted,
        "run finished"
    );
    summary
}

/// `run_range` bracketed by an `ingest_runs` record.
pub fn run_and_record(
    conn: &mut Connection,
    recency: &mut RecencyStore,
    source: &mut impl BoxScoreSource,
    cfg: &LuckConfig,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<RunSummary> {
    let run_id = store::begin_run(conn, start, end)?;
    let summary = run_range(conn, recency, source, cfg, start, end);
    store::finish_run(conn, run_id, &summary).context("record run summary")?;
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CareerSeed {
    pub player_id: PlayerId,
    pub attempts: f64,
    pub makes: f64,
}

/// Applies career baselines; players that are already seeded or already have
/// game updates are skipped with a warning. Returns the number applied.
pub fn seed_players(
    conn: &mut Connection,
    recency: &mut RecencyStore,
    seeds: &[CareerSeed],
) -> Result<usize> {
    let mut applied = 0;
    for s in seeds {
        let (state, command) = match recency.plan_seed(s.player_id, s.attempts, s.makes) {
            Ok(planned) => planned,
            Err(err) => {
                warn!(player_id = s.player_id, error = %err, "seed skipped");
                continue;
            }
        };
        store::commit_seed(conn, s.player_id, state, &command)?;
        recency.commit_seed(s.player_id, state, command);
        applied += 1;
    }
    info!(applied, requested = seeds.len(), "career seeds applied");
    Ok(applied)
}

/// Rebuilds every derived table from the games already in the db under
/// `cfg`, which may carry a new half-life or prior. Games replay in
/// `(date, game_id)` order from the stored career seeds. An interrupted
/// rebuild keeps the stored games, so running it again completes it.
pub fn recompute_existing(
    conn: &mut Connection,
    cfg: &LuckConfig,
) -> Result<(RecencyStore, RunSummary)> {
    let games = store::load_games(conn)?;
    let mut recency = store::reset_derived(conn, cfg.half_life_3pa)?;
    let (Some(first), Some(last)) = (games.first(), games.last()) else {
        info!("no stored games to recompute");
        return Ok((recency, RunSummary::default()));
    };
    let run_id = store::begin_run(conn, first.date, last.date)?;

    let mut summary = RunSummary::default();
    let mut current = None;
    for game in &games {
        if current != Some(game.date) {
            current = Some(game.date);
            summary.dates += 1;
        }
        match score_and_commit(conn, &mut recency, game, cfg) {
            Ok(()) => summary.ingested += 1,
            Err(err) => {
                let fatal = err.is_fatal();
                warn!(date = %game.date, game_id = %game.game_id, error = %err, "recompute failed");
                summary.failures.push(GameFailure {
                    date: game.date,
                    game_id: Some(game.game_id.clone()),
                    error: err,
                });
                if fatal {
                    summary.halted = true;
                    break;
                }
            }
        }
    }
    store::finish_run(conn, run_id, &summary).context("record recompute summary")?;
    info!(
        games = games.len(),
        recomputed = summary.ingested,
        failures = summary.failures.len(),
        digest = %recency.digest(),
        "recompute finished"
    );
    Ok((recency, summary))
}

