use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::adjust::AdjustedGameRow;
use crate::error::LuckError;
use crate::history::PlayerOnOffHistory;
use crate::model::{GameRecord, PlayerId};
use crate::onoff::{OnOffGame, OnOffRow, Stint};
use crate::pipeline::RunSummary;
use crate::rapm::ImpactRating;
use crate::recency::{
    GameUpdate, PlayerEntry, PlayerRecencyState, RecencyStore, StateCommand, Watermark,
};

pub fn default_db_path() -> PathBuf {
    PathBuf::from("data").join("threes_luck.sqlite")
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create db dir {}", parent.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS games (
            game_id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            season TEXT NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            home_points INTEGER NOT NULL,
            away_points INTEGER NOT NULL,
            record_json TEXT NOT NULL,
            ingested_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_games_date ON games(date);

        CREATE TABLE IF NOT EXISTS adjusted_games (
            game_id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            season TEXT NOT NULL,
            home_abbr TEXT NOT NULL,
            away_abbr TEXT NOT NULL,
            home_points REAL NOT NULL,
            away_points REAL NOT NULL,
            home_points_adj REAL NOT NULL,
            away_points_adj REAL NOT NULL,
            margin_delta REAL NOT NULL,
            row_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_adjusted_games_date ON adjusted_games(date);

        CREATE TABLE IF NOT EXISTS player_state (
            player_id INTEGER PRIMARY KEY,
            player_name TEXT NULL,
            a_r REAL NOT NULL,
            m_r REAL NOT NULL,
            last_date TEXT NULL,
            last_game_id TEXT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS state_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id TEXT NULL,
            command_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS onoff_rows (
            game_id TEXT NOT NULL,
            player_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            season TEXT NOT NULL,
            team_id INTEGER NOT NULL,
            player_name TEXT NOT NULL,
            on_diff REAL NOT NULL,
            on_diff_adj REAL NOT NULL,
            row_json TEXT NOT NULL,
            PRIMARY KEY (game_id, player_id)
        );
        CREATE INDEX IF NOT EXISTS idx_onoff_rows_date ON onoff_rows(date);

        CREATE TABLE IF NOT EXISTS stints (
            game_id TEXT NOT NULL,
            stint_idx INTEGER NOT NULL,
            date TEXT NOT NULL,
            season TEXT NOT NULL,
            seconds INTEGER NOT NULL,
            row_json TEXT NOT NULL,
            PRIMARY KEY (game_id, stint_idx)
        );
        CREATE INDEX IF NOT EXISTS idx_stints_season ON stints(season);

        CREATE TABLE IF NOT EXISTS onoff_history (
            player_id INTEGER NOT NULL,
            season TEXT NOT NULL,
            player_name TEXT NOT NULL,
            games INTEGER NOT NULL,
            on_off_diff_adj_avg REAL NOT NULL,
            row_json TEXT NOT NULL,
            built_at TEXT NOT NULL,
            PRIMARY KEY (player_id, season)
        );

        CREATE TABLE IF NOT EXISTS impact_ratings (
            window_label TEXT NOT NULL,
            alpha REAL NOT NULL,
            player_id INTEGER NOT NULL,
            player_name TEXT NOT NULL,
            rapm REAL NOT NULL,
            row_json TEXT NOT NULL,
            fitted_at TEXT NOT NULL,
            PRIMARY KEY (window_label, alpha, player_id)
        );

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            games_ingested INTEGER NOT NULL,
            games_skipped INTEGER NOT NULL,
            errors_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("encode {what}"))
}

fn from_json<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("decode {what}"))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("parse date {raw}"))
}

/// Pins the half-life the stored state was built with. Reopening a db with a
/// different half-life would silently mix two decay rates.
pub fn ensure_half_life(conn: &Connection, half_life: f64) -> Result<()> {
    let stored = conn
        .query_row(
            "SELECT value FROM settings WHERE key = 'half_life_3pa'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .context("query half_life setting")?;
    match stored {
        Some(raw) => {
            let prev = raw
                .parse::<f64>()
                .with_context(|| format!("parse stored half_life {raw}"))?;
            if prev != half_life {
                return Err(anyhow!(LuckError::InvalidConfig(format!(
                    "db state was built with half_life_3pa={prev}, config has {half_life}"
                ))));
            }
        }
        None => {
            conn.execute(
                "INSERT INTO settings(key, value) VALUES ('half_life_3pa', ?1)",
                params![half_life.to_string()],
            )
            .context("insert half_life setting")?;
        }
    }
    Ok(())
}

pub fn has_game(conn: &Connection, game_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM games WHERE game_id = ?1",
            params![game_id],
            |_| Ok(()),
        )
        .optional()
        .context("query game exists")?;
    Ok(found.is_some())
}

fn upsert_player_state(
    tx: &Transaction<'_>,
    player_id: PlayerId,
    name: Option<&str>,
    state: PlayerRecencyState,
    watermark: Option<&Watermark>,
) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO player_state (player_id, player_name, a_r, m_r, last_date, last_game_id, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(player_id) DO UPDATE SET
            player_name = COALESCE(excluded.player_name, player_state.player_name),
            a_r = excluded.a_r,
            m_r = excluded.m_r,
            last_date = COALESCE(excluded.last_date, player_state.last_date),
            last_game_id = COALESCE(excluded.last_game_id, player_state.last_game_id),
            updated_at = excluded.updated_at
        "#,
        params![
            player_id as i64,
            name,
            state.a_r,
            state.m_r,
            watermark.map(|w| w.date.to_string()),
            watermark.map(|w| w.game_id.clone()),
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert player state")?;
    Ok(())
}

fn append_log(tx: &Transaction<'_>, game_id: Option<&str>, command: &StateCommand) -> Result<()> {
    tx.execute(
        "INSERT INTO state_log(game_id, command_json) VALUES (?1, ?2)",
        params![game_id, to_json(command, "state command")?],
    )
    .context("append state log")?;
    Ok(())
}

/// Writes a seed command and the seeded state together.
pub fn commit_seed(
    conn: &mut Connection,
    player_id: PlayerId,
    state: PlayerRecencyState,
    command: &StateCommand,
) -> Result<()> {
    let tx = conn.transaction().context("begin seed transaction")?;
    upsert_player_state(&tx, player_id, None, state, None)?;
    append_log(&tx, None, command)?;
    tx.commit().context("commit seed transaction")?;
    Ok(())
}

/// Every row a game produces, its state transition and its log entry, in
/// one transaction. A failure leaves the db exactly as before the call. The
/// stored record is kept on a rebuild; every other table refuses a second
/// insert for the same game.
pub fn commit_game(
    conn: &mut Connection,
    game: &GameRecord,
    adjusted: &AdjustedGameRow,
    onoff: &OnOffGame,
    update: &GameUpdate,
) -> Result<()> {
    let tx = conn.transaction().context("begin game transaction")?;
    let date = game.date.to_string();
    let now = Utc::now().to_rfc3339();

    tx.execute(
        r#"
        INSERT INTO games (
            game_id, date, season, home_team_id, away_team_id,
            home_points, away_points, record_json, ingested_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(game_id) DO UPDATE SET
            record_json = excluded.record_json,
            ingested_at = excluded.ingested_at
        "#,
        params![
            game.game_id,
            date,
            adjusted.season,
            game.home.team_id as i64,
            game.away.team_id as i64,
            game.home.points as i64,
            game.away.points as i64,
            to_json(game, "game record")?,
            now,
        ],
    )
    .with_context(|| format!("insert game {}", game.game_id))?;

    tx.execute(
        r#"
        INSERT INTO adjusted_games (
            game_id, date, season, home_abbr, away_abbr,
            home_points, away_points, home_points_adj, away_points_adj,
            margin_delta, row_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            adjusted.game_id,
            date,
            adjusted.season,
            adjusted.home.abbr,
            adjusted.away.abbr,
            adjusted.home.points_actual,
            adjusted.away.points_actual,
            adjusted.home.points_adj,
            adjusted.away.points_adj,
            adjusted.margin_delta,
            to_json(adjusted, "adjusted game row")?,
        ],
    )
    .context("insert adjusted game")?;

    let names: HashMap<PlayerId, &str> = game
        .sides()
        .iter()
        .flat_map(|(_, team)| team.players.iter())
        .map(|p| (p.player_id, p.name.as_str()))
        .collect();
    for (player_id, state) in &update.next {
        let name = names.get(player_id).copied();
        upsert_player_state(&tx, *player_id, name, *state, Some(&update.watermark))?;
    }
    append_log(&tx, Some(&game.game_id), &update.command)?;

    for row in &onoff.rows {
        tx.execute(
            r#"
            INSERT INTO onoff_rows (
                game_id, player_id, date, season, team_id, player_name,
                on_diff, on_diff_adj, row_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(game_id, player_id) DO UPDATE SET
                date = excluded.date,
                season = excluded.season,
                team_id = excluded.team_id,
                player_name = excluded.player_name,
                on_diff = excluded.on_diff,
                on_diff_adj = excluded.on_diff_adj,
                row_json = excluded.row_json
            "#,
            params![
                row.game_id,
                row.player_id as i64,
                date,
                row.season,
                row.team_id as i64,
                row.player_name,
                row.on_diff,
                row.on_diff_adj,
                to_json(row, "on/off row")?,
            ],
        )
        .context("upsert on/off row")?;
    }

    for (idx, stint) in onoff.stints.iter().enumerate() {
        tx.execute(
            r#"
            INSERT INTO stints (game_id, stint_idx, date, season, seconds, row_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(game_id, stint_idx) DO UPDATE SET
                seconds = excluded.seconds,
                row_json = excluded.row_json
            "#,
            params![
                stint.game_id,
                idx as i64,
                date,
                stint.season,
                stint.seconds as i64,
                to_json(stint, "stint")?,
            ],
        )
        .context("upsert stint")?;
    }

    tx.commit().context("commit game transaction")?;
    debug!(
        game_id = %game.game_id,
        players = update.next.len(),
        onoff_rows = onoff.rows.len(),
        stints = onoff.stints.len(),
        "game committed"
    );
    Ok(())
}

pub fn load_state_log(conn: &Connection) -> Result<Vec<StateCommand>> {
    let mut stmt = conn
        .prepare("SELECT command_json FROM state_log ORDER BY seq ASC")
        .context("prepare state log query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query state log")?;
    let mut out = Vec::new();
    for raw in rows {
        out.push(from_json(&raw.context("read state log row")?, "state command")?);
    }
    Ok(out)
}

/// Recency store as persisted: the state table, applied games and the log.
pub fn load_recency(conn: &Connection, half_life: f64) -> Result<RecencyStore> {
    ensure_half_life(conn, half_life)?;

    let mut stmt = conn
        .prepare("SELECT player_id, a_r, m_r, last_date, last_game_id FROM player_state")
        .context("prepare player state query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .context("query player state")?;
    let mut players = HashMap::new();
    for row in rows {
        let (player_id, a_r, m_r, last_date, last_game_id) =
            row.context("decode player state row")?;
        let watermark = match (last_date, last_game_id) {
            (Some(date), Some(game_id)) => Some(Watermark {
                date: parse_date(&date)?,
                game_id,
            }),
            _ => None,
        };
        players.insert(
            player_id,
            PlayerEntry {
                state: PlayerRecencyState { a_r, m_r },
                watermark,
            },
        );
    }

    let mut stmt = conn
        .prepare("SELECT game_id FROM games")
        .context("prepare applied games query")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query applied games")?;
    let mut applied = HashSet::new();
    for id in ids {
        applied.insert(id.context("decode game id")?);
    }

    let log = load_state_log(conn)?;
    Ok(RecencyStore::from_parts(half_life, players, applied, log))
}

/// Clears everything derived from stored games and re-pins `half_life`,
/// keeping the stored games and the career seeds. Returns a store holding
/// only the seeds, ready for the games to be replayed in order.
pub fn reset_derived(conn: &mut Connection, half_life: f64) -> Result<RecencyStore> {
    let seeds = load_state_log(conn)?
        .into_iter()
        .filter(|c| matches!(c, StateCommand::Seed { .. }))
        .collect::<Vec<_>>();

    let tx = conn.transaction().context("begin reset transaction")?;
    for table in [
        "adjusted_games",
        "onoff_rows",
        "stints",
        "onoff_history",
        "impact_ratings",
        "player_state",
        "state_log",
    ] {
        tx.execute(&format!("DELETE FROM {table}"), [])
            .with_context(|| format!("clear {table}"))?;
    }
    tx.execute(
        r#"
        INSERT INTO settings(key, value) VALUES ('half_life_3pa', ?1)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![half_life.to_string()],
    )
    .context("repin half_life setting")?;

    let mut store = RecencyStore::new(half_life);
    for command in seeds {
        let StateCommand::Seed {
            player_id,
            attempts,
            makes,
        } = command
        else {
            continue;
        };
        let (state, command) = store.plan_seed(player_id, attempts, makes)?;
        upsert_player_state(&tx, player_id, None, state, None)?;
        append_log(&tx, None, &command)?;
        store.commit_seed(player_id, state, command);
    }
    tx.commit().context("commit reset transaction")?;
    debug!(seeds = store.len(), half_life, "derived tables reset");
    Ok(store)
}

fn load_json_rows<T: DeserializeOwned>(conn: &Connection, sql: &str, what: &str) -> Result<Vec<T>> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("prepare {what} query"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .with_context(|| format!("query {what}"))?;
    let mut out = Vec::new();
    for raw in rows {
        let raw = raw.with_context(|| format!("read {what} row"))?;
        out.push(from_json(&raw, what)?);
    }
    Ok(out)
}

pub fn load_games(conn: &Connection) -> Result<Vec<GameRecord>> {
    load_json_rows(
        conn,
        "SELECT record_json FROM games ORDER BY date ASC, game_id ASC",
        "game record",
    )
}

pub fn load_adjusted_games(conn: &Connection) -> Result<Vec<AdjustedGameRow>> {
    load_json_rows(
        conn,
        "SELECT row_json FROM adjusted_games ORDER BY date ASC, game_id ASC",
        "adjusted game row",
    )
}

pub fn load_onoff_rows(conn: &Connection) -> Result<Vec<OnOffRow>> {
    load_json_rows(
        conn,
        "SELECT row_json FROM onoff_rows ORDER BY date ASC, game_id ASC, team_id ASC, player_name ASC",
        "on/off row",
    )
}

pub fn load_stints(conn: &Connection) -> Result<Vec<Stint>> {
    load_json_rows(
        conn,
        "SELECT row_json FROM stints ORDER BY date ASC, game_id ASC, stint_idx ASC",
        "stint",
    )
}

pub fn load_history(conn: &Connection) -> Result<Vec<PlayerOnOffHistory>> {
    load_json_rows(
        conn,
        "SELECT row_json FROM onoff_history ORDER BY on_off_diff_adj_avg DESC, player_id ASC, season ASC",
        "history row",
    )
}

pub fn load_ratings(conn: &Connection) -> Result<Vec<ImpactRating>> {
    load_json_rows(
        conn,
        "SELECT row_json FROM impact_ratings ORDER BY window_label ASC, alpha ASC, rapm DESC",
        "impact rating",
    )
}

/// Replaces the whole history table; the aggregate is never patched.
pub fn replace_history(conn: &mut Connection, rows: &[PlayerOnOffHistory]) -> Result<usize> {
    let tx = conn.transaction().context("begin history transaction")?;
    tx.execute("DELETE FROM onoff_history", [])
        .context("clear history")?;
    let now = Utc::now().to_rfc3339();
    for h in rows {
        tx.execute(
            r#"
            INSERT INTO onoff_history (player_id, season, player_name, games, on_off_diff_adj_avg, row_json, built_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                h.player_id as i64,
                h.season,
                h.player_name,
                h.games as i64,
                h.on_off_diff_adj_avg,
                to_json(h, "history row")?,
                now,
            ],
        )
        .context("insert history row")?;
    }
    tx.commit().context("commit history transaction")?;
    Ok(rows.len())
}

pub fn replace_ratings(conn: &mut Connection, rows: &[ImpactRating]) -> Result<usize> {
    let tx = conn.transaction().context("begin ratings transaction")?;
    tx.execute("DELETE FROM impact_ratings", [])
        .context("clear ratings")?;
    let now = Utc::now().to_rfc3339();
    for r in rows {
        tx.execute(
            r#"
            INSERT INTO impact_ratings (window_label, alpha, player_id, player_name, rapm, row_json, fitted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                r.window_label,
                r.alpha,
                r.player_id as i64,
                r.player_name,
                r.rapm,
                to_json(r, "impact rating")?,
                now,
            ],
        )
        .context("insert impact rating")?;
    }
    tx.commit().context("commit ratings transaction")?;
    Ok(rows.len())
}

pub fn begin_run(conn: &Connection, start: NaiveDate, end: NaiveDate) -> Result<i64> {
    conn.execute(
        "INSERT INTO ingest_runs(started_at, finished_at, start_date, end_date, games_ingested, games_skipped, errors_json)
         VALUES (?1, NULL, ?2, ?3, 0, 0, '[]')",
        params![Utc::now().to_rfc3339(), start.to_string(), end.to_string()],
    )
    .context("insert ingest run")?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_run(conn: &Connection, run_id: i64, summary: &RunSummary) -> Result<()> {
    let errors = summary
        .failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>();
    let errors_json = to_json(&errors, "run errors")?;
    conn.execute(
        "UPDATE ingest_runs
         SET finished_at = ?1, games_ingested = ?2, games_skipped = ?3, errors_json = ?4
         WHERE run_id = ?5",
        params![
            Utc::now().to_rfc3339(),
            summary.ingested as i64,
            summary.skipped as i64,
            errors_json,
            run_id
        ],
    )
    .context("update ingest run")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredPlayerState {
    pub player_id: PlayerId,
    pub player_name: Option<String>,
    pub state: PlayerRecencyState,
    pub last_date: Option<NaiveDate>,
}

pub fn load_player_states(conn: &Connection) -> Result<Vec<StoredPlayerState>> {
    let mut stmt = conn
        .prepare(
            "SELECT player_id, player_name, a_r, m_r, last_date FROM player_state ORDER BY player_id ASC",
        )
        .context("prepare player states query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .context("query player states")?;
    let mut out = Vec::new();
    for row in rows {
        let (player_id, player_name, a_r, m_r, last_date) =
            row.context("decode player state row")?;
        out.push(StoredPlayerState {
            player_id,
            player_name,
            state: PlayerRecencyState { a_r, m_r },
            last_date: last_date.as_deref().map(parse_date).transpose()?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlayerLine, TeamBox};
    use crate::recency::tallies_for;

    fn game(id: &str, day: u32, fg3m: u32) -> GameRecord {
        let line = |pid, a, m| PlayerLine {
            player_id: pid,
            name: format!("P{pid}"),
            minutes: 30.0,
            fg3a: a,
            fg3m: m,
            plus_minus: None,
            starter: true,
        };
        GameRecord {
            game_id: id.into(),
            date: NaiveDate::from_ymd_opt(2025, 11, day).unwrap(),
            home: TeamBox {
                team_id: 1,
                abbr: "HOM".into(),
                points: 100,
                fg3a: 10,
                fg3m,
                players: vec![line(1, 10, fg3m)],
            },
            away: TeamBox {
                team_id: 2,
                abbr: "AWY".into(),
                points: 95,
                fg3a: 0,
                fg3m: 0,
                players: vec![line(2, 0, 0)],
            },
            duration_secs: None,
            overtime_periods: None,
            events: Vec::new(),
        }
    }

    fn commit(conn: &mut Connection, store: &mut RecencyStore, g: &GameRecord) -> Result<()> {
        let adj = crate::adjust::adjust_game(g, &*store, &crate::config::LuckConfig::default())?;
        let update = store.plan_game(&g.game_id, g.date, &tallies_for(g))?;
        commit_game(conn, g, &adj.row, &OnOffGame::default(), &update)?;
        store.commit(update);
        Ok(())
    }

    #[test]
    fn committed_state_reloads_identically() {
        let mut conn = open_in_memory().unwrap();
        let mut store = load_recency(&conn, 2000.0).unwrap();
        commit(&mut conn, &mut store, &game("a", 1, 4)).unwrap();
        commit(&mut conn, &mut store, &game("b", 2, 2)).unwrap();

        let reloaded = load_recency(&conn, 2000.0).unwrap();
        assert_eq!(reloaded.digest(), store.digest());
        assert!(reloaded.has_game("a"));
        assert_eq!(reloaded.log(), store.log());

        let states = load_player_states(&conn).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].player_name.as_deref(), Some("P1"));
        assert_eq!(states[0].state, store.get(1));
        assert_eq!(states[0].last_date, NaiveDate::from_ymd_opt(2025, 11, 2));
        let replayed = RecencyStore::replay(2000.0, &load_state_log(&conn).unwrap()).unwrap();
        assert_eq!(replayed.digest(), store.digest());
    }

    #[test]
    fn duplicate_insert_rolls_back_whole_game() {
        let mut conn = open_in_memory().unwrap();
        let mut store = load_recency(&conn, 2000.0).unwrap();
        let g = game("a", 1, 4);
        commit(&mut conn, &mut store, &g).unwrap();

        // Bypass the in-memory dedup to hit the primary key.
        let fresh = RecencyStore::new(2000.0);
        let adj = crate::adjust::adjust_game(&g, &fresh, &crate::config::LuckConfig::default()).unwrap();
        let update = fresh.plan_game("a", g.date, &tallies_for(&g)).unwrap();
        assert!(commit_game(&mut conn, &g, &adj.row, &OnOffGame::default(), &update).is_err());

        assert_eq!(load_state_log(&conn).unwrap().len(), 1);
        assert_eq!(load_adjusted_games(&conn).unwrap().len(), 1);
    }

    #[test]
    fn half_life_is_pinned() {
        let conn = open_in_memory().unwrap();
        ensure_half_life(&conn, 2000.0).unwrap();
        assert!(ensure_half_life(&conn, 2000.0).is_ok());
        assert!(ensure_half_life(&conn, 1500.0).is_err());
    }

    #[test]
    fn history_table_is_replaced() {
        let mut conn = open_in_memory().unwrap();
        let h = PlayerOnOffHistory {
            player_id: 1,
            season: "2025-26".into(),
            player_name: "P1".into(),
            latest_team_id: 1,
            games: 1,
            minutes_total: 30.0,
            minutes_avg: 30.0,
            on_diff_total: 1.0,
            off_diff_total: 0.0,
            on_off_diff_total: 1.0,
            on_diff_avg: 1.0,
            off_diff_avg: 0.0,
            on_off_diff_avg: 1.0,
            on_diff_adj_total: 1.0,
            off_diff_adj_total: 0.0,
            on_off_diff_adj_total: 1.0,
            on_diff_adj_avg: 1.0,
            off_diff_adj_avg: 0.0,
            on_off_diff_adj_avg: 1.0,
            first_game_date: NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            last_game_date: NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
        };
        replace_history(&mut conn, std::slice::from_ref(&h)).unwrap();
        let mut h2 = h.clone();
        h2.player_id = 2;
        replace_history(&mut conn, &[h2.clone()]).unwrap();
        assert_eq!(load_history(&conn).unwrap(), vec![h2]);
    }

    #[test]
    fn open_db_reports_an_unusable_parent_dir() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let path = blocker.path().join("sub").join("luck.sqlite");
        let err = open_db(&path).unwrap_err();
        assert!(format!("{err:#}").contains("create db dir"));
    }

    #[test]
    fn finished_run_records_counts_and_errors() {
        let conn = open_in_memory().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        let run_id = begin_run(&conn, day, day).unwrap();
        let summary = RunSummary {
            dates: 1,
            ingested: 2,
            skipped: 1,
            failures: vec![crate::pipeline::GameFailure {
                date: day,
                game_id: None,
                error: LuckError::source(day, "timeout"),
            }],
            halted: false,
        };
        finish_run(&conn, run_id, &summary).unwrap();
        let (finished, ingested, errors): (Option<String>, i64, String) = conn
            .query_row(
                "SELECT finished_at, games_ingested, errors_json FROM ingest_runs WHERE run_id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert!(finished.is_some());
        assert_eq!(ingested, 2);
        let errors: Vec<String> = serde_json::from_str(&errors).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("timeout"));
    }

    #[test]
    fn seeded_player_reloads_as_already_seeded() {
        let mut conn = open_in_memory().unwrap();
        let mut store = load_recency(&conn, 2000.0).unwrap();
        let (state, command) = store.plan_seed(9, 400.0, 150.0).unwrap();
        commit_seed(&mut conn, 9, state, &command).unwrap();
        store.commit_seed(9, state, command);

        let reloaded = load_recency(&conn, 2000.0).unwrap();
        assert_eq!(reloaded.get(9), PlayerRecencyState { a_r: 400.0, m_r: 150.0 });
        assert_eq!(
            reloaded.plan_seed(9, 400.0, 150.0).unwrap_err(),
            LuckError::AlreadySeeded(9)
        );
    }
}
