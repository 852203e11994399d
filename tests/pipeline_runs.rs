use chrono::{Days, NaiveDate};

use threes_luck::config::LuckConfig;
use threes_luck::error::LuckError;
use threes_luck::model::GameRecord;
use threes_luck::pipeline::{self, CareerSeed, RunSummary};
use threes_luck::recency::RecencyStore;
use threes_luck::source::MemorySource;
use threes_luck::store;
use threes_luck::synthetic::{SyntheticConfig, generate_season};

fn season(days: u32) -> Vec<GameRecord> {
    generate_season(&SyntheticConfig {
        seed: 11,
        days,
        ..SyntheticConfig::default()
    })
}

fn day(n: u64) -> NaiveDate {
    SyntheticConfig::default()
        .start
        .checked_add_days(Days::new(n))
        .unwrap()
}

fn run(
    conn: &mut rusqlite::Connection,
    recency: &mut RecencyStore,
    source: &mut MemorySource,
    start: NaiveDate,
    end: NaiveDate,
) -> RunSummary {
    pipeline::run_and_record(conn, recency, source, &LuckConfig::default(), start, end).unwrap()
}

#[test]
fn chunked_runs_match_single_run() {
    let games = season(6);
    let mut source = MemorySource::from_games(games.clone());

    let mut single_conn = store::open_in_memory().unwrap();
    let mut single = store::load_recency(&single_conn, 2000.0).unwrap();
    let summary = run(&mut single_conn, &mut single, &mut source, day(0), day(5));
    assert_eq!(summary.ingested, games.len());
    assert!(summary.failures.is_empty());

    let mut chunked_conn = store::open_in_memory().unwrap();
    let mut chunked = store::load_recency(&chunked_conn, 2000.0).unwrap();
    run(&mut chunked_conn, &mut chunked, &mut source, day(0), day(1));
    // Resume from what the db holds, as a restarted process would.
    let mut chunked = store::load_recency(&chunked_conn, 2000.0).unwrap();
    run(&mut chunked_conn, &mut chunked, &mut source, day(2), day(3));
    let mut chunked = store::load_recency(&chunked_conn, 2000.0).unwrap();
    run(&mut chunked_conn, &mut chunked, &mut source, day(4), day(5));

    assert_eq!(single.digest(), chunked.digest());
    assert_eq!(
        store::load_adjusted_games(&single_conn).unwrap(),
        store::load_adjusted_games(&chunked_conn).unwrap()
    );
    assert_eq!(
        store::load_onoff_rows(&single_conn).unwrap(),
        store::load_onoff_rows(&chunked_conn).unwrap()
    );

    let replayed = RecencyStore::replay(2000.0, single.log()).unwrap();
    assert_eq!(replayed.digest(), single.digest());
    let replayed = RecencyStore::replay(2000.0, &store::load_state_log(&chunked_conn).unwrap())
        .unwrap();
    assert_eq!(replayed.digest(), single.digest());
}

#[test]
fn second_ingest_of_same_range_changes_nothing() {
    let games = season(3);
    let mut source = MemorySource::from_games(games.clone());
    let mut conn = store::open_in_memory().unwrap();
    let mut recency = store::load_recency(&conn, 2000.0).unwrap();

    run(&mut conn, &mut recency, &mut source, day(0), day(2));
    let digest = recency.digest();
    let adjusted = store::load_adjusted_games(&conn).unwrap();
    let log_len = recency.log().len();

    let again = run(&mut conn, &mut recency, &mut source, day(0), day(2));
    assert_eq!(again.ingested, 0);
    assert_eq!(again.skipped, games.len());
    assert_eq!(recency.digest(), digest);
    assert_eq!(recency.log().len(), log_len);
    assert_eq!(store::load_adjusted_games(&conn).unwrap(), adjusted);

    // A process that only sees the db skips the same games.
    let mut reloaded = store::load_recency(&conn, 2000.0).unwrap();
    let third = run(&mut conn, &mut reloaded, &mut source, day(0), day(2));
    assert_eq!(third.skipped, games.len());
    assert_eq!(reloaded.digest(), digest);
}

#[test]
fn broken_source_date_is_skipped_and_reported() {
    let games = season(3);
    let mut source = MemorySource::from_games(games.clone());
    source.break_date(day(1), "feed returned 503");
    let mut conn = store::open_in_memory().unwrap();
    let mut recency = store::load_recency(&conn, 2000.0).unwrap();

    let summary = run(&mut conn, &mut recency, &mut source, day(0), day(2));
    let expected = games.iter().filter(|g| g.date != day(1)).count();
    assert_eq!(summary.dates, 3);
    assert_eq!(summary.ingested, expected);
    assert!(!summary.halted);
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.date, day(1));
    assert!(failure.game_id.is_none());
    assert!(matches!(failure.error, LuckError::Source { .. }));
    assert_eq!(store::load_games(&conn).unwrap().len(), expected);
}

#[test]
fn out_of_order_date_halts_the_run() {
    let games = season(2);
    let mut source = MemorySource::from_games(games.clone());
    let mut conn = store::open_in_memory().unwrap();
    let mut recency = store::load_recency(&conn, 2000.0).unwrap();

    run(&mut conn, &mut recency, &mut source, day(1), day(1));
    let digest = recency.digest();
    let stored = store::load_games(&conn).unwrap().len();

    let summary = run(&mut conn, &mut recency, &mut source, day(0), day(0));
    assert!(summary.halted);
    assert_eq!(summary.ingested, 0);
    assert!(matches!(
        summary.failures.last().map(|f| &f.error),
        Some(LuckError::OrderingViolation { .. })
    ));
    assert_eq!(recency.digest(), digest);
    assert_eq!(store::load_games(&conn).unwrap().len(), stored);
}

#[test]
fn on_disk_db_resumes_where_it_stopped() {
    let games = season(4);
    let mut source = MemorySource::from_games(games.clone());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("luck.sqlite");

    {
        let mut conn = store::open_db(&path).unwrap();
        let mut recency = store::load_recency(&conn, 2000.0).unwrap();
        let seeds = vec![CareerSeed {
            player_id: 100,
            attempts: 400.0,
            makes: 150.0,
        }];
        assert_eq!(pipeline::seed_players(&mut conn, &mut recency, &seeds).unwrap(), 1);
        run(&mut conn, &mut recency, &mut source, day(0), day(1));
    }

    let mut conn = store::open_db(&path).unwrap();
    let mut recency = store::load_recency(&conn, 2000.0).unwrap();
    let second = run(&mut conn, &mut recency, &mut source, day(2), day(3));
    assert!(second.failures.is_empty());

    let mut fresh_conn = store::open_in_memory().unwrap();
    let mut fresh = store::load_recency(&fresh_conn, 2000.0).unwrap();
    fresh.seed(100, 400.0, 150.0).unwrap();
    run(&mut fresh_conn, &mut fresh, &mut source, day(0), day(3));

    assert_eq!(recency.digest(), fresh.digest());
    assert_eq!(store::load_games(&conn).unwrap().len(), games.len());

    // Seeds after the first game update are refused.
    let late = vec![CareerSeed {
        player_id: 100,
        attempts: 1.0,
        makes: 1.0,
    }];
    assert_eq!(pipeline::seed_players(&mut conn, &mut recency, &late).unwrap(), 0);
}

#[test]
fn repeated_seed_file_does_not_double_the_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("luck.sqlite");
    let seeds = vec![CareerSeed {
        player_id: 100,
        attempts: 400.0,
        makes: 150.0,
    }];
    {
        let mut conn = store::open_db(&path).unwrap();
        let mut recency = store::load_recency(&conn, 2000.0).unwrap();
        assert_eq!(pipeline::seed_players(&mut conn, &mut recency, &seeds).unwrap(), 1);
        assert_eq!(pipeline::seed_players(&mut conn, &mut recency, &seeds).unwrap(), 0);
    }

    let mut conn = store::open_db(&path).unwrap();
    let mut recency = store::load_recency(&conn, 2000.0).unwrap();
    assert_eq!(pipeline::seed_players(&mut conn, &mut recency, &seeds).unwrap(), 0);

    let state = recency.get(100);
    assert_eq!((state.a_r, state.m_r), (400.0, 150.0));
    assert_eq!(store::load_state_log(&conn).unwrap().len(), 1);
    let replayed = RecencyStore::replay(2000.0, recency.log()).unwrap();
    assert_eq!(replayed.digest(), recency.digest());
}

#[test]
fn reopening_with_another_half_life_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("luck.sqlite");
    {
        let conn = store::open_db(&path).unwrap();
        store::load_recency(&conn, 2000.0).unwrap();
    }
    let conn = store::open_db(&path).unwrap();
    assert!(store::load_recency(&conn, 500.0).is_err());
    assert!(store::load_recency(&conn, 2000.0).is_ok());
}

#[test]
fn recompute_existing_matches_a_fresh_run_under_the_new_config() {
    let games = season(4);
    let mut source = MemorySource::from_games(games.clone());
    let seeds = vec![CareerSeed {
        player_id: 100,
        attempts: 400.0,
        makes: 150.0,
    }];

    let mut conn = store::open_in_memory().unwrap();
    let mut recency = store::load_recency(&conn, 2000.0).unwrap();
    pipeline::seed_players(&mut conn, &mut recency, &seeds).unwrap();
    run(&mut conn, &mut recency, &mut source, day(0), day(3));
    let rows_before = store::load_onoff_rows(&conn).unwrap().len();

    let cfg = LuckConfig {
        half_life_3pa: 500.0,
        ..LuckConfig::default()
    };
    let (rebuilt, summary) = pipeline::recompute_existing(&mut conn, &cfg).unwrap();
    assert_eq!(summary.ingested, games.len());
    assert!(summary.failures.is_empty());
    assert_eq!(store::load_games(&conn).unwrap().len(), games.len());
    assert_eq!(store::load_onoff_rows(&conn).unwrap().len(), rows_before);

    let mut fresh_conn = store::open_in_memory().unwrap();
    let mut fresh = store::load_recency(&fresh_conn, 500.0).unwrap();
    pipeline::seed_players(&mut fresh_conn, &mut fresh, &seeds).unwrap();
    pipeline::run_and_record(&mut fresh_conn, &mut fresh, &mut source, &cfg, day(0), day(3))
        .unwrap();

    assert_eq!(rebuilt.digest(), fresh.digest());
    assert_eq!(
        store::load_adjusted_games(&conn).unwrap(),
        store::load_adjusted_games(&fresh_conn).unwrap()
    );
    assert_eq!(store::load_state_log(&conn).unwrap(), store::load_state_log(&fresh_conn).unwrap());

    // The db is now pinned to the new half-life.
    assert!(store::load_recency(&conn, 2000.0).is_err());
    let reloaded = store::load_recency(&conn, 500.0).unwrap();
    assert_eq!(reloaded.digest(), fresh.digest());
}

