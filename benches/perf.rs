use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use threes_luck::config::LuckConfig;
use threes_luck::pipeline::score_game;
use threes_luck::rapm::{RapmOptions, fit_window, player_directory};
use threes_luck::recency::{RecencyStore, tallies_for};
use threes_luck::synthetic::{SyntheticConfig, generate_season};

struct Fixture {
    cfg: LuckConfig,
    log: Vec<threes_luck::recency::StateCommand>,
    stints: Vec<threes_luck::onoff::Stint>,
    rows: Vec<threes_luck::onoff::OnOffRow>,
}

fn fixture() -> Fixture {
    let cfg = LuckConfig::default();
    let games = generate_season(&SyntheticConfig {
        days: 30,
        ..SyntheticConfig::default()
    });
    let mut recency = RecencyStore::new(cfg.half_life_3pa);
    let mut stints = Vec::new();
    let mut rows = Vec::new();
    for game in &games {
        let scored = score_game(game, &recency, &cfg).expect("synthetic game scores");
        stints.extend(scored.onoff.stints);
        rows.extend(scored.onoff.rows);
        recency
            .apply_game(&game.game_id, game.date, &tallies_for(game))
            .expect("synthetic games arrive in order");
    }
    Fixture {
        cfg,
        log: recency.log().to_vec(),
        stints,
        rows,
    }
}

fn bench_state_replay(c: &mut Criterion) {
    let fx = fixture();
    c.bench_function("state_replay", |b| {
        b.iter(|| {
            let store = RecencyStore::replay(fx.cfg.half_life_3pa, black_box(&fx.log)).unwrap();
            black_box(store.digest());
        })
    });
}

fn bench_ridge_fit(c: &mut Criterion) {
    let fx = fixture();
    let refs = fx.stints.iter().collect::<Vec<_>>();
    let directory = player_directory(&fx.rows);
    c.bench_function("fit_window_all_variants", |b| {
        b.iter(|| {
            let out = fit_window(
                "bench",
                black_box(&refs),
                &directory,
                RapmOptions {
                    alpha: 2500.0,
                    min_seconds: 10,
                    min_minutes: 0.0,
                },
            )
            .unwrap();
            black_box(out.len());
        })
    });
}

criterion_group!(perf, bench_state_replay, bench_ridge_fit);
criterion_main!(perf);
