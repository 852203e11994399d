//! Seeded synthetic seasons with play streams that agree with their box
//! scores, for demos, benches and end-to-end tests.

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use rand::Rng;
use rand::SeedableRng;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::model::{
    EventKind, GameEvent, GameRecord, LINEUP_SIZE, PlayerId, PlayerLine, REGULATION_SECS, Side,
    TeamBox, TeamId,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub teams: usize,
    pub roster: usize,
    pub start: NaiveDate,
    pub days: u32,
    pub games_per_day: usize,
    /// Net points per possession the first player of team 0 adds at both ends.
    pub star_impact: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            teams: 6,
            roster: 8,
            start: NaiveDate::from_ymd_opt(2025, 10, 21).unwrap_or_default(),
            days: 40,
            games_per_day: 3,
            star_impact: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthPlayer {
    pub id: PlayerId,
    pub name: String,
    pub three_rate: f64,
    pub volume: f64,
    pub impact: f64,
}

#[derive(Debug, Clone)]
pub struct SynthTeam {
    pub id: TeamId,
    pub abbr: String,
    pub players: Vec<SynthPlayer>,
}

pub fn star_id() -> PlayerId {
    player_id(0, 0)
}

fn player_id(team: usize, slot: usize) -> PlayerId {
    (team as PlayerId + 1) * 100 + slot as PlayerId
}

pub fn build_league(cfg: &SyntheticConfig, rng: &mut impl Rng) -> Vec<SynthTeam> {
    (0..cfg.teams)
        .map(|t| SynthTeam {
            id: 1_000 + t as TeamId,
            abbr: format!("T{t:02}"),
            players: (0..cfg.roster)
                .map(|k| SynthPlayer {
                    id: player_id(t, k),
                    name: format!("Player {t}-{k}"),
                    three_rate: rng.gen_range(0.30..0.42),
                    volume: rng.gen_range(0.5..1.5),
                    impact: if t == 0 && k == 0 {
                        cfg.star_impact
                    } else {
                        rng.gen_range(-0.02..0.02)
                    },
                })
                .collect(),
        })
        .collect()
}

#[derive(Default, Clone, Copy)]
struct Line {
    seconds: u32,
    fg3a: u32,
    fg3m: u32,
    net: i64,
}

struct Sim<'a> {
    teams: [&'a SynthTeam; 2],
    on_court: [Vec<usize>; 2],
    lines: HashMap<PlayerId, Line>,
    points: [u32; 2],
    events: Vec<GameEvent>,
    clock: u32,
}

fn side_of(i: usize) -> Side {
    if i == 0 { Side::Home } else { Side::Away }
}

impl<'a> Sim<'a> {
    fn new(home: &'a SynthTeam, away: &'a SynthTeam) -> Self {
        Self {
            teams: [home, away],
            on_court: [(0..LINEUP_SIZE).collect(), (0..LINEUP_SIZE).collect()],
            lines: HashMap::new(),
            points: [0; 2],
            events: Vec::new(),
            clock: 0,
        }
    }

    fn player(&self, side: usize, slot: usize) -> &'a SynthPlayer {
        &self.teams[side].players[slot]
    }

    fn advance(&mut self, to: u32) {
        let dt = to - self.clock;
        for side in 0..2 {
            for &slot in &self.on_court[side] {
                let id = self.player(side, slot).id;
                self.lines.entry(id).or_default().seconds += dt;
            }
        }
        self.clock = to;
    }

    fn score(&mut self, side: usize, pts: u32) {
        self.points[side] += pts;
        for s in 0..2 {
            let sign = if s == side { 1 } else { -1 };
            for &slot in &self.on_court[s] {
                let id = self.player(s, slot).id;
                self.lines.entry(id).or_default().net += sign * pts as i64;
            }
        }
    }

    fn lineup_impact(&self, side: usize) -> f64 {
        self.on_court[side]
            .iter()
            .map(|&slot| self.player(side, slot).impact)
            .sum()
    }

    fn possession(&mut self, side: usize, rng: &mut impl Rng) {
        let boost = self.lineup_impact(side) - self.lineup_impact(1 - side);
        if rng.gen_bool(0.38) {
            let weights = self.on_court[side]
                .iter()
                .map(|&slot| self.player(side, slot).volume)
                .collect::<Vec<_>>();
            let pick = WeightedIndex::new(&weights)
                .map(|w| w.sample(rng))
                .unwrap_or(0);
            let shooter = self.player(side, self.on_court[side][pick]);
            let made = rng.gen_bool(shooter.three_rate);
            let line = self.lines.entry(shooter.id).or_default();
            line.fg3a += 1;
            self.events.push(GameEvent {
                elapsed_secs: self.clock,
                side: side_of(side),
                kind: EventKind::ThreePoint {
                    shooter: shooter.id,
                    made,
                },
            });
            if made {
                line.fg3m += 1;
                self.score(side, 3);
            }
        } else {
            // Impact moves expected points by `boost` per possession.
            let p2 = (0.5 + boost / 2.0).clamp(0.05, 0.95);
            if rng.gen_bool(p2) {
                self.events.push(GameEvent {
                    elapsed_secs: self.clock,
                    side: side_of(side),
                    kind: EventKind::Points { points: 2 },
                });
                self.score(side, 2);
            } else if rng.gen_bool(0.15) {
                self.events.push(GameEvent {
                    elapsed_secs: self.clock,
                    side: side_of(side),
                    kind: EventKind::Points { points: 1 },
                });
                self.score(side, 1);
            }
        }
    }

    fn substitute(&mut self, side: usize, rng: &mut impl Rng) {
        let roster = self.teams[side].players.len();
        let bench = (0..roster)
            .filter(|s| !self.on_court[side].contains(s))
            .collect::<Vec<_>>();
        let Some(&slot_in) = bench.choose(rng) else {
            return;
        };
        let idx = rng.gen_range(0..self.on_court[side].len());
        let slot_out = self.on_court[side][idx];
        self.on_court[side][idx] = slot_in;
        self.events.push(GameEvent {
            elapsed_secs: self.clock,
            side: side_of(side),
            kind: EventKind::Substitution {
                player_out: self.player(side, slot_out).id,
                player_in: self.player(side, slot_in).id,
            },
        });
    }

    fn team_box(&self, side: usize) -> TeamBox {
        let team = self.teams[side];
        let players = team
            .players
            .iter()
            .enumerate()
            .map(|(slot, p)| {
                let l = self.lines.get(&p.id).copied().unwrap_or_default();
                PlayerLine {
                    player_id: p.id,
                    name: p.name.clone(),
                    minutes: l.seconds as f64 / 60.0,
                    fg3a: l.fg3a,
                    fg3m: l.fg3m,
                    plus_minus: Some(l.net as f64),
                    starter: slot < LINEUP_SIZE,
                }
            })
            .collect::<Vec<_>>();
        TeamBox {
            team_id: team.id,
            abbr: team.abbr.clone(),
            points: self.points[side],
            fg3a: players.iter().map(|p| p.fg3a).sum(),
            fg3m: players.iter().map(|p| p.fg3m).sum(),
            players,
        }
    }
}

pub fn simulate_game(
    game_id: String,
    date: NaiveDate,
    home: &SynthTeam,
    away: &SynthTeam,
    rng: &mut impl Rng,
) -> GameRecord {
    let mut sim = Sim::new(home, away);
    let mut offense = rng.gen_range(0..2usize);
    let mut next_sub = [rng.gen_range(120..360), rng.gen_range(120..360)];
    loop {
        let t = sim.clock + rng.gen_range(8..22);
        if t >= REGULATION_SECS {
            break;
        }
        sim.advance(t);
        for side in 0..2 {
            if t >= next_sub[side] {
                sim.substitute(side, rng);
                next_sub[side] = t + rng.gen_range(120..360);
            }
        }
        sim.possession(offense, rng);
        offense = 1 - offense;
    }
    sim.advance(REGULATION_SECS);

    GameRecord {
        game_id,
        date,
        home: sim.team_box(0),
        away: sim.team_box(1),
        duration_secs: Some(REGULATION_SECS),
        overtime_periods: None,
        events: sim.events,
    }
}

/// A full schedule: every day, `games_per_day` random pairings.
pub fn generate_season(cfg: &SyntheticConfig) -> Vec<GameRecord> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let league = build_league(cfg, &mut rng);
    let mut order = (0..league.len()).collect::<Vec<_>>();
    let per_day = cfg.games_per_day.min(league.len() / 2);

    let mut games = Vec::new();
    let mut counter = 0u32;
    for day in 0..cfg.days {
        let Some(date) = cfg.start.checked_add_days(Days::new(day as u64)) else {
            break;
        };
        order.shuffle(&mut rng);
        for pair in order.chunks_exact(2).take(per_day) {
            counter += 1;
            let id = format!("SYN{:05}", counter);
            games.push(simulate_game(id, date, &league[pair[0]], &league[pair[1]], &mut rng));
        }
    }
    games
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_games_validate() {
        let cfg = SyntheticConfig {
            days: 5,
            ..SyntheticConfig::default()
        };
        let games = generate_season(&cfg);
        assert_eq!(games.len(), 15);
        for g in &games {
            g.validate().unwrap();
            assert!(g.home.points > 0 && g.away.points > 0);
        }
    }

    #[test]
    fn same_seed_same_season() {
        let cfg = SyntheticConfig {
            days: 3,
            ..SyntheticConfig::default()
        };
        assert_eq!(generate_season(&cfg), generate_season(&cfg));
    }

    #[test]
    fn minutes_sum_to_five_players_per_team() {
        let cfg = SyntheticConfig {
            days: 1,
            games_per_day: 1,
            ..SyntheticConfig::default()
        };
        let g = &generate_season(&cfg)[0];
        let total: f64 = g.home.players.iter().map(|p| p.minutes).sum();
        assert!((total - 5.0 * 48.0).abs() < 1e-9);
    }
}
