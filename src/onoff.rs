//! Lineup-attributed luck adjustment.
//!
//! The play stream is walked once with both on-court lineups tracked from the
//! starters through every substitution. Each scoring event is credited to the
//! ten players on court, and each three-point attempt also moves the shooting
//! side's adjusted points by `(p_hat - made) * (3 - orb_rate * ppp)`, the same
//! per-attempt expectation the game adjuster sums at team level.
//!
//! Games without a play stream still get one row per player from the box
//! score. Those rows carry the official plus-minus and a share of the team
//! shift pro-rated by minutes, but no point splits and no stints.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LuckConfig;
use crate::error::LuckError;
use crate::expectation::PlayerExpectation;
use crate::model::{EventKind, GameRecord, LINEUP_SIZE, PlayerId, Side, TeamId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnOffRow {
    pub game_id: String,
    pub date: NaiveDate,
    pub season: String,
    pub team_id: TeamId,
    pub player_id: PlayerId,
    pub player_name: String,
    pub minutes: f64,
    pub seconds_on: u32,

    pub on_pts_for: f64,
    pub on_pts_against: f64,
    pub off_pts_for: f64,
    pub off_pts_against: f64,
    pub on_pts_for_adj: f64,
    pub on_pts_against_adj: f64,
    pub off_pts_for_adj: f64,
    pub off_pts_against_adj: f64,

    /// Official plus-minus when reported, otherwise the reconstructed value.
    pub on_diff: f64,
    pub off_diff: f64,
    pub on_off_diff: f64,
    pub on_diff_adj: f64,
    pub off_diff_adj: f64,
    pub on_off_diff_adj: f64,
    pub on_diff_reconstructed: f64,
    pub off_diff_reconstructed: f64,

    pub fg3a: u32,
    pub fg3m: u32,
    pub exp_3pm: f64,
    pub delta_3m: f64,
    /// Built from the box score alone; the point splits are zero.
    #[serde(default)]
    pub from_box_score: bool,
}

/// A stretch of game clock with both lineups unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stint {
    pub game_id: String,
    pub date: NaiveDate,
    pub season: String,
    pub seconds: u32,
    pub home_players: Vec<PlayerId>,
    pub away_players: Vec<PlayerId>,
    pub home_pts: f64,
    pub away_pts: f64,
    pub home_pts_adj: f64,
    pub away_pts_adj: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OnOffGame {
    pub rows: Vec<OnOffRow>,
    pub stints: Vec<Stint>,
}

#[derive(Debug, Clone, Copy, Default)]
struct OnCourt {
    seconds: u32,
    pts_for: f64,
    pts_against: f64,
    pts_for_adj: f64,
    pts_against_adj: f64,
}

struct OpenStint {
    start: u32,
    pts: [f64; 2],
    pts_adj: [f64; 2],
}

impl OpenStint {
    fn at(start: u32) -> Self {
        Self {
            start,
            pts: [0.0; 2],
            pts_adj: [0.0; 2],
        }
    }

    fn is_empty(&self, now: u32) -> bool {
        now == self.start && self.pts == [0.0; 2] && self.pts_adj == [0.0; 2]
    }
}

fn slot(side: Side) -> usize {
    match side {
        Side::Home => 0,
        Side::Away => 1,
    }
}

struct Walker<'a> {
    game: &'a GameRecord,
    season: String,
    lineups: [BTreeSet<PlayerId>; 2],
    court: HashMap<PlayerId, OnCourt>,
    totals: [f64; 2],
    totals_adj: [f64; 2],
    clock: u32,
    open: OpenStint,
    stints: Vec<Stint>,
}

impl<'a> Walker<'a> {
    fn new(game: &'a GameRecord) -> Result<Self, LuckError> {
        let mut lineups = [BTreeSet::new(), BTreeSet::new()];
        for (side, team) in game.sides() {
            let lineup = &mut lineups[slot(side)];
            lineup.extend(team.starters());
            if lineup.len() != LINEUP_SIZE {
                return Err(LuckError::lineup(
                    &game.game_id,
                    format!(
                        "{} lists {} starters, expected {LINEUP_SIZE}",
                        team.abbr,
                        lineup.len()
                    ),
                ));
            }
        }
        Ok(Self {
            game,
            season: game.season(),
            lineups,
            court: HashMap::new(),
            totals: [0.0; 2],
            totals_adj: [0.0; 2],
            clock: 0,
            open: OpenStint::at(0),
            stints: Vec::new(),
        })
    }

    fn advance(&mut self, to: u32) {
        let dt = to.saturating_sub(self.clock);
        if dt > 0 {
            for lineup in &self.lineups {
                for pid in lineup {
                    self.court.entry(*pid).or_default().seconds += dt;
                }
            }
        }
        self.clock = self.clock.max(to);
    }

    fn score(&mut self, side: Side, actual: f64, adjusted: f64) {
        let (us, them) = (slot(side), slot(side.opponent()));
        for pid in &self.lineups[us] {
            let c = self.court.entry(*pid).or_default();
            c.pts_for += actual;
            c.pts_for_adj += adjusted;
        }
        for pid in &self.lineups[them] {
            let c = self.court.entry(*pid).or_default();
            c.pts_against += actual;
            c.pts_against_adj += adjusted;
        }
        self.totals[us] += actual;
        self.totals_adj[us] += adjusted;
        self.open.pts[us] += actual;
        self.open.pts_adj[us] += adjusted;
    }

    fn close_stint(&mut self) {
        let now = self.clock;
        if !self.open.is_empty(now) {
            self.stints.push(Stint {
                game_id: self.game.game_id.clone(),
                date: self.game.date,
                season: self.season.clone(),
                seconds: now - self.open.start,
                home_players: self.lineups[0].iter().copied().collect(),
                away_players: self.lineups[1].iter().copied().collect(),
                home_pts: self.open.pts[0],
                away_pts: self.open.pts[1],
                home_pts_adj: self.open.pts_adj[0],
                away_pts_adj: self.open.pts_adj[1],
            });
        }
        self.open = OpenStint::at(now);
    }

    fn substitute(
        &mut self,
        side: Side,
        player_out: PlayerId,
        player_in: PlayerId,
        roster: &HashMap<PlayerId, Side>,
    ) -> Result<(), LuckError> {
        let gid = self.game.game_id.as_str();
        for pid in [player_out, player_in] {
            if roster.get(&pid) != Some(&side) {
                return Err(LuckError::lineup(
                    gid,
                    format!("player {pid} is not on the substituting roster"),
                ));
            }
        }
        let lineup = &self.lineups[slot(side)];
        if !lineup.contains(&player_out) {
            return Err(LuckError::lineup(
                gid,
                format!("player {player_out} subbed out at {}s while off court", self.clock),
            ));
        }
        if lineup.contains(&player_in) {
            return Err(LuckError::lineup(
                gid,
                format!("player {player_in} subbed in at {}s while on court", self.clock),
            ));
        }
        self.close_stint();
        let lineup = &mut self.lineups[slot(side)];
        lineup.remove(&player_out);
        lineup.insert(player_in);
        debug_assert_eq!(lineup.len(), LINEUP_SIZE);
        Ok(())
    }
}

fn box_score_rows(
    game: &GameRecord,
    by_player: &HashMap<PlayerId, &PlayerExpectation>,
    net: f64,
) -> Vec<OnOffRow> {
    let season = game.season();
    let clock = game.duration().max(1) as f64;
    let shift_of = |side: Side| -> f64 {
        game.team(side)
            .players
            .iter()
            .filter_map(|p| by_player.get(&p.player_id))
            .map(|e| e.delta_3m * net)
            .sum()
    };
    let shifts = [shift_of(Side::Home), shift_of(Side::Away)];

    let mut rows = Vec::new();
    for (side, team) in game.sides() {
        let (us, them) = (slot(side), slot(side.opponent()));
        let opponent = game.team(side.opponent());
        let margin = team.points as f64 - opponent.points as f64;
        let margin_adj = margin + shifts[us] - shifts[them];
        for line in &team.players {
            if line.minutes <= 0.0 && line.fg3a == 0 && line.plus_minus.is_none() {
                continue;
            }
            let seconds_on = (line.minutes.max(0.0) * 60.0).round() as u32;
            let share = (seconds_on as f64 / clock).min(1.0);
            let on_diff = line.plus_minus.unwrap_or(0.0);
            let off_diff = margin - on_diff;
            let on_diff_adj = on_diff + (shifts[us] - shifts[them]) * share;
            let off_diff_adj = margin_adj - on_diff_adj;
            let (exp_3pm, delta_3m) = by_player
                .get(&line.player_id)
                .map(|e| (e.expected_makes, e.delta_3m))
                .unwrap_or((0.0, 0.0));

            rows.push(OnOffRow {
                game_id: game.game_id.clone(),
                date: game.date,
                season: season.clone(),
                team_id: team.team_id,
                player_id: line.player_id,
                player_name: line.name.clone(),
                minutes: line.minutes.max(0.0),
                seconds_on,
                on_pts_for: 0.0,
                on_pts_against: 0.0,
                off_pts_for: 0.0,
                off_pts_against: 0.0,
                on_pts_for_adj: 0.0,
                on_pts_against_adj: 0.0,
                off_pts_for_adj: 0.0,
                off_pts_against_adj: 0.0,
                on_diff,
                off_diff,
                on_off_diff: on_diff - off_diff,
                on_diff_adj,
                off_diff_adj,
                on_off_diff_adj: on_diff_adj - off_diff_adj,
                on_diff_reconstructed: 0.0,
                off_diff_reconstructed: 0.0,
                fg3a: line.fg3a,
                fg3m: line.fg3m,
                exp_3pm,
                delta_3m,
                from_box_score: true,
            });
        }
    }
    rows
}

/// Per-player on/off rows and constant-lineup stints for one game.
///
/// `expectations` must come from the same pre-game snapshot the game
/// adjuster used, so both views agree. A game without a play stream falls
/// back to box-score rows. A starting lineup that is not five players, or a
/// substitution that contradicts the tracked lineup, rejects the whole game.
pub fn compute_onoff(
    game: &GameRecord,
    expectations: &[PlayerExpectation],
    cfg: &LuckConfig,
) -> Result<OnOffGame, LuckError> {
    game.validate()?;
    let by_player: HashMap<PlayerId, &PlayerExpectation> =
        expectations.iter().map(|e| (e.player_id, e)).collect();
    let net = cfg.make_value_net_of_rebound();

    if game.events.is_empty() {
        debug!(game_id = %game.game_id, "no play stream; box-score on/off rows");
        return Ok(OnOffGame {
            rows: box_score_rows(game, &by_player, net),
            stints: Vec::new(),
        });
    }

    let roster = game.player_sides();

    let mut walker = Walker::new(game)?;
    for ev in &game.events {
        walker.advance(ev.elapsed_secs);
        match ev.kind {
            EventKind::Substitution {
                player_out,
                player_in,
            } => walker.substitute(ev.side, player_out, player_in, &roster)?,
            EventKind::Points { points } => {
                walker.score(ev.side, points as f64, points as f64)
            }
            EventKind::ThreePoint { shooter, made } => {
                let p_hat = by_player
                    .get(&shooter)
                    .map(|e| e.p_hat)
                    .ok_or_else(|| {
                        LuckError::mismatch(
                            &game.game_id,
                            format!("no expectation for shooter {shooter}"),
                        )
                    })?;
                let actual = if made { 3.0 } else { 0.0 };
                let shift = (p_hat - if made { 1.0 } else { 0.0 }) * net;
                walker.score(ev.side, actual, actual + shift);
            }
        }
    }
    walker.advance(game.duration());
    walker.close_stint();

    let mut rows = Vec::new();
    for (side, team) in game.sides() {
        let (us, them) = (slot(side), slot(side.opponent()));
        for line in &team.players {
            let c = walker.court.get(&line.player_id).copied().unwrap_or_default();
            if line.minutes <= 0.0 && c.seconds == 0 {
                continue;
            }

            let off_for = walker.totals[us] - c.pts_for;
            let off_against = walker.totals[them] - c.pts_against;
            let off_for_adj = walker.totals_adj[us] - c.pts_for_adj;
            let off_against_adj = walker.totals_adj[them] - c.pts_against_adj;

            let on_recon = c.pts_for - c.pts_against;
            let off_recon = off_for - off_against;
            let margin = walker.totals[us] - walker.totals[them];

            let on_diff = line.plus_minus.unwrap_or(on_recon);
            let off_diff = margin - on_diff;
            let on_diff_adj = on_diff + (c.pts_for_adj - c.pts_against_adj - on_recon);
            let off_diff_adj = off_diff + (off_for_adj - off_against_adj - off_recon);

            let (exp_3pm, delta_3m) = by_player
                .get(&line.player_id)
                .map(|e| (e.expected_makes, e.delta_3m))
                .unwrap_or((0.0, 0.0));

            rows.push(OnOffRow {
                game_id: game.game_id.clone(),
                date: game.date,
                season: walker.season.clone(),
                team_id: team.team_id,
                player_id: line.player_id,
                player_name: line.name.clone(),
                minutes: if line.minutes > 0.0 {
                    line.minutes
                } else {
                    c.seconds as f64 / 60.0
                },
                seconds_on: c.seconds,
                on_pts_for: c.pts_for,
                on_pts_against: c.pts_against,
                off_pts_for: off_for,
                off_pts_against: off_against,
                on_pts_for_adj: c.pts_for_adj,
                on_pts_against_adj: c.pts_against_adj,
                off_pts_for_adj: off_for_adj,
                off_pts_against_adj: off_against_adj,
                on_diff,
                off_diff,
                on_off_diff: on_diff - off_diff,
                on_diff_adj,
                off_diff_adj,
                on_off_diff_adj: on_diff_adj - off_diff_adj,
                on_diff_reconstructed: on_recon,
                off_diff_reconstructed: off_recon,
                fg3a: line.fg3a,
                fg3m: line.fg3m,
                exp_3pm,
                delta_3m,
                from_box_score: false,
            });
        }
    }

    Ok(OnOffGame {
        rows,
        stints: walker.stints,
    })
}
