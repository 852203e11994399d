use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::LuckConfig;
use crate::error::LuckError;
use crate::expectation::{PlayerExpectation, StateView, expect_lines};
use crate::model::{GameRecord, PlayerId, Side, TeamId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamAdjustment {
    pub team_id: TeamId,
    pub abbr: String,
    pub points_actual: f64,
    pub fg3a: u32,
    pub fg3m_actual: u32,
    pub fg3m_exp: f64,
    /// Expected minus actual makes.
    pub delta_3m: f64,
    pub delta_pts_3: f64,
    pub orb_corr_pts: f64,
    pub delta_pts_total: f64,
    pub points_adj: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPlayer {
    pub player_id: PlayerId,
    pub name: String,
    pub team_id: TeamId,
    /// Points gained from shooting luck; positive means the player ran hot.
    pub delta_pts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedGameRow {
    pub game_id: String,
    pub date: NaiveDate,
    pub season: String,
    pub home: TeamAdjustment,
    pub away: TeamAdjustment,
    pub margin_actual: f64,
    pub margin_adj: f64,
    pub margin_delta: f64,
    pub swing: Option<SwingPlayer>,
}

impl AdjustedGameRow {
    pub fn team(&self, side: Side) -> &TeamAdjustment {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameAdjustment {
    pub row: AdjustedGameRow,
    pub players: Vec<PlayerExpectation>,
}

/// Rebound chances implied by the counterfactual change in misses.
/// An expected-make surplus (`delta_3m > 0`) means fewer misses, so fewer
/// offensive rebounds, so the correction runs against the make value.
pub fn orb_correction(delta_3m: f64, orb_rate: f64, ppp: f64) -> f64 {
    -(orb_rate * ppp) * delta_3m
}

/// Player-level luck in points; positive means the player beat expectation.
pub fn player_luck_points(p: &PlayerExpectation, cfg: &LuckConfig) -> f64 {
    -p.delta_3m * cfg.make_value_net_of_rebound()
}

fn team_adjustment(
    game: &GameRecord,
    side: Side,
    players: &[PlayerExpectation],
    cfg: &LuckConfig,
) -> TeamAdjustment {
    let team = game.team(side);
    let fg3m_exp = players
        .iter()
        .filter(|p| p.side == side)
        .map(|p| p.expected_makes)
        .sum::<f64>();
    let delta_3m = fg3m_exp - team.fg3m as f64;
    let delta_pts_3 = 3.0 * delta_3m;
    let orb_corr_pts = orb_correction(delta_3m, cfg.orb_rate, cfg.ppp);
    let delta_pts_total = delta_pts_3 + orb_corr_pts;
    TeamAdjustment {
        team_id: team.team_id,
        abbr: team.abbr.clone(),
        points_actual: team.points as f64,
        fg3a: team.fg3a,
        fg3m_actual: team.fg3m,
        fg3m_exp,
        delta_3m,
        delta_pts_3,
        orb_corr_pts,
        delta_pts_total,
        points_adj: team.points as f64 + delta_pts_total,
    }
}

/// Removes each team's own shooting luck from its own score. The snapshot
/// must hold pre-game state; this function never touches it.
pub fn adjust_game(
    game: &GameRecord,
    snapshot: &impl StateView,
    cfg: &LuckConfig,
) -> Result<GameAdjustment, LuckError> {
    game.validate()?;
    let players = expect_lines(game, snapshot, &cfg.prior);
    let home = team_adjustment(game, Side::Home, &players, cfg);
    let away = team_adjustment(game, Side::Away, &players, cfg);

    let swing = players
        .iter()
        .filter(|p| p.attempts > 0)
        .map(|p| SwingPlayer {
            player_id: p.player_id,
            name: p.name.clone(),
            team_id: p.team_id,
            delta_pts: player_luck_points(p, cfg),
        })
        .max_by(|a, b| a.delta_pts.abs().total_cmp(&b.delta_pts.abs()));

    let margin_actual = home.points_actual - away.points_actual;
    let margin_adj = home.points_adj - away.points_adj;
    let row = AdjustedGameRow {
        game_id: game.game_id.clone(),
        date: game.date,
        season: game.season(),
        home,
        away,
        margin_actual,
        margin_adj,
        margin_delta: margin_adj - margin_actual,
        swing,
    };
    Ok(GameAdjustment { row, players })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::expectation::Prior;
    use crate::model::{PlayerLine, TeamBox};
    use crate::recency::PlayerRecencyState;

    fn line(id: PlayerId, a: u32, m: u32) -> PlayerLine {
        PlayerLine {
            player_id: id,
            name: format!("P{id}"),
            minutes: 30.0,
            fg3a: a,
            fg3m: m,
            plus_minus: None,
            starter: true,
        }
    }

    fn cfg() -> LuckConfig {
        LuckConfig {
            prior: Prior::Fixed { mu: 0.35, kappa: 50.0 },
            orb_rate: 0.25,
            ppp: 1.1,
            ..LuckConfig::default()
        }
    }

    fn game() -> GameRecord {
        GameRecord {
            game_id: "g1".into(),
            date: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            home: TeamBox {
                team_id: 1,
                abbr: "HOM".into(),
                points: 100,
                fg3a: 12,
                fg3m: 2,
                players: vec![line(10, 10, 2), line(11, 2, 0), line(12, 0, 0)],
            },
            away: TeamBox {
                team_id: 2,
                abbr: "AWY".into(),
                points: 104,
                fg3a: 8,
                fg3m: 6,
                players: vec![line(20, 8, 6)],
            },
            duration_secs: None,
            overtime_periods: None,
            events: Vec::new(),
        }
    }

    #[test]
    fn cold_team_gains_points() {
        let mut snap = HashMap::new();
        snap.insert(10, PlayerRecencyState { a_r: 100.0, m_r: 40.0 });
        let out = adjust_game(&game(), &snap, &cfg()).unwrap();
        let home = &out.row.home;

        let p10 = 57.5 / 150.0;
        let exp = 10.0 * p10 + 2.0 * 0.35;
        assert!((home.fg3m_exp - exp).abs() < 1e-9);
        assert!(home.delta_3m > 0.0);
        // Rebound correction opposes the make value but never outweighs it.
        assert!(home.orb_corr_pts < 0.0);
        assert!(home.delta_pts_total > 0.0);
        assert!(home.delta_pts_total < home.delta_pts_3);
        assert!((home.points_adj - (100.0 + home.delta_pts_total)).abs() < 1e-9);
    }

    #[test]
    fn hot_team_loses_points_and_margin_shifts() {
        let snap: HashMap<PlayerId, PlayerRecencyState> = HashMap::new();
        let out = adjust_game(&game(), &snap, &cfg()).unwrap();
        let away = &out.row.away;
        assert!(away.delta_3m < 0.0);
        assert!(away.orb_corr_pts > 0.0);
        assert!(away.delta_pts_total < 0.0);
        assert!(out.row.margin_delta > 0.0);
    }

    #[test]
    fn zero_attempt_lines_contribute_nothing() {
        let snap: HashMap<PlayerId, PlayerRecencyState> = HashMap::new();
        let out = adjust_game(&game(), &snap, &cfg()).unwrap();
        let p12 = out.players.iter().find(|p| p.player_id == 12).unwrap();
        assert_eq!(p12.expected_makes, 0.0);
        assert_eq!(p12.delta_3m, 0.0);
    }

    #[test]
    fn swing_player_is_largest_absolute_luck() {
        let snap: HashMap<PlayerId, PlayerRecencyState> = HashMap::new();
        let out = adjust_game(&game(), &snap, &cfg()).unwrap();
        let swing = out.row.swing.unwrap();
        assert_eq!(swing.player_id, 20);
        assert!(swing.delta_pts > 0.0);
    }

    #[test]
    fn team_delta_equals_player_sum() {
        let snap: HashMap<PlayerId, PlayerRecencyState> = HashMap::new();
        let out = adjust_game(&game(), &snap, &cfg()).unwrap();
        let sum = out
            .players
            .iter()
            .filter(|p| p.side == Side::Home)
            .map(|p| p.delta_3m)
            .sum::<f64>();
        assert!((sum - out.row.home.delta_3m).abs() < 1e-9);
    }
}
