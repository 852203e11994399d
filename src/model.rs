use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::LuckError;

pub type PlayerId = u32;
pub type TeamId = u32;

/// Regulation length; overtime periods extend the clock past this.
pub const REGULATION_SECS: u32 = 48 * 60;
pub const OVERTIME_SECS: u32 = 5 * 60;

/// Players on court per side.
pub const LINEUP_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

/// Regular season or postseason, read from the NBA game id: the third digit
/// of `00SYYNNNNN` is 4 for playoffs and 5 for the play-in. Ids in any other
/// shape count as regular season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonType {
    #[default]
    Regular,
    Playoffs,
}

impl SeasonType {
    pub fn of_game_id(game_id: &str) -> Self {
        let b = game_id.as_bytes();
        let nba_shaped = b.len() == 10 && b.iter().all(u8::is_ascii_digit);
        match (nba_shaped, b.get(2)) {
            (true, Some(b'4' | b'5')) => SeasonType::Playoffs,
            _ => SeasonType::Regular,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLine {
    pub player_id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub minutes: f64,
    pub fg3a: u32,
    pub fg3m: u32,
    /// Official on-court differential, when the source reports one.
    #[serde(default)]
    pub plus_minus: Option<f64>,
    #[serde(default)]
    pub starter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamBox {
    pub team_id: TeamId,
    pub abbr: String,
    pub points: u32,
    pub fg3a: u32,
    pub fg3m: u32,
    #[serde(default)]
    pub players: Vec<PlayerLine>,
}

impl TeamBox {
    pub fn starters(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players
            .iter()
            .filter(|p| p.starter)
            .map(|p| p.player_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Substitution {
        player_out: PlayerId,
        player_in: PlayerId,
    },
    /// Non-three scoring (twos and free throws).
    Points { points: u32 },
    ThreePoint { shooter: PlayerId, made: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub elapsed_secs: u32,
    pub side: Side,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: String,
    pub date: NaiveDate,
    pub home: TeamBox,
    pub away: TeamBox,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    /// Overtime periods played, when the source reports them.
    #[serde(default)]
    pub overtime_periods: Option<u32>,
    #[serde(default)]
    pub events: Vec<GameEvent>,
}

impl GameRecord {
    pub fn team(&self, side: Side) -> &TeamBox {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }

    pub fn sides(&self) -> [(Side, &TeamBox); 2] {
        [(Side::Home, &self.home), (Side::Away, &self.away)]
    }

    pub fn season(&self) -> String {
        season_key(self.date)
    }

    pub fn season_type(&self) -> SeasonType {
        SeasonType::of_game_id(&self.game_id)
    }

    /// Game clock length: the reported duration, else regulation plus any
    /// reported overtime, never shorter than the last event.
    pub fn duration(&self) -> u32 {
        let last = self.events.last().map(|e| e.elapsed_secs).unwrap_or(0);
        let reported = self.duration_secs.unwrap_or_else(|| {
            REGULATION_SECS + OVERTIME_SECS * self.overtime_periods.unwrap_or(0)
        });
        reported.max(last)
    }

    pub fn player_sides(&self) -> HashMap<PlayerId, Side> {
        let mut out = HashMap::new();
        for (side, team) in self.sides() {
            for p in &team.players {
                out.insert(p.player_id, side);
            }
        }
        out
    }

    /// Structural checks every consumer relies on: one roster per player,
    /// makes never exceed attempts, team totals equal the sum of lines, and a
    /// play stream (when present) that is ordered and agrees with the box.
    pub fn validate(&self) -> Result<(), LuckError> {
        let gid = self.game_id.as_str();
        if gid.trim().is_empty() {
            return Err(LuckError::source(self.date, "empty game_id"));
        }
        if self.home.team_id == self.away.team_id {
            return Err(LuckError::mismatch(gid, "home and away share a team id"));
        }

        let mut seen = HashMap::new();
        for (side, team) in self.sides() {
            let mut a = 0u32;
            let mut m = 0u32;
            for p in &team.players {
                if p.fg3m > p.fg3a {
                    return Err(LuckError::InvalidTally {
                        game_id: self.game_id.clone(),
                        player_id: p.player_id,
                        attempts: p.fg3a,
                        makes: p.fg3m,
                    });
                }
                if seen.insert(p.player_id, side).is_some() {
                    return Err(LuckError::mismatch(
                        gid,
                        format!("player {} listed twice", p.player_id),
                    ));
                }
                a += p.fg3a;
                m += p.fg3m;
            }
            if a != team.fg3a || m != team.fg3m {
                return Err(LuckError::mismatch(
                    gid,
                    format!(
                        "{} totals {}/{} differ from player sum {}/{}",
                        team.abbr, team.fg3m, team.fg3a, m, a
                    ),
                ));
            }
        }

        if self.events.is_empty() {
            return Ok(());
        }

        let mut prev = 0u32;
        let mut threes: HashMap<PlayerId, (u32, u32)> = HashMap::new();
        let mut points = [0u32; 2];
        for ev in &self.events {
            if ev.elapsed_secs < prev {
                return Err(LuckError::source(
                    self.date,
                    format!("game {gid}: play stream not ordered at {}s", ev.elapsed_secs),
                ));
            }
            prev = ev.elapsed_secs;
            let slot = match ev.side {
                Side::Home => 0,
                Side::Away => 1,
            };
            match &ev.kind {
                EventKind::Points { points: p } => points[slot] += p,
                EventKind::ThreePoint { shooter, made } => {
                    if seen.get(shooter) != Some(&ev.side) {
                        return Err(LuckError::mismatch(
                            gid,
                            format!("shooter {shooter} not on the shooting roster"),
                        ));
                    }
                    let e = threes.entry(*shooter).or_default();
                    e.0 += 1;
                    if *made {
                        e.1 += 1;
                        points[slot] += 3;
                    }
                }
                EventKind::Substitution { .. } => {}
            }
        }

        for (_, team) in self.sides() {
            for p in &team.players {
                let (a, m) = threes.get(&p.player_id).copied().unwrap_or((0, 0));
                if a != p.fg3a || m != p.fg3m {
                    return Err(LuckError::mismatch(
                        gid,
                        format!(
                            "player {} play stream 3PT {m}/{a} differs from box {}/{}",
                            p.player_id, p.fg3m, p.fg3a
                        ),
                    ));
                }
            }
        }
        if points[0] != self.home.points || points[1] != self.away.points {
            return Err(LuckError::mismatch(
                gid,
                format!(
                    "play stream score {}-{} differs from final {}-{}",
                    points[0], points[1], self.home.points, self.away.points
                ),
            ));
        }
        Ok(())
    }
}

/// Season label such as "2025-26"; seasons roll over in July.
pub fn season_key(date: NaiveDate) -> String {
    let start = if date.month() >= 7 {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{start}-{:02}", (start + 1).rem_euclid(100))
}
