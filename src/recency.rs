//! Recency-weighted three-point state per player.
//!
//! State is a keyed map driven by an ordered command log. Every mutation is
//! a [`StateCommand`]; replaying the log from empty state reproduces the map
//! bit-for-bit, however the run that produced it was chunked.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LuckError;
use crate::expectation::StateView;
use crate::model::{GameRecord, PlayerId};

pub const DEFAULT_HALF_LIFE_3PA: f64 = 2000.0;

/// Per-attempt decay so that `half_life` attempts halve an old attempt's weight.
pub fn decay_factor(half_life: f64) -> f64 {
    0.5_f64.powf(1.0 / half_life)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecencyState {
    pub a_r: f64,
    pub m_r: f64,
}

impl PlayerRecencyState {
    /// Decay by `γ^a`, then accumulate the game's attempts and makes.
    pub fn update(self, a: f64, m: f64, half_life: f64) -> Self {
        let decay = decay_factor(half_life).powf(a);
        Self {
            a_r: decay * self.a_r + a,
            m_r: decay * self.m_r + m,
        }
    }

    pub fn raw_rate(&self) -> Option<f64> {
        (self.a_r > 0.0).then(|| self.m_r / self.a_r)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark {
    pub date: NaiveDate,
    pub game_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotTally {
    pub player_id: PlayerId,
    pub attempts: u32,
    pub makes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum StateCommand {
    /// Career baseline set before a player's first game update.
    Seed {
        player_id: PlayerId,
        attempts: f64,
        makes: f64,
    },
    Game {
        game_id: String,
        date: NaiveDate,
        tallies: Vec<ShotTally>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub state: PlayerRecencyState,
    pub watermark: Option<Watermark>,
}

/// A validated, not yet applied state transition for one game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameUpdate {
    pub command: StateCommand,
    pub next: Vec<(PlayerId, PlayerRecencyState)>,
    pub watermark: Watermark,
}

#[derive(Debug, Clone)]
pub struct RecencyStore {
    half_life: f64,
    players: HashMap<PlayerId, PlayerEntry>,
    applied_games: HashSet<String>,
    log: Vec<StateCommand>,
}

impl StateView for RecencyStore {
    fn state_of(&self, player_id: PlayerId) -> PlayerRecencyState {
        self.get(player_id)
    }
}

impl RecencyStore {
    pub fn new(half_life: f64) -> Self {
        Self {
            half_life,
            players: HashMap::new(),
            applied_games: HashSet::new(),
            log: Vec::new(),
        }
    }

    /// Rebuilds a store from persisted parts without replaying.
    pub fn from_parts(
        half_life: f64,
        players: HashMap<PlayerId, PlayerEntry>,
        applied_games: HashSet<String>,
        log: Vec<StateCommand>,
    ) -> Self {
        Self {
            half_life,
            players,
            applied_games,
            log,
        }
    }

    pub fn replay(half_life: f64, log: &[StateCommand]) -> Result<Self, LuckError> {
        let mut store = Self::new(half_life);
        for command in log {
            match command {
                StateCommand::Seed {
                    player_id,
                    attempts,
                    makes,
                } => store.seed(*player_id, *attempts, *makes)?,
                StateCommand::Game {
                    game_id,
                    date,
                    tallies,
                } => {
                    let update = store.plan_game(game_id, *date, tallies)?;
                    store.commit(update);
                }
            }
        }
        Ok(store)
    }

    pub fn half_life(&self) -> f64 {
        self.half_life
    }

    pub fn get(&self, player_id: PlayerId) -> PlayerRecencyState {
        self.players
            .get(&player_id)
            .map(|e| e.state)
            .unwrap_or_default()
    }

    pub fn entry(&self, player_id: PlayerId) -> Option<&PlayerEntry> {
        self.players.get(&player_id)
    }

    pub fn players(&self) -> impl Iterator<Item = (&PlayerId, &PlayerEntry)> {
        self.players.iter()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn has_game(&self, game_id: &str) -> bool {
        self.applied_games.contains(game_id)
    }

    pub fn log(&self) -> &[StateCommand] {
        &self.log
    }

    pub fn snapshot(&self) -> HashMap<PlayerId, PlayerRecencyState> {
        self.players.iter().map(|(id, e)| (*id, e.state)).collect()
    }

    /// Career baseline for a player with no state yet. A player is seeded at
    /// most once; the first seed wins and later ones are refused.
    pub fn plan_seed(
        &self,
        player_id: PlayerId,
        attempts: f64,
        makes: f64,
    ) -> Result<(PlayerRecencyState, StateCommand), LuckError> {
        if let Some(entry) = self.players.get(&player_id) {
            return Err(match entry.watermark {
                Some(_) => LuckError::SeedAfterGames(player_id),
                None => LuckError::AlreadySeeded(player_id),
            });
        }
        let a = attempts.max(0.0);
        let next = PlayerRecencyState {
            a_r: a,
            m_r: makes.clamp(0.0, a),
        };
        Ok((
            next,
            StateCommand::Seed {
                player_id,
                attempts,
                makes,
            },
        ))
    }

    pub fn commit_seed(&mut self, player_id: PlayerId, state: PlayerRecencyState, command: StateCommand) {
        self.players.insert(
            player_id,
            PlayerEntry {
                state,
                watermark: None,
            },
        );
        self.log.push(command);
    }

    pub fn seed(&mut self, player_id: PlayerId, attempts: f64, makes: f64) -> Result<(), LuckError> {
        let (state, command) = self.plan_seed(player_id, attempts, makes)?;
        self.commit_seed(player_id, state, command);
        Ok(())
    }

    /// Validates a game against every participant's watermark and computes the
    /// post-game states without touching the store.
    ///
    /// Zero-attempt tallies are dropped: their update is the identity and a
    /// player's entry is only created by a first observed attempt.
    pub fn plan_game(
        &self,
        game_id: &str,
        date: NaiveDate,
        tallies: &[ShotTally],
    ) -> Result<GameUpdate, LuckError> {
        if self.applied_games.contains(game_id) {
            return Err(LuckError::DuplicateGame(game_id.to_string()));
        }

        let mut kept = Vec::with_capacity(tallies.len());
        let mut next = Vec::with_capacity(tallies.len());
        let mut seen = HashSet::new();
        for t in tallies {
            if t.makes > t.attempts {
                return Err(LuckError::InvalidTally {
                    game_id: game_id.to_string(),
                    player_id: t.player_id,
                    attempts: t.attempts,
                    makes: t.makes,
                });
            }
            if t.attempts == 0 {
                continue;
            }
            if !seen.insert(t.player_id) {
                return Err(LuckError::mismatch(
                    game_id,
                    format!("player {} tallied twice", t.player_id),
                ));
            }
            let entry = self.players.get(&t.player_id);
            if let Some(w) = entry.and_then(|e| e.watermark.as_ref()) {
                if w.game_id == game_id {
                    return Err(LuckError::DuplicateGame(game_id.to_string()));
                }
                if date < w.date {
                    return Err(LuckError::OrderingViolation {
                        player_id: t.player_id,
                        game_id: game_id.to_string(),
                        date,
                        watermark_game_id: w.game_id.clone(),
                        watermark_date: w.date,
                    });
                }
            }
            let prev = entry.map(|e| e.state).unwrap_or_default();
            next.push((
                t.player_id,
                prev.update(t.attempts as f64, t.makes as f64, self.half_life),
            ));
            kept.push(t.clone());
        }

        Ok(GameUpdate {
            command: StateCommand::Game {
                game_id: game_id.to_string(),
                date,
                tallies: kept,
            },
            next,
            watermark: Watermark {
                date,
                game_id: game_id.to_string(),
            },
        })
    }

    pub fn commit(&mut self, update: GameUpdate) {
        let GameUpdate {
            command,
            next,
            watermark,
        } = update;
        for (player_id, state) in next {
            self.players.insert(
                player_id,
                PlayerEntry {
                    state,
                    watermark: Some(watermark.clone()),
                },
            );
        }
        self.applied_games.insert(watermark.game_id);
        self.log.push(command);
    }

    pub fn apply_game(
        &mut self,
        game_id: &str,
        date: NaiveDate,
        tallies: &[ShotTally],
    ) -> Result<(), LuckError> {
        let update = self.plan_game(game_id, date, tallies)?;
        self.commit(update);
        Ok(())
    }

    /// SHA-256 over the state table sorted by player id.
    pub fn digest(&self) -> String {
        let mut ids = self.players.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        let mut hasher = Sha256::new();
        for id in ids {
            let state = self.players[&id].state;
            hasher.update(id.to_le_bytes());
            hasher.update(state.a_r.to_bits().to_le_bytes());
            hasher.update(state.m_r.to_bits().to_le_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

pub fn tallies_for(game: &GameRecord) -> Vec<ShotTally> {
    game.sides()
        .iter()
        .flat_map(|(_, team)| team.players.iter())
        .map(|p| ShotTally {
            player_id: p.player_id,
            attempts: p.fg3a,
            makes: p.fg3m,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, d).unwrap()
    }

    fn tally(player_id: PlayerId, attempts: u32, makes: u32) -> ShotTally {
        ShotTally {
            player_id,
            attempts,
            makes,
        }
    }

    #[test]
    fn update_matches_worked_example() {
        let prior = PlayerRecencyState { a_r: 100.0, m_r: 40.0 };
        let post = prior.update(10.0, 2.0, 2000.0);
        assert!((decay_factor(2000.0) - 0.999653).abs() < 1e-6);
        // gamma^10 = 0.996540
        assert!((post.a_r - 109.654).abs() < 1e-3);
        assert!((post.m_r - 41.8616).abs() < 1e-3);
    }

    #[test]
    fn longer_half_life_decays_less() {
        let prior = PlayerRecencyState { a_r: 400.0, m_r: 150.0 };
        let mut last = 0.0;
        for hl in [50.0, 500.0, 2000.0, 1e6, 1e12] {
            let post = prior.update(25.0, 9.0, hl);
            assert!(post.a_r >= last);
            last = post.a_r;
        }
        assert!((last - 425.0).abs() < 1e-6);
    }

    #[test]
    fn unseen_player_defaults_to_zero() {
        let store = RecencyStore::new(2000.0);
        assert_eq!(store.get(7), PlayerRecencyState::default());
    }

    #[test]
    fn duplicate_game_is_rejected_without_mutation() {
        let mut store = RecencyStore::new(2000.0);
        store.apply_game("g1", day(1), &[tally(1, 5, 2)]).unwrap();
        let before = store.digest();
        let err = store.apply_game("g1", day(1), &[tally(1, 5, 2)]).unwrap_err();
        assert_eq!(err, LuckError::DuplicateGame("g1".into()));
        assert_eq!(store.digest(), before);
        assert_eq!(store.log().len(), 1);
    }

    #[test]
    fn earlier_date_is_an_ordering_violation() {
        let mut store = RecencyStore::new(2000.0);
        store.apply_game("g2", day(5), &[tally(1, 4, 1)]).unwrap();
        let err = store
            .apply_game("g1", day(3), &[tally(2, 3, 1), tally(1, 2, 2)])
            .unwrap_err();
        assert!(err.is_fatal());
        // Player 2 was valid but the game is atomic.
        assert!(store.entry(2).is_none());
    }

    #[test]
    fn zero_attempts_do_not_create_state() {
        let mut store = RecencyStore::new(2000.0);
        store.apply_game("g1", day(1), &[tally(9, 0, 0)]).unwrap();
        assert!(store.entry(9).is_none());
        assert!(store.has_game("g1"));
    }

    #[test]
    fn seed_only_before_first_game() {
        let mut store = RecencyStore::new(2000.0);
        store.seed(3, 1200.0, 440.0).unwrap();
        store.apply_game("g1", day(1), &[tally(3, 6, 3)]).unwrap();
        assert_eq!(store.seed(3, 10.0, 4.0), Err(LuckError::SeedAfterGames(3)));
    }

    #[test]
    fn second_seed_is_refused_and_state_unchanged() {
        let mut store = RecencyStore::new(2000.0);
        store.seed(4, 400.0, 150.0).unwrap();
        assert_eq!(store.seed(4, 400.0, 150.0), Err(LuckError::AlreadySeeded(4)));
        assert_eq!(store.get(4), PlayerRecencyState { a_r: 400.0, m_r: 150.0 });
        assert_eq!(store.log().len(), 1);
    }

    #[test]
    fn replay_reproduces_digest() {
        let mut store = RecencyStore::new(1500.0);
        store.seed(1, 300.0, 110.0).unwrap();
        store.apply_game("a", day(1), &[tally(1, 8, 3), tally(2, 4, 0)]).unwrap();
        store.apply_game("b", day(2), &[tally(2, 7, 4)]).unwrap();
        store.apply_game("c", day(2), &[tally(1, 3, 3)]).unwrap();
        let replayed = RecencyStore::replay(1500.0, store.log()).unwrap();
        assert_eq!(replayed.digest(), store.digest());
        assert_eq!(replayed.snapshot(), store.snapshot());
    }
}
