use chrono::NaiveDate;
use thiserror::Error;

use crate::model::PlayerId;

/// Domain errors for ingestion and state maintenance.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LuckError {
    // Box score source
    #[error("source error for {date}: {message}")]
    Source { date: NaiveDate, message: String },

    #[error("box score mismatch in game {game_id}: {message}")]
    BoxScoreMismatch { game_id: String, message: String },

    #[error("lineup conflict in game {game_id}: {message}")]
    LineupConflict { game_id: String, message: String },

    // Ingestion and state ordering
    #[error("game {0} already applied")]
    DuplicateGame(String),

    #[error(
        "ordering violation for player {player_id}: game {game_id} on {date} precedes watermark {watermark_game_id} on {watermark_date}"
    )]
    OrderingViolation {
        player_id: PlayerId,
        game_id: String,
        date: NaiveDate,
        watermark_game_id: String,
        watermark_date: NaiveDate,
    },

    #[error("player {0} already has game updates; seed must precede the first game")]
    SeedAfterGames(PlayerId),

    #[error("player {0} already has a career seed")]
    AlreadySeeded(PlayerId),

    #[error("invalid tally for player {player_id} in game {game_id}: {makes} makes on {attempts} attempts")]
    InvalidTally {
        game_id: String,
        player_id: PlayerId,
        attempts: u32,
        makes: u32,
    },

    // Configuration and fitting
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("ridge system not positive definite (alpha={alpha})")]
    SingularSystem { alpha: f64 },

    #[error("storage error: {0}")]
    Storage(String),
}

impl LuckError {
    pub fn source(date: NaiveDate, message: impl Into<String>) -> Self {
        Self::Source {
            date,
            message: message.into(),
        }
    }

    pub fn mismatch(game_id: &str, message: impl Into<String>) -> Self {
        Self::BoxScoreMismatch {
            game_id: game_id.to_string(),
            message: message.into(),
        }
    }

    pub fn lineup(game_id: &str, message: impl Into<String>) -> Self {
        Self::LineupConflict {
            game_id: game_id.to_string(),
            message: message.into(),
        }
    }

    /// Ordering violations break replay determinism and halt a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OrderingViolation { .. })
    }
}
