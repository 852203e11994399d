//! How closely the lineup walk reproduces the official box score.
//!
//! Each play-stream row is joined to its box line. The reconstructed on-court
//! differential is compared with official plus-minus, and the reconstructed
//! seconds on court with official minutes. Box-score rows are skipped since
//! nothing was reconstructed for them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{GameRecord, PlayerId, PlayerLine};
use crate::onoff::OnOffRow;

/// Minutes within this of the official figure count as a match.
pub const MINUTES_TOLERANCE: f64 = 0.5;
const EXACT: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub samples: usize,
    pub mean_abs: f64,
    pub max_abs: f64,
    /// Share of samples whose error is within the metric's tolerance.
    pub match_rate: f64,
}

impl ErrorStats {
    fn from_errors(errors: &[f64], tolerance: f64) -> Self {
        if errors.is_empty() {
            return Self::default();
        }
        let n = errors.len() as f64;
        let abs = errors.iter().map(|e| e.abs());
        Self {
            samples: errors.len(),
            mean_abs: abs.clone().sum::<f64>() / n,
            max_abs: abs.clone().fold(0.0, f64::max),
            match_rate: abs.filter(|e| *e <= tolerance).count() as f64 / n,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OnOffAccuracy {
    /// Rows joined to a box line.
    pub rows: usize,
    /// Exact-match rate.
    pub plus_minus: ErrorStats,
    /// Rate within `MINUTES_TOLERANCE`.
    pub minutes: ErrorStats,
}

pub fn onoff_accuracy(games: &[GameRecord], rows: &[OnOffRow]) -> OnOffAccuracy {
    let mut lines: HashMap<(&str, PlayerId), &PlayerLine> = HashMap::new();
    for g in games {
        for (_, team) in g.sides() {
            for p in &team.players {
                lines.insert((g.game_id.as_str(), p.player_id), p);
            }
        }
    }

    let mut joined = 0;
    let mut pm_err = Vec::new();
    let mut min_err = Vec::new();
    for r in rows.iter().filter(|r| !r.from_box_score) {
        let Some(line) = lines.get(&(r.game_id.as_str(), r.player_id)) else {
            continue;
        };
        joined += 1;
        if let Some(pm) = line.plus_minus {
            pm_err.push(r.on_diff_reconstructed - pm);
        }
        if line.minutes > 0.0 {
            min_err.push(r.seconds_on as f64 / 60.0 - line.minutes);
        }
    }

    OnOffAccuracy {
        rows: joined,
        plus_minus: ErrorStats::from_errors(&pm_err, EXACT),
        minutes: ErrorStats::from_errors(&min_err, MINUTES_TOLERANCE),
    }
}
