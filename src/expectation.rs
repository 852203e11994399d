use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{GameRecord, PlayerId, Side, TeamId};
use crate::recency::PlayerRecencyState;

/// Shrinkage-adjusted make probability `(M_r + κμ) / (A_r + κ)`.
///
/// Callers guarantee `kappa > 0`, so the denominator is positive even for an
/// unseen player with `A_r = 0`.
pub fn expected_rate(a_r: f64, m_r: f64, mu: f64, kappa: f64) -> f64 {
    (m_r + kappa * mu) / (a_r + kappa)
}

pub fn expected_makes(attempts: f64, p_hat: f64) -> f64 {
    attempts * p_hat
}

/// League prior used for shrinkage.
///
/// `Sliding` interpolates both the prior rate and its weight with the
/// player's recency-weighted volume, so low-volume shooters lean on a lower
/// rookie prior and high-volume shooters on a veteran prior. The default is
/// the sliding prior from 0.32 at κ=200 up to 0.36 at κ=300 over the first
/// 1000 weighted attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Prior {
    Fixed {
        mu: f64,
        kappa: f64,
    },
    Sliding {
        mu_min: f64,
        mu_max: f64,
        kappa_min: f64,
        kappa_max: f64,
        scale_attempts: f64,
    },
}

impl Default for Prior {
    fn default() -> Self {
        Prior::Sliding {
            mu_min: 0.32,
            mu_max: 0.36,
            kappa_min: 200.0,
            kappa_max: 300.0,
            scale_attempts: 1000.0,
        }
    }
}

impl Prior {

    /// `(mu, kappa)` for a player with `a_r` weighted attempts.
    pub fn resolve(&self, a_r: f64) -> (f64, f64) {
        match *self {
            Prior::Fixed { mu, kappa } => (mu, kappa),
            Prior::Sliding {
                mu_min,
                mu_max,
                kappa_min,
                kappa_max,
                scale_attempts,
            } => {
                let scale = (a_r / scale_attempts.max(1e-9)).clamp(0.0, 1.0);
                (
                    mu_min + (mu_max - mu_min) * scale,
                    kappa_min + (kappa_max - kappa_min) * scale,
                )
            }
        }
    }

    pub fn rate(&self, state: PlayerRecencyState) -> f64 {
        let (mu, kappa) = self.resolve(state.a_r);
        expected_rate(state.a_r, state.m_r, mu, kappa)
    }

    pub fn validate(&self) -> Result<(), String> {
        let check_mu = |mu: f64, name: &str| {
            if (0.0..=1.0).contains(&mu) {
                Ok(())
            } else {
                Err(format!("{name} must be within [0, 1], got {mu}"))
            }
        };
        let check_kappa = |kappa: f64, name: &str| {
            if kappa > 0.0 && kappa.is_finite() {
                Ok(())
            } else {
                Err(format!("{name} must be positive, got {kappa}"))
            }
        };
        match *self {
            Prior::Fixed { mu, kappa } => {
                check_mu(mu, "mu")?;
                check_kappa(kappa, "kappa")
            }
            Prior::Sliding {
                mu_min,
                mu_max,
                kappa_min,
                kappa_max,
                scale_attempts,
            } => {
                check_mu(mu_min, "mu_min")?;
                check_mu(mu_max, "mu_max")?;
                check_kappa(kappa_min, "kappa_min")?;
                check_kappa(kappa_max, "kappa_max")?;
                check_kappa(scale_attempts, "scale_attempts")
            }
        }
    }
}

/// Read-only view of pre-game recency state.
pub trait StateView {
    fn state_of(&self, player_id: PlayerId) -> PlayerRecencyState;
}

impl StateView for HashMap<PlayerId, PlayerRecencyState> {
    fn state_of(&self, player_id: PlayerId) -> PlayerRecencyState {
        self.get(&player_id).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerExpectation {
    pub player_id: PlayerId,
    pub name: String,
    pub team_id: TeamId,
    pub side: Side,
    pub attempts: u32,
    pub makes: u32,
    pub p_hat: f64,
    pub expected_makes: f64,
    /// Expected minus actual makes; positive means the shooter ran cold.
    pub delta_3m: f64,
}

pub fn expect_player(prior: &Prior, state: PlayerRecencyState, attempts: u32, makes: u32) -> (f64, f64) {
    let p_hat = prior.rate(state);
    (p_hat, expected_makes(attempts as f64, p_hat))
}

/// One expectation per box line, in home-then-away roster order.
pub fn expect_lines(game: &GameRecord, snapshot: &impl StateView, prior: &Prior) -> Vec<PlayerExpectation> {
    let mut out = Vec::new();
    for (side, team) in game.sides() {
        for line in &team.players {
            let state = snapshot.state_of(line.player_id);
            let (p_hat, exp) = expect_player(prior, state, line.fg3a, line.fg3m);
            out.push(PlayerExpectation {
                player_id: line.player_id,
                name: line.name.clone(),
                team_id: team.team_id,
                side,
                attempts: line.fg3a,
                makes: line.fg3m,
                p_hat,
                expected_makes: exp,
                delta_3m: exp - line.fg3m as f64,
            });
        }
    }
    out
}
