use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LuckError;
use crate::expectation::Prior;
use crate::history::SeasonWindow;
use crate::model::SeasonType;
use crate::recency::DEFAULT_HALF_LIFE_3PA;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuckConfig {
    /// Attempts until a past attempt carries half weight.
    pub half_life_3pa: f64,
    pub prior: Prior,
    /// League offensive-rebound rate on missed threes.
    pub orb_rate: f64,
    /// Points per possession used to value a rebound chance.
    pub ppp: f64,
    pub ridge_penalty: f64,
    /// Extra penalties fitted alongside `ridge_penalty`.
    pub rapm_alphas: Vec<f64>,
    pub rapm_min_seconds: u32,
    pub rapm_min_minutes: f64,
    pub rapm_rolling_seasons: usize,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub season_start: Option<NaiveDate>,
    pub season_end: Option<NaiveDate>,
    /// Stint dates admitted to the impact-rating fit.
    pub rapm_start_date: Option<NaiveDate>,
    pub rapm_end_date: Option<NaiveDate>,
    /// History rebuilds and rating fits read playoff games instead of the
    /// regular season.
    pub playoffs: bool,
    pub db_path: Option<PathBuf>,
}

impl Default for LuckConfig {
    fn default() -> Self {
        Self {
            half_life_3pa: DEFAULT_HALF_LIFE_3PA,
            prior: Prior::default(),
            orb_rate: 0.26,
            ppp: 1.14,
            ridge_penalty: 2500.0,
            rapm_alphas: Vec::new(),
            rapm_min_seconds: 10,
            rapm_min_minutes: 200.0,
            rapm_rolling_seasons: 3,
            start_date: None,
            end_date: None,
            season_start: None,
            season_end: None,
            rapm_start_date: None,
            rapm_end_date: None,
            playoffs: false,
            db_path: None,
        }
    }
}

impl LuckConfig {
    /// Defaults, then the optional JSON file, then `.env` / `LUCK_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                serde_json::from_str::<LuckConfig>(&raw)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => LuckConfig::default(),
        };
        let _ = dotenvy::dotenv();
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Some(v) = env_f64("LUCK_HALF_LIFE_3PA") {
            self.half_life_3pa = v;
        }
        if let Some(v) = env_f64("LUCK_ORB_RATE") {
            self.orb_rate = v;
        }
        if let Some(v) = env_f64("LUCK_PPP") {
            self.ppp = v;
        }
        if let Some(v) = env_f64("LUCK_RIDGE_PENALTY") {
            self.ridge_penalty = v;
        }
        if let Some(v) = env_f64("LUCK_RAPM_MIN_MINUTES") {
            self.rapm_min_minutes = v;
        }

        let mu = env_f64("LUCK_MU");
        let kappa = env_f64("LUCK_KAPPA");
        if mu.is_some() || kappa.is_some() {
            let (cur_mu, cur_kappa) = match self.prior {
                Prior::Fixed { mu, kappa } => (mu, kappa),
                Prior::Sliding { .. } => self.prior.resolve(0.0),
            };
            self.prior = Prior::Fixed {
                mu: mu.unwrap_or(cur_mu),
                kappa: kappa.unwrap_or(cur_kappa),
            };
        }

        if let Ok(raw) = env::var("LUCK_DB_PATH")
            && !raw.trim().is_empty()
        {
            self.db_path = Some(PathBuf::from(raw.trim()));
        }
    }

    pub fn validate(&self) -> Result<(), LuckError> {
        let bad = |msg: String| Err(LuckError::InvalidConfig(msg));
        if !(self.half_life_3pa > 0.0 && self.half_life_3pa.is_finite()) {
            return bad(format!("half_life_3pa must be positive, got {}", self.half_life_3pa));
        }
        self.prior.validate().map_err(LuckError::InvalidConfig)?;
        if !(0.0..=1.0).contains(&self.orb_rate) {
            return bad(format!("orb_rate must be within [0, 1], got {}", self.orb_rate));
        }
        if !(self.ppp >= 0.0 && self.ppp.is_finite()) {
            return bad(format!("ppp must be non-negative, got {}", self.ppp));
        }
        if !(self.ridge_penalty > 0.0 && self.ridge_penalty.is_finite()) {
            return bad(format!("ridge_penalty must be positive, got {}", self.ridge_penalty));
        }
        if let Some(a) = self.rapm_alphas.iter().find(|a| !(**a > 0.0 && a.is_finite())) {
            return bad(format!("rapm_alphas must be positive, got {a}"));
        }
        if self.rapm_rolling_seasons == 0 {
            return bad("rapm_rolling_seasons must be at least 1".to_string());
        }
        if let (Some(s), Some(e)) = (self.start_date, self.end_date)
            && s > e
        {
            return bad(format!("start_date {s} after end_date {e}"));
        }
        if let (Some(s), Some(e)) = (self.season_start, self.season_end)
            && s > e
        {
            return bad(format!("season_start {s} after season_end {e}"));
        }
        if let (Some(s), Some(e)) = (self.rapm_start_date, self.rapm_end_date)
            && s > e
        {
            return bad(format!("rapm_start_date {s} after rapm_end_date {e}"));
        }
        Ok(())
    }

    fn season_type(&self) -> SeasonType {
        if self.playoffs {
            SeasonType::Playoffs
        } else {
            SeasonType::Regular
        }
    }

    pub fn history_window(&self) -> SeasonWindow {
        SeasonWindow {
            start: self.season_start,
            end: self.season_end,
            season_type: self.season_type(),
        }
    }

    pub fn rapm_window(&self) -> SeasonWindow {
        SeasonWindow {
            start: self.rapm_start_date,
            end: self.rapm_end_date,
            season_type: self.season_type(),
        }
    }

    /// Points lost per expected make that turned into a miss, net of the
    /// rebound chance the miss creates.
    pub fn make_value_net_of_rebound(&self) -> f64 {
        3.0 - self.orb_rate * self.ppp
    }
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
