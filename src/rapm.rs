//! Ridge-regularised adjusted plus-minus over lineup stints.
//!
//! Each stint is one observation: home players `+1`, away players `-1`, the
//! response is the point differential per 100 possessions and the sample
//! weight is the possession estimate. The offensive variant splits a stint
//! into one row per offense. Fits are batch re-derivations from stored
//! stints and run in parallel across windows, penalties and variants.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LuckConfig;
use crate::error::LuckError;
use crate::model::{PlayerId, TeamId};
use crate::onoff::{OnOffRow, Stint};

pub const SECONDS_PER_POSSESSION: f64 = 24.0;
const MIN_POSSESSIONS: f64 = 0.1;

pub fn possessions(seconds: u32) -> f64 {
    (seconds as f64 / SECONDS_PER_POSSESSION).max(MIN_POSSESSIONS)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RidgeFit {
    pub coef: Vec<f64>,
    pub intercept: f64,
}

/// Sparse design row: `(column, value)` pairs.
pub type DesignRow = Vec<(usize, f64)>;

/// Weighted ridge with an unpenalised intercept.
///
/// Minimises `Σ w_i (y_i - b - x_i·β)² + α‖β‖²` by centering on weighted
/// means and solving the normal equations with a Cholesky factorisation.
pub fn ridge(
    rows: &[DesignRow],
    y: &[f64],
    w: &[f64],
    n_features: usize,
    alpha: f64,
) -> Result<RidgeFit, LuckError> {
    if !(alpha > 0.0 && alpha.is_finite()) {
        return Err(LuckError::SingularSystem { alpha });
    }
    let total_w = w.iter().sum::<f64>();
    if rows.is_empty() || total_w <= 0.0 {
        return Ok(RidgeFit {
            coef: vec![0.0; n_features],
            intercept: 0.0,
        });
    }

    let n = n_features;
    let mut x_mean = vec![0.0; n];
    let mut y_mean = 0.0;
    for ((row, &yi), &wi) in rows.iter().zip(y).zip(w) {
        for &(j, v) in row {
            x_mean[j] += wi * v;
        }
        y_mean += wi * yi;
    }
    x_mean.iter_mut().for_each(|m| *m /= total_w);
    y_mean /= total_w;

    // Σ w x xᵀ - W x̄ x̄ᵀ + αI, and Σ w x y - W x̄ ȳ.
    let mut gram = vec![0.0; n * n];
    let mut rhs = vec![0.0; n];
    for ((row, &yi), &wi) in rows.iter().zip(y).zip(w) {
        for &(j, vj) in row {
            rhs[j] += wi * vj * yi;
            for &(k, vk) in row {
                gram[j * n + k] += wi * vj * vk;
            }
        }
    }
    for j in 0..n {
        rhs[j] -= total_w * x_mean[j] * y_mean;
        for k in 0..n {
            gram[j * n + k] -= total_w * x_mean[j] * x_mean[k];
        }
        gram[j * n + j] += alpha;
    }

    let coef = cholesky_solve(&mut gram, n, rhs).ok_or(LuckError::SingularSystem { alpha })?;
    let intercept = y_mean - x_mean.iter().zip(&coef).map(|(m, c)| m * c).sum::<f64>();
    Ok(RidgeFit { coef, intercept })
}

/// Solves `A x = b` for symmetric positive definite `A` (row-major, `n×n`),
/// overwriting `A` with its lower factor. `None` when `A` is not SPD.
fn cholesky_solve(a: &mut [f64], n: usize, mut b: Vec<f64>) -> Option<Vec<f64>> {
    for j in 0..n {
        let mut d = a[j * n + j];
        for k in 0..j {
            d -= a[j * n + k] * a[j * n + k];
        }
        if !(d > 0.0 && d.is_finite()) {
            return None;
        }
        let d = d.sqrt();
        a[j * n + j] = d;
        for i in (j + 1)..n {
            let mut s = a[i * n + j];
            for k in 0..j {
                s -= a[i * n + k] * a[j * n + k];
            }
            a[i * n + j] = s / d;
        }
    }
    // L z = b
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= a[i * n + k] * b[k];
        }
        b[i] = s / a[i * n + i];
    }
    // Lᵀ x = z
    for i in (0..n).rev() {
        let mut s = b[i];
        for k in (i + 1)..n {
            s -= a[k * n + i] * b[k];
        }
        b[i] = s / a[i * n + i];
    }
    Some(b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Net,
    Offense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Adjusted,
    Raw,
}

struct Design {
    rows: Vec<DesignRow>,
    y: Vec<f64>,
    w: Vec<f64>,
}

fn build_design(
    stints: &[&Stint],
    index: &HashMap<PlayerId, usize>,
    variant: Variant,
    response: Response,
) -> Design {
    let mut design = Design {
        rows: Vec::new(),
        y: Vec::new(),
        w: Vec::new(),
    };
    for s in stints {
        let poss = possessions(s.seconds);
        let (home_pts, away_pts) = match response {
            Response::Adjusted => (s.home_pts_adj, s.away_pts_adj),
            Response::Raw => (s.home_pts, s.away_pts),
        };
        let signed = |plus: &[PlayerId], minus: &[PlayerId]| -> DesignRow {
            plus.iter()
                .filter_map(|p| index.get(p).map(|&j| (j, 1.0)))
                .chain(minus.iter().filter_map(|p| index.get(p).map(|&j| (j, -1.0))))
                .collect()
        };
        match variant {
            Variant::Net => {
                design.rows.push(signed(&s.home_players, &s.away_players));
                design.y.push((home_pts - away_pts) / poss * 100.0);
                design.w.push(poss);
            }
            Variant::Offense => {
                design.rows.push(signed(&s.home_players, &s.away_players));
                design.y.push(home_pts / poss * 100.0);
                design.w.push(poss);
                design.rows.push(signed(&s.away_players, &s.home_players));
                design.y.push(away_pts / poss * 100.0);
                design.w.push(poss);
            }
        }
    }
    design
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    pub team_id: TeamId,
}

/// Name and team from each player's latest on/off row.
pub fn player_directory(rows: &[OnOffRow]) -> HashMap<PlayerId, PlayerInfo> {
    let mut latest: HashMap<PlayerId, &OnOffRow> = HashMap::new();
    for r in rows {
        let newer = latest
            .get(&r.player_id)
            .is_none_or(|cur| (r.date, r.game_id.as_str()) >= (cur.date, cur.game_id.as_str()));
        if newer {
            latest.insert(r.player_id, r);
        }
    }
    latest
        .into_iter()
        .map(|(id, r)| {
            (
                id,
                PlayerInfo {
                    name: r.player_name.clone(),
                    team_id: r.team_id,
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactRating {
    pub window_label: String,
    pub alpha: f64,
    pub player_id: PlayerId,
    pub player_name: String,
    pub team_id: TeamId,
    pub minutes: f64,
    pub rapm: f64,
    pub orapm: f64,
    pub drapm: f64,
    pub rapm_raw: f64,
    pub orapm_raw: f64,
    pub drapm_raw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RapmOptions {
    pub alpha: f64,
    pub min_seconds: u32,
    pub min_minutes: f64,
}

/// All four variants for one window and penalty.
pub fn fit_window(
    label: &str,
    stints: &[&Stint],
    directory: &HashMap<PlayerId, PlayerInfo>,
    opts: RapmOptions,
) -> Result<Vec<ImpactRating>, LuckError> {
    let kept = stints
        .iter()
        .copied()
        .filter(|s| s.seconds >= opts.min_seconds)
        .collect::<Vec<_>>();

    let mut minutes: BTreeMap<PlayerId, f64> = BTreeMap::new();
    for s in &kept {
        for pid in s.home_players.iter().chain(&s.away_players) {
            *minutes.entry(*pid).or_default() += s.seconds as f64 / 60.0;
        }
    }
    let players = minutes.keys().copied().collect::<BTreeSet<_>>();
    let index: HashMap<PlayerId, usize> = players.iter().enumerate().map(|(i, p)| (*p, i)).collect();
    let n = players.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let fit = |variant, response| {
        let d = build_design(&kept, &index, variant, response);
        ridge(&d.rows, &d.y, &d.w, n, opts.alpha)
    };
    let ((net_adj, net_raw), (off_adj, off_raw)) = rayon::join(
        || rayon::join(|| fit(Variant::Net, Response::Adjusted), || fit(Variant::Net, Response::Raw)),
        || {
            rayon::join(
                || fit(Variant::Offense, Response::Adjusted),
                || fit(Variant::Offense, Response::Raw),
            )
        },
    );
    let (net_adj, net_raw, off_adj, off_raw) = (net_adj?, net_raw?, off_adj?, off_raw?);
    debug!(
        window = label,
        alpha = opts.alpha,
        stints = kept.len(),
        players = n,
        intercept = net_adj.intercept,
        "ridge fit"
    );

    let out = players
        .iter()
        .enumerate()
        .filter(|(_, pid)| minutes[*pid] >= opts.min_minutes)
        .map(|(j, pid)| {
            let info = directory.get(pid);
            ImpactRating {
                window_label: label.to_string(),
                alpha: opts.alpha,
                player_id: *pid,
                player_name: info.map_or_else(|| format!("Player {pid}"), |i| i.name.clone()),
                team_id: info.map_or(0, |i| i.team_id),
                minutes: minutes[pid],
                rapm: net_adj.coef[j],
                orapm: off_adj.coef[j],
                drapm: net_adj.coef[j] - off_adj.coef[j],
                rapm_raw: net_raw.coef[j],
                orapm_raw: off_raw.coef[j],
                drapm_raw: net_raw.coef[j] - off_raw.coef[j],
            }
        })
        .collect();
    Ok(out)
}

/// Per-season windows plus one rolling window over the latest `rolling`
/// seasons, labelled `Last{rolling}`.
pub fn rating_windows<'a>(
    stints: impl IntoIterator<Item = &'a Stint>,
    rolling: usize,
) -> Vec<(String, Vec<&'a Stint>)> {
    let mut by_season: BTreeMap<&str, Vec<&Stint>> = BTreeMap::new();
    for s in stints {
        by_season.entry(s.season.as_str()).or_default().push(s);
    }
    let seasons = by_season.keys().copied().collect::<Vec<_>>();
    let mut out = by_season
        .iter()
        .map(|(season, v)| (season.to_string(), v.clone()))
        .collect::<Vec<_>>();
    if rolling > 0 && !seasons.is_empty() {
        let recent = &seasons[seasons.len().saturating_sub(rolling)..];
        let stints = recent
            .iter()
            .flat_map(|s| by_season[s].iter().copied())
            .collect();
        out.push((format!("Last{rolling}"), stints));
    }
    out
}

/// Every window at the configured penalty and any extra penalties, over the
/// stints `cfg.rapm_window()` admits.
pub fn fit_ratings(
    stints: &[Stint],
    directory: &HashMap<PlayerId, PlayerInfo>,
    cfg: &LuckConfig,
) -> Result<Vec<ImpactRating>, LuckError> {
    let mut alphas = vec![cfg.ridge_penalty];
    for a in &cfg.rapm_alphas {
        if !alphas.contains(a) {
            alphas.push(*a);
        }
    }
    let scope = cfg.rapm_window();
    let admitted = stints.iter().filter(|s| scope.admits(&s.game_id, s.date));
    let windows = rating_windows(admitted, cfg.rapm_rolling_seasons);
    let jobs = windows
        .iter()
        .flat_map(|(label, set)| alphas.iter().map(move |a| (label, set, *a)))
        .collect::<Vec<_>>();
    info!(windows = windows.len(), fits = jobs.len(), "fitting impact ratings");

    let fitted = jobs
        .par_iter()
        .map(|(label, set, alpha)| {
            fit_window(
                label,
                set,
                directory,
                RapmOptions {
                    alpha: *alpha,
                    min_seconds: cfg.rapm_min_seconds,
                    min_minutes: cfg.rapm_min_minutes,
                },
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = fitted.into_iter().flatten().collect::<Vec<_>>();
    out.sort_by(|a, b| {
        a.window_label
            .cmp(&b.window_label)
            .then(a.alpha.total_cmp(&b.alpha))
            .then(b.rapm.total_cmp(&a.rapm))
            .then(a.player_id.cmp(&b.player_id))
    });
    Ok(out)
}
