use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{PlayerId, SeasonType, TeamId};
use crate::onoff::OnOffRow;

/// Inclusive date bounds for a rebuild or fit; `None` leaves a side open.
/// Regular season and playoffs are never mixed: a window admits one of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub season_type: SeasonType,
}

impl SeasonWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }

    pub fn admits(&self, game_id: &str, date: NaiveDate) -> bool {
        self.contains(date) && SeasonType::of_game_id(game_id) == self.season_type
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerOnOffHistory {
    pub player_id: PlayerId,
    pub season: String,
    pub player_name: String,
    pub latest_team_id: TeamId,
    pub games: u32,
    pub minutes_total: f64,
    pub minutes_avg: f64,
    pub on_diff_total: f64,
    pub off_diff_total: f64,
    pub on_off_diff_total: f64,
    pub on_diff_avg: f64,
    pub off_diff_avg: f64,
    pub on_off_diff_avg: f64,
    pub on_diff_adj_total: f64,
    pub off_diff_adj_total: f64,
    pub on_off_diff_adj_total: f64,
    pub on_diff_adj_avg: f64,
    pub off_diff_adj_avg: f64,
    pub on_off_diff_adj_avg: f64,
    pub first_game_date: NaiveDate,
    pub last_game_date: NaiveDate,
}

#[derive(Default)]
struct Sums {
    games: u32,
    minutes: f64,
    on: f64,
    off: f64,
    on_off: f64,
    on_adj: f64,
    off_adj: f64,
    on_off_adj: f64,
    first: Option<NaiveDate>,
    // (date, game_id, team, name) of the latest row seen.
    last: Option<(NaiveDate, String, TeamId, String)>,
}

/// Season aggregates per `(player_id, season)`, always rebuilt from the full
/// row set inside `window`; there is no incremental path.
///
/// A player traded mid-season gets one row per season, attributed to the team
/// of their latest game in the window.
pub fn build_history(rows: &[OnOffRow], window: SeasonWindow) -> Vec<PlayerOnOffHistory> {
    let mut groups: BTreeMap<(PlayerId, String), Sums> = BTreeMap::new();
    for r in rows.iter().filter(|r| window.admits(&r.game_id, r.date)) {
        let s = groups.entry((r.player_id, r.season.clone())).or_default();
        s.games += 1;
        s.minutes += r.minutes;
        s.on += r.on_diff;
        s.off += r.off_diff;
        s.on_off += r.on_off_diff;
        s.on_adj += r.on_diff_adj;
        s.off_adj += r.off_diff_adj;
        s.on_off_adj += r.on_off_diff_adj;
        s.first = Some(s.first.map_or(r.date, |d| d.min(r.date)));
        let newer = s
            .last
            .as_ref()
            .is_none_or(|(d, g, _, _)| (r.date, r.game_id.as_str()) >= (*d, g.as_str()));
        if newer {
            s.last = Some((r.date, r.game_id.clone(), r.team_id, r.player_name.clone()));
        }
    }

    let mut out = groups
        .into_iter()
        .filter_map(|((player_id, season), s)| {
            let first = s.first?;
            let (last, _, team, name) = s.last?;
            let n = s.games as f64;
            Some(PlayerOnOffHistory {
                player_id,
                season,
                player_name: name,
                latest_team_id: team,
                games: s.games,
                minutes_total: s.minutes,
                minutes_avg: s.minutes / n,
                on_diff_total: s.on,
                off_diff_total: s.off,
                on_off_diff_total: s.on_off,
                on_diff_avg: s.on / n,
                off_diff_avg: s.off / n,
                on_off_diff_avg: s.on_off / n,
                on_diff_adj_total: s.on_adj,
                off_diff_adj_total: s.off_adj,
                on_off_diff_adj_total: s.on_off_adj,
                on_diff_adj_avg: s.on_adj / n,
                off_diff_adj_avg: s.off_adj / n,
                on_off_diff_adj_avg: s.on_off_adj / n,
                first_game_date: first,
                last_game_date: last,
            })
        })
        .collect::<Vec<_>>();

    out.sort_by(|a, b| {
        b.on_off_diff_adj_avg
            .total_cmp(&a.on_off_diff_adj_avg)
            .then(b.minutes_total.total_cmp(&a.minutes_total))
            .then(a.player_id.cmp(&b.player_id))
            .then(a.season.cmp(&b.season))
    });
    out
}

/// One line per player per game for the daily box-score view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBoxLine {
    pub date: NaiveDate,
    pub game_id: String,
    pub team_id: TeamId,
    pub player_id: PlayerId,
    pub player_name: String,
    pub minutes: f64,
    pub plus_minus_actual: f64,
    pub plus_minus_adjusted: f64,
    pub plus_minus_delta: f64,
    pub on_off_actual: f64,
    pub on_off_adjusted: f64,
    pub on_off_delta: f64,
}

pub fn daily_boxscore(rows: &[OnOffRow]) -> Vec<DailyBoxLine> {
    let mut out = rows
        .iter()
        .map(|r| DailyBoxLine {
            date: r.date,
            game_id: r.game_id.clone(),
            team_id: r.team_id,
            player_id: r.player_id,
            player_name: r.player_name.clone(),
            minutes: r.minutes,
            plus_minus_actual: r.on_diff,
            plus_minus_adjusted: r.on_diff_adj,
            plus_minus_delta: r.on_diff_adj - r.on_diff,
            on_off_actual: r.on_off_diff,
            on_off_adjusted: r.on_off_diff_adj,
            on_off_delta: r.on_off_diff_adj - r.on_off_diff,
        })
        .collect::<Vec<_>>();
    out.sort_by(|a, b| {
        (a.date, &a.game_id, a.team_id, &a.player_name)
            .cmp(&(b.date, &b.game_id, b.team_id, &b.player_name))
    });
    out
}
