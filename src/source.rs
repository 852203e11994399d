use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use tracing::debug;

use crate::error::LuckError;
use crate::model::GameRecord;

/// Supplier of fully parsed games for a date.
pub trait BoxScoreSource {
    /// Game ids scheduled on `date`; an empty list means no games.
    fn game_ids_for_date(&mut self, date: NaiveDate) -> Result<Vec<String>, LuckError>;

    fn load_game(&mut self, date: NaiveDate, game_id: &str) -> Result<GameRecord, LuckError>;
}

/// Reads `<root>/<YYYY-MM-DD>/<game_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(date.format("%Y-%m-%d").to_string())
    }
}

impl BoxScoreSource for JsonDirSource {
    fn game_ids_for_date(&mut self, date: NaiveDate) -> Result<Vec<String>, LuckError> {
        let dir = self.day_dir(date);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir)
            .map_err(|e| LuckError::source(date, format!("read {}: {e}", dir.display())))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| LuckError::source(date, format!("read {}: {e}", dir.display())))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        debug!(%date, games = ids.len(), "listed source games");
        Ok(ids)
    }

    fn load_game(&mut self, date: NaiveDate, game_id: &str) -> Result<GameRecord, LuckError> {
        let path = self.day_dir(date).join(format!("{game_id}.json"));
        let raw = fs::read_to_string(&path)
            .map_err(|e| LuckError::source(date, format!("read {}: {e}", path.display())))?;
        let game: GameRecord = serde_json::from_str(&raw)
            .map_err(|e| LuckError::source(date, format!("parse {}: {e}", path.display())))?;
        if game.game_id != game_id || game.date != date {
            return Err(LuckError::source(
                date,
                format!(
                    "{} holds game {} on {}",
                    path.display(),
                    game.game_id,
                    game.date
                ),
            ));
        }
        Ok(game)
    }
}

/// In-memory source keyed by date; games are served as inserted.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    days: BTreeMap<NaiveDate, BTreeMap<String, GameRecord>>,
    broken: BTreeMap<NaiveDate, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_games(games: impl IntoIterator<Item = GameRecord>) -> Self {
        let mut out = Self::new();
        for g in games {
            out.insert(g);
        }
        out
    }

    pub fn insert(&mut self, game: GameRecord) {
        self.days
            .entry(game.date)
            .or_default()
            .insert(game.game_id.clone(), game);
    }

    /// Makes every request for `date` fail, as a missing or corrupt feed would.
    pub fn break_date(&mut self, date: NaiveDate, message: impl Into<String>) {
        self.broken.insert(date, message.into());
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.days.values().map(|d| d.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BoxScoreSource for MemorySource {
    fn game_ids_for_date(&mut self, date: NaiveDate) -> Result<Vec<String>, LuckError> {
        if let Some(msg) = self.broken.get(&date) {
            return Err(LuckError::source(date, msg.clone()));
        }
        Ok(self
            .days
            .get(&date)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn load_game(&mut self, date: NaiveDate, game_id: &str) -> Result<GameRecord, LuckError> {
        if let Some(msg) = self.broken.get(&date) {
            return Err(LuckError::source(date, msg.clone()));
        }
        self.days
            .get(&date)
            .and_then(|d| d.get(game_id))
            .cloned()
            .ok_or_else(|| LuckError::source(date, format!("game {game_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TeamBox;

    fn game(id: &str, date: NaiveDate) -> GameRecord {
        let team = |team_id| TeamBox {
            team_id,
            abbr: format!("T{team_id}"),
            points: 0,
            fg3a: 0,
            fg3m: 0,
            players: Vec::new(),
        };
        GameRecord {
            game_id: id.into(),
            date,
            home: team(1),
            away: team(2),
            duration_secs: None,
            overtime_periods: None,
            events: Vec::new(),
        }
    }

    #[test]
    fn json_dir_lists_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 11, 4).unwrap();
        let day = dir.path().join("2025-11-04");
        fs::create_dir_all(&day).unwrap();
        for id in ["0022500002", "0022500001"] {
            let raw = serde_json::to_string(&game(id, date)).unwrap();
            fs::write(day.join(format!("{id}.json")), raw).unwrap();
        }
        fs::write(day.join("notes.txt"), "ignored").unwrap();

        let mut src = JsonDirSource::new(dir.path());
        let ids = src.game_ids_for_date(date).unwrap();
        assert_eq!(ids, vec!["0022500001", "0022500002"]);
        assert_eq!(src.load_game(date, "0022500002").unwrap().game_id, "0022500002");

        let empty = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
        assert!(src.game_ids_for_date(empty).unwrap().is_empty());
    }

    #[test]
    fn json_dir_reports_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 11, 4).unwrap();
        let day = dir.path().join("2025-11-04");
        fs::create_dir_all(&day).unwrap();
        fs::write(day.join("g.json"), "{not json").unwrap();

        let mut src = JsonDirSource::new(dir.path());
        assert!(matches!(
            src.load_game(date, "g"),
            Err(LuckError::Source { .. })
        ));
    }

    #[test]
    fn broken_date_fails_every_request() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 4).unwrap();
        let mut src = MemorySource::from_games([game("a", date)]);
        src.break_date(date, "feed down");
        assert!(src.game_ids_for_date(date).is_err());
        assert!(src.load_game(date, "a").is_err());
    }
}
