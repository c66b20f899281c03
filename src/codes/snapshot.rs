use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CodeRecord, Game};

/// One point-in-time read of every game's code list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the snapshot was fetched
    pub fetched_at: DateTime<Utc>,

    /// Codes per game, in the order the API listed them
    pub games: BTreeMap<Game, Vec<CodeRecord>>,
}

impl Snapshot {
    pub fn new(games: BTreeMap<Game, Vec<CodeRecord>>, fetched_at: DateTime<Utc>) -> Self {
        Self { fetched_at, games }
    }

    pub fn codes(&self, game: Game) -> Option<&[CodeRecord]> {
        self.games.get(&game).map(|codes| codes.as_slice())
    }

    pub fn contains_game(&self, game: Game) -> bool {
        self.games.contains_key(&game)
    }

    /// Number of codes per game
    pub fn counts(&self) -> BTreeMap<Game, usize> {
        self.games
            .iter()
            .map(|(game, codes)| (*game, codes.len()))
            .collect()
    }

    pub fn total_codes(&self) -> usize {
        self.games.values().map(|codes| codes.len()).sum()
    }
}

/// Codes that appeared between two snapshots, keyed by game.
///
/// Only games with at least one new code are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NewCodes {
    games: BTreeMap<Game, Vec<CodeRecord>>,
}

impl NewCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the new codes for a game; empty lists are dropped
    pub fn insert(&mut self, game: Game, codes: Vec<CodeRecord>) {
        if codes.is_empty() {
            self.games.remove(&game);
        } else {
            self.games.insert(game, codes);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Games with new codes, in canonical order
    pub fn games(&self) -> impl Iterator<Item = Game> + '_ {
        self.games.keys().copied()
    }

    pub fn get(&self, game: Game) -> Option<&[CodeRecord]> {
        self.games.get(&game).map(|codes| codes.as_slice())
    }

    pub fn count(&self, game: Game) -> usize {
        self.games.get(&game).map(|codes| codes.len()).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.games.values().map(|codes| codes.len()).sum()
    }

    pub fn counts(&self) -> BTreeMap<Game, usize> {
        self.games
            .iter()
            .map(|(game, codes)| (*game, codes.len()))
            .collect()
    }
}
