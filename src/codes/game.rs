use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A game the codes API tracks.
///
/// Declaration order is the canonical order used for listings and
/// notification text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Genshin,
    Hsr,
    Zzz,
}

impl Game {
    pub const ALL: [Game; 3] = [Game::Genshin, Game::Hsr, Game::Zzz];

    /// Key used by the codes API and in notification payloads
    pub fn key(&self) -> &'static str {
        match self {
            Game::Genshin => "genshin",
            Game::Hsr => "hsr",
            Game::Zzz => "zzz",
        }
    }

    /// Human-readable title
    pub fn display_name(&self) -> &'static str {
        match self {
            Game::Genshin => "Genshin Impact",
            Game::Hsr => "Honkai: Star Rail",
            Game::Zzz => "Zenless Zone Zero",
        }
    }

    pub fn from_key(key: &str) -> Option<Game> {
        Game::ALL.into_iter().find(|g| g.key() == key)
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Game {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Game::from_key(&s.trim().to_lowercase()).ok_or_else(|| format!("unknown game '{}'", s))
    }
}
