use serde::Serialize;

use crate::codes::{Game, NewCodes};

pub const NOTIFICATION_TITLE: &str = "🎮 New Redemption Codes Available!";

/// Static parts of every notification
#[derive(Debug, Clone)]
pub struct MessageSettings {
    /// Page the notification opens
    pub url: String,
    pub icon: Option<String>,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            url: "https://codeforge.app".to_string(),
            icon: Some("/images/icon-192x192.png".to_string()),
        }
    }
}

/// Structured payload delivered alongside the visible text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    /// Affected game keys, comma-joined
    pub games: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing)]
    pub data: NotificationData,
}

/// Build the single message a subscriber receives for `games`.
///
/// `games` must be in canonical order for the text to be stable.
pub fn compose(new_codes: &NewCodes, games: &[Game], settings: &MessageSettings) -> NotificationMessage {
    let count: usize = games.iter().map(|game| new_codes.count(*game)).sum();
    let names = games
        .iter()
        .map(|game| game.display_name())
        .collect::<Vec<_>>()
        .join(", ");

    NotificationMessage {
        title: NOTIFICATION_TITLE.to_string(),
        body: format!(
            "{} new code{} for {}",
            count,
            if count == 1 { "" } else { "s" },
            names
        ),
        icon: settings.icon.clone(),
        data: NotificationData {
            games: games.iter().map(|game| game.key()).collect::<Vec<_>>().join(","),
            url: settings.url.clone(),
        },
    }
}
