use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Gift codes that never expire
const PERMANENT_CODES: [&str; 3] = ["genshingift", "starrailgift", "zenlessgift"];

/// How long a code counts as "recent" after it was added
const RECENT_WINDOW_DAYS: i64 = 3;

/// One redemption code for one game, as published by the codes API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRecord {
    /// Redeemable code, the identity key within a game
    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Rewards as free text (the API sends either a string or a list)
    #[serde(
        default,
        deserialize_with = "deserialize_rewards",
        skip_serializing_if = "Option::is_none"
    )]
    pub rewards: Option<String>,

    /// When the code was added upstream
    #[serde(default, alias = "added_at", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Upstream status, e.g. "working" or "expired"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Upstream classification, e.g. "event" or "permanent"
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Classification of a code's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeType {
    Event,
    Permanent,
    Temporary,
}

impl CodeType {
    pub fn parse(s: &str) -> Option<CodeType> {
        match s.trim().to_lowercase().as_str() {
            "event" => Some(CodeType::Event),
            "permanent" => Some(CodeType::Permanent),
            "temporary" => Some(CodeType::Temporary),
            _ => None,
        }
    }
}

impl CodeRecord {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            title: None,
            description: None,
            rewards: None,
            date: None,
            status: None,
            kind: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Parse `date` in any of the formats the API has been seen to use
    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.date.as_deref()?.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
            return Some(dt.and_utc());
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Whether the code was added within the last few days
    pub fn is_recent(&self, now: DateTime<Utc>) -> bool {
        self.added_at()
            .map(|added| added > now - Duration::days(RECENT_WINDOW_DAYS))
            .unwrap_or(false)
    }

    /// Explicit status wins; without one, only recent codes are assumed to work
    pub fn is_working(&self, now: DateTime<Utc>) -> bool {
        match self.status.as_deref() {
            Some(status) => {
                let status = status.to_lowercase();
                status == "working" || status == "active"
            }
            None => self.is_recent(now),
        }
    }

    pub fn code_type(&self) -> CodeType {
        if let Some(kind) = self.kind.as_deref().and_then(CodeType::parse) {
            return kind;
        }

        let code = self.code.to_lowercase();
        if PERMANENT_CODES.contains(&code.as_str()) {
            return CodeType::Permanent;
        }

        let text = format!(
            "{} {}",
            self.title.as_deref().unwrap_or_default(),
            self.description.as_deref().unwrap_or_default()
        )
        .to_lowercase();

        if text.contains("event") || text.contains("limited") {
            CodeType::Event
        } else if text.contains("permanent") || text.contains("general") {
            CodeType::Permanent
        } else {
            CodeType::Temporary
        }
    }
}

fn deserialize_rewards<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Rewards {
        Text(String),
        List(Vec<String>),
    }

    Ok(Option::<Rewards>::deserialize(deserializer)?.map(|r| match r {
        Rewards::Text(text) => text,
        Rewards::List(items) => items.join(", "),
    }))
}
