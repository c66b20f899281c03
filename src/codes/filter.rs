use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{CodeRecord, CodeType};

/// Working/expired filter for code listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    Working,
    Expired,
}

/// Listing filter applied to one game's codes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeFilter {
    #[serde(default, rename = "type")]
    pub kind: Option<CodeType>,

    #[serde(default)]
    pub status: Option<StatusFilter>,

    /// Case-insensitive substring match on code, title, description and rewards
    #[serde(default)]
    pub search: Option<String>,
}

impl CodeFilter {
    pub fn matches(&self, record: &CodeRecord, now: DateTime<Utc>) -> bool {
        if let Some(kind) = self.kind {
            if record.code_type() != kind {
                return false;
            }
        }

        if let Some(status) = self.status {
            let working = record.is_working(now);
            if (status == StatusFilter::Working) != working {
                return false;
            }
        }

        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                [
                    Some(record.code.as_str()),
                    record.title.as_deref(),
                    record.description.as_deref(),
                    record.rewards.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }

    pub fn apply<'a>(&self, records: &'a [CodeRecord], now: DateTime<Utc>) -> Vec<&'a CodeRecord> {
        records.iter().filter(|r| self.matches(r, now)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn records() -> Vec<CodeRecord> {
        vec![
            CodeRecord::new("GENSHINGIFT").with_status("working"),
            CodeRecord::new("EVENT50")
                .with_title("Limited event code")
                .with_status("expired"),
            CodeRecord::new("LIVE2025").with_title("Livestream primogems"),
        ]
    }

    #[test]
    fn test_default_filter_matches_everything() {
        let now = Utc.with_ymd_and_hms(2025, 7, 10, 0, 0, 0).unwrap();
        let records = records();
        assert_eq!(CodeFilter::default().apply(&records, now).len(), 3);
    }

    #[test]
    fn test_combined_filters() {
        let now = Utc.with_ymd_and_hms(2025, 7, 10, 0, 0, 0).unwrap();
        let records = records();

        let expired = CodeFilter {
            status: Some(StatusFilter::Expired),
            ..Default::default()
        };
        let codes: Vec<_> = expired.apply(&records, now).iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["EVENT50", "LIVE2025"]);

        let search = CodeFilter {
            search: Some("  PRIMO ".to_string()),
            ..Default::default()
        };
        assert_eq!(search.apply(&records, now)[0].code, "LIVE2025");

        let permanent = CodeFilter {
            kind: Some(CodeType::Permanent),
            status: Some(StatusFilter::Working),
            search: None,
        };
        assert_eq!(permanent.apply(&records, now).len(), 1);
    }
}
