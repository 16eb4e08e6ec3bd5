use crate::{HarvestError, Result};
use chrono::NaiveDate;
use serde::Deserialize;

/// An event announcement extracted from a post by the classifier
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub theme: Option<String>,
    /// Calendar date as `YYYY-MM-DD`
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub speaker: Option<String>,
}

impl EventRecord {
    /// Epoch seconds of UTC midnight on `date`, when it parses
    pub fn event_time(&self) -> Option<i64> {
        let date = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;
        Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
    }
}

/// Result of classifying a single post
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    NotMatched,
    Matched(Vec<EventRecord>),
}

impl ClassificationOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOutcome {
    Many(Vec<EventRecord>),
    One(EventRecord),
    Text(String),
}

/// Interprets the raw classifier text for `post_id`
///
/// `None`, JSON `null` and an empty array mean the post is not a match. An
/// object or an array of objects is a match; anything else fails closed.
pub fn parse_outcome(post_id: &str, raw: Option<&str>) -> Result<ClassificationOutcome> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(ClassificationOutcome::NotMatched);
    };

    let parsed: Option<RawOutcome> = serde_json::from_str(raw)
        .map_err(|e| HarvestError::parse(post_id, format!("classifier output: {}", e)))?;

    let events = match parsed {
        None => Vec::new(),
        Some(RawOutcome::Many(events)) => events,
        Some(RawOutcome::One(event)) => vec![event],
        Some(RawOutcome::Text(text)) if text.trim().eq_ignore_ascii_case("null") => Vec::new(),
        Some(RawOutcome::Text(text)) => {
            return Err(HarvestError::parse(
                post_id,
                format!("classifier output is a bare string: {}", text),
            ))
        }
    };

    if events.is_empty() {
        Ok(ClassificationOutcome::NotMatched)
    } else {
        Ok(ClassificationOutcome::Matched(events))
    }
}
