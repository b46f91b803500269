//! Content-source records.
//!
//! Event definitions arrive as TOML (`[[events]]` tables), JSON or YAML (a top-level list)
//! with free-form date strings. [`RawEvent::to_template`] turns one record into an
//! [`EventTemplate`] in the configured zone.

use std::path::Path;

use chrono::{Days, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{EventCalError, EventCalResult};
use crate::event::EventTemplate;
use crate::timezone::{Normalizer, parse_date};

/// Serialization format of a content source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Toml,
    Json,
    Yaml,
}

impl SourceFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "toml" => Some(SourceFormat::Toml),
            "json" => Some(SourceFormat::Json),
            "yaml" | "yml" => Some(SourceFormat::Yaml),
            _ => None,
        }
    }
}

/// One event record as written by content authors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// `YYYY-MM-DD HH:MM`, ISO 8601 / RFC 3339, or a bare date for all-day events.
    pub start: String,

    /// Same forms as `start`. A bare date is the last day of an all-day event (inclusive).
    pub end: String,

    /// Recurrence rule, e.g. `FREQ=WEEKLY;BYDAY=MO;COUNT=10`.
    #[serde(default, alias = "rrule", skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
}

#[derive(Deserialize)]
struct TomlDocument {
    events: Vec<RawEvent>,
}

/// Read all event records from a content-source document.
///
/// A document that is not a sequence of records (or whose records lack required fields) is a
/// [`EventCalError::Config`] error.
pub fn load_records(contents: &str, format: SourceFormat) -> EventCalResult<Vec<RawEvent>> {
    let records = match format {
        SourceFormat::Toml => toml::from_str::<TomlDocument>(contents)
            .map(|doc| doc.events)
            .map_err(|e| EventCalError::Config(format!("Invalid event records: {e}")))?,
        SourceFormat::Json => serde_json::from_str::<Vec<RawEvent>>(contents)
            .map_err(|e| EventCalError::Config(format!("Invalid event records: {e}")))?,
        SourceFormat::Yaml => serde_yaml::from_str::<Vec<RawEvent>>(contents)
            .map_err(|e| EventCalError::Config(format!("Invalid event records: {e}")))?,
    };

    tracing::debug!(records = records.len(), ?format, "loaded event records");
    Ok(records)
}

/// Read event records from a file, picking the format from its extension.
pub fn load_records_from_path(path: &Path) -> EventCalResult<Vec<RawEvent>> {
    let format = SourceFormat::from_path(path).ok_or_else(|| {
        EventCalError::Config(format!("{}: expected a .toml, .json or .yaml file", path.display()))
    })?;
    let contents = std::fs::read_to_string(path)?;
    load_records(&contents, format)
}

impl RawEvent {
    /// Convert the record into a template in the normalizer's zone.
    ///
    /// When both start and end are bare dates the template is all-day and its end becomes
    /// the exclusive midnight after the inclusive end date.
    pub fn to_template(&self, normalizer: &Normalizer) -> EventCalResult<EventTemplate> {
        let start = normalizer.parse_wall_clock(&self.start)?;
        let end = normalizer.parse_wall_clock(&self.end)?;

        let all_day = parse_date(&self.start).is_some() && parse_date(&self.end).is_some();
        let end = if all_day {
            end.date()
                .checked_add_days(Days::new(1))
                .ok_or_else(|| EventCalError::InvalidDateTime(format!("{} is out of range", self.end)))?
                .and_time(NaiveTime::MIN)
        } else {
            end
        };

        if end < start {
            return Err(EventCalError::InvalidDateTime(format!(
                "'{}' ends before it starts ({} < {})",
                self.title, self.end, self.start
            )));
        }

        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

        Ok(EventTemplate {
            title: self.title.clone(),
            description: non_empty(&self.description),
            location: non_empty(&self.location),
            color: non_empty(&self.color),
            start,
            end,
            all_day,
            recurrence: non_empty(&self.recurrence),
        })
    }
}
