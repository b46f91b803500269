//! Event types shared by expansion, serialization and parsing.
//!
//! An [`EventTemplate`] is the immutable source record (wall-clock times in the configured
//! zone). Every expansion derives fresh [`Occurrence`] values from it; occurrences carry
//! absolute instants and are never mutated.

use chrono::{DateTime, Duration, NaiveDateTime};
use chrono_tz::Tz;
use serde::Serialize;

/// A calendar event definition, one-off or recurring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub color: Option<String>,
    /// Wall-clock start in the configured zone.
    pub start: NaiveDateTime,
    /// Wall-clock end in the configured zone (exclusive midnight for all-day events).
    pub end: NaiveDateTime,
    pub all_day: bool,
    /// Recurrence rule text (`FREQ=WEEKLY;BYDAY=MO;COUNT=3`), if the event repeats.
    pub recurrence: Option<String>,
}

impl EventTemplate {
    /// Wall-clock duration reused for every expanded instance.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// One concrete instance of an event with resolved start/end instants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub all_day: bool,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub color: Option<String>,
}

impl Occurrence {
    /// Elapsed (absolute) duration. Differs from the template's wall-clock duration when
    /// the occurrence spans a daylight-saving transition.
    pub fn elapsed(&self) -> Duration {
        self.end.signed_duration_since(self.start)
    }
}

/// A record dropped during a batch operation, reported instead of aborting the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    /// Position of the record in its input (source record or VEVENT index).
    pub index: usize,
    /// Human-readable handle for the record, usually its title or UID.
    pub subject: String,
    pub reason: String,
}

impl SkippedRecord {
    pub fn new(index: usize, subject: impl Into<String>, reason: impl ToString) -> Self {
        SkippedRecord {
            index,
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }
}
