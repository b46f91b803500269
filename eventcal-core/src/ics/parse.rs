//! ICS document parsing using the icalendar crate's parser.

use std::collections::HashMap;

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use icalendar::parser::{Component, Property, read_components, unfold};
use icalendar::{CalendarDateTime, DatePerhapsTime};

use super::generate::EMPTY_SUMMARY;
use super::vtimezone::ZoneDefinition;
use crate::config::CalendarConfig;
use crate::error::{EventCalError, EventCalResult};
use crate::event::{Occurrence, SkippedRecord};
use crate::timezone::Normalizer;

/// Recurrence properties that are read but not expanded.
const IGNORED_RECURRENCE: [&str; 3] = ["RRULE", "RDATE", "EXDATE"];

/// Result of parsing an interchange document.
#[derive(Debug, Clone, Default)]
pub struct ParsedCalendar {
    /// Events in document order, converted to the configured zone.
    pub occurrences: Vec<Occurrence>,
    /// Events that could not be read.
    pub skipped: Vec<SkippedRecord>,
}

/// Parse an interchange document into occurrences in the configured zone.
///
/// A missing `VCALENDAR` envelope, mis-nested components or an unclosed component fail the
/// whole document with [`EventCalError::MalformedDocument`]. Events that cannot be read are
/// skipped, logged and reported in [`ParsedCalendar::skipped`].
pub fn parse(text: &str, config: &CalendarConfig) -> EventCalResult<ParsedCalendar> {
    let unfolded = unfold(text);
    let calendar = calendar_root(&unfolded)?;
    let normalizer = config.normalizer();

    let mut zones = HashMap::new();
    for component in children_named(&calendar, "VTIMEZONE") {
        match ZoneDefinition::from_component(component) {
            Ok(zone) => {
                zones.insert(zone.tzid().to_string(), zone);
            }
            Err(e) => tracing::warn!(error = %e, "ignoring unreadable VTIMEZONE"),
        }
    }

    let mut parsed = ParsedCalendar::default();
    for (index, event) in children_named(&calendar, "VEVENT").enumerate() {
        match read_event(event, &zones, &normalizer) {
            Ok(occurrence) => parsed.occurrences.push(occurrence),
            Err(e) => {
                let subject = summary(event)
                    .filter(|s| !s.is_empty())
                    .or_else(|| self::text(event, "UID"))
                    .unwrap_or_else(|| format!("VEVENT #{}", index + 1));
                tracing::warn!(index, title = %subject, reason = %e, "skipping calendar event");
                parsed.skipped.push(SkippedRecord::new(index, subject, e));
            }
        }
    }

    tracing::debug!(
        events = parsed.occurrences.len(),
        skipped = parsed.skipped.len(),
        "parsed calendar document"
    );
    Ok(parsed)
}

/// The single `VCALENDAR` root of an unfolded document.
pub(crate) fn calendar_root(unfolded: &str) -> EventCalResult<Component<'_>> {
    let mut roots = read_components(unfolded)
        .map_err(|e| EventCalError::MalformedDocument(e.trim().to_string()))?;
    if roots.len() != 1 {
        return Err(EventCalError::MalformedDocument(
            "document is not a single VCALENDAR".to_string(),
        ));
    }

    let root = roots.swap_remove(0);
    if !root.name.as_str().eq_ignore_ascii_case("VCALENDAR") {
        return Err(EventCalError::MalformedDocument(format!(
            "expected VCALENDAR, found {}",
            root.name
        )));
    }
    Ok(root)
}

pub(crate) fn children_named<'c, 'a>(
    component: &'c Component<'a>,
    name: &'static str,
) -> impl Iterator<Item = &'c Component<'a>> {
    component
        .components
        .iter()
        .filter(move |c| c.name.as_str().eq_ignore_ascii_case(name))
}

/// Unescaped text value of a property.
pub(crate) fn text(component: &Component, name: &str) -> Option<String> {
    component.find_prop(name).map(|p| p.val.to_string())
}

/// The event title. The single space written for untitled events reads back as empty.
fn summary(event: &Component) -> Option<String> {
    text(event, "SUMMARY").map(|s| if s == EMPTY_SUMMARY { String::new() } else { s })
}

fn param<'p>(property: &'p Property, key: &str) -> Option<&'p str> {
    property
        .params
        .iter()
        .find(|p| p.key.as_str().eq_ignore_ascii_case(key))
        .and_then(|p| p.val.as_ref())
        .map(|v| v.as_str())
}

/// A DTSTART/DTEND value: a calendar date or a resolved instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyTime {
    Date(NaiveDate),
    Instant(DateTime<Tz>),
}

fn read_event(
    event: &Component,
    zones: &HashMap<String, ZoneDefinition>,
    normalizer: &Normalizer,
) -> EventCalResult<Occurrence> {
    let dtstart = event
        .find_prop("DTSTART")
        .ok_or_else(|| EventCalError::InvalidDateTime("missing DTSTART".to_string()))?;
    let start = property_time(dtstart, zones, normalizer)?;

    let end = match event.find_prop("DTEND") {
        Some(dtend) => Some(property_time(dtend, zones, normalizer)?),
        None => None,
    };
    let duration = event
        .find_prop("DURATION")
        .map(|p| parse_duration(p.val.as_str()))
        .transpose()?;

    let midnight = |date: NaiveDate| normalizer.to_zoned(date.and_time(NaiveTime::MIN));
    let overflow = || out_of_range(dtstart.val.as_str());

    let (start, end, all_day) = match start {
        PropertyTime::Date(date) => {
            let start_instant = midnight(date)?;
            let end_instant = match (end, duration) {
                (Some(PropertyTime::Date(end)), _) => midnight(end)?,
                (Some(PropertyTime::Instant(end)), _) => end,
                (None, Some(duration)) => {
                    let wall = date
                        .and_time(NaiveTime::MIN)
                        .checked_add_signed(duration)
                        .ok_or_else(overflow)?;
                    normalizer.to_zoned(wall)?
                }
                (None, None) => {
                    let next = date.checked_add_days(Days::new(1)).ok_or_else(overflow)?;
                    midnight(next)?
                }
            };
            (start_instant, end_instant, true)
        }
        PropertyTime::Instant(start) => {
            let end_instant = match (end, duration) {
                (Some(PropertyTime::Instant(end)), _) => end,
                (Some(PropertyTime::Date(end)), _) => midnight(end)?,
                (None, Some(duration)) => {
                    start.checked_add_signed(duration).ok_or_else(overflow)?
                }
                (None, None) => start,
            };
            (start, end_instant, false)
        }
    };

    if end < start {
        return Err(EventCalError::InvalidDateTime(format!(
            "event ends ({}) before it starts ({})",
            end, start
        )));
    }

    let title = summary(event).unwrap_or_default();
    let ignored: Vec<&str> = IGNORED_RECURRENCE
        .into_iter()
        .filter(|name| event.find_prop(name).is_some())
        .collect();
    if !ignored.is_empty() {
        tracing::warn!(
            title = %title,
            properties = ?ignored,
            "recurring event read as its first instance only"
        );
    }

    let optional_text = |name: &str| text(event, name).filter(|s| !s.is_empty());

    Ok(Occurrence {
        start,
        end,
        all_day,
        title,
        description: optional_text("DESCRIPTION"),
        location: optional_text("LOCATION"),
        color: optional_text("COLOR").or_else(|| optional_text("X-APPLE-CALENDAR-COLOR")),
    })
}

fn out_of_range(value: &str) -> EventCalError {
    EventCalError::InvalidDateTime(format!("{} is out of range", value))
}

/// Parse a DTSTART/DTEND value in any of the RFC 5545 forms: `VALUE=DATE`, UTC (`...Z`),
/// `TZID`-qualified or floating (read in the configured zone).
fn property_time(
    property: &Property,
    zones: &HashMap<String, ZoneDefinition>,
    normalizer: &Normalizer,
) -> EventCalResult<PropertyTime> {
    let invalid = |reason: &str| {
        EventCalError::InvalidDateTime(format!(
            "{} {:?}: {}",
            property.name,
            property.val.as_str(),
            reason
        ))
    };

    let is_date = param(property, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));
    let value = DatePerhapsTime::try_from(property).map_err(invalid)?;

    let instant = match value {
        DatePerhapsTime::Date(date) => return Ok(PropertyTime::Date(date)),
        DatePerhapsTime::DateTime(_) if is_date => return Err(invalid("VALUE=DATE with a time")),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(utc)) => {
            utc.with_timezone(&normalizer.zone())
        }
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => {
            normalizer.to_zoned(naive)?
        }
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            zoned(date_time, &tzid, zones, normalizer)?
        }
    };

    Ok(PropertyTime::Instant(instant))
}

/// Resolve a `TZID`-qualified wall clock: an IANA name first, then a VTIMEZONE of the document.
fn zoned(
    wall: NaiveDateTime,
    tzid: &str,
    zones: &HashMap<String, ZoneDefinition>,
    normalizer: &Normalizer,
) -> EventCalResult<DateTime<Tz>> {
    let tzid = tzid.trim_start_matches('/');
    if let Ok(zone) = tzid.parse::<Tz>() {
        return Ok(Normalizer::new(zone)
            .with_policy(normalizer.policy())
            .to_zoned(wall)?
            .with_timezone(&normalizer.zone()));
    }
    match zones.get(tzid) {
        Some(definition) => Ok(definition
            .resolve(wall, normalizer.policy())?
            .with_timezone(&normalizer.zone())),
        None => Err(EventCalError::InvalidDateTime(format!("unknown TZID {:?}", tzid))),
    }
}

/// Parse an ISO 8601 `DURATION` value (`PT1H30M`, `P1D`, `P2W`).
fn parse_duration(value: &str) -> EventCalResult<Duration> {
    let invalid =
        |reason: String| EventCalError::InvalidDateTime(format!("DURATION {:?}: {}", value, reason));

    match iso8601::duration(value.trim()).map_err(invalid)? {
        iso8601::Duration::Weeks(weeks) => Ok(Duration::weeks(i64::from(weeks))),
        iso8601::Duration::YMDHMS {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
        } => {
            if year != 0 || month != 0 {
                return Err(invalid("years and months are not allowed".to_string()));
            }
            Ok(Duration::days(i64::from(day))
                + Duration::hours(i64::from(hour))
                + Duration::minutes(i64::from(minute))
                + Duration::seconds(i64::from(second))
                + Duration::milliseconds(i64::from(millisecond)))
        }
    }
}
