//! ICS document generation.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, Component, EventLike, Property, ValueType};
use uuid::Uuid;

use super::vtimezone::ZoneDefinition;
use crate::config::CalendarConfig;
use crate::error::{EventCalError, EventCalResult};
use crate::event::Occurrence;
use crate::timezone::Normalizer;

/// SUMMARY written for an untitled occurrence. Readers map it back to an empty title.
pub(crate) const EMPTY_SUMMARY: &str = " ";

/// Serialize occurrences into a publishable iCalendar document, stamped with the current time.
pub fn serialize(occurrences: &[Occurrence], config: &CalendarConfig) -> EventCalResult<String> {
    serialize_at(occurrences, config, Utc::now())
}

/// Serialize occurrences with an explicit `DTSTAMP`.
///
/// Every occurrence becomes one VEVENT in input order, each with a fresh UID. Times are
/// written against the configured zone, whose VTIMEZONE block is embedded once.
pub fn serialize_at(
    occurrences: &[Occurrence],
    config: &CalendarConfig,
    now: DateTime<Utc>,
) -> EventCalResult<String> {
    let normalizer = config.normalizer();
    let zone = normalizer.zone();

    let mut calendar = Calendar::empty();
    calendar
        .append_property(("VERSION", "2.0"))
        .append_property(("PRODID", config.product_id.as_str()))
        .append_property(("CALSCALE", "GREGORIAN"))
        .append_property(("METHOD", "PUBLISH"))
        .timezone(zone.name());
    if let Some(name) = &config.calendar_name {
        calendar.name(name);
    }
    if let Some(ttl) = config.ttl()? {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| EventCalError::Config(format!("published_ttl: {}", e)))?;
        calendar.ttl(&ttl);
    }

    let mut uids = HashSet::with_capacity(occurrences.len());
    for occurrence in occurrences {
        let uid = unique_uid(&mut uids, &config.uid_domain);
        calendar.push(generate_event(occurrence, &normalizer, &uid, now));
    }

    let reference_year = occurrences
        .first()
        .map_or(now.year(), |o| o.start.with_timezone(&zone).year());
    let definition = ZoneDefinition::from_zone(zone, reference_year);
    let output = insert_timezone(calendar.done().to_string(), &definition);

    tracing::debug!(events = occurrences.len(), bytes = output.len(), "serialized calendar");
    Ok(output)
}

/// Place the VTIMEZONE block ahead of the first VEVENT, or before `END:VCALENDAR` in a
/// document without events.
fn insert_timezone(ics: String, definition: &ZoneDefinition) -> String {
    let idx = ics
        .find("\r\nBEGIN:VEVENT\r\n")
        .map(|idx| idx + 2)
        .or_else(|| ics.rfind("END:VCALENDAR"));
    let Some(idx) = idx else {
        return ics;
    };

    let block = definition.to_string();
    let (start, end) = ics.split_at(idx);
    let mut buffer = String::with_capacity(ics.len() + block.len());
    buffer.push_str(start);
    buffer.push_str(&block);
    buffer.push_str(end);
    buffer
}

/// Draw UIDs until one is not yet used in this document.
fn unique_uid(used: &mut HashSet<String>, domain: &str) -> String {
    loop {
        let uid = format!("{}@{}", Uuid::new_v4(), domain);
        if used.insert(uid.clone()) {
            return uid;
        }
    }
}

/// Build the VEVENT for one occurrence.
fn generate_event(
    occurrence: &Occurrence,
    normalizer: &Normalizer,
    uid: &str,
    now: DateTime<Utc>,
) -> icalendar::Event {
    let mut ics_event = icalendar::Event::new();
    ics_event.uid(uid).timestamp(now);

    if occurrence.all_day {
        add_date_property(&mut ics_event, "DTSTART", &occurrence.start, normalizer);
        add_date_property(&mut ics_event, "DTEND", &occurrence.end, normalizer);
    } else {
        add_datetime_property(&mut ics_event, "DTSTART", &occurrence.start, normalizer);
        add_datetime_property(&mut ics_event, "DTEND", &occurrence.end, normalizer);
    }

    let summary = if occurrence.title.is_empty() {
        EMPTY_SUMMARY.to_string()
    } else {
        single_newlines(&occurrence.title)
    };
    ics_event
        .summary(&summary)
        .description(&single_newlines(occurrence.description.as_deref().unwrap_or("")))
        .location(&single_newlines(occurrence.location.as_deref().unwrap_or("")));

    if let Some(color) = &occurrence.color {
        ics_event.add_property("COLOR", color);
        ics_event.add_property("X-APPLE-CALENDAR-COLOR", color);
    }

    ics_event.done()
}

/// TEXT escaping only covers `\n`; CRLF pairs and lone CRs become plain newlines first.
fn single_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Add an all-day date property (`VALUE=DATE`) using the wall-clock date in the zone.
fn add_date_property(
    ics_event: &mut icalendar::Event,
    name: &str,
    time: &DateTime<Tz>,
    normalizer: &Normalizer,
) {
    let date = normalizer.to_wall_clock(time).date();
    let mut prop = Property::new(name, date.format("%Y%m%d").to_string());
    prop.append_parameter(ValueType::Date);
    ics_event.append_property(prop);
}

/// Add a zone-qualified datetime property. Instants a reader would resolve differently from
/// their wall clock (the later half of a fall-back overlap) are written in UTC instead.
fn add_datetime_property(
    ics_event: &mut icalendar::Event,
    name: &str,
    time: &DateTime<Tz>,
    normalizer: &Normalizer,
) {
    let wall = normalizer.to_wall_clock(time);
    let round_trips = normalizer.resolves_back(time)
        && normalizer
            .to_zoned(wall)
            .is_ok_and(|resolved| resolved == *time);

    if round_trips {
        let mut prop = Property::new(name, wall.format("%Y%m%dT%H%M%S").to_string());
        prop.add_parameter("TZID", normalizer.zone().name());
        ics_event.append_property(prop);
    } else {
        let utc = time.with_timezone(&Utc);
        ics_event.add_property(name, utc.format("%Y%m%dT%H%M%SZ").to_string());
    }
}
