//! VTIMEZONE blocks: generation from the tz database and resolution of embedded definitions.

use std::fmt;
use std::ops::RangeInclusive;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, Offset,
    TimeZone, Utc,
};
use chrono_tz::Tz;
use icalendar::parser::Component;

use super::parse::text;
use crate::error::{EventCalError, EventCalResult};
use crate::recurrence::{Candidates, Frequency, RecurrenceRule, Until, WeekdayNum, parse_rule};
use crate::timezone::{GapPolicy, OverlapPolicy, TransitionPolicy};

/// Kind of timezone observance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservanceKind {
    Standard,
    Daylight,
}

impl ObservanceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObservanceKind::Standard => "STANDARD",
            ObservanceKind::Daylight => "DAYLIGHT",
        }
    }
}

/// One STANDARD or DAYLIGHT sub-component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observance {
    pub kind: ObservanceKind,
    pub offset_from: FixedOffset,
    pub offset_to: FixedOffset,
    pub name: Option<String>,
    /// First onset, in local time before the change (`offset_from`).
    pub start: NaiveDateTime,
    /// Yearly onset rule, if the observance repeats.
    pub rule: Option<RecurrenceRule>,
}

/// A zone as described by a VTIMEZONE component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneDefinition {
    tzid: String,
    observances: Vec<Observance>,
}

/// An offset change at a UTC instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    at: NaiveDateTime,
    from: FixedOffset,
    to: FixedOffset,
}

impl ZoneDefinition {
    pub fn tzid(&self) -> &str {
        &self.tzid
    }

    pub fn observances(&self) -> &[Observance] {
        &self.observances
    }

    /// Describe `zone` by the transitions it makes in `year`.
    ///
    /// Zones with two transitions a year get a STANDARD and a DAYLIGHT observance with
    /// yearly `BYMONTH`/`BYDAY` rules starting in 1970. Zones without transitions get a single
    /// STANDARD observance. Anything else (a zone changing its rules that year) is written as
    /// one-off observances.
    pub fn from_zone(zone: Tz, year: i32) -> Self {
        let transitions = zone_transitions(zone, year);
        let name_at = |at: NaiveDateTime| zone.offset_from_utc_datetime(&at).to_string();

        let observances = match transitions.as_slice() {
            [] => {
                let at = NaiveDate::from_ymd_opt(year, 1, 1)
                    .unwrap_or_default()
                    .and_time(chrono::NaiveTime::MIN);
                let offset = zone.offset_from_utc_datetime(&at).fix();
                vec![Observance {
                    kind: ObservanceKind::Standard,
                    offset_from: offset,
                    offset_to: offset,
                    name: Some(name_at(at)),
                    start: epoch_start(),
                    rule: None,
                }]
            }
            [first, second] => [first, second]
                .into_iter()
                .map(|t| {
                    let other = if t == first { second } else { first };
                    let kind = if t.to.local_minus_utc() > other.to.local_minus_utc() {
                        ObservanceKind::Daylight
                    } else {
                        ObservanceKind::Standard
                    };
                    let onset = t.at + Duration::seconds(i64::from(t.from.local_minus_utc()));
                    let rule = yearly_rule(onset.date());
                    let start = first_onset(&rule, onset).unwrap_or(onset);
                    Observance {
                        kind,
                        offset_from: t.from,
                        offset_to: t.to,
                        name: Some(name_at(t.at)),
                        start,
                        rule: Some(rule),
                    }
                })
                .collect(),
            many => many
                .iter()
                .map(|t| Observance {
                    kind: if t.to.local_minus_utc() > t.from.local_minus_utc() {
                        ObservanceKind::Daylight
                    } else {
                        ObservanceKind::Standard
                    },
                    offset_from: t.from,
                    offset_to: t.to,
                    name: Some(name_at(t.at)),
                    start: t.at + Duration::seconds(i64::from(t.from.local_minus_utc())),
                    rule: None,
                })
                .collect(),
        };

        ZoneDefinition {
            tzid: zone.name().to_string(),
            observances,
        }
    }

    /// Read a VTIMEZONE component.
    pub(crate) fn from_component(component: &Component) -> EventCalResult<Self> {
        let invalid =
            |message: String| EventCalError::InvalidDateTime(format!("VTIMEZONE: {}", message));

        let tzid = text(component, "TZID")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid("missing TZID".to_string()))?;

        let mut observances = Vec::new();
        for child in &component.components {
            let kind = match child.name.as_str().to_ascii_uppercase().as_str() {
                "STANDARD" => ObservanceKind::Standard,
                "DAYLIGHT" => ObservanceKind::Daylight,
                _ => continue,
            };

            let required = |name: &str| {
                child
                    .find_prop(name)
                    .map(|p| p.val.as_str().trim())
                    .ok_or_else(|| invalid(format!("{} without {}", kind.as_str(), name)))
            };

            let offset_from = parse_utc_offset(required("TZOFFSETFROM")?)
                .ok_or_else(|| invalid(format!("bad TZOFFSETFROM in {}", tzid)))?;
            let offset_to = parse_utc_offset(required("TZOFFSETTO")?)
                .ok_or_else(|| invalid(format!("bad TZOFFSETTO in {}", tzid)))?;
            let start = NaiveDateTime::parse_from_str(required("DTSTART")?, "%Y%m%dT%H%M%S")
                .map_err(|e| invalid(format!("bad DTSTART in {}: {}", tzid, e)))?;

            let rule = match child.find_prop("RRULE") {
                Some(p) => {
                    let rule = parse_rule(p.val.as_str())?;
                    if !matches!(rule.frequency, Frequency::Yearly { .. }) || rule.interval != 1 {
                        return Err(invalid(format!("unsupported observance rule {}", p.val)));
                    }
                    Some(rule)
                }
                None => None,
            };

            observances.push(Observance {
                kind,
                offset_from,
                offset_to,
                name: text(child, "TZNAME"),
                start,
                rule,
            });
        }

        if observances.is_empty() {
            return Err(invalid(format!("{} has no STANDARD or DAYLIGHT", tzid)));
        }

        Ok(ZoneDefinition { tzid, observances })
    }

    /// Resolve a local time in this zone to an instant, applying `policy` to times that fall
    /// into a gap or an overlap.
    pub fn resolve(
        &self,
        wall: NaiveDateTime,
        policy: TransitionPolicy,
    ) -> EventCalResult<DateTime<FixedOffset>> {
        let transitions = self.transitions_around(wall.year());
        let offset_at = |utc: NaiveDateTime| {
            transitions
                .iter()
                .rev()
                .find(|t| t.at <= utc)
                .map(|t| t.to)
                .or_else(|| transitions.first().map(|t| t.from))
                .or_else(|| self.observances.first().map(|o| o.offset_to))
                .unwrap_or(Utc.fix())
        };

        let mut offsets: Vec<FixedOffset> = self
            .observances
            .iter()
            .flat_map(|o| [o.offset_from, o.offset_to])
            .collect();
        offsets.sort_by_key(|o| o.local_minus_utc());
        offsets.dedup();

        // Candidates ordered by instant: a larger offset means an earlier instant
        let candidates: Vec<DateTime<FixedOffset>> = offsets
            .iter()
            .rev()
            .filter_map(|offset| {
                let utc = wall.checked_sub_signed(offset_duration(*offset))?;
                (offset_at(utc) == *offset).then(|| offset.from_utc_datetime(&utc))
            })
            .collect();

        match candidates.as_slice() {
            [single] => Ok(*single),
            [earlier, .., later] => match policy.overlap {
                OverlapPolicy::Earlier => Ok(*earlier),
                OverlapPolicy::Later => Ok(*later),
                OverlapPolicy::Reject => Err(EventCalError::InvalidDateTime(format!(
                    "{} is ambiguous in {}",
                    wall, self.tzid
                ))),
            },
            [] => {
                let gap = transitions.iter().find(|t| {
                    let before = t.at + offset_duration(t.from);
                    let after = t.at + offset_duration(t.to);
                    before <= wall && wall < after
                });
                let nonexistent = || {
                    EventCalError::InvalidDateTime(format!(
                        "{} does not exist in {}",
                        wall, self.tzid
                    ))
                };
                let Some(gap) = gap else {
                    return Err(nonexistent());
                };
                match policy.gap {
                    GapPolicy::ResolveForward => Ok(gap.to.from_utc_datetime(&gap.at)),
                    GapPolicy::ShiftForward => {
                        let utc = wall - offset_duration(gap.from);
                        Ok(gap.to.from_utc_datetime(&utc))
                    }
                    GapPolicy::Reject => Err(nonexistent()),
                }
            }
        }
    }

    /// All offset changes in the years around `year`, plus every observance's first onset.
    fn transitions_around(&self, year: i32) -> Vec<Transition> {
        let mut transitions = Vec::new();

        for observance in &self.observances {
            let mut onsets = vec![observance.start];
            if let Some(rule) = &observance.rule {
                onsets.extend(observance_onsets(observance, rule, year - 1..=year + 1));
            }

            transitions.extend(onsets.into_iter().filter_map(|local| {
                Some(Transition {
                    at: local.checked_sub_signed(offset_duration(observance.offset_from))?,
                    from: observance.offset_from,
                    to: observance.offset_to,
                })
            }));
        }

        transitions.sort_by_key(|t| t.at);
        transitions.dedup();
        transitions
    }
}

impl fmt::Display for ZoneDefinition {
    /// Renders the `BEGIN:VTIMEZONE` ... `END:VTIMEZONE` block with CRLF line endings.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BEGIN:VTIMEZONE\r\n")?;
        write!(f, "TZID:{}\r\n", self.tzid)?;
        write!(f, "X-LIC-LOCATION:{}\r\n", self.tzid)?;
        for o in &self.observances {
            write!(f, "BEGIN:{}\r\n", o.kind.as_str())?;
            write!(f, "TZOFFSETFROM:{}\r\n", format_utc_offset(o.offset_from))?;
            write!(f, "TZOFFSETTO:{}\r\n", format_utc_offset(o.offset_to))?;
            if let Some(name) = &o.name {
                write!(f, "TZNAME:{}\r\n", name)?;
            }
            write!(f, "DTSTART:{}\r\n", o.start.format("%Y%m%dT%H%M%S"))?;
            if let Some(rule) = &o.rule {
                write!(f, "RRULE:{}\r\n", rule)?;
            }
            write!(f, "END:{}\r\n", o.kind.as_str())?;
        }
        write!(f, "END:VTIMEZONE\r\n")
    }
}

fn epoch_start() -> NaiveDateTime {
    DateTime::<Utc>::UNIX_EPOCH.naive_utc()
}

fn offset_duration(offset: FixedOffset) -> Duration {
    Duration::seconds(i64::from(offset.local_minus_utc()))
}

/// Offset changes of `zone` during `year`, found by sampling each day and bisecting.
fn zone_transitions(zone: Tz, year: i32) -> Vec<Transition> {
    let offset_at = |ts: i64| {
        DateTime::from_timestamp(ts, 0)
            .map(|dt| zone.offset_from_utc_datetime(&dt.naive_utc()).fix())
    };

    let (Some(first), Some(last)) = (
        NaiveDate::from_ymd_opt(year, 1, 1),
        NaiveDate::from_ymd_opt(year + 1, 1, 1),
    ) else {
        return Vec::new();
    };
    let first = first.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    let last = last.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();

    let mut transitions = Vec::new();
    let mut day = first;
    while day < last {
        let next = day + 86_400;
        let (Some(before), Some(after)) = (offset_at(day), offset_at(next)) else {
            break;
        };
        if before != after {
            // first second at which `after` is in effect
            let (mut lo, mut hi) = (day, next);
            while hi - lo > 1 {
                let mid = lo + (hi - lo) / 2;
                if offset_at(mid) == Some(before) {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            if let Some(at) = DateTime::from_timestamp(hi, 0) {
                transitions.push(Transition {
                    at: at.naive_utc(),
                    from: before,
                    to: after,
                });
            }
        }
        day = next;
    }

    transitions
}

/// `FREQ=YEARLY;BYMONTH=m;BYDAY=nDD` matching `date`; the last weekday of a month is `-1`.
fn yearly_rule(date: NaiveDate) -> RecurrenceRule {
    let days_in_month = last_day_of_month(date).map_or(31, |d| d.day());
    let ordinal = if date.day() + 7 > days_in_month {
        -1
    } else {
        ((date.day() - 1) / 7 + 1) as i8
    };

    RecurrenceRule {
        frequency: Frequency::Yearly {
            by_day: vec![WeekdayNum {
                ordinal: Some(ordinal),
                weekday: date.weekday(),
            }],
        },
        interval: 1,
        by_month: vec![date.month()],
        bound: None,
    }
}

/// The rule's onset in 1970, the conventional start of a generated observance.
fn first_onset(rule: &RecurrenceRule, onset: NaiveDateTime) -> Option<NaiveDateTime> {
    let anchor = NaiveDate::from_ymd_opt(1970, 1, 1)?.and_time(onset.time());
    Candidates::new(anchor, rule).ok()?.next()
}

/// Onsets of a yearly observance rule within `years`, in local time before the change.
fn observance_onsets(
    observance: &Observance,
    rule: &RecurrenceRule,
    years: RangeInclusive<i32>,
) -> Vec<NaiveDateTime> {
    let candidates = match Candidates::new(observance.start, rule) {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::warn!(rule = %rule, error = %e, "ignoring observance rule");
            return Vec::new();
        }
    };

    candidates
        .skip_while(|local| local.year() < *years.start())
        .take_while(|local| local.year() <= *years.end())
        .filter(|local| match rule.until() {
            Some(Until::Date(date)) => local.date() <= date,
            Some(Until::Local(limit)) => *local <= limit,
            Some(Until::Utc(limit)) => {
                *local - offset_duration(observance.offset_from) <= limit.naive_utc()
            }
            None => true,
        })
        .collect()
}

fn last_day_of_month(date: NaiveDate) -> Option<NaiveDate> {
    date.with_day(1)?.checked_add_months(Months::new(1))?.pred_opt()
}

/// Parse a UTC offset in `iCalendar` format (`+0500`, `-0800`, `+053000`).
fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.trim().split_at_checked(1)? {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    if !(rest.len() == 4 || rest.len() == 6) || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = rest[0..2].parse().ok()?;
    let minutes: i32 = rest[2..4].parse().ok()?;
    let seconds: i32 = rest.get(4..6).map_or(Some(0), |s| s.parse().ok())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60 + seconds))
}

fn format_utc_offset(offset: FixedOffset) -> String {
    let total = offset.local_minus_utc();
    let sign = if total >= 0 { '+' } else { '-' };
    let total = total.abs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if seconds == 0 {
        format!("{sign}{hours:02}{minutes:02}")
    } else {
        format!("{sign}{hours:02}{minutes:02}{seconds:02}")
    }
}
