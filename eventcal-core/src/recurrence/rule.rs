//! Recurrence rule grammar.
//!
//! Rules use the RFC 5545 `RRULE` value syntax restricted to the parts this crate expands:
//! `FREQ`, `INTERVAL`, `COUNT`, `UNTIL`, `BYDAY`, `BYMONTH` and `WKST`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc, Weekday};

use crate::error::{EventCalError, EventCalResult};

/// A parsed recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Number of frequency units between periods, always >= 1.
    pub interval: u32,
    /// Months (1..=12) the rule is limited to; empty means unrestricted.
    pub by_month: Vec<u32>,
    pub bound: Option<RuleBound>,
}

/// Frequency of a rule, with the BYDAY shape that is valid for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frequency {
    Daily { by_day: Vec<Weekday> },
    Weekly { by_day: Vec<Weekday>, week_start: Weekday },
    Monthly { by_day: Vec<WeekdayNum> },
    Yearly { by_day: Vec<WeekdayNum> },
}

/// A BYDAY entry with an optional ordinal, e.g. `MO`, `1FR` or `-1SU`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayNum {
    pub ordinal: Option<i8>,
    pub weekday: Weekday,
}

/// How a rule terminates. Rules without a bound rely on the caller's hard cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleBound {
    Count(u32),
    Until(Until),
}

/// Last permitted start for a rule (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
    /// Any start on or before this local date.
    Date(NaiveDate),
    /// A local wall-clock time in the expansion zone.
    Local(NaiveDateTime),
    Utc(DateTime<Utc>),
}

impl RecurrenceRule {
    pub fn count(&self) -> Option<u32> {
        match self.bound {
            Some(RuleBound::Count(n)) => Some(n),
            _ => None,
        }
    }

    pub fn until(&self) -> Option<Until> {
        match self.bound {
            Some(RuleBound::Until(until)) => Some(until),
            _ => None,
        }
    }

    /// The same rule with any UNTIL bound removed. UNTIL compares against resolved
    /// occurrences, so it is applied after candidate generation.
    pub(crate) fn without_until(&self) -> RecurrenceRule {
        RecurrenceRule {
            bound: self.bound.filter(|b| matches!(b, RuleBound::Count(_))),
            ..self.clone()
        }
    }
}

impl FromStr for RecurrenceRule {
    type Err = EventCalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_rule(s)
    }
}

/// Parse a recurrence expression such as `FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;COUNT=6`.
///
/// An optional `RRULE:` prefix is accepted. Fails with [`EventCalError::InvalidRule`] when
/// the frequency is missing or unknown, the interval or count is not positive, both COUNT
/// and UNTIL are given, or any part is unsupported or malformed.
pub fn parse_rule(expression: &str) -> EventCalResult<RecurrenceRule> {
    let body = expression.trim();
    let body = match body.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("RRULE:") => &body[6..],
        _ => body,
    };

    let mut freq = None;
    let mut interval = None;
    let mut count = None;
    let mut until = None;
    let mut by_day: Option<Vec<WeekdayNum>> = None;
    let mut by_month = None;
    let mut week_start = None;

    for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, value) = part
            .split_once('=')
            .ok_or_else(|| invalid(format!("'{}' is not NAME=VALUE", part)))?;
        let name = name.trim().to_ascii_uppercase();
        let value = value.trim();

        let duplicate = match name.as_str() {
            "FREQ" => freq.replace(parse_frequency_token(value)?).is_some(),
            "INTERVAL" => interval.replace(parse_interval(value)?).is_some(),
            "COUNT" => count.replace(parse_positive(&name, value)?).is_some(),
            "UNTIL" => until.replace(parse_until(value)?).is_some(),
            "BYDAY" => by_day.replace(parse_list(value, parse_weekday_num)?).is_some(),
            "BYMONTH" => by_month.replace(parse_list(value, parse_month)?).is_some(),
            "WKST" => week_start.replace(parse_weekday(value)?).is_some(),
            _ => return Err(invalid(format!("unsupported rule part '{}'", name))),
        };
        if duplicate {
            return Err(invalid(format!("{} given more than once", name)));
        }
    }

    let freq = freq.ok_or_else(|| invalid("missing FREQ".to_string()))?;

    let bound = match (count, until) {
        (Some(_), Some(_)) => {
            return Err(invalid("COUNT and UNTIL are mutually exclusive".to_string()));
        }
        (Some(n), None) => Some(RuleBound::Count(n)),
        (None, Some(u)) => Some(RuleBound::Until(u)),
        (None, None) => None,
    };

    let by_day = by_day.unwrap_or_default();
    let frequency = match freq {
        FreqToken::Daily => Frequency::Daily {
            by_day: plain_weekdays("DAILY", &by_day)?,
        },
        FreqToken::Weekly => Frequency::Weekly {
            by_day: plain_weekdays("WEEKLY", &by_day)?,
            week_start: week_start.unwrap_or(Weekday::Mon),
        },
        FreqToken::Monthly => Frequency::Monthly {
            by_day: check_ordinals("MONTHLY", by_day, 5)?,
        },
        FreqToken::Yearly => Frequency::Yearly {
            by_day: check_ordinals("YEARLY", by_day, 53)?,
        },
    };

    Ok(RecurrenceRule {
        frequency,
        interval: interval.unwrap_or(1),
        by_month: by_month.unwrap_or_default(),
        bound,
    })
}

#[derive(Debug, Clone, Copy)]
enum FreqToken {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

fn invalid(message: String) -> EventCalError {
    EventCalError::InvalidRule(message)
}

fn parse_frequency_token(value: &str) -> EventCalResult<FreqToken> {
    match value.to_ascii_uppercase().as_str() {
        "DAILY" => Ok(FreqToken::Daily),
        "WEEKLY" => Ok(FreqToken::Weekly),
        "MONTHLY" => Ok(FreqToken::Monthly),
        "YEARLY" => Ok(FreqToken::Yearly),
        other => Err(invalid(format!("unrecognised FREQ '{}'", other))),
    }
}

fn parse_positive(name: &str, value: &str) -> EventCalResult<u32> {
    match value.parse::<i64>() {
        Ok(n) if n >= 1 => u32::try_from(n).map_err(|_| invalid(format!("{} is too large", name))),
        Ok(n) => Err(invalid(format!("{} must be positive, got {}", name, n))),
        Err(_) => Err(invalid(format!("{} must be a number, got '{}'", name, value))),
    }
}

fn parse_interval(value: &str) -> EventCalResult<u32> {
    let interval = parse_positive("INTERVAL", value)?;
    if interval > u32::from(u16::MAX) {
        return Err(invalid(format!("INTERVAL {} is too large", interval)));
    }
    Ok(interval)
}

fn parse_until(value: &str) -> EventCalResult<Until> {
    let value = value.to_ascii_uppercase();
    if let Some(utc) = value.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .map(|dt| Until::Utc(dt.and_utc()))
            .map_err(|_| invalid(format!("bad UNTIL '{}'", value)));
    }
    if value.contains('T') {
        return NaiveDateTime::parse_from_str(&value, "%Y%m%dT%H%M%S")
            .map(Until::Local)
            .map_err(|_| invalid(format!("bad UNTIL '{}'", value)));
    }
    NaiveDate::parse_from_str(&value, "%Y%m%d")
        .map(Until::Date)
        .map_err(|_| invalid(format!("bad UNTIL '{}'", value)))
}

fn parse_list<T>(value: &str, item: fn(&str) -> EventCalResult<T>) -> EventCalResult<Vec<T>> {
    value.split(',').map(str::trim).map(item).collect()
}

fn parse_month(value: &str) -> EventCalResult<u32> {
    match value.parse::<u32>() {
        Ok(m @ 1..=12) => Ok(m),
        _ => Err(invalid(format!("BYMONTH value '{}' is not 1..12", value))),
    }
}

fn parse_weekday(value: &str) -> EventCalResult<Weekday> {
    match value.to_ascii_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(invalid(format!("unknown weekday '{}'", other))),
    }
}

fn parse_weekday_num(value: &str) -> EventCalResult<WeekdayNum> {
    if value.len() < 2 || !value.is_char_boundary(value.len() - 2) {
        return Err(invalid(format!("bad BYDAY value '{}'", value)));
    }
    let (ordinal, day) = value.split_at(value.len() - 2);
    let weekday = parse_weekday(day)?;
    let ordinal = match ordinal {
        "" => None,
        n => Some(
            n.parse::<i8>()
                .map_err(|_| invalid(format!("bad BYDAY ordinal '{}'", value)))?,
        ),
    };
    Ok(WeekdayNum { ordinal, weekday })
}

fn plain_weekdays(freq: &str, by_day: &[WeekdayNum]) -> EventCalResult<Vec<Weekday>> {
    by_day
        .iter()
        .map(|wd| match wd.ordinal {
            None => Ok(wd.weekday),
            Some(_) => Err(invalid(format!(
                "BYDAY ordinals are not allowed with FREQ={}",
                freq
            ))),
        })
        .collect()
}

fn check_ordinals(freq: &str, by_day: Vec<WeekdayNum>, limit: i8) -> EventCalResult<Vec<WeekdayNum>> {
    for wd in &by_day {
        if let Some(n) = wd.ordinal
            && (n == 0 || n.unsigned_abs() > limit.unsigned_abs())
        {
            return Err(invalid(format!(
                "BYDAY ordinal {} out of range for FREQ={}",
                n, freq
            )));
        }
    }
    Ok(by_day)
}

fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

impl fmt::Display for WeekdayNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.ordinal {
            write!(f, "{}", n)?;
        }
        f.write_str(weekday_code(self.weekday))
    }
}

impl fmt::Display for Until {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Until::Date(d) => write!(f, "{}", d.format("%Y%m%d")),
            Until::Local(dt) => write!(f, "{}", dt.format("%Y%m%dT%H%M%S")),
            Until::Utc(dt) => write!(f, "{}", dt.format("%Y%m%dT%H%M%SZ")),
        }
    }
}

/// Canonical RRULE value text (without the `RRULE:` prefix).
impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (freq, by_day, week_start): (&str, Vec<String>, Option<Weekday>) = match &self.frequency {
            Frequency::Daily { by_day } => (
                "DAILY",
                by_day.iter().map(|d| weekday_code(*d).to_string()).collect(),
                None,
            ),
            Frequency::Weekly { by_day, week_start } => (
                "WEEKLY",
                by_day.iter().map(|d| weekday_code(*d).to_string()).collect(),
                Some(*week_start).filter(|wd| *wd != Weekday::Mon),
            ),
            Frequency::Monthly { by_day } => {
                ("MONTHLY", by_day.iter().map(ToString::to_string).collect(), None)
            }
            Frequency::Yearly { by_day } => {
                ("YEARLY", by_day.iter().map(ToString::to_string).collect(), None)
            }
        };

        write!(f, "FREQ={}", freq)?;
        if self.interval != 1 {
            write!(f, ";INTERVAL={}", self.interval)?;
        }
        if let Some(wkst) = week_start {
            write!(f, ";WKST={}", weekday_code(wkst))?;
        }
        if !by_day.is_empty() {
            write!(f, ";BYDAY={}", by_day.join(","))?;
        }
        if !self.by_month.is_empty() {
            let months: Vec<String> = self.by_month.iter().map(u32::to_string).collect();
            write!(f, ";BYMONTH={}", months.join(","))?;
        }
        match self.bound {
            Some(RuleBound::Count(n)) => write!(f, ";COUNT={}", n),
            Some(RuleBound::Until(until)) => write!(f, ";UNTIL={}", until),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weekly_rule() {
        let rule = parse_rule("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;COUNT=6").unwrap();

        assert_eq!(
            rule.frequency,
            Frequency::Weekly {
                by_day: vec![Weekday::Mon, Weekday::Wed],
                week_start: Weekday::Mon,
            }
        );
        assert_eq!(rule.interval, 2);
        assert_eq!(rule.count(), Some(6));
        assert_eq!(rule.until(), None);
    }

    #[test]
    fn test_parse_accepts_prefix_and_lowercase() {
        let rule = parse_rule("RRULE:freq=monthly;byday=1fr,-1su;bymonth=3,10").unwrap();

        assert_eq!(
            rule.frequency,
            Frequency::Monthly {
                by_day: vec![
                    WeekdayNum { ordinal: Some(1), weekday: Weekday::Fri },
                    WeekdayNum { ordinal: Some(-1), weekday: Weekday::Sun },
                ],
            }
        );
        assert_eq!(rule.by_month, vec![3, 10]);
        assert_eq!(rule.interval, 1);
        assert!(rule.bound.is_none());
    }

    #[test]
    fn test_parse_until_variants() {
        let date = parse_rule("FREQ=DAILY;UNTIL=20250110").unwrap();
        assert_eq!(
            date.until(),
            Some(Until::Date(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()))
        );

        let utc = parse_rule("FREQ=DAILY;UNTIL=20250110T120000Z").unwrap();
        assert!(matches!(utc.until(), Some(Until::Utc(_))));

        let local = parse_rule("FREQ=DAILY;UNTIL=20250110T120000").unwrap();
        assert!(matches!(local.until(), Some(Until::Local(_))));
    }

    #[test]
    fn test_parse_rejects_invalid_rules() {
        let cases = [
            "",
            "INTERVAL=2",
            "FREQ=HOURLY",
            "FREQ=FORTNIGHTLY",
            "FREQ=DAILY;INTERVAL=0",
            "FREQ=DAILY;INTERVAL=-1",
            "FREQ=DAILY;INTERVAL=two",
            "FREQ=DAILY;COUNT=0",
            "FREQ=DAILY;COUNT=3;UNTIL=20250101",
            "FREQ=DAILY;FREQ=WEEKLY",
            "FREQ=WEEKLY;BYDAY=1MO",
            "FREQ=DAILY;BYDAY=-1FR",
            "FREQ=MONTHLY;BYDAY=6MO",
            "FREQ=MONTHLY;BYDAY=0MO",
            "FREQ=YEARLY;BYDAY=54SU",
            "FREQ=YEARLY;BYMONTH=13",
            "FREQ=MONTHLY;BYSETPOS=1",
            "FREQ=WEEKLY;BYDAY=XX",
            "FREQ=DAILY;UNTIL=tomorrow",
            "FREQ=DAILY;COUNT",
            "FREQ=DAILY;INTERVAL=70000",
        ];

        for case in cases {
            let result = parse_rule(case);
            assert!(
                matches!(result, Err(EventCalError::InvalidRule(_))),
                "'{}' should be rejected, got {:?}",
                case,
                result
            );
        }
    }

    #[test]
    fn test_display_is_canonical_and_reparses() {
        let rule = parse_rule("byday=TU,TH;freq=weekly;wkst=SU;count=8;interval=2").unwrap();
        let text = rule.to_string();

        assert_eq!(text, "FREQ=WEEKLY;INTERVAL=2;WKST=SU;BYDAY=TU,TH;COUNT=8");
        assert_eq!(parse_rule(&text).unwrap(), rule);

        let yearly: RecurrenceRule = "FREQ=YEARLY;BYMONTH=3;BYDAY=-1SU;UNTIL=20300101T000000Z"
            .parse()
            .unwrap();
        assert_eq!(
            yearly.to_string(),
            "FREQ=YEARLY;BYDAY=-1SU;BYMONTH=3;UNTIL=20300101T000000Z"
        );
    }

    #[test]
    fn test_without_until_keeps_count() {
        let until = parse_rule("FREQ=DAILY;BYMONTH=1;UNTIL=20250110").unwrap();
        assert_eq!(until.without_until().to_string(), "FREQ=DAILY;BYMONTH=1");

        let count = parse_rule("FREQ=DAILY;COUNT=4").unwrap();
        assert_eq!(count.without_until(), count, "COUNT is part of candidate generation");
    }
}
