//! Wall-clock ⇄ instant conversion for a single configured zone.
//!
//! Local times that fall into a daylight-saving gap or overlap are resolved by an explicit
//! [`TransitionPolicy`]. The default policy resolves forward in a gap (a nonexistent
//! spring-forward time becomes the first valid instant at or after it) and picks the
//! earlier of the two candidate instants in an overlap.

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{EventCalError, EventCalResult};

/// Naive formats accepted for wall-clock text, tried in order.
const WALL_CLOCK_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// How to resolve a wall-clock time skipped by a spring-forward transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GapPolicy {
    /// The transition instant itself: 02:30 in a 02:00–03:00 gap becomes 03:00.
    #[default]
    ResolveForward,
    /// Shift by the length of the gap: 02:30 becomes 03:30.
    ShiftForward,
    Reject,
}

/// How to resolve a wall-clock time repeated by a fall-back transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    #[default]
    Earlier,
    Later,
    Reject,
}

/// Daylight-saving resolution policy used by a [`Normalizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransitionPolicy {
    #[serde(default)]
    pub gap: GapPolicy,
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

/// Converts wall-clock times in one zone to zone-aware instants and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    zone: Tz,
    policy: TransitionPolicy,
}

impl Normalizer {
    pub fn new(zone: Tz) -> Self {
        Normalizer {
            zone,
            policy: TransitionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Resolve a wall-clock time to an instant in the configured zone.
    pub fn to_zoned(&self, wall: NaiveDateTime) -> EventCalResult<DateTime<Tz>> {
        match self.zone.from_local_datetime(&wall) {
            LocalResult::Single(dt) => Ok(dt),
            LocalResult::Ambiguous(a, b) => {
                let (earlier, later) = if a <= b { (a, b) } else { (b, a) };
                match self.policy.overlap {
                    OverlapPolicy::Earlier => Ok(earlier),
                    OverlapPolicy::Later => Ok(later),
                    OverlapPolicy::Reject => Err(EventCalError::InvalidDateTime(format!(
                        "{} is ambiguous in {}",
                        wall, self.zone
                    ))),
                }
            }
            LocalResult::None => self.resolve_gap(wall),
        }
    }

    /// Wall-clock reading of an instant in the configured zone.
    pub fn to_wall_clock<T: TimeZone>(&self, instant: &DateTime<T>) -> NaiveDateTime {
        instant.with_timezone(&self.zone).naive_local()
    }

    /// Whether an RFC 5545 reader (earlier instant on overlap) resolves the wall-clock
    /// reading of `instant` back to the same instant.
    pub fn resolves_back<T: TimeZone>(&self, instant: &DateTime<T>) -> bool {
        let wall = self.to_wall_clock(instant);
        let utc = instant.with_timezone(&Utc);
        match self.zone.from_local_datetime(&wall) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc) == utc,
            LocalResult::Ambiguous(a, b) => a.min(b).with_timezone(&Utc) == utc,
            LocalResult::None => false,
        }
    }

    /// Parse wall-clock text as supplied by a content source.
    ///
    /// Accepts `YYYY-MM-DD HH:MM[:SS]`, `YYYY-MM-DDTHH:MM[:SS]`, RFC 3339 timestamps with an
    /// offset (converted into this zone) and bare `YYYY-MM-DD` dates (midnight). Fractional
    /// seconds are truncated, since `iCalendar` times have whole-second precision.
    pub fn parse_wall_clock(&self, text: &str) -> EventCalResult<NaiveDateTime> {
        let text = text.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(whole_seconds(self.to_wall_clock(&dt)));
        }

        for format in WALL_CLOCK_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                return Ok(whole_seconds(dt));
            }
        }

        if let Some(date) = parse_date(text) {
            return Ok(date.and_time(NaiveTime::MIN));
        }

        Err(EventCalError::InvalidDateTime(format!(
            "'{}' is not a recognised date-time (expected YYYY-MM-DD HH:MM or ISO 8601)",
            text
        )))
    }

    fn resolve_gap(&self, wall: NaiveDateTime) -> EventCalResult<DateTime<Tz>> {
        let before = self.offset_seconds(wall - Duration::days(1));
        let after = self.offset_seconds(wall + Duration::days(1));

        let nonexistent = || {
            EventCalError::InvalidDateTime(format!("{} does not exist in {}", wall, self.zone))
        };

        if after <= before {
            return Err(nonexistent());
        }

        match self.policy.gap {
            GapPolicy::Reject => Err(nonexistent()),
            GapPolicy::ShiftForward => {
                let shifted = wall + Duration::seconds(i64::from(after - before));
                self.zone
                    .from_local_datetime(&shifted)
                    .earliest()
                    .ok_or_else(nonexistent)
            }
            GapPolicy::ResolveForward => {
                // The transition lies in (lo, hi]: lo still carries the old offset, hi the new one.
                let mut lo = (wall - Duration::seconds(i64::from(after))).and_utc().timestamp();
                let mut hi = (wall - Duration::seconds(i64::from(before))).and_utc().timestamp();
                let offset_at = |ts: i64| {
                    DateTime::from_timestamp(ts, 0).map(|dt| self.offset_seconds(dt.naive_utc()))
                };
                if offset_at(hi) != Some(after) {
                    return Err(nonexistent());
                }
                while hi - lo > 1 {
                    let mid = lo + (hi - lo) / 2;
                    if offset_at(mid) == Some(after) {
                        hi = mid;
                    } else {
                        lo = mid;
                    }
                }
                DateTime::from_timestamp(hi, 0)
                    .map(|dt| dt.with_timezone(&self.zone))
                    .ok_or_else(nonexistent)
            }
        }
    }

    /// UTC offset in seconds in effect at the given UTC wall time.
    fn offset_seconds(&self, utc: NaiveDateTime) -> i32 {
        self.zone.offset_from_utc_datetime(&utc).fix().local_minus_utc()
    }
}

/// Parse a bare `YYYY-MM-DD` date (all-day marker in content sources).
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

fn whole_seconds(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::{America::New_York, Europe::Berlin};

    fn wall(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_to_zoned_regular_time() {
        let normalizer = Normalizer::new(Berlin);
        let zoned = normalizer.to_zoned(wall(2025, 1, 15, 10, 0)).unwrap();
        assert_eq!(zoned.with_timezone(&Utc), utc(2025, 1, 15, 9, 0));

        let summer = normalizer.to_zoned(wall(2025, 7, 15, 10, 0)).unwrap();
        assert_eq!(summer.with_timezone(&Utc), utc(2025, 7, 15, 8, 0));
    }

    #[test]
    fn test_gap_resolves_forward_to_transition_instant() {
        let normalizer = Normalizer::new(Berlin);
        let zoned = normalizer.to_zoned(wall(2025, 3, 30, 2, 30)).unwrap();

        assert_eq!(zoned.with_timezone(&Utc), utc(2025, 3, 30, 1, 0));
        assert_eq!(normalizer.to_wall_clock(&zoned), wall(2025, 3, 30, 3, 0));
    }

    #[test]
    fn test_gap_shift_forward_keeps_distance_into_gap() {
        let normalizer = Normalizer::new(Berlin).with_policy(TransitionPolicy {
            gap: GapPolicy::ShiftForward,
            overlap: OverlapPolicy::Earlier,
        });
        let zoned = normalizer.to_zoned(wall(2025, 3, 30, 2, 30)).unwrap();

        assert_eq!(normalizer.to_wall_clock(&zoned), wall(2025, 3, 30, 3, 30));
    }

    #[test]
    fn test_gap_reject_is_invalid_datetime() {
        let normalizer = Normalizer::new(Berlin).with_policy(TransitionPolicy {
            gap: GapPolicy::Reject,
            overlap: OverlapPolicy::Earlier,
        });
        let result = normalizer.to_zoned(wall(2025, 3, 30, 2, 30));

        assert!(
            matches!(result, Err(EventCalError::InvalidDateTime(_))),
            "Expected InvalidDateTime, got {:?}",
            result
        );
    }

    #[test]
    fn test_overlap_policies() {
        let ambiguous = wall(2025, 10, 26, 2, 30);

        let earlier = Normalizer::new(Berlin).to_zoned(ambiguous).unwrap();
        assert_eq!(earlier.with_timezone(&Utc), utc(2025, 10, 26, 0, 30));

        let later = Normalizer::new(Berlin)
            .with_policy(TransitionPolicy {
                gap: GapPolicy::ResolveForward,
                overlap: OverlapPolicy::Later,
            })
            .to_zoned(ambiguous)
            .unwrap();
        assert_eq!(later.with_timezone(&Utc), utc(2025, 10, 26, 1, 30));

        let rejected = Normalizer::new(Berlin)
            .with_policy(TransitionPolicy {
                gap: GapPolicy::ResolveForward,
                overlap: OverlapPolicy::Reject,
            })
            .to_zoned(ambiguous);
        assert!(matches!(rejected, Err(EventCalError::InvalidDateTime(_))));
    }

    #[test]
    fn test_second_zone_in_same_run() {
        let berlin = Normalizer::new(Berlin);
        let new_york = Normalizer::new(New_York);

        let ny = new_york.to_zoned(wall(2025, 3, 9, 2, 30)).unwrap();
        assert_eq!(ny.with_timezone(&Utc), utc(2025, 3, 9, 7, 0));

        let be = berlin.to_zoned(wall(2025, 3, 9, 2, 30)).unwrap();
        assert_eq!(be.with_timezone(&Utc), utc(2025, 3, 9, 1, 30));
    }

    #[test]
    fn test_resolves_back_detects_later_overlap_instant() {
        let normalizer = Normalizer::new(Berlin);
        let earlier = Utc.with_ymd_and_hms(2025, 10, 26, 0, 30, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 10, 26, 1, 30, 0).unwrap();

        assert!(normalizer.resolves_back(&earlier));
        assert!(!normalizer.resolves_back(&later));
        assert!(normalizer.resolves_back(&utc(2025, 6, 1, 12, 0)));
    }

    #[test]
    fn test_parse_wall_clock_formats() {
        let normalizer = Normalizer::new(Berlin);

        assert_eq!(
            normalizer.parse_wall_clock("2025-01-17 13:00").unwrap(),
            wall(2025, 1, 17, 13, 0)
        );
        assert_eq!(
            normalizer.parse_wall_clock("2025-01-17T13:00:00").unwrap(),
            wall(2025, 1, 17, 13, 0)
        );
        // UTC input is converted into Berlin wall clock
        assert_eq!(
            normalizer.parse_wall_clock("2025-01-17T13:00:00Z").unwrap(),
            wall(2025, 1, 17, 14, 0)
        );
        assert_eq!(
            normalizer
                .parse_wall_clock("2025-07-17T13:00:00+01:00")
                .unwrap(),
            wall(2025, 7, 17, 14, 0)
        );
        assert_eq!(
            normalizer.parse_wall_clock(" 2025-01-17 ").unwrap(),
            wall(2025, 1, 17, 0, 0)
        );
    }

    #[test]
    fn test_parse_wall_clock_truncates_fractional_seconds() {
        let normalizer = Normalizer::new(Berlin);
        let expected = wall(2025, 1, 17, 13, 0) + Duration::seconds(5);

        for text in [
            "2025-01-17 13:00:05.250",
            "2025-01-17T13:00:05.999999",
            "2025-01-17T12:00:05.5Z",
        ] {
            let parsed = normalizer.parse_wall_clock(text).unwrap();
            assert_eq!(parsed, expected, "Unexpected reading of '{}'", text);
            assert_eq!(parsed.nanosecond(), 0, "'{}' kept a fraction", text);
        }
    }

    #[test]
    fn test_parse_wall_clock_rejects_malformed_text() {
        let normalizer = Normalizer::new(Berlin);

        for text in ["", "tomorrow", "2025-13-01 10:00", "17.01.2025 13:00"] {
            let result = normalizer.parse_wall_clock(text);
            assert!(
                matches!(result, Err(EventCalError::InvalidDateTime(_))),
                "'{}' should be rejected, got {:?}",
                text,
                result
            );
        }
    }
}
