//! Cross-checks UTC expansions against the `rrule` crate.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use eventcal_core::recurrence::{expand, parse_rule};
use eventcal_core::{EventTemplate, Normalizer};
use rrule::RRuleSet;

fn oracle(dtstart: &str, rule: &str) -> Vec<DateTime<Utc>> {
    let set: RRuleSet = format!("DTSTART:{}\nRRULE:{}", dtstart, rule)
        .parse()
        .unwrap();
    set.all(1000)
        .dates
        .iter()
        .map(|d| d.with_timezone(&Utc))
        .collect()
}

fn ours(dtstart: &str, rule: &str) -> Vec<DateTime<Utc>> {
    let start = NaiveDateTime::parse_from_str(dtstart, "%Y%m%dT%H%M%SZ").unwrap();
    let template = EventTemplate {
        title: "Oracle".to_string(),
        description: None,
        location: None,
        color: None,
        start,
        end: start + Duration::hours(1),
        all_day: false,
        recurrence: Some(rule.to_string()),
    };
    let rule = parse_rule(rule).unwrap();
    let normalizer = Normalizer::new(chrono_tz::UTC);

    expand(&template, Some(&rule), &normalizer, 500)
        .map(|o| o.start.with_timezone(&Utc))
        .collect()
}

#[test]
fn test_expansion_matches_rrule_crate() {
    let cases = [
        ("20250101T090000Z", "FREQ=DAILY;INTERVAL=3;COUNT=10"),
        ("20250101T090000Z", "FREQ=DAILY;BYMONTH=1;COUNT=40"),
        ("20250106T090000Z", "FREQ=DAILY;BYDAY=MO,WE,FR;COUNT=15"),
        ("20250107T090000Z", "FREQ=WEEKLY;INTERVAL=2;BYDAY=TU,TH;COUNT=8"),
        ("20250106T090000Z", "FREQ=WEEKLY;INTERVAL=2;WKST=SU;BYDAY=MO,FR;COUNT=9"),
        ("20250103T090000Z", "FREQ=MONTHLY;BYDAY=1FR;COUNT=6"),
        ("20250105T090000Z", "FREQ=MONTHLY;INTERVAL=2;BYDAY=1SU,-1SU;COUNT=10"),
        ("20250131T090000Z", "FREQ=MONTHLY;COUNT=6"),
        ("20250228T090000Z", "FREQ=MONTHLY;BYMONTH=2,8;BYDAY=-1FR;COUNT=4"),
        ("20250330T010000Z", "FREQ=YEARLY;BYMONTH=3;BYDAY=-1SU;COUNT=5"),
        ("20250106T090000Z", "FREQ=YEARLY;BYDAY=MO;COUNT=10"),
        ("20240229T120000Z", "FREQ=YEARLY;COUNT=3"),
        ("20250101T090000Z", "FREQ=WEEKLY;UNTIL=20250301T090000Z"),
    ];

    for (dtstart, rule) in cases {
        let expected = oracle(dtstart, rule);
        let actual = ours(dtstart, rule);
        assert!(!expected.is_empty(), "Oracle produced nothing for {}", rule);
        assert_eq!(actual, expected, "Expansion differs for {} from {}", rule, dtstart);
    }
}
