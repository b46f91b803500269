//! Occurrence expansion for recurring event templates.
//!
//! Expansion works on wall-clock times: the `rrule` crate generates candidates from the
//! anchor's wall clock treated as UTC, and each candidate keeps the template's wall-clock
//! duration before it is resolved to an instant through the [`Normalizer`]. A daily
//! 09:00–10:00 event therefore stays 09:00–10:00 local across daylight-saving changes.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rrule::{RRuleSet, RRuleSetIter};

use crate::error::{EventCalError, EventCalResult};
use crate::event::{EventTemplate, Occurrence};
use crate::recurrence::rule::{RecurrenceRule, Until};
use crate::timezone::Normalizer;

/// Wall-clock candidates of a rule, in order, starting at `anchor`.
///
/// COUNT is honoured here; UNTIL is left to the caller because it compares against
/// resolved instants. Rules that can never match end after the `rrule` crate's loop limit.
#[derive(Debug, Clone)]
pub(crate) struct Candidates {
    inner: RRuleSetIter,
}

impl Candidates {
    pub(crate) fn new(anchor: NaiveDateTime, rule: &RecurrenceRule) -> EventCalResult<Self> {
        let text = format!(
            "DTSTART:{}Z\nRRULE:{}",
            anchor.format("%Y%m%dT%H%M%S"),
            rule.without_until()
        );
        let set: RRuleSet = text
            .parse()
            .map_err(|e| EventCalError::InvalidRule(format!("{}: {}", rule, e)))?;
        Ok(Candidates {
            inner: set.limit().into_iter(),
        })
    }
}

impl Iterator for Candidates {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<NaiveDateTime> {
        self.inner.next().map(|candidate| candidate.naive_utc())
    }
}

/// Expand a template into its occurrences.
///
/// Without a rule the result is exactly one occurrence spanning the template's own start and
/// end. With a rule, expansion stops at the rule's COUNT or UNTIL bound or after `hard_cap`
/// occurrences, whichever comes first. Every candidate takes a COUNT slot, including one
/// skipped because its wall clock cannot be resolved.
pub fn expand<'a>(
    template: &'a EventTemplate,
    rule: Option<&'a RecurrenceRule>,
    normalizer: &'a Normalizer,
    hard_cap: usize,
) -> Occurrences<'a> {
    let candidates = rule.and_then(|rule| match Candidates::new(template.start, rule) {
        Ok(candidates) => Some(candidates),
        Err(e) => {
            tracing::warn!(title = %template.title, error = %e, "rule cannot be expanded");
            None
        }
    });

    Occurrences {
        template,
        until: rule.and_then(RecurrenceRule::until),
        recurring: rule.is_some(),
        candidates,
        normalizer,
        hard_cap,
        emitted: 0,
        done: false,
    }
}

/// Lazy occurrence sequence returned by [`expand`].
#[derive(Debug, Clone)]
pub struct Occurrences<'a> {
    template: &'a EventTemplate,
    until: Option<Until>,
    recurring: bool,
    candidates: Option<Candidates>,
    normalizer: &'a Normalizer,
    hard_cap: usize,
    /// Occurrences handed out (counts toward the hard cap).
    emitted: usize,
    done: bool,
}

impl Iterator for Occurrences<'_> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        if self.done {
            return None;
        }

        if !self.recurring {
            self.done = true;
            return self.build(self.template.start);
        }

        loop {
            if self.emitted >= self.hard_cap {
                tracing::debug!(title = %self.template.title, cap = self.hard_cap, "hard cap reached");
                return self.finish();
            }

            let Some(start) = self.candidates.as_mut().and_then(Iterator::next) else {
                return self.finish();
            };

            if let Some(until) = self.until
                && self.is_past(until, start)
            {
                return self.finish();
            }

            if let Some(occurrence) = self.build(start) {
                self.emitted += 1;
                return Some(occurrence);
            }
        }
    }
}

impl Occurrences<'_> {
    fn finish(&mut self) -> Option<Occurrence> {
        self.done = true;
        self.candidates = None;
        None
    }

    fn is_past(&self, until: Until, start: NaiveDateTime) -> bool {
        match until {
            Until::Date(date) => start.date() > date,
            Until::Local(limit) => start > limit,
            Until::Utc(limit) => match self.normalizer.to_zoned(start) {
                Ok(zoned) => zoned.with_timezone(&Utc) > limit,
                Err(_) => start.and_utc() > limit,
            },
        }
    }

    /// Resolve one wall-clock start into an occurrence, or skip it with a warning.
    fn build(&self, start: NaiveDateTime) -> Option<Occurrence> {
        let template = self.template;
        let end = start.checked_add_signed(template.duration())?;

        let resolved = self
            .normalizer
            .to_zoned(start)
            .and_then(|start| Ok((start, self.normalizer.to_zoned(end)?)));

        let (start, end): (DateTime<Tz>, DateTime<Tz>) = match resolved {
            Ok((s, e)) if e < s => (s, s),
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(title = %template.title, %start, error = %e, "skipping occurrence");
                return None;
            }
        };

        Some(Occurrence {
            start,
            end,
            all_day: template.all_day,
            title: template.title.clone(),
            description: template.description.clone(),
            location: template.location.clone(),
            color: template.color.clone(),
        })
    }
}
