//! Recurrence rules and their expansion into occurrences.

mod expand;
mod rule;

pub(crate) use expand::Candidates;
pub use expand::{Occurrences, expand};
pub use rule::{Frequency, RecurrenceRule, RuleBound, Until, WeekdayNum, parse_rule};
