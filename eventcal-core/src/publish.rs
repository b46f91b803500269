//! Batch publishing: records to occurrences to an interchange document.
//!
//! A bad record never aborts the batch. It is logged, reported as a [`SkippedRecord`] and
//! the remaining records are still published.

use crate::config::CalendarConfig;
use crate::error::EventCalResult;
use crate::event::{Occurrence, SkippedRecord};
use crate::ics;
use crate::recurrence::{expand, parse_rule};
use crate::source::RawEvent;
use crate::timezone::Normalizer;

/// Occurrences of a batch of records, in record order.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub occurrences: Vec<Occurrence>,
    pub skipped: Vec<SkippedRecord>,
}

/// A published document and what went into it.
#[derive(Debug, Clone)]
pub struct Published {
    pub document: String,
    /// Number of VEVENTs in the document.
    pub occurrences: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// Expand every record, skipping records with invalid dates or rules.
pub fn expand_records(records: &[RawEvent], config: &CalendarConfig) -> Expansion {
    let normalizer = config.normalizer();
    let mut expansion = Expansion::default();

    for (index, record) in records.iter().enumerate() {
        match expand_record(record, &normalizer, config.hard_cap) {
            Ok(occurrences) => expansion.occurrences.extend(occurrences),
            Err(e) => {
                tracing::warn!(index, title = %record.title, reason = %e, "skipping event record");
                expansion
                    .skipped
                    .push(SkippedRecord::new(index, record.title.as_str(), e));
            }
        }
    }

    tracing::debug!(
        records = records.len(),
        occurrences = expansion.occurrences.len(),
        skipped = expansion.skipped.len(),
        "expanded event records"
    );
    expansion
}

fn expand_record(
    record: &RawEvent,
    normalizer: &Normalizer,
    hard_cap: usize,
) -> EventCalResult<Vec<Occurrence>> {
    let template = record.to_template(normalizer)?;
    let rule = template.recurrence.as_deref().map(parse_rule).transpose()?;
    Ok(expand(&template, rule.as_ref(), normalizer, hard_cap).collect())
}

/// Expand `records` and serialize the result into a document.
pub fn publish(records: &[RawEvent], config: &CalendarConfig) -> EventCalResult<Published> {
    let expansion = expand_records(records, config);
    let document = ics::serialize(&expansion.occurrences, config)?;

    Ok(Published {
        document,
        occurrences: expansion.occurrences.len(),
        skipped: expansion.skipped,
    })
}
