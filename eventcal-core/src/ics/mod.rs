//! iCalendar interchange documents.
//!
//! [`serialize`] writes occurrences as a publishable RFC 5545 document with an embedded
//! VTIMEZONE for the configured zone; [`parse`] reads such documents (ours or foreign) back
//! into occurrences.

mod generate;
mod parse;
mod vtimezone;

pub use generate::{serialize, serialize_at};
pub use parse::{ParsedCalendar, parse};
pub use vtimezone::{Observance, ObservanceKind, ZoneDefinition};
