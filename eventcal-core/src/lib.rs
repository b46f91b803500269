//! Recurring event expansion and iCalendar interchange.
//!
//! This crate turns event definitions into time-zone-correct calendar occurrences and
//! exchanges them as RFC 5545 documents:
//! - `source` reads event records (TOML/JSON/YAML) into `EventTemplate`s
//! - `recurrence` parses `RRULE` text and expands templates into `Occurrence`s
//! - `timezone` maps wall-clock times to instants under a daylight-saving policy
//! - `ics` serializes occurrences to a document and parses documents back
//! - `publish` runs the whole batch, skipping bad records with a warning

pub mod config;
pub mod error;
pub mod event;
pub mod ics;
pub mod publish;
pub mod recurrence;
pub mod source;
pub mod timezone;

pub use config::CalendarConfig;
pub use error::{EventCalError, EventCalResult};
pub use event::*;
pub use timezone::Normalizer;
