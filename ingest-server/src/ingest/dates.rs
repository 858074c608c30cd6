//! Calendar-date parsing for CSV date columns.
//!
//! Formats are tried in a fixed order and the first successful parse wins.
//! Month/day/year precedes day/month/year, so `03/04/2025` is March 4th; a
//! literal is only read as day/month/year when the month/day reading is
//! impossible (e.g. `25/12/2025`).

use crate::error::DateError;
use chrono::NaiveDate;

/// Accepted formats, in tie-break order.
pub const ACCEPTED_DATE_FORMATS: [&str; 3] = ["%m/%d/%Y", "%d/%m/%Y", "%Y-%m-%d"];

/// Parse a date literal. Empty (or whitespace-only) input means "no date".
pub fn parse_date(raw: &str) -> Result<Option<NaiveDate>, DateError> {
    let literal = raw.trim();
    if literal.is_empty() {
        return Ok(None);
    }

    ACCEPTED_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(literal, format).ok())
        .map(Some)
        .ok_or_else(|| DateError::Malformed(literal.to_string()))
}
