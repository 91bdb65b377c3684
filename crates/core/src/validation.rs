use chrono::NaiveDate;
use thiserror::Error;

/// Accepted wire format for `date_applied`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors raised while turning request payloads into storable values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("date_applied must be formatted as YYYY-MM-DD (got '{0}')")]
    InvalidDate(String),
    #[error("{0} cannot be null")]
    NullField(&'static str),
}

/// Parses an ISO `YYYY-MM-DD` date. Blank input means "no date".
pub fn parse_date_applied(raw: &str) -> Result<Option<NaiveDate>, ValidationError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map(Some)
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}
