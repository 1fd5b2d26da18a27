pub mod approval;
pub mod audit;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::errors::DomainError;

/// Current UTC time at millisecond precision, the precision every timestamp is stored at.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Fixed-width RFC 3339 form (`2026-01-31T09:15:00.000Z`), so stored values order lexically.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|_| DomainError::UnknownValue { kind: "timestamp", value: raw.to_string() })
}
