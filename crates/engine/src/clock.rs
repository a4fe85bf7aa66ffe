use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::error::FlowError;

/// Source of "now" for timestamps and session expiry checks.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock stopped at one instant. Used by tests and dry runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Format as `YYYY-MM-DDTHH:MM:SSZ` in UTC.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    let at = at.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        at.year(),
        at.month() as u8,
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Format as RFC 3339 in UTC, keeping sub-second precision. Used for
/// instants that are compared against the clock, such as session starts.
pub(crate) fn format_instant(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.to_offset(UtcOffset::UTC).format(&Rfc3339)
}

/// Parse a stored RFC 3339 timestamp. `key` names the record for the error.
pub(crate) fn parse_timestamp(value: &str, key: &str) -> Result<OffsetDateTime, FlowError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| FlowError::CorruptRecord {
        key: key.to_string(),
        detail: format!("timestamp {value:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn timestamps_are_utc_seconds() {
        let at = datetime!(2030-03-04 05:06:07.891 +02:00);
        assert_eq!(format_timestamp(at), "2030-03-04T03:06:07Z");
    }

    #[test]
    fn formatted_timestamps_parse_back() {
        let at = datetime!(2030-03-04 05:06:07 UTC);
        assert_eq!(parse_timestamp(&format_timestamp(at), "s").unwrap(), at);
    }

    #[test]
    fn instants_keep_fractional_seconds() {
        let at = datetime!(2030-03-04 05:06:07.5 +02:00);
        let formatted = format_instant(at).unwrap();
        assert_eq!(formatted, "2030-03-04T03:06:07.5Z");
        assert_eq!(parse_timestamp(&formatted, "s").unwrap(), at);
    }

    #[test]
    fn malformed_timestamp_is_corrupt_record() {
        let err = parse_timestamp("next tuesday", "sessions/batch-1").unwrap_err();
        assert!(matches!(err, FlowError::CorruptRecord { ref key, .. } if key == "sessions/batch-1"));
    }
}
