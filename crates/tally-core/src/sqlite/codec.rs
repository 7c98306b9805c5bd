use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::models::{InstallReason, LogAction};

pub(crate) fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

pub(crate) fn to_unix_seconds(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    i64::try_from(duration.as_secs())
        .map_err(|_| storage_error_sqlite("unix timestamp seconds exceed i64 range"))
}

pub(crate) fn to_optional_unix_seconds(value: Option<SystemTime>) -> rusqlite::Result<Option<i64>> {
    value.map(to_unix_seconds).transpose()
}

pub(crate) fn from_unix_seconds(value: i64) -> rusqlite::Result<SystemTime> {
    let seconds = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("negative unix timestamps are not supported"))?;
    Ok(UNIX_EPOCH + Duration::from_secs(seconds))
}

pub(crate) fn from_optional_unix_seconds(value: Option<i64>) -> rusqlite::Result<Option<SystemTime>> {
    value.map(from_unix_seconds).transpose()
}

pub(crate) fn parse_reason(raw: Option<String>) -> rusqlite::Result<Option<InstallReason>> {
    raw.map(|value| {
        value.parse::<InstallReason>().map_err(|_| {
            storage_error_sqlite(&format!("unknown install reason '{value}' in sqlite record"))
        })
    })
    .transpose()
}

pub(crate) fn parse_action(raw: &str) -> rusqlite::Result<LogAction> {
    raw.parse::<LogAction>()
        .map_err(|_| storage_error_sqlite(&format!("unknown log action '{raw}' in sqlite record")))
}

pub(crate) fn to_i64(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

/// Builds `?N, ?N+1, ...` placeholders for an IN list starting at `first`.
pub(crate) fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_seconds_round_trip_drops_subsecond_precision() {
        let value = UNIX_EPOCH + Duration::from_millis(1_700_000_000_750);
        let stored = to_unix_seconds(value).unwrap();
        assert_eq!(stored, 1_700_000_000);
        assert_eq!(
            from_unix_seconds(stored).unwrap(),
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
    }

    #[test]
    fn negative_timestamps_are_rejected() {
        assert!(from_unix_seconds(-5).is_err());
    }

    #[test]
    fn placeholders_are_numbered_from_offset() {
        assert_eq!(placeholders(3, 3), "?3, ?4, ?5");
        assert_eq!(placeholders(1, 0), "");
    }
}
