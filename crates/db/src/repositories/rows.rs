//! Column codecs shared by the SQL store: money as decimal text, instants as fixed-width
//! RFC 3339 so lexical order matches time order, dates as ISO text.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tourdesk_core::store::StoreError;

pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn optional_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(timestamp)
}

pub(crate) fn json<T: Serialize>(entity: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|error| StoreError::Decode { entity, reason: format!("encode payload: {error}") })
}

pub(crate) trait DbResultExt<T> {
    fn db(self) -> Result<T, StoreError>;
}

impl<T> DbResultExt<T> for Result<T, sqlx::Error> {
    fn db(self) -> Result<T, StoreError> {
        self.map_err(|error| StoreError::Database(error.to_string()))
    }
}

/// Maps unique-constraint violations to [`StoreError::Duplicate`].
pub(crate) fn write_failure(error: sqlx::Error, entity: &'static str, key: &str) -> StoreError {
    let unique = error.as_database_error().is_some_and(|db_error| db_error.is_unique_violation());
    if unique {
        StoreError::Duplicate { entity, key: key.to_owned() }
    } else {
        StoreError::Database(error.to_string())
    }
}

/// Typed column reads that report which entity and column failed to decode.
pub(crate) struct Columns<'r> {
    row: &'r SqliteRow,
    entity: &'static str,
}

impl<'r> Columns<'r> {
    pub(crate) fn new(row: &'r SqliteRow, entity: &'static str) -> Self {
        Self { row, entity }
    }

    fn fail(&self, column: &str, reason: impl Display) -> StoreError {
        StoreError::Decode { entity: self.entity, reason: format!("`{column}`: {reason}") }
    }

    pub(crate) fn text(&self, column: &str) -> Result<String, StoreError> {
        self.row.try_get(column).map_err(|error| self.fail(column, error))
    }

    pub(crate) fn optional_text(&self, column: &str) -> Result<Option<String>, StoreError> {
        self.row.try_get(column).map_err(|error| self.fail(column, error))
    }

    pub(crate) fn flag(&self, column: &str) -> Result<bool, StoreError> {
        let value: i64 = self.row.try_get(column).map_err(|error| self.fail(column, error))?;
        Ok(value != 0)
    }

    pub(crate) fn count(&self, column: &str) -> Result<u32, StoreError> {
        let value: i64 = self.row.try_get(column).map_err(|error| self.fail(column, error))?;
        u32::try_from(value).map_err(|_| self.fail(column, format!("expected non-negative u32, got {value}")))
    }

    /// Decimals, dates and wire enums all round-trip through `FromStr`.
    pub(crate) fn parsed<T>(&self, column: &str) -> Result<T, StoreError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.text(column)?;
        raw.parse().map_err(|error| self.fail(column, format!("`{raw}` ({error})")))
    }

    pub(crate) fn optional_parsed<T>(&self, column: &str) -> Result<Option<T>, StoreError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.optional_text(column)?
            .map(|raw| raw.parse().map_err(|error| self.fail(column, format!("`{raw}` ({error})"))))
            .transpose()
    }

    pub(crate) fn timestamp(&self, column: &str) -> Result<DateTime<Utc>, StoreError> {
        let raw = self.text(column)?;
        parse_timestamp(&raw).map_err(|error| self.fail(column, error))
    }

    pub(crate) fn optional_timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.optional_text(column)?
            .map(|raw| parse_timestamp(&raw).map_err(|error| self.fail(column, error)))
            .transpose()
    }

    pub(crate) fn json<T: DeserializeOwned>(&self, column: &str) -> Result<T, StoreError> {
        let raw = self.text(column)?;
        serde_json::from_str(&raw).map_err(|error| self.fail(column, error))
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| format!("invalid timestamp `{value}` ({error})"))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{parse_timestamp, timestamp};

    #[test]
    fn timestamps_sort_lexically_in_time_order() {
        let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid");
        let later = earlier + chrono::Duration::milliseconds(1500);
        assert!(timestamp(earlier) < timestamp(later));
        assert_eq!(timestamp(earlier), "2026-03-01T09:00:00.000000Z");
    }

    #[test]
    fn timestamps_round_trip() {
        let instant = Utc.with_ymd_and_hms(2026, 7, 14, 18, 30, 5).single().expect("valid");
        assert_eq!(parse_timestamp(&timestamp(instant)).expect("parse"), instant);
    }
}
