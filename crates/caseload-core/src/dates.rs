//! Lenient timestamp coercion and day arithmetic.
//!
//! CRM extracts carry dates as free text in several shapes. Anything that does
//! not parse becomes `None`; nothing in here returns an error for bad data.

use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::PipelineError;

/// Naive wall-clock timestamp as recorded by the CRM.
pub type Timestamp = PrimitiveDateTime;

const SECONDS_PER_DAY: i64 = 86_400;

/// Coerces a raw CRM date string into a timestamp.
///
/// Accepted shapes: RFC3339 (normalized to UTC), `YYYY-MM-DD`,
/// `MM/DD/YYYY`, `MM/DD/YY`, each optionally followed by `T` or a space and
/// `HH:MM[:SS[.fff]][Z]`. Two-digit years map 00-68 to 20xx and 69-99 to
/// 19xx. Sub-second precision is dropped.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        let utc = parsed.to_offset(UtcOffset::UTC);
        return Some(PrimitiveDateTime::new(utc.date(), whole_seconds(utc.time())));
    }

    let (date_part, time_part) = match value.find(|c: char| c == 'T' || c == ' ') {
        Some(index) => (&value[..index], Some(value[index + 1..].trim())),
        None => (value, None),
    };

    let date = parse_date_part(date_part)?;
    let time = match time_part {
        Some(raw_time) if !raw_time.is_empty() => parse_time_part(raw_time)?,
        _ => Time::MIDNIGHT,
    };

    Some(PrimitiveDateTime::new(date, whole_seconds(time)))
}

/// Same as [`parse_timestamp`] but for optional input columns.
#[must_use]
pub fn coerce(raw: Option<&str>) -> Option<Timestamp> {
    raw.and_then(parse_timestamp)
}

/// Parses an operator-supplied "as of" instant.
///
/// # Errors
/// Returns [`PipelineError::Validation`] when the value is not a recognised
/// timestamp shape.
pub fn parse_as_of(raw: &str) -> Result<Timestamp, PipelineError> {
    parse_timestamp(raw)
        .ok_or_else(|| PipelineError::Validation(format!("unrecognised timestamp: {raw}")))
}

fn parse_date_part(raw: &str) -> Option<Date> {
    if let Ok(date) = Date::parse(
        raw,
        format_description!("[year]-[month padding:none]-[day padding:none]"),
    ) {
        return Some(date);
    }

    let us_date = format_description!("[month padding:none]/[day padding:none]/[year]");
    match expand_short_year(raw) {
        Some(expanded) => Date::parse(&expanded, us_date).ok(),
        None => Date::parse(raw, us_date).ok(),
    }
}

fn parse_time_part(raw: &str) -> Option<Time> {
    let clock = raw.strip_suffix('Z').unwrap_or(raw);
    Time::parse(
        clock,
        format_description!("[hour padding:none]:[minute]:[second].[subsecond]"),
    )
    .or_else(|_| {
        Time::parse(
            clock,
            format_description!("[hour padding:none]:[minute]:[second]"),
        )
    })
    .or_else(|_| Time::parse(clock, format_description!("[hour padding:none]:[minute]")))
    .ok()
}

/// Rewrites a trailing one- or two-digit year of `MM/DD/YY` into four
/// digits.
fn expand_short_year(raw: &str) -> Option<String> {
    let (month_day, year) = raw.rsplit_once('/')?;
    if year.is_empty() || year.len() > 2 || !year.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let expanded = if year < 69 { 2000 + year } else { 1900 + year };
    Some(format!("{month_day}/{expanded:04}"))
}

fn whole_seconds(time: Time) -> Time {
    time.replace_nanosecond(0).unwrap_or(time)
}

/// Whole days from `earlier` to `later`, floored (a negative partial day
/// counts as -1).
#[must_use]
pub fn days_between(later: Timestamp, earlier: Timestamp) -> i64 {
    (later - earlier).whole_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Null-propagating [`days_between`].
#[must_use]
pub fn delta_days(later: Option<Timestamp>, earlier: Option<Timestamp>) -> Option<i64> {
    Some(days_between(later?, earlier?))
}

/// Shifts a timestamp back by whole calendar years; Feb 29 lands on Feb 28.
#[must_use]
pub fn minus_years(value: Timestamp, years: i32) -> Timestamp {
    let date = value.date();
    let Some(target) = date.year().checked_sub(years) else {
        return value;
    };
    let shifted = date
        .replace_year(target)
        .or_else(|_| Date::from_calendar_date(target, date.month(), 28))
        .unwrap_or(date);
    PrimitiveDateTime::new(shifted, value.time())
}

/// Completed calendar years between two dates.
#[must_use]
pub fn whole_years_between(later: Date, earlier: Date) -> i32 {
    let mut years = later.year() - earlier.year();
    if (u8::from(later.month()), later.day()) < (u8::from(earlier.month()), earlier.day()) {
        years -= 1;
    }
    years
}

#[must_use]
pub fn format_timestamp(value: Timestamp) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
        value.year(),
        u8::from(value.month()),
        value.day(),
        value.hour(),
        value.minute(),
        value.second()
    )
}

/// Current instant as a UTC wall-clock timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Serde adapter for `Option<Timestamp>` columns, rendered as
/// `YYYY-MM-DDTHH:MM:SS` and read back leniently.
pub mod opt_timestamp {
    use super::{format_timestamp, parse_timestamp, Deserialize, Deserializer, Serializer, Timestamp};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Timestamp>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(timestamp) => serializer.serialize_some(&format_timestamp(*timestamp)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Timestamp>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }
}
