use anyhow::{Result, bail};
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

const DATETIME_SECONDS_T: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
);
const DATETIME_SECONDS_SPACE: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);
const DATETIME_MINUTES_T: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]");
const DATETIME_MINUTES_SPACE: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");
const DATE_ONLY: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Formats a timestamp the way the history store keeps it: `YYYY-MM-DD HH:MM:SS`.
///
/// Fixed-width output keeps lexical and chronological ordering identical, which
/// the range predicates rely on.
#[must_use]
pub fn format_store_timestamp(value: PrimitiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        value.year(),
        u8::from(value.month()),
        value.day(),
        value.hour(),
        value.minute(),
        value.second()
    )
}

/// Parses a stored `YYYY-MM-DD HH:MM:SS[.fff]` timestamp.
///
/// Only the space separator is accepted: a `T` sorts after a space, so such a
/// row would compare inconsistently against bound window edges.
pub fn parse_store_timestamp(raw: &str) -> Result<PrimitiveDateTime> {
    let candidate = raw.trim();
    PrimitiveDateTime::parse(candidate, DATETIME_SECONDS_SPACE)
        .map_err(|error| anyhow::anyhow!("unsupported store timestamp `{candidate}`: {error}"))
}

/// Parses a datetime typed by a user.
///
/// Accepts RFC 3339 (converted to UTC), `YYYY-MM-DD[ T]HH:MM[:SS[.fff]]`,
/// a bare date (midnight), or a bare four digit year (January 1st).
pub fn parse_user_datetime(raw: &str) -> Result<PrimitiveDateTime> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        bail!("datetime input is empty");
    }

    if let Ok(parsed) = OffsetDateTime::parse(candidate, &Rfc3339) {
        let utc = parsed.to_offset(UtcOffset::UTC);
        return Ok(PrimitiveDateTime::new(utc.date(), utc.time()));
    }

    for format in [
        DATETIME_SECONDS_T,
        DATETIME_SECONDS_SPACE,
        DATETIME_MINUTES_T,
        DATETIME_MINUTES_SPACE,
    ] {
        if let Ok(parsed) = PrimitiveDateTime::parse(candidate, format) {
            return Ok(parsed);
        }
    }

    if let Ok(date) = Date::parse(candidate, DATE_ONLY) {
        return Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT));
    }

    if candidate.len() == 4
        && let Ok(year) = candidate.parse::<i32>()
        && let Ok(date) = Date::from_ordinal_date(year, 1)
    {
        return Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT));
    }

    bail!("unsupported datetime format: {candidate}");
}

#[must_use]
pub fn now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

#[must_use]
pub fn utc_now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond()
    )
}
