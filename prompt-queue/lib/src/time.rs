//! Date formatting and interval arithmetic.
//!
//! All functions are pure: the caller supplies "now" so that results are
//! reproducible. Calendar-aware helpers are generic over the time zone and
//! operate on the local calendar of the value they are given.

use std::fmt::Display;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

/// Length of the short usage window, in hours.
pub const FIVE_HOUR_WINDOW_HOURS: i64 = 5;

/// Length of the long usage window, in days.
pub const SEVEN_DAY_WINDOW_DAYS: i64 = 7;

/// Formats an instant as a sortable compact timestamp (`YYYYMMDD_HHMM`).
///
/// ## Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use prompt_queue_lib::time::format_timestamp;
///
/// let at = Utc.with_ymd_and_hms(2025, 3, 9, 7, 5, 0).unwrap();
/// assert_eq!(format_timestamp(&at), "20250309_0705");
/// ```
pub fn format_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%Y%m%d_%H%M").to_string()
}

/// Formats an instant for display (`YYYY-MM-DD HH:mm`).
pub fn format_display<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%Y-%m-%d %H:%M").to_string()
}

/// Returns `at` shifted by a (possibly fractional) number of hours.
///
/// The offset is applied at millisecond precision. Results past the
/// representable range clamp to [`DateTime::<Utc>::MAX_UTC`] (or `MIN_UTC`
/// for negative offsets); use [`checked_add_hours`] to detect that case.
pub fn add_hours(at: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
    checked_add_hours(at, hours).unwrap_or(if hours < 0.0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Returns `at` shifted by `hours`, or `None` if the offset is not finite or
/// the result does not fit in a [`DateTime`].
///
/// ## Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use prompt_queue_lib::time::checked_add_hours;
///
/// let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
/// assert!(checked_add_hours(at, 2.5).is_some());
/// assert!(checked_add_hours(at, 1e12).is_none());
/// ```
pub fn checked_add_hours(at: DateTime<Utc>, hours: f64) -> Option<DateTime<Utc>> {
    let millis = (hours * 3_600_000.0).round();
    #[allow(clippy::cast_precision_loss)]
    let limit = i64::MAX as f64;
    if !millis.is_finite() || millis.abs() >= limit {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let delta = ChronoDuration::try_milliseconds(millis as i64)?;
    at.checked_add_signed(delta)
}

/// Start of the five-hour look-back window ending at `now`.
pub fn five_hour_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - ChronoDuration::hours(FIVE_HOUR_WINDOW_HOURS)
}

/// Start of the seven-day look-back window ending at `now`.
pub fn seven_day_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - ChronoDuration::days(SEVEN_DAY_WINDOW_DAYS)
}

/// Lists every calendar date (`YYYY-MM-DD`) touched by `[from, to]`.
///
/// Both endpoints' days are included. Days are taken from the calendar of
/// the supplied time zone. Returns an empty list when `from` is after `to`.
///
/// ## Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use prompt_queue_lib::time::dates_in_range;
///
/// let from = Utc.with_ymd_and_hms(2025, 1, 30, 23, 0, 0).unwrap();
/// let to = Utc.with_ymd_and_hms(2025, 2, 1, 1, 0, 0).unwrap();
/// assert_eq!(
///     dates_in_range(&from, &to),
///     vec!["2025-01-30", "2025-01-31", "2025-02-01"]
/// );
/// ```
pub fn dates_in_range<Tz: TimeZone>(from: &DateTime<Tz>, to: &DateTime<Tz>) -> Vec<String> {
    if from > to {
        return Vec::new();
    }

    let last = to.date_naive();
    from.date_naive()
        .iter_days()
        .take_while(|day| *day <= last)
        .map(|day| day.format("%Y-%m-%d").to_string())
        .collect()
}

/// Returns true when `not_before` has been reached.
///
/// The boundary is inclusive: an item whose `not_before` equals `now` is
/// overdue.
pub fn is_overdue(not_before: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    not_before <= now
}
