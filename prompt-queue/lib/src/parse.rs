//! Time and delay parsing for manually scheduled prompts.

use chrono::{DateTime, Days, Duration as ChronoDuration, Local, NaiveTime, TimeZone, Utc};

/// Parses the clock time given to `prompt-queue add --at`.
///
/// Accepts `19:30`, `19:30:15`, `7:00pm`, `7pm` and the dotted `7 p.m.`
/// spelling that rate-limit messages use. Whitespace and case are ignored.
/// The result has no date; [`next_occurrence_at`] turns it into the next
/// matching instant.
///
/// ## Errors
///
/// Returns a message suitable for clap when nothing matches.
///
/// ## Examples
///
/// ```
/// use prompt_queue_lib::parse_at_time;
/// use chrono::NaiveTime;
///
/// assert_eq!(parse_at_time("7 p.m.").unwrap(), NaiveTime::from_hms_opt(19, 0, 0).unwrap());
/// assert!(parse_at_time("25:00").is_err());
/// ```
pub fn parse_at_time(value: &str) -> Result<NaiveTime, String> {
    let compact: String = value
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '.')
        .flat_map(char::to_lowercase)
        .collect();

    if compact.is_empty() {
        return Err("time cannot be empty".to_string());
    }

    ["%H:%M", "%H:%M:%S", "%I:%M%P", "%I%P"]
        .into_iter()
        .find_map(|format| NaiveTime::parse_from_str(&compact, format).ok())
        .ok_or_else(|| format!("expected a time like 7:00am or 19:30, got {value:?}"))
}

/// Parses a delay string into a `chrono::Duration`.
///
/// A delay is one or more `<number><unit>` segments, e.g. `2h30m`.
///
/// ## Supported Units
///
/// - `s` - seconds
/// - `m` - minutes (default if no unit specified)
/// - `h` - hours
/// - `d` - days
///
/// ## Errors
///
/// Returns an error string if the delay cannot be parsed.
///
/// ## Examples
///
/// ```
/// use prompt_queue_lib::parse_delay;
/// use chrono::Duration;
///
/// let delay = parse_delay("15").unwrap();
/// assert_eq!(delay, Duration::minutes(15));
///
/// let delay = parse_delay("2h30m").unwrap();
/// assert_eq!(delay, Duration::minutes(150));
/// ```
pub fn parse_delay(value: &str) -> Result<ChronoDuration, String> {
    let normalized = value.trim().to_lowercase().replace(' ', "");

    if normalized.is_empty() {
        return Err("delay cannot be empty".to_string());
    }

    let mut rest = normalized.as_str();
    let mut total = ChronoDuration::zero();

    while !rest.is_empty() {
        let split_index = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len());
        let (amount, tail) = rest.split_at(split_index);

        if amount.is_empty() {
            return Err("delay must start with a number".to_string());
        }

        let amount: i64 = amount
            .parse()
            .map_err(|_| "delay must be a number".to_string())?;

        let unit_len = tail
            .find(|ch: char| ch.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);

        let segment = match unit {
            "" | "m" => ChronoDuration::try_minutes(amount),
            "s" => ChronoDuration::try_seconds(amount),
            "h" => ChronoDuration::try_hours(amount),
            "d" => ChronoDuration::try_days(amount),
            _ => {
                return Err("delay units must be s, m, h, or d".to_string());
            }
        }
        .ok_or_else(|| "delay is too large".to_string())?;

        total = total
            .checked_add(&segment)
            .ok_or_else(|| "delay is too large".to_string())?;
        rest = next;
    }

    if total <= ChronoDuration::zero() {
        return Err("delay must be greater than zero".to_string());
    }

    Ok(total)
}

/// Resolves a clock time to its next occurrence after the current local time.
pub fn next_occurrence(time: NaiveTime) -> Option<DateTime<Utc>> {
    next_occurrence_at(time, &Local::now())
}

/// Resolves a clock time to its next occurrence after `now`.
///
/// Today's instant at `time` is used unless it is at or before `now`, in
/// which case the same clock time one calendar day later is returned.
pub fn next_occurrence_at<Tz: TimeZone>(time: NaiveTime, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let zone = now.timezone();
    let today = now.date_naive();
    let candidate = zone.from_local_datetime(&today.and_time(time)).earliest()?;

    let resolved = if candidate <= *now {
        let tomorrow = today.checked_add_days(Days::new(1))?;
        zone.from_local_datetime(&tomorrow.and_time(time)).earliest()?
    } else {
        candidate
    };

    Some(resolved.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn parse_at_time_accepted_spellings() {
        let cases = [
            ("19:30", hms(19, 30, 0)),
            ("07:05", hms(7, 5, 0)),
            ("19:30:15", hms(19, 30, 15)),
            ("7:00am", hms(7, 0, 0)),
            ("7:00 PM", hms(19, 0, 0)),
            ("7pm", hms(19, 0, 0)),
            ("7 p.m.", hms(19, 0, 0)),
            ("12:00am", hms(0, 0, 0)),
            ("12pm", hms(12, 0, 0)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_at_time(input), Ok(expected), "{input}");
        }
    }

    #[test]
    fn parse_at_time_rejected_spellings() {
        for input in ["", "   ", "noon", "25:00", "13:00am", "7", "7:60"] {
            assert!(parse_at_time(input).is_err(), "{input}");
        }
    }

    #[test]
    fn parse_at_time_error_echoes_input() {
        let err = parse_at_time("soon").unwrap_err();
        assert!(err.contains("\"soon\""), "{err}");
    }

    #[test]
    fn parse_delay_defaults_to_minutes() {
        let delay = parse_delay("15").expect("valid delay");
        assert_eq!(delay, ChronoDuration::minutes(15));
    }

    #[test]
    fn parse_delay_supports_each_unit() {
        assert_eq!(parse_delay("10s").unwrap(), ChronoDuration::seconds(10));
        assert_eq!(parse_delay("2H").unwrap(), ChronoDuration::hours(2));
        assert_eq!(parse_delay("1d").unwrap(), ChronoDuration::days(1));
    }

    #[test]
    fn parse_delay_supports_compound_values() {
        assert_eq!(parse_delay("2h30m").unwrap(), ChronoDuration::minutes(150));
        assert_eq!(parse_delay("1d 2h").unwrap(), ChronoDuration::hours(26));
        assert_eq!(parse_delay("1m30s").unwrap(), ChronoDuration::seconds(90));
    }

    #[test]
    fn parse_delay_rejects_invalid_units() {
        assert!(parse_delay("1w").is_err());
        assert!(parse_delay("5hours").is_err());
    }

    #[test]
    fn parse_delay_rejects_zero_and_negative() {
        assert!(parse_delay("0").is_err());
        assert!(parse_delay("0s").is_err());
        assert!(parse_delay("-5").is_err());
    }

    #[test]
    fn parse_delay_rejects_overflowing_totals() {
        assert!(parse_delay("99999999999d99999999999d").is_err());
        assert!(parse_delay("99999999999999999999").is_err());
        assert_eq!(
            parse_delay("99999999999d 99999999999d").unwrap_err(),
            "delay is too large"
        );
    }

    #[test]
    fn parse_delay_rejects_empty_or_unitless_tail() {
        assert!(parse_delay("").is_err());
        assert!(parse_delay("   ").is_err());
        assert!(parse_delay("m").is_err());
        assert!(parse_delay("h").is_err());
    }

    #[test]
    fn next_occurrence_prefers_today() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let time = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        assert_eq!(
            next_occurrence_at(time, &now),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn next_occurrence_rolls_past_and_equal_times_forward() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 7, 0, 0).unwrap();
        let time = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        assert_eq!(
            next_occurrence_at(time, &now),
            Some(Utc.with_ymd_and_hms(2025, 3, 2, 7, 0, 0).unwrap())
        );

        let time = NaiveTime::from_hms_opt(6, 59, 0).unwrap();
        assert_eq!(
            next_occurrence_at(time, &now),
            Some(Utc.with_ymd_and_hms(2025, 3, 2, 6, 59, 0).unwrap())
        );
    }
}
