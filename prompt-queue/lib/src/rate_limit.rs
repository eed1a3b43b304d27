//! Rate-limit message parsing.
//!
//! Turns free-form rate-limit error text into a suggested delivery delay.
//! A fixed cascade of matchers is tried from most to least explicit and the
//! first hit wins; text that matches nothing yields `None` so the caller can
//! ask for a manual delay instead.

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use regex::{Captures, Regex};
use serde::Serialize;

use crate::parse::next_occurrence_at;
use crate::time::checked_add_hours;

/// Delay added to every computed reset time, in hours (5 minutes).
pub const SAFETY_BUFFER_HOURS: f64 = 5.0 / 60.0;

/// How explicit the matched pattern was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// The text named a reset or retry time outright.
    High,
    /// The match is plausible but could be incidental.
    Medium,
    /// Weak signal.
    Low,
}

impl Confidence {
    /// Lowercase label used in logs and CLI output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Result of a successful parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// Suggested delay in hours, safety buffer included, one decimal place.
    pub delay_hours: f64,
    /// Absolute reset instant.
    ///
    /// For clock-time matches this is the named time itself; for relative
    /// durations it is `now + delay_hours` (buffer included).
    pub reset_at: Option<DateTime<Utc>>,
    /// The portion of the input that matched.
    pub raw_match: String,
    /// How explicit the match was.
    pub confidence: Confidence,
}

static RESET_AT_CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:resets?|available|try\s+again|retry)\b.*?\bat\s+(\d{1,2}):(\d{2})(?::(\d{2}))?\s*([ap]\.?m\.?)?",
    )
    .expect("reset clock regex")
});

static BARE_AT_CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bat\s+(\d{1,2}):(\d{2})\s*([ap]\.?m\.?)?").expect("bare clock regex")
});

static HOURS_AND_MINUTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d+)\s*(?:hours?|hrs?|h)\s*(?:and\s+)?(\d+)\s*(?:minutes?|mins?|m)\b",
    )
    .expect("hours and minutes regex")
});

static PREPOSITION_HOURS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:in|after|for)\s+(\d+(?:\.\d+)?)\s*(?:hours?|hrs?|h)\b")
        .expect("hours regex")
});

static BARE_HOURS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*hours?\b").expect("bare hours regex")
});

static PREPOSITION_MINUTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:in|after|for)\s+(\d+)\s*(?:minutes?|mins?|m)\b").expect("minutes regex")
});

static PREPOSITION_SECONDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:in|after|for)\s+(\d+)\s*(?:seconds?|secs?|s)\b").expect("seconds regex")
});

/// Parses rate-limit text relative to the current local time.
///
/// ## Examples
///
/// ```
/// use prompt_queue_lib::{parse_rate_limit_message, Confidence};
///
/// let info = parse_rate_limit_message("Rate limit exceeded. Try again in 4h 30m.").unwrap();
/// assert_eq!(info.confidence, Confidence::High);
/// assert!(info.delay_hours > 4.5 && info.delay_hours <= 5.0);
///
/// assert!(parse_rate_limit_message("Everything is fine.").is_none());
/// ```
pub fn parse_rate_limit_message(text: &str) -> Option<RateLimitInfo> {
    parse_rate_limit_message_at(text, &Local::now())
}

/// Parses rate-limit text relative to `now`.
///
/// Clock times are interpreted on the calendar of `now`'s time zone.
pub fn parse_rate_limit_message_at<Tz: TimeZone>(
    text: &str,
    now: &DateTime<Tz>,
) -> Option<RateLimitInfo> {
    match_clock(&RESET_AT_CLOCK, text, now, Confidence::High)
        .or_else(|| match_clock(&BARE_AT_CLOCK, text, now, Confidence::Medium))
        .or_else(|| {
            match_duration(&HOURS_AND_MINUTES, text, now, Confidence::High, |caps| {
                Some(number(caps, 1)? + number(caps, 2)? / 60.0)
            })
        })
        .or_else(|| {
            match_duration(&PREPOSITION_HOURS, text, now, Confidence::High, |caps| {
                number(caps, 1)
            })
        })
        .or_else(|| {
            match_duration(&BARE_HOURS, text, now, Confidence::Medium, |caps| {
                number(caps, 1)
            })
        })
        .or_else(|| {
            match_duration(&PREPOSITION_MINUTES, text, now, Confidence::High, |caps| {
                Some(number(caps, 1)? / 60.0)
            })
        })
        .or_else(|| {
            match_duration(&PREPOSITION_SECONDS, text, now, Confidence::Medium, |caps| {
                Some(number(caps, 1)? / 3600.0)
            })
        })
}

/// Convenience accessor returning only the suggested delay in hours.
pub fn parse_rate_limit_delay(text: &str) -> Option<f64> {
    parse_rate_limit_message(text).map(|info| info.delay_hours)
}

/// Adds the safety buffer and rounds to one decimal place.
fn buffered(hours: f64) -> f64 {
    ((hours + SAFETY_BUFFER_HOURS) * 10.0).round() / 10.0
}

fn number(caps: &Captures<'_>, group: usize) -> Option<f64> {
    caps.get(group)?.as_str().parse().ok()
}

fn match_duration<Tz: TimeZone>(
    pattern: &Regex,
    text: &str,
    now: &DateTime<Tz>,
    confidence: Confidence,
    hours: impl Fn(&Captures<'_>) -> Option<f64>,
) -> Option<RateLimitInfo> {
    let caps = pattern.captures(text)?;
    let delay_hours = buffered(hours(&caps)?);
    // Delays that push the reset past the calendar range count as no match.
    let reset_at = checked_add_hours(now.with_timezone(&Utc), delay_hours)?;

    Some(RateLimitInfo {
        delay_hours,
        reset_at: Some(reset_at),
        raw_match: caps[0].to_string(),
        confidence,
    })
}

fn match_clock<Tz: TimeZone>(
    pattern: &Regex,
    text: &str,
    now: &DateTime<Tz>,
    confidence: Confidence,
) -> Option<RateLimitInfo> {
    let caps = pattern.captures(text)?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    let meridiem = caps
        .iter()
        .skip(3)
        .flatten()
        .map(|m| m.as_str())
        .find(|s| s.to_ascii_lowercase().starts_with(['a', 'p']));

    let time = clock_time(hour, minute, meridiem)?;
    let reset_at = next_occurrence_at(time, now)?;
    let millis = (reset_at - now.with_timezone(&Utc)).num_milliseconds();
    #[allow(clippy::cast_precision_loss)]
    let hours_until = millis as f64 / 3_600_000.0;

    Some(RateLimitInfo {
        delay_hours: buffered(hours_until),
        reset_at: Some(reset_at),
        raw_match: caps[0].trim_end().to_string(),
        confidence,
    })
}

/// Normalizes an `hour:minute [am|pm]` triple to a 24-hour time.
///
/// PM adds twelve hours unless the hour is already 12; AM maps 12 to 0.
fn clock_time(hour: u32, minute: u32, meridiem: Option<&str>) -> Option<NaiveTime> {
    let hour = match meridiem.map(|m| m.to_ascii_lowercase()) {
        Some(m) if m.starts_with('p') => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if hour == 12 { 12 } else { hour + 12 }
        }
        Some(_) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if hour == 12 { 0 } else { hour }
        }
        None => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}
