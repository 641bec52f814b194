//! Schedule parsing and validation
//!
//! Turns user input into the instant a post should go out. Executing the
//! schedule belongs to whatever job runner the host application uses; this
//! module only produces and checks the instant.

use chrono::{DateTime, Duration, Utc};

use crate::{CrosspostError, Result};

/// Parse a schedule string relative to the current time
///
/// Accepts, in order of precedence:
/// - RFC 3339 timestamps: "2030-05-01T09:00:00Z"
/// - Durations: "30m", "2h", "1 hour", "1d"
/// - Natural language: "tomorrow", "next friday 10am"
///
/// # Errors
///
/// Returns `InvalidInput` when the input cannot be parsed or does not lie
/// strictly in the future.
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    parse_schedule_at(input, Utc::now())
}

/// [`parse_schedule`] with an explicit "now"
pub fn parse_schedule_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CrosspostError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    let at = if let Ok(absolute) = DateTime::parse_from_rfc3339(input) {
        absolute.with_timezone(&Utc)
    } else if let Some(duration) = parse_duration(input) {
        now + duration
    } else {
        chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
            CrosspostError::InvalidInput(format!("Could not parse schedule '{}': {}", input, e))
        })?
    };

    validate_future(at, now)?;
    Ok(at)
}

/// A schedule instant must lie strictly after `now`
pub fn validate_future(at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if at <= now {
        return Err(CrosspostError::InvalidInput(format!(
            "Scheduled time must be in the future (got {})",
            at.to_rfc3339()
        )));
    }
    Ok(())
}

fn parse_duration(input: &str) -> Option<Duration> {
    let std_duration = humantime::parse_duration(input).ok()?;
    Duration::from_std(std_duration).ok()
}
