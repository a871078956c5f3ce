use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::config::EngineConfig;
use crate::engine::{EngineError, PolicyViolation};
use crate::model::{Booking, SpaceType, Span, TimeOfDay};

/// Parse "HH:MM" bounds into a non-empty half-open span.
pub fn parse_span(start: &str, end: &str) -> Result<Span, EngineError> {
    let start: TimeOfDay = start.parse()?;
    let end: TimeOfDay = end.parse()?;
    Span::checked(start, end).ok_or(EngineError::OutOfPolicyWindow(PolicyViolation::InvalidInterval { start, end }))
}

/// Date window, operating day, operating hours and duration bounds.
pub fn validate_schedule(
    config: &EngineConfig,
    date: NaiveDate,
    span: &Span,
    now: NaiveDateTime,
) -> Result<(), PolicyViolation> {
    let today = now.date();
    if date < today {
        return Err(PolicyViolation::DateInPast { date, today });
    }
    if span.end.on(date) <= now {
        return Err(PolicyViolation::SlotEnded { date, end: span.end });
    }
    if date > today + Duration::days(i64::from(config.advance_booking_days)) {
        return Err(PolicyViolation::BeyondAdvanceWindow {
            date,
            max_days: config.advance_booking_days,
        });
    }
    if !config.operating_days.contains(&date.weekday()) {
        return Err(PolicyViolation::NonOperatingDay(date.weekday()));
    }
    let hours = config.operating_hours;
    let inside = hours.as_span().is_some_and(|open| open.contains_span(span));
    if !inside {
        return Err(PolicyViolation::OutsideOperatingHours {
            open: hours.open,
            close: hours.close,
        });
    }
    let minutes = span.duration_minutes();
    if minutes < config.min_duration_minutes {
        return Err(PolicyViolation::DurationTooShort {
            minutes,
            min: config.min_duration_minutes,
        });
    }
    if minutes > config.max_duration_minutes {
        return Err(PolicyViolation::DurationTooLong {
            minutes,
            max: config.max_duration_minutes,
        });
    }
    Ok(())
}

pub fn validate_capacity(config: &EngineConfig, space_type: SpaceType, requested: u32) -> Result<(), PolicyViolation> {
    let max = config.space(space_type).max_capacity;
    if requested == 0 || requested > max {
        return Err(PolicyViolation::CapacityOutOfRange { requested, max });
    }
    Ok(())
}

/// `[start - opens_before, end)` for the booking's date.
pub fn check_in_window(config: &EngineConfig, booking: &Booking) -> (NaiveDateTime, NaiveDateTime) {
    let opens_at = booking.starts_at() - Duration::minutes(i64::from(config.checkin_opens_before_minutes));
    (opens_at, booking.ends_at())
}

pub fn validate_text(value: Option<&str>, max_len: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max_len => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}
