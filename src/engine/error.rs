use chrono::{NaiveDate, NaiveDateTime, Weekday};
use serde::Serialize;
use ulid::Ulid;

use crate::journal::FrameError;
use crate::model::{Action, Amount, BookingStatus, OverrideFlag, ParseTimeError, PaymentStatus, TimeOfDay};

/// Why a schedule or occupancy request falls outside configured policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    MalformedTime(String),
    InvalidInterval { start: TimeOfDay, end: TimeOfDay },
    DateInPast { date: NaiveDate, today: NaiveDate },
    SlotEnded { date: NaiveDate, end: TimeOfDay },
    BeyondAdvanceWindow { date: NaiveDate, max_days: u32 },
    NonOperatingDay(Weekday),
    OutsideOperatingHours { open: TimeOfDay, close: TimeOfDay },
    DurationTooShort { minutes: u32, min: u32 },
    DurationTooLong { minutes: u32, max: u32 },
    OutsideCheckInWindow { opens_at: NaiveDateTime, closes_at: NaiveDateTime },
    CapacityOutOfRange { requested: u32, max: u32 },
    AttendeesAboveBooked { attendees: u32, booked: u32 },
    AttendeesAboveSpaceMax { attendees: u32, max: u32 },
}

impl PolicyViolation {
    pub fn reason_code(&self) -> &'static str {
        match self {
            PolicyViolation::MalformedTime(_) => "malformed_time",
            PolicyViolation::InvalidInterval { .. } => "invalid_interval",
            PolicyViolation::DateInPast { .. } => "date_in_past",
            PolicyViolation::SlotEnded { .. } => "slot_ended",
            PolicyViolation::BeyondAdvanceWindow { .. } => "beyond_advance_window",
            PolicyViolation::NonOperatingDay(_) => "non_operating_day",
            PolicyViolation::OutsideOperatingHours { .. } => "outside_operating_hours",
            PolicyViolation::DurationTooShort { .. } => "duration_too_short",
            PolicyViolation::DurationTooLong { .. } => "duration_too_long",
            PolicyViolation::OutsideCheckInWindow { .. } => "outside_check_in_window",
            PolicyViolation::CapacityOutOfRange { .. } => "capacity_out_of_range",
            PolicyViolation::AttendeesAboveBooked { .. } => "attendees_above_booked",
            PolicyViolation::AttendeesAboveSpaceMax { .. } => "attendees_above_space_max",
        }
    }
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::MalformedTime(raw) => write!(f, "malformed time {raw:?}, expected HH:MM"),
            PolicyViolation::InvalidInterval { start, end } => {
                write!(f, "start {start} must be before end {end}")
            }
            PolicyViolation::DateInPast { date, today } => write!(f, "{date} is before today ({today})"),
            PolicyViolation::SlotEnded { date, end } => write!(f, "slot ending {date} {end} is already over"),
            PolicyViolation::BeyondAdvanceWindow { date, max_days } => {
                write!(f, "{date} is more than {max_days} days ahead")
            }
            PolicyViolation::NonOperatingDay(day) => write!(f, "{day} is not an operating day"),
            PolicyViolation::OutsideOperatingHours { open, close } => {
                write!(f, "outside operating hours {open}-{close}")
            }
            PolicyViolation::DurationTooShort { minutes, min } => {
                write!(f, "duration {minutes}min below minimum {min}min")
            }
            PolicyViolation::DurationTooLong { minutes, max } => {
                write!(f, "duration {minutes}min above maximum {max}min")
            }
            PolicyViolation::OutsideCheckInWindow { opens_at, closes_at } => {
                write!(f, "check-in window is {opens_at} to {closes_at}")
            }
            PolicyViolation::CapacityOutOfRange { requested, max } => {
                write!(f, "capacity {requested} outside 1..={max}")
            }
            PolicyViolation::AttendeesAboveBooked { attendees, booked } => {
                write!(f, "{attendees} attendees exceed booked capacity {booked}")
            }
            PolicyViolation::AttendeesAboveSpaceMax { attendees, max } => {
                write!(f, "{attendees} attendees exceed space maximum {max}")
            }
        }
    }
}

/// Coarse error category exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    CapacityExceeded,
    PaymentNotConfirmed,
    OutOfPolicyWindow,
    NegativeTotal,
    LimitExceeded,
    MalformedRequest,
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    NumberNotFound(String),
    InvalidTransition {
        from: BookingStatus,
        action: Action,
        requested: BookingStatus,
        legal: Vec<BookingStatus>,
    },
    CapacityExceeded {
        requested: u32,
        remaining: u32,
        max: u32,
    },
    PaymentNotConfirmed(PaymentStatus),
    OutOfPolicyWindow(PolicyViolation),
    NegativeTotal(Amount),
    LimitExceeded(&'static str),
    JournalUnavailable(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) | EngineError::NumberNotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            EngineError::PaymentNotConfirmed(_) => ErrorKind::PaymentNotConfirmed,
            EngineError::OutOfPolicyWindow(_) => ErrorKind::OutOfPolicyWindow,
            EngineError::NegativeTotal(_) => ErrorKind::NegativeTotal,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::JournalUnavailable(_) => ErrorKind::Infrastructure,
        }
    }

    /// Machine-readable reason, finer than [`ErrorKind`] for policy failures.
    pub fn reason_code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) | EngineError::NumberNotFound(_) => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::PaymentNotConfirmed(_) => "payment_not_confirmed",
            EngineError::OutOfPolicyWindow(v) => v.reason_code(),
            EngineError::NegativeTotal(_) => "negative_total",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::JournalUnavailable(_) => "journal_unavailable",
        }
    }

    /// The override flag that would let the same request through, if any.
    pub fn bypass(&self) -> Option<OverrideFlag> {
        match self {
            EngineError::CapacityExceeded { .. }
            | EngineError::OutOfPolicyWindow(PolicyViolation::AttendeesAboveBooked { .. }) => {
                Some(OverrideFlag::Capacity)
            }
            EngineError::PaymentNotConfirmed(_) => Some(OverrideFlag::Payment),
            EngineError::OutOfPolicyWindow(PolicyViolation::OutsideCheckInWindow { .. }) => {
                Some(OverrideFlag::Timing)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::NumberNotFound(n) => write!(f, "booking number not found: {n}"),
            EngineError::InvalidTransition {
                from,
                action,
                requested,
                legal,
            } => {
                let legal: Vec<&str> = legal.iter().map(|s| s.as_str()).collect();
                write!(
                    f,
                    "cannot {action} a {from} booking (requested {requested}); legal next states: [{}]",
                    legal.join(", ")
                )
            }
            EngineError::CapacityExceeded {
                requested,
                remaining,
                max,
            } => write!(
                f,
                "capacity exceeded: requested {requested}, remaining {remaining} of {max}"
            ),
            EngineError::PaymentNotConfirmed(status) => {
                write!(f, "payment not confirmed (payment status {status})")
            }
            EngineError::OutOfPolicyWindow(v) => write!(f, "out of policy window: {v}"),
            EngineError::NegativeTotal(total) => write!(f, "computed amount would be negative: {total}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::JournalUnavailable(e) => write!(f, "journal unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<PolicyViolation> for EngineError {
    fn from(v: PolicyViolation) -> Self {
        EngineError::OutOfPolicyWindow(v)
    }
}

impl From<FrameError> for EngineError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::TooLarge(_) => EngineError::LimitExceeded("booking record too large to journal"),
            FrameError::Encode(e) => EngineError::JournalUnavailable(e.to_string()),
        }
    }
}

impl From<ParseTimeError> for EngineError {
    fn from(e: ParseTimeError) -> Self {
        EngineError::OutOfPolicyWindow(PolicyViolation::MalformedTime(e.0))
    }
}
