//! Engine configuration.
//!
//! One immutable [`EngineConfig`] is built at process start and shared by every
//! component. `Default` reproduces the operator's observed policy; a JSON file can
//! override any subset of fields.

use std::fmt;
use std::path::Path;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::checkout::CheckoutPolicy;
use crate::limits::{MAX_ADVANCE_BOOKING_DAYS, MAX_RATE};
use crate::model::{Amount, SpaceType, Span, TimeOfDay};
use crate::refund::RefundTier;

/// Whether a space's configured rate is per hour or per (8-hour) day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    Hourly,
    Daily,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSpec {
    pub display_name: String,
    pub max_capacity: u32,
    pub rate: Amount,
    pub basis: RateBasis,
}

impl SpaceSpec {
    fn new(display_name: &str, max_capacity: u32, rate: Amount, basis: RateBasis) -> Self {
        Self {
            display_name: display_name.to_string(),
            max_capacity,
            rate,
            basis,
        }
    }
}

/// One entry per space type, so a lookup can never miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceCatalog {
    pub private_office: SpaceSpec,
    pub shared_desk: SpaceSpec,
    pub meeting_room: SpaceSpec,
    pub workshop_space: SpaceSpec,
    pub conference_room: SpaceSpec,
    pub studio: SpaceSpec,
}

impl SpaceCatalog {
    pub fn get(&self, space_type: SpaceType) -> &SpaceSpec {
        match space_type {
            SpaceType::PrivateOffice => &self.private_office,
            SpaceType::SharedDesk => &self.shared_desk,
            SpaceType::MeetingRoom => &self.meeting_room,
            SpaceType::WorkshopSpace => &self.workshop_space,
            SpaceType::ConferenceRoom => &self.conference_room,
            SpaceType::Studio => &self.studio,
        }
    }

    pub fn get_mut(&mut self, space_type: SpaceType) -> &mut SpaceSpec {
        match space_type {
            SpaceType::PrivateOffice => &mut self.private_office,
            SpaceType::SharedDesk => &mut self.shared_desk,
            SpaceType::MeetingRoom => &mut self.meeting_room,
            SpaceType::WorkshopSpace => &mut self.workshop_space,
            SpaceType::ConferenceRoom => &mut self.conference_room,
            SpaceType::Studio => &mut self.studio,
        }
    }
}

impl Default for SpaceCatalog {
    fn default() -> Self {
        Self {
            private_office: SpaceSpec::new("Private office", 4, 1_200_000, RateBasis::Daily),
            shared_desk: SpaceSpec::new("Shared desk", 20, 250_000, RateBasis::Daily),
            meeting_room: SpaceSpec::new("Meeting room", 12, 30_000, RateBasis::Hourly),
            workshop_space: SpaceSpec::new("Workshop space", 30, 2_000_000, RateBasis::Daily),
            conference_room: SpaceSpec::new("Conference room", 50, 3_000_000, RateBasis::Daily),
            studio: SpaceSpec::new("Studio", 6, 850_000, RateBasis::Daily),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub open: TimeOfDay,
    pub close: TimeOfDay,
}

impl OperatingHours {
    pub fn as_span(&self) -> Option<Span> {
        Span::checked(self.open, self.close)
    }
}

/// Refund rule for cancelling a booking that has already checked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckedInRefund {
    /// Same modes and tiers as any other cancellation; the automatic tier sees a
    /// negative time-to-event and lands in the lowest bucket.
    SameSchedule,
    /// Never refund once occupancy started, whatever mode the caller asks for.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub currency: String,
    pub spaces: SpaceCatalog,
    pub operating_hours: OperatingHours,
    pub operating_days: Vec<Weekday>,
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub advance_booking_days: u32,
    /// Check-in opens this many minutes before start and closes at the booking end.
    pub checkin_opens_before_minutes: u32,
    pub weekend_days: Vec<Weekday>,
    pub weekend_discount_percent: u8,
    pub refund_tiers: Vec<RefundTier>,
    pub checkout: CheckoutPolicy,
    pub slot_step_minutes: u32,
    pub checked_in_refund: CheckedInRefund,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "IRR".to_string(),
            spaces: SpaceCatalog::default(),
            operating_hours: OperatingHours {
                open: TimeOfDay::hm(8, 0),
                close: TimeOfDay::hm(22, 0),
            },
            operating_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ],
            min_duration_minutes: 60,
            max_duration_minutes: 12 * 60,
            advance_booking_days: 90,
            checkin_opens_before_minutes: 30,
            weekend_days: vec![Weekday::Sat, Weekday::Sun],
            weekend_discount_percent: 10,
            refund_tiers: RefundTier::observed_schedule(),
            checkout: CheckoutPolicy::default(),
            slot_step_minutes: 30,
            checked_in_refund: CheckedInRefund::SameSchedule,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {e}"),
            ConfigError::Parse(e) => write!(f, "cannot parse config: {e}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json(&text)
    }

    pub fn space(&self, space_type: SpaceType) -> &SpaceSpec {
        self.spaces.get(space_type)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.operating_hours.as_span().is_none() {
            return invalid("operating hours must open before they close".into());
        }
        if self.min_duration_minutes == 0 || self.min_duration_minutes > self.max_duration_minutes {
            return invalid(format!(
                "duration bounds [{}, {}] are not a valid range",
                self.min_duration_minutes, self.max_duration_minutes
            ));
        }
        if self.max_duration_minutes > 24 * 60 || self.checkin_opens_before_minutes > 24 * 60 {
            return invalid("durations and the check-in lead time must fit in a day".into());
        }
        if self.advance_booking_days > MAX_ADVANCE_BOOKING_DAYS {
            return invalid(format!("advance_booking_days above {MAX_ADVANCE_BOOKING_DAYS}"));
        }
        if self.slot_step_minutes == 0 {
            return invalid("slot_step_minutes must be positive".into());
        }
        if self.weekend_discount_percent > 100 {
            return invalid("weekend_discount_percent above 100".into());
        }
        for space_type in SpaceType::ALL {
            let spec = self.space(space_type);
            if spec.max_capacity == 0 {
                return invalid(format!("{space_type} has zero capacity"));
            }
            if spec.rate < 0 {
                return invalid(format!("{space_type} has a negative rate"));
            }
            if spec.rate > MAX_RATE {
                return invalid(format!("{space_type} rate above {MAX_RATE}"));
            }
        }
        for tier in &self.refund_tiers {
            if tier.percent > 100 {
                return invalid(format!("refund tier at {}h pays {}%", tier.min_hours, tier.percent));
            }
        }
        // Percentages must not drop as the notice period grows.
        let mut tiers = self.refund_tiers.clone();
        tiers.sort_by_key(|t| t.min_hours);
        if tiers.windows(2).any(|w| w[0].percent > w[1].percent) {
            return invalid("refund tiers must be non-decreasing in hours".into());
        }
        self.checkout.validate().map_err(ConfigError::Invalid)
    }
}
