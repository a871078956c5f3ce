use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Money in minor units of the configured currency.
pub type Amount = i64;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Wall-clock time of day as minutes since midnight. "HH:MM" at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const fn from_minutes(minutes: u16) -> Option<Self> {
        if minutes < MINUTES_PER_DAY {
            Some(Self(minutes))
        } else {
            None
        }
    }

    /// Build from hour and minute. Out-of-range input saturates to 23:59.
    pub const fn hm(hour: u16, minute: u16) -> Self {
        let m = hour * 60 + minute;
        if m < MINUTES_PER_DAY {
            Self(m)
        } else {
            Self(MINUTES_PER_DAY - 1)
        }
    }

    pub const fn minutes(self) -> u16 {
        self.0
    }

    /// Anchor this time of day on a calendar date.
    pub fn on(self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::default()) + Duration::minutes(i64::from(self.0))
    }

    pub fn checked_add(self, minutes: u32) -> Option<Self> {
        let m = u32::from(self.0).checked_add(minutes)?;
        u16::try_from(m).ok().and_then(Self::from_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(pub String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed time of day {:?}, expected HH:MM", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for TimeOfDay {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(err());
        }
        let hour: u16 = h.parse().map_err(|_| err())?;
        let minute: u16 = m.parse().map_err(|_| err())?;
        if hour > 23 || minute > 59 {
            return Err(err());
        }
        Ok(Self(hour * 60 + minute))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Span {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` for zero-length or inverted input.
    pub fn checked(start: TimeOfDay, end: TimeOfDay) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_minutes(&self) -> u32 {
        u32::from(self.end.minutes() - self.start.minutes())
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    PrivateOffice,
    SharedDesk,
    MeetingRoom,
    WorkshopSpace,
    ConferenceRoom,
    Studio,
}

impl SpaceType {
    pub const ALL: [SpaceType; 6] = [
        SpaceType::PrivateOffice,
        SpaceType::SharedDesk,
        SpaceType::MeetingRoom,
        SpaceType::WorkshopSpace,
        SpaceType::ConferenceRoom,
        SpaceType::Studio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SpaceType::PrivateOffice => "private_office",
            SpaceType::SharedDesk => "shared_desk",
            SpaceType::MeetingRoom => "meeting_room",
            SpaceType::WorkshopSpace => "workshop_space",
            SpaceType::ConferenceRoom => "conference_room",
            SpaceType::Studio => "studio",
        }
    }
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
    Rejected,
    NoShow,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 7] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::CheckedIn,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Rejected,
        BookingStatus::NoShow,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::Cancelled
                | BookingStatus::Rejected
                | BookingStatus::NoShow
        )
    }

    /// Statuses that count against a space's capacity. `Pending` never does.
    pub fn holds_capacity(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::CheckedIn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    PartialRefund,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartialRefund => "partial_refund",
            PaymentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle actions a caller can request on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Approve,
    Reject,
    Cancel,
    CheckIn,
    CheckOut,
    NoShow,
    Update,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Create,
        Action::Approve,
        Action::Reject,
        Action::Cancel,
        Action::CheckIn,
        Action::CheckOut,
        Action::NoShow,
        Action::Update,
    ];

    /// The status this action moves a booking into, when it moves one at all.
    pub fn natural_target(self) -> Option<BookingStatus> {
        match self {
            Action::Create => Some(BookingStatus::Pending),
            Action::Approve => Some(BookingStatus::Confirmed),
            Action::Reject => Some(BookingStatus::Rejected),
            Action::Cancel => Some(BookingStatus::Cancelled),
            Action::CheckIn => Some(BookingStatus::CheckedIn),
            Action::CheckOut => Some(BookingStatus::Completed),
            Action::NoShow => Some(BookingStatus::NoShow),
            Action::Update => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Cancel => "cancel",
            Action::CheckIn => "check_in",
            Action::CheckOut => "check_out",
            Action::NoShow => "no_show",
            Action::Update => "update",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guard bypasses an operator may request. Every use lands in the audit trail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    pub payment: bool,
    pub capacity: bool,
    pub timing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideFlag {
    Payment,
    Capacity,
    Timing,
}

impl fmt::Display for OverrideFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverrideFlag::Payment => "payment",
            OverrideFlag::Capacity => "capacity",
            OverrideFlag::Timing => "timing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: NaiveDateTime,
    pub actor: String,
    pub action: String,
    pub details: Option<String>,
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.at.format("%Y-%m-%d %H:%M"), self.actor, self.action)?;
        if let Some(d) = &self.details {
            write!(f, " ({d})")?;
        }
        Ok(())
    }
}

/// Price as agreed at booking time (or last update).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub hourly_rate: Amount,
    pub base_price: Amount,
    pub weekend_discount: Amount,
    pub extra_discount: Amount,
    /// `weekend_discount + extra_discount`.
    pub discount_amount: Amount,
    pub additional_services_cost: Amount,
    pub total_price: Amount,
}

/// Money computed after the booking leaves the happy path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub cancellation_fee: Amount,
    pub refund_amount: Amount,
    pub overtime_charge: Amount,
    pub damage_charge: Amount,
    pub cleaning_charge: Amount,
    pub additional_charge: Amount,
    pub early_checkout_refund: Amount,
    pub net_additional_amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub booking_number: String,
    pub customer_id: String,
    pub contact: Contact,

    pub space_type: SpaceType,
    pub space_name: Option<String>,
    pub location: Option<String>,

    pub date: NaiveDate,
    pub span: Span,
    pub capacity_requested: u32,
    pub actual_attendees: Option<u32>,

    pub status: BookingStatus,
    pub payment_status: PaymentStatus,

    pub currency: String,
    pub price: PriceBreakdown,
    pub settlement: Settlement,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub updated_by: String,
    pub audit: Vec<AuditEntry>,
    pub admin_notes: Option<String>,
    pub internal_notes: Option<String>,

    pub approved_at: Option<NaiveDateTime>,
    pub approved_by: Option<String>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub checked_in_at: Option<NaiveDateTime>,
    pub checked_in_by: Option<String>,
    pub verification_method: Option<String>,
    pub checked_out_at: Option<NaiveDateTime>,
    pub actual_duration_minutes: Option<u32>,
}

impl Booking {
    pub fn ledger_key(&self) -> LedgerKey {
        (self.space_type, self.date)
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.span.start.on(self.date)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.span.end.on(self.date)
    }

    pub fn duration_minutes(&self) -> u32 {
        self.span.duration_minutes()
    }

    pub fn holds_capacity(&self) -> bool {
        self.status.holds_capacity()
    }

    /// Amount actually collected from the customer, the base for any refund.
    pub fn total_paid(&self) -> Amount {
        if self.payment_status == PaymentStatus::Paid {
            self.price.total_price
        } else {
            0
        }
    }

    /// Append to the audit trail and stamp `updated_at`/`updated_by`.
    pub fn record(&mut self, at: NaiveDateTime, actor: &str, action: impl Into<String>, details: Option<String>) {
        self.audit.push(AuditEntry {
            at,
            actor: actor.to_string(),
            action: action.into(),
            details,
        });
        self.updated_at = at;
        self.updated_by = actor.to_string();
    }

    /// Newline-delimited rendering of the audit trail.
    pub fn audit_text(&self) -> String {
        self.audit
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Numeric suffix of the booking number, used to restore the sequence on replay.
    pub fn sequence(&self) -> Option<u64> {
        self.booking_number.rsplit('-').next()?.parse().ok()
    }
}

pub type LedgerKey = (SpaceType, NaiveDate);

/// All bookings of one space type on one date, sorted by `span.start`.
/// This is the unit of locking for capacity-affecting transitions.
#[derive(Debug, Clone)]
pub struct DayLedger {
    pub space_type: SpaceType,
    pub date: NaiveDate,
    pub bookings: Vec<Booking>,
}

impl DayLedger {
    pub fn new((space_type, date): LedgerKey) -> Self {
        Self {
            space_type,
            date,
            bookings: Vec::new(),
        }
    }

    pub fn key(&self) -> LedgerKey {
        (self.space_type, self.date)
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Insert or replace a booking, maintaining sort order by span.start.
    pub fn upsert(&mut self, booking: Booking) {
        self.remove(booking.id);
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings whose span overlaps the query, of any status.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// Journal record: the full booking snapshot after each committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Created(Box<Booking>),
    Transitioned { action: Action, booking: Box<Booking> },
    /// Written by compaction; replays exactly like any other snapshot.
    Compacted(Box<Booking>),
}

impl Event {
    pub fn booking(&self) -> &Booking {
        match self {
            Event::Created(b) | Event::Compacted(b) => b,
            Event::Transitioned { booking, .. } => booking,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyTemplate {
    BookingCreated,
    BookingApproved,
    BookingRejected,
    BookingCancelled,
    BookingUpdated,
    CheckedIn,
    CheckedOut,
    NoShow,
}

/// Work an external collaborator must perform after a committed transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    IssueRefund {
        customer_id: String,
        amount: Amount,
        currency: String,
        reference: String,
    },
    CollectCharge {
        customer_id: String,
        amount: Amount,
        currency: String,
        reference: String,
    },
    ReleaseCapacity {
        space_type: SpaceType,
        date: NaiveDate,
        span: Span,
        amount: u32,
    },
    Notify {
        template: NotifyTemplate,
        recipient: String,
        payload: serde_json::Value,
    },
}

/// Snapshot plus intents: what every successful mutation returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub booking: Booking,
    pub intents: Vec<Intent>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictingBooking {
    pub id: Ulid,
    pub booking_number: String,
    pub span: Span,
    pub capacity: u32,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityReport {
    pub available: bool,
    pub max_capacity: u32,
    pub committed_capacity: u32,
    pub remaining_capacity: u32,
    pub conflicting_bookings: Vec<ConflictingBooking>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpenSlot {
    pub span: Span,
    pub remaining_capacity: u32,
}
