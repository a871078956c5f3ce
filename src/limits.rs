use crate::model::Amount;

pub const MAX_CUSTOMER_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_NOTE_LEN: usize = 4_000;
pub const MAX_REASON_LEN: usize = 1_000;
pub const MAX_ACTOR_LEN: usize = 128;
pub const MAX_BOOKINGS_PER_LEDGER: usize = 10_000;
/// Upper bound for any single caller-supplied money amount.
pub const MAX_AMOUNT: Amount = 1_000_000_000_000;
/// Upper bound for a configured hourly or daily rate.
pub const MAX_RATE: Amount = MAX_AMOUNT / 1_000;
pub const MAX_ADVANCE_BOOKING_DAYS: u32 = 3_650;
/// Upper bound on open-slot scans per query.
pub const MAX_SLOT_CANDIDATES: usize = 24 * 60;
