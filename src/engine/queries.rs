use chrono::NaiveDate;
use ulid::Ulid;

use crate::lifecycle::{ensure_transition, refund_for};
use crate::model::*;
use crate::policy::{parse_span, validate_capacity, validate_schedule};
use crate::pricing::{self, PriceQuote};
use crate::refund::{RefundOutcome, RefundRequest};

use super::availability::{check_capacity, open_slots};
use super::{Engine, EngineError, PolicyViolation};

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        for _ in 0..3 {
            let key = self.index.get(&id).map(|e| *e.value()).ok_or(EngineError::NotFound(id))?;
            let Some(ledger) = self.existing_ledger(&key) else {
                break;
            };
            if let Some(b) = ledger.read().await.get(id) {
                return Ok(b.clone());
            }
        }
        Err(EngineError::NotFound(id))
    }

    pub async fn get_by_number(&self, number: &str) -> Result<Booking, EngineError> {
        let id = self
            .numbers
            .get(number)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::NumberNotFound(number.to_string()))?;
        self.get_booking(id).await
    }

    /// Every booking of one space type on one date, any status, by start time.
    pub async fn list_bookings(&self, space_type: SpaceType, date: NaiveDate) -> Vec<Booking> {
        match self.existing_ledger(&(space_type, date)) {
            Some(ledger) => ledger.read().await.bookings.clone(),
            None => Vec::new(),
        }
    }

    pub async fn check_availability(
        &self,
        space_type: SpaceType,
        date: NaiveDate,
        start: &str,
        end: &str,
        needed: u32,
    ) -> Result<AvailabilityReport, EngineError> {
        let span = parse_span(start, end)?;
        validate_capacity(&self.config, space_type, needed)?;
        let max = self.config.space(space_type).max_capacity;
        Ok(match self.existing_ledger(&(space_type, date)) {
            Some(ledger) => check_capacity(Some(&*ledger.read().await), max, &span, needed, None),
            None => check_capacity(None, max, &span, needed, None),
        })
    }

    /// Slots that could be booked right now. Advisory: nothing is reserved.
    pub async fn find_open_slots(
        &self,
        space_type: SpaceType,
        date: NaiveDate,
        duration_minutes: u32,
        needed: u32,
    ) -> Result<Vec<OpenSlot>, EngineError> {
        validate_capacity(&self.config, space_type, needed)?;
        if duration_minutes < self.config.min_duration_minutes {
            return Err(PolicyViolation::DurationTooShort {
                minutes: duration_minutes,
                min: self.config.min_duration_minutes,
            }
            .into());
        }
        if duration_minutes > self.config.max_duration_minutes {
            return Err(PolicyViolation::DurationTooLong {
                minutes: duration_minutes,
                max: self.config.max_duration_minutes,
            }
            .into());
        }

        let now = self.now();
        let mut slots = match self.existing_ledger(&(space_type, date)) {
            Some(ledger) => open_slots(Some(&*ledger.read().await), &self.config, space_type, duration_minutes, needed),
            None => open_slots(None, &self.config, space_type, duration_minutes, needed),
        };
        slots.retain(|slot| {
            validate_schedule(&self.config, date, &slot.span, now).is_ok() && slot.span.start.on(date) >= now
        });
        Ok(slots)
    }

    /// What cancelling the booking now would refund. Nothing is changed.
    pub async fn quote_refund(&self, id: Ulid, request: Option<RefundRequest>) -> Result<RefundOutcome, EngineError> {
        let booking = self.get_booking(id).await?;
        ensure_transition(&booking, Action::Cancel)?;
        refund_for(&booking, &self.config, self.now(), Action::Cancel, request)
    }

    pub fn calculate_price(
        &self,
        space_type: SpaceType,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<PriceQuote, EngineError> {
        let span = parse_span(start, end)?;
        Ok(pricing::calculate_price(&self.config, space_type, date, span.duration_minutes()))
    }
}
