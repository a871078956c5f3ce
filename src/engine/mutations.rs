use tracing::{info, warn};
use ulid::Ulid;

use crate::lifecycle::{self, Approval, BookingUpdate, Cancellation, CheckIn, CheckOut, Ctx, NewBooking};
use crate::limits::MAX_BOOKINGS_PER_LEDGER;
use crate::model::*;
use crate::policy::{parse_span, validate_schedule};

use super::availability::check_capacity;
use super::{Engine, EngineError};

fn note_rejection(space_type: SpaceType, action: Action, err: &EngineError) {
    if let EngineError::CapacityExceeded { requested, remaining, max } = err {
        metrics::counter!(crate::observability::CAPACITY_REJECTIONS_TOTAL, "space_type" => space_type.as_str())
            .increment(1);
        warn!(%space_type, %action, requested, remaining, max, "capacity exceeded");
    }
}

impl Engine {
    pub async fn create_booking(&self, req: NewBooking, actor: &str) -> Result<Outcome, EngineError> {
        Self::validate_actor(actor)?;
        // Reject schedules that can never be booked before a ledger is allocated for them.
        let span = parse_span(&req.start, &req.end)?;
        validate_schedule(&self.config, req.date, &span, self.now())?;

        let _pause = self.compaction.read().await;
        let key = (req.space_type, req.date);
        let mut guard = self.ledger(key).write_owned().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_LEDGER {
            return Err(EngineError::LimitExceeded("too many bookings for one space and date"));
        }

        let max = self.config.space(req.space_type).max_capacity;
        let created = {
            let ledger = &*guard;
            lifecycle::create(
                self.ctx(actor),
                &req,
                |span, needed| check_capacity(Some(ledger), max, span, needed, None),
                |date| self.next_booking_number(date),
            )
        };
        let (booking, intents) = created.inspect_err(|e| note_rejection(req.space_type, Action::Create, e))?;

        let booking = self.commit(Event::Created(Box::new(booking)), &mut guard, None).await?;
        info!(
            id = %booking.id,
            number = %booking.booking_number,
            space_type = %booking.space_type,
            date = %booking.date,
            span = %booking.span,
            "booking created"
        );
        Ok(Outcome { booking, intents })
    }

    /// Lock the booking's ledger, run `step` on a draft, journal the result.
    async fn transition(
        &self,
        id: Ulid,
        action: Action,
        actor: &str,
        step: impl FnOnce(&mut Booking, Ctx<'_>, &DayLedger) -> Result<Vec<Intent>, EngineError>,
    ) -> Result<Outcome, EngineError> {
        Self::validate_actor(actor)?;
        let _pause = self.compaction.read().await;
        let mut guard = self.lock_booking(id).await?;
        let mut draft = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        let from = draft.status;

        let intents = step(&mut draft, self.ctx(actor), &guard)
            .inspect_err(|e| note_rejection(draft.space_type, action, e))?;

        let event = Event::Transitioned {
            action,
            booking: Box::new(draft),
        };
        let booking = self.commit(event, &mut guard, None).await?;
        info!(
            id = %booking.id,
            number = %booking.booking_number,
            %action,
            %from,
            to = %booking.status,
            "booking transitioned"
        );
        Ok(Outcome { booking, intents })
    }

    pub async fn approve(&self, id: Ulid, req: Approval, actor: &str) -> Result<Outcome, EngineError> {
        self.transition(id, Action::Approve, actor, |b, ctx, ledger| {
            let max = ctx.config.space(b.space_type).max_capacity;
            let report = check_capacity(Some(ledger), max, &b.span, b.capacity_requested, Some(b.id));
            lifecycle::approve(b, ctx, &req, &report)
        })
        .await
    }

    pub async fn reject(&self, id: Ulid, req: Cancellation, actor: &str) -> Result<Outcome, EngineError> {
        self.transition(id, Action::Reject, actor, |b, ctx, _| {
            lifecycle::cancel(b, ctx, Action::Reject, &req)
        })
        .await
    }

    pub async fn cancel(&self, id: Ulid, req: Cancellation, actor: &str) -> Result<Outcome, EngineError> {
        self.transition(id, Action::Cancel, actor, |b, ctx, _| {
            lifecycle::cancel(b, ctx, Action::Cancel, &req)
        })
        .await
    }

    /// Bookings are never removed; deleting cancels.
    pub async fn delete(&self, id: Ulid, req: Cancellation, actor: &str) -> Result<Outcome, EngineError> {
        self.cancel(id, req, actor).await
    }

    pub async fn mark_no_show(&self, id: Ulid, req: Cancellation, actor: &str) -> Result<Outcome, EngineError> {
        self.transition(id, Action::NoShow, actor, |b, ctx, _| {
            lifecycle::cancel(b, ctx, Action::NoShow, &req)
        })
        .await
    }

    pub async fn check_in(&self, id: Ulid, req: CheckIn, actor: &str) -> Result<Outcome, EngineError> {
        self.transition(id, Action::CheckIn, actor, |b, ctx, _| lifecycle::check_in(b, ctx, &req))
            .await
    }

    pub async fn check_out(&self, id: Ulid, req: CheckOut, actor: &str) -> Result<Outcome, EngineError> {
        self.transition(id, Action::CheckOut, actor, |b, ctx, _| lifecycle::check_out(b, ctx, &req))
            .await
    }

    /// Edit schedule, capacity, pricing inputs or descriptive fields. Moving to
    /// another date locks both day ledgers in key order.
    pub async fn update_booking(&self, id: Ulid, req: BookingUpdate, actor: &str) -> Result<Outcome, EngineError> {
        Self::validate_actor(actor)?;
        let _pause = self.compaction.read().await;

        for _ in 0..3 {
            let from_key = self.index.get(&id).map(|e| *e.value()).ok_or(EngineError::NotFound(id))?;
            let to_key = (from_key.0, req.date.unwrap_or(from_key.1));

            if to_key == from_key {
                let mut guard = self.ledger(from_key).write_owned().await;
                let Some(current) = guard.get(id).cloned() else {
                    continue;
                };
                let mut draft = current;
                let max = self.config.space(draft.space_type).max_capacity;
                let intents = {
                    let ledger = &*guard;
                    lifecycle::update(&mut draft, self.ctx(actor), &req, |_, span, seats| {
                        check_capacity(Some(ledger), max, span, seats, Some(id))
                    })
                }
                .inspect_err(|e| note_rejection(from_key.0, Action::Update, e))?;
                let event = Event::Transitioned {
                    action: Action::Update,
                    booking: Box::new(draft),
                };
                let booking = self.commit(event, &mut guard, None).await?;
                info!(id = %booking.id, number = %booking.booking_number, "booking updated");
                return Ok(Outcome { booking, intents });
            }

            // Validate the target date before a ledger is allocated for it.
            if let Some(ledger) = self.existing_ledger(&from_key) {
                let snapshot = ledger.read().await.get(id).cloned();
                if let Some(current) = snapshot {
                    let (date, span) = lifecycle::update_target(&current, &req)?;
                    validate_schedule(&self.config, date, &span, self.now())?;
                }
            }

            let (first, second) = if from_key < to_key { (from_key, to_key) } else { (to_key, from_key) };
            let mut first_guard = self.ledger(first).write_owned().await;
            let mut second_guard = self.ledger(second).write_owned().await;
            let (from, to) = if first == from_key {
                (&mut *first_guard, &mut *second_guard)
            } else {
                (&mut *second_guard, &mut *first_guard)
            };
            let Some(current) = from.get(id).cloned() else {
                continue;
            };
            if to.bookings.len() >= MAX_BOOKINGS_PER_LEDGER {
                return Err(EngineError::LimitExceeded("too many bookings for one space and date"));
            }
            let mut draft = current;
            let max = self.config.space(draft.space_type).max_capacity;
            let intents = {
                let target = &*to;
                lifecycle::update(&mut draft, self.ctx(actor), &req, |_, span, seats| {
                    check_capacity(Some(target), max, span, seats, Some(id))
                })
            }
            .inspect_err(|e| note_rejection(from_key.0, Action::Update, e))?;
            let event = Event::Transitioned {
                action: Action::Update,
                booking: Box::new(draft),
            };
            let booking = self.commit(event, to, Some(from)).await?;
            info!(
                id = %booking.id,
                number = %booking.booking_number,
                from = %from_key.1,
                to = %booking.date,
                "booking rescheduled"
            );
            return Ok(Outcome { booking, intents });
        }
        Err(EngineError::NotFound(id))
    }
}
