//! Booking state machine.
//!
//! Every function here works on a draft copy of the booking and returns the
//! intents its transition produces. Nothing is visible to other callers until the
//! engine journals the draft, so a failed guard leaves the stored booking as it was.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use ulid::Ulid;

use crate::checkout::{compute_adjustment, net_additional_amount, ExtraCharges};
use crate::config::{CheckedInRefund, EngineConfig};
use crate::engine::{EngineError, PolicyViolation};
use crate::limits::*;
use crate::model::*;
use crate::policy::{check_in_window, parse_span, validate_capacity, validate_schedule, validate_text};
use crate::pricing::{calculate_price, compose_total};
use crate::refund::{compute_refund, RefundMode, RefundOutcome, RefundRequest};

/// Who is acting, and when.
#[derive(Clone, Copy)]
pub struct Ctx<'a> {
    pub config: &'a EngineConfig,
    pub now: NaiveDateTime,
    pub actor: &'a str,
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewBooking {
    pub customer_id: String,
    #[serde(default)]
    pub contact: Contact,
    pub space_type: SpaceType,
    #[serde(default)]
    pub space_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub date: NaiveDate,
    pub start: String,
    pub end: String,
    pub capacity: u32,
    #[serde(default)]
    pub additional_services_cost: Amount,
    #[serde(default)]
    pub extra_discount: Amount,
    #[serde(default)]
    pub admin_notes: Option<String>,
    #[serde(default)]
    pub internal_notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Approval {
    /// Record payment as collected while approving.
    pub mark_paid: bool,
    pub notes: Option<String>,
    pub overrides: Overrides,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Cancellation {
    pub reason: Option<String>,
    /// `None` applies the action's default mode.
    pub refund: Option<RefundRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CheckIn {
    pub actual_attendees: Option<u32>,
    pub verification_method: Option<String>,
    pub overrides: Overrides,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CheckOut {
    pub charges: ExtraCharges,
    pub notes: Option<String>,
}

/// Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BookingUpdate {
    pub date: Option<NaiveDate>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub capacity: Option<u32>,
    pub additional_services_cost: Option<Amount>,
    pub extra_discount: Option<Amount>,
    pub contact: Option<Contact>,
    pub space_name: Option<String>,
    pub location: Option<String>,
    pub admin_notes: Option<String>,
    pub internal_notes: Option<String>,
    pub overrides: Overrides,
}

// ── Transition table ─────────────────────────────────────────────

/// Status an action leads to from `from`, or `None` if the pair is not allowed.
pub fn next_status(from: BookingStatus, action: Action) -> Option<BookingStatus> {
    use BookingStatus::*;
    match (from, action) {
        (Pending, Action::Approve) => Some(Confirmed),
        (Pending, Action::Reject) => Some(Rejected),
        (Pending | Confirmed | CheckedIn, Action::Cancel) => Some(Cancelled),
        (Confirmed, Action::CheckIn) => Some(CheckedIn),
        (Confirmed, Action::NoShow) => Some(NoShow),
        (CheckedIn, Action::CheckOut) => Some(Completed),
        (Pending | Confirmed, Action::Update) => Some(from),
        _ => None,
    }
}

/// Distinct states reachable from `from` in one step, excluding itself.
pub fn legal_next(from: BookingStatus) -> Vec<BookingStatus> {
    let mut legal = Vec::new();
    for action in Action::ALL {
        if let Some(to) = next_status(from, action)
            && to != from
            && !legal.contains(&to)
        {
            legal.push(to);
        }
    }
    legal
}

pub fn ensure_transition(booking: &Booking, action: Action) -> Result<BookingStatus, EngineError> {
    next_status(booking.status, action).ok_or_else(|| EngineError::InvalidTransition {
        from: booking.status,
        action,
        requested: action.natural_target().unwrap_or(booking.status),
        legal: legal_next(booking.status),
    })
}

// ── Intent helpers ───────────────────────────────────────────────

fn recipient(b: &Booking) -> String {
    b.contact.email.clone().unwrap_or_else(|| b.customer_id.clone())
}

fn notify(b: &Booking, template: NotifyTemplate) -> Intent {
    Intent::Notify {
        template,
        recipient: recipient(b),
        payload: json!({
            "booking_number": b.booking_number,
            "status": b.status,
            "space_type": b.space_type,
            "date": b.date,
            "start": b.span.start,
            "end": b.span.end,
            "total_price": b.price.total_price,
            "refund_amount": b.settlement.refund_amount,
            "net_additional_amount": b.settlement.net_additional_amount,
            "currency": b.currency,
        }),
    }
}

fn refund_intent(b: &Booking, amount: Amount) -> Intent {
    Intent::IssueRefund {
        customer_id: b.customer_id.clone(),
        amount,
        currency: b.currency.clone(),
        reference: b.booking_number.clone(),
    }
}

fn charge_intent(b: &Booking, amount: Amount) -> Intent {
    Intent::CollectCharge {
        customer_id: b.customer_id.clone(),
        amount,
        currency: b.currency.clone(),
        reference: b.booking_number.clone(),
    }
}

fn release_intent(b: &Booking) -> Intent {
    Intent::ReleaseCapacity {
        space_type: b.space_type,
        date: b.date,
        span: b.span,
        amount: b.capacity_requested,
    }
}

fn override_note(used: &[OverrideFlag]) -> Option<String> {
    if used.is_empty() {
        return None;
    }
    let names: Vec<String> = used.iter().map(ToString::to_string).collect();
    Some(format!("override: {}", names.join(", ")))
}

fn join_details(parts: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    let parts: Vec<String> = parts.into_iter().flatten().collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

/// Pass a failed guard through unless the caller raised its override.
fn guard(result: Result<(), EngineError>, overrides: &Overrides, used: &mut Vec<OverrideFlag>) -> Result<(), EngineError> {
    let Err(err) = result else { return Ok(()) };
    let allowed = match err.bypass() {
        Some(OverrideFlag::Payment) => overrides.payment,
        Some(OverrideFlag::Capacity) => overrides.capacity,
        Some(OverrideFlag::Timing) => overrides.timing,
        None => false,
    };
    if !allowed {
        return Err(err);
    }
    if let Some(flag) = err.bypass() {
        used.push(flag);
    }
    Ok(())
}

fn require_available(requested: u32, report: &AvailabilityReport) -> Result<(), EngineError> {
    if report.available {
        Ok(())
    } else {
        Err(EngineError::CapacityExceeded {
            requested,
            remaining: report.remaining_capacity,
            max: report.max_capacity,
        })
    }
}

fn require_paid(b: &Booking) -> Result<(), EngineError> {
    if b.payment_status == PaymentStatus::Paid {
        Ok(())
    } else {
        Err(EngineError::PaymentNotConfirmed(b.payment_status))
    }
}

fn validate_texts(
    customer_id: Option<&str>,
    contact: Option<&Contact>,
    fields: [Option<&str>; 4],
) -> Result<(), EngineError> {
    if let Some(id) = customer_id
        && (id.is_empty() || id.len() > MAX_CUSTOMER_ID_LEN)
    {
        return Err(EngineError::LimitExceeded("customer_id must be 1..=128 bytes"));
    }
    if let Some(c) = contact {
        for v in [&c.name, &c.email, &c.phone] {
            validate_text(v.as_deref(), MAX_NAME_LEN, "contact field too long")?;
        }
    }
    let [space_name, location, admin_notes, internal_notes] = fields;
    validate_text(space_name, MAX_NAME_LEN, "space name too long")?;
    validate_text(location, MAX_NAME_LEN, "location too long")?;
    validate_text(admin_notes, MAX_NOTE_LEN, "admin notes too long")?;
    validate_text(internal_notes, MAX_NOTE_LEN, "internal notes too long")
}

// ── Transitions ──────────────────────────────────────────────────

/// Validate and price a new request. `capacity` reports availability for the
/// parsed span; `number` allocates the booking number once every guard passed.
pub fn create(
    ctx: Ctx<'_>,
    req: &NewBooking,
    capacity: impl FnOnce(&Span, u32) -> AvailabilityReport,
    number: impl FnOnce(NaiveDate) -> String,
) -> Result<(Booking, Vec<Intent>), EngineError> {
    validate_texts(
        Some(&req.customer_id),
        Some(&req.contact),
        [
            req.space_name.as_deref(),
            req.location.as_deref(),
            req.admin_notes.as_deref(),
            req.internal_notes.as_deref(),
        ],
    )?;
    let span = parse_span(&req.start, &req.end)?;
    validate_schedule(ctx.config, req.date, &span, ctx.now)?;
    validate_capacity(ctx.config, req.space_type, req.capacity)?;

    let quote = calculate_price(ctx.config, req.space_type, req.date, span.duration_minutes());
    let price = compose_total(&quote, req.additional_services_cost, req.extra_discount)?;

    require_available(req.capacity, &capacity(&span, req.capacity))?;

    let mut booking = Booking {
        id: Ulid::new(),
        booking_number: number(req.date),
        customer_id: req.customer_id.clone(),
        contact: req.contact.clone(),
        space_type: req.space_type,
        space_name: req.space_name.clone(),
        location: req.location.clone(),
        date: req.date,
        span,
        capacity_requested: req.capacity,
        actual_attendees: None,
        status: BookingStatus::Pending,
        payment_status: PaymentStatus::Pending,
        currency: ctx.config.currency.clone(),
        price,
        settlement: Settlement::default(),
        created_at: ctx.now,
        updated_at: ctx.now,
        updated_by: ctx.actor.to_string(),
        audit: Vec::new(),
        admin_notes: req.admin_notes.clone(),
        internal_notes: req.internal_notes.clone(),
        approved_at: None,
        approved_by: None,
        cancelled_at: None,
        cancelled_by: None,
        cancellation_reason: None,
        checked_in_at: None,
        checked_in_by: None,
        verification_method: None,
        checked_out_at: None,
        actual_duration_minutes: None,
    };
    let summary = format!("{} {} {} x{}", booking.space_type, booking.date, booking.span, booking.capacity_requested);
    booking.record(ctx.now, ctx.actor, "created", Some(summary));
    let intents = vec![notify(&booking, NotifyTemplate::BookingCreated)];
    Ok((booking, intents))
}

/// `report` is availability for the booking's own slot with itself excluded.
pub fn approve(
    b: &mut Booking,
    ctx: Ctx<'_>,
    req: &Approval,
    report: &AvailabilityReport,
) -> Result<Vec<Intent>, EngineError> {
    validate_text(req.notes.as_deref(), MAX_NOTE_LEN, "notes too long")?;
    let to = ensure_transition(b, Action::Approve)?;
    let mut used = Vec::new();
    if !req.mark_paid {
        guard(require_paid(b), &req.overrides, &mut used)?;
    }
    guard(require_available(b.capacity_requested, report), &req.overrides, &mut used)?;

    if req.mark_paid {
        b.payment_status = PaymentStatus::Paid;
    }
    b.status = to;
    b.approved_at = Some(ctx.now);
    b.approved_by = Some(ctx.actor.to_string());
    if let Some(notes) = &req.notes {
        b.admin_notes = Some(notes.clone());
    }
    let paid_note = req.mark_paid.then(|| "payment recorded".to_string());
    b.record(ctx.now, ctx.actor, "approved", join_details([paid_note, override_note(&used)]));
    Ok(vec![notify(b, NotifyTemplate::BookingApproved)])
}

fn default_refund(action: Action) -> RefundRequest {
    match action {
        Action::Reject => RefundRequest::mode(RefundMode::FullRefund),
        Action::NoShow => RefundRequest::mode(RefundMode::NoRefund),
        _ => RefundRequest::default(),
    }
}

/// What cancelling (or rejecting, or marking no-show) would refund right now.
pub fn refund_for(
    b: &Booking,
    config: &EngineConfig,
    now: NaiveDateTime,
    action: Action,
    requested: Option<RefundRequest>,
) -> Result<RefundOutcome, EngineError> {
    let mut request = requested.unwrap_or_else(|| default_refund(action));
    if b.status == BookingStatus::CheckedIn && config.checked_in_refund == CheckedInRefund::None {
        request = RefundRequest::mode(RefundMode::NoRefund);
    }
    let minutes_until_event = (b.starts_at() - now).num_minutes();
    compute_refund(b.total_paid(), minutes_until_event, &request, &config.refund_tiers)
}

/// Cancel, reject, or mark no-show. All three settle through the refund engine.
pub fn cancel(b: &mut Booking, ctx: Ctx<'_>, action: Action, req: &Cancellation) -> Result<Vec<Intent>, EngineError> {
    debug_assert!(matches!(action, Action::Cancel | Action::Reject | Action::NoShow));
    validate_text(req.reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
    let to = ensure_transition(b, action)?;
    // A no-show settles nothing unless a refund is asked for.
    let outcome = match (action, req.refund) {
        (Action::NoShow, None) => None,
        (_, requested) => Some(refund_for(b, ctx.config, ctx.now, action, requested)?),
    };
    let released = b.holds_capacity().then(|| release_intent(b));
    let refund_amount = outcome.as_ref().map_or(0, |o| o.refund_amount);

    if let Some(outcome) = &outcome {
        if outcome.refund_amount > 0 {
            b.payment_status = if outcome.refund_amount == outcome.total_paid {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartialRefund
            };
        }
        b.settlement.refund_amount = outcome.refund_amount;
        b.settlement.cancellation_fee = outcome.cancellation_fee;
    }
    b.status = to;
    b.cancelled_at = Some(ctx.now);
    b.cancelled_by = Some(ctx.actor.to_string());
    b.cancellation_reason = req.reason.clone();

    let (label, template) = match action {
        Action::Reject => ("rejected", NotifyTemplate::BookingRejected),
        Action::NoShow => ("marked no-show", NotifyTemplate::NoShow),
        _ => ("cancelled", NotifyTemplate::BookingCancelled),
    };
    let money = outcome.as_ref().map(|o| {
        format!("refund {} of {} {}, fee {}", o.refund_amount, o.total_paid, b.currency, o.cancellation_fee)
    });
    b.record(ctx.now, ctx.actor, label, join_details([req.reason.clone(), money]));

    let mut intents = Vec::new();
    if refund_amount > 0 {
        intents.push(refund_intent(b, refund_amount));
    }
    intents.extend(released);
    intents.push(notify(b, template));
    Ok(intents)
}

pub fn check_in(b: &mut Booking, ctx: Ctx<'_>, req: &CheckIn) -> Result<Vec<Intent>, EngineError> {
    validate_text(req.verification_method.as_deref(), MAX_NAME_LEN, "verification method too long")?;
    let to = ensure_transition(b, Action::CheckIn)?;
    let mut used = Vec::new();

    let (opens_at, closes_at) = check_in_window(ctx.config, b);
    let in_window: Result<(), EngineError> = if opens_at <= ctx.now && ctx.now < closes_at {
        Ok(())
    } else {
        Err(PolicyViolation::OutsideCheckInWindow { opens_at, closes_at }.into())
    };
    guard(in_window, &req.overrides, &mut used)?;
    guard(require_paid(b), &req.overrides, &mut used)?;

    if let Some(attendees) = req.actual_attendees {
        let max = ctx.config.space(b.space_type).max_capacity;
        if attendees > max {
            return Err(PolicyViolation::AttendeesAboveSpaceMax { attendees, max }.into());
        }
        let within_booked: Result<(), EngineError> = if attendees > b.capacity_requested {
            Err(PolicyViolation::AttendeesAboveBooked { attendees, booked: b.capacity_requested }.into())
        } else {
            Ok(())
        };
        guard(within_booked, &req.overrides, &mut used)?;
        b.actual_attendees = Some(attendees);
    }

    b.status = to;
    b.checked_in_at = Some(ctx.now);
    b.checked_in_by = Some(ctx.actor.to_string());
    b.verification_method = req.verification_method.clone();
    let attendees = req.actual_attendees.map(|n| format!("{n} attendees"));
    b.record(ctx.now, ctx.actor, "checked in", join_details([attendees, override_note(&used)]));
    Ok(vec![notify(b, NotifyTemplate::CheckedIn)])
}

pub fn check_out(b: &mut Booking, ctx: Ctx<'_>, req: &CheckOut) -> Result<Vec<Intent>, EngineError> {
    validate_text(req.notes.as_deref(), MAX_NOTE_LEN, "notes too long")?;
    let to = ensure_transition(b, Action::CheckOut)?;
    let checked_in_at = b.checked_in_at.ok_or_else(|| EngineError::InvalidTransition {
        from: b.status,
        action: Action::CheckOut,
        requested: to,
        legal: legal_next(b.status),
    })?;
    req.charges.validate()?;

    let mut adjustment =
        compute_adjustment(b.starts_at(), b.ends_at(), ctx.now, b.price.hourly_rate, &ctx.config.checkout);
    // Never hand back more than was collected.
    adjustment.early_refund = adjustment.early_refund.min(b.total_paid());
    let net = net_additional_amount(&adjustment, &req.charges);
    let released = release_intent(b);

    b.settlement.overtime_charge = adjustment.overtime_charge;
    b.settlement.early_checkout_refund = adjustment.early_refund;
    b.settlement.damage_charge = req.charges.damage;
    b.settlement.cleaning_charge = req.charges.cleaning;
    b.settlement.additional_charge = req.charges.additional;
    b.settlement.net_additional_amount = net;
    if net < 0 && b.payment_status == PaymentStatus::Paid {
        b.payment_status = PaymentStatus::PartialRefund;
    }
    b.status = to;
    b.checked_out_at = Some(ctx.now);
    let used = (ctx.now - checked_in_at).num_minutes().max(0);
    b.actual_duration_minutes = Some(u32::try_from(used).unwrap_or(u32::MAX));

    let summary = match (adjustment.overtime_minutes, adjustment.early_minutes) {
        (0, 0) => None,
        (0, early) => Some(format!("{early} min early")),
        (late, _) => Some(format!("{late} min overtime")),
    };
    let net_note = format!("net {net} {}", b.currency);
    b.record(ctx.now, ctx.actor, "checked out", join_details([summary, Some(net_note), req.notes.clone()]));

    let mut intents = Vec::new();
    if net > 0 {
        intents.push(charge_intent(b, net));
    } else if net < 0 {
        intents.push(refund_intent(b, -net));
    }
    intents.push(released);
    intents.push(notify(b, NotifyTemplate::CheckedOut));
    Ok(intents)
}

/// Schedule (date and span) an update would move the booking to.
pub fn update_target(b: &Booking, req: &BookingUpdate) -> Result<(NaiveDate, Span), EngineError> {
    let start = match &req.start {
        Some(s) => s.parse()?,
        None => b.span.start,
    };
    let end = match &req.end {
        Some(s) => s.parse()?,
        None => b.span.end,
    };
    let span = Span::checked(start, end)
        .ok_or(EngineError::OutOfPolicyWindow(PolicyViolation::InvalidInterval { start, end }))?;
    Ok((req.date.unwrap_or(b.date), span))
}

/// Edit a pending or confirmed booking in place. `capacity` is consulted only
/// when a capacity-holding booking changes schedule or grows.
pub fn update(
    b: &mut Booking,
    ctx: Ctx<'_>,
    req: &BookingUpdate,
    capacity: impl FnOnce(NaiveDate, &Span, u32) -> AvailabilityReport,
) -> Result<Vec<Intent>, EngineError> {
    validate_texts(
        None,
        req.contact.as_ref(),
        [
            req.space_name.as_deref(),
            req.location.as_deref(),
            req.admin_notes.as_deref(),
            req.internal_notes.as_deref(),
        ],
    )?;
    ensure_transition(b, Action::Update)?;
    let (date, span) = update_target(b, req)?;
    let seats = req.capacity.unwrap_or(b.capacity_requested);

    let rescheduled = date != b.date || span != b.span;
    if rescheduled {
        validate_schedule(ctx.config, date, &span, ctx.now)?;
    }
    if seats != b.capacity_requested {
        validate_capacity(ctx.config, b.space_type, seats)?;
    }

    let services = req.additional_services_cost.unwrap_or(b.price.additional_services_cost);
    let coupon = req.extra_discount.unwrap_or(b.price.extra_discount);
    let quote = calculate_price(ctx.config, b.space_type, date, span.duration_minutes());
    let price = compose_total(&quote, services, coupon)?;

    let mut used = Vec::new();
    if b.holds_capacity() && (rescheduled || seats > b.capacity_requested) {
        guard(require_available(seats, &capacity(date, &span, seats)), &req.overrides, &mut used)?;
    }

    let old_total = b.price.total_price;
    let mut changes = Vec::new();
    if rescheduled {
        changes.push(format!("{} {} -> {} {}", b.date, b.span, date, span));
    }
    if seats != b.capacity_requested {
        changes.push(format!("capacity {} -> {}", b.capacity_requested, seats));
    }
    if price.total_price != old_total {
        changes.push(format!("total {} -> {}", old_total, price.total_price));
    }

    b.date = date;
    b.span = span;
    b.capacity_requested = seats;
    b.price = price;
    if let Some(contact) = &req.contact {
        b.contact = contact.clone();
    }
    if req.space_name.is_some() {
        b.space_name = req.space_name.clone();
    }
    if req.location.is_some() {
        b.location = req.location.clone();
    }
    if req.admin_notes.is_some() {
        b.admin_notes = req.admin_notes.clone();
    }
    if req.internal_notes.is_some() {
        b.internal_notes = req.internal_notes.clone();
    }
    let changes = (!changes.is_empty()).then(|| changes.join(", "));
    b.record(ctx.now, ctx.actor, "updated", join_details([changes, override_note(&used)]));

    let mut intents = Vec::new();
    if b.payment_status == PaymentStatus::Paid {
        let diff = b.price.total_price - old_total;
        if diff > 0 {
            intents.push(charge_intent(b, diff));
        } else if diff < 0 {
            intents.push(refund_intent(b, -diff));
        }
    }
    intents.push(notify(b, NotifyTemplate::BookingUpdated));
    Ok(intents)
}
