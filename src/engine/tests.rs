use super::*;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use tokio_test::{assert_err, assert_ok};

use crate::clock::FixedClock;
use crate::config::CheckedInRefund;
use crate::lifecycle::{next_status, Approval, BookingUpdate, Cancellation, CheckIn, CheckOut, NewBooking};
use crate::model::fixtures::date;
use crate::refund::{RefundMode, RefundRequest};

const DESK: &str = "front-desk";

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    date(2026, 10, d).and_hms_opt(h, m, 0).unwrap()
}

/// Monday 2026-10-19 08:00.
fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(at(19, 8, 0)))
}

fn engine_at(clock: Arc<FixedClock>) -> Engine {
    Engine::new(EngineConfig::default(), clock, Arc::new(NotifyHub::new()))
}

fn engine() -> Engine {
    engine_at(clock())
}

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("deskbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn request(space_type: SpaceType, day: u32, start: &str, end: &str, capacity: u32) -> NewBooking {
    NewBooking {
        customer_id: "cust-1".into(),
        contact: Contact {
            email: Some("ana@example.com".into()),
            ..Contact::default()
        },
        space_type,
        space_name: None,
        location: None,
        date: date(2026, 10, day),
        start: start.into(),
        end: end.into(),
        capacity,
        additional_services_cost: 0,
        extra_discount: 0,
        admin_notes: None,
        internal_notes: None,
    }
}

/// Meeting room on Tuesday 2026-10-20.
fn meeting(start: &str, end: &str, capacity: u32) -> NewBooking {
    request(SpaceType::MeetingRoom, 20, start, end, capacity)
}

fn paid() -> Approval {
    Approval {
        mark_paid: true,
        ..Approval::default()
    }
}

fn any_time() -> CheckIn {
    CheckIn {
        overrides: Overrides {
            timing: true,
            ..Overrides::default()
        },
        ..CheckIn::default()
    }
}

async fn confirmed(engine: &Engine, req: NewBooking) -> Booking {
    let id = assert_ok!(engine.create_booking(req, DESK).await).booking.id;
    assert_ok!(engine.approve(id, paid(), "manager").await).booking
}

// ── Creation and queries ─────────────────────────────────

#[tokio::test]
async fn create_assigns_sequential_numbers() {
    let engine = engine();
    let a = engine.create_booking(meeting("09:00", "10:00", 2), DESK).await.unwrap();
    let b = engine
        .create_booking(request(SpaceType::Studio, 21, "10:00", "12:00", 1), DESK)
        .await
        .unwrap();

    assert_eq!(a.booking.booking_number, "BK-20261020-000001");
    assert_eq!(b.booking.booking_number, "BK-20261021-000002");
    assert_eq!(a.booking.status, BookingStatus::Pending);
    assert_eq!(a.booking.payment_status, PaymentStatus::Pending);
    assert_eq!(a.booking.price.total_price, 30_000);
    assert_eq!(a.booking.audit.len(), 1);
    assert!(matches!(
        &a.intents[..],
        [Intent::Notify { template: NotifyTemplate::BookingCreated, .. }]
    ));

    assert_eq!(engine.get_booking(a.booking.id).await.unwrap(), a.booking);
    assert_eq!(engine.get_by_number("BK-20261021-000002").await.unwrap(), b.booking);
}

#[tokio::test]
async fn unknown_ids_and_numbers_are_not_found() {
    let engine = engine();
    let id = Ulid::new();
    assert_eq!(engine.get_booking(id).await, Err(EngineError::NotFound(id)));
    assert_eq!(
        engine.get_by_number("BK-20261020-000042").await,
        Err(EngineError::NumberNotFound("BK-20261020-000042".into()))
    );
    let err = engine.approve(id, paid(), "manager").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn create_rejects_out_of_policy_schedule_without_allocating() {
    let engine = engine();
    let cases = [
        (request(SpaceType::MeetingRoom, 18, "09:00", "10:00", 1), "date_in_past"),
        (meeting("07:00", "08:30", 1), "outside_operating_hours"),
        (meeting("09:00", "09:30", 1), "duration_too_short"),
        (meeting("10:00", "09:00", 1), "invalid_interval"),
        (meeting("9am", "10:00", 1), "malformed_time"),
        (meeting("09:00", "10:00", 13), "capacity_out_of_range"),
    ];
    for (req, reason) in cases {
        let err = engine.create_booking(req, DESK).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfPolicyWindow, "{reason}");
        assert_eq!(err.reason_code(), reason);
    }
    assert!(!engine.ledgers.contains_key(&(SpaceType::MeetingRoom, date(2026, 10, 18))));
    assert!(engine.index.is_empty());
}

#[tokio::test]
async fn slots_that_already_ended_today_cannot_be_booked() {
    let clock = clock();
    let engine = engine_at(clock.clone());
    let later_today = confirmed(&engine, request(SpaceType::MeetingRoom, 19, "16:00", "17:00", 1)).await;

    clock.set(at(19, 15, 0));
    let err = assert_err!(engine.create_booking(request(SpaceType::MeetingRoom, 19, "09:00", "10:00", 1), DESK).await);
    assert_eq!(err.kind(), ErrorKind::OutOfPolicyWindow);
    assert_eq!(err.reason_code(), "slot_ended");

    let back_to_morning = BookingUpdate {
        start: Some("09:00".into()),
        end: Some("10:00".into()),
        ..BookingUpdate::default()
    };
    let err = assert_err!(engine.update_booking(later_today.id, back_to_morning, DESK).await);
    assert_eq!(err.reason_code(), "slot_ended");
    assert_eq!(engine.get_booking(later_today.id).await.unwrap(), later_today);

    // A slot still running is fine.
    assert_ok!(engine.create_booking(request(SpaceType::MeetingRoom, 19, "14:30", "16:00", 1), DESK).await);
}

#[tokio::test]
async fn actor_must_be_present() {
    let engine = engine();
    let err = engine.create_booking(meeting("09:00", "10:00", 1), "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
}

#[tokio::test]
async fn list_bookings_returns_every_status_by_start() {
    let engine = engine();
    let late = engine.create_booking(meeting("14:00", "15:00", 1), DESK).await.unwrap().booking;
    let early = confirmed(&engine, meeting("09:00", "10:00", 1)).await;
    engine.cancel(late.id, Cancellation::default(), DESK).await.unwrap();

    let listed = engine.list_bookings(SpaceType::MeetingRoom, date(2026, 10, 20)).await;
    let ids: Vec<Ulid> = listed.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![early.id, late.id]);
    assert_eq!(listed[1].status, BookingStatus::Cancelled);
    assert!(engine.list_bookings(SpaceType::Studio, date(2026, 10, 20)).await.is_empty());
}

// ── Capacity ─────────────────────────────────────────────

#[tokio::test]
async fn partial_overlap_leaves_remaining_capacity() {
    let engine = engine();
    confirmed(&engine, meeting("09:00", "10:00", 8)).await;

    let report = engine
        .check_availability(SpaceType::MeetingRoom, date(2026, 10, 20), "09:30", "10:30", 5)
        .await
        .unwrap();
    assert!(!report.available);
    assert_eq!(report.max_capacity, 12);
    assert_eq!(report.committed_capacity, 8);
    assert_eq!(report.remaining_capacity, 4);
    assert_eq!(report.conflicting_bookings.len(), 1);

    // Touching spans do not overlap.
    let after = engine
        .check_availability(SpaceType::MeetingRoom, date(2026, 10, 20), "10:00", "11:00", 12)
        .await
        .unwrap();
    assert!(after.available);
}

#[tokio::test]
async fn approval_rechecks_capacity_unless_overridden() {
    let engine = engine();
    confirmed(&engine, meeting("09:00", "10:00", 8)).await;
    let pending = engine.create_booking(meeting("09:30", "10:30", 5), DESK).await.unwrap().booking;

    let err = engine.approve(pending.id, paid(), "manager").await.unwrap_err();
    assert_eq!(
        err,
        EngineError::CapacityExceeded {
            requested: 5,
            remaining: 4,
            max: 12
        }
    );
    assert_eq!(err.bypass(), Some(OverrideFlag::Capacity));
    assert_eq!(engine.get_booking(pending.id).await.unwrap(), pending);

    let forced = Approval {
        mark_paid: true,
        overrides: Overrides {
            capacity: true,
            ..Overrides::default()
        },
        ..Approval::default()
    };
    let approved = engine.approve(pending.id, forced, "manager").await.unwrap().booking;
    assert_eq!(approved.status, BookingStatus::Confirmed);
    let last = approved.audit.last().unwrap();
    assert!(last.details.as_deref().unwrap().contains("override: capacity"));
}

#[tokio::test]
async fn create_is_refused_when_confirmed_bookings_fill_the_slot() {
    let engine = engine();
    confirmed(&engine, meeting("09:00", "11:00", 12)).await;
    let err = assert_err!(engine.create_booking(meeting("10:00", "11:00", 1), DESK).await);
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_fill_capacity_exactly() {
    // Journaled so each commit awaits the writer while holding the ledger lock.
    let path = test_journal_path("concurrent_approvals.journal");
    let engine = Arc::new(Engine::open(&path, EngineConfig::default(), clock(), Arc::new(NotifyHub::new())).unwrap());
    let mut ids = Vec::new();
    for _ in 0..20 {
        let b = engine.create_booking(meeting("13:00", "15:00", 1), DESK).await.unwrap();
        ids.push(b.booking.id);
    }

    let mut handles = Vec::new();
    for id in ids {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move { eng.approve(id, paid(), "manager").await }));
    }

    let mut approved = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => approved += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::CapacityExceeded),
        }
    }
    assert_eq!(approved, 12);

    let report = engine
        .check_availability(SpaceType::MeetingRoom, date(2026, 10, 20), "13:00", "15:00", 1)
        .await
        .unwrap();
    assert_eq!(report.committed_capacity, 12);
    assert_eq!(report.remaining_capacity, 0);
}

// ── Transition closure ───────────────────────────────────

async fn booking_in(engine: &Engine, status: BookingStatus, start: &str, end: &str) -> Ulid {
    let id = engine.create_booking(meeting(start, end, 1), DESK).await.unwrap().booking.id;
    let step = |r: Result<Outcome, EngineError>| r.unwrap().booking;
    match status {
        BookingStatus::Pending => {}
        BookingStatus::Confirmed => {
            step(engine.approve(id, paid(), DESK).await);
        }
        BookingStatus::CheckedIn => {
            step(engine.approve(id, paid(), DESK).await);
            step(engine.check_in(id, any_time(), DESK).await);
        }
        BookingStatus::Completed => {
            step(engine.approve(id, paid(), DESK).await);
            step(engine.check_in(id, any_time(), DESK).await);
            step(engine.check_out(id, CheckOut::default(), DESK).await);
        }
        BookingStatus::Cancelled => {
            step(engine.cancel(id, Cancellation::default(), DESK).await);
        }
        BookingStatus::Rejected => {
            step(engine.reject(id, Cancellation::default(), DESK).await);
        }
        BookingStatus::NoShow => {
            step(engine.approve(id, paid(), DESK).await);
            step(engine.mark_no_show(id, Cancellation::default(), DESK).await);
        }
    }
    assert_eq!(engine.get_booking(id).await.unwrap().status, status);
    id
}

async fn apply(engine: &Engine, id: Ulid, action: Action) -> Result<Outcome, EngineError> {
    match action {
        Action::Approve => engine.approve(id, paid(), DESK).await,
        Action::Reject => engine.reject(id, Cancellation::default(), DESK).await,
        Action::Cancel => engine.cancel(id, Cancellation::default(), DESK).await,
        Action::CheckIn => engine.check_in(id, any_time(), DESK).await,
        Action::CheckOut => engine.check_out(id, CheckOut::default(), DESK).await,
        Action::NoShow => engine.mark_no_show(id, Cancellation::default(), DESK).await,
        Action::Update => {
            let update = BookingUpdate {
                admin_notes: Some("projector".into()),
                ..BookingUpdate::default()
            };
            engine.update_booking(id, update, DESK).await
        }
        Action::Create => unreachable!("create takes no booking id"),
    }
}

#[tokio::test]
async fn every_state_action_pair_follows_the_transition_table() {
    let engine = engine();
    let mut hour = 8;
    for from in BookingStatus::ALL {
        for action in Action::ALL {
            if action == Action::Create {
                continue;
            }
            let start = format!("{hour:02}:00");
            let end = format!("{:02}:00", hour + 1);
            hour = if hour == 20 { 8 } else { hour + 1 };

            let id = booking_in(&engine, from, &start, &end).await;
            let before = engine.get_booking(id).await.unwrap();
            let result = apply(&engine, id, action).await;

            match next_status(from, action) {
                Some(to) => {
                    let outcome = result.unwrap_or_else(|e| panic!("{from} --{action}--> {to}: {e}"));
                    assert_eq!(outcome.booking.status, to, "{from} --{action}-->");
                    assert!(outcome.booking.audit.len() > before.audit.len());
                }
                None => {
                    let err = result.expect_err(&format!("{from} --{action}--> should fail"));
                    assert_eq!(err.kind(), ErrorKind::InvalidTransition, "{from} --{action}-->");
                    assert_eq!(engine.get_booking(id).await.unwrap(), before);
                }
            }
        }
    }
}

#[tokio::test]
async fn invalid_transition_lists_legal_next_states() {
    let engine = engine();
    let id = booking_in(&engine, BookingStatus::Pending, "09:00", "10:00").await;
    let err = engine.check_out(id, CheckOut::default(), DESK).await.unwrap_err();
    match err {
        EngineError::InvalidTransition { from, requested, legal, .. } => {
            assert_eq!(from, BookingStatus::Pending);
            assert_eq!(requested, BookingStatus::Completed);
            assert_eq!(
                legal,
                vec![BookingStatus::Confirmed, BookingStatus::Rejected, BookingStatus::Cancelled]
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

// ── Payment, refunds and settlement ──────────────────────

#[tokio::test]
async fn approval_requires_payment_unless_overridden() {
    let engine = engine();
    let id = engine.create_booking(meeting("09:00", "10:00", 1), DESK).await.unwrap().booking.id;

    let err = engine.approve(id, Approval::default(), "manager").await.unwrap_err();
    assert_eq!(err, EngineError::PaymentNotConfirmed(PaymentStatus::Pending));

    let forced = Approval {
        overrides: Overrides {
            payment: true,
            ..Overrides::default()
        },
        ..Approval::default()
    };
    let approved = engine.approve(id, forced, "manager").await.unwrap().booking;
    assert_eq!(approved.status, BookingStatus::Confirmed);
    assert_eq!(approved.payment_status, PaymentStatus::Pending);
    assert_eq!(approved.approved_by.as_deref(), Some("manager"));
}

#[tokio::test]
async fn cancel_refunds_by_notice_tier() {
    let engine = engine();
    let b = confirmed(&engine, meeting("09:00", "10:00", 2)).await;

    // Monday 08:00 to Tuesday 09:00 is 25 hours of notice.
    let quote = engine.quote_refund(b.id, None).await.unwrap();
    assert_eq!(quote.refund_amount, 25_500);
    assert_eq!(quote.cancellation_fee, 4_500);
    assert_eq!(engine.get_booking(b.id).await.unwrap(), b);

    let cancellation = Cancellation {
        reason: Some("travel".into()),
        refund: None,
    };
    let outcome = engine.cancel(b.id, cancellation, "ana").await.unwrap();
    let cancelled = &outcome.booking;
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::PartialRefund);
    assert_eq!(cancelled.settlement.refund_amount, 25_500);
    assert_eq!(cancelled.settlement.cancellation_fee, 4_500);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("travel"));
    assert_eq!(cancelled.cancelled_by.as_deref(), Some("ana"));

    match &outcome.intents[..] {
        [
            Intent::IssueRefund { amount, reference, .. },
            Intent::ReleaseCapacity { amount: seats, .. },
            Intent::Notify { template: NotifyTemplate::BookingCancelled, recipient, .. },
        ] => {
            assert_eq!(*amount, 25_500);
            assert_eq!(reference, &b.booking_number);
            assert_eq!(*seats, 2);
            assert_eq!(recipient, "ana@example.com");
        }
        other => panic!("unexpected intents {other:?}"),
    }

    let report = engine
        .check_availability(SpaceType::MeetingRoom, date(2026, 10, 20), "09:00", "10:00", 12)
        .await
        .unwrap();
    assert!(report.available);
}

#[tokio::test]
async fn explicit_refund_modes_override_the_tiers() {
    let engine = engine();
    let b = confirmed(&engine, meeting("09:00", "10:00", 1)).await;
    let full = Cancellation {
        reason: None,
        refund: Some(RefundRequest::mode(RefundMode::FullRefund)),
    };
    let outcome = engine.cancel(b.id, full, DESK).await.unwrap();
    assert_eq!(outcome.booking.payment_status, PaymentStatus::Refunded);
    assert_eq!(outcome.booking.settlement.refund_amount, 30_000);
    assert_eq!(outcome.booking.settlement.cancellation_fee, 0);
}

#[tokio::test]
async fn delete_cancels_and_keeps_the_record() {
    let engine = engine();
    let b = engine.create_booking(meeting("09:00", "10:00", 1), DESK).await.unwrap().booking;
    let outcome = engine.delete(b.id, Cancellation::default(), DESK).await.unwrap();
    assert_eq!(outcome.booking.status, BookingStatus::Cancelled);
    // Nothing was paid, so nothing is refunded.
    assert!(matches!(&outcome.intents[..], [Intent::Notify { .. }]));
    assert!(engine.get_booking(b.id).await.is_ok());
}

#[tokio::test]
async fn no_show_keeps_payment_and_releases_capacity() {
    let engine = engine();
    let b = confirmed(&engine, meeting("09:00", "10:00", 3)).await;
    let outcome = engine.mark_no_show(b.id, Cancellation::default(), DESK).await.unwrap();
    assert_eq!(outcome.booking.status, BookingStatus::NoShow);
    assert_eq!(outcome.booking.payment_status, PaymentStatus::Paid);
    assert_eq!(outcome.booking.settlement.refund_amount, 0);
    assert_eq!(outcome.booking.settlement.cancellation_fee, 0);
    assert!(matches!(
        &outcome.intents[..],
        [
            Intent::ReleaseCapacity { amount: 3, .. },
            Intent::Notify { template: NotifyTemplate::NoShow, .. }
        ]
    ));
}

#[tokio::test]
async fn quote_refund_needs_a_cancellable_booking() {
    let engine = engine();
    let id = booking_in(&engine, BookingStatus::Completed, "09:00", "10:00").await;
    let err = engine.quote_refund(id, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn checked_in_cancellation_can_be_made_non_refundable() {
    let config = EngineConfig {
        checked_in_refund: CheckedInRefund::None,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, clock(), Arc::new(NotifyHub::new()));
    let id = booking_in(&engine, BookingStatus::CheckedIn, "09:00", "10:00").await;

    let full = Cancellation {
        reason: None,
        refund: Some(RefundRequest::mode(RefundMode::FullRefund)),
    };
    let outcome = engine.cancel(id, full, DESK).await.unwrap();
    assert_eq!(outcome.booking.settlement.refund_amount, 0);
    assert_eq!(outcome.booking.payment_status, PaymentStatus::Paid);
}

// ── Check-in and check-out ───────────────────────────────

#[tokio::test]
async fn check_in_window_and_overtime_checkout() {
    let clock = clock();
    let engine = engine_at(clock.clone());
    let b = confirmed(&engine, meeting("09:00", "10:00", 4)).await;

    let err = engine.check_in(b.id, CheckIn::default(), DESK).await.unwrap_err();
    assert_eq!(err.reason_code(), "outside_check_in_window");
    assert_eq!(err.bypass(), Some(OverrideFlag::Timing));

    clock.set(at(20, 8, 45));
    let too_many = CheckIn {
        actual_attendees: Some(6),
        ..CheckIn::default()
    };
    let err = engine.check_in(b.id, too_many, DESK).await.unwrap_err();
    assert_eq!(err.reason_code(), "attendees_above_booked");

    let req = CheckIn {
        actual_attendees: Some(3),
        verification_method: Some("qr".into()),
        ..CheckIn::default()
    };
    let checked_in = engine.check_in(b.id, req, "door").await.unwrap().booking;
    assert_eq!(checked_in.status, BookingStatus::CheckedIn);
    assert_eq!(checked_in.actual_attendees, Some(3));
    assert_eq!(checked_in.checked_in_at, Some(at(20, 8, 45)));

    // 40 minutes late: 25 beyond the grace period at 150% of 30,000 per hour.
    clock.set(at(20, 10, 40));
    let outcome = engine.check_out(b.id, CheckOut::default(), "door").await.unwrap();
    let done = &outcome.booking;
    assert_eq!(done.status, BookingStatus::Completed);
    assert_eq!(done.settlement.overtime_charge, 18_750);
    assert_eq!(done.settlement.net_additional_amount, 18_750);
    assert_eq!(done.actual_duration_minutes, Some(115));
    assert!(matches!(
        &outcome.intents[..],
        [
            Intent::CollectCharge { amount: 18_750, .. },
            Intent::ReleaseCapacity { .. },
            Intent::Notify { template: NotifyTemplate::CheckedOut, .. }
        ]
    ));
}

#[tokio::test]
async fn leaving_before_the_booked_start_refunds_booked_time_only() {
    let engine = engine();
    let b = confirmed(&engine, meeting("09:00", "11:00", 2)).await;
    assert_eq!(b.price.total_price, 60_000);
    assert_ok!(engine.check_in(b.id, any_time(), DESK).await);

    // Still Monday 08:00, a day before the booking.
    let outcome = engine.check_out(b.id, CheckOut::default(), DESK).await.unwrap();
    let settlement = outcome.booking.settlement;
    assert_eq!(settlement.early_checkout_refund, 30_000);
    assert!(settlement.early_checkout_refund <= outcome.booking.price.total_price);
    assert!(matches!(outcome.intents[0], Intent::IssueRefund { amount: 30_000, .. }));
}

#[tokio::test]
async fn unpaid_booking_gets_no_early_checkout_refund() {
    let engine = engine();
    let id = engine.create_booking(meeting("09:00", "11:00", 2), DESK).await.unwrap().booking.id;
    let unpaid = Overrides {
        payment: true,
        timing: true,
        ..Overrides::default()
    };
    let approval = Approval {
        overrides: unpaid,
        ..Approval::default()
    };
    assert_ok!(engine.approve(id, approval, "manager").await);
    let check_in = CheckIn {
        overrides: unpaid,
        ..CheckIn::default()
    };
    assert_ok!(engine.check_in(id, check_in, DESK).await);

    let outcome = engine.check_out(id, CheckOut::default(), DESK).await.unwrap();
    assert_eq!(outcome.booking.payment_status, PaymentStatus::Pending);
    assert_eq!(outcome.booking.settlement.net_additional_amount, 0);
    assert!(!outcome.intents.iter().any(|i| matches!(i, Intent::IssueRefund { .. })));
}

// ── Updates ──────────────────────────────────────────────

#[tokio::test]
async fn update_excludes_the_booking_from_its_own_capacity_check() {
    let engine = engine();
    let b = confirmed(&engine, meeting("09:00", "10:00", 8)).await;

    let shift = BookingUpdate {
        start: Some("09:30".into()),
        end: Some("10:30".into()),
        ..BookingUpdate::default()
    };
    let outcome = engine.update_booking(b.id, shift, DESK).await.unwrap();
    assert_eq!(outcome.booking.span.to_string(), "09:30-10:30");
    // Same duration, same price: nothing to collect or refund.
    assert!(matches!(&outcome.intents[..], [Intent::Notify { .. }]));

    confirmed(&engine, meeting("10:00", "11:00", 4)).await;
    let grow = BookingUpdate {
        capacity: Some(9),
        ..BookingUpdate::default()
    };
    let err = engine.update_booking(b.id, grow, DESK).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::CapacityExceeded {
            requested: 9,
            remaining: 8,
            max: 12
        }
    );
}

#[tokio::test]
async fn longer_paid_booking_collects_the_difference() {
    let engine = engine();
    let b = confirmed(&engine, meeting("09:00", "10:00", 2)).await;
    let extend = BookingUpdate {
        end: Some("11:00".into()),
        ..BookingUpdate::default()
    };
    let outcome = engine.update_booking(b.id, extend, DESK).await.unwrap();
    assert_eq!(outcome.booking.price.total_price, 60_000);
    assert!(matches!(
        &outcome.intents[..],
        [Intent::CollectCharge { amount: 30_000, .. }, Intent::Notify { .. }]
    ));
}

#[tokio::test]
async fn update_moves_a_booking_across_dates() {
    let engine = engine();
    let b = confirmed(&engine, meeting("09:00", "10:00", 2)).await;
    let wednesday = date(2026, 10, 21);

    let moved = BookingUpdate {
        date: Some(wednesday),
        ..BookingUpdate::default()
    };
    let outcome = engine.update_booking(b.id, moved, DESK).await.unwrap();
    assert_eq!(outcome.booking.date, wednesday);
    assert_eq!(outcome.booking.booking_number, b.booking_number);

    assert!(engine.list_bookings(SpaceType::MeetingRoom, date(2026, 10, 20)).await.is_empty());
    let listed = engine.list_bookings(SpaceType::MeetingRoom, wednesday).await;
    assert_eq!(listed, vec![outcome.booking.clone()]);
    assert_eq!(engine.get_booking(b.id).await.unwrap().date, wednesday);
    assert_eq!(engine.get_by_number(&b.booking_number).await.unwrap().date, wednesday);

    let report = engine
        .check_availability(SpaceType::MeetingRoom, wednesday, "09:00", "10:00", 1)
        .await
        .unwrap();
    assert_eq!(report.committed_capacity, 2);
}

#[tokio::test]
async fn update_to_a_past_date_allocates_nothing() {
    let engine = engine();
    let b = confirmed(&engine, meeting("09:00", "10:00", 2)).await;
    let sunday = date(2026, 10, 18);
    let moved = BookingUpdate {
        date: Some(sunday),
        ..BookingUpdate::default()
    };
    let err = engine.update_booking(b.id, moved, DESK).await.unwrap_err();
    assert_eq!(err.reason_code(), "date_in_past");
    assert!(!engine.ledgers.contains_key(&(SpaceType::MeetingRoom, sunday)));
    assert_eq!(engine.get_booking(b.id).await.unwrap(), b);
}

// ── Slots and pricing ────────────────────────────────────

#[tokio::test]
async fn open_slots_skip_full_and_past_times() {
    let clock = clock();
    let engine = engine_at(clock.clone());
    confirmed(&engine, meeting("09:00", "10:00", 12)).await;

    let slots = engine
        .find_open_slots(SpaceType::MeetingRoom, date(2026, 10, 20), 60, 1)
        .await
        .unwrap();
    let starts: Vec<String> = slots.iter().take(3).map(|s| s.span.start.to_string()).collect();
    assert_eq!(starts, vec!["08:00", "10:00", "10:30"]);
    assert_eq!(slots.last().unwrap().span.end.to_string(), "22:00");

    clock.set(at(19, 12, 10));
    let today = engine
        .find_open_slots(SpaceType::MeetingRoom, date(2026, 10, 19), 60, 1)
        .await
        .unwrap();
    assert_eq!(today[0].span.start.to_string(), "12:30");

    let err = engine
        .find_open_slots(SpaceType::MeetingRoom, date(2026, 10, 20), 30, 1)
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "duration_too_short");
}

#[tokio::test]
async fn weekend_price_is_discounted() {
    let engine = engine();
    let tuesday = engine
        .calculate_price(SpaceType::MeetingRoom, date(2026, 10, 20), "09:00", "11:00")
        .unwrap();
    let saturday = engine
        .calculate_price(SpaceType::MeetingRoom, date(2026, 10, 24), "09:00", "11:00")
        .unwrap();
    assert_eq!(tuesday.total_price, 60_000);
    assert_eq!(saturday.total_price, 54_000);
}

// ── Journal ──────────────────────────────────────────────

#[tokio::test]
async fn journal_replay_restores_bookings_and_sequence() {
    let path = test_journal_path("replay.journal");
    let notify = Arc::new(NotifyHub::new());
    let (a, b) = {
        let engine = Engine::open(&path, EngineConfig::default(), clock(), notify.clone()).unwrap();
        let a = confirmed(&engine, meeting("09:00", "10:00", 4)).await;
        let b = engine.create_booking(meeting("11:00", "12:00", 1), DESK).await.unwrap().booking;
        let b = engine.cancel(b.id, Cancellation::default(), DESK).await.unwrap().booking;
        assert_eq!(engine.journal_appends_since_compact().await, 4);
        (a, b)
    };

    let engine = Engine::open(&path, EngineConfig::default(), clock(), notify).unwrap();
    assert_eq!(engine.get_booking(a.id).await.unwrap(), a);
    assert_eq!(engine.get_booking(b.id).await.unwrap(), b);
    assert_eq!(engine.get_by_number(&a.booking_number).await.unwrap().id, a.id);

    let c = engine.create_booking(meeting("13:00", "14:00", 1), DESK).await.unwrap().booking;
    assert_eq!(c.booking_number, "BK-20261020-000003");

    let report = engine
        .check_availability(SpaceType::MeetingRoom, date(2026, 10, 20), "09:00", "10:00", 1)
        .await
        .unwrap();
    assert_eq!(report.committed_capacity, 4);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_journal_path("compaction.journal");
    let notify = Arc::new(NotifyHub::new());
    let snapshot = {
        let engine = Engine::open(&path, EngineConfig::default(), clock(), notify.clone()).unwrap();
        let b = confirmed(&engine, meeting("09:00", "10:00", 2)).await;
        let moved = BookingUpdate {
            date: Some(date(2026, 10, 22)),
            ..BookingUpdate::default()
        };
        engine.update_booking(b.id, moved, DESK).await.unwrap();
        let done = engine.cancel(b.id, Cancellation::default(), DESK).await.unwrap().booking;

        engine.compact_journal().await.unwrap();
        assert_eq!(engine.journal_appends_since_compact().await, 0);
        done
    };

    assert_eq!(crate::journal::Journal::read(&path).unwrap().events.len(), 1);
    let engine = Engine::open(&path, EngineConfig::default(), clock(), notify).unwrap();
    assert_eq!(engine.get_booking(snapshot.id).await.unwrap(), snapshot);
    assert!(engine.list_bookings(SpaceType::MeetingRoom, date(2026, 10, 20)).await.is_empty());
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn concurrent_creates_are_group_committed() {
    let path = test_journal_path("group_commit.journal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::open(&path, EngineConfig::default(), clock(), notify.clone()).unwrap());

    let mut handles = Vec::new();
    for i in 0..20u32 {
        let eng = engine.clone();
        let space = if i % 2 == 0 { SpaceType::SharedDesk } else { SpaceType::Studio };
        handles.push(tokio::spawn(async move {
            eng.create_booking(request(space, 21, "09:00", "17:00", 1), DESK).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.index.len(), 20);

    let replayed = Engine::open(&path, EngineConfig::default(), clock(), notify).unwrap();
    assert_eq!(replayed.index.len(), 20);
    assert_eq!(replayed.numbers.len(), 20);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn committed_events_reach_subscribers() {
    let engine = engine();
    let mut rx = engine.notify.subscribe(SpaceType::MeetingRoom);
    let b = engine.create_booking(meeting("09:00", "10:00", 1), DESK).await.unwrap().booking;
    engine.approve(b.id, paid(), DESK).await.unwrap();

    assert!(matches!(rx.recv().await.unwrap(), Event::Created(created) if created.id == b.id));
    match rx.recv().await.unwrap() {
        Event::Transitioned { action, booking } => {
            assert_eq!(action, Action::Approve);
            assert_eq!(booking.status, BookingStatus::Confirmed);
        }
        other => panic!("unexpected {other:?}"),
    }
}
