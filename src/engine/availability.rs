use ulid::Ulid;

use crate::config::EngineConfig;
use crate::limits::MAX_SLOT_CANDIDATES;
use crate::model::*;

// ── Capacity Allocator ───────────────────────────────────────────

/// Sum the capacity committed by capacity-holding bookings overlapping `query`.
///
/// Only `confirmed` and `checked_in` bookings count. `exclude` drops one booking
/// from the scan so a booking re-checked against its own slot does not block itself.
/// A missing ledger means nothing has been booked that day.
pub fn check_capacity(
    ledger: Option<&DayLedger>,
    max_capacity: u32,
    query: &Span,
    needed: u32,
    exclude: Option<Ulid>,
) -> AvailabilityReport {
    let mut committed: u32 = 0;
    let mut conflicting_bookings = Vec::new();

    if let Some(ledger) = ledger {
        for b in ledger.overlapping(query) {
            if Some(b.id) == exclude || !b.holds_capacity() {
                continue;
            }
            committed = committed.saturating_add(b.capacity_requested);
            conflicting_bookings.push(ConflictingBooking {
                id: b.id,
                booking_number: b.booking_number.clone(),
                span: b.span,
                capacity: b.capacity_requested,
                status: b.status,
            });
        }
    }

    let remaining_capacity = max_capacity.saturating_sub(committed);
    AvailabilityReport {
        available: needed <= remaining_capacity,
        max_capacity,
        committed_capacity: committed,
        remaining_capacity,
        conflicting_bookings,
    }
}

fn time_at(minutes: u32) -> Option<TimeOfDay> {
    u16::try_from(minutes).ok().and_then(TimeOfDay::from_minutes)
}

/// Candidate `[t, t + duration)` slots inside operating hours, stepping by
/// `slot_step_minutes`, that still fit `needed`.
pub fn open_slots(
    ledger: Option<&DayLedger>,
    config: &EngineConfig,
    space_type: SpaceType,
    duration_minutes: u32,
    needed: u32,
) -> Vec<OpenSlot> {
    let Some(hours) = config.operating_hours.as_span() else {
        return Vec::new();
    };
    if duration_minutes == 0 {
        return Vec::new();
    }
    let max = config.space(space_type).max_capacity;
    let step = config.slot_step_minutes.max(1);
    let close = u32::from(hours.end.minutes());

    let mut slots = Vec::new();
    let mut start = u32::from(hours.start.minutes());
    for _ in 0..MAX_SLOT_CANDIDATES {
        let end = start + duration_minutes;
        if end > close {
            break;
        }
        let (Some(s), Some(e)) = (time_at(start), time_at(end)) else {
            break;
        };
        let span = Span::new(s, e);
        let report = check_capacity(ledger, max, &span, needed, None);
        if report.available {
            slots.push(OpenSlot {
                span,
                remaining_capacity: report.remaining_capacity,
            });
        }
        start += step;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn ledger_with(space: SpaceType, bookings: Vec<Booking>) -> DayLedger {
        let mut ledger = DayLedger::new((space, date(2026, 10, 20)));
        for b in bookings {
            ledger.upsert(b);
        }
        ledger
    }

    fn meeting(s: Span, capacity: u32, status: BookingStatus) -> Booking {
        booking(SpaceType::MeetingRoom, date(2026, 10, 20), s, capacity, status)
    }

    #[test]
    fn overlapping_request_sees_remaining_four() {
        let existing = meeting(span(9, 0, 10, 0), 8, BookingStatus::Confirmed);
        let existing_id = existing.id;
        let ledger = ledger_with(SpaceType::MeetingRoom, vec![existing]);

        let report = check_capacity(Some(&ledger), 12, &span(9, 30, 10, 30), 5, None);
        assert!(!report.available);
        assert_eq!(report.remaining_capacity, 4);
        assert_eq!(report.committed_capacity, 8);
        assert_eq!(report.conflicting_bookings.len(), 1);
        assert_eq!(report.conflicting_bookings[0].id, existing_id);

        assert!(check_capacity(Some(&ledger), 12, &span(9, 30, 10, 30), 4, None).available);
    }

    #[test]
    fn adjacent_bookings_do_not_count() {
        let ledger = ledger_with(SpaceType::MeetingRoom, vec![meeting(span(9, 0, 10, 0), 12, BookingStatus::Confirmed)]);
        let report = check_capacity(Some(&ledger), 12, &span(10, 0, 11, 0), 12, None);
        assert!(report.available);
        assert!(report.conflicting_bookings.is_empty());
    }

    #[test]
    fn only_holding_statuses_count() {
        let ledger = ledger_with(
            SpaceType::MeetingRoom,
            vec![
                meeting(span(9, 0, 10, 0), 3, BookingStatus::Pending),
                meeting(span(9, 0, 10, 0), 3, BookingStatus::Cancelled),
                meeting(span(9, 0, 10, 0), 3, BookingStatus::Completed),
                meeting(span(9, 0, 10, 0), 2, BookingStatus::CheckedIn),
                meeting(span(9, 0, 10, 0), 1, BookingStatus::Confirmed),
            ],
        );
        let report = check_capacity(Some(&ledger), 12, &span(9, 0, 10, 0), 1, None);
        assert_eq!(report.committed_capacity, 3);
        assert_eq!(report.remaining_capacity, 9);
    }

    #[test]
    fn excluded_booking_does_not_block_itself() {
        let b = meeting(span(9, 0, 10, 0), 12, BookingStatus::Confirmed);
        let id = b.id;
        let ledger = ledger_with(SpaceType::MeetingRoom, vec![b]);
        assert!(!check_capacity(Some(&ledger), 12, &span(9, 0, 11, 0), 12, None).available);
        assert!(check_capacity(Some(&ledger), 12, &span(9, 0, 11, 0), 12, Some(id)).available);
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let ledger = ledger_with(
            SpaceType::MeetingRoom,
            vec![
                meeting(span(9, 0, 10, 0), 10, BookingStatus::Confirmed),
                meeting(span(9, 0, 10, 0), 10, BookingStatus::Confirmed),
            ],
        );
        let report = check_capacity(Some(&ledger), 12, &span(9, 0, 10, 0), 1, None);
        assert_eq!(report.remaining_capacity, 0);
        assert_eq!(report.committed_capacity, 20);
    }

    #[test]
    fn empty_day_is_fully_available() {
        let report = check_capacity(None, 6, &span(9, 0, 10, 0), 6, None);
        assert!(report.available);
        assert_eq!(report.remaining_capacity, 6);
    }

    #[test]
    fn open_slots_step_through_operating_hours() {
        let config = EngineConfig::default();
        let slots = open_slots(None, &config, SpaceType::Studio, 120, 1);
        // 08:00..=20:00 in 30 minute steps
        assert_eq!(slots.len(), 25);
        assert_eq!(slots[0].span, span(8, 0, 10, 0));
        assert_eq!(slots.last().unwrap().span, span(20, 0, 22, 0));
    }

    #[test]
    fn open_slots_skip_full_periods() {
        let config = EngineConfig::default();
        let ledger = ledger_with(SpaceType::Studio, vec![booking(
            SpaceType::Studio,
            date(2026, 10, 20),
            span(12, 0, 14, 0),
            6,
            BookingStatus::Confirmed,
        )]);
        let slots = open_slots(Some(&ledger), &config, SpaceType::Studio, 60, 1);
        assert!(slots.iter().all(|s| !s.span.overlaps(&span(12, 0, 14, 0))));
        assert!(slots.iter().any(|s| s.span == span(11, 0, 12, 0)));
        assert!(slots.iter().any(|s| s.span == span(14, 0, 15, 0)));
    }
}
