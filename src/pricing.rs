//! Price calculation.
//!
//! Charges always round up and refunds always round down. Both helpers below
//! take non-negative operands.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::config::{EngineConfig, RateBasis, SpaceSpec};
use crate::engine::EngineError;
use crate::limits::MAX_AMOUNT;
use crate::model::{Amount, PriceBreakdown, SpaceType};

/// Hours in the billing day used to turn a daily rate into an hourly one.
pub const BILLABLE_HOURS_PER_DAY: Amount = 8;

pub(crate) fn div_ceil(n: Amount, d: Amount) -> Amount {
    debug_assert!(n >= 0 && d > 0);
    (n + d - 1) / d
}

pub(crate) fn div_floor(n: Amount, d: Amount) -> Amount {
    debug_assert!(n >= 0 && d > 0);
    n / d
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub hourly_rate: Amount,
    pub base_price: Amount,
    pub discount_amount: Amount,
    pub total_price: Amount,
}

pub fn hourly_rate(spec: &SpaceSpec) -> Amount {
    match spec.basis {
        RateBasis::Hourly => spec.rate,
        RateBasis::Daily => div_ceil(spec.rate, BILLABLE_HOURS_PER_DAY),
    }
}

/// Pure function of (space type, weekday, duration).
pub fn calculate_price(
    config: &EngineConfig,
    space_type: SpaceType,
    date: NaiveDate,
    duration_minutes: u32,
) -> PriceQuote {
    let hourly_rate = hourly_rate(config.space(space_type));
    let base_price = div_ceil(hourly_rate * Amount::from(duration_minutes), 60);
    let discount_amount = if config.weekend_days.contains(&date.weekday()) {
        div_ceil(base_price * Amount::from(config.weekend_discount_percent), 100)
    } else {
        0
    };
    PriceQuote {
        hourly_rate,
        base_price,
        discount_amount,
        total_price: base_price - discount_amount,
    }
}

/// Fold caller-supplied services and coupon into a quote.
/// A negative result is rejected, never clamped.
pub fn compose_total(
    quote: &PriceQuote,
    additional_services_cost: Amount,
    extra_discount: Amount,
) -> Result<PriceBreakdown, EngineError> {
    if additional_services_cost > MAX_AMOUNT || extra_discount > MAX_AMOUNT {
        return Err(EngineError::LimitExceeded("amount too large"));
    }
    if additional_services_cost < 0 {
        return Err(EngineError::NegativeTotal(additional_services_cost));
    }
    if extra_discount < 0 {
        return Err(EngineError::NegativeTotal(extra_discount));
    }
    let total_price = quote.total_price - extra_discount + additional_services_cost;
    if total_price < 0 {
        return Err(EngineError::NegativeTotal(total_price));
    }
    Ok(PriceBreakdown {
        hourly_rate: quote.hourly_rate,
        base_price: quote.base_price,
        weekend_discount: quote.discount_amount,
        extra_discount,
        discount_amount: quote.discount_amount + extra_discount,
        additional_services_cost,
        total_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::date;
    use proptest::prelude::*;

    // 2026-10-20 is a Tuesday, 2026-10-24 a Saturday.
    fn tuesday() -> NaiveDate {
        date(2026, 10, 20)
    }

    fn saturday() -> NaiveDate {
        date(2026, 10, 24)
    }

    #[test]
    fn meeting_room_is_already_hourly() {
        let config = EngineConfig::default();
        let q = calculate_price(&config, SpaceType::MeetingRoom, tuesday(), 120);
        assert_eq!(
            q,
            PriceQuote { hourly_rate: 30_000, base_price: 60_000, discount_amount: 0, total_price: 60_000 }
        );
    }

    #[test]
    fn daily_rate_divided_by_eight() {
        let config = EngineConfig::default();
        let q = calculate_price(&config, SpaceType::PrivateOffice, tuesday(), 90);
        assert_eq!(q.hourly_rate, 150_000);
        assert_eq!(q.base_price, 225_000);
    }

    #[test]
    fn daily_conversion_rounds_up() {
        let mut config = EngineConfig::default();
        config.spaces.get_mut(SpaceType::Studio).rate = 1_000_001;
        let q = calculate_price(&config, SpaceType::Studio, tuesday(), 60);
        assert_eq!(q.hourly_rate, 125_001);
    }

    #[test]
    fn partial_hours_round_up() {
        let mut config = EngineConfig::default();
        config.spaces.get_mut(SpaceType::MeetingRoom).rate = 10_001;
        let q = calculate_price(&config, SpaceType::MeetingRoom, tuesday(), 90);
        // 10_001 * 1.5 = 15_001.5 → 15_002
        assert_eq!(q.base_price, 15_002);
    }

    #[test]
    fn weekend_discount_rounds_up() {
        let mut config = EngineConfig::default();
        config.spaces.get_mut(SpaceType::MeetingRoom).rate = 10_001;
        let q = calculate_price(&config, SpaceType::MeetingRoom, saturday(), 60);
        // 10% of 10_001 = 1_000.1 → 1_001
        assert_eq!(q.discount_amount, 1_001);
        assert_eq!(q.total_price, 9_000);
    }

    #[test]
    fn weekend_days_are_configurable() {
        let mut config = EngineConfig::default();
        config.weekend_days = vec![chrono::Weekday::Tue];
        let tue = calculate_price(&config, SpaceType::MeetingRoom, tuesday(), 60);
        let sat = calculate_price(&config, SpaceType::MeetingRoom, saturday(), 60);
        assert_eq!(tue.discount_amount, 3_000);
        assert_eq!(sat.discount_amount, 0);
    }

    #[test]
    fn compose_adds_services_and_coupon() {
        let quote = PriceQuote { hourly_rate: 30_000, base_price: 60_000, discount_amount: 6_000, total_price: 54_000 };
        let p = compose_total(&quote, 20_000, 4_000).unwrap();
        assert_eq!(p.total_price, 70_000);
        assert_eq!(p.discount_amount, 10_000);
    }

    #[test]
    fn compose_rejects_negative_total() {
        let quote = PriceQuote { hourly_rate: 30_000, base_price: 30_000, discount_amount: 0, total_price: 30_000 };
        assert_eq!(compose_total(&quote, 0, 40_000), Err(EngineError::NegativeTotal(-10_000)));
        assert_eq!(compose_total(&quote, -5, 0), Err(EngineError::NegativeTotal(-5)));
    }

    proptest! {
        #[test]
        fn price_depends_only_on_weekday_and_duration(
            space_idx in 0usize..6,
            week_offset in 0i64..20,
            weekday_offset in 0i64..7,
            minutes in 60u32..=720,
        ) {
            let config = EngineConfig::default();
            let space = SpaceType::ALL[space_idx];
            let a = tuesday() + chrono::Duration::days(weekday_offset);
            let b = a + chrono::Duration::weeks(week_offset);
            prop_assert_eq!(
                calculate_price(&config, space, a, minutes),
                calculate_price(&config, space, b, minutes)
            );
        }

        #[test]
        fn discount_only_on_weekend_days(weekday_offset in 0i64..7, minutes in 60u32..=720) {
            let config = EngineConfig::default();
            let day = tuesday() + chrono::Duration::days(weekday_offset);
            let q = calculate_price(&config, SpaceType::MeetingRoom, day, minutes);
            let weekend = config.weekend_days.contains(&day.weekday());
            prop_assert_eq!(q.discount_amount > 0, weekend);
            prop_assert!(q.total_price >= 0);
            prop_assert_eq!(q.total_price + q.discount_amount, q.base_price);
        }
    }
}
