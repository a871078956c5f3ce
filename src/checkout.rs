use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::limits::MAX_AMOUNT;
use crate::model::Amount;

const MINUTES_PER_DAY: i64 = 24 * 60;
const MAX_OVERTIME_RATE_PERCENT: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutPolicy {
    /// Lateness tolerated before overtime is charged.
    pub overtime_grace_minutes: i64,
    /// Overtime rate as a percentage of the hourly rate.
    pub overtime_rate_percent: i64,
    /// Leaving at least this early earns a partial refund.
    pub early_threshold_minutes: i64,
    pub early_refund_rate_percent: i64,
}

impl Default for CheckoutPolicy {
    fn default() -> Self {
        Self {
            overtime_grace_minutes: 15,
            overtime_rate_percent: 150,
            early_threshold_minutes: 60,
            early_refund_rate_percent: 50,
        }
    }
}

impl CheckoutPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.overtime_grace_minutes < 0 || self.early_threshold_minutes < 0 {
            return Err("checkout windows must not be negative".into());
        }
        if self.overtime_rate_percent < 0 || self.early_refund_rate_percent < 0 {
            return Err("checkout rates must not be negative".into());
        }
        if self.overtime_grace_minutes > MINUTES_PER_DAY || self.early_threshold_minutes > MINUTES_PER_DAY {
            return Err("checkout windows must fit in a day".into());
        }
        if self.overtime_rate_percent > MAX_OVERTIME_RATE_PERCENT {
            return Err(format!("overtime rate above {MAX_OVERTIME_RATE_PERCENT}%"));
        }
        if self.early_refund_rate_percent > 100 {
            return Err("early refund rate above 100%".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckoutAdjustment {
    pub overtime_minutes: i64,
    pub overtime_charge: Amount,
    pub early_minutes: i64,
    pub early_refund: Amount,
}

/// Operator-assessed charges raised at checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraCharges {
    pub damage: Amount,
    pub cleaning: Amount,
    pub additional: Amount,
}

impl ExtraCharges {
    pub fn validate(&self) -> Result<(), EngineError> {
        for amount in [self.damage, self.cleaning, self.additional] {
            if amount < 0 {
                return Err(EngineError::NegativeTotal(amount));
            }
            if amount > MAX_AMOUNT {
                return Err(EngineError::LimitExceeded("amount too large"));
            }
        }
        Ok(())
    }

    pub fn sum(&self) -> Amount {
        self.damage + self.cleaning + self.additional
    }
}

/// `minutes * hourly_rate * percent / 6000`, widened so a long overstay cannot
/// overflow and clamped to [`MAX_AMOUNT`].
fn per_minute(minutes: i64, hourly_rate: Amount, percent: i64, round_up: bool) -> Amount {
    let n = i128::from(minutes) * i128::from(hourly_rate) * i128::from(percent);
    let d = 60 * 100;
    let amount = if round_up { (n + d - 1) / d } else { n / d };
    Amount::try_from(amount.min(i128::from(MAX_AMOUNT))).unwrap_or(MAX_AMOUNT)
}

/// Compare actual against planned checkout. At most one side is non-zero.
///
/// Overtime bills only the minutes past the grace window. Once the early
/// threshold is crossed, every unused booked minute is refunded; time before
/// the booked start was never bought and earns nothing.
pub fn compute_adjustment(
    starts_at: NaiveDateTime,
    planned_end: NaiveDateTime,
    actual_checkout: NaiveDateTime,
    hourly_rate: Amount,
    policy: &CheckoutPolicy,
) -> CheckoutAdjustment {
    let delta = (actual_checkout - planned_end).num_minutes();
    let rate = hourly_rate.max(0);

    if delta > policy.overtime_grace_minutes {
        let overtime_minutes = delta - policy.overtime_grace_minutes;
        CheckoutAdjustment {
            overtime_minutes,
            overtime_charge: per_minute(overtime_minutes, rate, policy.overtime_rate_percent, true),
            ..CheckoutAdjustment::default()
        }
    } else if -delta > policy.early_threshold_minutes {
        let early_minutes = (planned_end - actual_checkout.max(starts_at)).num_minutes().max(0);
        CheckoutAdjustment {
            early_minutes,
            early_refund: per_minute(early_minutes, rate, policy.early_refund_rate_percent, false),
            ..CheckoutAdjustment::default()
        }
    } else {
        CheckoutAdjustment::default()
    }
}

/// Positive: the customer owes more. Negative: the customer is owed a refund.
pub fn net_additional_amount(adjustment: &CheckoutAdjustment, extras: &ExtraCharges) -> Amount {
    adjustment.overtime_charge + extras.sum() - adjustment.early_refund
}
