//! Cancellation refunds.
//!
//! `fee = total_paid - refund` always; the fee is never set on its own.

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::limits::MAX_AMOUNT;
use crate::model::Amount;
use crate::pricing::div_floor;

/// One step of the tiered schedule: at least `min_hours` of notice pays `percent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundTier {
    pub min_hours: i64,
    pub percent: u8,
}

impl RefundTier {
    /// ≥48h → 95%, ≥24h → 85%, ≥12h → 70%, ≥2h → 50%, otherwise nothing.
    pub fn observed_schedule() -> Vec<RefundTier> {
        vec![
            RefundTier { min_hours: 48, percent: 95 },
            RefundTier { min_hours: 24, percent: 85 },
            RefundTier { min_hours: 12, percent: 70 },
            RefundTier { min_hours: 2, percent: 50 },
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundMode {
    #[default]
    Automatic,
    FullRefund,
    NoRefund,
    /// Without a percentage this falls through to the automatic tiers.
    PartialRefund { percent: Option<u8> },
    CustomAmount { amount: Amount },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefundRequest {
    pub mode: RefundMode,
    pub waive_fee: bool,
    pub emergency: bool,
}

impl RefundRequest {
    pub fn mode(mode: RefundMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundOutcome {
    pub total_paid: Amount,
    pub refund_amount: Amount,
    pub cancellation_fee: Amount,
    /// Percentage applied, when the refund came from a percentage.
    pub percent: Option<u8>,
    /// Whole hours of notice, clamped at zero for display.
    pub hours_until_event: i64,
}

impl RefundOutcome {
    pub fn nothing_paid(minutes_until_event: i64) -> Self {
        Self {
            total_paid: 0,
            refund_amount: 0,
            cancellation_fee: 0,
            percent: None,
            hours_until_event: (minutes_until_event / 60).max(0),
        }
    }
}

/// Percentage owed for a signed notice period. Negative notice (cancelling after
/// the start) never satisfies a tier, so it pays the bottom of the schedule.
pub fn tier_percent(tiers: &[RefundTier], minutes_until_event: i64) -> u8 {
    tiers
        .iter()
        .filter(|t| minutes_until_event >= t.min_hours.saturating_mul(60))
        .max_by_key(|t| t.min_hours)
        .map_or(0, |t| t.percent)
}

pub fn compute_refund(
    total_paid: Amount,
    minutes_until_event: i64,
    request: &RefundRequest,
    tiers: &[RefundTier],
) -> Result<RefundOutcome, EngineError> {
    if total_paid < 0 {
        return Err(EngineError::NegativeTotal(total_paid));
    }
    if total_paid > MAX_AMOUNT {
        return Err(EngineError::LimitExceeded("amount too large"));
    }

    let by_percent = |pct: u8| div_floor(total_paid * Amount::from(pct), 100);

    let (refund_amount, percent) = if request.waive_fee || request.emergency {
        (total_paid, Some(100))
    } else {
        match request.mode {
            RefundMode::FullRefund => (total_paid, Some(100)),
            RefundMode::NoRefund => (0, Some(0)),
            RefundMode::CustomAmount { amount } => {
                if amount < 0 {
                    return Err(EngineError::NegativeTotal(amount));
                }
                (amount.min(total_paid), None)
            }
            RefundMode::PartialRefund { percent: Some(pct) } => {
                if pct > 100 {
                    return Err(EngineError::LimitExceeded("refund percent above 100"));
                }
                (by_percent(pct), Some(pct))
            }
            RefundMode::PartialRefund { percent: None } | RefundMode::Automatic => {
                let pct = tier_percent(tiers, minutes_until_event);
                (by_percent(pct), Some(pct))
            }
        }
    };

    Ok(RefundOutcome {
        total_paid,
        refund_amount,
        cancellation_fee: total_paid - refund_amount,
        percent,
        hours_until_event: (minutes_until_event / 60).max(0),
    })
}
