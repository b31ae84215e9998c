//! Billing Engine - 停车计费
//!
//! Pure mapping from (entry time, exit time, tariff) to a fee breakdown.
//!
//! ```text
//! total    = floor(seconds / 60)
//! total <= grace              → 0 (grace applied)
//! billable = total - grace
//! units    = ceil(billable / unit)
//! base     = units * unit / 60 * tariff_per_hour
//! amount   = max(base, min_charge), capped at max_daily_charge
//! amount   = round(amount, 2, half-up)
//! ```

use super::money::round_money;
use rust_decimal::Decimal;
use serde::Serialize;
use shared::response::BillingInfo;
use thiserror::Error;

/// Billing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("Exit time {exit} is before entry time {entry}")]
    InvalidInterval { entry: i64, exit: i64 },

    #[error("Invalid tariff: {0}")]
    InvalidTariff(String),
}

/// Tariff configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tariff {
    pub tariff_per_hour: Decimal,
    pub billing_unit_minutes: u32,
    pub min_charge: Decimal,
    pub grace_period_minutes: u32,
    pub max_daily_charge: Option<Decimal>,
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            tariff_per_hour: Decimal::from(10),
            billing_unit_minutes: 15,
            min_charge: Decimal::from(10),
            grace_period_minutes: 5,
            max_daily_charge: None,
        }
    }
}

impl Tariff {
    /// Reject tariffs that cannot produce a meaningful fee
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.billing_unit_minutes == 0 {
            return Err(BillingError::InvalidTariff(
                "billing unit must be at least one minute".into(),
            ));
        }
        if self.tariff_per_hour.is_sign_negative() {
            return Err(BillingError::InvalidTariff(format!(
                "tariff per hour must be non-negative, got {}",
                self.tariff_per_hour
            )));
        }
        if self.min_charge.is_sign_negative() {
            return Err(BillingError::InvalidTariff(format!(
                "minimum charge must be non-negative, got {}",
                self.min_charge
            )));
        }
        if let Some(max) = self.max_daily_charge
            && max.is_sign_negative()
        {
            return Err(BillingError::InvalidTariff(format!(
                "maximum daily charge must be non-negative, got {}",
                max
            )));
        }
        Ok(())
    }

    pub fn info(&self) -> BillingInfo {
        BillingInfo {
            tariff_per_hour: self.tariff_per_hour,
            billing_unit_minutes: self.billing_unit_minutes,
            min_charge: self.min_charge,
            grace_period_minutes: self.grace_period_minutes,
            max_daily_charge: self.max_daily_charge,
        }
    }
}

/// Fee breakdown for one visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub duration_minutes: i64,
    pub billable_minutes: i64,
    pub billing_units: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tariff_applied: Decimal,
    pub grace_applied: bool,
    pub min_charge_applied: bool,
    pub max_charge_applied: bool,
    pub duration_display: String,
}

/// Compute the fee for a stay (timestamps in UTC millis)
pub fn calculate_fee(
    entry_millis: i64,
    exit_millis: i64,
    tariff: &Tariff,
) -> Result<FeeBreakdown, BillingError> {
    if exit_millis < entry_millis {
        return Err(BillingError::InvalidInterval {
            entry: entry_millis,
            exit: exit_millis,
        });
    }

    let total_seconds = (exit_millis - entry_millis) / 1000;
    let duration_minutes = total_seconds / 60;
    let duration_display = format_duration(duration_minutes);
    let grace = i64::from(tariff.grace_period_minutes);

    if duration_minutes <= grace {
        return Ok(FeeBreakdown {
            duration_minutes,
            billable_minutes: 0,
            billing_units: 0,
            amount: Decimal::ZERO,
            tariff_applied: tariff.tariff_per_hour,
            grace_applied: true,
            min_charge_applied: false,
            max_charge_applied: false,
            duration_display,
        });
    }

    let unit = i64::from(tariff.billing_unit_minutes.max(1));
    let billable_minutes = duration_minutes - grace;
    let billing_units = (billable_minutes + unit - 1) / unit;

    // multiply before dividing so common units (15, 30) stay exact
    let base_amount =
        Decimal::from(billing_units * unit) * tariff.tariff_per_hour / Decimal::from(60);

    let mut amount = base_amount;
    let mut min_charge_applied = false;
    let mut max_charge_applied = false;

    if amount < tariff.min_charge {
        amount = tariff.min_charge;
        min_charge_applied = true;
    }
    if let Some(max) = tariff.max_daily_charge
        && amount > max
    {
        amount = max;
        max_charge_applied = true;
    }

    Ok(FeeBreakdown {
        duration_minutes,
        billable_minutes,
        billing_units,
        amount: round_money(amount),
        tariff_applied: tariff.tariff_per_hour,
        grace_applied: false,
        min_charge_applied,
        max_charge_applied,
        duration_display,
    })
}

/// Human readable duration
///
/// - `< 60`: `"45 minutes"`, `"1 minute"`
/// - otherwise: `"2 hours"`, `"1 hour 5 minutes"`
pub fn format_duration(minutes: i64) -> String {
    fn plural(n: i64, unit: &str) -> String {
        if n == 1 {
            format!("{} {}", n, unit)
        } else {
            format!("{} {}s", n, unit)
        }
    }

    if minutes < 60 {
        return plural(minutes, "minute");
    }

    let hours = minutes / 60;
    let rest = minutes % 60;
    if rest == 0 {
        plural(hours, "hour")
    } else {
        format!("{} {}", plural(hours, "hour"), plural(rest, "minute"))
    }
}
