use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::QUARTERS_PER_YEAR;
use crate::error::CalculationError;
use crate::types::{Money, Rate};
use crate::EngineResult;

const IRR_GUESS: f64 = 0.10;
const IRR_TOLERANCE: f64 = 1e-6;
const MAX_IRR_ITERATIONS: u32 = 100;
const MAX_BISECTIONS: u32 = 200;
const RATE_FLOOR: f64 = -0.99;
const RATE_CEILING: f64 = 10.0;

/// Net Present Value of a series of per-period cash flows
pub fn npv(rate: Rate, cash_flows: &[Money]) -> EngineResult<Money> {
    if rate <= dec!(-1) {
        return Err(CalculationError::InvalidInput {
            field: "rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }

    let mut result = Decimal::ZERO;
    let one_plus_r = Decimal::ONE + rate;
    let mut discount = Decimal::ONE;

    for (t, cf) in cash_flows.iter().enumerate() {
        if t > 0 {
            discount = discount.checked_mul(one_plus_r).ok_or_else(|| {
                CalculationError::InvalidInput {
                    field: "rate".into(),
                    reason: format!("Discount factor overflows at period {t}"),
                }
            })?;
        }
        result += cf / discount;
    }

    Ok(result)
}

/// Per-period Internal Rate of Return.
///
/// Newton-Raphson from a 10% guess, stopping when |NPV| < 1e-6 or the
/// derivative flattens below 1e-6, with the rate clamped to [-0.99, 10]
/// after every step. If Newton stops short of a root the clamp band is
/// bisected, provided NPV changes sign across it.
///
/// Returns exactly `0` when the flows are empty, all share one sign, or no
/// finite root is found. Callers must read `0` from an all-same-signed
/// sequence as "not computable", not as breakeven.
pub fn compute_irr(cash_flows: &[Money]) -> Rate {
    let has_positive = cash_flows.iter().any(|cf| *cf > Decimal::ZERO);
    let has_negative = cash_flows.iter().any(|cf| *cf < Decimal::ZERO);
    if !has_positive || !has_negative {
        return Decimal::ZERO;
    }

    let flows: Vec<f64> = cash_flows.iter().map(|cf| cf.to_f64().unwrap_or(0.0)).collect();

    let mut rate = IRR_GUESS;
    for _ in 0..MAX_IRR_ITERATIONS {
        let (value, derivative) = npv_and_derivative(&flows, rate);
        if !value.is_finite() || !derivative.is_finite() {
            break;
        }
        if value.abs() < IRR_TOLERANCE {
            return to_rate(rate);
        }
        if derivative.abs() < IRR_TOLERANCE {
            break;
        }
        rate = (rate - value / derivative).clamp(RATE_FLOOR, RATE_CEILING);
    }

    tracing::debug!(last_rate = rate, "IRR Newton iteration did not converge, bisecting");
    bisect(&flows).map(to_rate).unwrap_or(Decimal::ZERO)
}

/// Convert a per-quarter rate to its annual equivalent: (1 + q)^4 - 1.
pub fn annualize_quarterly(rate: Rate) -> Rate {
    let one_plus = Decimal::ONE + rate;
    let mut compounded = Decimal::ONE;
    for _ in 0..QUARTERS_PER_YEAR {
        compounded = match compounded.checked_mul(one_plus) {
            Some(v) => v,
            None => return Decimal::ZERO,
        };
    }
    compounded - Decimal::ONE
}

fn npv_and_derivative(flows: &[f64], rate: f64) -> (f64, f64) {
    let one_plus_r = 1.0 + rate;
    let mut value = 0.0;
    let mut derivative = 0.0;
    let mut discount = 1.0;
    for (t, cf) in flows.iter().enumerate() {
        if t > 0 {
            discount *= one_plus_r;
        }
        value += cf / discount;
        derivative -= t as f64 * cf / (discount * one_plus_r);
    }
    (value, derivative)
}

fn npv_f64(flows: &[f64], rate: f64) -> f64 {
    npv_and_derivative(flows, rate).0
}

fn bisect(flows: &[f64]) -> Option<f64> {
    let mut low = RATE_FLOOR;
    let mut high = RATE_CEILING;
    let mut f_low = npv_f64(flows, low);
    let f_high = npv_f64(flows, high);
    if !f_low.is_finite() || !f_high.is_finite() || f_low.signum() == f_high.signum() {
        return None;
    }

    for _ in 0..MAX_BISECTIONS {
        let mid = 0.5 * (low + high);
        let f_mid = npv_f64(flows, mid);
        if f_mid.abs() < IRR_TOLERANCE || (high - low) < 1e-12 {
            return Some(mid);
        }
        if f_mid.signum() == f_low.signum() {
            low = mid;
            f_low = f_mid;
        } else {
            high = mid;
        }
    }
    Some(0.5 * (low + high))
}

fn to_rate(rate: f64) -> Rate {
    if !rate.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_f64(rate).unwrap_or(Decimal::ZERO)
}
