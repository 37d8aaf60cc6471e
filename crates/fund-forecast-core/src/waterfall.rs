use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CalculationError;
use crate::types::*;
use crate::EngineResult;

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// Input for the fund-level LP/GP split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallInput {
    /// Capital invested into portfolio companies
    pub total_invested: Money,
    /// Total realized and residual value at exit
    pub total_exit_value: Money,
    /// GP carried interest (0.20 = 20%)
    pub carry_pct: Rate,
    /// LP preferred return on invested capital (0.08 = 8%)
    pub hurdle_rate: Rate,
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// How exit value is split between LPs and the GP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaterfallSummary {
    pub total_invested: Money,
    pub total_exit_value: Money,
    pub total_profit: Money,
    pub lp_return_of_capital: Money,
    pub lp_preferred_return: Money,
    /// No catch-up tranche in this model; always zero
    pub gp_catch_up: Money,
    pub gp_carry: Money,
    /// LP share of profit above the preferred return. Negative when profit
    /// falls short of the preferred return.
    pub lp_carry: Money,
    pub final_lp_proceeds: Money,
    pub final_gp_proceeds: Money,
}

// ---------------------------------------------------------------------------
// Calculation
// ---------------------------------------------------------------------------

/// American-style (deal-by-deal, no catch-up) distribution waterfall,
/// applied here to the fund's aggregate invested capital and exit value.
///
/// Without profit, the LPs take everything as return of capital. With
/// profit, LPs receive their capital back plus `invested x hurdle`; what is
/// left is split `carry_pct` to the GP and the rest to the LPs. LP and GP
/// proceeds always sum to the exit value.
///
/// Carry and hurdle are not range-checked: validation only warns about
/// them, and a negative carry floors the GP share at zero.
pub fn compute_waterfall(
    total_invested: Money,
    total_exit_value: Money,
    carry_pct: Rate,
    hurdle_rate: Rate,
) -> EngineResult<WaterfallSummary> {
    check_non_negative("total_invested", total_invested)?;
    check_non_negative("total_exit_value", total_exit_value)?;

    let total_profit = total_exit_value - total_invested;

    if total_profit <= Decimal::ZERO {
        let lp_return_of_capital = total_exit_value.min(total_invested);
        return Ok(WaterfallSummary {
            total_invested,
            total_exit_value,
            total_profit,
            lp_return_of_capital,
            final_lp_proceeds: lp_return_of_capital,
            ..WaterfallSummary::default()
        });
    }

    let lp_return_of_capital = total_invested;
    let lp_preferred_return = total_invested * hurdle_rate;
    let remaining_profit = total_profit - lp_preferred_return;
    let gp_carry = (remaining_profit * carry_pct).max(Decimal::ZERO);
    let lp_carry = remaining_profit - gp_carry;

    Ok(WaterfallSummary {
        total_invested,
        total_exit_value,
        total_profit,
        lp_return_of_capital,
        lp_preferred_return,
        gp_catch_up: Decimal::ZERO,
        gp_carry,
        lp_carry,
        final_lp_proceeds: lp_return_of_capital + lp_preferred_return + lp_carry,
        final_gp_proceeds: gp_carry,
    })
}

/// [`compute_waterfall`] wrapped in the standard computation envelope.
pub fn calculate_waterfall(
    input: &WaterfallInput,
) -> EngineResult<ComputationOutput<WaterfallSummary>> {
    let start = Instant::now();
    let mut warnings = Vec::new();

    let summary = compute_waterfall(
        input.total_invested,
        input.total_exit_value,
        input.carry_pct,
        input.hurdle_rate,
    )?;

    if summary.total_profit > Decimal::ZERO && summary.lp_carry < Decimal::ZERO {
        warnings.push(format!(
            "Profit of {} does not cover the preferred return of {}; LPs absorb the shortfall",
            summary.total_profit.round_dp(2),
            summary.lp_preferred_return.round_dp(2)
        ));
    }
    if input.total_invested.is_zero() {
        warnings.push("No capital invested; all exit value is treated as profit".into());
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "American Waterfall (deal-by-deal: return of capital, preferred return, carried interest; no catch-up)",
        input,
        warnings,
        elapsed,
        summary,
    ))
}

fn check_non_negative(field: &str, value: Decimal) -> EngineResult<()> {
    if value < Decimal::ZERO {
        return Err(CalculationError::InvalidInput {
            field: field.into(),
            reason: "Must not be negative".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Memoization
// ---------------------------------------------------------------------------

type WaterfallKey = (Decimal, Decimal, Decimal, Decimal);

/// Memo size used by [`WaterfallCalculator::new`].
pub const DEFAULT_MEMO_CAPACITY: usize = 100;

/// Memoizing front end keyed by the four scalar inputs. Decimal keys hash
/// on value, so `1.0` and `1.00` share an entry.
///
/// The memo is bounded and evicts first-in-first-out, like the forecast
/// cache.
#[derive(Debug)]
pub struct WaterfallCalculator {
    capacity: usize,
    memo: RwLock<Memo>,
}

#[derive(Debug, Default)]
struct Memo {
    entries: HashMap<WaterfallKey, WaterfallSummary>,
    order: VecDeque<WaterfallKey>,
}

impl Default for WaterfallCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl WaterfallCalculator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMO_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            memo: RwLock::new(Memo::default()),
        }
    }

    pub fn compute(
        &self,
        total_invested: Money,
        total_exit_value: Money,
        carry_pct: Rate,
        hurdle_rate: Rate,
    ) -> EngineResult<WaterfallSummary> {
        let key = (
            total_invested.normalize(),
            total_exit_value.normalize(),
            carry_pct.normalize(),
            hurdle_rate.normalize(),
        );
        if let Some(hit) = self.memo.read().entries.get(&key) {
            return Ok(hit.clone());
        }

        let summary = compute_waterfall(total_invested, total_exit_value, carry_pct, hurdle_rate)?;

        let mut memo = self.memo.write();
        if memo.entries.contains_key(&key) {
            return Ok(summary);
        }
        while memo.entries.len() >= self.capacity {
            let Some(oldest) = memo.order.pop_front() else {
                break;
            };
            memo.entries.remove(&oldest);
        }
        memo.order.push_back(key);
        memo.entries.insert(key, summary.clone());
        Ok(summary)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.memo.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut memo = self.memo.write();
        memo.entries.clear();
        memo.order.clear();
    }
}
