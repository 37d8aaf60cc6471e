//! Lifecycle simulation: advance the portfolio through graduations and exits.
//!
//! Two simulators implement the same contract at different fidelity. The
//! per-company simulator tracks every investee; the cohort simulator tracks
//! vintage/stage buckets and scales with stages x quarters rather than
//! companies x quarters.

pub mod cohort;
pub mod company;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{FundConfiguration, FundEconomics, SimulationStrategy};
use crate::portfolio::PortfolioCompany;
use crate::random::RandomSource;
use crate::types::Money;
use crate::EngineResult;

pub use cohort::{Cohort, CohortSimulator, ExitCounts};
pub use company::{progress, stage_markup, CompanySimulator};

/// Everything downstream components need from a simulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    /// Per-company records (empty for cohort runs)
    pub portfolio: Vec<PortfolioCompany>,
    /// Cohort records (empty for per-company runs)
    pub cohorts: Vec<Cohort>,
    pub total_invested: Money,
    pub total_exit_value: Money,
    /// Capital deployed per quarter, index = quarter (0..=life)
    pub quarterly_investments: Vec<Money>,
    /// Exit proceeds realized per quarter, index = quarter (0..=life)
    pub quarterly_exit_proceeds: Vec<Money>,
    /// Proceeds redeployed through recycling (cohort model only)
    pub recycled_capital: Money,
}

impl SimulationOutcome {
    /// Exit value left for LPs and the GP once recycled proceeds have been
    /// redeployed.
    pub fn distributable_value(&self) -> Money {
        (self.total_exit_value - self.recycled_capital).max(Decimal::ZERO)
    }

    pub(crate) fn empty_series(config: &FundConfiguration) -> Vec<Money> {
        vec![Decimal::ZERO; config.fund_life_quarters as usize + 1]
    }
}

/// Contract shared by both lifecycle strategies.
pub trait LifecycleSimulator {
    fn simulate(
        &self,
        config: &FundConfiguration,
        economics: &FundEconomics,
        rng: &mut dyn RandomSource,
    ) -> EngineResult<SimulationOutcome>;
}

/// Simulator for the configured strategy.
pub fn simulator_for(strategy: SimulationStrategy) -> Box<dyn LifecycleSimulator> {
    match strategy {
        SimulationStrategy::PerCompany => Box::new(CompanySimulator),
        SimulationStrategy::Cohort => Box::new(CohortSimulator),
    }
}
