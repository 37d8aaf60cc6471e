use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::{FundConfiguration, FundEconomics, EXIT_STATE};
use crate::lifecycle::{LifecycleSimulator, SimulationOutcome};
use crate::portfolio::generator::build_portfolio_with;
use crate::portfolio::{CompanyStatus, PortfolioCompany};
use crate::random::{draw, uniform, uniform_int, RandomSource};
use crate::types::{Multiple, Quarter};
use crate::EngineResult;

const FOLLOW_ON_MIN: Decimal = dec!(0.5);
const FOLLOW_ON_MAX: Decimal = dec!(1.5);
const FOLLOW_ON_DELAY_MIN: i64 = 4;
const FOLLOW_ON_DELAY_MAX: i64 = 8;

/// Typical step-up in value when a company raises its next round.
pub fn stage_markup(stage: &str) -> Multiple {
    match stage {
        "Seed" => dec!(1.5),
        "Series A" => dec!(1.6),
        "Series B" => dec!(1.8),
        "Series C" => dec!(2.0),
        "Series D" => dec!(2.2),
        "Growth" => dec!(2.5),
        _ => dec!(1.5),
    }
}

/// Run one graduation pass over the portfolio.
///
/// Each active company looks up its stage's graduation row and draws once
/// per destination (in row order); the first destination whose probability
/// exceeds the draw wins. A company graduates at most once per pass, so a
/// Pre-Seed company can reach Seed but never Series A within one run.
/// Graduating to a stage adds a follow-on check and marks the exit value up;
/// graduating to `"Exit"` realizes the company immediately. Companies left
/// active with an exit value are marked exited at the end of the pass.
pub fn progress(
    mut portfolio: Vec<PortfolioCompany>,
    config: &FundConfiguration,
    rng: &mut dyn RandomSource,
) -> EngineResult<Vec<PortfolioCompany>> {
    for company in portfolio.iter_mut() {
        if company.is_resolved() {
            continue;
        }

        let row = config.graduation_row(&company.current_stage)?;
        let destination = row
            .iter()
            .find(|(_, p)| draw(rng) < **p)
            .map(|(dest, _)| dest.clone());

        match destination {
            Some(dest) if dest == EXIT_STATE => {
                company.status = CompanyStatus::Exited;
            }
            Some(dest) => graduate(company, &dest, config, rng),
            None => {}
        }
    }

    for company in portfolio.iter_mut() {
        if company.status == CompanyStatus::Active && company.exit_value.is_some() {
            company.status = CompanyStatus::Exited;
        }
    }

    Ok(portfolio)
}

fn graduate(
    company: &mut PortfolioCompany,
    stage: &str,
    config: &FundConfiguration,
    rng: &mut dyn RandomSource,
) {
    let initial_check = company.initial_check();
    let initial_ownership = company
        .investments
        .first()
        .map(|i| i.ownership)
        .unwrap_or(Decimal::ZERO);
    let markup = stage_markup(stage);

    let amount = initial_check * uniform(rng, FOLLOW_ON_MIN, FOLLOW_ON_MAX);
    let delay = uniform_int(rng, FOLLOW_ON_DELAY_MIN, FOLLOW_ON_DELAY_MAX);
    let quarter = (i64::from(company.last_investment_quarter()) + delay)
        .min(i64::from(config.fund_life_quarters)) as Quarter;
    let ownership = if initial_check.is_zero() {
        Decimal::ZERO
    } else {
        initial_ownership * (amount / initial_check) / markup
    };

    company.add_follow_on(stage, amount, quarter, ownership);
    company.current_stage = stage.to_string();
    company.graduated = true;

    if let Some(value) = company.exit_value {
        company.exit_value = Some(value * markup);
    }
    if let Some(exit_q) = company.exit_quarter {
        let earliest = (quarter + 1).min(config.fund_life_quarters);
        company.exit_quarter = Some(exit_q.max(earliest));
    }
}

/// Per-company lifecycle: generate the portfolio, run a graduation pass,
/// then bucket investments and exits by quarter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompanySimulator;

impl LifecycleSimulator for CompanySimulator {
    fn simulate(
        &self,
        config: &FundConfiguration,
        economics: &FundEconomics,
        rng: &mut dyn RandomSource,
    ) -> EngineResult<SimulationOutcome> {
        let portfolio = build_portfolio_with(config, economics, rng)?;
        let portfolio = progress(portfolio, config, rng)?;

        let mut quarterly_investments = SimulationOutcome::empty_series(config);
        let mut quarterly_exit_proceeds = SimulationOutcome::empty_series(config);
        let last = config.fund_life_quarters as usize;

        for company in &portfolio {
            for investment in &company.investments {
                quarterly_investments[(investment.quarter as usize).min(last)] += investment.amount;
            }
            if let (CompanyStatus::Exited, Some(q)) = (company.status, company.exit_quarter) {
                quarterly_exit_proceeds[(q as usize).min(last)] += company.realized_value();
            }
        }

        let total_invested = portfolio.iter().map(|c| c.total_invested).sum();
        let total_exit_value = portfolio.iter().map(|c| c.realized_value()).sum();

        Ok(SimulationOutcome {
            portfolio,
            cohorts: Vec::new(),
            total_invested,
            total_exit_value,
            quarterly_investments,
            quarterly_exit_proceeds,
            recycled_capital: Decimal::ZERO,
        })
    }
}
