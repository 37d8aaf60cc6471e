//! Forecast orchestration: validation, simulation, waterfall and timeline
//! composed behind a memoizing engine.

pub mod cache;
pub mod engine;

use serde::{Deserialize, Serialize};

use crate::config::{FundConfiguration, SimulationStrategy};
use crate::lifecycle::Cohort;
use crate::portfolio::{CompanyResult, CompanyStatus, PortfolioCompany};
use crate::timeline::CashFlowPoint;
use crate::types::{ratio, Money, Multiple, Rate};
use crate::validation::ValidationIssue;
use crate::waterfall::WaterfallSummary;

pub use cache::{ForecastCache, DEFAULT_CACHE_CAPACITY};
pub use engine::{ForecastEngine, PerformanceMetrics};

/// Everything a forecast produces. Shared read-only once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub configuration: FundConfiguration,
    pub strategy: SimulationStrategy,
    pub timeline: Vec<CashFlowPoint>,
    pub portfolio: Vec<PortfolioCompany>,
    pub cohorts: Vec<Cohort>,
    pub company_results: Vec<CompanyResult>,
    pub stage_summaries: Vec<StageSummary>,
    pub waterfall: WaterfallSummary,
    pub summary: SummaryMetrics,
    pub quarterly_investments: Vec<Money>,
    pub quarterly_exit_proceeds: Vec<Money>,
    pub recycled_capital: Money,
    /// Warning-severity validation issues the forecast ran with
    pub warnings: Vec<ValidationIssue>,
}

/// Headline fund metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    /// Exit value / invested capital
    pub gross_moic: Multiple,
    /// LP proceeds after carry / fund size
    pub net_moic: Multiple,
    pub gross_irr: Rate,
    pub net_irr: Rate,
    pub tvpi: Multiple,
    pub dpi: Multiple,
    pub rvpi: Multiple,
    pub total_invested: Money,
    /// Gross exit proceeds, recycled amounts included
    pub total_exit_value: Money,
    /// Exit proceeds paid out through the waterfall (gross less recycled)
    pub distributed_value: Money,
    pub total_management_fees: Money,
    pub investable_capital: Money,
    pub num_companies: u32,
    pub num_exited: u32,
    pub num_written_off: u32,
    /// Written-off companies / all companies
    pub loss_ratio: Rate,
}

/// Per-stage roll-up, keyed by the stage a company entered at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    /// First checks written at this stage
    pub companies: u32,
    pub invested: Money,
    pub exit_value: Money,
    pub multiple: Multiple,
    pub graduated: u32,
    pub exited: u32,
    pub written_off: u32,
}

impl StageSummary {
    fn empty(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            companies: 0,
            invested: Money::ZERO,
            exit_value: Money::ZERO,
            multiple: Multiple::ZERO,
            graduated: 0,
            exited: 0,
            written_off: 0,
        }
    }

    pub fn from_portfolio(config: &FundConfiguration, portfolio: &[PortfolioCompany]) -> Vec<Self> {
        let mut summaries = seeded(config);
        for company in portfolio {
            let s = slot(&mut summaries, &company.entry_stage);
            s.companies += 1;
            s.invested += company.total_invested;
            s.exit_value += company.realized_value();
            if company.graduated {
                s.graduated += 1;
            }
            match company.status {
                CompanyStatus::Exited => s.exited += 1,
                CompanyStatus::WrittenOff => s.written_off += 1,
                CompanyStatus::Active => {}
            }
        }
        finish(summaries)
    }

    /// Follow-on cohorts roll up under the stage they graduated into.
    pub fn from_cohorts(config: &FundConfiguration, cohorts: &[Cohort]) -> Vec<Self> {
        let mut summaries = seeded(config);
        for cohort in cohorts {
            let s = slot(&mut summaries, &cohort.stage);
            if !cohort.follow_on {
                s.companies += cohort.initial_companies;
                s.graduated += cohort
                    .graduations
                    .iter()
                    .filter(|(dest, _)| dest.as_str() != crate::config::EXIT_STATE)
                    .map(|(_, n)| n)
                    .sum::<u32>();
            }
            s.invested += cohort.invested;
            s.exit_value += cohort.realized_value;
            s.exited += cohort.exits.total() - cohort.exits.failure;
            s.written_off += cohort.exits.failure;
        }
        finish(summaries)
    }
}

fn seeded(config: &FundConfiguration) -> Vec<StageSummary> {
    config
        .stage_strategies
        .iter()
        .map(|s| StageSummary::empty(&s.stage))
        .collect()
}

fn slot<'a>(summaries: &'a mut Vec<StageSummary>, stage: &str) -> &'a mut StageSummary {
    let idx = match summaries.iter().position(|s| s.stage == stage) {
        Some(idx) => idx,
        None => {
            summaries.push(StageSummary::empty(stage));
            summaries.len() - 1
        }
    };
    &mut summaries[idx]
}

fn finish(mut summaries: Vec<StageSummary>) -> Vec<StageSummary> {
    for s in summaries.iter_mut() {
        s.multiple = ratio(s.exit_value, s.invested);
    }
    summaries
}
