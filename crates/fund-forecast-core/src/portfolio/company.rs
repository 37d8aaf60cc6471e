use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ExitBucket;
use crate::types::{ratio, Money, Multiple, Quarter, Rate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompanyStatus {
    Active,
    Exited,
    WrittenOff,
}

/// A single check written into a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub stage: String,
    pub amount: Money,
    pub quarter: Quarter,
    pub ownership: Rate,
    pub follow_on: bool,
}

/// One simulated investee. Mutable while `Active`, frozen once exited or
/// written off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioCompany {
    pub id: String,
    pub entry_stage: String,
    pub current_stage: String,
    pub investments: Vec<Investment>,
    pub total_invested: Money,
    pub status: CompanyStatus,
    pub exit_bucket: ExitBucket,
    pub exit_value: Option<Money>,
    pub exit_quarter: Option<Quarter>,
    /// Set once the company has advanced a stage in this run
    pub graduated: bool,
}

impl PortfolioCompany {
    pub fn initial_check(&self) -> Money {
        self.investments
            .first()
            .map(|i| i.amount)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn last_investment_quarter(&self) -> Quarter {
        self.investments.iter().map(|i| i.quarter).max().unwrap_or(0)
    }

    pub fn is_resolved(&self) -> bool {
        self.status != CompanyStatus::Active
    }

    pub fn realized_value(&self) -> Money {
        self.exit_value.unwrap_or(Decimal::ZERO)
    }

    pub fn multiple(&self) -> Multiple {
        ratio(self.realized_value(), self.total_invested)
    }

    pub fn ownership(&self) -> Rate {
        self.investments.iter().map(|i| i.ownership).sum()
    }

    pub fn add_follow_on(&mut self, stage: &str, amount: Money, quarter: Quarter, ownership: Rate) {
        self.investments.push(Investment {
            stage: stage.to_string(),
            amount,
            quarter,
            ownership,
            follow_on: true,
        });
        self.total_invested += amount;
    }
}

/// Flattened per-company outcome used in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyResult {
    pub id: String,
    pub entry_stage: String,
    pub final_stage: String,
    pub status: CompanyStatus,
    pub invested: Money,
    pub exit_value: Money,
    pub multiple: Multiple,
    pub profit: Money,
    /// Combined ownership across the first check and follow-ons
    pub ownership: Rate,
    pub exit_quarter: Option<Quarter>,
    /// Share of the fund's positive profit contributed by this company
    pub pct_of_fund_returns: Rate,
}

impl CompanyResult {
    pub fn from_portfolio(portfolio: &[PortfolioCompany]) -> Vec<CompanyResult> {
        let total_fund_profit: Money = portfolio
            .iter()
            .map(|c| c.realized_value() - c.total_invested)
            .filter(|p| *p > Decimal::ZERO)
            .sum();

        portfolio
            .iter()
            .map(|c| {
                let exit_value = c.realized_value();
                let profit = exit_value - c.total_invested;
                let pct_of_fund_returns = if profit > Decimal::ZERO {
                    ratio(profit, total_fund_profit)
                } else {
                    Decimal::ZERO
                };
                CompanyResult {
                    id: c.id.clone(),
                    entry_stage: c.entry_stage.clone(),
                    final_stage: c.current_stage.clone(),
                    status: c.status,
                    invested: c.total_invested,
                    exit_value,
                    multiple: c.multiple(),
                    profit,
                    ownership: c.ownership(),
                    exit_quarter: c.exit_quarter,
                    pct_of_fund_returns,
                }
            })
            .collect()
    }
}
