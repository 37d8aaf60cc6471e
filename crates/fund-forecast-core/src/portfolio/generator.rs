use rust_decimal::Decimal;

use crate::config::{ExitBucket, FundConfiguration, FundEconomics, StageStrategy};
use crate::portfolio::company::{CompanyStatus, Investment, PortfolioCompany};
use crate::random::{draw, uniform, uniform_int, RandomSource};
use crate::types::Quarter;
use crate::EngineResult;

/// Exit timing jitter either side of the stage's average holding period.
const EXIT_JITTER_QUARTERS: i64 = 4;

/// Instantiate the fund's first checks.
///
/// Each stage receives `investable capital x allocation` and writes
/// `floor(stage capital / check size)` checks; fractional companies are
/// dropped. Every company gets an investment quarter inside the investment
/// period, an exit bucket sampled from its stage's distribution with one
/// draw, and a multiple sampled uniformly inside that bucket. Failures are
/// written off immediately; the rest stay active with a provisional exit
/// value and quarter for the lifecycle simulator to refine.
///
/// Draw order is fixed (quarter, bucket, multiple, exit jitter per company,
/// stages in configuration order) so a seeded source reproduces the
/// portfolio exactly.
pub fn build_portfolio(
    config: &FundConfiguration,
    rng: &mut dyn RandomSource,
) -> EngineResult<Vec<PortfolioCompany>> {
    let economics = FundEconomics::derive(config);
    build_portfolio_with(config, &economics, rng)
}

pub(crate) fn build_portfolio_with(
    config: &FundConfiguration,
    economics: &FundEconomics,
    rng: &mut dyn RandomSource,
) -> EngineResult<Vec<PortfolioCompany>> {
    let mut portfolio = Vec::new();
    let mut sequence = 0usize;

    for strategy in &config.stage_strategies {
        let distribution = config.exit_distribution(&strategy.stage)?;
        let count = economics.company_count(strategy);
        let prefix = stage_prefix(&strategy.stage);

        tracing::debug!(
            stage = %strategy.stage,
            companies = count,
            stage_capital = %economics.stage_capital(strategy),
            "generating stage portfolio"
        );

        for _ in 0..count {
            sequence += 1;
            let investment_quarter =
                uniform_int(rng, 1, i64::from(config.investment_period_quarters)) as Quarter;

            let bucket = distribution.bucket_for(draw(rng));
            let (low, high) = bucket.multiple_range();
            let multiple = if bucket == ExitBucket::Failure {
                Decimal::ZERO
            } else {
                uniform(rng, low, high)
            };

            let mut company = PortfolioCompany {
                id: format!("{prefix}-{sequence:04}"),
                entry_stage: strategy.stage.clone(),
                current_stage: strategy.stage.clone(),
                investments: vec![Investment {
                    stage: strategy.stage.clone(),
                    amount: strategy.avg_check_size,
                    quarter: investment_quarter,
                    ownership: strategy.target_ownership,
                    follow_on: false,
                }],
                total_invested: strategy.avg_check_size,
                status: CompanyStatus::Active,
                exit_bucket: bucket,
                exit_value: None,
                exit_quarter: None,
                graduated: false,
            };

            if multiple > Decimal::ZERO {
                company.exit_value = Some(strategy.avg_check_size * multiple);
                company.exit_quarter = Some(exit_quarter(config, strategy, investment_quarter, rng));
            } else {
                company.status = CompanyStatus::WrittenOff;
                company.exit_value = Some(Decimal::ZERO);
            }

            portfolio.push(company);
        }
    }

    Ok(portfolio)
}

fn exit_quarter(
    config: &FundConfiguration,
    strategy: &StageStrategy,
    investment_quarter: Quarter,
    rng: &mut dyn RandomSource,
) -> Quarter {
    let jitter = uniform_int(rng, -EXIT_JITTER_QUARTERS, EXIT_JITTER_QUARTERS);
    let target = i64::from(investment_quarter) + i64::from(strategy.avg_exit_quarters) + jitter;
    let earliest = i64::from(investment_quarter) + 1;
    let latest = i64::from(config.fund_life_quarters).max(earliest);
    target.clamp(earliest, latest) as Quarter
}

/// Initials of the stage name: "Pre-Seed" -> "PS", "Series A" -> "SA".
fn stage_prefix(stage: &str) -> String {
    let prefix: String = stage
        .split(|c: char| !c.is_alphanumeric())
        .filter_map(|word| word.chars().next())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if prefix.is_empty() {
        "CO".to_string()
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExitDistribution;
    use crate::error::CalculationError;
    use crate::random::{Lcg, SeededRng};
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_portfolio_size() {
        let config = FundConfiguration::default();
        let portfolio = build_portfolio(&config, &mut SeededRng::seeded(1)).unwrap();
        assert_eq!(portfolio.len(), 27 + 13 + 1);
        assert_eq!(portfolio[0].id, "PS-0001");
        assert_eq!(portfolio[27].id, "S-0028");
        assert_eq!(portfolio[40].id, "SA-0041");
    }

    #[test]
    fn test_investment_quarters_inside_period() {
        let config = FundConfiguration::default();
        let portfolio = build_portfolio(&config, &mut Lcg::new(99)).unwrap();
        for c in &portfolio {
            let q = c.investments[0].quarter;
            assert!((1..=config.investment_period_quarters).contains(&q));
            if let Some(eq) = c.exit_quarter {
                assert!(eq > q && eq <= config.fund_life_quarters);
            }
        }
    }

    #[test]
    fn test_written_off_companies_have_zero_value() {
        let config = FundConfiguration::default();
        let portfolio = build_portfolio(&config, &mut SeededRng::seeded(5)).unwrap();
        for c in &portfolio {
            match c.status {
                CompanyStatus::WrittenOff => {
                    assert_eq!(c.exit_bucket, ExitBucket::Failure);
                    assert_eq!(c.exit_value, Some(Decimal::ZERO));
                    assert!(c.exit_quarter.is_none());
                }
                CompanyStatus::Active => {
                    let (low, high) = c.exit_bucket.multiple_range();
                    let m = c.multiple();
                    assert!(m >= low && m <= high, "multiple {m} outside bucket");
                }
                CompanyStatus::Exited => panic!("generator never marks exits"),
            }
        }
    }

    #[test]
    fn test_all_failures() {
        let mut config = FundConfiguration::default();
        for dist in config.exit_probabilities.values_mut() {
            *dist = ExitDistribution {
                failure: Decimal::ONE,
                low: Decimal::ZERO,
                medium: Decimal::ZERO,
                high: Decimal::ZERO,
                mega: Decimal::ZERO,
            };
        }
        let portfolio = build_portfolio(&config, &mut SeededRng::seeded(8)).unwrap();
        assert!(portfolio
            .iter()
            .all(|c| c.status == CompanyStatus::WrittenOff));
    }

    #[test]
    fn test_missing_exit_row_is_calculation_error() {
        let mut config = FundConfiguration::default();
        config.exit_probabilities.remove("Seed");
        let err = build_portfolio(&config, &mut SeededRng::seeded(1)).unwrap_err();
        assert!(matches!(err, CalculationError::MissingStage { ref stage, .. } if stage == "Seed"));
    }

    #[test]
    fn test_stage_prefix() {
        assert_eq!(stage_prefix("Pre-Seed"), "PS");
        assert_eq!(stage_prefix("Series A"), "SA");
        assert_eq!(stage_prefix("growth"), "G");
        assert_eq!(stage_prefix("--"), "CO");
    }

    #[test]
    fn test_check_size_drives_amounts() {
        let mut config = FundConfiguration::default();
        config.stage_strategies[0].avg_check_size = dec!(1_000_000);
        let portfolio = build_portfolio(&config, &mut SeededRng::seeded(2)).unwrap();
        let pre_seed: Vec<_> = portfolio
            .iter()
            .filter(|c| c.entry_stage == "Pre-Seed")
            .collect();
        // 6.88M / 1M
        assert_eq!(pre_seed.len(), 6);
        assert!(pre_seed.iter().all(|c| c.total_invested == dec!(1_000_000)));
    }
}
