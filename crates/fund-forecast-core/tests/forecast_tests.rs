use std::sync::Arc;

use fund_forecast_core::config::{
    ExitDistribution, FundConfiguration, RecyclingPolicy, SimulationStrategy,
};
use fund_forecast_core::portfolio::CompanyStatus;
use fund_forecast_core::{
    build_portfolio, CalculationError, ForecastEngine, ForecastResult, SeededRng, Severity,
    ValidationCode,
};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn all_failures() -> ExitDistribution {
    ExitDistribution {
        failure: Decimal::ONE,
        low: Decimal::ZERO,
        medium: Decimal::ZERO,
        high: Decimal::ZERO,
        mega: Decimal::ZERO,
    }
}

fn validation_codes(err: &CalculationError) -> Vec<ValidationCode> {
    match err {
        CalculationError::Validation { issues } => issues.iter().map(|i| i.code).collect(),
        other => panic!("Expected a validation error, got {other:?}"),
    }
}

// ===========================================================================
// Base case
// ===========================================================================

#[test]
fn test_default_fund_forecast_shape() {
    let engine = ForecastEngine::new();
    let config = FundConfiguration::default();
    let result = engine.forecast(&config).unwrap();

    assert_eq!(result.timeline.len(), 41);
    assert!(!result.portfolio.is_empty());
    assert_eq!(result.strategy, SimulationStrategy::PerCompany);
    assert_eq!(result.company_results.len(), result.portfolio.len());

    let contributions: Vec<Decimal> = result
        .timeline
        .iter()
        .map(|p| p.cumulative_contributions)
        .collect();
    assert!(contributions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(contributions[40], config.fund_size);
}

#[test]
fn test_every_company_resolves_by_fund_end() {
    let engine = ForecastEngine::new();
    let result = engine.forecast(&FundConfiguration::default()).unwrap();
    assert!(result
        .portfolio
        .iter()
        .all(|c| c.status != CompanyStatus::Active));
    assert_eq!(
        result.summary.num_exited + result.summary.num_written_off,
        result.summary.num_companies
    );
}

#[test]
fn test_tvpi_is_dpi_plus_rvpi_every_quarter() {
    let engine = ForecastEngine::new();
    let result = engine.forecast(&FundConfiguration::default()).unwrap();
    for point in &result.timeline {
        assert_eq!(point.tvpi, point.dpi + point.rvpi, "quarter {}", point.quarter);
    }
}

#[test]
fn test_waterfall_distributes_entire_exit_value() {
    let engine = ForecastEngine::new();
    let result = engine.forecast(&FundConfiguration::default()).unwrap();
    let w = &result.waterfall;
    let distributed = w.final_lp_proceeds + w.final_gp_proceeds;
    assert!((distributed - result.summary.total_exit_value).abs() < dec!(0.000001));
    assert!(w.gp_carry >= Decimal::ZERO);
    assert_eq!(w.gp_catch_up, Decimal::ZERO);
}

#[test]
fn test_stage_summaries_cover_portfolio() {
    let engine = ForecastEngine::new();
    let result = engine.forecast(&FundConfiguration::default()).unwrap();
    let companies: u32 = result.stage_summaries.iter().map(|s| s.companies).sum();
    let invested: Decimal = result.stage_summaries.iter().map(|s| s.invested).sum();
    assert_eq!(companies, result.summary.num_companies);
    assert_eq!(invested, result.summary.total_invested);
}

// ===========================================================================
// Degenerate funds
// ===========================================================================

#[test]
fn test_zero_profit_fund() {
    let mut config = FundConfiguration::default();
    for row in config.exit_probabilities.values_mut() {
        *row = all_failures();
    }

    let result = ForecastEngine::new().forecast(&config).unwrap();
    assert_eq!(result.summary.total_exit_value, Decimal::ZERO);
    assert_eq!(result.summary.gross_moic, Decimal::ZERO);
    assert_eq!(result.summary.net_moic, Decimal::ZERO);
    assert_eq!(result.waterfall.gp_carry, Decimal::ZERO);
    assert_eq!(result.summary.num_written_off, result.summary.num_companies);
    assert_eq!(result.summary.loss_ratio, Decimal::ONE);
}

#[test]
fn test_invalid_fund_size_blocks_forecast() {
    let mut config = FundConfiguration::default();
    config.fund_size = dec!(-1);
    let err = ForecastEngine::new().forecast(&config).unwrap_err();
    assert!(validation_codes(&err).contains(&ValidationCode::InvalidFundSize));
}

#[test]
fn test_allocation_sum_blocks_forecast() {
    let mut config = FundConfiguration::default();
    config.stage_strategies[0].allocation_pct = dec!(0.80);
    let engine = ForecastEngine::new();
    let err = engine.forecast(&config).unwrap_err();
    assert!(validation_codes(&err).contains(&ValidationCode::InvalidAllocationSum));
    assert_eq!(engine.cache_len(), 0);
}

// ===========================================================================
// Determinism and caching
// ===========================================================================

#[test]
fn test_same_seed_builds_same_portfolio() {
    let config = FundConfiguration::default();
    let a = build_portfolio(&config, &mut SeededRng::seeded(1234)).unwrap();
    let b = build_portfolio(&config, &mut SeededRng::seeded(1234)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_cache_returns_identical_result() {
    let engine = ForecastEngine::new();
    let config = FundConfiguration::default();

    let first = engine.forecast(&config).unwrap();
    let before = engine.performance_metrics().cache_hit_rate;
    let second = engine.forecast(&config).unwrap();
    let after = engine.performance_metrics().cache_hit_rate;

    assert!(Arc::ptr_eq(&first, &second));
    assert!(after > before);
    assert_eq!(engine.performance_metrics().total_calculations, 1);
}

#[test]
fn test_uncached_engine_is_reproducible() {
    let config = FundConfiguration::default();
    let a = ForecastEngine::without_cache().forecast(&config).unwrap();
    let b = ForecastEngine::without_cache().forecast(&config).unwrap();
    assert_eq!(*a, *b);
}

#[test]
fn test_fifo_eviction() {
    let engine = ForecastEngine::with_capacity(2);
    let base = FundConfiguration::default();
    let mut second = base.clone();
    second.simulation.seed = 2;
    let mut third = base.clone();
    third.simulation.seed = 3;

    let first_result = engine.forecast(&base).unwrap();
    engine.forecast(&second).unwrap();
    engine.forecast(&third).unwrap();
    assert_eq!(engine.cache_len(), 2);

    // The oldest entry went first, so this is a fresh computation.
    let again = engine.forecast(&base).unwrap();
    assert!(!Arc::ptr_eq(&first_result, &again));
    assert_eq!(*first_result, *again);
    assert_eq!(engine.performance_metrics().cache_misses, 4);
}

// ===========================================================================
// Cohort strategy
// ===========================================================================

#[test]
fn test_cohort_forecast_base_case() {
    let mut config = FundConfiguration::default();
    config.simulation.strategy = SimulationStrategy::Cohort;

    let result = ForecastEngine::new().forecast(&config).unwrap();
    assert_eq!(result.strategy, SimulationStrategy::Cohort);
    assert!(result.portfolio.is_empty());
    assert!(!result.cohorts.is_empty());
    assert!(result.cohorts.iter().all(|c| c.active_companies == 0));
    assert_eq!(result.timeline.len(), 41);
    assert!(result.summary.total_invested > Decimal::ZERO);
    assert!(result.summary.total_invested <= result.summary.investable_capital);

    let realized: Decimal = result.cohorts.iter().map(|c| c.realized_value).sum();
    assert_eq!(realized, result.summary.total_exit_value);
}

#[test]
fn test_recycled_proceeds_are_not_distributed() {
    let mut config = FundConfiguration::default();
    config.fund_size = dec!(2_000_000_000);
    config.simulation.strategy = SimulationStrategy::Cohort;
    config.simulation.recycling = Some(RecyclingPolicy {
        rate: Decimal::ONE,
        cap_pct: dec!(0.20),
    });
    for strategy in config.stage_strategies.iter_mut() {
        strategy.min_exit_age_quarters = 1;
    }

    let result = ForecastEngine::new().forecast(&config).unwrap();
    let recycled = result.recycled_capital;
    assert!(recycled > Decimal::ZERO);
    assert!(recycled <= dec!(400_000_000));

    let gross = result.summary.total_exit_value;
    let distributable = gross - recycled;
    assert_eq!(result.summary.distributed_value, distributable);
    assert_eq!(result.waterfall.total_exit_value, distributable);
    let paid = result.waterfall.final_lp_proceeds + result.waterfall.final_gp_proceeds;
    assert!((paid - distributable).abs() < dec!(0.000001));

    let last = result.timeline.last().unwrap();
    assert!(
        (last.cumulative_distributions - distributable).abs() < dec!(0.000001),
        "distributed {} of {} gross, {} recycled",
        last.cumulative_distributions,
        gross,
        recycled
    );

    // Gross proceeds still count every exit.
    let realized: Decimal = result.cohorts.iter().map(|c| c.realized_value).sum();
    assert_eq!(realized, gross);
}

// ===========================================================================
// Warning-only configurations
// ===========================================================================

#[test]
fn test_negative_carry_still_forecasts() {
    let mut config = FundConfiguration::default();
    config.carry_pct = dec!(-0.05);

    let result = ForecastEngine::new().forecast(&config).unwrap();
    assert!(result.warnings.iter().all(|w| w.severity == Severity::Warning));
    assert!(result.warnings.iter().any(|w| w.code == ValidationCode::CarryOutOfRange));
    assert_eq!(result.waterfall.gp_carry, Decimal::ZERO);
    assert_eq!(result.waterfall.final_gp_proceeds, Decimal::ZERO);
    let lp_share = result.waterfall.final_lp_proceeds - result.summary.distributed_value;
    assert!(lp_share.abs() < dec!(0.000001));
}

#[test]
fn test_negative_hurdle_still_forecasts() {
    let mut config = FundConfiguration::default();
    config.hurdle_rate = dec!(-0.01);

    let result = ForecastEngine::new().forecast(&config).unwrap();
    assert!(result.warnings.iter().any(|w| w.code == ValidationCode::NegativeHurdle));
    let w = &result.waterfall;
    assert!((w.final_lp_proceeds + w.final_gp_proceeds - w.total_exit_value).abs() < dec!(0.000001));
    if w.total_profit > Decimal::ZERO {
        assert!(w.lp_preferred_return < Decimal::ZERO);
    }
}

#[test]
fn test_default_fund_runs_with_reserve_warning() {
    let result = ForecastEngine::new()
        .forecast(&FundConfiguration::default())
        .unwrap();
    let codes: Vec<ValidationCode> = result.warnings.iter().map(|w| w.code).collect();
    assert_eq!(codes, vec![ValidationCode::LowReserveRatio]);
}

#[test]
fn test_company_results_report_ownership() {
    let result = ForecastEngine::new()
        .forecast(&FundConfiguration::default())
        .unwrap();
    for (row, company) in result.company_results.iter().zip(&result.portfolio) {
        let expected: Decimal = company.investments.iter().map(|i| i.ownership).sum();
        assert_eq!(row.ownership, expected);
        assert!(row.ownership > Decimal::ZERO, "{} has no ownership", row.id);
    }
}

// ===========================================================================
// Serialization
// ===========================================================================

#[test]
fn test_result_json_round_trip() {
    let result = ForecastEngine::new()
        .forecast(&FundConfiguration::default())
        .unwrap();
    let json = serde_json::to_string(&*result).unwrap();
    let back: ForecastResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, *result);
}

#[test]
fn test_config_deserializes_with_defaults() {
    let json = serde_json::to_value(FundConfiguration::default()).unwrap();
    let mut object = json.as_object().cloned().unwrap();
    object.remove("simulation");
    object.remove("fee_basis");
    object.remove("distribution_start_quarter");

    let config: FundConfiguration = serde_json::from_value(object.into()).unwrap();
    assert_eq!(config.simulation.seed, 42);
    assert_eq!(config.distribution_start_quarter, 12);
}
