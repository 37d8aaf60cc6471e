use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::{FundConfiguration, FundEconomics};
use crate::error::CalculationError;
use crate::forecast::cache::{ForecastCache, DEFAULT_CACHE_CAPACITY};
use crate::forecast::{ForecastResult, StageSummary, SummaryMetrics};
use crate::lifecycle::{simulator_for, SimulationOutcome};
use crate::portfolio::{CompanyResult, CompanyStatus};
use crate::random::{RandomSource, SeededRng};
use crate::timeline::build_timeline;
use crate::types::ratio;
use crate::validation::{has_errors, validate_configuration, ValidationIssue};
use crate::waterfall::{WaterfallCalculator, WaterfallSummary};
use crate::EngineResult;

const CONSERVATION_TOLERANCE: Decimal = dec!(0.000001);

/// Observability snapshot of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Mean wall time of forecasts that actually ran
    pub avg_calc_time_ms: f64,
    /// hits / (hits + misses); 0 before the first lookup
    pub cache_hit_rate: f64,
    pub total_calculations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_size: usize,
    /// Forecasts the cache holds before evicting; 0 when caching is off
    pub cache_capacity: usize,
    /// Entries in the waterfall memo
    pub waterfall_memo_size: usize,
}

#[derive(Debug, Default)]
struct PerformanceCounters {
    calculations: AtomicU64,
    total_time_us: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PerformanceCounters {
    fn record_calculation(&self, elapsed_us: u64) {
        self.calculations.fetch_add(1, Ordering::Relaxed);
        self.total_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.calculations.store(0, Ordering::Relaxed);
        self.total_time_us.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Runs forecasts and memoizes them per configuration.
///
/// The engine owns its cache; create one per session and share it by
/// reference. Forecasts seed their random source from
/// `configuration.simulation.seed`, so a cached result is exactly what a
/// fresh run would produce.
#[derive(Debug)]
pub struct ForecastEngine {
    cache: Option<ForecastCache>,
    waterfalls: WaterfallCalculator,
    counters: PerformanceCounters,
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastEngine {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Engine whose forecast cache and waterfall memo both hold at most
    /// `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: Some(ForecastCache::new(capacity)),
            waterfalls: WaterfallCalculator::with_capacity(capacity),
            counters: PerformanceCounters::default(),
        }
    }

    /// Engine that never caches; used by parallel batch workers.
    pub fn without_cache() -> Self {
        Self {
            cache: None,
            waterfalls: WaterfallCalculator::new(),
            counters: PerformanceCounters::default(),
        }
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Validate, simulate and assemble a forecast, or return the cached one.
    ///
    /// Error-severity validation issues abort with
    /// [`CalculationError::Validation`]; failed runs never reach the cache.
    pub fn forecast(&self, config: &FundConfiguration) -> EngineResult<Arc<ForecastResult>> {
        let warnings = checked_issues(config)?;

        let Some(cache) = &self.cache else {
            let mut rng = SeededRng::seeded(config.simulation.seed);
            return self.run(config, warnings, &mut rng).map(Arc::new);
        };

        let key = ForecastCache::key_for(config)?;
        if let Some(hit) = cache.get(&key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(fund = %config.name, "forecast cache hit");
            return Ok(hit);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(fund = %config.name, "forecast cache miss");

        let mut rng = SeededRng::seeded(config.simulation.seed);
        let result = self.run(config, warnings, &mut rng)?;
        Ok(cache.insert(key, Arc::new(result)))
    }

    /// Run a forecast with a caller-supplied random source, bypassing the
    /// cache.
    pub fn forecast_with_source(
        &self,
        config: &FundConfiguration,
        rng: &mut dyn RandomSource,
    ) -> EngineResult<ForecastResult> {
        let warnings = checked_issues(config)?;
        self.run(config, warnings, rng)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        self.waterfalls.clear();
        self.counters.reset();
        tracing::debug!("forecast cache cleared");
    }

    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map(ForecastCache::len).unwrap_or(0)
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let calculations = self.counters.calculations.load(Ordering::Relaxed);
        let total_us = self.counters.total_time_us.load(Ordering::Relaxed);
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        PerformanceMetrics {
            avg_calc_time_ms: if calculations == 0 {
                0.0
            } else {
                total_us as f64 / calculations as f64 / 1_000.0
            },
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            total_calculations: calculations,
            cache_hits: hits,
            cache_misses: misses,
            cache_size: self.cache_len(),
            cache_capacity: self.cache.as_ref().map(ForecastCache::capacity).unwrap_or(0),
            waterfall_memo_size: self.waterfalls.len(),
        }
    }

    fn run(
        &self,
        config: &FundConfiguration,
        warnings: Vec<ValidationIssue>,
        rng: &mut dyn RandomSource,
    ) -> EngineResult<ForecastResult> {
        let start = Instant::now();
        let strategy = config.simulation.strategy;
        let economics = FundEconomics::derive(config);

        let outcome = simulator_for(strategy).simulate(config, &economics, rng)?;
        // Recycled proceeds were redeployed, so only the rest is paid out.
        let distributable = outcome.distributable_value();
        let waterfall = self.waterfalls.compute(
            outcome.total_invested,
            distributable,
            config.carry_pct,
            config.hurdle_rate,
        )?;
        let distributed = waterfall.final_lp_proceeds + waterfall.final_gp_proceeds;
        if (distributed - distributable).abs() > CONSERVATION_TOLERANCE {
            return Err(CalculationError::InvariantViolation(format!(
                "waterfall distributes {} of {} distributable value",
                distributed, distributable
            )));
        }

        let timeline = build_timeline(
            config,
            outcome.total_invested,
            distributable,
            economics.total_management_fees,
        );
        let summary = summarize(config, &economics, &outcome, &waterfall, &timeline);

        let stage_summaries = if outcome.cohorts.is_empty() {
            StageSummary::from_portfolio(config, &outcome.portfolio)
        } else {
            StageSummary::from_cohorts(config, &outcome.cohorts)
        };

        let elapsed = start.elapsed().as_micros() as u64;
        self.counters.record_calculation(elapsed);

        if !warnings.is_empty() {
            tracing::warn!(
                fund = %config.name,
                warnings = warnings.len(),
                "forecast ran with validation warnings"
            );
        }
        tracing::info!(
            fund = %config.name,
            strategy = ?strategy,
            elapsed_us = elapsed,
            gross_moic = %summary.gross_moic,
            net_irr = %summary.net_irr,
            "forecast complete"
        );

        Ok(ForecastResult {
            configuration: config.clone(),
            strategy,
            company_results: CompanyResult::from_portfolio(&outcome.portfolio),
            stage_summaries,
            waterfall,
            summary,
            timeline,
            portfolio: outcome.portfolio,
            cohorts: outcome.cohorts,
            quarterly_investments: outcome.quarterly_investments,
            quarterly_exit_proceeds: outcome.quarterly_exit_proceeds,
            recycled_capital: outcome.recycled_capital,
            warnings,
        })
    }
}

/// Validation gate: error-severity issues abort, warnings travel with the
/// result.
fn checked_issues(config: &FundConfiguration) -> EngineResult<Vec<ValidationIssue>> {
    let issues = validate_configuration(config);
    if has_errors(&issues) {
        return Err(CalculationError::Validation { issues });
    }
    Ok(issues)
}

fn summarize(
    config: &FundConfiguration,
    economics: &FundEconomics,
    outcome: &SimulationOutcome,
    waterfall: &WaterfallSummary,
    timeline: &[crate::timeline::CashFlowPoint],
) -> SummaryMetrics {
    let (num_companies, num_exited, num_written_off) = if outcome.cohorts.is_empty() {
        let count = |status: CompanyStatus| outcome.portfolio.iter().filter(|c| c.status == status).count() as u32;
        (
            outcome.portfolio.len() as u32,
            count(CompanyStatus::Exited),
            count(CompanyStatus::WrittenOff),
        )
    } else {
        let cohorts = &outcome.cohorts;
        (
            cohorts.iter().filter(|c| !c.follow_on).map(|c| c.initial_companies).sum(),
            cohorts.iter().map(|c| c.exits.total() - c.exits.failure).sum(),
            cohorts.iter().map(|c| c.exits.failure).sum(),
        )
    };

    let last = timeline.last();
    let pick = |f: fn(&crate::timeline::CashFlowPoint) -> Decimal| last.map(f).unwrap_or(Decimal::ZERO);

    SummaryMetrics {
        gross_moic: ratio(outcome.total_exit_value, outcome.total_invested),
        net_moic: ratio(waterfall.final_lp_proceeds, config.fund_size),
        gross_irr: pick(|p| p.gross_irr),
        net_irr: pick(|p| p.net_irr),
        tvpi: pick(|p| p.tvpi),
        dpi: pick(|p| p.dpi),
        rvpi: pick(|p| p.rvpi),
        total_invested: outcome.total_invested,
        total_exit_value: outcome.total_exit_value,
        distributed_value: outcome.distributable_value(),
        total_management_fees: economics.total_management_fees,
        investable_capital: economics.investable_capital,
        num_companies,
        num_exited,
        num_written_off,
        loss_ratio: ratio(Decimal::from(num_written_off), Decimal::from(num_companies)),
    }
}
