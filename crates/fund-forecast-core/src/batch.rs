//! Parameter sweeps over a base configuration.
//!
//! Each sweep dimension pairs a typed [`FieldSelector`] with a value range.
//! The runner forecasts every point of the cartesian grid and summarizes
//! the headline metrics across the successful points.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

use crate::config::FundConfiguration;
use crate::error::CalculationError;
use crate::forecast::{ForecastEngine, ForecastResult, SummaryMetrics};
use crate::types::*;
use crate::EngineResult;

/// Upper bound on grid size for a single sweep.
pub const MAX_BATCH_POINTS: usize = 10_000;

// ---------------------------------------------------------------------------
// Field selectors
// ---------------------------------------------------------------------------

type Getter = Arc<dyn Fn(&FundConfiguration) -> Option<Decimal> + Send + Sync>;
type Setter = Arc<dyn Fn(&mut FundConfiguration, Decimal) -> EngineResult<()> + Send + Sync>;

/// A named, typed accessor for one numeric configuration field.
#[derive(Clone)]
pub struct FieldSelector {
    name: String,
    get: Getter,
    set: Setter,
}

impl fmt::Debug for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSelector").field("name", &self.name).finish()
    }
}

impl FieldSelector {
    pub fn custom<G, S>(name: &str, get: G, set: S) -> Self
    where
        G: Fn(&FundConfiguration) -> Option<Decimal> + Send + Sync + 'static,
        S: Fn(&mut FundConfiguration, Decimal) -> EngineResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            get: Arc::new(get),
            set: Arc::new(set),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, config: &FundConfiguration) -> Option<Decimal> {
        (self.get)(config)
    }

    pub fn set(&self, config: &mut FundConfiguration, value: Decimal) -> EngineResult<()> {
        (self.set)(config, value)
    }

    pub fn fund_size() -> Self {
        Self::custom(
            "fund_size",
            |c| Some(c.fund_size),
            |c, v| {
                c.fund_size = v;
                Ok(())
            },
        )
    }

    pub fn management_fee_rate() -> Self {
        Self::custom(
            "management_fee_rate",
            |c| Some(c.management_fee_rate),
            |c, v| {
                c.management_fee_rate = v;
                Ok(())
            },
        )
    }

    pub fn carry_pct() -> Self {
        Self::custom(
            "carry_pct",
            |c| Some(c.carry_pct),
            |c, v| {
                c.carry_pct = v;
                Ok(())
            },
        )
    }

    pub fn hurdle_rate() -> Self {
        Self::custom(
            "hurdle_rate",
            |c| Some(c.hurdle_rate),
            |c, v| {
                c.hurdle_rate = v;
                Ok(())
            },
        )
    }

    pub fn gp_commitment_pct() -> Self {
        Self::custom(
            "gp_commitment_pct",
            |c| Some(c.gp_commitment_pct),
            |c, v| {
                c.gp_commitment_pct = v;
                Ok(())
            },
        )
    }

    pub fn stage_allocation(stage: &str) -> Self {
        let get_stage = stage.to_string();
        let set_stage = stage.to_string();
        Self::custom(
            &format!("allocation:{stage}"),
            move |c| c.stage(&get_stage).map(|s| s.allocation_pct),
            move |c, v| {
                stage_mut(c, &set_stage)?.allocation_pct = v;
                Ok(())
            },
        )
    }

    pub fn stage_check_size(stage: &str) -> Self {
        let get_stage = stage.to_string();
        let set_stage = stage.to_string();
        Self::custom(
            &format!("check_size:{stage}"),
            move |c| c.stage(&get_stage).map(|s| s.avg_check_size),
            move |c, v| {
                stage_mut(c, &set_stage)?.avg_check_size = v;
                Ok(())
            },
        )
    }
}

fn stage_mut<'a>(
    config: &'a mut FundConfiguration,
    stage: &str,
) -> EngineResult<&'a mut crate::config::StageStrategy> {
    config
        .stage_strategies
        .iter_mut()
        .find(|s| s.stage == stage)
        .ok_or_else(|| CalculationError::MissingStage {
            stage: stage.to_string(),
            matrix: "stage strategies".into(),
        })
}

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// One axis of the sweep grid.
#[derive(Debug, Clone)]
pub struct SweepDimension {
    pub selector: FieldSelector,
    pub min: Decimal,
    pub max: Decimal,
    pub step: Decimal,
}

impl SweepDimension {
    pub fn new(selector: FieldSelector, min: Decimal, max: Decimal, step: Decimal) -> Self {
        Self {
            selector,
            min,
            max,
            step,
        }
    }
}

/// Progress notification sent after each completed scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressCallback = Box<dyn Fn(BatchProgress) + Send + Sync>;

#[derive(Default)]
pub struct BatchOptions {
    pub progress: Option<ProgressCallback>,
    /// Checked between scenarios; a scenario in flight always completes
    pub cancel: Option<Arc<AtomicBool>>,
    /// Fan out across threads (requires the `parallel` feature)
    pub parallel: bool,
}

impl BatchOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn report(&self, completed: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(BatchProgress { completed, total });
        }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field: String,
    pub value: Decimal,
}

/// Headline metrics of one scenario, flattened for tabulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub gross_moic: Multiple,
    pub net_moic: Multiple,
    pub gross_irr: Rate,
    pub net_irr: Rate,
    pub tvpi: Multiple,
    pub dpi: Multiple,
    pub rvpi: Multiple,
    pub loss_ratio: Rate,
}

impl From<&SummaryMetrics> for MetricsSummary {
    fn from(s: &SummaryMetrics) -> Self {
        Self {
            gross_moic: s.gross_moic,
            net_moic: s.net_moic,
            gross_irr: s.gross_irr,
            net_irr: s.net_irr,
            tvpi: s.tvpi,
            dpi: s.dpi,
            rvpi: s.rvpi,
            loss_ratio: s.loss_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub values: Vec<FieldValue>,
    pub result: Option<Arc<ForecastResult>>,
    pub metrics: Option<MetricsSummary>,
    pub error: Option<String>,
}

/// Distribution of one metric across successful scenarios. `best` and
/// `worst` respect the metric's direction (a lower loss ratio is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    pub mean: f64,
    pub std_dev: f64,
    pub best: f64,
    pub median: f64,
    pub worst: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub dimensions: Vec<String>,
    pub total_points: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub results: Vec<BatchResult>,
    pub statistics: BTreeMap<String, MetricStatistics>,
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

/// Number of values [`sweep_values`] yields for `dim`, computed without
/// building them. Fails when the range is invalid or the count exceeds
/// [`MAX_BATCH_POINTS`].
pub fn sweep_len(dim: &SweepDimension) -> EngineResult<usize> {
    let (steps, ends_on_max) = sweep_steps(dim)?;
    Ok(steps + if ends_on_max { 1 } else { 2 })
}

/// Values from `min` to `max` by `step`; `max` is appended when the step
/// does not land on it.
pub fn sweep_values(dim: &SweepDimension) -> EngineResult<Vec<Decimal>> {
    let (steps, ends_on_max) = sweep_steps(dim)?;
    let mut values: Vec<Decimal> = (0..=steps)
        .map(|i| dim.min + dim.step * Decimal::from(i))
        .collect();
    if !ends_on_max {
        values.push(dim.max);
    }
    Ok(values)
}

/// Whole steps that fit in the range, and whether the last one lands on
/// `max`.
fn sweep_steps(dim: &SweepDimension) -> EngineResult<(usize, bool)> {
    let name = dim.selector.name();
    let invalid = |reason: String| CalculationError::InvalidInput {
        field: format!("dimension:{name}"),
        reason,
    };
    if dim.step <= Decimal::ZERO {
        return Err(invalid("Step must be positive".into()));
    }
    if dim.min > dim.max {
        return Err(invalid("Min must be <= max".into()));
    }

    let steps = (dim.max - dim.min)
        .checked_div(dim.step)
        .map(|n| n.floor())
        .and_then(|n| n.to_usize())
        .filter(|n| *n < MAX_BATCH_POINTS)
        .ok_or_else(|| {
            invalid(format!(
                "Step {} over [{}, {}] exceeds the limit of {MAX_BATCH_POINTS} points",
                dim.step, dim.min, dim.max
            ))
        })?;
    let ends_on_max = dim.min + dim.step * Decimal::from(steps) >= dim.max;
    Ok((steps, ends_on_max))
}

/// Cartesian product of the per-dimension values; the first dimension
/// varies slowest.
fn grid(axes: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    axes.iter().fold(vec![Vec::new()], |acc, axis| {
        acc.iter()
            .flat_map(|prefix| {
                axis.iter().map(move |v| {
                    let mut point = prefix.clone();
                    point.push(*v);
                    point
                })
            })
            .collect()
    })
}

fn evaluate_point(
    engine: &ForecastEngine,
    base: &FundConfiguration,
    dims: &[SweepDimension],
    point: &[Decimal],
) -> BatchResult {
    let values: Vec<FieldValue> = dims
        .iter()
        .zip(point)
        .map(|(d, v)| FieldValue {
            field: d.selector.name().to_string(),
            value: *v,
        })
        .collect();

    let mut config = base.clone();
    let applied = dims
        .iter()
        .zip(point)
        .try_for_each(|(d, v)| d.selector.set(&mut config, *v));

    match applied.and_then(|_| engine.forecast(&config)) {
        Ok(result) => BatchResult {
            metrics: Some(MetricsSummary::from(&result.summary)),
            result: Some(result),
            values,
            error: None,
        },
        Err(e) => BatchResult {
            values,
            result: None,
            metrics: None,
            error: Some(e.to_string()),
        },
    }
}

/// Forecast every point of the sweep grid.
///
/// Failed points are kept in the report with their error and excluded from
/// the statistics. Cancellation is checked between scenarios and leaves
/// the engine's cache consistent. With `options.parallel` (and the
/// `parallel` feature) points run on a rayon pool, each worker using its
/// own cache-less engine.
pub fn run_batch(
    engine: &ForecastEngine,
    base: &FundConfiguration,
    dims: &[SweepDimension],
    options: &BatchOptions,
) -> EngineResult<ComputationOutput<BatchReport>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if dims.is_empty() {
        return Err(CalculationError::InvalidInput {
            field: "dimensions".into(),
            reason: "At least one sweep dimension is required".into(),
        });
    }
    for dim in dims {
        if dim.selector.get(base).is_none() {
            return Err(CalculationError::InvalidInput {
                field: format!("dimension:{}", dim.selector.name()),
                reason: "Field does not exist in the base configuration".into(),
            });
        }
    }

    let mut total: usize = 1;
    for dim in dims {
        total = total
            .checked_mul(sweep_len(dim)?)
            .filter(|n| *n <= MAX_BATCH_POINTS)
            .ok_or_else(|| CalculationError::InvalidInput {
                field: "dimensions".into(),
                reason: format!("Sweep grid exceeds the limit of {MAX_BATCH_POINTS} points"),
            })?;
    }
    let axes = dims.iter().map(sweep_values).collect::<EngineResult<Vec<_>>>()?;
    let points = grid(&axes);

    let results = if options.parallel {
        run_parallel(base, dims, &points, options, &mut warnings)
    } else {
        run_sequential(engine, base, dims, &points, options)
    };

    let cancelled = results.len() < total;
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    for r in results.iter().filter(|r| r.error.is_some()) {
        let at: Vec<String> = r.values.iter().map(|v| format!("{}={}", v.field, v.value)).collect();
        let message = format!(
            "Scenario failed at ({}): {}",
            at.join(", "),
            r.error.as_deref().unwrap_or_default()
        );
        tracing::warn!("{message}");
        warnings.push(message);
    }
    if cancelled {
        warnings.push(format!("Sweep cancelled after {} of {total} scenarios", results.len()));
    }

    let report = BatchReport {
        dimensions: dims.iter().map(|d| d.selector.name().to_string()).collect(),
        total_points: total,
        completed: results.len(),
        failed,
        cancelled,
        statistics: metric_statistics(&results),
        results,
    };

    let assumptions = serde_json::json!({
        "base_fund": base.name,
        "dimensions": dims
            .iter()
            .map(|d| serde_json::json!({
                "field": d.selector.name(),
                "min": d.min.to_string(),
                "max": d.max.to_string(),
                "step": d.step.to_string(),
            }))
            .collect::<Vec<_>>(),
        "parallel": options.parallel,
    });

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Cartesian Parameter Sweep",
        &assumptions,
        warnings,
        elapsed,
        report,
    ))
}

fn run_sequential(
    engine: &ForecastEngine,
    base: &FundConfiguration,
    dims: &[SweepDimension],
    points: &[Vec<Decimal>],
    options: &BatchOptions,
) -> Vec<BatchResult> {
    let mut results = Vec::with_capacity(points.len());
    for point in points {
        if options.cancelled() {
            break;
        }
        results.push(evaluate_point(engine, base, dims, point));
        options.report(results.len(), points.len());
    }
    results
}

#[cfg(feature = "parallel")]
fn run_parallel(
    base: &FundConfiguration,
    dims: &[SweepDimension],
    points: &[Vec<Decimal>],
    options: &BatchOptions,
    _warnings: &mut Vec<String>,
) -> Vec<BatchResult> {
    use rayon::prelude::*;

    let completed = AtomicUsize::new(0);
    let results: Vec<Option<BatchResult>> = points
        .par_iter()
        .map_init(ForecastEngine::without_cache, |engine, point| {
            if options.cancelled() {
                return None;
            }
            let result = evaluate_point(engine, base, dims, point);
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            options.report(done, points.len());
            Some(result)
        })
        .collect();
    results.into_iter().flatten().collect()
}

#[cfg(not(feature = "parallel"))]
fn run_parallel(
    base: &FundConfiguration,
    dims: &[SweepDimension],
    points: &[Vec<Decimal>],
    options: &BatchOptions,
    warnings: &mut Vec<String>,
) -> Vec<BatchResult> {
    warnings.push("Built without the `parallel` feature; sweep ran sequentially".into());
    let completed = AtomicUsize::new(0);
    let engine = ForecastEngine::without_cache();
    let mut results = Vec::with_capacity(points.len());
    for point in points {
        if options.cancelled() {
            break;
        }
        results.push(evaluate_point(&engine, base, dims, point));
        options.report(completed.fetch_add(1, Ordering::Relaxed) + 1, points.len());
    }
    results
}

type MetricFn = fn(&MetricsSummary) -> Decimal;

const METRICS: [(&str, MetricFn, bool); 8] = [
    ("gross_moic", |m: &MetricsSummary| m.gross_moic, true),
    ("net_moic", |m: &MetricsSummary| m.net_moic, true),
    ("gross_irr", |m: &MetricsSummary| m.gross_irr, true),
    ("net_irr", |m: &MetricsSummary| m.net_irr, true),
    ("tvpi", |m: &MetricsSummary| m.tvpi, true),
    ("dpi", |m: &MetricsSummary| m.dpi, true),
    ("rvpi", |m: &MetricsSummary| m.rvpi, true),
    ("loss_ratio", |m: &MetricsSummary| m.loss_ratio, false),
];

fn metric_statistics(results: &[BatchResult]) -> BTreeMap<String, MetricStatistics> {
    let successful: Vec<&MetricsSummary> = results.iter().filter_map(|r| r.metrics.as_ref()).collect();
    let mut stats = BTreeMap::new();
    if successful.is_empty() {
        return stats;
    }

    for (name, extract, higher_is_better) in METRICS {
        let values: Vec<f64> = successful
            .iter()
            .map(|m| extract(m).to_f64().unwrap_or(0.0))
            .collect();
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let std_dev = if values.len() > 1 {
            values.iter().std_dev()
        } else {
            0.0
        };
        let (best, worst) = if higher_is_better { (max, min) } else { (min, max) };

        stats.insert(
            name.to_string(),
            MetricStatistics {
                mean: values.iter().mean(),
                std_dev,
                best,
                median: Data::new(values).median(),
                worst,
            },
        );
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn dim(selector: FieldSelector, min: Decimal, max: Decimal, step: Decimal) -> SweepDimension {
        SweepDimension::new(selector, min, max, step)
    }

    #[test]
    fn test_sweep_values_appends_max() {
        let d = dim(FieldSelector::carry_pct(), dec!(0.10), dec!(0.25), dec!(0.10));
        assert_eq!(sweep_values(&d).unwrap(), vec![dec!(0.10), dec!(0.20), dec!(0.25)]);
    }

    #[test]
    fn test_sweep_values_rejects_bad_ranges() {
        let zero_step = dim(FieldSelector::carry_pct(), dec!(0.1), dec!(0.2), Decimal::ZERO);
        assert!(sweep_values(&zero_step).is_err());
        let inverted = dim(FieldSelector::carry_pct(), dec!(0.3), dec!(0.2), dec!(0.1));
        assert!(sweep_values(&inverted).is_err());
    }

    #[test]
    fn test_sweep_len_matches_values() {
        for (min, max, step) in [
            (dec!(0.10), dec!(0.25), dec!(0.10)),
            (dec!(0.10), dec!(0.30), dec!(0.05)),
            (dec!(1), dec!(1), dec!(0.5)),
        ] {
            let d = dim(FieldSelector::carry_pct(), min, max, step);
            assert_eq!(sweep_len(&d).unwrap(), sweep_values(&d).unwrap().len());
        }
    }

    #[test]
    fn test_tiny_step_rejected_before_allocating() {
        let d = dim(FieldSelector::carry_pct(), Decimal::ZERO, Decimal::ONE, dec!(0.000000001));
        match sweep_values(&d).unwrap_err() {
            CalculationError::InvalidInput { field, .. } => assert_eq!(field, "dimension:carry_pct"),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
        assert!(sweep_len(&d).is_err());

        let huge = dim(FieldSelector::fund_size(), Decimal::ZERO, Decimal::MAX, dec!(0.0001));
        assert!(sweep_len(&huge).is_err());

        let engine = ForecastEngine::new();
        let out = run_batch(&engine, &FundConfiguration::default(), &[d], &BatchOptions::default());
        assert!(out.is_err());
        assert_eq!(engine.performance_metrics().total_calculations, 0);
    }

    #[test]
    fn test_grid_product_over_limit_rejected() {
        // 201 x 201 points, each axis fine on its own
        let dims = vec![
            dim(FieldSelector::carry_pct(), Decimal::ZERO, dec!(0.20), dec!(0.001)),
            dim(FieldSelector::hurdle_rate(), Decimal::ZERO, dec!(0.20), dec!(0.001)),
        ];
        assert_eq!(sweep_len(&dims[0]).unwrap(), 201);
        let engine = ForecastEngine::new();
        let err = run_batch(&engine, &FundConfiguration::default(), &dims, &BatchOptions::default())
            .unwrap_err();
        match err {
            CalculationError::InvalidInput { field, .. } => assert_eq!(field, "dimensions"),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_grid_order() {
        let g = grid(&[vec![dec!(1), dec!(2)], vec![dec!(10), dec!(20), dec!(30)]]);
        assert_eq!(g.len(), 6);
        assert_eq!(g[0], vec![dec!(1), dec!(10)]);
        assert_eq!(g[2], vec![dec!(1), dec!(30)]);
        assert_eq!(g[3], vec![dec!(2), dec!(10)]);
    }

    #[test]
    fn test_stage_selectors() {
        let mut config = FundConfiguration::default();
        let alloc = FieldSelector::stage_allocation("Seed");
        assert_eq!(alloc.get(&config), Some(dec!(0.43)));
        alloc.set(&mut config, dec!(0.40)).unwrap();
        assert_eq!(config.stage("Seed").unwrap().allocation_pct, dec!(0.40));

        let missing = FieldSelector::stage_check_size("Series Z");
        assert_eq!(missing.get(&config), None);
        assert!(missing.set(&mut config, dec!(1)).is_err());
        assert_eq!(missing.name(), "check_size:Series Z");
    }

    #[test]
    fn test_unknown_field_rejected_up_front() {
        let engine = ForecastEngine::new();
        let dims = vec![dim(
            FieldSelector::stage_allocation("Growth"),
            dec!(0.1),
            dec!(0.2),
            dec!(0.1),
        )];
        let err = run_batch(&engine, &FundConfiguration::default(), &dims, &BatchOptions::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_invalid_points_are_reported_not_fatal() {
        let engine = ForecastEngine::new();
        // 0 fails validation, 20M runs
        let dims = vec![dim(
            FieldSelector::fund_size(),
            Decimal::ZERO,
            dec!(20_000_000),
            dec!(20_000_000),
        )];
        let out = run_batch(&engine, &FundConfiguration::default(), &dims, &BatchOptions::default())
            .unwrap();
        let report = &out.result;
        assert_eq!(report.total_points, 2);
        assert_eq!(report.failed, 1);
        assert!(report.results[0].error.is_some());
        assert!(report.results[1].metrics.is_some());
        assert_eq!(out.warnings.len(), 1);
        let moic = &report.statistics["gross_moic"];
        assert_eq!(moic.std_dev, 0.0);
        assert_eq!(moic.best, moic.worst);
    }

    #[test]
    fn test_cancellation_between_scenarios() {
        let engine = ForecastEngine::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let options = BatchOptions {
            progress: Some(Box::new(move |p| {
                if p.completed == 2 {
                    flag.store(true, Ordering::Relaxed);
                }
            })),
            cancel: Some(cancel),
            parallel: false,
        };
        let dims = vec![dim(FieldSelector::carry_pct(), dec!(0.10), dec!(0.30), dec!(0.05))];
        let out = run_batch(&engine, &FundConfiguration::default(), &dims, &options).unwrap();
        assert_eq!(out.result.total_points, 5);
        assert_eq!(out.result.completed, 2);
        assert!(out.result.cancelled);
        assert_eq!(engine.cache_len(), 2);
    }
}
