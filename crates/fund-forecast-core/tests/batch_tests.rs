#![cfg(feature = "batch")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fund_forecast_core::batch::BatchProgress;
use fund_forecast_core::{
    run_batch, BatchOptions, FieldSelector, ForecastEngine, FundConfiguration, SweepDimension,
};
use rust_decimal_macros::dec;

#[test]
fn test_carry_sweep_statistics_are_ordered() {
    let engine = ForecastEngine::new();
    let dims = vec![SweepDimension::new(
        FieldSelector::carry_pct(),
        dec!(0.10),
        dec!(0.30),
        dec!(0.05),
    )];

    let output = run_batch(&engine, &FundConfiguration::default(), &dims, &BatchOptions::default())
        .unwrap();
    let report = output.result;

    assert_eq!(report.total_points, 5);
    assert_eq!(report.completed, 5);
    assert_eq!(report.failed, 0);
    assert!(!report.cancelled);

    for (metric, stats) in &report.statistics {
        let (low, high) = if metric == "loss_ratio" {
            (stats.best, stats.worst)
        } else {
            (stats.worst, stats.best)
        };
        assert!(low <= stats.median && stats.median <= high, "{metric}: {stats:?}");
    }
}

#[test]
fn test_higher_carry_never_raises_net_moic() {
    let engine = ForecastEngine::new();
    let dims = vec![SweepDimension::new(
        FieldSelector::carry_pct(),
        dec!(0.10),
        dec!(0.30),
        dec!(0.10),
    )];
    let report = run_batch(&engine, &FundConfiguration::default(), &dims, &BatchOptions::default())
        .unwrap()
        .result;

    let net: Vec<_> = report
        .results
        .iter()
        .map(|r| r.metrics.as_ref().unwrap().net_moic)
        .collect();
    assert!(net.windows(2).all(|w| w[0] >= w[1]), "{net:?}");
}

#[test]
fn test_two_dimension_grid_reports_progress() {
    let engine = ForecastEngine::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let options = BatchOptions {
        progress: Some(Box::new(move |p: BatchProgress| {
            assert!(p.completed <= p.total);
            seen.fetch_add(1, Ordering::Relaxed);
        })),
        ..BatchOptions::default()
    };
    let dims = vec![
        SweepDimension::new(FieldSelector::hurdle_rate(), dec!(0.06), dec!(0.10), dec!(0.02)),
        SweepDimension::new(
            FieldSelector::management_fee_rate(),
            dec!(0.015),
            dec!(0.025),
            dec!(0.01),
        ),
    ];

    let report = run_batch(&engine, &FundConfiguration::default(), &dims, &options)
        .unwrap()
        .result;
    assert_eq!(report.total_points, 6);
    assert_eq!(report.results.len(), 6);
    assert_eq!(calls.load(Ordering::Relaxed), 6);
    assert_eq!(
        report.dimensions,
        vec!["hurdle_rate".to_string(), "management_fee_rate".to_string()]
    );
}
