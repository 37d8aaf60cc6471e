use clap::Args;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use fund_forecast_core::batch::{
    self, BatchOptions, BatchProgress, BatchReport, FieldSelector, SweepDimension,
};
use fund_forecast_core::{ForecastEngine, FundConfiguration};

use super::read_configuration;

/// Arguments for a parameter sweep
#[derive(Args)]
pub struct BatchArgs {
    /// Path to JSON file with the base fund configuration
    #[arg(long)]
    pub input: Option<String>,

    /// Sweep around the built-in $20M seed fund
    #[arg(long)]
    pub base_case: bool,

    /// Sweep dimension in format name:min:max:step, repeatable
    /// (e.g. "carry_pct:0.15:0.30:0.05", "allocation:Seed:0.3:0.5:0.1")
    #[arg(long = "dim", required = true)]
    pub dims: Vec<String>,

    /// Run scenarios on a thread pool
    #[arg(long)]
    pub parallel: bool,

    /// Include every scenario's full forecast in the output
    #[arg(long)]
    pub full: bool,
}

fn parse_dimension(spec: &str) -> Result<SweepDimension, Box<dyn std::error::Error>> {
    // Stage names may contain ':' so split the numbers off the right.
    let parts: Vec<&str> = spec.rsplitn(4, ':').collect();
    if parts.len() != 4 {
        return Err(format!("Sweep dimension must be name:min:max:step, got '{}'", spec).into());
    }
    let step: Decimal = parts[0].parse()?;
    let max: Decimal = parts[1].parse()?;
    let min: Decimal = parts[2].parse()?;
    Ok(SweepDimension::new(selector_for(parts[3])?, min, max, step))
}

fn selector_for(name: &str) -> Result<FieldSelector, Box<dyn std::error::Error>> {
    let selector = match name {
        "fund_size" => FieldSelector::fund_size(),
        "management_fee_rate" => FieldSelector::management_fee_rate(),
        "carry_pct" => FieldSelector::carry_pct(),
        "hurdle_rate" => FieldSelector::hurdle_rate(),
        "gp_commitment_pct" => FieldSelector::gp_commitment_pct(),
        other => match other.split_once(':') {
            Some(("allocation", stage)) => FieldSelector::stage_allocation(stage),
            Some(("check_size", stage)) => FieldSelector::stage_check_size(stage),
            _ => {
                return Err(format!(
                    "Unknown sweep field '{}'. Expected fund_size, management_fee_rate, \
                     carry_pct, hurdle_rate, gp_commitment_pct, allocation:<stage> or \
                     check_size:<stage>",
                    other
                )
                .into())
            }
        },
    };
    Ok(selector)
}

pub fn run_batch(args: BatchArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let base = if args.base_case {
        FundConfiguration::default()
    } else {
        read_configuration(args.input.as_deref(), "batch")?
    };
    let dims = args
        .dims
        .iter()
        .map(|d| parse_dimension(d))
        .collect::<Result<Vec<_>, _>>()?;

    let options = BatchOptions {
        progress: Some(Box::new(|p: BatchProgress| {
            tracing::info!(completed = p.completed, total = p.total, "batch progress");
        })),
        parallel: args.parallel,
        ..BatchOptions::default()
    };

    let engine = ForecastEngine::new();
    let output = batch::run_batch(&engine, &base, &dims, &options)?;

    let mut value = serde_json::to_value(&output)?;
    if !args.full {
        value["result"] = summarize_report(&output.result)?;
    }
    Ok(value)
}

/// One flat row per scenario: swept values, headline metrics, error.
fn summarize_report(report: &BatchReport) -> Result<Value, Box<dyn std::error::Error>> {
    let mut rows = Vec::with_capacity(report.results.len());
    for r in &report.results {
        let mut row = Map::new();
        for v in &r.values {
            row.insert(v.field.clone(), serde_json::to_value(v.value)?);
        }
        if let Some(Value::Object(metrics)) = r.metrics.as_ref().map(serde_json::to_value).transpose()? {
            row.extend(metrics);
        }
        row.insert(
            "error".to_string(),
            r.error.clone().map(Value::String).unwrap_or(Value::Null),
        );
        rows.push(Value::Object(row));
    }

    Ok(serde_json::json!({
        "dimensions": report.dimensions,
        "total_points": report.total_points,
        "completed": report.completed,
        "failed": report.failed,
        "cancelled": report.cancelled,
        "statistics": report.statistics,
        "rows": rows,
    }))
}
