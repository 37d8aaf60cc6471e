use std::time::Instant;

use clap::{Args, ValueEnum};
use serde_json::{json, Value};

use fund_forecast_core::{
    validate_configuration, with_metadata, ForecastEngine, FundConfiguration, FundEconomics,
    Severity, SimulationStrategy,
};

use super::read_configuration;

/// Arguments for configuration validation
#[derive(Args)]
pub struct ValidateArgs {
    /// Path to JSON fund configuration
    #[arg(long)]
    pub input: Option<String>,

    /// Use the built-in $20M seed fund instead of reading input
    #[arg(long)]
    pub base_case: bool,
}

/// Arguments for a fund forecast
#[derive(Args)]
pub struct ForecastArgs {
    /// Path to JSON fund configuration
    #[arg(long)]
    pub input: Option<String>,

    /// Use the built-in $20M seed fund instead of reading input
    #[arg(long)]
    pub base_case: bool,

    /// Lifecycle simulator (overrides the configuration)
    #[arg(long)]
    pub strategy: Option<StrategyArg>,

    /// Random seed (overrides the configuration)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Emit only the headline metrics
    #[arg(long)]
    pub summary: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    PerCompany,
    Cohort,
    /// Cohorts for large portfolios, per-company otherwise
    Auto,
}

fn load(
    input: Option<&str>,
    base_case: bool,
    command: &str,
) -> Result<FundConfiguration, Box<dyn std::error::Error>> {
    if base_case {
        return Ok(FundConfiguration::default());
    }
    read_configuration(input, command)
}

pub fn run_validate(args: ValidateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let config = load(args.input.as_deref(), args.base_case, "validation")?;
    let issues = validate_configuration(&config);

    let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
    let warnings: Vec<String> = issues
        .iter()
        .filter(|i| i.severity == Severity::Warning)
        .map(|i| format!("{} ({})", i.message, i.field))
        .collect();

    let result = json!({
        "fund": config.name,
        "valid": errors == 0,
        "errors": errors,
        "warnings": warnings.len(),
        "issues": issues,
    });
    let output = with_metadata(
        "Fund Configuration Validation",
        &json!({ "fund": config.name }),
        warnings,
        start.elapsed().as_micros() as u64,
        result,
    );
    Ok(serde_json::to_value(output)?)
}

pub fn run_forecast(args: ForecastArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut config = load(args.input.as_deref(), args.base_case, "forecast")?;

    if let Some(seed) = args.seed {
        config.simulation.seed = seed;
    }
    if let Some(strategy) = args.strategy {
        config.simulation.strategy = resolve_strategy(strategy, &config);
    }

    let engine = ForecastEngine::new();
    let forecast = engine.forecast(&config)?;

    let methodology = match forecast.strategy {
        SimulationStrategy::PerCompany => "Venture Fund Forecast (per-company lifecycle simulation)",
        SimulationStrategy::Cohort => "Venture Fund Forecast (vintage/stage cohort simulation)",
    };
    let warnings: Vec<String> = forecast
        .warnings
        .iter()
        .map(|i| format!("{} ({})", i.message, i.field))
        .collect();
    let assumptions = json!({
        "fund": config.name,
        "fund_size": config.fund_size,
        "seed": config.simulation.seed,
        "strategy": forecast.strategy,
    });
    let elapsed = start.elapsed().as_micros() as u64;

    let value = if args.summary {
        serde_json::to_value(with_metadata(methodology, &assumptions, warnings, elapsed, &forecast.summary))?
    } else {
        serde_json::to_value(with_metadata(methodology, &assumptions, warnings, elapsed, &*forecast))?
    };
    Ok(value)
}

fn resolve_strategy(arg: StrategyArg, config: &FundConfiguration) -> SimulationStrategy {
    match arg {
        StrategyArg::PerCompany => SimulationStrategy::PerCompany,
        StrategyArg::Cohort => SimulationStrategy::Cohort,
        StrategyArg::Auto => {
            let economics = FundEconomics::derive(config);
            let expected: u32 = config
                .stage_strategies
                .iter()
                .map(|s| economics.company_count(s))
                .sum();
            SimulationStrategy::recommended(expected)
        }
    }
}
