use std::time::Instant;

use clap::Args;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use fund_forecast_core::time_value::{annualize_quarterly, npv};
use fund_forecast_core::waterfall::{self, WaterfallInput};
use fund_forecast_core::{compute_irr, with_metadata};

use crate::input;

/// Arguments for the LP/GP waterfall
#[derive(Args)]
pub struct WaterfallArgs {
    /// Path to JSON input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Capital invested into portfolio companies
    #[arg(long)]
    pub invested: Option<Decimal>,

    /// Total exit value
    #[arg(long)]
    pub exit_value: Option<Decimal>,

    /// GP carried interest
    #[arg(long, default_value = "0.20")]
    pub carry: Decimal,

    /// LP preferred return
    #[arg(long, default_value = "0.08")]
    pub hurdle: Decimal,
}

/// Arguments for IRR
#[derive(Args)]
pub struct IrrArgs {
    /// Path to JSON input file with a `cash_flows` array
    #[arg(long)]
    pub input: Option<String>,

    /// Periodic cash flows (comma-separated, e.g. "-100,30,30,130")
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub cash_flows: Option<Vec<Decimal>>,

    /// Treat periods as quarters and also report the annualized rate
    #[arg(long)]
    pub quarterly: bool,

    /// Also report NPV of the flows discounted at this per-period rate
    #[arg(long, allow_hyphen_values = true)]
    pub discount_rate: Option<Decimal>,
}

#[derive(Deserialize)]
struct IrrInput {
    cash_flows: Vec<Decimal>,
}

pub fn run_waterfall(args: WaterfallArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let wf_input: WaterfallInput = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let (Some(invested), Some(exit_value)) = (args.invested, args.exit_value) {
        WaterfallInput {
            total_invested: invested,
            total_exit_value: exit_value,
            carry_pct: args.carry,
            hurdle_rate: args.hurdle,
        }
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err("--invested and --exit-value (or --input) are required for waterfall".into());
    };

    let result = waterfall::calculate_waterfall(&wf_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_irr(args: IrrArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let cash_flows = if let Some(ref path) = args.input {
        input::file::read_json::<IrrInput>(path)?.cash_flows
    } else if let Some(flows) = args.cash_flows {
        flows
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value::<IrrInput>(data)?.cash_flows
    } else {
        return Err("--cash-flows or --input <file.json> required for IRR".into());
    };

    let irr = compute_irr(&cash_flows);
    let mut warnings = Vec::new();
    let mixed_signs = cash_flows.iter().any(|cf| *cf > Decimal::ZERO)
        && cash_flows.iter().any(|cf| *cf < Decimal::ZERO);
    if !mixed_signs {
        warnings.push("Cash flows do not change sign; IRR is undefined and reported as 0".to_string());
    }

    let mut result = json!({
        "irr": irr,
        "periods": cash_flows.len(),
    });
    if args.quarterly {
        result["annualized_irr"] = json!(annualize_quarterly(irr));
    }
    if let Some(rate) = args.discount_rate {
        result["npv"] = json!(npv(rate, &cash_flows)?);
    }

    let output = with_metadata(
        "Internal Rate of Return (Newton-Raphson with bisection fallback)",
        &json!({
            "cash_flows": cash_flows,
            "quarterly": args.quarterly,
            "discount_rate": args.discount_rate,
        }),
        warnings,
        start.elapsed().as_micros() as u64,
        result,
    );
    Ok(serde_json::to_value(output)?)
}
