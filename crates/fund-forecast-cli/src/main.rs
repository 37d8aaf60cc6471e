mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::batch::BatchArgs;
use commands::fund::{ForecastArgs, ValidateArgs};
use commands::returns::{IrrArgs, WaterfallArgs};

/// Venture fund forecasting
#[derive(Parser)]
#[command(
    name = "fundcast",
    version,
    about = "Venture fund forecasting with decimal precision",
    long_about = "Simulate a venture fund's portfolio through graduations and exits, \
                  then report the LP/GP waterfall, IRR, MOIC, TVPI, DPI and RVPI. \
                  Inputs are JSON, read from --input or piped on stdin."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a fund configuration and list any issues
    Validate(ValidateArgs),
    /// Run a full fund forecast
    Forecast(ForecastArgs),
    /// Split exit value between LPs and the GP
    Waterfall(WaterfallArgs),
    /// Internal rate of return for a series of periodic cash flows
    Irr(IrrArgs),
    /// Sweep configuration fields and forecast every combination
    Batch(BatchArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Validate(args) => commands::fund::run_validate(args),
        Commands::Forecast(args) => commands::fund::run_forecast(args),
        Commands::Waterfall(args) => commands::returns::run_waterfall(args),
        Commands::Irr(args) => commands::returns::run_irr(args),
        Commands::Batch(args) => commands::batch::run_batch(args),
        Commands::Version => {
            println!("fundcast {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
