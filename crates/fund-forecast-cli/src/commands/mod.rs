pub mod batch;
pub mod fund;
pub mod returns;

use fund_forecast_core::FundConfiguration;

use crate::input;

/// Fund configuration from `--input`, or piped JSON on stdin.
pub(crate) fn read_configuration(
    path: Option<&str>,
    command: &str,
) -> Result<FundConfiguration, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        input::file::read_json(path)
    } else if let Some(data) = input::stdin::read_stdin()? {
        Ok(serde_json::from_value(data)?)
    } else {
        Err(format!(
            "--input <fund.json>, --base-case or stdin required for {command}"
        )
        .into())
    }
}
