pub mod config;
pub mod error;
pub mod forecast;
pub mod lifecycle;
pub mod portfolio;
pub mod random;
pub mod time_value;
pub mod timeline;
pub mod types;
pub mod validation;
pub mod waterfall;

#[cfg(feature = "batch")]
pub mod batch;

pub use config::{FundConfiguration, FundEconomics, SimulationStrategy, StageStrategy};
pub use error::CalculationError;
pub use forecast::{ForecastEngine, ForecastResult, PerformanceMetrics, SummaryMetrics};
pub use portfolio::build_portfolio;
pub use random::{Lcg, RandomSource, SeededRng};
pub use time_value::compute_irr;
pub use timeline::{build_timeline, CashFlowPoint};
pub use types::*;
pub use validation::{validate_configuration, Severity, ValidationCode, ValidationIssue};
pub use waterfall::{compute_waterfall, WaterfallSummary};

#[cfg(feature = "batch")]
pub use batch::{run_batch, BatchOptions, FieldSelector, SweepDimension};

/// Standard result type for all forecasting operations
pub type EngineResult<T> = Result<T, CalculationError>;
