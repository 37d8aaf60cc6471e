use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::CalculationError;
use crate::types::{Money, Multiple, Quarter, Rate};
use crate::EngineResult;

/// Absorbing graduation destination meaning "exits from this stage".
pub const EXIT_STATE: &str = "Exit";

pub const QUARTERS_PER_YEAR: u32 = 4;

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// Immutable description of a fund: economics, stage strategy and the
/// transition matrices that drive the lifecycle simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundConfiguration {
    #[serde(default = "default_fund_name")]
    pub name: String,
    /// Total commitments (LP + GP)
    pub fund_size: Money,
    /// Annual management fee as decimal (0.02 = 2%)
    pub management_fee_rate: Rate,
    /// Carried interest (0.20 = 20%)
    pub carry_pct: Rate,
    /// Preferred return hurdle (0.08 = 8%)
    pub hurdle_rate: Rate,
    /// GP commitment as a fraction of fund size
    pub gp_commitment_pct: Rate,
    pub investment_period_quarters: u32,
    pub fund_life_quarters: u32,
    #[serde(default)]
    pub fee_basis: FeeBasis,
    #[serde(default)]
    pub fee_schedule: Option<FeeSchedule>,
    pub stage_strategies: Vec<StageStrategy>,
    pub graduation_matrix: GraduationMatrix,
    pub exit_probabilities: ExitProbabilityMatrix,
    /// First quarter in which distributions are paid
    #[serde(default = "default_distribution_start")]
    pub distribution_start_quarter: Quarter,
    /// First close; timeline points carry quarter-end dates when set
    #[serde(default)]
    pub vintage_date: Option<NaiveDate>,
    #[serde(default)]
    pub simulation: SimulationSettings,
}

/// Capital the management fee is charged on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeBasis {
    /// Full fund size, GP commitment included
    #[default]
    CommittedCapital,
    /// LP commitments only
    LpCommitment,
}

/// Optional fee step-downs and fund expenses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Rate changes, each effective from `from_quarter` onwards
    #[serde(default)]
    pub steps: Vec<FeeStep>,
    /// Fund operating expenses charged evenly across the fund life
    #[serde(default)]
    pub annual_expenses: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeStep {
    pub from_quarter: Quarter,
    pub rate: Rate,
}

/// One financing stage of the fund's strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStrategy {
    /// Key into the graduation and exit matrices
    pub stage: String,
    /// Fraction of investable capital allocated to first checks at this stage
    pub allocation_pct: Rate,
    pub avg_check_size: Money,
    #[serde(default)]
    pub expected_first_checks: u32,
    /// Baseline graduation rate (insight only; the matrix drives simulation)
    #[serde(default)]
    pub graduation_rate: Rate,
    /// Weighted expected exit value (insight only)
    #[serde(default)]
    pub weighted_exit_value: Money,
    /// Typical holding period from first check to exit
    #[serde(default = "default_avg_exit_quarters")]
    pub avg_exit_quarters: u32,
    #[serde(default = "default_target_ownership")]
    pub target_ownership: Rate,
    /// Cohort model: youngest age at which exits start
    #[serde(default = "default_min_exit_age")]
    pub min_exit_age_quarters: u32,
    /// Cohort model: age at which the graduation step is applied
    #[serde(default = "default_graduation_age")]
    pub graduation_age_quarters: u32,
}

/// Stage → {destination stage → probability}. Missing mass means stay/fail.
pub type GraduationMatrix = BTreeMap<String, BTreeMap<String, Rate>>;

/// Stage → five-bucket exit outcome distribution.
pub type ExitProbabilityMatrix = BTreeMap<String, ExitDistribution>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDistribution {
    pub failure: Rate,
    pub low: Rate,
    pub medium: Rate,
    pub high: Rate,
    pub mega: Rate,
}

/// Exit outcome buckets in cumulative-sampling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExitBucket {
    Failure,
    Low,
    Medium,
    High,
    Mega,
}

impl ExitBucket {
    pub const ALL: [ExitBucket; 5] = [
        ExitBucket::Failure,
        ExitBucket::Low,
        ExitBucket::Medium,
        ExitBucket::High,
        ExitBucket::Mega,
    ];

    /// Multiple range `[low, high)` sampled uniformly within the bucket.
    pub fn multiple_range(self) -> (Multiple, Multiple) {
        match self {
            ExitBucket::Failure => (Decimal::ZERO, Decimal::ZERO),
            ExitBucket::Low => (dec!(1), dec!(3)),
            ExitBucket::Medium => (dec!(3), dec!(10)),
            ExitBucket::High => (dec!(10), dec!(50)),
            ExitBucket::Mega => (dec!(50), dec!(150)),
        }
    }
}

impl ExitDistribution {
    pub fn probability(&self, bucket: ExitBucket) -> Rate {
        match bucket {
            ExitBucket::Failure => self.failure,
            ExitBucket::Low => self.low,
            ExitBucket::Medium => self.medium,
            ExitBucket::High => self.high,
            ExitBucket::Mega => self.mega,
        }
    }

    pub fn total(&self) -> Rate {
        self.failure + self.low + self.medium + self.high + self.mega
    }

    /// Pick the bucket a single uniform draw falls into by cumulative
    /// comparison. Draws past the cumulative total land in the last bucket
    /// with non-zero probability.
    pub fn bucket_for(&self, draw: Decimal) -> ExitBucket {
        let mut cumulative = Decimal::ZERO;
        let mut last_nonzero = ExitBucket::Failure;
        for bucket in ExitBucket::ALL {
            let p = self.probability(bucket);
            if p > Decimal::ZERO {
                last_nonzero = bucket;
            }
            cumulative += p;
            if draw < cumulative {
                return bucket;
            }
        }
        last_nonzero
    }
}

/// Settings that select and seed the lifecycle simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub strategy: SimulationStrategy,
    /// Cohort model: fraction of investable capital held for follow-ons
    #[serde(default = "default_reserve_pct")]
    pub reserve_pct: Rate,
    #[serde(default)]
    pub recycling: Option<RecyclingPolicy>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            strategy: SimulationStrategy::default(),
            reserve_pct: default_reserve_pct(),
            recycling: None,
        }
    }
}

/// Which lifecycle simulator runs the forecast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationStrategy {
    /// One record per company; full fidelity
    #[default]
    PerCompany,
    /// Vintage/stage cohorts; O(stages x quarters)
    Cohort,
}

impl SimulationStrategy {
    /// Portfolios above this size are cheaper to simulate as cohorts.
    pub const COHORT_THRESHOLD: u32 = 500;

    pub fn recommended(expected_companies: u32) -> Self {
        if expected_companies > Self::COHORT_THRESHOLD {
            SimulationStrategy::Cohort
        } else {
            SimulationStrategy::PerCompany
        }
    }
}

/// Cohort model: redeploy part of early proceeds during the investment period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecyclingPolicy {
    /// Fraction of each quarter's realized proceeds recycled
    pub rate: Rate,
    /// Lifetime recycling cap as a fraction of fund size
    pub cap_pct: Rate,
}

fn default_fund_name() -> String {
    "Untitled Fund".to_string()
}

fn default_distribution_start() -> Quarter {
    12
}

fn default_avg_exit_quarters() -> u32 {
    24
}

fn default_target_ownership() -> Rate {
    dec!(0.10)
}

fn default_min_exit_age() -> u32 {
    12
}

fn default_graduation_age() -> u32 {
    6
}

fn default_seed() -> u64 {
    42
}

fn default_reserve_pct() -> Rate {
    dec!(0.30)
}

impl StageStrategy {
    pub fn new(stage: &str, allocation_pct: Rate, avg_check_size: Money) -> Self {
        Self {
            stage: stage.to_string(),
            allocation_pct,
            avg_check_size,
            expected_first_checks: 0,
            graduation_rate: Decimal::ZERO,
            weighted_exit_value: Decimal::ZERO,
            avg_exit_quarters: default_avg_exit_quarters(),
            target_ownership: default_target_ownership(),
            min_exit_age_quarters: default_min_exit_age(),
            graduation_age_quarters: default_graduation_age(),
        }
    }
}

fn exit_row(failure: Rate, low: Rate, medium: Rate, high: Rate, mega: Rate) -> ExitDistribution {
    ExitDistribution {
        failure,
        low,
        medium,
        high,
        mega,
    }
}

impl Default for FundConfiguration {
    /// $20M pre-seed/seed fund: 2% fee, 20% carry, 8% hurdle, 3-year
    /// investment period inside a 10-year life.
    ///
    /// Whole first checks leave $1.25M of the $16M investable capital
    /// unallocated (about 7.8%), so validating this configuration reports a
    /// `LowReserveRatio` warning. It is a warning only and the fund forecasts.
    fn default() -> Self {
        let mut pre_seed = StageStrategy::new("Pre-Seed", dec!(0.43), dec!(250_000));
        pre_seed.expected_first_checks = 27;
        pre_seed.graduation_rate = dec!(0.40);
        pre_seed.avg_exit_quarters = 28;

        let mut seed = StageStrategy::new("Seed", dec!(0.43), dec!(500_000));
        seed.expected_first_checks = 13;
        seed.graduation_rate = dec!(0.35);
        seed.avg_exit_quarters = 24;

        let mut series_a = StageStrategy::new("Series A", dec!(0.14), dec!(1_500_000));
        series_a.expected_first_checks = 1;
        series_a.graduation_rate = dec!(0.50);
        series_a.avg_exit_quarters = 20;
        series_a.graduation_age_quarters = 8;

        let mut graduation_matrix = GraduationMatrix::new();
        graduation_matrix.insert(
            "Pre-Seed".into(),
            BTreeMap::from([("Seed".to_string(), dec!(0.35)), (EXIT_STATE.to_string(), dec!(0.05))]),
        );
        graduation_matrix.insert(
            "Seed".into(),
            BTreeMap::from([
                ("Series A".to_string(), dec!(0.30)),
                (EXIT_STATE.to_string(), dec!(0.05)),
            ]),
        );
        graduation_matrix.insert(
            "Series A".into(),
            BTreeMap::from([
                ("Series B".to_string(), dec!(0.40)),
                (EXIT_STATE.to_string(), dec!(0.10)),
            ]),
        );

        let mut exit_probabilities = ExitProbabilityMatrix::new();
        exit_probabilities.insert(
            "Pre-Seed".into(),
            exit_row(dec!(0.60), dec!(0.20), dec!(0.12), dec!(0.06), dec!(0.02)),
        );
        exit_probabilities.insert(
            "Seed".into(),
            exit_row(dec!(0.50), dec!(0.25), dec!(0.15), dec!(0.08), dec!(0.02)),
        );
        exit_probabilities.insert(
            "Series A".into(),
            exit_row(dec!(0.40), dec!(0.30), dec!(0.18), dec!(0.09), dec!(0.03)),
        );

        Self {
            name: "Default Seed Fund".to_string(),
            fund_size: dec!(20_000_000),
            management_fee_rate: dec!(0.02),
            carry_pct: dec!(0.20),
            hurdle_rate: dec!(0.08),
            gp_commitment_pct: dec!(0.02),
            investment_period_quarters: 12,
            fund_life_quarters: 40,
            fee_basis: FeeBasis::CommittedCapital,
            fee_schedule: None,
            stage_strategies: vec![pre_seed, seed, series_a],
            graduation_matrix,
            exit_probabilities,
            distribution_start_quarter: default_distribution_start(),
            vintage_date: None,
            simulation: SimulationSettings::default(),
        }
    }
}

impl FundConfiguration {
    pub fn fund_life_years(&self) -> Decimal {
        Decimal::from(self.fund_life_quarters) / Decimal::from(QUARTERS_PER_YEAR)
    }

    pub fn stage(&self, name: &str) -> Option<&StageStrategy> {
        self.stage_strategies.iter().find(|s| s.stage == name)
    }

    pub fn exit_distribution(&self, stage: &str) -> EngineResult<&ExitDistribution> {
        self.exit_probabilities
            .get(stage)
            .ok_or_else(|| CalculationError::MissingStage {
                stage: stage.to_string(),
                matrix: "exit probability matrix".into(),
            })
    }

    pub fn graduation_row(&self, stage: &str) -> EngineResult<&BTreeMap<String, Rate>> {
        self.graduation_matrix
            .get(stage)
            .ok_or_else(|| CalculationError::MissingStage {
                stage: stage.to_string(),
                matrix: "graduation matrix".into(),
            })
    }

    /// Annual fee rate in force at `quarter` (1-based fee quarters).
    pub fn fee_rate_at(&self, quarter: Quarter) -> Rate {
        let mut rate = self.management_fee_rate;
        if let Some(schedule) = &self.fee_schedule {
            let mut best: Option<Quarter> = None;
            for step in &schedule.steps {
                if step.from_quarter <= quarter && best.is_none_or(|b| step.from_quarter >= b) {
                    best = Some(step.from_quarter);
                    rate = step.rate;
                }
            }
        }
        rate
    }
}

// ---------------------------------------------------------------------------
// Derived economics
// ---------------------------------------------------------------------------

/// Capital split derived from the configuration. Everything downstream
/// (validation, generator, timeline) reads these numbers rather than
/// recomputing them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundEconomics {
    pub gp_commitment: Money,
    pub lp_commitment: Money,
    pub fee_base: Money,
    /// Management fee charged in each quarter; index 0 is quarter 0 (no fee)
    pub quarterly_fees: Vec<Money>,
    pub total_management_fees: Money,
    pub total_expenses: Money,
    pub investable_capital: Money,
}

impl FundEconomics {
    pub fn derive(config: &FundConfiguration) -> Self {
        let gp_commitment = config.fund_size * config.gp_commitment_pct;
        let lp_commitment = config.fund_size - gp_commitment;
        let fee_base = match config.fee_basis {
            FeeBasis::CommittedCapital => config.fund_size,
            FeeBasis::LpCommitment => lp_commitment,
        };
        let quarters_per_year = Decimal::from(QUARTERS_PER_YEAR);

        let mut quarterly_fees = Vec::with_capacity(config.fund_life_quarters as usize + 1);
        quarterly_fees.push(Decimal::ZERO);
        for q in 1..=config.fund_life_quarters {
            quarterly_fees.push(fee_base * config.fee_rate_at(q) / quarters_per_year);
        }
        let total_management_fees: Money = quarterly_fees.iter().copied().sum();

        let total_expenses = config
            .fee_schedule
            .as_ref()
            .map(|s| s.annual_expenses * config.fund_life_years())
            .unwrap_or(Decimal::ZERO);

        let investable_capital = config.fund_size - total_management_fees - total_expenses;

        Self {
            gp_commitment,
            lp_commitment,
            fee_base,
            quarterly_fees,
            total_management_fees,
            total_expenses,
            investable_capital,
        }
    }

    pub fn stage_capital(&self, strategy: &StageStrategy) -> Money {
        self.investable_capital * strategy.allocation_pct
    }

    /// Number of first checks a stage can write; fractional remainders drop.
    pub fn company_count(&self, strategy: &StageStrategy) -> u32 {
        if strategy.avg_check_size <= Decimal::ZERO {
            return 0;
        }
        let capital = self.stage_capital(strategy);
        if capital <= Decimal::ZERO {
            return 0;
        }
        (capital / strategy.avg_check_size)
            .floor()
            .to_u32()
            .unwrap_or(0)
    }

    /// Capital left uninvested after every stage writes its first checks.
    pub fn initial_reserve(&self, strategies: &[StageStrategy]) -> Money {
        let deployed: Money = strategies
            .iter()
            .map(|s| Decimal::from(self.company_count(s)) * s.avg_check_size)
            .sum();
        self.investable_capital - deployed
    }
}
