use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::{ExitBucket, ExitDistribution, FundConfiguration, FundEconomics, EXIT_STATE};
use crate::lifecycle::company::stage_markup;
use crate::lifecycle::{LifecycleSimulator, SimulationOutcome};
use crate::random::{uniform, RandomSource};
use crate::types::{Money, Quarter, Rate};
use crate::EngineResult;

/// Quarterly exit rate once a cohort reaches its minimum exit age.
const BASE_EXIT_RATE: Decimal = dec!(0.15);
/// The exit rate ramps linearly over this many quarters...
const EXIT_RAMP_QUARTERS: Decimal = dec!(8);
/// ...up to this multiple of the base rate.
const MAX_EXIT_RAMP: Decimal = dec!(3);
/// Share of a graduating company's implied check funded from reserves.
const FOLLOW_ON_RESERVE_SHARE: Decimal = dec!(0.5);

const DEFAULT_MIN_EXIT_AGE: u32 = 12;
const DEFAULT_GRADUATION_AGE: u32 = 6;

// ---------------------------------------------------------------------------
// Cohort records
// ---------------------------------------------------------------------------

/// Companies exited from a cohort, by outcome bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitCounts {
    pub failure: u32,
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub mega: u32,
}

impl ExitCounts {
    pub fn total(&self) -> u32 {
        self.failure + self.low + self.medium + self.high + self.mega
    }

    pub fn get(&self, bucket: ExitBucket) -> u32 {
        match bucket {
            ExitBucket::Failure => self.failure,
            ExitBucket::Low => self.low,
            ExitBucket::Medium => self.medium,
            ExitBucket::High => self.high,
            ExitBucket::Mega => self.mega,
        }
    }

    fn add(&mut self, bucket: ExitBucket, n: u32) {
        match bucket {
            ExitBucket::Failure => self.failure += n,
            ExitBucket::Low => self.low += n,
            ExitBucket::Medium => self.medium += n,
            ExitBucket::High => self.high += n,
            ExitBucket::Mega => self.mega += n,
        }
    }

    fn merge(&mut self, other: &ExitCounts) {
        for bucket in ExitBucket::ALL {
            self.add(bucket, other.get(bucket));
        }
    }
}

/// Companies sharing a vintage quarter and stage, tracked as counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub vintage_quarter: Quarter,
    pub stage: String,
    /// Stage whose exit distribution this cohort samples from
    pub exit_profile: String,
    pub initial_companies: u32,
    pub active_companies: u32,
    pub age_quarters: u32,
    /// Capital deployed into this cohort
    pub invested: Money,
    /// Per-company value that exit multiples apply to
    pub value_basis: Money,
    pub realized_value: Money,
    pub graduations: BTreeMap<String, u32>,
    pub exits: ExitCounts,
    /// Created by graduation out of an earlier cohort rather than by a
    /// first-check deployment
    pub follow_on: bool,
    /// Follow-on cohorts never graduate again
    pub graduation_applied: bool,
}

impl Cohort {
    /// Active companies carried at their value basis.
    pub fn unrealized_value(&self) -> Money {
        Decimal::from(self.active_companies) * self.value_basis
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Aggregate lifecycle model: steps quarter by quarter over cohorts instead
/// of companies, so cost grows with stages x quarters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CohortSimulator;

struct CohortState {
    cohorts: Vec<Cohort>,
    undeployed: Vec<Money>,
    reserve_pool: Money,
    recycled: Money,
    investments: Vec<Money>,
    exit_proceeds: Vec<Money>,
}

impl LifecycleSimulator for CohortSimulator {
    fn simulate(
        &self,
        config: &FundConfiguration,
        economics: &FundEconomics,
        rng: &mut dyn RandomSource,
    ) -> EngineResult<SimulationOutcome> {
        let reserve_pct = config.simulation.reserve_pct;
        let mut state = CohortState {
            cohorts: Vec::new(),
            undeployed: config
                .stage_strategies
                .iter()
                .map(|s| economics.stage_capital(s) * (Decimal::ONE - reserve_pct))
                .collect(),
            reserve_pool: economics.investable_capital * reserve_pct,
            recycled: Decimal::ZERO,
            investments: SimulationOutcome::empty_series(config),
            exit_proceeds: SimulationOutcome::empty_series(config),
        };

        for quarter in 1..=config.fund_life_quarters {
            for cohort in state.cohorts.iter_mut() {
                cohort.age_quarters += 1;
            }
            let graduated_exits = graduate_cohorts(&mut state, config, quarter, rng)?;
            let proceeds = exit_cohorts(&mut state, config, quarter, rng)?;
            recycle(&mut state, config, quarter, graduated_exits + proceeds);
            deploy(&mut state, config, quarter);
        }

        let unrealized: Money = state.cohorts.iter().map(Cohort::unrealized_value).sum();
        tracing::debug!(
            cohorts = state.cohorts.len(),
            recycled = %state.recycled,
            unrealized = %unrealized,
            reserve_left = %state.reserve_pool,
            "cohort simulation complete"
        );

        let total_invested = state.investments.iter().copied().sum();
        let total_exit_value = state.exit_proceeds.iter().copied().sum();
        Ok(SimulationOutcome {
            portfolio: Vec::new(),
            cohorts: state.cohorts,
            total_invested,
            total_exit_value,
            quarterly_investments: state.investments,
            quarterly_exit_proceeds: state.exit_proceeds,
            recycled_capital: state.recycled,
        })
    }
}

/// Spread each stage's undeployed capital evenly over the investment
/// quarters that remain, writing whole checks only.
fn deploy(state: &mut CohortState, config: &FundConfiguration, quarter: Quarter) {
    let period = config.investment_period_quarters;
    if quarter > period {
        return;
    }
    let remaining_quarters = Decimal::from(period - quarter + 1);

    for (idx, strategy) in config.stage_strategies.iter().enumerate() {
        if strategy.avg_check_size <= Decimal::ZERO {
            continue;
        }
        let tranche = state.undeployed[idx] / remaining_quarters;
        let companies = floor_count(tranche / strategy.avg_check_size);
        if companies == 0 {
            continue;
        }
        let amount = Decimal::from(companies) * strategy.avg_check_size;
        state.undeployed[idx] -= amount;
        state.investments[quarter as usize] += amount;
        state.cohorts.push(Cohort {
            vintage_quarter: quarter,
            stage: strategy.stage.clone(),
            exit_profile: strategy.stage.clone(),
            initial_companies: companies,
            active_companies: companies,
            age_quarters: 0,
            invested: amount,
            value_basis: strategy.avg_check_size,
            realized_value: Decimal::ZERO,
            graduations: BTreeMap::new(),
            exits: ExitCounts::default(),
            follow_on: false,
            graduation_applied: false,
        });
    }
}

/// Apply each due cohort's graduation row once. Returns the proceeds of
/// companies that graduated straight to an exit.
fn graduate_cohorts(
    state: &mut CohortState,
    config: &FundConfiguration,
    quarter: Quarter,
    rng: &mut dyn RandomSource,
) -> EngineResult<Money> {
    let mut spawned = Vec::new();
    let mut exit_proceeds = Decimal::ZERO;

    for idx in 0..state.cohorts.len() {
        let cohort = &state.cohorts[idx];
        if cohort.graduation_applied || cohort.active_companies == 0 {
            continue;
        }
        let graduation_age = config
            .stage(&cohort.stage)
            .map(|s| s.graduation_age_quarters)
            .unwrap_or(DEFAULT_GRADUATION_AGE);
        if cohort.age_quarters < graduation_age {
            continue;
        }

        let row = config.graduation_row(&cohort.stage)?.clone();
        let starting = state.cohorts[idx].active_companies;

        for (destination, probability) in &row {
            let cohort = &mut state.cohorts[idx];
            let count = floor_count(Decimal::from(starting) * probability).min(cohort.active_companies);
            if count == 0 {
                continue;
            }
            cohort.active_companies -= count;
            *cohort.graduations.entry(destination.clone()).or_insert(0) += count;

            if destination == EXIT_STATE {
                let distribution = config.exit_distribution(&cohort.exit_profile)?;
                let basis = cohort.value_basis;
                let (counts, proceeds) = realize(count, basis, distribution, rng);
                let cohort = &mut state.cohorts[idx];
                cohort.exits.merge(&counts);
                cohort.realized_value += proceeds;
                state.exit_proceeds[quarter as usize] += proceeds;
                exit_proceeds += proceeds;
                continue;
            }

            let implied_check = cohort.invested / Decimal::from(cohort.initial_companies.max(1));
            let wanted = implied_check * Decimal::from(count) * FOLLOW_ON_RESERVE_SHARE;
            let funded = wanted.min(state.reserve_pool).max(Decimal::ZERO);
            state.reserve_pool -= funded;
            state.investments[quarter as usize] += funded;

            let exit_profile = if config.exit_probabilities.contains_key(destination) {
                destination.clone()
            } else {
                cohort.exit_profile.clone()
            };
            spawned.push(Cohort {
                vintage_quarter: quarter,
                stage: destination.clone(),
                exit_profile,
                initial_companies: count,
                active_companies: count,
                age_quarters: 0,
                invested: funded,
                value_basis: cohort.value_basis * stage_markup(destination),
                realized_value: Decimal::ZERO,
                graduations: BTreeMap::new(),
                exits: ExitCounts::default(),
                follow_on: true,
                graduation_applied: true,
            });
        }

        state.cohorts[idx].graduation_applied = true;
    }

    state.cohorts.extend(spawned);
    Ok(exit_proceeds)
}

fn exit_cohorts(
    state: &mut CohortState,
    config: &FundConfiguration,
    quarter: Quarter,
    rng: &mut dyn RandomSource,
) -> EngineResult<Money> {
    let final_quarter = quarter == config.fund_life_quarters;
    let mut total = Decimal::ZERO;

    for cohort in state.cohorts.iter_mut() {
        if cohort.active_companies == 0 {
            continue;
        }
        let count = if final_quarter {
            cohort.active_companies
        } else {
            let min_age = config
                .stage(&cohort.exit_profile)
                .map(|s| s.min_exit_age_quarters)
                .unwrap_or(DEFAULT_MIN_EXIT_AGE);
            if cohort.age_quarters < min_age {
                continue;
            }
            let rate = exit_rate(cohort.age_quarters, min_age);
            floor_count(Decimal::from(cohort.active_companies) * rate).min(cohort.active_companies)
        };
        if count == 0 {
            continue;
        }

        let distribution = config.exit_distribution(&cohort.exit_profile)?;
        let (counts, proceeds) = realize(count, cohort.value_basis, distribution, rng);
        cohort.active_companies -= count;
        cohort.exits.merge(&counts);
        cohort.realized_value += proceeds;
        total += proceeds;
    }

    state.exit_proceeds[quarter as usize] += total;
    Ok(total)
}

/// Return part of this quarter's proceeds to the stages' undeployed capital,
/// pro rata by allocation, while the investment period is open.
fn recycle(state: &mut CohortState, config: &FundConfiguration, quarter: Quarter, proceeds: Money) {
    let Some(policy) = &config.simulation.recycling else {
        return;
    };
    if quarter > config.investment_period_quarters || proceeds <= Decimal::ZERO {
        return;
    }
    let headroom = config.fund_size * policy.cap_pct - state.recycled;
    let amount = (proceeds * policy.rate).min(headroom);
    if amount <= Decimal::ZERO {
        return;
    }
    let total_allocation: Rate = config.stage_strategies.iter().map(|s| s.allocation_pct).sum();
    if total_allocation <= Decimal::ZERO {
        return;
    }
    for (idx, strategy) in config.stage_strategies.iter().enumerate() {
        state.undeployed[idx] += amount * strategy.allocation_pct / total_allocation;
    }
    state.recycled += amount;
}

/// Exit rate for a cohort of the given age.
pub(crate) fn exit_rate(age: u32, min_age: u32) -> Rate {
    let over = Decimal::from(age.saturating_sub(min_age));
    let ramp = (Decimal::ONE + over / EXIT_RAMP_QUARTERS).min(MAX_EXIT_RAMP);
    BASE_EXIT_RATE * ramp
}

/// Split `n` exits by flooring each bucket's share; the remainder lands in
/// the low bucket.
pub(crate) fn split_exits(n: u32, distribution: &ExitDistribution) -> ExitCounts {
    let mut counts = ExitCounts::default();
    let mut assigned = 0u32;
    for bucket in ExitBucket::ALL {
        let share = floor_count(Decimal::from(n) * distribution.probability(bucket)).min(n - assigned);
        counts.add(bucket, share);
        assigned += share;
    }
    counts.add(ExitBucket::Low, n - assigned);
    counts
}

/// Realize `n` exits: one multiple draw per non-empty, non-failure bucket.
fn realize(
    n: u32,
    value_basis: Money,
    distribution: &ExitDistribution,
    rng: &mut dyn RandomSource,
) -> (ExitCounts, Money) {
    let counts = split_exits(n, distribution);
    let mut proceeds = Decimal::ZERO;
    for bucket in ExitBucket::ALL {
        let count = counts.get(bucket);
        if count == 0 || bucket == ExitBucket::Failure {
            continue;
        }
        let (low, high) = bucket.multiple_range();
        let multiple = uniform(rng, low, high);
        proceeds += Decimal::from(count) * value_basis * multiple;
    }
    (counts, proceeds)
}

fn floor_count(value: Decimal) -> u32 {
    if value <= Decimal::ZERO {
        return 0;
    }
    value.floor().to_u32().unwrap_or(u32::MAX)
}
