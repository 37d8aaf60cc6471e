use std::collections::BTreeSet;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::{FundConfiguration, FundEconomics};

const ALLOCATION_TOLERANCE: Decimal = dec!(0.01);
const EXIT_DISTRIBUTION_TOLERANCE: Decimal = dec!(0.01);
const MAX_FEE_RATE: Decimal = dec!(0.10);
const MAX_CARRY: Decimal = dec!(0.50);
const MIN_RESERVE_RATIO: Decimal = dec!(0.10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Machine-readable issue codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    InvalidFundSize,
    EmptyStageStrategies,
    InvalidAllocationSum,
    InvalidAllocation,
    InvalidCheckSize,
    InvalidFundLife,
    InvalidInvestmentPeriod,
    InvalidGpCommitment,
    MissingStageData,
    InvalidGraduationProbabilities,
    InvalidExitDistribution,
    FeeRateOutOfRange,
    CarryOutOfRange,
    LowReserveRatio,
    DuplicateStage,
    NegativeHurdle,
}

/// A single field-scoped finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Path of the offending field, e.g. `stage_strategies[1].avg_check_size`
    pub field: String,
    pub message: String,
    pub code: ValidationCode,
    pub severity: Severity,
}

impl ValidationIssue {
    fn error(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
            severity: Severity::Error,
        }
    }

    fn warning(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
            severity: Severity::Warning,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// True when any issue blocks the forecast.
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(ValidationIssue::is_error)
}

/// Check a configuration for structural and numeric consistency.
///
/// Issues are returned as data; nothing here fails. Error-severity issues
/// block a forecast, warnings are advisory.
pub fn validate_configuration(config: &FundConfiguration) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if config.fund_size <= Decimal::ZERO {
        issues.push(ValidationIssue::error(
            "fund_size",
            ValidationCode::InvalidFundSize,
            "Fund size must be positive",
        ));
    }
    if config.fund_life_quarters == 0 {
        issues.push(ValidationIssue::error(
            "fund_life_quarters",
            ValidationCode::InvalidFundLife,
            "Fund life must be at least one quarter",
        ));
    }
    if config.investment_period_quarters == 0
        || config.investment_period_quarters > config.fund_life_quarters
    {
        issues.push(ValidationIssue::error(
            "investment_period_quarters",
            ValidationCode::InvalidInvestmentPeriod,
            format!(
                "Investment period must be 1..={} quarters",
                config.fund_life_quarters
            ),
        ));
    }
    if config.gp_commitment_pct < Decimal::ZERO || config.gp_commitment_pct > Decimal::ONE {
        issues.push(ValidationIssue::error(
            "gp_commitment_pct",
            ValidationCode::InvalidGpCommitment,
            "GP commitment must be between 0 and 1",
        ));
    }

    if config.management_fee_rate < Decimal::ZERO || config.management_fee_rate > MAX_FEE_RATE {
        issues.push(ValidationIssue::warning(
            "management_fee_rate",
            ValidationCode::FeeRateOutOfRange,
            format!(
                "Management fee of {} is outside the usual 0%-10% range",
                config.management_fee_rate
            ),
        ));
    }
    if config.carry_pct < Decimal::ZERO || config.carry_pct > MAX_CARRY {
        issues.push(ValidationIssue::warning(
            "carry_pct",
            ValidationCode::CarryOutOfRange,
            format!("Carry of {} is outside the usual 0%-50% range", config.carry_pct),
        ));
    }
    if config.hurdle_rate < Decimal::ZERO {
        issues.push(ValidationIssue::warning(
            "hurdle_rate",
            ValidationCode::NegativeHurdle,
            "Negative hurdle rate reduces LP preferred return below zero",
        ));
    }

    validate_stages(config, &mut issues);

    issues
}

fn validate_stages(config: &FundConfiguration, issues: &mut Vec<ValidationIssue>) {
    if config.stage_strategies.is_empty() {
        issues.push(ValidationIssue::error(
            "stage_strategies",
            ValidationCode::EmptyStageStrategies,
            "At least one stage strategy is required",
        ));
        return;
    }

    let mut seen = BTreeSet::new();
    let mut allocation_sum = Decimal::ZERO;
    let mut stage_inputs_ok = true;

    for (i, strategy) in config.stage_strategies.iter().enumerate() {
        let path = format!("stage_strategies[{i}]");
        allocation_sum += strategy.allocation_pct;

        if !seen.insert(strategy.stage.as_str()) {
            issues.push(ValidationIssue::warning(
                format!("{path}.stage"),
                ValidationCode::DuplicateStage,
                format!("Stage '{}' appears more than once", strategy.stage),
            ));
        }
        if strategy.avg_check_size <= Decimal::ZERO {
            stage_inputs_ok = false;
            issues.push(ValidationIssue::error(
                format!("{path}.avg_check_size"),
                ValidationCode::InvalidCheckSize,
                format!("Check size for '{}' must be positive", strategy.stage),
            ));
        }
        if strategy.allocation_pct < Decimal::ZERO || strategy.allocation_pct > Decimal::ONE {
            stage_inputs_ok = false;
            issues.push(ValidationIssue::error(
                format!("{path}.allocation_pct"),
                ValidationCode::InvalidAllocation,
                format!("Allocation for '{}' must be between 0 and 1", strategy.stage),
            ));
        }

        if !config.graduation_matrix.contains_key(&strategy.stage) {
            issues.push(ValidationIssue::error(
                format!("graduation_matrix.{}", strategy.stage),
                ValidationCode::MissingStageData,
                format!("Stage '{}' has no graduation matrix row", strategy.stage),
            ));
        }
        match config.exit_probabilities.get(&strategy.stage) {
            None => issues.push(ValidationIssue::error(
                format!("exit_probabilities.{}", strategy.stage),
                ValidationCode::MissingStageData,
                format!("Stage '{}' has no exit probability row", strategy.stage),
            )),
            Some(dist) => {
                let total = dist.total();
                let bucket_out_of_range = crate::config::ExitBucket::ALL.iter().any(|b| {
                    let p = dist.probability(*b);
                    p < Decimal::ZERO || p > Decimal::ONE
                });
                if bucket_out_of_range || (total - Decimal::ONE).abs() > EXIT_DISTRIBUTION_TOLERANCE {
                    issues.push(ValidationIssue::error(
                        format!("exit_probabilities.{}", strategy.stage),
                        ValidationCode::InvalidExitDistribution,
                        format!(
                            "Exit probabilities for '{}' must each be in [0, 1] and sum to 1 (got {total})",
                            strategy.stage
                        ),
                    ));
                }
            }
        }
    }

    if (allocation_sum - Decimal::ONE).abs() > ALLOCATION_TOLERANCE {
        issues.push(ValidationIssue::error(
            "stage_strategies",
            ValidationCode::InvalidAllocationSum,
            format!("Stage allocations must sum to 100% (got {allocation_sum})"),
        ));
    }

    for (stage, row) in &config.graduation_matrix {
        let outgoing: Decimal = row.values().copied().sum();
        if outgoing > Decimal::ONE || row.values().any(|p| *p < Decimal::ZERO) {
            issues.push(ValidationIssue::error(
                format!("graduation_matrix.{stage}"),
                ValidationCode::InvalidGraduationProbabilities,
                format!("Outgoing graduation probabilities for '{stage}' must be non-negative and total at most 1 (got {outgoing})"),
            ));
        }
    }

    if stage_inputs_ok && config.fund_size > Decimal::ZERO {
        let economics = FundEconomics::derive(config);
        if economics.investable_capital > Decimal::ZERO {
            let reserve = economics.initial_reserve(&config.stage_strategies);
            let reserve_ratio = reserve / economics.investable_capital;
            if reserve_ratio < MIN_RESERVE_RATIO {
                issues.push(ValidationIssue::warning(
                    "stage_strategies",
                    ValidationCode::LowReserveRatio,
                    format!(
                        "Only {:.1}% of investable capital remains for reserves after first checks",
                        reserve_ratio * dec!(100)
                    ),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageStrategy;

    fn codes(issues: &[ValidationIssue]) -> Vec<ValidationCode> {
        issues.iter().map(|i| i.code).collect()
    }

    #[test]
    fn test_default_config_has_no_errors() {
        let issues = validate_configuration(&FundConfiguration::default());
        assert!(!has_errors(&issues), "unexpected errors: {issues:?}");
    }

    #[test]
    fn test_zero_fund_size() {
        let mut config = FundConfiguration::default();
        config.fund_size = Decimal::ZERO;
        let issues = validate_configuration(&config);
        let issue = issues
            .iter()
            .find(|i| i.code == ValidationCode::InvalidFundSize)
            .expect("fund size issue");
        assert_eq!(issue.severity, Severity::Error);
        assert_eq!(issue.field, "fund_size");
    }

    #[test]
    fn test_allocation_sum_tolerance() {
        let mut config = FundConfiguration::default();
        // 0.43 + 0.43 + 0.145 = 1.005 is inside the 1% band
        config.stage_strategies[2].allocation_pct = dec!(0.145);
        assert!(!codes(&validate_configuration(&config)).contains(&ValidationCode::InvalidAllocationSum));

        config.stage_strategies[2].allocation_pct = dec!(0.20);
        assert!(codes(&validate_configuration(&config)).contains(&ValidationCode::InvalidAllocationSum));
    }

    #[test]
    fn test_empty_strategies() {
        let mut config = FundConfiguration::default();
        config.stage_strategies.clear();
        let issues = validate_configuration(&config);
        assert_eq!(codes(&issues), vec![ValidationCode::EmptyStageStrategies]);
    }

    #[test]
    fn test_bad_check_size_and_allocation() {
        let mut config = FundConfiguration::default();
        config.stage_strategies[0].avg_check_size = Decimal::ZERO;
        config.stage_strategies[1].allocation_pct = dec!(1.2);
        let issues = validate_configuration(&config);
        let c = codes(&issues);
        assert!(c.contains(&ValidationCode::InvalidCheckSize));
        assert!(c.contains(&ValidationCode::InvalidAllocation));
        let check = issues
            .iter()
            .find(|i| i.code == ValidationCode::InvalidCheckSize)
            .unwrap();
        assert_eq!(check.field, "stage_strategies[0].avg_check_size");
    }

    #[test]
    fn test_fee_and_carry_are_warnings() {
        let mut config = FundConfiguration::default();
        config.management_fee_rate = dec!(0.12);
        config.carry_pct = dec!(0.60);
        let issues = validate_configuration(&config);
        assert!(!has_errors(&issues));
        let c = codes(&issues);
        assert!(c.contains(&ValidationCode::FeeRateOutOfRange));
        assert!(c.contains(&ValidationCode::CarryOutOfRange));
    }

    #[test]
    fn test_default_config_only_warns_about_reserves() {
        let issues = validate_configuration(&FundConfiguration::default());
        assert!(!has_errors(&issues));
        assert_eq!(codes(&issues), vec![ValidationCode::LowReserveRatio]);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_negative_carry_and_hurdle_are_warnings() {
        let mut config = FundConfiguration::default();
        config.carry_pct = dec!(-0.05);
        config.hurdle_rate = dec!(-0.01);
        let issues = validate_configuration(&config);
        assert!(!has_errors(&issues));
        let c = codes(&issues);
        assert!(c.contains(&ValidationCode::CarryOutOfRange));
        assert!(c.contains(&ValidationCode::NegativeHurdle));
    }

    #[test]
    fn test_low_reserve_warning() {
        let mut config = FundConfiguration::default();
        // Checks that divide stage capital exactly leave nothing in reserve
        config.stage_strategies = vec![StageStrategy::new("Seed", Decimal::ONE, dec!(160_000))];
        let issues = validate_configuration(&config);
        assert!(codes(&issues).contains(&ValidationCode::LowReserveRatio));
        assert!(!has_errors(&issues));
    }

    #[test]
    fn test_missing_matrix_rows() {
        let mut config = FundConfiguration::default();
        config.graduation_matrix.remove("Seed");
        config.exit_probabilities.remove("Series A");
        let issues = validate_configuration(&config);
        let missing: Vec<&str> = issues
            .iter()
            .filter(|i| i.code == ValidationCode::MissingStageData)
            .map(|i| i.field.as_str())
            .collect();
        assert_eq!(missing, vec!["graduation_matrix.Seed", "exit_probabilities.Series A"]);
    }

    #[test]
    fn test_graduation_row_over_one() {
        let mut config = FundConfiguration::default();
        config
            .graduation_matrix
            .get_mut("Seed")
            .unwrap()
            .insert("Series A".into(), dec!(0.98));
        assert!(codes(&validate_configuration(&config))
            .contains(&ValidationCode::InvalidGraduationProbabilities));
    }

    #[test]
    fn test_exit_distribution_must_sum_to_one() {
        let mut config = FundConfiguration::default();
        config.exit_probabilities.get_mut("Seed").unwrap().mega = dec!(0.2);
        assert!(codes(&validate_configuration(&config))
            .contains(&ValidationCode::InvalidExitDistribution));
    }

    #[test]
    fn test_code_serialization() {
        let json = serde_json::to_string(&ValidationCode::InvalidAllocationSum).unwrap();
        assert_eq!(json, "\"INVALID_ALLOCATION_SUM\"");
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
