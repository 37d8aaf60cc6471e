use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{FundConfiguration, FundEconomics, QUARTERS_PER_YEAR};
use crate::time_value::{annualize_quarterly, compute_irr};
use crate::types::{ratio, Money, Multiple, Quarter, Rate};

/// One quarter of the fund's cash-flow history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowPoint {
    pub quarter: Quarter,
    pub year: u32,
    /// "Y{year} Q{n}"; quarter 0 (first close) is "Y0 Q0"
    pub label: String,
    /// Quarter-end date, when the fund has a vintage date
    pub date: Option<NaiveDate>,
    pub contribution: Money,
    pub deployment: Money,
    pub distribution: Money,
    pub management_fee: Money,
    pub cumulative_contributions: Money,
    pub cumulative_distributions: Money,
    pub cumulative_fees: Money,
    pub nav: Money,
    pub dpi: Multiple,
    pub rvpi: Multiple,
    /// Always `dpi + rvpi`
    pub tvpi: Multiple,
    pub moic: Multiple,
    pub net_moic: Multiple,
    /// Annualized IRR on flows to date with NAV as a terminal inflow
    pub gross_irr: Rate,
    /// As `gross_irr` with each quarter's management fee subtracted
    pub net_irr: Rate,
}

/// Build the quarterly timeline, quarters `0..=fund_life_quarters`.
///
/// Single capital call: the full fund size is contributed at quarter 0.
/// Deployment is spread evenly over the investment period and exit value is
/// distributed evenly from `distribution_start_quarter` to the end of the
/// fund. Fees follow the fee schedule when one is configured, otherwise
/// `total_management_fees` is charged evenly over the fund life.
pub fn build_timeline(
    config: &FundConfiguration,
    total_invested: Money,
    total_exit_value: Money,
    total_management_fees: Money,
) -> Vec<CashFlowPoint> {
    let life = config.fund_life_quarters;
    let fees = quarterly_fees(config, total_management_fees);

    let period = config.investment_period_quarters.min(life);
    let deployment_per_quarter = if period == 0 {
        Decimal::ZERO
    } else {
        total_invested / Decimal::from(period)
    };

    let distribution_start = config.distribution_start_quarter.min(life);
    let distribution_per_quarter = total_exit_value / Decimal::from(life - distribution_start + 1);

    let mut points = Vec::with_capacity(life as usize + 1);
    let mut gross_flows: Vec<Money> = Vec::with_capacity(life as usize + 1);
    let mut net_flows: Vec<Money> = Vec::with_capacity(life as usize + 1);

    let mut cumulative_contributions = Decimal::ZERO;
    let mut cumulative_distributions = Decimal::ZERO;
    let mut cumulative_fees = Decimal::ZERO;

    for quarter in 0..=life {
        let contribution = if quarter == 0 { config.fund_size } else { Decimal::ZERO };
        let deployment = if (1..=period).contains(&quarter) {
            deployment_per_quarter
        } else {
            Decimal::ZERO
        };
        let distribution = if quarter >= distribution_start {
            distribution_per_quarter
        } else {
            Decimal::ZERO
        };
        let management_fee = fees[quarter as usize];

        cumulative_contributions += contribution;
        cumulative_distributions += distribution;
        cumulative_fees += management_fee;

        let nav = (total_exit_value - cumulative_distributions).max(Decimal::ZERO);
        let dpi = ratio(cumulative_distributions, cumulative_contributions);
        let rvpi = ratio(nav, cumulative_contributions);

        gross_flows.push(distribution - contribution);
        net_flows.push(distribution - contribution - management_fee);

        let gross_irr = irr_to_date(&gross_flows, nav);
        let net_irr = irr_to_date(&net_flows, nav);

        let (year, label) = period_label(quarter);
        points.push(CashFlowPoint {
            quarter,
            year,
            label,
            date: config.vintage_date.and_then(|d| quarter_end(d, quarter)),
            contribution,
            deployment,
            distribution,
            management_fee,
            cumulative_contributions,
            cumulative_distributions,
            cumulative_fees,
            nav,
            dpi,
            rvpi,
            tvpi: dpi + rvpi,
            moic: ratio(cumulative_distributions + nav, total_invested),
            net_moic: ratio(
                cumulative_distributions + nav - cumulative_fees,
                cumulative_contributions,
            ),
            gross_irr,
            net_irr,
        });
    }

    points
}

fn quarterly_fees(config: &FundConfiguration, total_management_fees: Money) -> Vec<Money> {
    if config.fee_schedule.is_some() {
        return FundEconomics::derive(config).quarterly_fees;
    }
    let life = config.fund_life_quarters;
    let per_quarter = if life == 0 {
        Decimal::ZERO
    } else {
        total_management_fees / Decimal::from(life)
    };
    (0..=life)
        .map(|q| if q == 0 { Decimal::ZERO } else { per_quarter })
        .collect()
}

fn irr_to_date(flows: &[Money], nav: Money) -> Rate {
    let mut with_terminal = flows.to_vec();
    if let Some(last) = with_terminal.last_mut() {
        *last += nav;
    }
    annualize_quarterly(compute_irr(&with_terminal))
}

fn period_label(quarter: Quarter) -> (u32, String) {
    if quarter == 0 {
        return (0, "Y0 Q0".to_string());
    }
    let year = (quarter - 1) / QUARTERS_PER_YEAR + 1;
    let q = (quarter - 1) % QUARTERS_PER_YEAR + 1;
    (year, format!("Y{year} Q{q}"))
}

/// Last day of the calendar quarter `quarter` quarters after `vintage`.
fn quarter_end(vintage: NaiveDate, quarter: Quarter) -> Option<NaiveDate> {
    let shifted = vintage.checked_add_months(Months::new(quarter * 3))?;
    let end_month = shifted.month0() / 3 * 3 + 3;
    if end_month == 12 {
        NaiveDate::from_ymd_opt(shifted.year(), 12, 31)
    } else {
        NaiveDate::from_ymd_opt(shifted.year(), end_month + 1, 1)?.pred_opt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeeSchedule, FeeStep};
    use rust_decimal_macros::dec;

    fn default_timeline(exit: Money) -> (FundConfiguration, Vec<CashFlowPoint>) {
        let config = FundConfiguration::default();
        let timeline = build_timeline(&config, dec!(16_000_000), exit, dec!(4_000_000));
        (config, timeline)
    }

    #[test]
    fn test_shape_and_contributions() {
        let (config, timeline) = default_timeline(dec!(48_000_000));
        assert_eq!(timeline.len(), config.fund_life_quarters as usize + 1);
        assert_eq!(timeline[0].contribution, dec!(20_000_000));
        assert!(timeline[1..].iter().all(|p| p.contribution.is_zero()));
        assert!(timeline
            .windows(2)
            .all(|w| w[1].cumulative_contributions >= w[0].cumulative_contributions
                && w[1].cumulative_distributions >= w[0].cumulative_distributions));
    }

    #[test]
    fn test_even_deployment_and_distribution() {
        let (_, timeline) = default_timeline(dec!(29_000_000));
        let deployed: Money = timeline.iter().map(|p| p.deployment).sum();
        assert!((deployed - dec!(16_000_000)).abs() < dec!(0.000001));
        assert!(timeline[12].deployment > Decimal::ZERO);
        assert!(timeline[13].deployment.is_zero());

        assert!(timeline[11].distribution.is_zero());
        // 29M over quarters 12..=40
        assert_eq!(timeline[12].distribution, dec!(1_000_000));
        let last = timeline.last().unwrap();
        assert_eq!(last.cumulative_distributions, dec!(29_000_000));
        assert_eq!(last.nav, Decimal::ZERO);
    }

    #[test]
    fn test_tvpi_is_sum_of_dpi_and_rvpi() {
        let (_, timeline) = default_timeline(dec!(37_500_000));
        for p in &timeline {
            assert_eq!(p.tvpi, p.dpi + p.rvpi);
        }
    }

    #[test]
    fn test_fees_and_net_metrics() {
        let (_, timeline) = default_timeline(dec!(48_000_000));
        assert!(timeline[0].management_fee.is_zero());
        assert_eq!(timeline[1].management_fee, dec!(100_000));
        let last = timeline.last().unwrap();
        assert_eq!(last.cumulative_fees, dec!(4_000_000));
        // (48M - 4M) / 20M
        assert_eq!(last.net_moic, dec!(2.2));
        assert_eq!(last.moic, dec!(3));
        assert!(last.gross_irr > last.net_irr);
        assert!(last.net_irr > Decimal::ZERO);
    }

    #[test]
    fn test_fee_schedule_overrides_flat_fee() {
        let mut config = FundConfiguration::default();
        config.fee_schedule = Some(FeeSchedule {
            steps: vec![FeeStep {
                from_quarter: 21,
                rate: dec!(0.01),
            }],
            annual_expenses: Decimal::ZERO,
        });
        let timeline = build_timeline(&config, dec!(16_000_000), dec!(40_000_000), dec!(4_000_000));
        assert_eq!(timeline[20].management_fee, dec!(100_000));
        assert_eq!(timeline[21].management_fee, dec!(50_000));
    }

    #[test]
    fn test_zero_exit_value() {
        let (_, timeline) = default_timeline(Decimal::ZERO);
        let last = timeline.last().unwrap();
        assert_eq!(last.tvpi, Decimal::ZERO);
        assert_eq!(last.moic, Decimal::ZERO);
        // No inflows at all: IRR sentinel
        assert_eq!(last.gross_irr, Decimal::ZERO);
    }

    #[test]
    fn test_labels_and_dates() {
        let mut config = FundConfiguration::default();
        config.vintage_date = NaiveDate::from_ymd_opt(2024, 2, 15);
        let timeline = build_timeline(&config, dec!(1), dec!(2), dec!(0));
        assert_eq!(timeline[0].label, "Y0 Q0");
        assert_eq!(timeline[1].label, "Y1 Q1");
        assert_eq!(timeline[4].label, "Y1 Q4");
        assert_eq!(timeline[5].label, "Y2 Q1");
        assert_eq!(timeline[0].date, NaiveDate::from_ymd_opt(2024, 3, 31));
        assert_eq!(timeline[1].date, NaiveDate::from_ymd_opt(2024, 6, 30));
        assert_eq!(timeline[3].date, NaiveDate::from_ymd_opt(2024, 12, 31));
        assert!(default_timeline(dec!(1)).1[0].date.is_none());
    }
}
