use fund_forecast_core::time_value::{annualize_quarterly, npv};
use fund_forecast_core::{compute_irr, compute_waterfall};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn compounded(rate: Decimal, periods: usize) -> Decimal {
    let mut value = dec!(1000);
    for _ in 0..periods {
        value *= Decimal::ONE + rate;
    }
    value
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A single outflow grown at r for n quarters has IRR r.
    #[test]
    fn irr_recovers_growth_rate(pct in -50i64..=200, periods in 1usize..=40) {
        let rate = Decimal::new(pct, 2);
        let mut flows = vec![Decimal::ZERO; periods + 1];
        flows[0] = dec!(-1000);
        flows[periods] = compounded(rate, periods);

        let irr = compute_irr(&flows);
        prop_assert!(
            (irr - rate).abs() < dec!(0.0001),
            "rate {} over {} periods solved as {}", rate, periods, irr
        );
    }

    /// Discounting at the solved IRR leaves (almost) nothing.
    #[test]
    fn npv_vanishes_at_irr(outflow in 100i64..10_000, inflows in prop::collection::vec(0i64..5_000, 2..12)) {
        let mut flows = vec![Decimal::from(-outflow)];
        flows.extend(inflows.iter().map(|v| Decimal::from(*v)));
        prop_assume!(flows.iter().any(|cf| *cf > Decimal::ZERO));

        let irr = compute_irr(&flows);
        prop_assume!(!irr.is_zero() && irr > dec!(-0.5) && irr < dec!(10));
        let residual = npv(irr, &flows).unwrap();
        prop_assert!(residual.abs() < dec!(0.01), "npv at {} is {}", irr, residual);
    }

    #[test]
    fn waterfall_conserves_exit_value(
        invested in 0i64..1_000_000_000,
        exit in 0i64..10_000_000_000,
        carry_bps in -1_000i64..=5_000,
        hurdle_bps in -500i64..=2_000,
    ) {
        let summary = compute_waterfall(
            Decimal::from(invested),
            Decimal::from(exit),
            Decimal::new(carry_bps, 4),
            Decimal::new(hurdle_bps, 4),
        ).unwrap();

        let distributed = summary.final_lp_proceeds + summary.final_gp_proceeds;
        prop_assert!((distributed - Decimal::from(exit)).abs() < dec!(0.000001));
        prop_assert!(summary.gp_carry >= Decimal::ZERO);
        prop_assert!(summary.final_lp_proceeds >= Decimal::ZERO);
        if exit <= invested {
            prop_assert_eq!(summary.gp_carry, Decimal::ZERO);
        }
    }

    #[test]
    fn annualized_rate_keeps_sign(pct in -50i64..=50) {
        let quarterly = Decimal::new(pct, 2);
        let annual = annualize_quarterly(quarterly);
        prop_assert_eq!(annual.is_sign_negative() && !annual.is_zero(), pct < 0);
        if pct > 0 {
            prop_assert!(annual > quarterly * dec!(4));
        }
    }
}
