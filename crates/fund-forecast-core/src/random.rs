//! Injectable random sources.
//!
//! Every stochastic step in the engine draws from a `&mut dyn RandomSource`
//! handed down the call chain. Two implementations ship with the crate: a
//! 32-bit linear congruential generator that is trivially reproducible
//! across platforms, and a wrapper over `rand`'s `StdRng` that can be seeded
//! or drawn from system entropy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// A source of uniform draws in `[0, 1)`.
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;
}

/// Numerical Recipes LCG (`a = 1664525`, `c = 1013904223`, `m = 2^32`).
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }
}

impl RandomSource for Lcg {
    fn next_f64(&mut self) -> f64 {
        self.state = self
            .state
            .wrapping_mul(1_664_525)
            .wrapping_add(1_013_904_223);
        f64::from(self.state) / 4_294_967_296.0
    }
}

/// `StdRng`-backed source; the default for forecasts.
#[derive(Debug, Clone)]
pub struct SeededRng {
    rng: StdRng,
}

impl SeededRng {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl RandomSource for SeededRng {
    fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// A draw converted to `Decimal` for comparison against configured rates.
pub(crate) fn draw(rng: &mut dyn RandomSource) -> Decimal {
    Decimal::from_f64(rng.next_f64()).unwrap_or(Decimal::ZERO)
}

/// Uniform `Decimal` in `[low, high)`.
pub(crate) fn uniform(rng: &mut dyn RandomSource, low: Decimal, high: Decimal) -> Decimal {
    low + (high - low) * draw(rng)
}

/// Uniform integer in `[low, high]` (inclusive).
pub(crate) fn uniform_int(rng: &mut dyn RandomSource, low: i64, high: i64) -> i64 {
    if high <= low {
        return low;
    }
    let span = (high - low + 1) as f64;
    let offset = (rng.next_f64() * span).floor() as i64;
    low + offset.min(high - low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_lcg_is_reproducible() {
        let mut a = Lcg::new(7);
        let mut b = Lcg::new(7);
        for _ in 0..100 {
            assert_eq!(a.next_f64(), b.next_f64());
        }
    }

    #[test]
    fn test_draws_in_unit_interval() {
        let mut lcg = Lcg::new(1);
        let mut std = SeededRng::seeded(1);
        for _ in 0..1_000 {
            let x = lcg.next_f64();
            let y = std.next_f64();
            assert!((0.0..1.0).contains(&x));
            assert!((0.0..1.0).contains(&y));
        }
    }

    #[test]
    fn test_uniform_int_bounds() {
        let mut rng = SeededRng::seeded(3);
        for _ in 0..1_000 {
            let v = uniform_int(&mut rng, 4, 8);
            assert!((4..=8).contains(&v));
        }
        assert_eq!(uniform_int(&mut rng, 5, 5), 5);
    }

    #[test]
    fn test_uniform_decimal_range() {
        let mut rng = SeededRng::seeded(11);
        for _ in 0..500 {
            let v = uniform(&mut rng, dec!(1), dec!(3));
            assert!(v >= dec!(1) && v < dec!(3));
        }
    }
}
