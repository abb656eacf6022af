//! Wald test on a single GLM coefficient.

use crate::testing::TestResult;
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::LN_2;

/// Two-sided Wald test of `coefficient == 0`.
///
/// The coefficient is on the natural-log scale; the returned effect size and
/// standard error are on the log2 scale. Returns `None` when the standard
/// error is not a positive finite number.
pub fn wald_test(coefficient: f64, standard_error: f64) -> Option<TestResult> {
    if !coefficient.is_finite() || !standard_error.is_finite() || standard_error <= 0.0 {
        return None;
    }

    let statistic = coefficient / standard_error;
    let normal = Normal::new(0.0, 1.0).ok()?;
    let p_value = (2.0 * normal.cdf(-statistic.abs())).min(1.0);

    Some(
        TestResult::with_effect_size(statistic, p_value, coefficient / LN_2)
            .with_standard_error(standard_error / LN_2),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wald_test_known_values() {
        let result = wald_test(1.96 * 0.5, 0.5).unwrap();
        assert_relative_eq!(result.statistic, 1.96, epsilon = 1e-12);
        assert_relative_eq!(result.p_value, 0.04999579, epsilon = 1e-6);
        assert_relative_eq!(result.effect_size.unwrap(), 0.98 / LN_2, epsilon = 1e-12);
        assert_relative_eq!(result.standard_error.unwrap(), 0.5 / LN_2, epsilon = 1e-12);
    }

    #[test]
    fn test_wald_test_is_symmetric() {
        let up = wald_test(0.7, 0.3).unwrap();
        let down = wald_test(-0.7, 0.3).unwrap();
        assert_relative_eq!(up.p_value, down.p_value, epsilon = 1e-15);
        assert_relative_eq!(up.statistic, -down.statistic, epsilon = 1e-15);
    }

    #[test]
    fn test_wald_test_zero_coefficient() {
        let result = wald_test(0.0, 0.2).unwrap();
        assert_relative_eq!(result.p_value, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_wald_test_rejects_degenerate_errors() {
        assert!(wald_test(1.0, 0.0).is_none());
        assert!(wald_test(1.0, f64::NAN).is_none());
        assert!(wald_test(f64::INFINITY, 1.0).is_none());
    }
}
