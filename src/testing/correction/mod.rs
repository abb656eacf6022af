use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Multiple testing correction methods to control for false positives
/// when performing many statistical tests simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    #[default]
    BenjaminiHochberg,
    BenjaminiYekutieli,
    HolmBonferroni,
    Bonferroni,
}

impl CorrectionMethod {
    pub fn adjust(&self, p_values: &[f64]) -> Result<Vec<f64>> {
        match self {
            CorrectionMethod::BenjaminiHochberg => benjamini_hochberg_correction(p_values),
            CorrectionMethod::BenjaminiYekutieli => benjamini_yekutieli_correction(p_values),
            CorrectionMethod::HolmBonferroni => holm_bonferroni_correction(p_values),
            CorrectionMethod::Bonferroni => bonferroni_correction(p_values),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CorrectionMethod::BenjaminiHochberg => "benjamini_hochberg",
            CorrectionMethod::BenjaminiYekutieli => "benjamini_yekutieli",
            CorrectionMethod::HolmBonferroni => "holm_bonferroni",
            CorrectionMethod::Bonferroni => "bonferroni",
        }
    }
}

/// Adjust the p-values that are present, leaving untested genes as `None`.
///
/// The family size is the number of tested genes. A family with no tested
/// gene at all yields all `None`.
pub fn adjust_with_missing(
    p_values: &[Option<f64>],
    method: CorrectionMethod,
) -> Result<Vec<Option<f64>>> {
    let (positions, present): (Vec<usize>, Vec<f64>) = p_values
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.map(|p| (i, p)))
        .unzip();

    let mut adjusted = vec![None; p_values.len()];
    if present.is_empty() {
        return Ok(adjusted);
    }

    for (position, value) in positions.into_iter().zip(method.adjust(&present)?) {
        adjusted[position] = Some(value);
    }
    Ok(adjusted)
}

fn validate(p_values: &[f64]) -> Result<()> {
    if p_values.is_empty() {
        return Err(anyhow!("Empty p-value array"));
    }

    for (i, &p) in p_values.iter().enumerate() {
        if !(0.0..=1.0).contains(&p) {
            return Err(anyhow!("Invalid p-value at index {}: {}", i, p));
        }
    }
    Ok(())
}

fn sorted_ascending(p_values: &[f64]) -> Vec<(usize, f64)> {
    let mut indexed_p_values: Vec<(usize, f64)> =
        p_values.iter().enumerate().map(|(i, &p)| (i, p)).collect();
    indexed_p_values.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    indexed_p_values
}

/// Apply Bonferroni correction to p-values
///
/// Bonferroni correction is a simple but conservative method that multiplies
/// each p-value by the number of tests.
///
/// # Example
/// ```
/// use ip_enrichment::testing::correction::bonferroni_correction;
/// let p_values = vec![0.01, 0.03, 0.05];
/// let adjusted = bonferroni_correction(&p_values).unwrap();
/// assert!((adjusted[0] - 0.03).abs() < 1e-12);
/// ```
pub fn bonferroni_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len();

    // Multiply each p-value by n, capping at 1.0
    let adjusted = p_values.iter().map(|&p| (p * n as f64).min(1.0)).collect();

    Ok(adjusted)
}

/// Apply Benjamini-Hochberg (BH) procedure for controlling false discovery rate
///
/// The BH procedure controls the false discovery rate (FDR), which is the expected
/// proportion of false positives among all rejected null hypotheses.
///
/// # Example
/// ```
/// use ip_enrichment::testing::correction::benjamini_hochberg_correction;
/// let p_values = vec![0.01, 0.03, 0.05];
/// let adjusted = benjamini_hochberg_correction(&p_values).unwrap();
/// assert!((adjusted[2] - 0.05).abs() < 1e-12);
/// ```
pub fn benjamini_hochberg_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    step_up(p_values, 1.0)
}

/// Apply Benjamini-Yekutieli (BY) procedure for controlling false discovery rate under dependence
///
/// The BY procedure is a more conservative variant of the BH procedure that is valid
/// under arbitrary dependence structures among the tests.
pub fn benjamini_yekutieli_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    let c_n: f64 = (1..=p_values.len()).map(|i| 1.0 / i as f64).sum();
    step_up(p_values, c_n)
}

/// Shared BH/BY step-up: `min_{j >= i} (p_(j) * scale * n / j)`, capped at 1.
fn step_up(p_values: &[f64], scale: f64) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len();
    let indexed_p_values = sorted_ascending(p_values);

    let mut adjusted_p_values = vec![0.0; n];
    let mut current_min = 1.0;

    // Process from largest to smallest p-value
    for i in (0..n).rev() {
        let (orig_idx, p_val) = indexed_p_values[i];
        let rank = i + 1;

        let adjustment = (p_val * scale * n as f64 / rank as f64).min(1.0);
        current_min = adjustment.min(current_min);
        adjusted_p_values[orig_idx] = current_min;
    }

    Ok(adjusted_p_values)
}

/// Apply Holm-Bonferroni (step-down) method for controlling family-wise error rate
///
/// The Holm procedure is a step-down method that controls the family-wise error rate (FWER)
/// and is uniformly more powerful than the standard Bonferroni correction.
pub fn holm_bonferroni_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len();
    let indexed_p_values = sorted_ascending(p_values);

    let mut adjusted_p_values = vec![0.0; n];
    let mut running_max: f64 = 0.0;

    for (i, &(idx, p_val)) in indexed_p_values.iter().enumerate() {
        running_max = running_max.max((p_val * (n - i) as f64).min(1.0));
        adjusted_p_values[idx] = running_max;
    }

    Ok(adjusted_p_values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_vec_relative_eq(a: &[f64], b: &[f64], epsilon: f64) {
        assert_eq!(a.len(), b.len(), "Vectors have different lengths");
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            if (x - y).abs() > epsilon {
                panic!("Vectors differ at index {}: {} != {}", i, x, y);
            }
        }
    }

    #[test]
    fn test_bonferroni() {
        let p_values = vec![0.01, 0.02, 0.03, 0.1, 0.2];
        let expected = vec![0.05, 0.1, 0.15, 0.5, 1.0];
        let adjusted = bonferroni_correction(&p_values).unwrap();
        assert_vec_relative_eq(&adjusted, &expected, 1e-10);
    }

    use approx::assert_relative_eq;

    #[test]
    fn test_benjamini_hochberg_empty_input() {
        let result = benjamini_hochberg_correction(&[]);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().to_string(), "Empty p-value array");
    }

    #[test]
    fn test_benjamini_hochberg_invalid_pvalues() {
        let result = benjamini_hochberg_correction(&[0.01, -0.5, 0.03]);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid p-value at index 1")
        );

        let result = benjamini_hochberg_correction(&[0.01, 1.5, 0.03]);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid p-value at index 1")
        );
    }

    #[test]
    fn test_benjamini_hochberg_unordered_pvalues() {
        let p_values = vec![0.05, 0.01, 0.1, 0.04, 0.02];
        let expected = vec![0.0625, 0.05, 0.1, 0.0625, 0.05];
        let adjusted = benjamini_hochberg_correction(&p_values).unwrap();
        assert_vec_relative_eq(&adjusted, &expected, 1e-12);
    }

    #[test]
    fn test_benjamini_hochberg_real_example() {
        let pvalues = vec![0.1, 0.2, 0.3, 0.4, 0.1];
        let expected = [0.25, 0.3333333333333333, 0.375, 0.4, 0.25];
        let adjusted = benjamini_hochberg_correction(&pvalues).unwrap();

        for (a, e) in adjusted.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *e, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_benjamini_yekutieli_is_more_conservative() {
        let p_values = vec![0.001, 0.01, 0.02, 0.5];
        let bh = benjamini_hochberg_correction(&p_values).unwrap();
        let by = benjamini_yekutieli_correction(&p_values).unwrap();
        for (b, y) in bh.iter().zip(by.iter()) {
            assert!(y >= b);
        }
    }

    #[test]
    fn test_holm_bonferroni() {
        let p_values = vec![0.01, 0.02, 0.03];
        let expected = vec![0.03, 0.04, 0.04];
        let adjusted = holm_bonferroni_correction(&p_values).unwrap();
        assert_vec_relative_eq(&adjusted, &expected, 1e-10);
    }

    #[test]
    fn test_adjust_with_missing_skips_untested() {
        let p_values = vec![Some(0.01), None, Some(0.04), None, Some(0.5)];
        let adjusted = adjust_with_missing(&p_values, CorrectionMethod::BenjaminiHochberg).unwrap();

        assert_eq!(adjusted[1], None);
        assert_eq!(adjusted[3], None);
        assert_relative_eq!(adjusted[0].unwrap(), 0.03, epsilon = 1e-12);
        assert_relative_eq!(adjusted[2].unwrap(), 0.06, epsilon = 1e-12);
        assert_relative_eq!(adjusted[4].unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_adjust_with_missing_all_untested() {
        let adjusted = adjust_with_missing(&[None, None], CorrectionMethod::BenjaminiHochberg).unwrap();
        assert_eq!(adjusted, vec![None, None]);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(bonferroni_correction(&[]).is_err());
        assert!(holm_bonferroni_correction(&[]).is_err());

        let invalid_p = vec![-0.1, 0.5, 1.1];
        assert!(bonferroni_correction(&invalid_p).is_err());
        assert!(benjamini_hochberg_correction(&invalid_p).is_err());
        assert!(benjamini_yekutieli_correction(&invalid_p).is_err());
    }
}
