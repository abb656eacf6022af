use std::cmp::Ordering;

use ndarray::{Array1, Array2};

/// Median of the finite values in `values`.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation, scaled by 1.4826 to be consistent with the
/// standard deviation of normal data.
pub fn mad(values: &[f64]) -> Option<f64> {
    let center = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - center).abs())
        .collect();
    median(&deviations).map(|m| 1.4826 * m)
}

/// Trigamma function ψ'(x) for x > 0.
///
/// Shifts the argument above 10 with the recurrence ψ'(x) = ψ'(x+1) + 1/x²,
/// then uses the asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    if !(x > 0.0) || !x.is_finite() {
        return f64::NAN;
    }

    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }

    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + inv
        + inv2 / 2.0
        + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite matrix.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return None;
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve `L Lᵀ x = b` given the Cholesky factor `L`.
pub fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();

    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Inverse of a symmetric positive-definite matrix from its Cholesky factor.
pub fn cholesky_inverse(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut inverse = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut unit = Array1::<f64>::zeros(n);
        unit[j] = 1.0;
        inverse.column_mut(j).assign(&cholesky_solve(l, &unit));
    }
    inverse
}

/// `ln det(A)` from the Cholesky factor of `A`.
pub fn cholesky_log_det(l: &Array2<f64>) -> f64 {
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[f64::NAN, 1.0]), Some(1.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_mad() {
        let value = mad(&[1.0, 2.0, 3.0, 4.0, 100.0]).unwrap();
        assert_relative_eq!(value, 1.4826, epsilon = 1e-12);
    }

    #[test]
    fn test_trigamma_known_values() {
        // ψ'(1) = π²/6, ψ'(1/2) = π²/2
        let pi2 = std::f64::consts::PI * std::f64::consts::PI;
        assert_relative_eq!(trigamma(1.0), pi2 / 6.0, epsilon = 1e-10);
        assert_relative_eq!(trigamma(0.5), pi2 / 2.0, epsilon = 1e-10);
        assert!(trigamma(0.0).is_nan());
    }

    #[test]
    fn test_cholesky_round_trip() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]];
        let l = cholesky(&a).unwrap();
        let b = array![1.0, 2.0, 3.0];
        let x = cholesky_solve(&l, &b);
        let back = a.dot(&x);
        for i in 0..3 {
            assert_relative_eq!(back[i], b[i], epsilon = 1e-12);
        }

        let identity = a.dot(&cholesky_inverse(&l));
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(identity[[i, j]], expected, epsilon = 1e-12);
            }
        }

        let det = 4.0 * (5.0 * 3.0 - 1.0) - 2.0 * (2.0 * 3.0 - 0.4) + 0.4 * (2.0 - 5.0 * 0.4);
        assert_relative_eq!(cholesky_log_det(&l), f64::ln(det), epsilon = 1e-12);
    }

    #[test]
    fn test_cholesky_rejects_singular() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        assert!(cholesky(&a).is_none());
    }
}
