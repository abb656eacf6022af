//! Negative-binomial GLM with a log link and fixed size-factor offsets.
//!
//! `log μ_j = log s_j + x_j β`, fitted by iteratively reweighted least squares
//! with a tiny ridge on `XᵀWX` and a floor on μ, stopping on the relative
//! change of the deviance.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::EnrichmentError;
use crate::testing::inference::dispersion::nb_log_likelihood;
use crate::testing::utils::{cholesky, cholesky_inverse, cholesky_solve};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations.
    pub maxit: usize,
    /// Relative deviance change below which the fit has converged.
    pub beta_tol: f64,
    /// Ridge added to the diagonal of `XᵀWX` while iterating.
    pub ridge: f64,
    /// Lower bound on fitted means.
    pub min_mu: f64,
    /// A coefficient beyond this magnitude aborts the fit.
    pub beta_cap: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        GlmFitParams {
            maxit: 100,
            beta_tol: 1e-8,
            ridge: 1e-6,
            min_mu: 0.5,
            beta_cap: 30.0,
        }
    }
}

/// Model matrix for `~ replicate + treatment`.
///
/// Columns: intercept, one dummy per non-reference replicate level (the
/// lowest level is the reference), then the treatment dummy (top = 1).
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    column_names: Vec<String>,
}

impl DesignMatrix {
    pub fn replicate_treatment(replicates: &[u8], treatment: &[bool]) -> anyhow::Result<Self> {
        let n_samples = replicates.len();
        if treatment.len() != n_samples {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("{} treatment labels", n_samples),
                got: treatment.len().to_string(),
            }
            .into());
        }

        let mut levels = replicates.to_vec();
        levels.sort_unstable();
        levels.dedup();

        let mut column_names = vec!["intercept".to_string()];
        column_names.extend(levels.iter().skip(1).map(|l| format!("replicate_{}", l)));
        column_names.push("treatment".to_string());

        let n_coefficients = column_names.len();
        let mut matrix = Array2::<f64>::zeros((n_samples, n_coefficients));
        for (i, (&replicate, &treated)) in replicates.iter().zip(treatment).enumerate() {
            matrix[[i, 0]] = 1.0;
            if let Some(pos) = levels.iter().skip(1).position(|&l| l == replicate) {
                matrix[[i, 1 + pos]] = 1.0;
            }
            if treated {
                matrix[[i, n_coefficients - 1]] = 1.0;
            }
        }

        let design = DesignMatrix {
            matrix,
            column_names,
        };
        design.check_estimable()?;
        Ok(design)
    }

    fn check_estimable(&self) -> anyhow::Result<()> {
        if self.n_samples() <= self.n_coefficients() {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("more than {} samples for a dispersion estimate", self.n_coefficients()),
                got: self.n_samples().to_string(),
            }
            .into());
        }
        let xtx = self.matrix.t().dot(&self.matrix);
        if cholesky(&xtx).is_none() {
            return Err(EnrichmentError::DimensionMismatch {
                expected: "a full-rank design (both treatment levels present)".to_string(),
                got: format!("{:?}", self.column_names),
            }
            .into());
        }
        Ok(())
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn residual_df(&self) -> usize {
        self.n_samples() - self.n_coefficients()
    }

    /// Index of the treatment coefficient.
    pub fn treatment_coefficient(&self) -> usize {
        self.n_coefficients() - 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlmFit {
    /// Natural-log scale coefficients.
    pub coefficients: Array1<f64>,
    pub standard_errors: Array1<f64>,
    pub mu: Array1<f64>,
    pub deviance: f64,
    pub converged: bool,
}

fn fitted_means(
    design: &Array2<f64>,
    beta: &Array1<f64>,
    size_factors: ArrayView1<f64>,
    min_mu: f64,
) -> Array1<f64> {
    let eta = design.dot(beta);
    Array1::from_iter(
        eta.iter()
            .zip(size_factors.iter())
            .map(|(&e, &s)| (s * e.exp()).max(min_mu)),
    )
}

/// `XᵀWX` and `XᵀWz` for the current means.
fn weighted_cross_products(
    design: &Array2<f64>,
    weights: &Array1<f64>,
    response: Option<&Array1<f64>>,
) -> (Array2<f64>, Array1<f64>) {
    let p = design.ncols();
    let mut xtwx = Array2::<f64>::zeros((p, p));
    let mut xtwz = Array1::<f64>::zeros(p);

    for (i, row) in design.outer_iter().enumerate() {
        let w = weights[i];
        for j in 0..p {
            if let Some(z) = response {
                xtwz[j] += w * row[j] * z[i];
            }
            for k in 0..p {
                xtwx[[j, k]] += w * row[j] * row[k];
            }
        }
    }
    (xtwx, xtwz)
}

/// NB working weights `μ / (1 + αμ)`.
pub fn working_weights(mu: &Array1<f64>, alpha: f64) -> Array1<f64> {
    mu.mapv(|m| m / (1.0 + alpha * m))
}

/// Fit one gene at dispersion `alpha`.
///
/// Returns `None` when the information matrix is singular. A fit that hits
/// the iteration limit or the coefficient cap is returned with
/// `converged == false`.
pub fn fit_nb_glm(
    counts: ArrayView1<f64>,
    size_factors: ArrayView1<f64>,
    design: &Array2<f64>,
    alpha: f64,
    params: &GlmFitParams,
) -> Option<GlmFit> {
    let n = counts.len();
    let p = design.ncols();

    let mean_normalized = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&y, &s)| y / s)
        .sum::<f64>()
        / n as f64;

    let mut beta = Array1::<f64>::zeros(p);
    beta[0] = mean_normalized.max(0.1).ln();

    let mut mu = fitted_means(design, &beta, size_factors, params.min_mu);
    let counts_slice = counts.to_vec();
    let mut dev_old = -2.0 * nb_log_likelihood(&counts_slice, mu.as_slice()?, alpha);

    let mut converged = false;

    for _ in 0..params.maxit {
        let weights = working_weights(&mu, alpha);
        let z = Array1::from_iter((0..n).map(|i| (mu[i] / size_factors[i]).ln() + (counts[i] - mu[i]) / mu[i]));
        let (mut xtwx, xtwz) = weighted_cross_products(design, &weights, Some(&z));
        for j in 0..p {
            xtwx[[j, j]] += params.ridge;
        }

        let l = cholesky(&xtwx)?;
        let next = cholesky_solve(&l, &xtwz);
        if next.iter().any(|b| !b.is_finite() || b.abs() > params.beta_cap) {
            break;
        }

        beta = next;
        mu = fitted_means(design, &beta, size_factors, params.min_mu);

        let dev = -2.0 * nb_log_likelihood(&counts_slice, mu.as_slice()?, alpha);
        let change = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if change.is_nan() {
            break;
        }
        if change < params.beta_tol {
            converged = true;
            dev_old = dev;
            break;
        }
        dev_old = dev;
    }

    let weights = working_weights(&mu, alpha);
    let (information, _) = weighted_cross_products(design, &weights, None);
    let covariance = cholesky_inverse(&cholesky(&information)?);
    let standard_errors = covariance.diag().mapv(|v| v.max(0.0).sqrt());

    Some(GlmFit {
        coefficients: beta,
        standard_errors,
        mu,
        deviance: dev_old,
        converged,
    })
}
