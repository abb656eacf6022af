//! Dispersion estimation for the negative-binomial fit.
//!
//! Three stages, all deterministic:
//!
//! 1. **Gene-wise** estimates maximize the Cox-Reid adjusted profile
//!    likelihood with the means held at an IRLS fit.
//! 2. A **trend** `α(μ̄) = a₀ + a₁/μ̄` is fitted across genes by a gamma GLM
//!    with identity link, dropping gene-wise outliers between rounds. When
//!    that fails the trend is the mean of the gene-wise estimates.
//! 3. **MAP** estimates add a log-normal prior centred on the trend, whose
//!    width comes from the spread of the gene-wise estimates around it.
//!
//! All maximizations run on `log α` over a coarse grid followed by a
//! golden-section refinement around the best grid point.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::testing::inference::glm::{GlmFitParams, fit_nb_glm, working_weights};
use crate::testing::utils::{cholesky, cholesky_log_det, cholesky_solve, mad, trigamma};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Lower bound of every dispersion estimate.
    pub min_disp: f64,
    /// Points of the coarse `log α` grid.
    pub grid_size: usize,
    /// Width of the final golden-section bracket on the `log α` scale.
    pub log_alpha_tol: f64,
    /// Gene-wise estimates this many prior SDs above the trend are kept.
    pub outlier_sd: f64,
    /// Floor of the log-dispersion prior variance.
    pub min_prior_var: f64,
    /// Rounds of outlier exclusion for the parametric trend.
    pub trend_maxit: usize,
}

impl Default for DispersionParams {
    fn default() -> Self {
        DispersionParams {
            min_disp: 1e-8,
            grid_size: 20,
            log_alpha_tol: 1e-6,
            outlier_sd: 2.0,
            min_prior_var: 0.25,
            trend_maxit: 10,
        }
    }
}

impl DispersionParams {
    /// Upper bound of every dispersion estimate for `n_samples` samples.
    pub fn max_disp(&self, n_samples: usize) -> f64 {
        (n_samples as f64).max(10.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispersionTrend {
    Parametric { asymptotic: f64, extra_poisson: f64 },
    Mean(f64),
}

impl DispersionTrend {
    pub fn at(&self, base_mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric {
                asymptotic,
                extra_poisson,
            } => asymptotic + extra_poisson / base_mean,
            DispersionTrend::Mean(value) => value,
        }
    }
}

/// Per-gene dispersions of one fit; `None` for genes that are not tested.
#[derive(Debug, Clone, PartialEq)]
pub struct DispersionEstimates {
    pub gene_wise: Vec<Option<f64>>,
    /// Dispersions used for the final GLM fit.
    pub dispersions: Vec<Option<f64>>,
    pub trend: Option<DispersionTrend>,
    pub prior_variance: Option<f64>,
}

/// NB log-likelihood of `counts` given means `mu` and dispersion `alpha`.
pub fn nb_log_likelihood(counts: &[f64], mu: &[f64], alpha: f64) -> f64 {
    let size = 1.0 / alpha;
    counts
        .iter()
        .zip(mu.iter())
        .map(|(&y, &m)| {
            ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) - size * (alpha * m).ln_1p()
                + y * (m.ln() - (m + size).ln())
        })
        .sum()
}

/// Cox-Reid adjusted profile log-likelihood: `ℓ(α) − ½ log det(XᵀWX)`.
pub fn cox_reid_log_likelihood(
    counts: &[f64],
    mu: &Array1<f64>,
    design: &Array2<f64>,
    alpha: f64,
) -> f64 {
    let Some(mu_slice) = mu.as_slice() else {
        return f64::NEG_INFINITY;
    };
    let log_lik = nb_log_likelihood(counts, mu_slice, alpha);

    let weights = working_weights(mu, alpha);
    let p = design.ncols();
    let mut xtwx = Array2::<f64>::zeros((p, p));
    for (i, row) in design.outer_iter().enumerate() {
        for j in 0..p {
            for k in 0..p {
                xtwx[[j, k]] += weights[i] * row[j] * row[k];
            }
        }
    }

    match cholesky(&xtwx) {
        Some(l) => log_lik - 0.5 * cholesky_log_det(&l),
        None => f64::NEG_INFINITY,
    }
}

const GOLDEN_SECTION_MAXIT: usize = 200;

/// Maximize `objective` over `[lower, upper]`.
fn maximize_on_interval<F>(
    objective: F,
    lower: f64,
    upper: f64,
    grid_size: usize,
    tol: f64,
) -> f64
where
    F: Fn(f64) -> f64,
{
    let score = |x: f64| {
        let value = objective(x);
        if value.is_nan() { f64::NEG_INFINITY } else { value }
    };

    let grid_size = grid_size.max(3);
    let delta = (upper - lower) / (grid_size - 1) as f64;
    let (mut best_x, mut best_value) = (lower, score(lower));
    for i in 1..grid_size {
        let x = lower + i as f64 * delta;
        let value = score(x);
        if value > best_value {
            best_x = x;
            best_value = value;
        }
    }

    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = ((best_x - delta).max(lower), (best_x + delta).min(upper));
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let (mut fc, mut fd) = (score(c), score(d));

    for _ in 0..GOLDEN_SECTION_MAXIT {
        if b - a <= tol {
            break;
        }
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = score(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = score(d);
        }
    }

    let refined = (a + b) / 2.0;
    if score(refined) >= best_value { refined } else { best_x }
}

/// Least-squares fit of normalized counts on the design, floored at one.
fn linear_model_mu(normalized: &[f64], design: &Array2<f64>) -> Option<Vec<f64>> {
    let y = Array1::from_vec(normalized.to_vec());
    let xtx = design.t().dot(design);
    let xty = design.t().dot(&y);
    let beta = cholesky_solve(&cholesky(&xtx)?, &xty);
    Some(design.dot(&beta).iter().map(|m| m.max(1.0)).collect())
}

/// Starting dispersion: the smaller of the residual-moment and the
/// variance-moment estimates, clamped to `[min_disp, max_disp]`.
fn initial_dispersion(
    counts: ArrayView1<f64>,
    size_factors: ArrayView1<f64>,
    design: &Array2<f64>,
    min_disp: f64,
    max_disp: f64,
) -> f64 {
    let n = counts.len() as f64;
    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&y, &s)| y / s)
        .collect();

    let mean = normalized.iter().sum::<f64>() / n;
    let variance = normalized.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let xim = size_factors.iter().map(|s| 1.0 / s).sum::<f64>() / n;
    let moments = if mean > 0.0 {
        (variance - xim * mean) / (mean * mean)
    } else {
        max_disp
    };

    let residual_df = (design.nrows() - design.ncols()) as f64;
    let rough = linear_model_mu(&normalized, design)
        .map(|mu| {
            normalized
                .iter()
                .zip(mu.iter())
                .map(|(y, m)| ((y - m).powi(2) - m) / (m * m))
                .sum::<f64>()
                / residual_df
        })
        .unwrap_or(moments);

    let estimate = rough.min(moments);
    if estimate.is_nan() {
        return min_disp;
    }
    estimate.clamp(min_disp, max_disp)
}

/// Gene-wise dispersion of one gene and the means it was estimated at.
pub fn gene_wise_dispersion(
    counts: ArrayView1<f64>,
    size_factors: ArrayView1<f64>,
    design: &Array2<f64>,
    params: &DispersionParams,
    glm: &GlmFitParams,
) -> (f64, Array1<f64>) {
    let max_disp = params.max_disp(counts.len());
    let alpha_init = initial_dispersion(counts, size_factors, design, params.min_disp, max_disp);

    let mu = match fit_nb_glm(counts, size_factors, design, alpha_init, glm) {
        Some(fit) => fit.mu,
        None => {
            let mean = counts
                .iter()
                .zip(size_factors.iter())
                .map(|(&y, &s)| y / s)
                .sum::<f64>()
                / counts.len() as f64;
            size_factors.mapv(|s| (s * mean).max(glm.min_mu))
        }
    };

    let counts_vec = counts.to_vec();
    let log_alpha = maximize_on_interval(
        |log_alpha| cox_reid_log_likelihood(&counts_vec, &mu, design, log_alpha.exp()),
        params.min_disp.ln(),
        max_disp.ln(),
        params.grid_size,
        params.log_alpha_tol,
    );

    (log_alpha.exp().clamp(params.min_disp, max_disp), mu)
}

/// Gamma-family GLM with identity link: `y ≈ a₀ + a₁ x`.
fn gamma_identity_fit(x: &[f64], y: &[f64], start: (f64, f64)) -> Option<(f64, f64)> {
    let (mut a0, mut a1) = start;

    for _ in 0..25 {
        let mut xtwx = Array2::<f64>::zeros((2, 2));
        let mut xtwy = Array1::<f64>::zeros(2);
        for (&xi, &yi) in x.iter().zip(y.iter()) {
            let fitted = a0 + a1 * xi;
            if !(fitted > 0.0) {
                return None;
            }
            let w = 1.0 / (fitted * fitted);
            xtwx[[0, 0]] += w;
            xtwx[[0, 1]] += w * xi;
            xtwx[[1, 1]] += w * xi * xi;
            xtwy[0] += w * yi;
            xtwy[1] += w * xi * yi;
        }
        xtwx[[1, 0]] = xtwx[[0, 1]];

        let next = cholesky_solve(&cholesky(&xtwx)?, &xtwy);
        let change = (next[0] - a0).abs() / (a0.abs() + 1e-10) + (next[1] - a1).abs() / (a1.abs() + 1e-10);
        a0 = next[0];
        a1 = next[1];
        if change < 1e-8 {
            return Some((a0, a1));
        }
    }
    Some((a0, a1))
}

/// Parametric trend with iterative exclusion of genes far from the fit.
pub fn fit_parametric_trend(
    base_means: &[f64],
    dispersions: &[f64],
    params: &DispersionParams,
) -> Option<DispersionTrend> {
    let mut coefs = (0.1, 1.0);

    for _ in 0..=params.trend_maxit {
        let (x, y): (Vec<f64>, Vec<f64>) = base_means
            .iter()
            .zip(dispersions.iter())
            .filter(|&(&m, &d)| {
                let residual = d / (coefs.0 + coefs.1 / m);
                residual > 1e-4 && residual < 15.0
            })
            .map(|(&m, &d)| (1.0 / m, d))
            .unzip();

        if x.len() < 3 {
            return None;
        }

        let next = gamma_identity_fit(&x, &y, coefs)?;
        if next.0 <= 0.0 || next.1 <= 0.0 {
            return None;
        }

        let change = (next.0 / coefs.0).ln().powi(2) + (next.1 / coefs.1).ln().powi(2);
        coefs = next;
        if change < 1e-6 {
            return Some(DispersionTrend::Parametric {
                asymptotic: coefs.0,
                extra_poisson: coefs.1,
            });
        }
    }
    None
}

/// Gene-wise, trended and shrunken dispersions for every gene of `counts`.
///
/// Genes flagged in `skip` (all-zero rows) get `None` throughout.
pub fn estimate_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Array2<f64>,
    skip: &[bool],
    params: &DispersionParams,
    glm: &GlmFitParams,
) -> DispersionEstimates {
    let (n_genes, n_samples) = counts.dim();
    let max_disp = params.max_disp(n_samples);

    let base_means: Vec<f64> = counts
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .zip(size_factors.iter())
                .map(|(&y, &s)| y / s)
                .sum::<f64>()
                / n_samples as f64
        })
        .collect();

    let gene_fits: Vec<Option<(f64, Array1<f64>)>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            if skip[i] {
                return None;
            }
            Some(gene_wise_dispersion(counts.row(i), size_factors.view(), design, params, glm))
        })
        .collect();
    let gene_wise: Vec<Option<f64>> = gene_fits.iter().map(|f| f.as_ref().map(|(d, _)| *d)).collect();

    // Genes pinned at the lower bound carry no information about the trend.
    let informative: Vec<usize> = (0..n_genes)
        .filter(|&i| gene_wise[i].is_some_and(|d| d >= 100.0 * params.min_disp))
        .collect();

    if informative.is_empty() {
        log::warn!(
            "All gene-wise dispersion estimates are within two orders of magnitude of {}; using them without shrinkage",
            params.min_disp
        );
        return DispersionEstimates {
            dispersions: gene_wise.clone(),
            gene_wise,
            trend: None,
            prior_variance: None,
        };
    }

    let informative_means: Vec<f64> = informative.iter().map(|&i| base_means[i]).collect();
    let informative_disps: Vec<f64> = informative.iter().filter_map(|&i| gene_wise[i]).collect();

    let trend = fit_parametric_trend(&informative_means, &informative_disps, params).unwrap_or_else(|| {
        let mean = informative_disps.iter().sum::<f64>() / informative_disps.len() as f64;
        log::warn!(
            "Parametric dispersion trend failed on {} genes; using the mean dispersion {:.4}",
            informative.len(),
            mean
        );
        DispersionTrend::Mean(mean)
    });

    let trended: Vec<Option<f64>> = (0..n_genes)
        .map(|i| gene_wise[i].map(|_| trend.at(base_means[i]).clamp(params.min_disp, max_disp)))
        .collect();

    let log_residuals: Vec<f64> = informative
        .iter()
        .filter_map(|&i| Some(gene_wise[i]?.ln() - trended[i]?.ln()))
        .collect();
    let var_log_disp = mad(&log_residuals).map(|m| m * m).unwrap_or(0.0);
    let residual_df = (design.nrows() - design.ncols()) as f64;
    let expected_var = trigamma(residual_df / 2.0);
    let prior_variance = (var_log_disp - expected_var).max(params.min_prior_var);
    let outlier_cutoff = params.outlier_sd * var_log_disp.sqrt();

    log::debug!(
        "Dispersion prior variance {:.4} (observed {:.4}, expected {:.4})",
        prior_variance,
        var_log_disp,
        expected_var
    );

    let dispersions: Vec<Option<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let (gene_disp, mu) = gene_fits[i].as_ref()?;
            let trend_disp = trended[i]?;

            if gene_disp.ln() > trend_disp.ln() + outlier_cutoff {
                return Some(*gene_disp);
            }

            let counts_vec = counts.row(i).to_vec();
            let log_trend = trend_disp.ln();
            let log_alpha = maximize_on_interval(
                |log_alpha| {
                    cox_reid_log_likelihood(&counts_vec, mu, design, log_alpha.exp())
                        - (log_alpha - log_trend).powi(2) / (2.0 * prior_variance)
                },
                params.min_disp.ln(),
                max_disp.ln(),
                params.grid_size,
                params.log_alpha_tol,
            );
            Some(log_alpha.exp().clamp(params.min_disp, max_disp))
        })
        .collect();

    DispersionEstimates {
        gene_wise,
        dispersions,
        trend: Some(trend),
        prior_variance: Some(prior_variance),
    }
}
