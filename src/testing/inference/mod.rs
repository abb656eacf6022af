use ndarray::{Array1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::counts::CountMatrix;
use crate::error::EnrichmentError;
use crate::testing::correction::{CorrectionMethod, adjust_with_missing};
use crate::testing::{MultipleTestResults, TestResult};

pub mod dispersion;

pub mod glm;

pub mod parametric;

pub use dispersion::{DispersionEstimates, DispersionParams, DispersionTrend, estimate_dispersions};
pub use glm::{DesignMatrix, GlmFit, GlmFitParams, fit_nb_glm};

/// Knobs of one negative-binomial differential fit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialOptions {
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
    pub correction: CorrectionMethod,
}

pub trait MatrixStatTests {
    /// Negative-binomial Wald test of the design's treatment coefficient for
    /// every gene, with shrunken dispersions and multiple-testing correction.
    ///
    /// `size_factors` are used as given; they are not re-estimated.
    fn differential_expression(
        &self,
        design: &DesignMatrix,
        size_factors: &Array1<f64>,
        options: &DifferentialOptions,
    ) -> anyhow::Result<MultipleTestResults>;
}

impl MatrixStatTests for CountMatrix {
    fn differential_expression(
        &self,
        design: &DesignMatrix,
        size_factors: &Array1<f64>,
        options: &DifferentialOptions,
    ) -> anyhow::Result<MultipleTestResults> {
        if design.n_samples() != self.n_samples() {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("{} design rows", self.n_samples()),
                got: design.n_samples().to_string(),
            }
            .into());
        }
        if size_factors.len() != self.n_samples() {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: size_factors.len().to_string(),
            }
            .into());
        }

        let counts = self.counts();
        let all_zero = self.all_zero_genes();
        let base_means: Vec<Option<f64>> = counts
            .axis_iter(Axis(0))
            .zip(all_zero.iter())
            .map(|(row, &zero)| {
                if zero {
                    return None;
                }
                let total: f64 = row.iter().zip(size_factors.iter()).map(|(&y, &s)| y / s).sum();
                Some(total / self.n_samples() as f64)
            })
            .collect();

        let estimates = estimate_dispersions(
            counts,
            size_factors,
            design.matrix(),
            &all_zero,
            &options.dispersion,
            &options.glm,
        );

        let coefficient = design.treatment_coefficient();
        let results: Vec<Option<TestResult>> = (0..self.n_genes())
            .into_par_iter()
            .map(|i| {
                let alpha = estimates.dispersions[i]?;
                let fit = fit_nb_glm(
                    counts.row(i),
                    size_factors.view(),
                    design.matrix(),
                    alpha,
                    &options.glm,
                )?;
                converged_wald_test(&fit, coefficient)
            })
            .collect();

        let tested = all_zero.iter().filter(|&&zero| !zero).count();
        let failed = tested - results.iter().filter(|r| r.is_some()).count();
        if failed > 0 {
            log::debug!("{} of {} genes did not converge and are reported as NA", failed, tested);
        }

        Ok(combine_results(&results, options.correction)?
            .with_feature_metadata("base_mean", base_means)
            .with_feature_metadata("dispersion", estimates.dispersions)
            .with_global_metadata("test_type", "nb_wald")
            .with_global_metadata("correction", options.correction.name()))
    }
}

/// Wald test of `coefficient`; a fit that did not converge is not tested.
fn converged_wald_test(fit: &GlmFit, coefficient: usize) -> Option<TestResult> {
    if !fit.converged {
        return None;
    }
    parametric::wald_test(fit.coefficients[coefficient], fit.standard_errors[coefficient])
}

/// Collect per-gene results and adjust the p-values of the tested genes only.
fn combine_results(
    results: &[Option<TestResult>],
    correction: CorrectionMethod,
) -> anyhow::Result<MultipleTestResults> {
    let combined = MultipleTestResults::from_results(results);
    let adjusted = adjust_with_missing(&combined.p_values, correction)?;
    Ok(combined.with_adjusted_p_values(adjusted))
}
