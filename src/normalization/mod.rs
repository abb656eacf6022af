//! Library-size normalization.
//!
//! Size factors follow the median-of-ratios estimator: every sample is
//! compared with a pseudo-reference built from per-gene geometric means over
//! the genes that have no zero count. Isotype-control pulldowns recover far
//! less material than the immunoprecipitation, so their factors can be
//! scaled further by a yield ratio.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::EnrichmentError;
use crate::testing::utils::median;

/// Median-of-ratios size factors, one per column of `counts`.
///
/// Fails when no gene is free of zeros, or when a factor would not be
/// strictly positive and finite.
pub fn estimate_size_factors(counts: ArrayView2<f64>) -> anyhow::Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(EnrichmentError::SizeFactorFailed("count matrix is empty".to_string()).into());
    }

    let reference: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&c| c > 0.0))
        .map(|(i, row)| {
            let log_mean = row.iter().map(|&c| c.ln()).sum::<f64>() / n_samples as f64;
            (i, log_mean.exp())
        })
        .collect();

    if reference.is_empty() {
        return Err(EnrichmentError::SizeFactorFailed(
            "every gene has a zero count in at least one sample".to_string(),
        )
        .into());
    }

    let mut factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let ratios: Vec<f64> = reference
            .iter()
            .map(|&(i, geo_mean)| counts[[i, j]] / geo_mean)
            .collect();
        let factor = median(&ratios)
            .ok_or_else(|| EnrichmentError::SizeFactorFailed(format!("no ratios for sample {}", j)))?;

        if !(factor.is_finite() && factor > 0.0) {
            return Err(EnrichmentError::SizeFactorFailed(format!(
                "sample {} has size factor {}",
                j, factor
            ))
            .into());
        }
        factors[j] = factor;
    }

    Ok(factors)
}

/// Multiply the first `n_bottom` factors by `ratio`, leaving the rest at
/// their baseline.
pub fn apply_yield_ratio(
    factors: &mut Array1<f64>,
    n_bottom: usize,
    ratio: f64,
) -> anyhow::Result<()> {
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(EnrichmentError::Config(format!("yield ratio must be positive, got {}", ratio)).into());
    }
    if n_bottom > factors.len() {
        return Err(EnrichmentError::DimensionMismatch {
            expected: format!("at most {} bottom samples", factors.len()),
            got: n_bottom.to_string(),
        }
        .into());
    }

    factors
        .slice_mut(ndarray::s![..n_bottom])
        .mapv_inplace(|f| f * ratio);
    Ok(())
}

/// Size factors for a comparison subset laid out bottom columns first.
///
/// `yield_ratio` is only given when the bottom condition is the isotype
/// control.
pub fn comparison_size_factors(
    counts: ArrayView2<f64>,
    n_bottom: usize,
    yield_ratio: Option<f64>,
) -> anyhow::Result<Array1<f64>> {
    let mut factors = estimate_size_factors(counts)?;
    if let Some(ratio) = yield_ratio {
        apply_yield_ratio(&mut factors, n_bottom, ratio)?;
    }
    Ok(factors)
}

/// Divide every column by its size factor.
pub fn normalized_counts(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
) -> anyhow::Result<Array2<f64>> {
    if counts.ncols() != size_factors.len() {
        return Err(EnrichmentError::DimensionMismatch {
            expected: format!("{} size factors", counts.ncols()),
            got: size_factors.len().to_string(),
        }
        .into());
    }

    let mut normalized = counts.to_owned();
    for (mut column, &factor) in normalized.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
        column.mapv_inplace(|c| c / factor);
    }
    Ok(normalized)
}
