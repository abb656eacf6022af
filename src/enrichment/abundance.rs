// Abundance of a gene in the input libraries: how much of it there is and how
// reproducibly it was measured across replicates.

use ndarray::{Array1, ArrayView2, Axis};
use single_utilities::traits::FloatOps;

use crate::counts::CountMatrix;
use crate::normalization::{estimate_size_factors, normalized_counts};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbundanceStats {
    pub mean: Option<f64>,
    pub sd: Option<f64>,
    /// Coefficient of variation `sd / mean`.
    pub noise: Option<f64>,
}

fn mean<T>(values: &[T]) -> Option<T>
where
    T: FloatOps,
{
    if values.is_empty() {
        return None;
    }
    let n = T::from(values.len())?;
    Some(values.iter().fold(T::zero(), |acc, &v| acc + v) / n)
}

/// Sample standard deviation (n − 1 denominator).
fn sample_sd<T>(values: &[T], mean: T) -> Option<T>
where
    T: FloatOps,
{
    if values.len() < 2 {
        return None;
    }
    let df = T::from(values.len() - 1)?;
    let sum_squares = values
        .iter()
        .fold(T::zero(), |acc, &v| acc + num_traits::Float::powi(v - mean, 2));
    Some(num_traits::Float::sqrt(sum_squares / df))
}

/// Stats of one gene's normalized replicate values.
pub fn replicate_stats<T>(values: &[T]) -> AbundanceStats
where
    T: FloatOps,
{
    let mean_value = mean(values);
    let sd_value = mean_value.and_then(|m| sample_sd(values, m));

    let noise = match (mean_value, sd_value) {
        (Some(m), Some(sd)) if m != T::zero() => (sd / m).to_f64(),
        _ => None,
    };

    AbundanceStats {
        mean: mean_value.and_then(|m| m.to_f64()),
        sd: sd_value.and_then(|sd| sd.to_f64()),
        noise,
    }
}

/// Per-gene stats of `counts` divided column-wise by `size_factors`.
pub fn summarize_normalized(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
) -> anyhow::Result<Vec<AbundanceStats>> {
    let normalized = normalized_counts(counts, size_factors)?;
    Ok(normalized
        .axis_iter(Axis(0))
        .map(|row| replicate_stats(&row.to_vec()))
        .collect())
}

/// Median-of-ratios normalize the `input_columns` of `matrix` among
/// themselves and summarize every gene.
pub fn summarize_input(
    matrix: &CountMatrix,
    input_columns: &[usize],
) -> anyhow::Result<Vec<AbundanceStats>> {
    let inputs = matrix.select_samples(input_columns)?;
    let size_factors = estimate_size_factors(inputs.counts())?;
    summarize_normalized(inputs.counts(), &size_factors)
}
