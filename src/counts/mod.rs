//! Gene × sample count matrices.
//!
//! Counts are held densely as `f64` so that the same storage feeds the
//! normalizer and the GLM without conversion. Rows are genes, columns are
//! samples.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::EnrichmentError;

pub mod aggregate;

pub use aggregate::{aggregate_sites, SiteRecord, SiteTable};

#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    counts: Array2<f64>,
    genes: Vec<String>,
    samples: Vec<String>,
}

impl CountMatrix {
    /// Build a matrix, checking that labels match the shape and that every
    /// value is a non-negative finite count.
    pub fn new(
        counts: Array2<f64>,
        genes: Vec<String>,
        samples: Vec<String>,
    ) -> anyhow::Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if genes.len() != n_genes {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("{} gene identifiers", n_genes),
                got: format!("{} gene identifiers", genes.len()),
            }
            .into());
        }
        if samples.len() != n_samples {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("{} sample identifiers", n_samples),
                got: format!("{} sample identifiers", samples.len()),
            }
            .into());
        }

        for ((row, col), &value) in counts.indexed_iter() {
            if !value.is_finite() || value < 0.0 {
                return Err(EnrichmentError::InvalidCount {
                    gene: genes[row].clone(),
                    sample: samples[col].clone(),
                    value,
                }
                .into());
            }
        }

        Ok(CountMatrix {
            counts,
            genes,
            samples,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    /// Copy out the given columns, in the given order.
    pub fn select_samples(&self, indices: &[usize]) -> anyhow::Result<CountMatrix> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_samples()) {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("sample index below {}", self.n_samples()),
                got: bad.to_string(),
            }
            .into());
        }

        let counts = self.counts.select(Axis(1), indices);
        let samples = indices.iter().map(|&i| self.samples[i].clone()).collect();

        Ok(CountMatrix {
            counts,
            genes: self.genes.clone(),
            samples,
        })
    }

    /// Rows whose counts are zero in every sample.
    pub fn all_zero_genes(&self) -> Vec<bool> {
        self.counts
            .axis_iter(Axis(0))
            .map(|row| row.iter().all(|&c| c == 0.0))
            .collect()
    }
}
