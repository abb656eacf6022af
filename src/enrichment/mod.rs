//! Enrichment calls on top of the differential statistics.
//!
//! A gene is **Enriched** in a cell type when its IP-over-control log2 fold
//! change clears the cell type's threshold and its adjusted p-value is below
//! `alpha`. Everything else, including genes without statistics, is **Noise**.
//!
//! ## Available Methods
//!
//! - [`classify`]: one gene
//! - [`classify_genes`]: a column of genes, in the order given
//! - [`abundance`]: mean, spread and noise of normalized input counts

use std::fmt;

pub mod abundance;

pub use abundance::{AbundanceStats, summarize_input, summarize_normalized};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrichmentLabel {
    Enriched,
    Noise,
}

impl EnrichmentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentLabel::Enriched => "Enriched",
            EnrichmentLabel::Noise => "Noise",
        }
    }
}

impl fmt::Display for EnrichmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label one gene. Missing statistics classify as `Noise`.
pub fn classify(
    log2_fold_change: Option<f64>,
    adjusted_p_value: Option<f64>,
    threshold: f64,
    alpha: f64,
) -> EnrichmentLabel {
    match (log2_fold_change, adjusted_p_value) {
        (Some(lfc), Some(padj)) if lfc > threshold && padj < alpha => EnrichmentLabel::Enriched,
        _ => EnrichmentLabel::Noise,
    }
}

/// Label every gene of a table, keeping row order.
pub fn classify_genes(
    log2_fold_changes: &[Option<f64>],
    adjusted_p_values: &[Option<f64>],
    threshold: f64,
    alpha: f64,
) -> anyhow::Result<Vec<EnrichmentLabel>> {
    if log2_fold_changes.len() != adjusted_p_values.len() {
        return Err(crate::error::EnrichmentError::DimensionMismatch {
            expected: format!("{} adjusted p-values", log2_fold_changes.len()),
            got: adjusted_p_values.len().to_string(),
        }
        .into());
    }

    Ok(log2_fold_changes
        .iter()
        .zip(adjusted_p_values)
        .map(|(&lfc, &padj)| classify(lfc, padj, threshold, alpha))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(Some(1.0), Some(0.01), 0.58, 0.05), EnrichmentLabel::Enriched);
        assert_eq!(classify(Some(0.58), Some(0.01), 0.58, 0.05), EnrichmentLabel::Noise);
        assert_eq!(classify(Some(1.0), Some(0.05), 0.58, 0.05), EnrichmentLabel::Noise);
        assert_eq!(classify(Some(-3.0), Some(1e-10), 0.58, 0.05), EnrichmentLabel::Noise);
    }

    #[test]
    fn test_missing_statistics_are_noise() {
        assert_eq!(classify(None, Some(0.001), 0.58, 0.05), EnrichmentLabel::Noise);
        assert_eq!(classify(Some(4.0), None, 0.58, 0.05), EnrichmentLabel::Noise);
        assert_eq!(classify(None, None, 0.58, 0.05), EnrichmentLabel::Noise);
    }

    #[test]
    fn test_raising_threshold_never_adds_enriched_genes() {
        let lfc = vec![Some(0.2), Some(0.6), Some(1.1), None, Some(2.5), Some(0.9)];
        let padj = vec![Some(0.01), Some(0.02), Some(0.2), Some(0.01), Some(0.001), Some(0.04)];

        let mut previous: Option<Vec<EnrichmentLabel>> = None;
        for threshold in [0.0, 0.5, 0.58, 1.0, 2.0, 3.0] {
            let labels = classify_genes(&lfc, &padj, threshold, 0.05).unwrap();
            if let Some(previous) = &previous {
                for (before, after) in previous.iter().zip(labels.iter()) {
                    if *before == EnrichmentLabel::Noise {
                        assert_eq!(*after, EnrichmentLabel::Noise);
                    }
                }
            }
            previous = Some(labels);
        }
    }

    #[test]
    fn test_classify_genes_keeps_order() {
        let labels = classify_genes(&[Some(2.0), Some(0.0)], &[Some(0.001), Some(0.9)], 0.58, 0.05).unwrap();
        assert_eq!(labels, vec![EnrichmentLabel::Enriched, EnrichmentLabel::Noise]);
        assert_eq!(labels[0].to_string(), "Enriched");
        assert!(classify_genes(&[Some(1.0)], &[], 0.58, 0.05).is_err());
    }
}
