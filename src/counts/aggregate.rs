//! Collapse site-level counts into gene-level counts.

use std::collections::BTreeMap;

use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::Array2;

use super::CountMatrix;
use crate::error::EnrichmentError;

/// One row of the site table. `counts[j]` is `None` when the source had no
/// value for sample `j`.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRecord {
    pub gene: String,
    pub site_type: String,
    pub counts: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SiteTable {
    pub samples: Vec<String>,
    pub records: Vec<SiteRecord>,
}

impl SiteTable {
    pub fn new(samples: Vec<String>) -> Self {
        SiteTable {
            samples,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: SiteRecord) -> anyhow::Result<()> {
        if record.counts.len() != self.samples.len() {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("{} counts per site", self.samples.len()),
                got: format!("{} counts for a site of gene '{}'", record.counts.len(), record.gene),
            }
            .into());
        }
        self.records.push(record);
        Ok(())
    }
}

/// Sum site counts per gene, skipping missing values and every site whose
/// type equals `intergenic_label`.
///
/// Genes come out in lexicographic order. Triplets go through a COO matrix,
/// whose conversion to CSR sums duplicate (gene, sample) entries.
pub fn aggregate_sites(sites: &SiteTable, intergenic_label: &str) -> anyhow::Result<CountMatrix> {
    let kept: Vec<&SiteRecord> = sites
        .records
        .iter()
        .filter(|record| record.site_type != intergenic_label)
        .collect();

    let mut gene_index: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &kept {
        gene_index.entry(record.gene.as_str()).or_insert(0);
    }
    for (position, slot) in gene_index.values_mut().enumerate() {
        *slot = position;
    }

    let n_genes = gene_index.len();
    let n_samples = sites.samples.len();

    let mut coo = CooMatrix::<f64>::new(n_genes, n_samples);
    for record in &kept {
        let row = gene_index[record.gene.as_str()];
        for (col, value) in record.counts.iter().enumerate() {
            if let Some(value) = value {
                if !value.is_finite() || *value < 0.0 {
                    return Err(EnrichmentError::InvalidCount {
                        gene: record.gene.clone(),
                        sample: sites.samples[col].clone(),
                        value: *value,
                    }
                    .into());
                }
                coo.push(row, col, *value);
            }
        }
    }

    let csr = CsrMatrix::from(&coo);
    let mut dense = Array2::<f64>::zeros((n_genes, n_samples));
    for (row, col, &value) in csr.triplet_iter() {
        dense[[row, col]] = value;
    }

    log::info!(
        "Aggregated {} sites ({} intergenic dropped) into {} genes",
        sites.records.len(),
        sites.records.len() - kept.len(),
        n_genes
    );

    let genes = gene_index.into_keys().map(str::to_string).collect();
    CountMatrix::new(dense, genes, sites.samples.clone())
}
