//! The comparison × cell type grid and final assembly.
//!
//! Every per-cell-type step (differential fit, enrichment labels, abundance)
//! is a [`CellTypeStage`]; [`run_per_cell_type`] runs one stage for all cell
//! types and outer-joins the results on gene.

use log::info;
use rayon::prelude::*;

use crate::config::{Comparison, EnrichmentConfig};
use crate::counts::{CountMatrix, SiteTable, aggregate_sites};
use crate::enrichment::{classify_genes, summarize_input};
use crate::error::EnrichmentError;
use crate::grouping::{ReplicateOverrides, select_groups, usable_samples};
use crate::normalization::comparison_size_factors;
use crate::testing::inference::{DesignMatrix, DifferentialOptions, MatrixStatTests};

pub mod table;

pub use table::{Cell, Column, GeneTable};

/// `log2_<top>_<bottom>_<cellType>`
pub fn log2_column(comparison: &Comparison, cell_type: &str) -> String {
    format!("log2_{}_{}", comparison.id(), cell_type)
}

/// `padj_<cellType>`
pub fn padj_column(cell_type: &str) -> String {
    format!("padj_{}", cell_type)
}

pub fn enrichment_column(cell_type: &str) -> String {
    format!("{}.enrichment", cell_type)
}

/// One step of the analysis applied to a single cell type.
pub trait CellTypeStage: Sync {
    fn name(&self) -> String;

    fn run(&self, cell_type: &str) -> anyhow::Result<GeneTable>;
}

/// Run `stage` for every cell type and merge the tables by outer join.
pub fn run_per_cell_type<S>(stage: &S, cell_types: &[String]) -> anyhow::Result<GeneTable>
where
    S: CellTypeStage + ?Sized,
{
    let tables = cell_types
        .par_iter()
        .map(|cell_type| stage.run(cell_type))
        .collect::<anyhow::Result<Vec<_>>>()?;
    info!("{}: merged {} cell types", stage.name(), tables.len());
    GeneTable::outer_join_all(&tables)
}

/// Negative-binomial fit of one comparison.
pub struct DifferentialStage<'a> {
    pub matrix: &'a CountMatrix,
    pub comparison: &'a Comparison,
    pub overrides: &'a ReplicateOverrides,
    pub yield_ratio: Option<f64>,
    pub options: DifferentialOptions,
    /// Only used to report the number of significant genes.
    pub alpha: f64,
}

impl CellTypeStage for DifferentialStage<'_> {
    fn name(&self) -> String {
        format!("differential {}", self.comparison.id())
    }

    fn run(&self, cell_type: &str) -> anyhow::Result<GeneTable> {
        let groups = select_groups(
            self.matrix,
            cell_type,
            &self.comparison.top,
            &self.comparison.bottom,
            self.overrides,
        )?;
        let subset = self.matrix.select_samples(&groups.column_order())?;
        let size_factors = comparison_size_factors(subset.counts(), groups.bottom.len(), self.yield_ratio)?;
        let design = DesignMatrix::replicate_treatment(&groups.replicate_per_sample(), &groups.treatment_per_sample())?;

        let results = subset.differential_expression(&design, &size_factors, &self.options)?;
        info!(
            "{} {}: {} replicates, {} of {} genes significant",
            self.name(),
            cell_type,
            groups.replicate_count(),
            results.num_significant(self.alpha),
            results.len()
        );

        let mut table = GeneTable::new(subset.genes().to_vec());
        table.push_numbers(
            &log2_column(self.comparison, cell_type),
            results.effect_sizes.unwrap_or_else(|| vec![None; subset.n_genes()]),
        )?;
        table.push_numbers(
            &padj_column(cell_type),
            results.adjusted_p_values.unwrap_or_else(|| vec![None; subset.n_genes()]),
        )?;
        Ok(table)
    }
}

/// Enriched/Noise labels read off a merged differential table.
pub struct ClassifierStage<'a> {
    pub table: &'a GeneTable,
    pub comparison: &'a Comparison,
    pub config: &'a EnrichmentConfig,
}

impl CellTypeStage for ClassifierStage<'_> {
    fn name(&self) -> String {
        "enrichment".to_string()
    }

    fn run(&self, cell_type: &str) -> anyhow::Result<GeneTable> {
        let lfc = self.table.numbers(&log2_column(self.comparison, cell_type))?;
        let padj = self.table.numbers(&padj_column(cell_type))?;
        let labels = classify_genes(&lfc, &padj, self.config.threshold_for(cell_type), self.config.alpha)?;

        let mut table = GeneTable::new(self.table.genes().to_vec());
        table.push_labels(&enrichment_column(cell_type), &labels)?;
        Ok(table)
    }
}

/// Mean, spread and noise of the normalized input libraries.
pub struct AbundanceStage<'a> {
    pub matrix: &'a CountMatrix,
    pub condition: &'a str,
    pub overrides: &'a ReplicateOverrides,
}

impl CellTypeStage for AbundanceStage<'_> {
    fn name(&self) -> String {
        format!("abundance {}", self.condition)
    }

    fn run(&self, cell_type: &str) -> anyhow::Result<GeneTable> {
        let columns = usable_samples(self.matrix, cell_type, self.condition, self.overrides)?;
        let stats = summarize_input(self.matrix, &columns)?;

        let mut table = GeneTable::new(self.matrix.genes().to_vec());
        table.push_numbers(&format!("{}.mean", cell_type), stats.iter().map(|s| s.mean).collect())?;
        table.push_numbers(&format!("{}.sd", cell_type), stats.iter().map(|s| s.sd).collect())?;
        table.push_numbers(&format!("{}.noise", cell_type), stats.iter().map(|s| s.noise).collect())?;
        Ok(table)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// One merged table per comparison, in configuration order.
    pub differential: Vec<(Comparison, GeneTable)>,
    pub enrichment: GeneTable,
    pub abundance: GeneTable,
    /// Target-over-baseline statistics, labels and abundance joined on gene.
    pub joined: GeneTable,
}

pub struct EnrichmentPipeline {
    config: EnrichmentConfig,
    overrides: ReplicateOverrides,
}

impl EnrichmentPipeline {
    pub fn new(config: EnrichmentConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let overrides = config.overrides();
        Ok(EnrichmentPipeline { config, overrides })
    }

    /// Aggregate sites to genes, then [`EnrichmentPipeline::run`].
    pub fn run_sites(&self, sites: &SiteTable) -> anyhow::Result<PipelineOutput> {
        let matrix = aggregate_sites(sites, &self.config.intergenic_label)?;
        self.run(&matrix)
    }

    pub fn run(&self, matrix: &CountMatrix) -> anyhow::Result<PipelineOutput> {
        let config = &self.config;
        info!(
            "Running {} comparisons over {} cell types on {} genes",
            config.comparisons.len(),
            config.cell_types.len(),
            matrix.n_genes()
        );

        let differential = config
            .comparisons
            .par_iter()
            .map(|comparison| {
                let stage = DifferentialStage {
                    matrix,
                    comparison,
                    overrides: &self.overrides,
                    yield_ratio: config.yield_ratio_for(comparison),
                    options: config.differential_options(),
                    alpha: config.alpha,
                };
                run_per_cell_type(&stage, &config.cell_types).map(|table| (comparison.clone(), table))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let enrichment_source = find_table(&differential, &config.enrichment_comparison).ok_or_else(|| {
            EnrichmentError::Config(format!(
                "enrichment comparison {} was not run",
                config.enrichment_comparison.id()
            ))
        })?;
        let enrichment = run_per_cell_type(
            &ClassifierStage {
                table: enrichment_source,
                comparison: &config.enrichment_comparison,
                config,
            },
            &config.cell_types,
        )?;

        let abundance = run_per_cell_type(
            &AbundanceStage {
                matrix,
                condition: &config.baseline_condition,
                overrides: &self.overrides,
            },
            &config.cell_types,
        )?;

        let reported = Comparison::new(&config.target_condition, &config.baseline_condition);
        let joined = match find_table(&differential, &reported) {
            Some(table) => GeneTable::outer_join_all([table, &enrichment, &abundance])?,
            None => GeneTable::outer_join_all([&enrichment, &abundance])?,
        };

        info!("Assembled {} genes x {} columns", joined.n_rows(), joined.columns().len());
        Ok(PipelineOutput {
            differential,
            enrichment,
            abundance,
            joined,
        })
    }
}

fn find_table<'a>(
    tables: &'a [(Comparison, GeneTable)],
    comparison: &Comparison,
) -> Option<&'a GeneTable> {
    tables.iter().find(|(c, _)| c == comparison).map(|(_, table)| table)
}
