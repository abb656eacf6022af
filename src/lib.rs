//! # ip-enrichment
//!
//! Differential enrichment of immunoprecipitation (IP) sequencing counts
//! against input and isotype-control (IgG) libraries, across several cell
//! types, to call the genes bound by a protein of interest.
//!
//! ## Core Features
//!
//! - **Aggregation**: site-level counts summed per gene, intergenic sites dropped
//! - **Normalization**: median-of-ratios size factors with an optional yield
//!   correction for control pulldowns
//! - **Differential testing**: negative-binomial GLM `~ replicate + treatment`
//!   with Cox-Reid dispersions shrunk toward a mean-dispersion trend, Wald
//!   tests and Benjamini-Hochberg correction
//! - **Enrichment calls**: Enriched/Noise from fold change and adjusted p-value
//! - **Abundance**: mean, spread and noise of normalized input counts
//!
//! ## Quick Start
//!
//! Build an [`pipeline::EnrichmentPipeline`] from an
//! [`config::EnrichmentConfig`] and run it on a [`counts::CountMatrix`] or a
//! [`counts::SiteTable`]. Lower-level pieces, such as the
//! [`testing::inference::MatrixStatTests`] trait, can be used on their own.
//!
//! ## Module Organization
//!
//! - **[`counts`]**: gene × sample matrices and site aggregation
//! - **[`grouping`]**: sample labels, replicate exceptions, paired column selection
//! - **[`normalization`]**: size factors
//! - **[`testing`]**: NB GLM, dispersion estimation, Wald tests, multiple testing correction
//! - **[`enrichment`]**: enrichment labels and abundance summaries
//! - **[`pipeline`]**: the comparison × cell type grid and gene tables
//! - **[`config`]**, **[`error`]**, **[`io`]**: configuration, error taxonomy, CSV adapters

pub mod config;
pub mod counts;
pub mod enrichment;
pub mod error;
pub mod grouping;
pub mod io;
pub mod normalization;
pub mod pipeline;
pub mod testing;
