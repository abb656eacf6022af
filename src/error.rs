//! Typed failure causes carried inside `anyhow::Error`.
//!
//! Public operations return `anyhow::Result`; when a caller needs to tell an
//! input-shape problem apart from a numerical one it can
//! `downcast_ref::<EnrichmentError>()`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrichmentError {
    /// No sample column matched `<cell_type>_<digit>_<condition>`.
    #[error("no samples found for cell type '{cell_type}' and condition '{condition}'")]
    MissingSamples { cell_type: String, condition: String },

    /// Top and bottom groups do not share the same replicate levels.
    #[error(
        "replicates of '{top}' ({top_replicates:?}) and '{bottom}' ({bottom_replicates:?}) do not align for cell type '{cell_type}'"
    )]
    UnalignedReplicates {
        cell_type: String,
        top: String,
        bottom: String,
        top_replicates: Vec<u8>,
        bottom_replicates: Vec<u8>,
    },

    #[error("sample name '{0}' does not follow <cellType>_<replicate>_<condition>")]
    InvalidSampleName(String),

    #[error("required column '{0}' is missing from the input table")]
    MissingColumn(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("invalid count {value} for gene '{gene}' in sample '{sample}'")]
    InvalidCount {
        gene: String,
        sample: String,
        value: f64,
    },

    #[error("size factor estimation failed: {0}")]
    SizeFactorFailed(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
