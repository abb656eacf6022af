use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EnrichmentError;
use crate::grouping::{ReplicateOverride, ReplicateOverrides};
use crate::testing::correction::CorrectionMethod;
use crate::testing::inference::{DifferentialOptions, DispersionParams, GlmFitParams};

/// A `top` over `bottom` condition contrast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comparison {
    pub top: String,
    pub bottom: String,
}

impl Comparison {
    pub fn new(top: &str, bottom: &str) -> Self {
        Comparison {
            top: top.to_string(),
            bottom: bottom.to_string(),
        }
    }

    /// `<top>_<bottom>`, used in column and file names.
    pub fn id(&self) -> String {
        format!("{}_{}", self.top, self.bottom)
    }
}

/// Run configuration. Every field has a default, so an empty TOML document
/// describes the reference TIA1 experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub cell_types: Vec<String>,
    pub target_condition: String,
    pub baseline_condition: String,
    pub control_condition: String,
    pub comparisons: Vec<Comparison>,
    /// Comparison whose statistics drive the enrichment labels.
    pub enrichment_comparison: Comparison,
    /// `site_type` of rows dropped before aggregation.
    pub intergenic_label: String,
    /// Extra factor on the bottom size factors when the bottom condition is
    /// the isotype control.
    pub yield_ratio: f64,
    pub fold_change_threshold: f64,
    pub fold_change_thresholds: BTreeMap<String, f64>,
    pub alpha: f64,
    pub correction: CorrectionMethod,
    pub replicate_overrides: Vec<ReplicateOverride>,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        let target = "TIA1";
        let baseline = "Input";
        let control = "IgG";
        EnrichmentConfig {
            cell_types: vec!["ESC".to_string(), "NPC".to_string(), "Neu".to_string()],
            target_condition: target.to_string(),
            baseline_condition: baseline.to_string(),
            control_condition: control.to_string(),
            comparisons: vec![
                Comparison::new(target, baseline),
                Comparison::new(control, baseline),
                Comparison::new(target, control),
            ],
            enrichment_comparison: Comparison::new(target, control),
            intergenic_label: "intergenic".to_string(),
            yield_ratio: 1.5,
            fold_change_threshold: 0.58,
            fold_change_thresholds: BTreeMap::new(),
            alpha: 0.05,
            correction: CorrectionMethod::BenjaminiHochberg,
            replicate_overrides: ReplicateOverrides::reference_exceptions(),
            dispersion: DispersionParams::default(),
            glm: GlmFitParams::default(),
        }
    }
}

impl EnrichmentConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: EnrichmentConfig =
            toml::from_str(text).map_err(|e| EnrichmentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Log2 fold-change threshold for `cell_type`.
    pub fn threshold_for(&self, cell_type: &str) -> f64 {
        self.fold_change_thresholds
            .get(cell_type)
            .copied()
            .unwrap_or(self.fold_change_threshold)
    }

    /// Yield ratio for `comparison`, if its bottom condition is the control.
    pub fn yield_ratio_for(&self, comparison: &Comparison) -> Option<f64> {
        (comparison.bottom == self.control_condition).then_some(self.yield_ratio)
    }

    pub fn overrides(&self) -> ReplicateOverrides {
        ReplicateOverrides::new(self.replicate_overrides.iter().cloned())
    }

    pub fn differential_options(&self) -> DifferentialOptions {
        DifferentialOptions {
            dispersion: self.dispersion,
            glm: self.glm,
            correction: self.correction,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let fail = |msg: String| -> anyhow::Result<()> { Err(EnrichmentError::Config(msg).into()) };

        if self.cell_types.is_empty() {
            return fail("at least one cell type is required".to_string());
        }
        if self.comparisons.is_empty() {
            return fail("at least one comparison is required".to_string());
        }
        for comparison in self.comparisons.iter().chain([&self.enrichment_comparison]) {
            if comparison.top == comparison.bottom {
                return fail(format!("comparison {} contrasts a condition with itself", comparison.id()));
            }
        }
        if !self.comparisons.contains(&self.enrichment_comparison) {
            return fail(format!(
                "enrichment comparison {} is not among the comparisons",
                self.enrichment_comparison.id()
            ));
        }
        if !(self.yield_ratio.is_finite() && self.yield_ratio > 0.0) {
            return fail(format!("yield_ratio must be positive, got {}", self.yield_ratio));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return fail(format!("alpha must lie in (0, 1), got {}", self.alpha));
        }
        for (cell_type, threshold) in std::iter::once(("default", &self.fold_change_threshold))
            .chain(self.fold_change_thresholds.iter().map(|(k, v)| (k.as_str(), v)))
        {
            if !threshold.is_finite() {
                return fail(format!("fold-change threshold for {} is not finite", cell_type));
            }
        }
        let dispersion = &self.dispersion;
        // max_disp never drops below 10, so this keeps the search interval non-empty.
        if !(dispersion.min_disp > 0.0 && dispersion.min_disp < 10.0) {
            return fail(format!("min_disp must lie in (0, 10), got {}", dispersion.min_disp));
        }
        for (name, value) in [
            ("dispersion.log_alpha_tol", dispersion.log_alpha_tol),
            ("dispersion.outlier_sd", dispersion.outlier_sd),
            ("dispersion.min_prior_var", dispersion.min_prior_var),
            ("glm.beta_tol", self.glm.beta_tol),
            ("glm.min_mu", self.glm.min_mu),
            ("glm.beta_cap", self.glm.beta_cap),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return fail(format!("{} must be positive, got {}", name, value));
            }
        }
        if !(self.glm.ridge.is_finite() && self.glm.ridge >= 0.0) {
            return fail(format!("glm.ridge must be non-negative, got {}", self.glm.ridge));
        }
        if dispersion.grid_size < 3 {
            return fail(format!(
                "dispersion.grid_size must be at least 3, got {}",
                dispersion.grid_size
            ));
        }
        if self.glm.maxit == 0 {
            return fail("glm.maxit must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_reference_experiment() {
        let config = EnrichmentConfig::from_toml_str("").unwrap();
        assert_eq!(config, EnrichmentConfig::default());
        assert_eq!(config.comparisons.len(), 3);
        assert_eq!(config.threshold_for("ESC"), 0.58);
        assert_eq!(config.overrides().usable("NPC", "IgG"), Some(&[2u8, 3][..]));
    }

    #[test]
    fn test_yield_ratio_only_against_control() {
        let config = EnrichmentConfig::default();
        assert_eq!(config.yield_ratio_for(&Comparison::new("TIA1", "IgG")), Some(1.5));
        assert_eq!(config.yield_ratio_for(&Comparison::new("TIA1", "Input")), None);
        assert_eq!(config.yield_ratio_for(&Comparison::new("IgG", "Input")), None);
    }

    #[test]
    fn test_overrides_from_toml() {
        let text = r#"
            yield_ratio = 2.0
            correction = "bonferroni"

            [fold_change_thresholds]
            Neu = 1.0

            [[replicate_overrides]]
            cell_type = "ESC"
            condition = "Input"
            replicates = [1, 3]

            [glm]
            maxit = 50
        "#;
        let config = EnrichmentConfig::from_toml_str(text).unwrap();
        assert_eq!(config.yield_ratio, 2.0);
        assert_eq!(config.correction, CorrectionMethod::Bonferroni);
        assert_eq!(config.threshold_for("Neu"), 1.0);
        assert_eq!(config.threshold_for("NPC"), 0.58);
        assert_eq!(config.overrides().usable("ESC", "Input"), Some(&[1u8, 3][..]));
        assert_eq!(config.overrides().usable("NPC", "IgG"), None);
        assert_eq!(config.glm.maxit, 50);
        assert_eq!(config.glm.ridge, 1e-6);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for text in [
            "yield_ratio = 0.0",
            "alpha = 1.5",
            "cell_types = []",
            "[dispersion]\nmin_disp = 20.0",
            "[dispersion]\nlog_alpha_tol = 0.0",
            "[dispersion]\nmin_prior_var = 0.0",
            "[dispersion]\ngrid_size = 1",
            "[glm]\nbeta_tol = 0.0",
            "[glm]\nmin_mu = 0.0",
            "[glm]\nridge = -1.0",
            "[glm]\nmaxit = 0",
        ] {
            let err = EnrichmentConfig::from_toml_str(text).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<EnrichmentError>(), Some(EnrichmentError::Config(_))),
                "{} should be rejected",
                text
            );
        }
        assert!(EnrichmentConfig::from_toml_str("alpha = \"high\"").is_err());
    }

    #[test]
    fn test_min_disp_above_dispersion_ceiling_rejected() {
        let config = EnrichmentConfig {
            dispersion: DispersionParams {
                min_disp: 20.0,
                ..DispersionParams::default()
            },
            ..EnrichmentConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EnrichmentError>(),
            Some(EnrichmentError::Config(_))
        ));

        let tight = EnrichmentConfig {
            dispersion: DispersionParams {
                min_disp: 9.5,
                ..DispersionParams::default()
            },
            ..EnrichmentConfig::default()
        };
        assert!(tight.validate().is_ok());
    }
}
