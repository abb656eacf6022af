use std::collections::HashMap;

pub mod correction;
pub mod inference;

pub mod utils;

/// Outcome of the Wald test for a single gene.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    /// Wald statistic of the tested coefficient
    pub statistic: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Effect size on the log2 scale
    pub effect_size: Option<f64>,
    /// Standard error of the effect size
    pub standard_error: Option<f64>,
}

impl TestResult {
    /// Create a new test result with minimal information
    pub fn new(statistic: f64, p_value: f64) -> Self {
        TestResult {
            statistic,
            p_value,
            effect_size: None,
            standard_error: None,
        }
    }

    /// Create a new test result with effect size
    pub fn with_effect_size(statistic: f64, p_value: f64, effect_size: f64) -> Self {
        TestResult {
            effect_size: Some(effect_size),
            ..TestResult::new(statistic, p_value)
        }
    }

    /// Add standard error to the result
    pub fn with_standard_error(mut self, se: f64) -> Self {
        self.standard_error = Some(se);
        self
    }
}

/// Per-gene results of one fit. `None` marks a gene that could not be
/// tested (all-zero counts, failed fit).
#[derive(Debug, Clone, PartialEq)]
pub struct MultipleTestResults {
    /// Wald statistics for each gene
    pub statistics: Vec<Option<f64>>,
    /// Raw (unadjusted) p-values
    pub p_values: Vec<Option<f64>>,
    /// Adjusted p-values (after multiple testing correction)
    pub adjusted_p_values: Option<Vec<Option<f64>>>,
    /// log2 fold changes
    pub effect_sizes: Option<Vec<Option<f64>>>,
    /// Standard errors of the log2 fold changes
    pub standard_errors: Option<Vec<Option<f64>>>,
    /// Feature-level numeric columns, e.g. base mean or dispersion
    pub feature_metadata: HashMap<String, Vec<Option<f64>>>,
    /// Global metadata about the test
    pub global_metadata: HashMap<String, String>,
}

impl MultipleTestResults {
    /// Create a new results object from p-values
    pub fn new(statistics: Vec<Option<f64>>, p_values: Vec<Option<f64>>) -> Self {
        MultipleTestResults {
            statistics,
            p_values,
            adjusted_p_values: None,
            effect_sizes: None,
            standard_errors: None,
            feature_metadata: HashMap::new(),
            global_metadata: HashMap::new(),
        }
    }

    /// Collect per-gene outcomes into columns.
    pub fn from_results(results: &[Option<TestResult>]) -> Self {
        let statistics = results.iter().map(|r| r.as_ref().map(|r| r.statistic)).collect();
        let p_values = results.iter().map(|r| r.as_ref().map(|r| r.p_value)).collect();
        let effect_sizes = results
            .iter()
            .map(|r| r.as_ref().and_then(|r| r.effect_size))
            .collect();
        let standard_errors = results
            .iter()
            .map(|r| r.as_ref().and_then(|r| r.standard_error))
            .collect();

        MultipleTestResults::new(statistics, p_values)
            .with_effect_sizes(effect_sizes)
            .with_standard_errors(standard_errors)
    }

    pub fn len(&self) -> usize {
        self.p_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p_values.is_empty()
    }

    /// Add adjusted p-values to the results
    pub fn with_adjusted_p_values(mut self, adjusted_p_values: Vec<Option<f64>>) -> Self {
        self.adjusted_p_values = Some(adjusted_p_values);
        self
    }

    /// Add effect sizes to the results
    pub fn with_effect_sizes(mut self, effect_sizes: Vec<Option<f64>>) -> Self {
        self.effect_sizes = Some(effect_sizes);
        self
    }

    pub fn with_standard_errors(mut self, standard_errors: Vec<Option<f64>>) -> Self {
        self.standard_errors = Some(standard_errors);
        self
    }

    pub fn with_feature_metadata(mut self, key: &str, values: Vec<Option<f64>>) -> Self {
        self.feature_metadata.insert(key.to_string(), values);
        self
    }

    /// Add global metadata about the test
    pub fn with_global_metadata(mut self, key: &str, value: &str) -> Self {
        self.global_metadata
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Get indices of significant features at the given threshold.
    /// Untested genes are never significant.
    pub fn significant_indices(&self, alpha: f64) -> Vec<usize> {
        let p_values = self.adjusted_p_values.as_ref().unwrap_or(&self.p_values);
        p_values
            .iter()
            .enumerate()
            .filter_map(|(i, p)| match p {
                Some(p) if *p < alpha => Some(i),
                _ => None,
            })
            .collect()
    }

    /// Get the number of significant features at the given threshold
    pub fn num_significant(&self, alpha: f64) -> usize {
        self.significant_indices(alpha).len()
    }
}
