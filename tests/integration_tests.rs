// End-to-end checks: the differential estimator on hand-made genes, and the
// full comparison × cell type pipeline on a synthetic experiment.

#[cfg(test)]
mod integration_tests {
    use approx::assert_relative_eq;
    use ip_enrichment::config::EnrichmentConfig;
    use ip_enrichment::counts::CountMatrix;
    use ip_enrichment::enrichment::{EnrichmentLabel, classify};
    use ip_enrichment::error::EnrichmentError;
    use ip_enrichment::io::write_csv;
    use ip_enrichment::pipeline::{Cell, EnrichmentPipeline, GeneTable};
    use ip_enrichment::testing::inference::{DesignMatrix, DifferentialOptions, MatrixStatTests};
    use ndarray::{Array1, Array2, array};

    fn paired_samples() -> Vec<String> {
        ["ESC_1_IgG", "ESC_2_IgG", "ESC_3_IgG", "ESC_1_TIA1", "ESC_2_TIA1", "ESC_3_TIA1"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn paired_design() -> DesignMatrix {
        let treated = [false, false, false, true, true, true];
        DesignMatrix::replicate_treatment(&[1, 2, 3, 1, 2, 3], &treated).unwrap()
    }

    /// Deterministic multiplicative noise in `[1 - spread/2, 1 + spread/2)`.
    struct Jitter(u64);

    impl Jitter {
        fn next(&mut self, spread: f64) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let u = (self.0 >> 11) as f64 / (1u64 << 53) as f64;
            1.0 + spread * (u - 0.5)
        }
    }

    const BOUND: &str = "G05";
    const DEPLETED: &str = "G10";
    const SILENT: &str = "ZZZ";

    /// 40 expressed genes plus one silent gene, three cell types, three
    /// conditions, three replicates. `G05` is eightfold higher in TIA1 and
    /// `G10` fourfold lower.
    fn synthetic_experiment() -> CountMatrix {
        let mut samples = Vec::new();
        for cell in ["ESC", "NPC", "Neu"] {
            for condition in ["Input", "TIA1", "IgG"] {
                for rep in 1..=3 {
                    samples.push((cell, condition, rep));
                }
            }
        }

        let mut genes: Vec<String> = (0..40).map(|i| format!("G{:02}", i)).collect();
        genes.push(SILENT.to_string());

        let mut jitter = Jitter(42);
        let mut counts = Array2::<f64>::zeros((genes.len(), samples.len()));
        for (g, gene) in genes.iter().enumerate() {
            if gene == SILENT {
                continue;
            }
            let base = 20.0 + 25.0 * g as f64;
            for (s, &(_, condition, rep)) in samples.iter().enumerate() {
                let depth = match condition {
                    "Input" => 1.0,
                    "TIA1" => 0.7,
                    _ => 0.4,
                };
                let replicate = [1.0, 1.3, 0.8][rep - 1];
                let binding = match (gene.as_str(), condition) {
                    (BOUND, "TIA1") => 8.0,
                    (DEPLETED, "TIA1") => 0.25,
                    _ => 1.0,
                };
                counts[[g, s]] = (base * depth * replicate * binding * jitter.next(0.3)).round();
            }
        }

        let names = samples
            .iter()
            .map(|(cell, condition, rep)| format!("{}_{}_{}", cell, rep, condition))
            .collect();
        CountMatrix::new(counts, genes, names).unwrap()
    }

    fn label(table: &GeneTable, column: &str, gene: &str) -> Option<Cell> {
        let row = table.genes().iter().position(|g| g == gene)?;
        table.column(column)?.cells[row].clone()
    }

    fn to_csv(table: &GeneTable) -> Vec<u8> {
        let mut buffer = Vec::new();
        write_csv(&mut buffer, table).unwrap();
        buffer
    }

    #[test]
    fn doubled_gene_is_enriched_and_flat_gene_is_noise() {
        let matrix = CountMatrix::new(
            array![
                [100.0, 120.0, 80.0, 200.0, 240.0, 160.0],
                [300.0, 310.0, 290.0, 300.0, 310.0, 290.0]
            ],
            vec!["A".to_string(), "B".to_string()],
            paired_samples(),
        )
        .unwrap();

        let results = matrix
            .differential_expression(&paired_design(), &Array1::ones(6), &DifferentialOptions::default())
            .unwrap();
        let lfc = results.effect_sizes.clone().unwrap();
        let padj = results.adjusted_p_values.clone().unwrap();

        assert_relative_eq!(lfc[0].unwrap(), 1.0, epsilon = 1e-4);
        assert!(padj[0].unwrap() < 1e-6);
        assert_relative_eq!(lfc[1].unwrap(), 0.0, epsilon = 1e-4);
        assert!(padj[1].unwrap() > 0.9);

        assert_eq!(classify(lfc[0], padj[0], 0.58, 0.05), EnrichmentLabel::Enriched);
        assert_eq!(classify(lfc[1], padj[1], 0.58, 0.05), EnrichmentLabel::Noise);
    }

    #[test]
    fn yield_correction_matches_scaling_the_control_counts() {
        let c = 1.5;
        let counts = array![
            [100.0, 120.0, 80.0, 300.0, 360.0, 240.0],
            [50.0, 40.0, 60.0, 50.0, 40.0, 60.0],
            [400.0, 500.0, 450.0, 200.0, 250.0, 225.0]
        ];
        let genes = vec!["A".to_string(), "B".to_string(), "C".to_string()];

        let scaled_factors = array![c, c, c, 1.0, 1.0, 1.0];
        let with_factors = CountMatrix::new(counts.clone(), genes.clone(), paired_samples())
            .unwrap()
            .differential_expression(&paired_design(), &scaled_factors, &DifferentialOptions::default())
            .unwrap();

        let mut scaled_counts = counts;
        scaled_counts.slice_mut(ndarray::s![.., ..3]).mapv_inplace(|v| v / c);
        let with_counts = CountMatrix::new(scaled_counts, genes, paired_samples())
            .unwrap()
            .differential_expression(&paired_design(), &Array1::ones(6), &DifferentialOptions::default())
            .unwrap();

        let a = with_factors.effect_sizes.unwrap();
        let b = with_counts.effect_sizes.unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x.unwrap(), y.unwrap(), epsilon = 1e-4);
        }
        assert_relative_eq!(a[0].unwrap(), (3.0 * c).log2(), epsilon = 1e-4);
    }

    #[test]
    fn yield_correction_on_a_noisy_matrix() {
        // Under NB the variance depends on the count scale, so a size factor and
        // a rescaled count weight the replicates slightly differently. The
        // estimates agree closely but not exactly.
        let c = 1.5;
        let n_genes = 250;
        let mut jitter = Jitter(7);
        let mut counts = Array2::<f64>::zeros((n_genes, 6));
        for g in 0..n_genes {
            let base = 30.0 + 970.0 * (jitter.next(1.0) - 0.5);
            let effect = match g % 5 {
                0 => 4.0,
                1 => 0.5,
                _ => 1.0,
            };
            for s in 0..6 {
                let replicate = [1.0, 1.3, 0.8][s % 3];
                let treatment = if s < 3 { c } else { effect };
                counts[[g, s]] = (base * replicate * treatment * jitter.next(0.4)).round();
            }
        }
        let genes: Vec<String> = (0..n_genes).map(|g| format!("N{:03}", g)).collect();

        let with_factors = CountMatrix::new(counts.clone(), genes.clone(), paired_samples())
            .unwrap()
            .differential_expression(
                &paired_design(),
                &array![c, c, c, 1.0, 1.0, 1.0],
                &DifferentialOptions::default(),
            )
            .unwrap();

        let mut scaled_counts = counts;
        scaled_counts.slice_mut(ndarray::s![.., ..3]).mapv_inplace(|v| v / c);
        let with_counts = CountMatrix::new(scaled_counts, genes, paired_samples())
            .unwrap()
            .differential_expression(
                &paired_design(),
                &Array1::ones(6),
                &DifferentialOptions::default(),
            )
            .unwrap();

        let a = with_factors.effect_sizes.unwrap();
        let b = with_counts.effect_sizes.unwrap();
        let differences: Vec<f64> = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x.unwrap() - y.unwrap()).abs())
            .collect();
        let worst = differences.iter().cloned().fold(0.0, f64::max);
        let typical = differences.iter().sum::<f64>() / n_genes as f64;

        assert!(worst < 0.1, "largest log2 fold change difference {}", worst);
        assert!(typical < 0.02, "mean log2 fold change difference {}", typical);
    }

    #[test]
    fn pipeline_calls_the_bound_gene() {
        let pipeline = EnrichmentPipeline::new(EnrichmentConfig::default()).unwrap();
        let output = pipeline.run(&synthetic_experiment()).unwrap();

        assert_eq!(output.differential.len(), 3);
        let ids: Vec<String> = output.differential.iter().map(|(c, _)| c.id()).collect();
        assert_eq!(ids, vec!["TIA1_Input", "IgG_Input", "TIA1_IgG"]);

        let joined = &output.joined;
        assert_eq!(joined.n_rows(), 41);
        for cell in ["ESC", "NPC", "Neu"] {
            for column in [
                format!("log2_TIA1_Input_{}", cell),
                format!("padj_{}", cell),
                format!("{}.enrichment", cell),
                format!("{}.mean", cell),
                format!("{}.sd", cell),
                format!("{}.noise", cell),
            ] {
                assert!(joined.column(&column).is_some(), "missing {}", column);
            }

            let enrichment = format!("{}.enrichment", cell);
            assert_eq!(label(joined, &enrichment, BOUND), Some(Cell::Label("Enriched".to_string())));
            assert_eq!(label(joined, &enrichment, DEPLETED), Some(Cell::Label("Noise".to_string())));
            assert_eq!(label(joined, &enrichment, SILENT), Some(Cell::Label("Noise".to_string())));

            match label(joined, &format!("log2_TIA1_Input_{}", cell), BOUND) {
                Some(Cell::Number(lfc)) => assert!(lfc > 2.0, "{} lfc {}", cell, lfc),
                other => panic!("unexpected cell {:?}", other),
            }
            assert_eq!(label(joined, &format!("log2_TIA1_Input_{}", cell), SILENT), None);
            assert_eq!(label(joined, &format!("{}.noise", cell), SILENT), None);
            assert_eq!(label(joined, &format!("{}.mean", cell), SILENT), Some(Cell::Number(0.0)));
        }
    }

    #[test]
    fn pipeline_output_is_reproducible() {
        let matrix = synthetic_experiment();
        let pipeline = EnrichmentPipeline::new(EnrichmentConfig::default()).unwrap();

        let first = pipeline.run(&matrix).unwrap();
        let second = pipeline.run(&matrix).unwrap();

        assert_eq!(to_csv(&first.joined), to_csv(&second.joined));
        for ((_, a), (_, b)) in first.differential.iter().zip(second.differential.iter()) {
            assert_eq!(to_csv(a), to_csv(b));
        }
    }

    #[test]
    fn unknown_cell_type_is_a_configuration_error() {
        let config = EnrichmentConfig {
            cell_types: vec!["ESC".to_string(), "Mes".to_string()],
            ..EnrichmentConfig::default()
        };
        let pipeline = EnrichmentPipeline::new(config).unwrap();
        let err = pipeline.run(&synthetic_experiment()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<EnrichmentError>(),
            Some(EnrichmentError::MissingSamples { cell_type, .. }) if cell_type == "Mes"
        ));
    }
}
