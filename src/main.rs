use std::path::PathBuf;

use clap::Parser;
use log::info;

use ip_enrichment::config::EnrichmentConfig;
use ip_enrichment::io::{CountSource, CsvDirectorySink, CsvSiteReader, write_output};
use ip_enrichment::pipeline::EnrichmentPipeline;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Site-level count table (CSV)
    #[arg(short = 'c', long = "counts")]
    counts: PathBuf,
    /// Directory receiving the result tables
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
    /// TOML configuration; defaults describe the TIA1 experiment
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Log at debug level
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    let config = match &cli.config {
        Some(path) => EnrichmentConfig::from_path(path)?,
        None => EnrichmentConfig::default(),
    };
    let pipeline = EnrichmentPipeline::new(config)?;

    let sites = CsvSiteReader::from_path(&cli.counts)?.read_sites()?;
    let output = pipeline.run_sites(&sites)?;

    let mut sink = CsvDirectorySink::new(&cli.output);
    write_output(&mut sink, &output)?;
    info!("Done, results in {:?}", cli.output);
    Ok(())
}
