//! Tabular collaborators: where site counts come from and where gene tables go.
//!
//! The pipeline only sees the [`CountSource`] and [`TableSink`] traits; the
//! CSV implementations here are thin and carry no statistics.

use std::fs::{File, create_dir_all};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use csv::{ReaderBuilder, StringRecord, Writer};
use log::info;

use crate::counts::{SiteRecord, SiteTable};
use crate::error::EnrichmentError;
use crate::grouping::SampleLabel;
use crate::pipeline::{GeneTable, PipelineOutput};

/// Columns every site table must carry, besides the sample columns.
pub const REQUIRED_COLUMNS: [&str; 6] = ["gene", "chr", "region_start", "region_end", "strand", "site_type"];

pub trait CountSource {
    fn read_sites(&mut self) -> anyhow::Result<SiteTable>;
}

pub trait TableSink {
    /// Store `table` under `name` (without extension).
    fn write_table(&mut self, name: &str, table: &GeneTable) -> anyhow::Result<()>;
}

/// Site table in CSV form with a header row.
///
/// Every column not in [`REQUIRED_COLUMNS`] is a sample column and must be
/// named `<cellType>_<replicate>_<condition>`. Empty fields are missing.
pub struct CsvSiteReader<R: Read> {
    reader: csv::Reader<R>,
}

impl CsvSiteReader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open count table: {:?}", path))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: Read> CsvSiteReader<R> {
    pub fn from_reader(reader: R) -> Self {
        CsvSiteReader {
            reader: ReaderBuilder::new().has_headers(true).from_reader(reader),
        }
    }
}

fn column_position(headers: &StringRecord, name: &str) -> anyhow::Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| EnrichmentError::MissingColumn(name.to_string()).into())
}

impl<R: Read> CountSource for CsvSiteReader<R> {
    fn read_sites(&mut self) -> anyhow::Result<SiteTable> {
        let headers = self.reader.headers()?.clone();

        let positions = REQUIRED_COLUMNS
            .iter()
            .map(|name| column_position(&headers, name))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let (gene_col, site_type_col) = (positions[0], positions[5]);

        let mut sample_cols = Vec::new();
        let mut samples = Vec::new();
        for (idx, name) in headers.iter().enumerate() {
            if REQUIRED_COLUMNS.contains(&name) {
                continue;
            }
            name.parse::<SampleLabel>()?;
            sample_cols.push(idx);
            samples.push(name.to_string());
        }

        let mut table = SiteTable::new(samples);
        for (line, result) in self.reader.records().enumerate() {
            let record = result?;
            let gene = record.get(gene_col).unwrap_or_default().to_string();
            let site_type = record.get(site_type_col).unwrap_or_default().to_string();

            let counts = sample_cols
                .iter()
                .map(|&col| match record.get(col).map(str::trim) {
                    None | Some("") => Ok(None),
                    Some(field) => field
                        .parse::<f64>()
                        .map(Some)
                        .with_context(|| format!("Invalid count '{}' in row {} column {}", field, line + 1, &headers[col])),
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            table.push(SiteRecord { gene, site_type, counts })?;
        }

        info!("Read {} sites across {} samples", table.records.len(), table.samples.len());
        Ok(table)
    }
}

/// Write `table` as CSV: a `gene` column, then one column per metric.
/// Missing cells are empty fields.
pub fn write_csv<W: Write>(writer: W, table: &GeneTable) -> anyhow::Result<()> {
    let mut writer = Writer::from_writer(writer);

    let mut header = vec!["gene"];
    header.extend(table.column_names());
    writer.write_record(&header)?;

    for (row, gene) in table.genes().iter().enumerate() {
        let mut fields = vec![gene.clone()];
        fields.extend(table.columns().iter().map(|column| match &column.cells[row] {
            Some(cell) => cell.to_string(),
            None => String::new(),
        }));
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

/// One `<name>.csv` per table in a directory, created on first use.
pub struct CsvDirectorySink {
    directory: PathBuf,
}

impl CsvDirectorySink {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        CsvDirectorySink {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.csv", name))
    }
}

impl TableSink for CsvDirectorySink {
    fn write_table(&mut self, name: &str, table: &GeneTable) -> anyhow::Result<()> {
        create_dir_all(&self.directory)
            .with_context(|| format!("Failed to create output directory: {:?}", self.directory))?;
        let path = self.path_for(name);
        let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        write_csv(file, table)?;
        info!("Wrote {} rows to {:?}", table.n_rows(), path);
        Ok(())
    }
}

/// Every table of a run: `differential_<top>_<bottom>` per comparison,
/// then `enrichment`, `abundance` and `joined`.
pub fn write_output<S: TableSink + ?Sized>(
    sink: &mut S,
    output: &PipelineOutput,
) -> anyhow::Result<()> {
    for (comparison, table) in &output.differential {
        sink.write_table(&format!("differential_{}", comparison.id()), table)?;
    }
    sink.write_table("enrichment", &output.enrichment)?;
    sink.write_table("abundance", &output.abundance)?;
    sink.write_table("joined", &output.joined)?;
    Ok(())
}
