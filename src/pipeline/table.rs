use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::EnrichmentError;

/// One cell of a gene table. Missing values are `None` at the column level.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Label(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Shortest round-trip form; scientific outside [1e-4, 1e15).
            Cell::Number(value)
                if *value != 0.0 && (value.abs() < 1e-4 || value.abs() >= 1e15) =>
            {
                write!(f, "{:e}", value)
            }
            Cell::Number(value) => write!(f, "{}", value),
            Cell::Label(label) => f.write_str(label),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Option<Cell>>,
}

/// Gene × metric table, stored column by column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneTable {
    genes: Vec<String>,
    columns: Vec<Column>,
}

impl GeneTable {
    pub fn new(genes: Vec<String>) -> Self {
        GeneTable {
            genes,
            columns: Vec::new(),
        }
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn n_rows(&self) -> usize {
        self.genes.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn push_column(&mut self, name: &str, cells: Vec<Option<Cell>>) -> anyhow::Result<()> {
        if cells.len() != self.genes.len() {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("{} cells in column {}", self.genes.len(), name),
                got: cells.len().to_string(),
            }
            .into());
        }
        if self.column(name).is_some() {
            return Err(EnrichmentError::DimensionMismatch {
                expected: format!("a unique column name, {} exists", name),
                got: name.to_string(),
            }
            .into());
        }
        self.columns.push(Column {
            name: name.to_string(),
            cells,
        });
        Ok(())
    }

    pub fn push_numbers(&mut self, name: &str, values: Vec<Option<f64>>) -> anyhow::Result<()> {
        self.push_column(name, values.into_iter().map(|v| v.map(Cell::Number)).collect())
    }

    pub fn push_labels<L: ToString>(&mut self, name: &str, labels: &[L]) -> anyhow::Result<()> {
        self.push_column(name, labels.iter().map(|l| Some(Cell::Label(l.to_string()))).collect())
    }

    /// Numeric view of a column; labels and missing cells read as `None`.
    pub fn numbers(&self, name: &str) -> anyhow::Result<Vec<Option<f64>>> {
        let column = self
            .column(name)
            .ok_or_else(|| EnrichmentError::MissingColumn(name.to_string()))?;
        Ok(column
            .cells
            .iter()
            .map(|cell| match cell {
                Some(Cell::Number(value)) => Some(*value),
                _ => None,
            })
            .collect())
    }

    /// Join on gene, keeping every gene of either table.
    ///
    /// Rows come out in lexicographic gene order; cells of genes a table does
    /// not contain are `None`.
    pub fn outer_join(&self, other: &GeneTable) -> anyhow::Result<GeneTable> {
        let genes: Vec<String> = self
            .genes
            .iter()
            .chain(other.genes.iter())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut joined = GeneTable::new(genes);
        for table in [self, other] {
            let positions: HashMap<&str, usize> = table
                .genes
                .iter()
                .enumerate()
                .map(|(i, g)| (g.as_str(), i))
                .collect();
            for column in &table.columns {
                let cells = joined
                    .genes
                    .iter()
                    .map(|g| positions.get(g.as_str()).and_then(|&i| column.cells[i].clone()))
                    .collect();
                joined.push_column(&column.name, cells)?;
            }
        }
        Ok(joined)
    }

    /// Outer join of any number of tables, left to right.
    pub fn outer_join_all<'a, I>(tables: I) -> anyhow::Result<GeneTable>
    where
        I: IntoIterator<Item = &'a GeneTable>,
    {
        tables
            .into_iter()
            .try_fold(GeneTable::default(), |acc, table| acc.outer_join(table))
    }
}
