//! Selection of the paired sample columns for one comparison in one cell type.
//!
//! Sample names encode `<cellType>_<replicate>_<condition>`. Replicates that
//! are known to be unusable are listed in a [`ReplicateOverrides`] map rather
//! than special-cased, so the selection logic can be tested on its own.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::counts::CountMatrix;
use crate::error::EnrichmentError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleLabel {
    pub cell_type: String,
    pub replicate: u8,
    pub condition: String,
}

impl FromStr for SampleLabel {
    type Err = EnrichmentError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let invalid = || EnrichmentError::InvalidSampleName(name.to_string());

        let mut parts = name.splitn(3, '_');
        let cell_type = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let replicate = parts.next().ok_or_else(invalid)?;
        let condition = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;

        if replicate.is_empty() || !replicate.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let replicate = replicate.parse::<u8>().map_err(|_| invalid())?;

        Ok(SampleLabel {
            cell_type: cell_type.to_string(),
            replicate,
            condition: condition.to_string(),
        })
    }
}

impl fmt::Display for SampleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.cell_type, self.replicate, self.condition)
    }
}

/// One entry of the replicate exception table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateOverride {
    pub cell_type: String,
    pub condition: String,
    /// Replicate levels that may be used; everything else is excluded.
    pub replicates: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicateOverrides {
    usable: BTreeMap<(String, String), Vec<u8>>,
}

impl ReplicateOverrides {
    pub fn new<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = ReplicateOverride>,
    {
        let usable = overrides
            .into_iter()
            .map(|o| {
                let mut replicates = o.replicates;
                replicates.sort_unstable();
                replicates.dedup();
                ((o.cell_type, o.condition), replicates)
            })
            .collect();
        ReplicateOverrides { usable }
    }

    /// The exceptions of the reference TIA1 experiment: the first IgG
    /// replicate of NPC and Neu is unusable.
    pub fn reference_exceptions() -> Vec<ReplicateOverride> {
        ["NPC", "Neu"]
            .iter()
            .map(|cell_type| ReplicateOverride {
                cell_type: cell_type.to_string(),
                condition: "IgG".to_string(),
                replicates: vec![2, 3],
            })
            .collect()
    }

    pub fn usable(&self, cell_type: &str, condition: &str) -> Option<&[u8]> {
        self.usable
            .get(&(cell_type.to_string(), condition.to_string()))
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.usable.is_empty()
    }
}

/// Aligned column indices of the bottom (reference) and top groups.
///
/// `bottom[k]` and `top[k]` both belong to replicate `replicates[k]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleGroups {
    pub cell_type: String,
    pub top_condition: String,
    pub bottom_condition: String,
    pub bottom: Vec<usize>,
    pub top: Vec<usize>,
    pub replicates: Vec<u8>,
}

impl SampleGroups {
    pub fn replicate_count(&self) -> usize {
        self.replicates.len()
    }

    /// Column indices in fitting order: bottom group first, then top.
    pub fn column_order(&self) -> Vec<usize> {
        self.bottom.iter().chain(self.top.iter()).copied().collect()
    }

    /// Replicate level of every column in [`SampleGroups::column_order`].
    pub fn replicate_per_sample(&self) -> Vec<u8> {
        self.replicates
            .iter()
            .chain(self.replicates.iter())
            .copied()
            .collect()
    }

    /// `true` for top-group columns in [`SampleGroups::column_order`].
    pub fn treatment_per_sample(&self) -> Vec<bool> {
        std::iter::repeat_n(false, self.bottom.len())
            .chain(std::iter::repeat_n(true, self.top.len()))
            .collect()
    }
}

/// Columns of `matrix` for one (cell type, condition), keyed by replicate.
///
/// Columns whose names do not parse as sample labels never match.
pub fn condition_samples(
    matrix: &CountMatrix,
    cell_type: &str,
    condition: &str,
) -> anyhow::Result<BTreeMap<u8, usize>> {
    let mut found = BTreeMap::new();

    for (idx, name) in matrix.samples().iter().enumerate() {
        let Ok(label) = name.parse::<SampleLabel>() else {
            continue;
        };
        if label.cell_type != cell_type || label.condition != condition {
            continue;
        }
        if found.insert(label.replicate, idx).is_some() {
            return Err(EnrichmentError::InvalidSampleName(format!("{} (duplicate replicate)", name)).into());
        }
    }

    if found.is_empty() {
        return Err(EnrichmentError::MissingSamples {
            cell_type: cell_type.to_string(),
            condition: condition.to_string(),
        }
        .into());
    }

    Ok(found)
}

fn restrict(samples: &mut BTreeMap<u8, usize>, usable: Option<&[u8]>) {
    if let Some(usable) = usable {
        samples.retain(|replicate, _| usable.contains(replicate));
    }
}

/// Pick the top and bottom columns of one cell type.
///
/// Overrides are looked up by the bottom condition and restrict both sides,
/// keeping the replicate factor aligned between the two treatment groups.
pub fn select_groups(
    matrix: &CountMatrix,
    cell_type: &str,
    top_condition: &str,
    bottom_condition: &str,
    overrides: &ReplicateOverrides,
) -> anyhow::Result<SampleGroups> {
    let mut top = condition_samples(matrix, cell_type, top_condition)?;
    let mut bottom = condition_samples(matrix, cell_type, bottom_condition)?;

    let usable = overrides.usable(cell_type, bottom_condition);
    restrict(&mut top, usable);
    restrict(&mut bottom, usable);

    for (side, condition) in [(&top, top_condition), (&bottom, bottom_condition)] {
        if side.is_empty() {
            return Err(EnrichmentError::MissingSamples {
                cell_type: cell_type.to_string(),
                condition: condition.to_string(),
            }
            .into());
        }
    }

    let top_replicates: Vec<u8> = top.keys().copied().collect();
    let bottom_replicates: Vec<u8> = bottom.keys().copied().collect();
    if top_replicates != bottom_replicates {
        return Err(EnrichmentError::UnalignedReplicates {
            cell_type: cell_type.to_string(),
            top: top_condition.to_string(),
            bottom: bottom_condition.to_string(),
            top_replicates,
            bottom_replicates,
        }
        .into());
    }

    Ok(SampleGroups {
        cell_type: cell_type.to_string(),
        top_condition: top_condition.to_string(),
        bottom_condition: bottom_condition.to_string(),
        bottom: bottom.into_values().collect(),
        top: top.into_values().collect(),
        replicates: top_replicates,
    })
}

/// Usable columns of one (cell type, condition), ordered by replicate.
pub fn usable_samples(
    matrix: &CountMatrix,
    cell_type: &str,
    condition: &str,
    overrides: &ReplicateOverrides,
) -> anyhow::Result<Vec<usize>> {
    let mut samples = condition_samples(matrix, cell_type, condition)?;
    restrict(&mut samples, overrides.usable(cell_type, condition));
    if samples.is_empty() {
        return Err(EnrichmentError::MissingSamples {
            cell_type: cell_type.to_string(),
            condition: condition.to_string(),
        }
        .into());
    }
    Ok(samples.into_values().collect())
}
