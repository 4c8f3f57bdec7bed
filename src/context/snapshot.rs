//! Persisted node states
//!
//! A [`Snapshot`] is the flat state vector plus enough metadata to refuse restoring it into a
//! context laid out differently.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RxdError};

use super::ReactionDiffusionContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSpecies {
    pub index: usize,
    pub generation: u32,
    pub name: Option<String>,
    /// Node ranges of each instance, in layout order
    pub ranges: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRegion {
    pub index: usize,
    pub generation: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub node_count: usize,
    pub states: Vec<f64>,
    pub species: Vec<SnapshotSpecies>,
    pub regions: Vec<SnapshotRegion>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Same layout as `other`, states aside
    fn compatible(&self, other: &Snapshot) -> bool {
        self.node_count == other.node_count && self.species == other.species && self.regions == other.regions
    }
}

impl ReactionDiffusionContext {
    pub fn snapshot(&self) -> Snapshot {
        let species = self
            .species
            .iter()
            .map(|(id, species)| SnapshotSpecies {
                index: id.index(),
                generation: id.generation(),
                name: species.name().map(str::to_string),
                ranges: self
                    .instances
                    .iter()
                    .filter(|i| i.species() == id)
                    .map(|i| (i.range().start, i.range().end))
                    .collect(),
            })
            .collect();
        let regions = self
            .regions
            .iter()
            .map(|(id, region)| SnapshotRegion {
                index: id.index(),
                generation: id.generation(),
                name: region.name().to_string(),
            })
            .collect();

        Snapshot {
            node_count: self.nodes.len(),
            states: self.nodes.states().iter().copied().collect(),
            species,
            regions,
        }
    }

    /// Overwrite the node states; the layout must match the one the snapshot was taken from
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        let current = self.snapshot();
        if !current.compatible(snapshot) || snapshot.states.len() != snapshot.node_count {
            return Err(RxdError::StructuralConflict(format!(
                "snapshot of {} nodes does not match the current layout of {} nodes",
                snapshot.node_count, current.node_count
            )));
        }
        if let Some(node) = snapshot.states.iter().position(|s| !s.is_finite()) {
            return Err(RxdError::NonFiniteState { node, step: self.steps });
        }
        self.nodes.states_mut().copy_from_slice(&snapshot.states);
        self.jacobian = None;
        Ok(())
    }
}
