//! Extracellular discretization: one node per lattice voxel, lexicographic order

use std::ops::Range;

use crate::error::Result;
use crate::node::{NodeData, NodeLocation};
use crate::region::{BoundaryCondition, ExtracellularBox, RegionId};
use crate::species::{FieldKind, Species, SpeciesId};

/// One species on one extracellular region
#[derive(Debug, Clone)]
pub struct ExtracellularInstance {
    pub species: SpeciesId,
    pub region: RegionId,
    pub range: Range<usize>,
    pub grid: ExtracellularBox,
}

impl ExtracellularInstance {
    pub(crate) fn layout(
        species_id: SpeciesId,
        species: &Species,
        region_id: RegionId,
        grid: &ExtracellularBox,
        start: usize,
    ) -> Result<(Self, Vec<NodeData>)> {
        let parameter = species.kind() == FieldKind::Parameter;
        let nodes = (0..grid.voxel_count())
            .map(|index| {
                let [i, j, k] = grid.voxel(index);
                let (fixed, state) = match grid.boundary() {
                    BoundaryCondition::Dirichlet(value) if grid.is_border(i, j, k) => (true, value),
                    _ => (parameter, 0.0),
                };
                Ok(NodeData {
                    volume: grid.voxel_volume() * grid.alpha(i, j, k),
                    surface_area: 0.0,
                    diff: species.diffusion().at(grid.center(i, j, k))?,
                    position: grid.center(i, j, k),
                    state,
                    fixed,
                    location: NodeLocation::Extracellular { voxel: [i, j, k] },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let instance = Self {
            species: species_id,
            region: region_id,
            range: start..start + nodes.len(),
            grid: grid.clone(),
        };
        Ok((instance, nodes))
    }

    pub fn node(&self, voxel: [usize; 3]) -> usize {
        self.range.start + self.grid.linear_index(voxel[0], voxel[1], voxel[2])
    }

    /// Node of the voxel containing `point`
    pub fn node_containing(&self, point: [f64; 3]) -> Option<usize> {
        self.grid.voxel_at(point).map(|voxel| self.node(voxel))
    }
}
