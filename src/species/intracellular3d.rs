//! 3D intracellular discretization: one node per occupied voxel, in voxel order

use std::ops::Range;
use std::sync::Arc;

use crate::error::Result;
use crate::node::{NodeData, NodeLocation};
use crate::region::{RegionId, VoxelizedRegion};
use crate::species::{FieldKind, Species, SpeciesId};

/// One species on one 3D cell region
#[derive(Debug, Clone)]
pub struct Intracellular3D {
    pub species: SpeciesId,
    pub region: RegionId,
    pub range: Range<usize>,
    pub voxels: Arc<VoxelizedRegion>,
}

impl Intracellular3D {
    pub(crate) fn layout(
        species_id: SpeciesId,
        species: &Species,
        region_id: RegionId,
        voxels: Arc<VoxelizedRegion>,
        start: usize,
    ) -> Result<(Self, Vec<NodeData>)> {
        let fixed = species.kind() == FieldKind::Parameter;
        let nodes = (0..voxels.len())
            .map(|local| {
                Ok(NodeData {
                    volume: voxels.volume(local),
                    surface_area: voxels.surface_area(local),
                    diff: species.diffusion().at(voxels.center(local))?,
                    position: voxels.center(local),
                    state: 0.0,
                    fixed,
                    location: NodeLocation::Voxel { voxel: voxels.voxel(local), segment: voxels.owner(local) },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let instance = Self { species: species_id, region: region_id, range: start..start + nodes.len(), voxels };
        Ok((instance, nodes))
    }

    /// Global node of local voxel `local`
    pub fn node(&self, local: usize) -> usize {
        self.range.start + local
    }

    /// Global node of voxel `(i, j, k)`, if occupied
    pub fn node_at(&self, voxel: [usize; 3]) -> Option<usize> {
        self.voxels.local_index(voxel).map(|local| self.node(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::geometry::{CenterlineVoxelizer, Geometry};
    use crate::morphology::{Morphology, Section};
    use crate::region::Region;

    #[test]
    fn test_layout_one_node_per_voxel() {
        let mut m = Morphology::new();
        let id = m.add_section(Section::cylinder("soma", [0.0; 3], 6.0, 4.0, 1).unwrap());
        let region = Region::new("cyt", vec![id], Geometry::Inside).unwrap().three_d(1.0).unwrap();
        let voxels = Arc::new(VoxelizedRegion::build(&region, &m, &CenterlineVoxelizer).unwrap());

        let region_id = Arena::new("region").insert(region);
        let species = Species::new(vec![region_id]).with_diffusion([1.0, 2.0, 3.0]);
        let species_id = Arena::new("species").insert(species.clone());

        let (instance, nodes) = Intracellular3D::layout(species_id, &species, region_id, voxels.clone(), 4).unwrap();

        assert_eq!(nodes.len(), voxels.len());
        assert_eq!(instance.range, 4..4 + voxels.len());
        assert_eq!(nodes[0].diff, [1.0, 2.0, 3.0]);
        assert_eq!(instance.node_at(voxels.voxel(3)), Some(7));
    }
}
