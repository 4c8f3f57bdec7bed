//! 3D cell regions
//!
//! The voxels returned by the [`Voxelizer`] are scaled by the region geometry and partitioned
//! among the segments of the region: each voxel belongs to the segment whose centerline is
//! nearest to the voxel center.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use crate::error::{Result, RxdError};
use crate::geometry::voxel::{distance_to_polyline, neighbors6};
use crate::geometry::{VoxelGrid, Voxelizer};
use crate::morphology::{Morphology, SegmentRef};
use crate::region::Region;

/// Occupied voxels of a 3D region and their segment assignment
#[derive(Debug, Clone)]
pub struct VoxelizedRegion {
    grid: VoxelGrid,
    voxels: Vec<[usize; 3]>,
    lookup: HashMap<[usize; 3], usize>,
    volumes: Vec<f64>,
    surface_areas: Vec<f64>,
    neighbor_area_fraction: f64,
    owners: Vec<SegmentRef>,
    nodes_by_segment: BTreeMap<SegmentRef, Vec<usize>>,
    surface_nodes_by_segment: BTreeMap<SegmentRef, Vec<usize>>,
}

impl VoxelizedRegion {
    /// Voxelize `region` and assign every voxel to a segment
    pub fn build(region: &Region, morphology: &Morphology, voxelizer: &dyn Voxelizer) -> Result<Self> {
        let (Some(dx), Some(geometry)) = (region.voxel_dx(), region.geometry()) else {
            return Err(RxdError::InvalidRegion(format!("region {} is not a 3D cell region", region.name())));
        };
        let scales = geometry.voxel_scales()?;
        let sections = region.ordered_sections(morphology)?;
        let grid = voxelizer.voxelize(morphology, &sections, dx)?;

        let voxels: Vec<[usize; 3]> = grid.occupied().into_iter().map(|(i, j, k)| [i, j, k]).collect();
        if voxels.is_empty() {
            return Err(RxdError::InvalidRegion(format!(
                "region {}: the voxelizer returned no voxels",
                region.name()
            )));
        }
        let lookup = voxels.iter().enumerate().map(|(local, v)| (*v, local)).collect();
        let volumes = voxels.iter().map(|v| grid.volumes[*v] * scales.volume).collect();
        let surface_areas = voxels.iter().map(|v| grid.surface_areas[*v] * scales.surface).collect();

        // nearest centerline wins
        let polylines: Vec<(SegmentRef, Vec<[f64; 3]>)> = sections
            .iter()
            .flat_map(|&id| morphology.section(id).map(|s| (id, s)))
            .flat_map(|(id, section)| {
                (0..section.nseg()).map(move |index| (SegmentRef::new(id, index), section.segment_polyline(index)))
            })
            .collect();
        if polylines.is_empty() {
            return Err(RxdError::InvalidRegion(format!("region {} has no segments", region.name())));
        }

        let mut owners = Vec::with_capacity(voxels.len());
        let mut nodes_by_segment: BTreeMap<SegmentRef, Vec<usize>> = BTreeMap::new();
        let mut surface_nodes_by_segment: BTreeMap<SegmentRef, Vec<usize>> = BTreeMap::new();

        for (local, &[i, j, k]) in voxels.iter().enumerate() {
            let center = grid.center(i, j, k);
            let mut best = (f64::INFINITY, polylines[0].0);
            for (segment, polyline) in &polylines {
                let distance = distance_to_polyline(center, polyline);
                if distance < best.0 {
                    best = (distance, *segment);
                }
            }
            owners.push(best.1);
            nodes_by_segment.entry(best.1).or_default().push(local);
            if grid.surface_areas[[i, j, k]] > 0.0 {
                surface_nodes_by_segment.entry(best.1).or_default().push(local);
            }
        }

        for (segment, _) in &polylines {
            if !surface_nodes_by_segment.contains_key(segment) {
                warn!(
                    "region {}: segment {}[{}] owns no surface voxels at dx = {dx}",
                    region.name(),
                    segment.section.0,
                    segment.index
                );
            }
        }
        debug!("region {}: {} voxels over {} segments", region.name(), voxels.len(), polylines.len());

        Ok(Self {
            grid,
            voxels,
            lookup,
            volumes,
            surface_areas,
            neighbor_area_fraction: scales.neighbor_area,
            owners,
            nodes_by_segment,
            surface_nodes_by_segment,
        })
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn dx(&self) -> f64 {
        self.grid.dx
    }

    /// Voxel indices of local node `local`
    pub fn voxel(&self, local: usize) -> [usize; 3] {
        self.voxels[local]
    }

    pub fn center(&self, local: usize) -> [f64; 3] {
        let [i, j, k] = self.voxels[local];
        self.grid.center(i, j, k)
    }

    pub fn local_index(&self, voxel: [usize; 3]) -> Option<usize> {
        self.lookup.get(&voxel).copied()
    }

    pub fn volume(&self, local: usize) -> f64 {
        self.volumes[local]
    }

    pub fn surface_area(&self, local: usize) -> f64 {
        self.surface_areas[local]
    }

    pub fn neighbor_area_fraction(&self) -> f64 {
        self.neighbor_area_fraction
    }

    pub fn owner(&self, local: usize) -> SegmentRef {
        self.owners[local]
    }

    pub fn nodes_by_segment(&self) -> &BTreeMap<SegmentRef, Vec<usize>> {
        &self.nodes_by_segment
    }

    pub fn surface_nodes_by_segment(&self) -> &BTreeMap<SegmentRef, Vec<usize>> {
        &self.surface_nodes_by_segment
    }

    /// Occupied face neighbors of `local` along +x, +y and +z, tagged with their axis
    pub fn forward_neighbors(&self, local: usize) -> Vec<(usize, usize)> {
        let [i, j, k] = self.voxels[local];
        let neighbors = neighbors6(i, j, k, self.grid.shape());
        [(1, 0), (3, 1), (5, 2)]
            .into_iter()
            .filter_map(|(slot, axis)| {
                neighbors[slot].and_then(|v| self.local_index(v)).map(|other| (other, axis))
            })
            .collect()
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CenterlineVoxelizer, Geometry};
    use crate::morphology::{Section, SectionId};

    fn two_segment_region() -> (Morphology, Region, SectionId) {
        let mut m = Morphology::new();
        let id = m.add_section(Section::cylinder("dend", [0.0; 3], 20.0, 4.0, 2).unwrap());
        let region = Region::new("cyt", vec![id], Geometry::Inside).unwrap().three_d(1.0).unwrap();
        (m, region, id)
    }

    #[test]
    fn test_every_voxel_assigned() {
        let (m, region, id) = two_segment_region();
        let voxels = VoxelizedRegion::build(&region, &m, &CenterlineVoxelizer).unwrap();

        let assigned: usize = voxels.nodes_by_segment().values().map(Vec::len).sum();
        assert_eq!(assigned, voxels.len());
        assert_eq!(voxels.nodes_by_segment().len(), 2);

        // voxels near x = 15 belong to the second segment
        let far = (0..voxels.len()).find(|&l| voxels.center(l)[0] > 15.0).unwrap();
        assert_eq!(voxels.owner(far), SegmentRef::new(id, 1));
    }

    #[test]
    fn test_fractional_volume_scales_voxels() {
        let (m, _, id) = two_segment_region();
        let region = Region::new("cyt", vec![id], Geometry::fractional_volume(0.5, 1.0, None).unwrap())
            .unwrap()
            .three_d(1.0)
            .unwrap();
        let voxels = VoxelizedRegion::build(&region, &m, &CenterlineVoxelizer).unwrap();

        assert!((voxels.volume(0) - 0.5).abs() < 1e-12);
        assert_eq!(voxels.neighbor_area_fraction(), 0.5);
    }

    #[test]
    fn test_forward_neighbors_are_occupied() {
        let (m, region, _) = two_segment_region();
        let voxels = VoxelizedRegion::build(&region, &m, &CenterlineVoxelizer).unwrap();

        for local in 0..voxels.len() {
            for (other, axis) in voxels.forward_neighbors(local) {
                let (a, b) = (voxels.voxel(local), voxels.voxel(other));
                assert_eq!(b[axis], a[axis] + 1);
            }
        }
    }
}
