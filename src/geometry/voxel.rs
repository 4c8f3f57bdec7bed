//! Voxelization
//!
//! Turning membrane geometry into voxel volumes and surface areas is a geometry-kernel concern
//! outside of the engine. The engine consumes it through [`Voxelizer`] and only relies on the
//! per-voxel scalars of the returned [`VoxelGrid`].
//!
//! [`CenterlineVoxelizer`] is a simple kernel: a voxel belongs to the cell when its center lies
//! within the (interpolated) radius of a section centerline. Its surface area is one face per
//! neighbor that lies outside the cell.

use ndarray::Array3;

use crate::error::{Result, RxdError};
use crate::morphology::{Morphology, SectionId};

/// Per-voxel volume and membrane area on a regular grid
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    /// Lower corner of voxel `(0, 0, 0)`
    pub origin: [f64; 3],
    /// Edge length of a voxel (µm)
    pub dx: f64,
    /// Volume inside the region (µm³); zero for voxels outside
    pub volumes: Array3<f64>,
    /// Membrane area inside each voxel (µm²)
    pub surface_areas: Array3<f64>,
}

impl VoxelGrid {
    /// Grid with every voxel empty
    pub fn empty(origin: [f64; 3], dx: f64, shape: (usize, usize, usize)) -> Self {
        Self {
            origin,
            dx,
            volumes: Array3::zeros(shape),
            surface_areas: Array3::zeros(shape),
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.volumes.dim()
    }

    /// Center of voxel `(i, j, k)`
    pub fn center(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        [
            self.origin[0] + (i as f64 + 0.5) * self.dx,
            self.origin[1] + (j as f64 + 0.5) * self.dx,
            self.origin[2] + (k as f64 + 0.5) * self.dx,
        ]
    }

    /// Voxels with positive volume, in (i, j, k) lexicographic order
    pub fn occupied(&self) -> Vec<(usize, usize, usize)> {
        self.volumes
            .indexed_iter()
            .filter(|(_, v)| **v > 0.0)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Source of voxel grids for 3D regions
pub trait Voxelizer: Send + Sync {
    /// Voxelize `sections` at resolution `dx`
    fn voxelize(&self, morphology: &Morphology, sections: &[SectionId], dx: f64) -> Result<VoxelGrid>;

    /// Name (used for logging)
    fn name(&self) -> &str;
}

// =================================================================================================
// Centerline voxelizer
// =================================================================================================

/// Voxelizer testing voxel centers against section centerlines
#[derive(Debug, Clone, Copy, Default)]
pub struct CenterlineVoxelizer;

impl CenterlineVoxelizer {
    pub fn new() -> Self {
        Self
    }
}

impl Voxelizer for CenterlineVoxelizer {
    fn voxelize(&self, morphology: &Morphology, sections: &[SectionId], dx: f64) -> Result<VoxelGrid> {
        if !(dx > 0.0 && dx.is_finite()) {
            return Err(RxdError::InvalidRegion(format!("voxel size must be positive, got {dx}")));
        }

        let mut cones = Vec::new();
        for &id in sections {
            let points = morphology.section(id)?.points();
            cones.extend(points.windows(2).map(|pair| {
                (pair[0].position(), pair[1].position(), pair[0].diam / 2.0, pair[1].diam / 2.0)
            }));
        }
        if cones.is_empty() {
            return Err(RxdError::InvalidRegion("nothing to voxelize".into()));
        }

        // bounding box padded by one voxel
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for (a, b, ra, rb) in &cones {
            let r = ra.max(*rb);
            for axis in 0..3 {
                lo[axis] = lo[axis].min(a[axis].min(b[axis]) - r);
                hi[axis] = hi[axis].max(a[axis].max(b[axis]) + r);
            }
        }
        let origin = [lo[0] - dx, lo[1] - dx, lo[2] - dx];
        let count = |axis: usize| ((hi[axis] - lo[axis]) / dx).ceil() as usize + 2;
        let mut grid = VoxelGrid::empty(origin, dx, (count(0), count(1), count(2)));

        let (nx, ny, nz) = grid.shape();
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    let center = grid.center(i, j, k);
                    if cones.iter().any(|(a, b, ra, rb)| inside_cone(center, *a, *b, *ra, *rb)) {
                        grid.volumes[[i, j, k]] = dx * dx * dx;
                    }
                }
            }
        }

        // one face of membrane per empty neighbor
        let face = dx * dx;
        for (i, j, k) in grid.occupied() {
            let exposed = neighbors6(i, j, k, (nx, ny, nz))
                .iter()
                .filter(|n| match n {
                    Some(index) => grid.volumes[*index] <= 0.0,
                    None => true,
                })
                .count();
            grid.surface_areas[[i, j, k]] = exposed as f64 * face;
        }

        Ok(grid)
    }

    fn name(&self) -> &str {
        "centerline"
    }
}

/// The 6 face neighbors of `(i, j, k)`; `None` outside of the grid
///
/// Order: -x, +x, -y, +y, -z, +z.
pub(crate) fn neighbors6(i: usize, j: usize, k: usize, shape: (usize, usize, usize)) -> [Option<[usize; 3]>; 6] {
    let (nx, ny, nz) = shape;
    [
        i.checked_sub(1).map(|i| [i, j, k]),
        (i + 1 < nx).then_some([i + 1, j, k]),
        j.checked_sub(1).map(|j| [i, j, k]),
        (j + 1 < ny).then_some([i, j + 1, k]),
        k.checked_sub(1).map(|k| [i, j, k]),
        (k + 1 < nz).then_some([i, j, k + 1]),
    ]
}

/// Projection parameter and distance of `point` onto segment `a → b`
fn project(point: [f64; 3], a: [f64; 3], b: [f64; 3]) -> (f64, f64) {
    let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let ap = [point[0] - a[0], point[1] - a[1], point[2] - a[2]];
    let length2 = ab[0] * ab[0] + ab[1] * ab[1] + ab[2] * ab[2];
    let t = if length2 > 0.0 {
        ((ap[0] * ab[0] + ap[1] * ab[1] + ap[2] * ab[2]) / length2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let closest = [a[0] + t * ab[0], a[1] + t * ab[1], a[2] + t * ab[2]];
    let distance = ((point[0] - closest[0]).powi(2)
        + (point[1] - closest[1]).powi(2)
        + (point[2] - closest[2]).powi(2))
    .sqrt();
    (t, distance)
}

/// Point inside the truncated cone `a → b` (flat end caps)
fn inside_cone(point: [f64; 3], a: [f64; 3], b: [f64; 3], ra: f64, rb: f64) -> bool {
    let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let ap = [point[0] - a[0], point[1] - a[1], point[2] - a[2]];
    let along = ap[0] * ab[0] + ap[1] * ab[1] + ap[2] * ab[2];
    let length2 = ab[0] * ab[0] + ab[1] * ab[1] + ab[2] * ab[2];
    if along < 0.0 || along > length2 {
        return false;
    }
    let (t, distance) = project(point, a, b);
    distance <= ra + t * (rb - ra)
}

/// Shortest distance from `point` to a polyline
pub(crate) fn distance_to_polyline(point: [f64; 3], polyline: &[[f64; 3]]) -> f64 {
    match polyline {
        [] => f64::INFINITY,
        [single] => project(point, *single, *single).1,
        _ => polyline
            .windows(2)
            .map(|pair| project(point, pair[0], pair[1]).1)
            .fold(f64::INFINITY, f64::min),
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::Section;

    #[test]
    fn test_cylinder_voxel_volume() {
        let mut morphology = Morphology::new();
        let id = morphology.add_section(Section::cylinder("soma", [0.0; 3], 20.0, 6.0, 1).unwrap());

        let grid = CenterlineVoxelizer.voxelize(&morphology, &[id], 0.5).unwrap();
        let total: f64 = grid.volumes.sum();
        let exact = std::f64::consts::PI * 9.0 * 20.0;

        assert!((total - exact).abs() / exact < 0.1, "voxelized {total}, exact {exact}");
    }

    #[test]
    fn test_surface_only_on_boundary() {
        let mut morphology = Morphology::new();
        let id = morphology.add_section(Section::cylinder("soma", [0.0; 3], 10.0, 6.0, 1).unwrap());
        let grid = CenterlineVoxelizer.voxelize(&morphology, &[id], 1.0).unwrap();

        let occupied = grid.occupied();
        let surface = occupied.iter().filter(|index| grid.surface_areas[**index] > 0.0).count();
        assert!(surface > 0);
        assert!(surface < occupied.len());
    }

    #[test]
    fn test_neighbors_at_corner() {
        let n = neighbors6(0, 0, 0, (2, 2, 2));
        assert_eq!(n.iter().filter(|x| x.is_some()).count(), 3);
    }

    #[test]
    fn test_distance_to_polyline() {
        let polyline = [[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]];
        assert!((distance_to_polyline([5.0, 3.0, 0.0], &polyline) - 3.0).abs() < 1e-12);
        assert!((distance_to_polyline([13.0, 4.0, 0.0], &polyline) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_dx() {
        let mut morphology = Morphology::new();
        let id = morphology.add_section(Section::cylinder("soma", [0.0; 3], 10.0, 6.0, 1).unwrap());
        assert!(CenterlineVoxelizer.voxelize(&morphology, &[id], 0.0).is_err());
    }
}
