//! Voxel passes
//!
//! Each pair of face neighbors is linked once, along +x, +y or +z. For an anisotropic
//! coefficient the component of the link axis is used.
//!
//! - intracellular: `w = D_axis · dx² · naf / dx`
//! - extracellular: `w = D_axis · perm · α · A_face / dx_axis`, with `perm` and `α` averaged
//!   over the two voxels (node volumes are already `α · V`)

use crate::error::Result;
use crate::species::{ExtracellularInstance, Intracellular3D};

use super::Assembler;

pub(crate) fn assemble_voxels(instance: &Intracellular3D, assembler: &mut Assembler<'_>) -> Result<()> {
    let voxels = &instance.voxels;
    let dx = voxels.dx();
    let area = dx * dx * voxels.neighbor_area_fraction();

    for local in 0..voxels.len() {
        for (other, axis) in voxels.forward_neighbors(local) {
            let (a, b) = (instance.node(local), instance.node(other));
            let diffs = assembler.nodes().diffs();
            let d = 0.5 * (diffs[a][axis] + diffs[b][axis]);
            assembler.couple(a, b, d * area / dx)?;
        }
    }
    Ok(())
}

pub(crate) fn assemble_extracellular(
    instance: &ExtracellularInstance,
    assembler: &mut Assembler<'_>,
) -> Result<()> {
    let grid = &instance.grid;
    let (nx, ny, nz) = grid.shape();
    let dx = grid.dx();
    let face = [dx[1] * dx[2], dx[0] * dx[2], dx[0] * dx[1]];

    for i in 0..nx {
        for j in 0..ny {
            for k in 0..nz {
                let a = instance.node([i, j, k]);
                let forward = [
                    (i + 1 < nx).then_some([i + 1, j, k]),
                    (j + 1 < ny).then_some([i, j + 1, k]),
                    (k + 1 < nz).then_some([i, j, k + 1]),
                ];
                for (axis, neighbor) in forward.into_iter().enumerate() {
                    let Some([ni, nj, nk]) = neighbor else { continue };
                    let b = instance.node([ni, nj, nk]);

                    let permeability = 0.5 * (grid.permeability(i, j, k) + grid.permeability(ni, nj, nk));
                    let alpha = 0.5 * (grid.alpha(i, j, k) + grid.alpha(ni, nj, nk));
                    let diffs = assembler.nodes().diffs();
                    let d = 0.5 * (diffs[a][axis] + diffs[b][axis]);

                    assembler.couple(a, b, d * permeability * alpha * face[axis] / dx[axis])?;
                }
            }
        }
    }
    Ok(())
}
