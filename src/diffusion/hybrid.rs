//! Hybrid 1D/3D coupling
//!
//! A species living on a 1D region and on a 3D region is coupled wherever a section of one
//! region is attached to a section of the other:
//!
//! ```text
//!        3D voxels of the boundary segment
//!        ┌──┬──┐
//!        │▓▓│▓▓│◄──── nearest voxels share π/4·d² equally
//!        ├──┼──┤         distance (dx_3d + dx_1d)/2
//!        │  │▓▓│━━━━━━━━━━ 1D node ━━━━━━
//!        └──┴──┘
//! ```
//!
//! Each voxel link is an ordinary conservative coupling, so whatever leaves the 1D node enters
//! the voxels.

use std::f64::consts::PI;

use crate::arena::Arena;
use crate::error::{Result, RxdError};
use crate::morphology::{Morphology, SegmentRef};
use crate::node::NodeStore;
use crate::region::Region;
use crate::species::{Instance, Intracellular3D, OneDInstance};

use super::Assembler;

/// One 1D node linked to a set of voxels
#[derive(Debug, Clone, PartialEq)]
pub struct HybridCoupling {
    pub one_d_node: usize,
    pub voxel_nodes: Vec<usize>,
    /// Cross-section shared by the voxels (µm²)
    pub area: f64,
    pub distance: f64,
}

/// Every 1D/3D junction of the current layout
pub fn find_couplings(
    instances: &[Instance],
    regions: &Arena<Region>,
    morphology: &Morphology,
    nodes: &NodeStore,
) -> Result<Vec<HybridCoupling>> {
    let mut couplings = Vec::new();
    let mut shared_dx: Option<f64> = None;

    for one_d in instances.iter().filter_map(|i| match i {
        Instance::OneD(one_d) => Some(one_d),
        _ => None,
    }) {
        for three_d in instances.iter().filter_map(|i| match i {
            Instance::ThreeD(three_d) if three_d.species == one_d.species => Some(three_d),
            _ => None,
        }) {
            let region3d = regions.get(three_d.region)?;
            let found = junctions(one_d, three_d, region3d, morphology, nodes)?;
            if found.is_empty() {
                continue;
            }

            let dx = three_d.voxels.dx();
            match shared_dx {
                Some(previous) if (previous - dx).abs() > 1e-12 * previous.max(dx) => {
                    return Err(RxdError::StructuralConflict(format!(
                        "hybrid 1D/3D coupling requires one voxel size, found {previous} and {dx}"
                    )));
                }
                _ => shared_dx = Some(dx),
            }
            couplings.extend(found);
        }
    }
    Ok(couplings)
}

fn junctions(
    one_d: &OneDInstance,
    three_d: &Intracellular3D,
    region3d: &Region,
    morphology: &Morphology,
    nodes: &NodeStore,
) -> Result<Vec<HybridCoupling>> {
    let voxels = &three_d.voxels;
    let mut found = Vec::new();

    for section1d in &one_d.sections {
        let section = morphology.section(section1d.section)?;

        // 1D child of a 3D section
        let mut candidates = Vec::new();
        if let Some((parent, x)) = section.parent()
            && region3d.contains_section(parent)
        {
            let parent_section = morphology.section(parent)?;
            candidates.push((
                section1d.node(0),
                section.position(0.0),
                section.diam_at_arc(0.0),
                SegmentRef::new(parent, parent_section.segment_index(x)),
            ));
        }
        // 3D children of a 1D section
        for (child, x) in morphology.children(section1d.section) {
            if region3d.contains_section(child) {
                let child_section = morphology.section(child)?;
                candidates.push((
                    section1d.node_at(x),
                    child_section.position(0.0),
                    section.diam_at_arc(x * section.length()),
                    SegmentRef::new(child, 0),
                ));
            }
        }

        for (one_d_node, junction, diam, segment) in candidates {
            let owned = voxels.nodes_by_segment().get(&segment).cloned().unwrap_or_default();
            if owned.is_empty() {
                return Err(RxdError::StructuralConflict(format!(
                    "No 3D neighbors detected for 1D segment of section {} (node {one_d_node})",
                    section.name()
                )));
            }

            let distances: Vec<f64> = owned.iter().map(|&l| distance(voxels.center(l), junction)).collect();
            let nearest = distances.iter().copied().fold(f64::INFINITY, f64::min);
            let voxel_nodes: Vec<usize> = owned
                .iter()
                .zip(&distances)
                .filter(|(_, d)| **d <= nearest + voxels.dx())
                .map(|(&local, _)| three_d.node(local))
                .collect();

            if nodes.is_fixed(one_d_node) && voxel_nodes.iter().all(|&v| nodes.is_fixed(v)) {
                continue;
            }
            found.push(HybridCoupling {
                one_d_node,
                voxel_nodes,
                area: PI / 4.0 * diam * diam,
                distance: (voxels.dx() + section.dx()) / 2.0,
            });
        }
    }
    Ok(found)
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

pub(crate) fn assemble(couplings: &[HybridCoupling], assembler: &mut Assembler<'_>) -> Result<()> {
    for coupling in couplings {
        let share = coupling.area / coupling.voxel_nodes.len() as f64;
        for &voxel in &coupling.voxel_nodes {
            let diffs = assembler.nodes().diffs();
            let d = 0.5 * (diffs[coupling.one_d_node][0] + diffs[voxel][0]);
            assembler.couple(coupling.one_d_node, voxel, d * share / coupling.distance)?;
        }
    }
    Ok(())
}
