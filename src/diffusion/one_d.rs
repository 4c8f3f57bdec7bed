//! 1D pass
//!
//! ```text
//!   ghost ─── seg 0 ─── seg 1 ─── seg 2          root section
//!    dx/2        dx        dx
//!                             └── seg 0 ─── seg 1     child attached at x = 1
//!                          dx_p/2 + dx_c/2
//! ```
//!
//! Links inside a section use the face area between the two segments and the distance `dx`.
//! A child section links its first segment to the node of the parent that holds the attachment
//! point, using the child's face 0. The far end of a section without children is reflecting.

use crate::error::{Result, RxdError};
use crate::morphology::{Morphology, Section};
use crate::region::Region;
use crate::species::{OneDInstance, Section1D};

use super::Assembler;

pub(crate) fn assemble(
    instance: &OneDInstance,
    region: &Region,
    morphology: &Morphology,
    assembler: &mut Assembler<'_>,
) -> Result<()> {
    let geometry = region
        .geometry()
        .ok_or_else(|| RxdError::InvalidRegion(format!("region {} has no 1D geometry", region.name())))?;

    for section1d in &instance.sections {
        let section = morphology.section(section1d.section)?;
        let faces = geometry.neighbor_areas1d(morphology, section1d.section)?;
        let dx = section.dx();

        for index in 0..section1d.nseg.saturating_sub(1) {
            let (a, b) = (section1d.node(index), section1d.node(index + 1));
            let w = mean_diff(assembler, a, b) * faces[index + 1] / dx;
            assembler.couple(a, b, w)?;
        }

        let first = section1d.node(0);
        let (target, distance) = match (section1d.ghost, section1d.parent) {
            (Some(ghost), _) => (ghost, dx / 2.0),
            (None, Some((parent, x))) => {
                let parent1d = instance.section(parent).ok_or_else(|| {
                    RxdError::StructuralConflict(format!("parent section {} has no nodes", parent.0))
                })?;
                attachment(parent1d, morphology.section(parent)?, x, dx)
            }
            (None, None) => continue,
        };
        let w = mean_diff(assembler, target, first) * faces[0] / distance;
        assembler.couple(target, first, w)?;
    }
    Ok(())
}

/// Parent node holding position `x`, and the distance from it to the child's first node
fn attachment(parent: &Section1D, section: &Section, x: f64, child_dx: f64) -> (usize, f64) {
    let parent_dx = section.dx();
    if x >= 1.0 {
        (parent.node(parent.nseg - 1), (parent_dx + child_dx) / 2.0)
    } else if x <= 0.0 {
        match parent.ghost {
            Some(ghost) => (ghost, child_dx / 2.0),
            None => (parent.node(0), (parent_dx + child_dx) / 2.0),
        }
    } else {
        let index = section.segment_index(x);
        let offset = (x - section.segment_center(index)).abs() * section.length();
        (parent.node(index), offset + child_dx / 2.0)
    }
}

fn mean_diff(assembler: &Assembler<'_>, a: usize, b: usize) -> f64 {
    let diffs = assembler.nodes().diffs();
    0.5 * (diffs[a][0] + diffs[b][0])
}
