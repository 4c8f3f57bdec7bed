//! Regions
//!
//! A region is where species live. It is either part of the cell (a set of sections plus one
//! [`Geometry`]) or a box of extracellular space.
//!
//! ```text
//!                     ┌──────────────────────────────┐
//!  Region ──► Domain ─┤ Cell { sections, geometry,   │──► 1D: canonical section order
//!                     │        tag, dimension }      │──► 3D: VoxelizedRegion
//!                     ├──────────────────────────────┤
//!                     │ Extracellular(box)           │──► regular voxel lattice
//!                     └──────────────────────────────┘
//! ```
//!
//! Regions are immutable once added to a context.

pub mod extracellular;
pub mod voxelized;

pub use extracellular::{BoundaryCondition, ExtracellularBox, GridField};
pub use voxelized::VoxelizedRegion;

use std::collections::HashSet;

use crate::arena::Handle;
use crate::error::{Result, RxdError};
use crate::geometry::Geometry;
use crate::morphology::{IonSide, Morphology, SectionId};

/// Stable handle of a region inside a context
pub type RegionId = Handle<Region>;

/// Discretization of a cell region
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dimension {
    /// One node per segment
    OneD,
    /// Voxels of edge `dx` (µm)
    ThreeD { dx: f64 },
}

/// What a region covers
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Cell {
        sections: Vec<SectionId>,
        geometry: Geometry,
        tag: Option<IonSide>,
        dimension: Dimension,
    },
    Extracellular(ExtracellularBox),
}

/// Grouping of sections (or a voxel box) sharing one geometry
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    name: String,
    domain: Domain,
}

impl Region {
    /// 1D cell region over `sections`
    pub fn new(name: &str, sections: Vec<SectionId>, geometry: Geometry) -> Result<Self> {
        if sections.is_empty() {
            return Err(RxdError::InvalidRegion(format!("region {name}: no sections")));
        }
        if matches!(geometry, Geometry::Extracellular) {
            return Err(RxdError::InvalidRegion(format!(
                "region {name}: the extracellular geometry needs Region::extracellular"
            )));
        }
        geometry.validate()?;

        let mut seen = HashSet::new();
        let sections: Vec<SectionId> = sections.into_iter().filter(|s| seen.insert(*s)).collect();

        Ok(Self {
            name: name.to_string(),
            domain: Domain::Cell { sections, geometry, tag: None, dimension: Dimension::OneD },
        })
    }

    /// Extracellular space
    pub fn extracellular(name: &str, grid: ExtracellularBox) -> Self {
        Self { name: name.to_string(), domain: Domain::Extracellular(grid) }
    }

    /// Classic compartment this region maps to (`Inside` for `cai`, `Outside` for `cao`)
    pub fn with_tag(mut self, side: IonSide) -> Self {
        if let Domain::Cell { tag, .. } = &mut self.domain {
            *tag = Some(side);
        }
        self
    }

    /// Discretize with voxels of edge `dx` instead of segments
    pub fn three_d(mut self, dx: f64) -> Result<Self> {
        if !(dx > 0.0 && dx.is_finite()) {
            return Err(RxdError::InvalidRegion(format!("region {}: dx must be positive", self.name)));
        }
        match &mut self.domain {
            Domain::Cell { geometry, dimension, .. } => {
                geometry.voxel_scales().map_err(|e| {
                    RxdError::InvalidRegion(format!("region {}: {e}", self.name))
                })?;
                *dimension = Dimension::ThreeD { dx };
            }
            Domain::Extracellular(_) => {
                return Err(RxdError::InvalidRegion(format!(
                    "region {}: extracellular regions are always 3D",
                    self.name
                )));
            }
        }
        Ok(self)
    }

    // ========================================== Queries ==========================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Geometry of a cell region
    pub fn geometry(&self) -> Option<&Geometry> {
        match &self.domain {
            Domain::Cell { geometry, .. } => Some(geometry),
            Domain::Extracellular(_) => None,
        }
    }

    /// Classic compartment tag; extracellular space counts as outside
    pub fn tag(&self) -> Option<IonSide> {
        match &self.domain {
            Domain::Cell { tag, .. } => *tag,
            Domain::Extracellular(_) => Some(IonSide::Outside),
        }
    }

    pub fn is_extracellular(&self) -> bool {
        matches!(self.domain, Domain::Extracellular(_))
    }

    pub fn is_1d(&self) -> bool {
        matches!(self.domain, Domain::Cell { dimension: Dimension::OneD, .. })
    }

    /// Voxel size of a 3D cell region
    pub fn voxel_dx(&self) -> Option<f64> {
        match self.domain {
            Domain::Cell { dimension: Dimension::ThreeD { dx }, .. } => Some(dx),
            _ => None,
        }
    }

    /// Membrane-type (area) region
    pub fn is_area(&self) -> bool {
        self.geometry().is_some_and(Geometry::is_area)
    }

    pub fn contains_section(&self, section: SectionId) -> bool {
        match &self.domain {
            Domain::Cell { sections, .. } => sections.contains(&section),
            Domain::Extracellular(_) => false,
        }
    }

    /// Sections in one globally consistent root-first depth order
    ///
    /// The order follows [`Morphology::preorder`], so every section comes after its parent
    /// whenever the parent is also part of the region.
    pub fn ordered_sections(&self, morphology: &Morphology) -> Result<Vec<SectionId>> {
        let Domain::Cell { sections, .. } = &self.domain else {
            return Ok(Vec::new());
        };
        for &id in sections {
            morphology.section(id).map_err(|_| {
                RxdError::InvalidRegion(format!("region {}: unknown section {}", self.name, id.0))
            })?;
        }
        Ok(morphology.preorder().into_iter().filter(|id| sections.contains(id)).collect())
    }

    /// Parent of `section` when that parent belongs to the region too
    pub fn parent_in_region(&self, morphology: &Morphology, section: SectionId) -> Option<(SectionId, f64)> {
        morphology
            .section(section)
            .ok()
            .and_then(|s| s.parent())
            .filter(|(parent, _)| self.contains_section(*parent))
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::Section;

    fn tree() -> (Morphology, Vec<SectionId>) {
        let mut m = Morphology::new();
        let soma = m.add_section(Section::cylinder("soma", [0.0; 3], 10.0, 10.0, 1).unwrap());
        let a = m.add_section(Section::cylinder("a", [10.0, 0.0, 0.0], 20.0, 1.0, 2).unwrap());
        let b = m.add_section(Section::cylinder("b", [30.0, 0.0, 0.0], 20.0, 1.0, 2).unwrap());
        m.connect(b, a, 1.0).unwrap();
        m.connect(a, soma, 1.0).unwrap();
        (m, vec![soma, a, b])
    }

    #[test]
    fn test_ordered_sections_follow_preorder() {
        let (m, ids) = tree();
        let region = Region::new("cyt", vec![ids[2], ids[0], ids[1]], Geometry::Inside).unwrap();
        assert_eq!(region.ordered_sections(&m).unwrap(), ids);
    }

    #[test]
    fn test_parent_outside_region_is_ignored() {
        let (m, ids) = tree();
        let region = Region::new("dend", vec![ids[1], ids[2]], Geometry::Inside).unwrap();

        assert_eq!(region.parent_in_region(&m, ids[1]), None);
        assert_eq!(region.parent_in_region(&m, ids[2]), Some((ids[1], 1.0)));
    }

    #[test]
    fn test_three_d_rejects_area_geometry() {
        let (_, ids) = tree();
        let membrane = Region::new("mem", vec![ids[0]], Geometry::membrane()).unwrap();
        assert!(membrane.three_d(0.5).is_err());

        let cyt = Region::new("cyt", vec![ids[0]], Geometry::Inside).unwrap().three_d(0.5).unwrap();
        assert_eq!(cyt.voxel_dx(), Some(0.5));
        assert!(!cyt.is_1d());
    }

    #[test]
    fn test_empty_region_rejected() {
        assert!(Region::new("none", vec![], Geometry::Inside).is_err());
    }

    #[test]
    fn test_tags() {
        let (_, ids) = tree();
        let cyt = Region::new("cyt", vec![ids[0]], Geometry::Inside).unwrap().with_tag(IonSide::Inside);
        assert_eq!(cyt.tag(), Some(IonSide::Inside));

        let ecs = Region::extracellular("ecs", ExtracellularBox::new([0.0; 3], [10.0; 3], [1.0; 3]).unwrap());
        assert_eq!(ecs.tag(), Some(IonSide::Outside));
        assert!(ecs.is_extracellular());
    }
}
