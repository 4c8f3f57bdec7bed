//! 1D discretization
//!
//! ```text
//!  block of one species on one 1D region
//!  ┌────────┬────────┬───────────────────┬──────────────┬─────
//!  │ ghost  │ ghost  │ soma: seg 0       │ dend: 0 1 2  │ ...
//!  │ root 1 │ root 2 │                   │              │
//!  └────────┴────────┴───────────────────┴──────────────┴─────
//! ```
//!
//! Every region-root section (one whose parent is not in the region) gets a zero-volume ghost
//! node at its `x = 0` end. Segment nodes follow in canonical section order, so a parent node
//! always has a smaller index than its children.

use std::ops::Range;

use crate::error::{Result, RxdError};
use crate::morphology::{Morphology, SectionId, SegmentRef};
use crate::node::{NodeData, NodeLocation};
use crate::region::{Region, RegionId};
use crate::species::{DiffusionCoefficient, FieldKind, Species, SpeciesId};

/// Nodes of one section
#[derive(Debug, Clone, PartialEq)]
pub struct Section1D {
    pub section: SectionId,
    pub nseg: usize,
    /// Node of segment 0
    pub start: usize,
    /// Ghost at `x = 0` for region roots
    pub ghost: Option<usize>,
    /// Parent inside the region, with the attachment position
    pub parent: Option<(SectionId, f64)>,
}

impl Section1D {
    pub fn node(&self, index: usize) -> usize {
        self.start + index
    }

    pub fn nodes(&self) -> Range<usize> {
        self.start..self.start + self.nseg
    }

    /// Node of the segment containing normalized position `x`
    pub fn node_at(&self, x: f64) -> usize {
        let index = (x.clamp(0.0, 1.0) * self.nseg as f64).floor() as usize;
        self.start + index.min(self.nseg - 1)
    }
}

/// One species on one 1D region
#[derive(Debug, Clone)]
pub struct OneDInstance {
    pub species: SpeciesId,
    pub region: RegionId,
    pub range: Range<usize>,
    pub sections: Vec<Section1D>,
}

impl OneDInstance {
    /// Lay out the nodes of `species` on `region`, numbering from `start`
    pub(crate) fn layout(
        species_id: SpeciesId,
        species: &Species,
        region_id: RegionId,
        region: &Region,
        morphology: &Morphology,
        start: usize,
    ) -> Result<(Self, Vec<NodeData>)> {
        let geometry = region
            .geometry()
            .ok_or_else(|| RxdError::InvalidRegion(format!("region {} is not a cell region", region.name())))?;
        if matches!(species.diffusion(), DiffusionCoefficient::Anisotropic(_)) {
            return Err(RxdError::InvalidSpecies(format!(
                "anisotropic diffusion needs a 3D region, {} is 1D",
                region.name()
            )));
        }

        let ordered = region.ordered_sections(morphology)?;
        let fixed = species.kind() == FieldKind::Parameter;
        let parents: Vec<Option<(SectionId, f64)>> =
            ordered.iter().map(|&id| region.parent_in_region(morphology, id)).collect();
        let root_count = parents.iter().filter(|p| p.is_none()).count();

        let mut ghosts = Vec::with_capacity(root_count);
        let mut segments = Vec::new();
        let mut sections = Vec::with_capacity(ordered.len());
        let mut cursor = start + root_count;

        for (&id, parent) in ordered.iter().zip(parents) {
            let section = morphology.section(id)?;
            let volumes = geometry.volumes1d(morphology, id)?;
            let surfaces = geometry.surface_areas1d(morphology, id)?;

            let ghost = if parent.is_none() {
                ghosts.push(NodeData {
                    volume: 0.0,
                    surface_area: 0.0,
                    diff: species.diffusion().at(section.position(0.0))?,
                    position: section.position(0.0),
                    state: 0.0,
                    fixed: false,
                    location: NodeLocation::Ghost { section: id },
                });
                Some(start + ghosts.len() - 1)
            } else {
                None
            };

            for index in 0..section.nseg() {
                if volumes[index] <= 0.0 || !volumes[index].is_finite() {
                    return Err(RxdError::InvalidRegion(format!(
                        "region {}: segment {index} of section {} has no volume",
                        region.name(),
                        section.name()
                    )));
                }
                segments.push(NodeData {
                    volume: volumes[index],
                    surface_area: surfaces[index],
                    diff: species.diffusion().at(section.position(section.segment_center(index)))?,
                    position: section.position(section.segment_center(index)),
                    state: 0.0,
                    fixed,
                    location: NodeLocation::Segment(SegmentRef::new(id, index)),
                });
            }

            sections.push(Section1D { section: id, nseg: section.nseg(), start: cursor, ghost, parent });
            cursor += section.nseg();
        }

        ghosts.extend(segments);
        let instance = Self { species: species_id, region: region_id, range: start..cursor, sections };
        Ok((instance, ghosts))
    }

    pub fn section(&self, id: SectionId) -> Option<&Section1D> {
        self.sections.iter().find(|s| s.section == id)
    }

    /// Node of a segment
    pub fn segment_node(&self, segment: SegmentRef) -> Option<usize> {
        self.section(segment.section)
            .filter(|s| segment.index < s.nseg)
            .map(|s| s.node(segment.index))
    }

    /// Every (segment, node) pair
    pub fn segments(&self) -> impl Iterator<Item = (SegmentRef, usize)> + '_ {
        self.sections
            .iter()
            .flat_map(|s| (0..s.nseg).map(move |i| (SegmentRef::new(s.section, i), s.node(i))))
    }

    pub(crate) fn shift_down(&mut self, count: usize) {
        self.range = super::shift(&self.range, count);
        for section in &mut self.sections {
            section.start -= count;
            if let Some(ghost) = &mut section.ghost {
                *ghost -= count;
            }
        }
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::geometry::Geometry;
    use crate::morphology::Section;

    fn layout(morphology: &Morphology, sections: Vec<SectionId>, start: usize) -> (OneDInstance, Vec<NodeData>) {
        let mut regions = Arena::new("region");
        let region = Region::new("cyt", sections, Geometry::Inside).unwrap();
        let region_id = regions.insert(region.clone());
        let mut arena = Arena::new("species");
        let species = Species::new(vec![region_id]).with_diffusion(1.0);
        let species_id = arena.insert(species.clone());
        OneDInstance::layout(species_id, &species, region_id, &region, morphology, start).unwrap()
    }

    #[test]
    fn test_ghosts_first_then_preorder() {
        let mut m = Morphology::new();
        let soma = m.add_section(Section::cylinder("soma", [0.0; 3], 10.0, 10.0, 1).unwrap());
        let dend = m.add_section(Section::cylinder("dend", [10.0, 0.0, 0.0], 30.0, 1.0, 3).unwrap());
        let axon = m.add_section(Section::cylinder("axon", [-20.0, 0.0, 0.0], 20.0, 1.0, 2).unwrap());
        m.connect(dend, soma, 1.0).unwrap();

        let (instance, nodes) = layout(&m, vec![soma, dend, axon], 5);

        // two region roots (soma, axon)
        assert_eq!(instance.range, 5..13);
        assert_eq!(nodes.len(), 8);
        assert!(matches!(nodes[0].location, NodeLocation::Ghost { section } if section == soma));
        assert!(matches!(nodes[1].location, NodeLocation::Ghost { section } if section == axon));

        let soma1d = instance.section(soma).unwrap();
        let dend1d = instance.section(dend).unwrap();
        assert_eq!((soma1d.start, soma1d.ghost), (7, Some(5)));
        assert_eq!((dend1d.start, dend1d.ghost, dend1d.parent), (8, None, Some((soma, 1.0))));
        assert_eq!(instance.section(axon).unwrap().start, 11);
        assert_eq!(nodes[0].volume, 0.0);
    }

    #[test]
    fn test_zero_volume_segment_rejected() {
        let mut m = Morphology::new();
        let dend = m.add_section(Section::cylinder("dend", [0.0; 3], 10.0, 0.0, 2).unwrap());
        let region = Region::new("cyt", vec![dend], Geometry::Inside).unwrap();
        let region_id = Arena::new("region").insert(region.clone());
        let species = Species::new(vec![region_id]).with_diffusion(1.0);
        let species_id = Arena::new("species").insert(species.clone());

        let err = OneDInstance::layout(species_id, &species, region_id, &region, &m, 0).unwrap_err();
        assert!(matches!(err, RxdError::InvalidRegion(_)), "{err}");
    }

    #[test]
    fn test_negative_function_coefficient_rejected() {
        let mut m = Morphology::new();
        let dend = m.add_section(Section::cylinder("dend", [0.0; 3], 10.0, 1.0, 2).unwrap());
        let region = Region::new("cyt", vec![dend], Geometry::Inside).unwrap();
        let region_id = Arena::new("region").insert(region.clone());
        let species = Species::new(vec![region_id]).with_diffusion(DiffusionCoefficient::Function(
            std::sync::Arc::new(|_| -5.0),
        ));
        let species_id = Arena::new("species").insert(species.clone());

        let err = OneDInstance::layout(species_id, &species, region_id, &region, &m, 0).unwrap_err();
        assert!(matches!(err, RxdError::InvalidSpecies(_)), "{err}");
    }

    #[test]
    fn test_segment_lookup_and_shift() {
        let mut m = Morphology::new();
        let dend = m.add_section(Section::cylinder("dend", [0.0; 3], 30.0, 1.0, 3).unwrap());
        let (mut instance, _) = layout(&m, vec![dend], 10);

        assert_eq!(instance.segment_node(SegmentRef::new(dend, 2)), Some(13));
        assert_eq!(instance.section(dend).unwrap().node_at(0.5), 12);
        assert_eq!(instance.segment_node(SegmentRef::new(dend, 3)), None);

        instance.shift_down(10);
        assert_eq!(instance.range, 0..4);
        assert_eq!(instance.section(dend).unwrap().ghost, Some(0));
    }
}
