//! Host membrane currents as concentration sources
//!
//! For a named species with charge `z` on a tagged region, the outward current density `i`
//! (mA/cm²) of a segment becomes
//!
//! ```text
//!   dc/dt += sign · 1e4 / (z·F) · i · S / V        sign = -1 inside, +1 outside
//! ```
//!
//! on every node that touches the membrane of that segment.

use log::warn;

use crate::arena::Arena;
use crate::error::Result;
use crate::kinetics::FARADAY;
use crate::morphology::{CompartmentalHost, IonSide, SegmentRef};
use crate::node::NodeStore;
use crate::region::Region;
use crate::species::{Instance, Species};

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    ion: String,
    segment: SegmentRef,
    node: usize,
    scale: f64,
}

/// Every (ion, segment) → node conversion of one structure and charge epoch
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CurrentMap {
    entries: Vec<Entry>,
}

impl CurrentMap {
    pub(crate) fn build(
        species: &Arena<Species>,
        regions: &Arena<Region>,
        instances: &[Instance],
        nodes: &NodeStore,
        host: &dyn CompartmentalHost,
        ecs_enabled: bool,
    ) -> Result<Self> {
        let mut entries = Vec::new();
        let volumes = nodes.volumes();
        let surfaces = nodes.surface_areas();

        for instance in instances {
            let field = species.get(instance.species())?;
            let (Some(ion), z) = (field.name(), field.charge()) else { continue };
            if z == 0 {
                continue;
            }
            let region = regions.get(instance.region())?;
            let Some(side) = region.tag() else { continue };
            let factor = side.current_sign() * 1e4 / (f64::from(z) * FARADAY);

            let mut push = |segment: SegmentRef, node: usize, surface: f64| {
                if nodes.is_fixed(node) || volumes[node] <= 0.0 || surface <= 0.0 {
                    return;
                }
                entries.push(Entry { ion: ion.to_string(), segment, node, scale: factor * surface / volumes[node] });
            };

            match instance {
                Instance::OneD(one_d) => {
                    for (segment, node) in one_d.segments() {
                        push(segment, node, surfaces[node]);
                    }
                }
                Instance::ThreeD(voxels) => {
                    for (segment, locals) in voxels.voxels.nodes_by_segment() {
                        let surface_nodes = voxels.voxels.surface_nodes_by_segment().get(segment);
                        if surface_nodes.is_none_or(|s| s.is_empty()) {
                            warn!("segment {segment:?} of region {} has no surface voxels", region.name());
                            continue;
                        }
                        for &local in locals {
                            let node = voxels.node(local);
                            push(*segment, node, surfaces[node]);
                        }
                    }
                }
                Instance::Extracellular(grid) => {
                    if !ecs_enabled || side != IonSide::Outside {
                        continue;
                    }
                    let morphology = host.morphology();
                    for segment in morphology.segments() {
                        let section = morphology.section(segment.section)?;
                        let center = section.position(section.segment_center(segment.index));
                        if let Some(node) = grid.node_containing(center) {
                            push(segment, node, host.segment_area(segment));
                        }
                    }
                }
            }
        }
        Ok(Self { entries })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Add the current-driven rate of every entry into `rhs`
    pub(crate) fn apply(&self, host: &dyn CompartmentalHost, rhs: &mut [f64]) {
        for entry in &self.entries {
            rhs[entry.node] += entry.scale * host.ion_current(&entry.ion, entry.segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReactionDiffusionContext;
    use crate::geometry::Geometry;
    use crate::morphology::{Morphology, Section, StaticHost};
    use crate::species::InitialValue;

    #[test]
    fn test_inward_calcium_current_raises_concentration() {
        let mut morphology = Morphology::new();
        let soma = morphology.add_section(Section::cylinder("soma", [0.0; 3], 10.0, 10.0, 1).unwrap());
        let mut host = StaticHost::new(morphology);
        let segment = SegmentRef::new(soma, 0);
        // inward (negative) current
        host.set_ion_current("ca", segment, -0.01);

        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx
            .add_region(Region::new("cyt", vec![soma], Geometry::Inside).unwrap().with_tag(IonSide::Inside))
            .unwrap();
        let ca = ctx
            .add_species(
                Species::new(vec![cyt]).named("ca").with_charge(2).with_initial(InitialValue::Constant(1e-4)),
            )
            .unwrap();
        ctx.initialize(&mut host).unwrap();

        let node = ctx.node_by_location(ca, soma, 0.5).unwrap().unwrap();
        let before = ctx.concentration(node).unwrap();
        ctx.advance(&mut host, 0.025).unwrap();
        let after = ctx.concentration(node).unwrap();

        // cylinder: S/V = 4/d
        let expected = 1e4 / (2.0 * FARADAY) * 0.01 * (4.0 / 10.0) * 0.025;
        assert!(((after - before) - expected).abs() < 1e-12 * expected.max(1.0) + 1e-15);
    }

    #[test]
    fn test_uncharged_or_untagged_species_ignored() {
        let mut morphology = Morphology::new();
        let soma = morphology.add_section(Section::cylinder("soma", [0.0; 3], 10.0, 10.0, 1).unwrap());
        let host = StaticHost::new(morphology);

        let mut ctx = ReactionDiffusionContext::new();
        let tagged = ctx
            .add_region(Region::new("cyt", vec![soma], Geometry::Inside).unwrap().with_tag(IonSide::Inside))
            .unwrap();
        let er = Geometry::fractional_volume(0.1, 0.0, None).unwrap();
        let untagged = ctx.add_region(Region::new("er", vec![soma], er).unwrap()).unwrap();
        ctx.add_species(Species::new(vec![tagged]).named("buf")).unwrap();
        ctx.add_species(Species::new(vec![untagged]).named("ca").with_charge(2)).unwrap();
        ctx.ensure_current(&host).unwrap();

        let map = CurrentMap::build(&ctx.species, &ctx.regions, &ctx.instances, &ctx.nodes, &host, true).unwrap();
        assert_eq!(map.len(), 0);
    }
}
