//! Initial values and concentration transfer to the host

use crate::error::Result;
use crate::morphology::{CompartmentalHost, IonSide, SegmentRef};
use crate::node::{NodeLocation, NodeRef};
use crate::region::{BoundaryCondition, Domain, Region};
use crate::species::{InitialValue, Instance, Species};

use super::ReactionDiffusionContext;

impl ReactionDiffusionContext {
    /// Set every node to its initial value and push the result to the host
    pub fn initialize(&mut self, host: &mut dyn CompartmentalHost) -> Result<()> {
        self.ensure_current(&*host)?;
        let all: Vec<usize> = (0..self.nodes.len()).collect();
        self.apply_initial(&*host, &all)?;
        self.steps = 0;
        self.jacobian = None;
        self.transfer(host)
    }

    /// Initial values for `indices`; Dirichlet border voxels keep their boundary value
    pub(super) fn apply_initial(&mut self, host: &dyn CompartmentalHost, indices: &[usize]) -> Result<()> {
        for &index in indices {
            let Some(node) = self.node_ref(index) else { continue };
            let species = self.species.get(node.species)?;
            let region = self.regions.get(node.region)?;
            if is_dirichlet_border(region, &node) {
                continue;
            }
            self.nodes.states_mut()[index] = initial_value(species, region, &node, host);
        }
        Ok(())
    }

    /// Write the node concentrations of named species on tagged regions back to the host
    ///
    /// 1D segments copy their node. 3D segments take the volume-weighted mean of their surface
    /// voxels (all their voxels when none touch the membrane). Extracellular species report the
    /// voxel containing each segment center.
    pub(super) fn transfer(&self, host: &mut dyn CompartmentalHost) -> Result<()> {
        let states = self.nodes.states();
        let volumes = self.nodes.volumes();
        let mut updates: Vec<(&str, IonSide, SegmentRef, f64)> = Vec::new();

        for instance in &self.instances {
            let species = self.species.get(instance.species())?;
            let region = self.regions.get(instance.region())?;
            let (Some(name), Some(side)) = (species.name(), region.tag()) else { continue };

            match instance {
                Instance::OneD(one_d) => {
                    for (segment, node) in one_d.segments() {
                        updates.push((name, side, segment, states[node]));
                    }
                }
                Instance::ThreeD(voxels) => {
                    for (segment, locals) in voxels.voxels.nodes_by_segment() {
                        let chosen = voxels
                            .voxels
                            .surface_nodes_by_segment()
                            .get(segment)
                            .filter(|surface| !surface.is_empty())
                            .unwrap_or(locals);
                        let (amount, volume) = chosen
                            .iter()
                            .map(|&local| voxels.node(local))
                            .fold((0.0, 0.0), |(amount, volume), n| (amount + states[n] * volumes[n], volume + volumes[n]));
                        if volume > 0.0 {
                            updates.push((name, side, *segment, amount / volume));
                        }
                    }
                }
                Instance::Extracellular(grid) => {
                    let morphology = host.morphology();
                    for segment in morphology.segments() {
                        let section = morphology.section(segment.section)?;
                        let center = section.position(section.segment_center(segment.index));
                        if let Some(node) = grid.node_containing(center) {
                            updates.push((name, side, segment, states[node]));
                        }
                    }
                }
            }
        }

        for (name, side, segment, value) in updates {
            host.set_concentration(name, side, segment, value);
        }
        Ok(())
    }
}

fn is_dirichlet_border(region: &Region, node: &NodeRef) -> bool {
    match (region.domain(), node.location) {
        (Domain::Extracellular(grid), NodeLocation::Extracellular { voxel: [i, j, k] }) => {
            matches!(grid.boundary(), BoundaryCondition::Dirichlet(_)) && grid.is_border(i, j, k)
        }
        _ => false,
    }
}

fn initial_value(species: &Species, region: &Region, node: &NodeRef, host: &dyn CompartmentalHost) -> f64 {
    match species.initial() {
        InitialValue::Constant(value) => *value,
        InitialValue::Function(f) => f(node),
        InitialValue::Default | InitialValue::FromHost => host_value(species, region, node, host).unwrap_or(0.0),
    }
}

/// Host concentration at a node; extracellular nodes read the bath value of the first segment
fn host_value(species: &Species, region: &Region, node: &NodeRef, host: &dyn CompartmentalHost) -> Option<f64> {
    let name = species.name()?;
    let side = region.tag()?;
    let segment = match node.location {
        NodeLocation::Ghost { section } => SegmentRef::new(section, 0),
        NodeLocation::Extracellular { .. } => host.morphology().segments().into_iter().next()?,
        location => location.segment()?,
    };
    host.concentration(name, side, segment)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::context::ReactionDiffusionContext;
    use crate::geometry::Geometry;
    use crate::morphology::{CompartmentalHost, IonSide, Morphology, Section, SegmentRef, StaticHost};
    use crate::node::NodeRef;
    use crate::region::{BoundaryCondition, ExtracellularBox, Region};
    use crate::species::{InitialValue, Species};

    fn soma_host() -> (StaticHost, crate::morphology::SectionId) {
        let mut morphology = Morphology::new();
        let soma = morphology.add_section(Section::cylinder("soma", [0.0; 3], 10.0, 10.0, 2).unwrap());
        (StaticHost::new(morphology), soma)
    }

    #[test]
    fn test_default_initial_reads_host() {
        let (mut host, soma) = soma_host();
        host.set_concentration("ca", IonSide::Inside, SegmentRef::new(soma, 1), 5e-5);

        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx
            .add_region(Region::new("cyt", vec![soma], Geometry::Inside).unwrap().with_tag(IonSide::Inside))
            .unwrap();
        let ca = ctx.add_species(Species::new(vec![cyt]).named("ca")).unwrap();
        ctx.initialize(&mut host).unwrap();

        let second = ctx.node_by_location(ca, soma, 0.75).unwrap().unwrap();
        let first = ctx.node_by_location(ca, soma, 0.25).unwrap().unwrap();
        assert_eq!(ctx.concentration(second).unwrap(), 5e-5);
        // missing host values fall back to 0
        assert_eq!(ctx.concentration(first).unwrap(), 0.0);
    }

    #[test]
    fn test_function_initial_sees_position() {
        let (mut host, soma) = soma_host();
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![soma], Geometry::Inside).unwrap()).unwrap();
        let x = ctx
            .add_species(
                Species::new(vec![cyt]).with_initial(InitialValue::Function(Arc::new(|node: &NodeRef| node.position[0]))),
            )
            .unwrap();
        ctx.initialize(&mut host).unwrap();

        let node = ctx.node_by_location(x, soma, 0.75).unwrap().unwrap();
        assert!((ctx.concentration(node).unwrap() - 7.5).abs() < 1e-12);
    }

    #[test]
    fn test_transfer_writes_host_concentration() {
        let (mut host, soma) = soma_host();
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx
            .add_region(Region::new("cyt", vec![soma], Geometry::Inside).unwrap().with_tag(IonSide::Inside))
            .unwrap();
        ctx.add_species(Species::new(vec![cyt]).named("k").with_initial(InitialValue::Constant(140.0)))
            .unwrap();
        ctx.initialize(&mut host).unwrap();

        for index in 0..2 {
            assert_eq!(host.concentration("k", IonSide::Inside, SegmentRef::new(soma, index)), Some(140.0));
        }
    }

    #[test]
    fn test_dirichlet_border_keeps_boundary_value() {
        let (mut host, _) = soma_host();
        let mut ctx = ReactionDiffusionContext::new();
        let grid = ExtracellularBox::new([0.0; 3], [3.0; 3], [1.0; 3])
            .unwrap()
            .with_boundary(BoundaryCondition::Dirichlet(2.0));
        let ecs = ctx.add_region(Region::extracellular("ecs", grid)).unwrap();
        let k = ctx
            .add_species(Species::new(vec![ecs]).with_diffusion(1.0).with_initial(InitialValue::Constant(0.5)))
            .unwrap();
        ctx.initialize(&mut host).unwrap();

        let nodes = ctx.nodes(k).unwrap();
        let values: Vec<f64> = nodes.iter().map(|n| ctx.concentration(n.index).unwrap()).collect();
        // 27 voxels, only the center is interior
        assert_eq!(values.iter().filter(|&&v| v == 2.0).count(), 26);
        assert_eq!(values[13], 0.5);
    }
}
