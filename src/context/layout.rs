//! Node layout and state carry-over across host structure changes

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::Arc;

use log::debug;

use crate::arena::Arena;
use crate::error::Result;
use crate::geometry::Voxelizer;
use crate::morphology::{CompartmentalHost, Morphology};
use crate::node::NodeStore;
use crate::region::{Domain, Region, RegionId, VoxelizedRegion};
use crate::species::{ExtracellularInstance, Instance, Intracellular3D, OneDInstance, Species, SpeciesId};

use super::ReactionDiffusionContext;

impl ReactionDiffusionContext {
    /// Rebuild every instance against the host, carrying states over by position
    ///
    /// Segments map through their center (`floor(x·nseg_old)`), voxels by lattice index. Nodes
    /// with no counterpart get their initial value. Node fluxes follow the first new node derived
    /// from their old node.
    pub(super) fn relayout(&mut self, host: &dyn CompartmentalHost) -> Result<()> {
        let morphology = host.morphology();
        let mut nodes = NodeStore::new();
        let mut instances = Vec::new();
        let mut voxelized = BTreeMap::new();
        for (id, species) in self.species.iter() {
            instances.extend(lay_out(
                id,
                species,
                &self.regions,
                morphology,
                self.voxelizer.as_ref(),
                &mut voxelized,
                &mut nodes,
            )?);
        }

        let old_nodes = mem::replace(&mut self.nodes, nodes);
        let old_instances = mem::replace(&mut self.instances, instances);
        self.voxelized = voxelized;
        self.pending.clear();

        let mut fresh = vec![true; self.nodes.len()];
        let mut forward: HashMap<usize, usize> = HashMap::new();
        for new in &self.instances {
            let Some(old) = old_instances
                .iter()
                .find(|old| old.species() == new.species() && old.region() == new.region())
            else {
                continue;
            };
            for (from, to) in correspondences(old, new) {
                self.nodes.states_mut()[to] = old_nodes.states()[from];
                fresh[to] = false;
                forward.entry(from).or_insert(to);
            }
        }

        for flux in old_nodes.fluxes() {
            self.nodes.add_flux(*flux);
        }
        self.nodes.remap_fluxes(|node| forward.get(&node).copied());

        let fresh: Vec<usize> = fresh.iter().enumerate().filter(|(_, f)| **f).map(|(i, _)| i).collect();
        self.apply_initial(host, &fresh)?;

        debug!(
            "relayout: {} nodes in {} instances ({} carried over)",
            self.nodes.len(),
            self.instances.len(),
            self.nodes.len() - fresh.len()
        );
        self.bump_structure();
        Ok(())
    }

    /// Lay out species registered since the last layout, at the end of the store
    pub(super) fn append_pending(&mut self, host: &dyn CompartmentalHost) -> Result<()> {
        let pending = mem::take(&mut self.pending);
        let first = self.nodes.len();
        for id in pending {
            let species = self.species.get(id)?;
            let built = lay_out(
                id,
                species,
                &self.regions,
                host.morphology(),
                self.voxelizer.as_ref(),
                &mut self.voxelized,
                &mut self.nodes,
            )?;
            self.instances.extend(built);
        }

        let fresh: Vec<usize> = (first..self.nodes.len()).collect();
        self.apply_initial(host, &fresh)?;
        debug!("appended {} nodes", fresh.len());
        self.bump_structure();
        Ok(())
    }
}

/// Allocate the nodes of one species on each of its regions
fn lay_out(
    id: SpeciesId,
    species: &Species,
    regions: &Arena<Region>,
    morphology: &Morphology,
    voxelizer: &dyn Voxelizer,
    voxelized: &mut BTreeMap<RegionId, Arc<VoxelizedRegion>>,
    nodes: &mut NodeStore,
) -> Result<Vec<Instance>> {
    let mut instances = Vec::with_capacity(species.regions().len());
    for &region_id in species.regions() {
        let region = regions.get(region_id)?;
        let start = nodes.len();
        let (instance, data) = match region.domain() {
            Domain::Extracellular(grid) => {
                let (instance, data) = ExtracellularInstance::layout(id, species, region_id, grid, start)?;
                (Instance::Extracellular(instance), data)
            }
            Domain::Cell { .. } if region.is_1d() => {
                let (instance, data) = OneDInstance::layout(id, species, region_id, region, morphology, start)?;
                (Instance::OneD(instance), data)
            }
            Domain::Cell { .. } => {
                let voxels = match voxelized.get(&region_id) {
                    Some(voxels) => Arc::clone(voxels),
                    None => {
                        let voxels = Arc::new(VoxelizedRegion::build(region, morphology, voxelizer)?);
                        voxelized.insert(region_id, Arc::clone(&voxels));
                        voxels
                    }
                };
                let (instance, data) = Intracellular3D::layout(id, species, region_id, voxels, start)?;
                (Instance::ThreeD(instance), data)
            }
        };
        nodes.allocate(data);
        instances.push(instance);
    }
    Ok(instances)
}

/// `(old node, new node)` pairs of two layouts of the same species on the same region
fn correspondences(old: &Instance, new: &Instance) -> Vec<(usize, usize)> {
    match (old, new) {
        (Instance::OneD(old), Instance::OneD(new)) => new
            .sections
            .iter()
            .filter_map(|section| old.section(section.section).map(|previous| (previous, section)))
            .flat_map(|(previous, section)| {
                let ghost = previous.ghost.zip(section.ghost);
                let segments = (0..section.nseg).map(move |i| {
                    let x = (i as f64 + 0.5) / section.nseg as f64;
                    (previous.node_at(x), section.node(i))
                });
                ghost.into_iter().chain(segments)
            })
            .collect(),
        (Instance::ThreeD(old), Instance::ThreeD(new)) => (0..new.voxels.len())
            .filter_map(|local| old.node_at(new.voxels.voxel(local)).map(|from| (from, new.node(local))))
            .collect(),
        (Instance::Extracellular(old), Instance::Extracellular(new)) if old.grid.shape() == new.grid.shape() => {
            old.range.clone().zip(new.range.clone()).collect()
        }
        _ => Vec::new(),
    }
}
