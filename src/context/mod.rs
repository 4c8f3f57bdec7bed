//! Reaction-diffusion context
//!
//! [`ReactionDiffusionContext`] owns every piece of engine state: the region, species and reaction
//! registries, the flat node store, and the caches derived from them.
//!
//! ```text
//!   add_region / add_species / add_reaction        (registries, generational handles)
//!            │
//!            ▼
//!   ensure_current(host) ── host counters changed? ──► relayout with state carry-over
//!            │                                       otherwise append pending species
//!            ├─► DiffusionMatrices   keyed by structure epoch
//!            ├─► ReactionSystem      keyed by (structure, reaction) epochs
//!            └─► CurrentMap          keyed by (structure, charge) epochs
//!            │
//!            ▼
//!   initialize ─► advance(dt)           fixed step
//!             └─► OdeHooks              count / reinit / fun / solve / jacobian
//! ```
//!
//! Every operation takes the host explicitly; the context never holds on to it.

mod currents;
mod layout;
mod ode;
mod snapshot;
mod step;
mod transfer;

pub use snapshot::{Snapshot, SnapshotRegion, SnapshotSpecies};

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};
use nalgebra::DVector;

use crate::arena::Arena;
use crate::diffusion::DiffusionMatrices;
use crate::error::{Result, RxdError};
use crate::geometry::{CenterlineVoxelizer, Voxelizer};
use crate::kinetics::compiler::check_structure;
use crate::kinetics::{CompileInput, JacobianMode, Kinetics, ReactionId, ReactionJacobian, ReactionSystem};
use crate::linalg::LinearSolverOptions;
use crate::morphology::{CompartmentalHost, SectionId};
use crate::node::{FluxUnits, NodeFlux, NodeRef, NodeStore};
use crate::region::{Region, RegionId, VoxelizedRegion};
use crate::species::{DiffusionCoefficient, Instance, Species, SpeciesId};

use currents::CurrentMap;

// =================================================================================================
// Options
// =================================================================================================

/// Engine-wide defaults
#[derive(Debug, Clone, PartialEq)]
pub struct ContextOptions {
    /// BiCGSTAB settings for non-tree diffusion solves
    pub linear: LinearSolverOptions,
    /// Reaction Jacobian used by the variable-step `solve` hook
    pub jacobian: JacobianMode,
    /// Relative perturbation for finite-difference Jacobians
    pub finite_difference_step: f64,
    /// Allow extracellular regions
    pub ecs_enabled: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            linear: LinearSolverOptions::default(),
            jacobian: JacobianMode::Disabled,
            finite_difference_step: 1e-7,
            ecs_enabled: true,
        }
    }
}

impl ContextOptions {
    pub fn with_jacobian(mut self, mode: JacobianMode) -> Self {
        self.jacobian = mode;
        self
    }

    pub fn with_linear(mut self, linear: LinearSolverOptions) -> Self {
        self.linear = linear;
        self
    }

    pub fn without_extracellular(mut self) -> Self {
        self.ecs_enabled = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.linear.validate()?;
        if !(self.finite_difference_step > 0.0 && self.finite_difference_step.is_finite()) {
            return Err(RxdError::InvalidConfiguration(format!(
                "finite-difference step must be positive, got {}",
                self.finite_difference_step
            )));
        }
        Ok(())
    }
}

// =================================================================================================
// Context
// =================================================================================================

type HostCounters = (u64, u64);

/// Owner of all reaction-diffusion state
pub struct ReactionDiffusionContext {
    options: ContextOptions,
    voxelizer: Arc<dyn Voxelizer>,

    regions: Arena<Region>,
    species: Arena<Species>,
    reactions: Arena<Kinetics>,

    nodes: NodeStore,
    instances: Vec<Instance>,
    voxelized: BTreeMap<RegionId, Arc<VoxelizedRegion>>,
    /// Species registered since the last layout
    pending: Vec<SpeciesId>,
    /// Host counters the current layout was built against
    host_counters: Option<HostCounters>,

    structure_epoch: u64,
    reaction_epoch: u64,
    charge_epoch: u64,
    matrices: Option<(u64, DiffusionMatrices)>,
    system: Option<((u64, u64), ReactionSystem)>,
    currents: Option<((u64, u64), CurrentMap)>,
    jacobian: Option<ReactionJacobian>,

    steps: usize,
}

impl std::fmt::Debug for ReactionDiffusionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionDiffusionContext")
            .field("voxelizer", &self.voxelizer.name())
            .field("regions", &self.regions.len())
            .field("species", &self.species.len())
            .field("reactions", &self.reactions.len())
            .field("nodes", &self.nodes.len())
            .field("structure_epoch", &self.structure_epoch)
            .field("steps", &self.steps)
            .finish()
    }
}

impl Default for ReactionDiffusionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactionDiffusionContext {
    pub fn new() -> Self {
        Self {
            options: ContextOptions::default(),
            voxelizer: Arc::new(CenterlineVoxelizer),
            regions: Arena::new("region"),
            species: Arena::new("species"),
            reactions: Arena::new("reaction"),
            nodes: NodeStore::new(),
            instances: Vec::new(),
            voxelized: BTreeMap::new(),
            pending: Vec::new(),
            host_counters: None,
            structure_epoch: 0,
            reaction_epoch: 0,
            charge_epoch: 0,
            matrices: None,
            system: None,
            currents: None,
            jacobian: None,
            steps: 0,
        }
    }

    pub fn with_options(options: ContextOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options, ..Self::new() })
    }

    /// Replace the voxelizer used for 3D regions; forces a relayout
    pub fn with_voxelizer(mut self, voxelizer: Arc<dyn Voxelizer>) -> Self {
        self.voxelizer = voxelizer;
        self.host_counters = None;
        self
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn set_jacobian_mode(&mut self, mode: JacobianMode) {
        self.options.jacobian = mode;
        self.jacobian = None;
    }

    pub fn set_linear_options(&mut self, linear: LinearSolverOptions) -> Result<()> {
        linear.validate()?;
        self.options.linear = linear;
        Ok(())
    }

    /// Bumped on every change that invalidates the diffusion matrices
    pub fn structure_epoch(&self) -> u64 {
        self.structure_epoch
    }

    /// Fixed steps taken so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    // ========================================= Regions ===========================================

    pub fn add_region(&mut self, region: Region) -> Result<RegionId> {
        if region.is_extracellular() && !self.options.ecs_enabled {
            return Err(RxdError::InvalidConfiguration(format!(
                "extracellular region {} added with extracellular support disabled",
                region.name()
            )));
        }
        Ok(self.regions.insert(region))
    }

    pub fn region(&self, id: RegionId) -> Result<&Region> {
        self.regions.get(id)
    }

    pub fn regions(&self) -> &Arena<Region> {
        &self.regions
    }

    /// Destroy a region no species or reaction refers to
    pub fn remove_region(&mut self, id: RegionId) -> Result<Region> {
        self.regions.get(id)?;
        if let Some((_, species)) = self.species.iter().find(|(_, s)| s.regions().contains(&id)) {
            return Err(RxdError::StructuralConflict(format!(
                "region {id:?} is still used by species {}",
                species.name().unwrap_or("<unnamed>")
            )));
        }
        if self.reactions.iter().any(|(_, k)| matches!(k, Kinetics::MultiCompartment(m) if m.membrane == id)) {
            return Err(RxdError::StructuralConflict(format!("region {id:?} is the membrane of a reaction")));
        }
        self.regions.remove(id)
    }

    // ========================================= Species ===========================================

    pub fn add_species(&mut self, species: Species) -> Result<SpeciesId> {
        species.validate()?;
        for &region in species.regions() {
            self.regions.get(region)?;
        }
        self.check_dimensions(species.diffusion(), species.regions())?;
        if let Some(name) = species.name() {
            let clash = self.species.iter().find(|(_, other)| {
                other.name() == Some(name) && other.regions().iter().any(|r| species.regions().contains(r))
            });
            if clash.is_some() {
                return Err(RxdError::StructuralConflict(format!(
                    "a species named {name} already lives on one of these regions"
                )));
            }
        }

        let id = self.species.insert(species);
        self.pending.push(id);
        self.bump_structure();
        Ok(id)
    }

    pub fn species(&self, id: SpeciesId) -> Result<&Species> {
        self.species.get(id)
    }

    pub fn species_arena(&self) -> &Arena<Species> {
        &self.species
    }

    /// Find a species by name
    pub fn species_named(&self, name: &str) -> Option<SpeciesId> {
        self.species.iter().find(|(_, s)| s.name() == Some(name)).map(|(id, _)| id)
    }

    /// Destroy a species, its nodes and every reaction that mentions it
    pub fn remove_species(&mut self, id: SpeciesId) -> Result<Species> {
        let species = self.species.remove(id)?;
        self.pending.retain(|p| *p != id);

        let mut index = self.instances.len();
        while index > 0 {
            index -= 1;
            if self.instances[index].species() != id {
                continue;
            }
            let removed = self.instances.remove(index);
            let range = removed.range();
            self.nodes.remove(range.clone());
            for later in self.instances.iter_mut().filter(|i| i.range().start >= range.end) {
                later.shift_down(range.len());
            }
        }

        let stale: Vec<ReactionId> = self
            .reactions
            .iter()
            .filter(|(_, k)| k.species().contains(&id))
            .map(|(rid, _)| rid)
            .collect();
        for rid in stale {
            warn!("reaction {rid:?} dropped with species {id:?}");
            self.reactions.remove(rid)?;
        }

        self.bump_structure();
        self.reaction_epoch += 1;
        Ok(species)
    }

    /// Change the diffusion coefficient; the matrices are rebuilt on the next request
    ///
    /// Nothing changes when the coefficient is rejected.
    pub fn set_diffusion(&mut self, id: SpeciesId, d: impl Into<DiffusionCoefficient>) -> Result<()> {
        let d = d.into();
        let species = self.species.get(id)?;
        self.check_dimensions(&d, species.regions())?;

        let mut updates = Vec::new();
        for instance in self.instances.iter().filter(|i| i.species() == id) {
            let range = instance.range();
            let diffs = self.nodes.positions()[range.clone()]
                .iter()
                .map(|&position| d.at(position))
                .collect::<Result<Vec<_>>>()?;
            updates.push((range, diffs));
        }

        self.species.get_mut(id)?.set_diffusion(d)?;
        for (range, diffs) in updates {
            self.nodes.diffs_mut()[range].copy_from_slice(&diffs);
        }
        self.bump_structure();
        Ok(())
    }

    /// Per-axis coefficients only make sense on voxel grids
    fn check_dimensions(&self, d: &DiffusionCoefficient, regions: &[RegionId]) -> Result<()> {
        if !matches!(d, DiffusionCoefficient::Anisotropic(_)) {
            return Ok(());
        }
        for &id in regions {
            let region = self.regions.get(id)?;
            if region.is_1d() {
                return Err(RxdError::InvalidSpecies(format!(
                    "anisotropic diffusion needs a 3D region, {} is 1D",
                    region.name()
                )));
            }
        }
        Ok(())
    }

    /// Change the charge; the membrane-current map is rebuilt on the next request
    pub fn set_charge(&mut self, id: SpeciesId, charge: i32) -> Result<()> {
        self.species.get_mut(id)?.set_charge(charge);
        self.charge_epoch += 1;
        self.system = None;
        Ok(())
    }

    // ======================================== Reactions ==========================================

    pub fn add_reaction(&mut self, kinetics: impl Into<Kinetics>) -> Result<ReactionId> {
        let kinetics = kinetics.into();
        kinetics.validate()?;
        for species in kinetics.species() {
            self.species.get(species)?;
        }
        if let Kinetics::MultiCompartment(reaction) = &kinetics {
            self.regions.get(reaction.membrane)?;
        }
        check_structure(&kinetics, &self.species, &self.regions)?;
        let id = self.reactions.insert(kinetics);
        self.reaction_epoch += 1;
        Ok(id)
    }

    pub fn reaction(&self, id: ReactionId) -> Result<&Kinetics> {
        self.reactions.get(id)
    }

    pub fn remove_reaction(&mut self, id: ReactionId) -> Result<Kinetics> {
        let kinetics = self.reactions.remove(id)?;
        self.reaction_epoch += 1;
        Ok(kinetics)
    }

    // ===================================== Derived structure =====================================

    fn bump_structure(&mut self) {
        self.structure_epoch += 1;
        self.jacobian = None;
    }

    /// Bring the layout and every cache up to date with the host and the registries
    pub fn ensure_current(&mut self, host: &dyn CompartmentalHost) -> Result<()> {
        let counters = (host.structure_change_count(), host.diam_change_count());
        if self.host_counters != Some(counters) {
            self.relayout(host)?;
            self.host_counters = Some(counters);
        } else if !self.pending.is_empty() {
            self.append_pending(host)?;
        }

        if !matches!(&self.matrices, Some((epoch, _)) if *epoch == self.structure_epoch) {
            let matrices =
                DiffusionMatrices::assemble(&self.nodes, &self.instances, &self.regions, host.morphology())?;
            self.matrices = Some((self.structure_epoch, matrices));
        }

        let reaction_key = (self.structure_epoch, self.reaction_epoch);
        if !matches!(&self.system, Some((key, _)) if *key == reaction_key) {
            let input = CompileInput {
                species: &self.species,
                regions: &self.regions,
                instances: &self.instances,
                nodes: &self.nodes,
                host,
            };
            let system = ReactionSystem::compile(&self.reactions, &input)?;
            self.system = Some((reaction_key, system));
            self.jacobian = None;
        }

        let current_key = (self.structure_epoch, self.charge_epoch);
        if !matches!(&self.currents, Some((key, _)) if *key == current_key) {
            let map = CurrentMap::build(
                &self.species,
                &self.regions,
                &self.instances,
                &self.nodes,
                host,
                self.options.ecs_enabled,
            )?;
            debug!("membrane current map rebuilt: {} entries", map.len());
            self.currents = Some((current_key, map));
        }
        Ok(())
    }

    /// Diffusion matrices of the current epoch
    pub fn matrices(&mut self, host: &dyn CompartmentalHost) -> Result<&DiffusionMatrices> {
        self.ensure_current(host)?;
        self.matrices.as_ref().map(|(_, m)| m).ok_or_else(not_ready)
    }

    /// Compiled reactions of the current epoch
    pub fn reaction_system(&mut self, host: &dyn CompartmentalHost) -> Result<&ReactionSystem> {
        self.ensure_current(host)?;
        self.system.as_ref().map(|(_, s)| s).ok_or_else(not_ready)
    }

    fn cached(&self) -> Result<(&DiffusionMatrices, &ReactionSystem, &CurrentMap)> {
        match (&self.matrices, &self.system, &self.currents) {
            (Some((_, matrices)), Some((_, system)), Some((_, currents))) => Ok((matrices, system, currents)),
            _ => Err(not_ready()),
        }
    }

    /// `D·s + reactions + currents + fluxes` at `states`, zero at fixed nodes
    fn rates(&self, states: &DVector<f64>, host: &dyn CompartmentalHost) -> Result<DVector<f64>> {
        let (matrices, system, currents) = self.cached()?;
        let mut rates = matrices.apply(states);
        system.evaluate(states.as_slice(), &self.nodes, host, rates.as_mut_slice());
        currents.apply(host, rates.as_mut_slice());
        self.nodes.accumulate_fluxes(&mut rates);
        for (i, rate) in rates.iter_mut().enumerate() {
            if self.nodes.is_fixed(i) {
                *rate = 0.0;
            }
        }
        Ok(rates)
    }

    // ========================================== Nodes ============================================

    pub fn node_store(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn states(&self) -> &DVector<f64> {
        self.nodes.states()
    }

    fn instance_containing(&self, node: usize) -> Option<&Instance> {
        self.instances.iter().find(|i| i.range().contains(&node))
    }

    pub(crate) fn node_ref(&self, index: usize) -> Option<NodeRef> {
        let instance = self.instance_containing(index)?;
        Some(NodeRef {
            index,
            species: instance.species(),
            region: instance.region(),
            location: self.nodes.locations()[index],
            position: self.nodes.positions()[index],
            volume: self.nodes.volumes()[index],
        })
    }

    /// Every node of a species, across all its regions
    pub fn nodes(&self, species: SpeciesId) -> Result<Vec<NodeRef>> {
        self.species.get(species)?;
        Ok(self
            .instances
            .iter()
            .filter(|i| i.species() == species)
            .flat_map(|i| i.range())
            .filter_map(|index| self.node_ref(index))
            .collect())
    }

    /// 1D node of `species` covering normalized position `x` of `section`
    pub fn node_by_location(&self, species: SpeciesId, section: SectionId, x: f64) -> Result<Option<usize>> {
        self.species.get(species)?;
        Ok(self.instances.iter().find_map(|instance| match instance {
            Instance::OneD(one_d) if one_d.species == species => one_d.section(section).map(|s| s.node_at(x)),
            _ => None,
        }))
    }

    fn check_node(&self, node: usize) -> Result<()> {
        if node < self.nodes.len() {
            Ok(())
        } else {
            Err(RxdError::InvalidConfiguration(format!("node {node} out of range ({} nodes)", self.nodes.len())))
        }
    }

    pub fn concentration(&self, node: usize) -> Result<f64> {
        self.check_node(node)?;
        Ok(self.nodes.states()[node])
    }

    pub fn set_concentration(&mut self, node: usize, value: f64) -> Result<()> {
        self.check_node(node)?;
        if !value.is_finite() {
            return Err(RxdError::InvalidConfiguration(format!("non-finite concentration {value} for node {node}")));
        }
        self.nodes.states_mut()[node] = value;
        Ok(())
    }

    /// Attach a constant source to one node
    pub fn add_node_flux(&mut self, node: usize, rate: f64, units: FluxUnits) -> Result<()> {
        self.check_node(node)?;
        self.nodes.add_flux(NodeFlux { node, rate, units });
        Ok(())
    }

    /// Σ c·vol over every node of a species (mM·µm³)
    pub fn total_amount(&self, species: SpeciesId) -> Result<f64> {
        self.species.get(species)?;
        Ok(self
            .instances
            .iter()
            .filter(|i| i.species() == species)
            .map(|i| self.nodes.amount(i.range()))
            .sum())
    }
}

fn not_ready() -> RxdError {
    RxdError::InvalidConfiguration("context is not set up; call ensure_current first".into())
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::kinetics::{Expr, MultiCompartmentReaction, Rate, Reaction, SpeciesRef};
    use crate::morphology::{Morphology, Section, StaticHost};
    use crate::region::ExtracellularBox;
    use crate::species::InitialValue;

    fn cable(nseg: usize) -> (StaticHost, SectionId) {
        let mut morphology = Morphology::new();
        let id = morphology.add_section(Section::cylinder("dend", [0.0; 3], 10.0, 1.0, nseg).unwrap());
        (StaticHost::new(morphology), id)
    }

    #[test]
    fn test_options_validation() {
        assert!(ContextOptions::default().validate().is_ok());
        let options = ContextOptions { finite_difference_step: 0.0, ..ContextOptions::default() };
        assert!(ReactionDiffusionContext::with_options(options).is_err());
    }

    #[test]
    fn test_species_layout_on_first_use() {
        let (host, dend) = cable(4);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let ca = ctx.add_species(Species::new(vec![cyt]).named("ca").with_diffusion(0.6)).unwrap();

        assert_eq!(ctx.node_store().len(), 0);
        ctx.ensure_current(&host).unwrap();
        // one root ghost plus four segments
        assert_eq!(ctx.node_store().len(), 5);
        assert_eq!(ctx.nodes(ca).unwrap().len(), 5);
        assert_eq!(ctx.node_by_location(ca, dend, 0.6).unwrap(), Some(3));
    }

    #[test]
    fn test_name_collision_on_shared_region() {
        let (_, dend) = cable(2);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        ctx.add_species(Species::new(vec![cyt]).named("ca")).unwrap();
        let err = ctx.add_species(Species::new(vec![cyt]).named("ca")).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_remove_species_compacts_nodes() {
        let (host, dend) = cable(3);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let a = ctx
            .add_species(Species::new(vec![cyt]).with_initial(InitialValue::Constant(1.0)))
            .unwrap();
        let b = ctx
            .add_species(Species::new(vec![cyt]).with_initial(InitialValue::Constant(2.0)))
            .unwrap();
        ctx.add_reaction(Reaction::new(vec![(a, 1)], vec![(b, 1)], Expr::constant(0.1)))
            .unwrap();
        ctx.initialize(&mut host.clone()).unwrap();
        assert_eq!(ctx.node_store().len(), 8);

        ctx.remove_species(a).unwrap();
        assert_eq!(ctx.node_store().len(), 4);
        assert!(ctx.reactions.is_empty());
        assert!(matches!(ctx.species(a), Err(RxdError::StaleHandle { .. })));
        let b_nodes = ctx.nodes(b).unwrap();
        assert_eq!(b_nodes[0].index, 0);
        assert_eq!(ctx.concentration(b_nodes[1].index).unwrap(), 2.0);
    }

    #[test]
    fn test_lookup_by_name_and_reaction_removal() {
        let (host, dend) = cable(2);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let ca = ctx.add_species(Species::new(vec![cyt]).named("ca")).unwrap();
        let buf = ctx.add_species(Species::new(vec![cyt])).unwrap();
        assert_eq!(ctx.species_named("ca"), Some(ca));
        assert_eq!(ctx.species_named("k"), None);

        let id = ctx.add_reaction(Reaction::new(vec![(ca, 1)], vec![(buf, 1)], 1.0)).unwrap();
        assert_eq!(ctx.reaction_system(&host).unwrap().groups().len(), 1);

        ctx.remove_reaction(id).unwrap();
        assert!(ctx.reaction(id).is_err());
        assert!(ctx.reaction_system(&host).unwrap().groups().is_empty());
    }

    #[test]
    fn test_region_in_use_cannot_be_removed() {
        let (_, dend) = cable(1);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let ca = ctx.add_species(Species::new(vec![cyt])).unwrap();
        assert!(ctx.remove_region(cyt).unwrap_err().is_structural());
        ctx.remove_species(ca).unwrap();
        assert!(ctx.remove_region(cyt).is_ok());
    }

    #[test]
    fn test_extracellular_disabled() {
        let mut ctx = ReactionDiffusionContext::with_options(ContextOptions::default().without_extracellular()).unwrap();
        let grid = ExtracellularBox::new([0.0; 3], [4.0; 3], [2.0; 3]).unwrap();
        let err = ctx.add_region(Region::extracellular("ecs", grid)).unwrap_err();
        assert!(matches!(err, RxdError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_matrices_debounced_within_epoch() {
        let (host, dend) = cable(3);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let ca = ctx.add_species(Species::new(vec![cyt]).with_diffusion(1.0)).unwrap();

        let first = ctx.matrices(&host).unwrap().operator().data().to_vec();
        let epoch = ctx.structure_epoch();
        let second = ctx.matrices(&host).unwrap().operator().data().to_vec();
        assert_eq!(epoch, ctx.structure_epoch());
        assert_eq!(first, second);

        ctx.set_diffusion(ca, 2.0).unwrap();
        assert!(ctx.structure_epoch() > epoch);
        let third = ctx.matrices(&host).unwrap().operator().data().to_vec();
        assert_ne!(first, third);
    }

    #[test]
    fn test_anisotropic_diffusion_rejected_on_1d_region() {
        let (_, dend) = cable(2);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();

        let err = ctx
            .add_species(Species::new(vec![cyt]).with_diffusion(DiffusionCoefficient::Anisotropic([1.0, 0.5, 0.5])))
            .unwrap_err();
        assert!(matches!(err, RxdError::InvalidSpecies(_)), "{err}");
        assert!(ctx.species_arena().is_empty());
    }

    #[test]
    fn test_rejected_set_diffusion_leaves_state_alone() {
        let (host, dend) = cable(3);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let ca = ctx.add_species(Species::new(vec![cyt]).with_diffusion(0.6)).unwrap();
        ctx.ensure_current(&host).unwrap();
        let diffs = ctx.node_store().diffs().to_vec();
        let epoch = ctx.structure_epoch();

        let err = ctx.set_diffusion(ca, DiffusionCoefficient::Anisotropic([1.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(err, RxdError::InvalidSpecies(_)), "{err}");
        let err = ctx
            .set_diffusion(ca, DiffusionCoefficient::Function(Arc::new(|p| 1.0 - p[0])))
            .unwrap_err();
        assert!(matches!(err, RxdError::InvalidSpecies(_)), "{err}");

        assert_eq!(ctx.node_store().diffs(), diffs.as_slice());
        assert_eq!(ctx.structure_epoch(), epoch);
        assert!(matches!(ctx.species(ca).unwrap().diffusion(), DiffusionCoefficient::Scalar(d) if *d == 0.6));
    }

    #[test]
    fn test_function_diffusion_evaluated_per_node() {
        let (host, dend) = cable(4);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let ca = ctx
            .add_species(Species::new(vec![cyt]).with_diffusion(DiffusionCoefficient::Function(Arc::new(|p| p[0]))))
            .unwrap();
        ctx.ensure_current(&host).unwrap();

        let store = ctx.node_store();
        for node in ctx.nodes(ca).unwrap() {
            let x = store.positions()[node.index][0];
            assert_eq!(store.diffs()[node.index], [x; 3]);
        }

        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        ctx.add_species(Species::new(vec![cyt]).with_diffusion(DiffusionCoefficient::Function(Arc::new(|_| -5.0))))
            .unwrap();
        let err = ctx.ensure_current(&host).unwrap_err();
        assert!(matches!(err, RxdError::InvalidSpecies(_)), "{err}");
    }

    #[test]
    fn test_structurally_invalid_reactions_rejected_when_added() {
        let (host, dend) = cable(2);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let er = ctx
            .add_region(Region::new("er", vec![dend], Geometry::fractional_volume(0.1, 0.0, None).unwrap()).unwrap())
            .unwrap();
        let ca = ctx.add_species(Species::new(vec![cyt, er])).unwrap();

        // membrane is a volume geometry
        let mcr = MultiCompartmentReaction::new(
            vec![(SpeciesRef::on(ca, er), 1)],
            vec![(SpeciesRef::on(ca, cyt), 1)],
            1.0,
            er,
        );
        let err = ctx.add_reaction(mcr).unwrap_err();
        assert!(matches!(err, RxdError::InvalidReaction(_)), "{err}");

        // pinned to two regions
        let reaction = Reaction::new(vec![(SpeciesRef::on(ca, er), 1)], vec![(SpeciesRef::on(ca, cyt), 1)], 1.0);
        let err = ctx.add_reaction(reaction).unwrap_err();
        assert!(matches!(err, RxdError::InvalidReaction(_)), "{err}");

        // flux across an untagged region
        let err = ctx.add_reaction(Rate::new(ca, Expr::constant(1.0)).with_membrane_flux()).unwrap_err();
        assert!(matches!(err, RxdError::InvalidReaction(_)), "{err}");

        assert!(ctx.reactions.is_empty());
        assert!(ctx.reaction_system(&host).unwrap().groups().is_empty());
    }

    #[test]
    fn test_node_queries_reject_out_of_range() {
        let mut ctx = ReactionDiffusionContext::new();
        assert!(ctx.concentration(0).is_err());
        assert!(ctx.set_concentration(0, 1.0).is_err());
        assert!(ctx.add_node_flux(3, 1.0, FluxUnits::MillimolarPerMs).is_err());
    }
}
