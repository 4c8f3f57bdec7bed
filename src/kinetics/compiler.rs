//! Reaction compiler
//!
//! # Grouping
//!
//! Every reaction is expanded into *kernels*, one per region it runs on. A kernel is anchored on
//! the region whose segments (or voxels) it is evaluated at, and touches a set of regions: the
//! anchor plus every region its species are pinned to. Kernels with the same anchor and the same
//! region set share one [`ReactionGroup`]:
//!
//! ```text
//!   Reaction  ca + buf <-> cabuf          on cyt         ─┐
//!   Rate      ip3 decay                   on cyt         ─┴─► group {cyt} @ cyt
//!   MCR       ca[er] <-> ca[cyt]          across er_mem  ───► group {cyt, er, er_mem} @ er_mem
//!   Reaction  k decay                     on ecs         ───► group grid(ecs)
//! ```
//!
//! Inside a group, each `(species, region)` pair gets a dense slot. Loci map slots to node
//! indices; programs only ever see slot values.
//!
//! # Multipliers
//!
//! A kernel's rate lands on each target slot as `ν · rate`, where `ν` is the net
//! stoichiometry. For area-scaled multi-compartment reactions the rate is in molecules/µm²/ms and
//! the multiplier becomes `ν · area / (vol · N)` with `N` molecules per mM·µm³.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::arena::Arena;
use crate::error::{Result, RxdError};
use crate::morphology::{CompartmentalHost, IonSide, Morphology, SectionId, SegmentRef};
use crate::node::{NodeStore, MOLECULES_PER_MM_UM3};
use crate::region::{Region, RegionId};
use crate::species::{FieldKind, Instance, Species, SpeciesId};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::bytecode::Program;
use super::expr::{Expr, SpeciesRef};
use super::reaction::{net_stoichiometry, Kinetics, MultiCompartmentReaction, Rate, Reaction, ReactionId};
use super::FARADAY;

/// Everything the compiler reads from the current layout
pub struct CompileInput<'a> {
    pub species: &'a Arena<Species>,
    pub regions: &'a Arena<Region>,
    pub instances: &'a [Instance],
    pub nodes: &'a NodeStore,
    pub host: &'a dyn CompartmentalHost,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    /// Kernels evaluated at the segments or voxels of `anchor`
    Regions { regions: Vec<RegionId>, anchor: RegionId },
    /// Extracellular-only kernels of one grid
    Grid(RegionId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub slot: usize,
    pub stoichiometry: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scaling {
    Concentration,
    PerArea,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CurrentScale {
    /// Membrane area over host segment area
    AreaRatio,
    /// Node volume of a slot over host segment area
    Volume(usize),
}

/// Outward current contributed per unit rate
#[derive(Debug, Clone, PartialEq)]
struct IonCurrent {
    ion: String,
    factor: f64,
    scale: CurrentScale,
}

/// One compiled rate and where it goes
#[derive(Debug, Clone)]
pub struct Kernel {
    pub reaction: ReactionId,
    pub rate: Program,
    /// `∂rate/∂slot` for every slot the rate reads
    pub derivatives: Vec<(usize, Program)>,
    pub targets: Vec<Target>,
    /// Slots that must resolve to a node for the kernel to run at a locus
    pub required: Vec<usize>,
    scaling: Scaling,
    currents: Vec<IonCurrent>,
}

/// One evaluation site of a group
#[derive(Debug, Clone, PartialEq)]
pub struct Locus {
    pub segment: Option<SegmentRef>,
    /// Node of each slot, if the slot's species exists here
    pub nodes: Vec<Option<usize>>,
    /// Membrane area at this site (µm²), multi-compartment anchors only
    pub membrane_area: f64,
    /// Host membrane area of the segment (µm²)
    pub host_area: f64,
}

#[derive(Debug, Clone)]
pub struct ReactionGroup {
    key: GroupKey,
    slots: Vec<(SpeciesId, RegionId)>,
    kernels: Vec<Kernel>,
    loci: Vec<Locus>,
}

impl ReactionGroup {
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// `(species, region)` of every slot
    pub fn slots(&self) -> &[(SpeciesId, RegionId)] {
        &self.slots
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    pub fn loci(&self) -> &[Locus] {
        &self.loci
    }

    pub(crate) fn slot_values(&self, locus: &Locus, states: &[f64]) -> Vec<f64> {
        locus.nodes.iter().map(|node| node.map_or(0.0, |n| states[n])).collect()
    }

    pub(crate) fn runs_at(&self, kernel: &Kernel, locus: &Locus) -> bool {
        kernel.required.iter().all(|&slot| locus.nodes[slot].is_some())
    }

    /// Multiplier applied to a kernel's rate for one target at one locus
    pub(crate) fn multiplier(&self, kernel: &Kernel, target: &Target, locus: &Locus, volumes: &[f64]) -> f64 {
        match kernel.scaling {
            Scaling::Concentration => target.stoichiometry,
            Scaling::PerArea => match locus.nodes[target.slot] {
                Some(node) if volumes[node] > 0.0 => {
                    target.stoichiometry * locus.membrane_area / (volumes[node] * MOLECULES_PER_MM_UM3)
                }
                _ => 0.0,
            },
        }
    }

    /// `(node, d[node]/dt)` contributions of one locus
    fn locus_rates(&self, locus: &Locus, states: &[f64], volumes: &[f64], voltage: f64) -> Vec<(usize, f64)> {
        let values = self.slot_values(locus, states);
        let mut stack = Vec::new();
        let mut out = Vec::new();
        for kernel in &self.kernels {
            if !self.runs_at(kernel, locus) {
                continue;
            }
            let rate = kernel.rate.eval_with(&values, voltage, &mut stack);
            for target in &kernel.targets {
                if let Some(node) = locus.nodes[target.slot] {
                    out.push((node, self.multiplier(kernel, target, locus, volumes) * rate));
                }
            }
        }
        out
    }

    /// Add this group's reaction rates into `rhs`
    pub fn evaluate(&self, states: &[f64], nodes: &NodeStore, voltages: &[f64], rhs: &mut [f64]) {
        for (node, value) in self.contributions(states, nodes.volumes(), voltages).into_iter().flatten() {
            if !nodes.is_fixed(node) {
                rhs[node] += value;
            }
        }
    }

    #[cfg(feature = "parallel")]
    fn contributions(&self, states: &[f64], volumes: &[f64], voltages: &[f64]) -> Vec<Vec<(usize, f64)>> {
        if self.loci.len() > crate::solver::parallel_threshold() {
            self.loci
                .par_iter()
                .zip(voltages.par_iter())
                .map(|(locus, &v)| self.locus_rates(locus, states, volumes, v))
                .collect()
        } else {
            self.loci.iter().zip(voltages).map(|(locus, &v)| self.locus_rates(locus, states, volumes, v)).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn contributions(&self, states: &[f64], volumes: &[f64], voltages: &[f64]) -> Vec<Vec<(usize, f64)>> {
        self.loci.iter().zip(voltages).map(|(locus, &v)| self.locus_rates(locus, states, volumes, v)).collect()
    }

    /// Membrane potential at every locus
    pub fn voltages(&self, host: &dyn CompartmentalHost) -> Vec<f64> {
        self.loci
            .iter()
            .map(|locus| locus.segment.map_or(0.0, |segment| host.membrane_potential(segment)))
            .collect()
    }

    /// Outward ion currents (mA/cm²) induced at every locus
    pub fn induced_currents(&self, states: &[f64], volumes: &[f64], voltages: &[f64]) -> Vec<(String, SegmentRef, f64)> {
        let mut out = Vec::new();
        for (locus, &v) in self.loci.iter().zip(voltages) {
            let Some(segment) = locus.segment else { continue };
            if locus.host_area <= 0.0 {
                continue;
            }
            let values = self.slot_values(locus, states);
            for kernel in self.kernels.iter().filter(|k| !k.currents.is_empty()) {
                if !self.runs_at(kernel, locus) {
                    continue;
                }
                let rate = kernel.rate.eval(&values, v);
                for current in &kernel.currents {
                    let scale = match current.scale {
                        CurrentScale::AreaRatio => locus.membrane_area / locus.host_area,
                        CurrentScale::Volume(slot) => {
                            locus.nodes[slot].map_or(0.0, |node| volumes[node]) / locus.host_area
                        }
                    };
                    out.push((current.ion.clone(), segment, current.factor * scale * rate));
                }
            }
        }
        out
    }
}

// =================================================================================================
// Compiled reaction set
// =================================================================================================

/// All groups of one reaction epoch
#[derive(Debug, Clone, Default)]
pub struct ReactionSystem {
    groups: Vec<ReactionGroup>,
}

impl ReactionSystem {
    pub fn compile(reactions: &Arena<Kinetics>, input: &CompileInput<'_>) -> Result<Self> {
        let mut drafts: BTreeMap<GroupKey, Draft> = BTreeMap::new();

        for (id, kinetics) in reactions.iter() {
            kinetics.validate()?;
            for plan in plan(id, kinetics, input)? {
                let key = plan.key(input)?;
                drafts.entry(key).or_insert_with(|| Draft::new(plan.anchor)).add(id, plan)?;
            }
        }

        let mut groups = Vec::with_capacity(drafts.len());
        for (key, draft) in drafts {
            groups.push(draft.finish(key, input)?);
        }

        debug!(
            "compiled {} reactions into {} groups ({} kernels)",
            reactions.len(),
            groups.len(),
            groups.iter().map(|g| g.kernels.len()).sum::<usize>()
        );
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[ReactionGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Add every reaction rate into `rhs`
    pub fn evaluate(&self, states: &[f64], nodes: &NodeStore, host: &dyn CompartmentalHost, rhs: &mut [f64]) {
        for group in &self.groups {
            let voltages = group.voltages(host);
            group.evaluate(states, nodes, &voltages, rhs);
        }
    }

    /// Outward currents induced by membrane-flux kinetics, summed per (ion, segment)
    pub fn induced_currents(
        &self,
        states: &[f64],
        nodes: &NodeStore,
        host: &dyn CompartmentalHost,
    ) -> BTreeMap<(String, SegmentRef), f64> {
        let mut totals = BTreeMap::new();
        for group in &self.groups {
            let voltages = group.voltages(host);
            for (ion, segment, value) in group.induced_currents(states, nodes.volumes(), &voltages) {
                *totals.entry((ion, segment)).or_insert(0.0) += value;
            }
        }
        totals
    }
}

// =================================================================================================
// Planning: one kernel per (reaction, anchor region)
// =================================================================================================

struct Plan {
    anchor: RegionId,
    rate: Expr,
    targets: Vec<(SpeciesRef, f64)>,
    scaling: Scaling,
    /// (species ref, current factor, scale) before slot resolution
    currents: Vec<(String, f64, Option<SpeciesRef>)>,
}

impl Plan {
    /// Pin every unqualified reference to the anchor
    fn qualify(&self, species: SpeciesRef) -> (SpeciesId, RegionId) {
        (species.species, species.region.unwrap_or(self.anchor))
    }

    fn touched(&self) -> Vec<(SpeciesId, RegionId)> {
        let refs = self.rate.species_refs().into_iter().chain(self.targets.iter().map(|(s, _)| *s));
        refs.map(|s| self.qualify(s)).collect()
    }

    fn key(&self, input: &CompileInput<'_>) -> Result<GroupKey> {
        let mut regions: Vec<RegionId> = self.touched().into_iter().map(|(_, r)| r).collect();
        regions.push(self.anchor);
        regions.sort();
        regions.dedup();

        let all_extracellular = regions
            .iter()
            .map(|r| input.regions.get(*r).map(Region::is_extracellular))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .all(|ecs| ecs);
        Ok(if all_extracellular && regions.len() == 1 {
            GroupKey::Grid(self.anchor)
        } else {
            GroupKey::Regions { regions, anchor: self.anchor }
        })
    }
}

fn lives_on(input: &CompileInput<'_>, species: SpeciesId, region: RegionId) -> Result<bool> {
    Ok(input.species.get(species)?.regions().contains(&region))
}

/// Every unqualified reference lives on `anchor`, every qualified one on its own region
fn available(input: &CompileInput<'_>, refs: &[SpeciesRef], anchor: RegionId) -> Result<bool> {
    for species in refs {
        if !lives_on(input, species.species, species.region.unwrap_or(anchor))? {
            return Ok(false);
        }
    }
    Ok(true)
}

// =================================================================================================
// Structural checks
// =================================================================================================

/// Checks that depend only on the registries
///
/// Run when a reaction is added, so a malformed reaction never reaches a compile.
pub fn check_structure(kinetics: &Kinetics, species: &Arena<Species>, regions: &Arena<Region>) -> Result<()> {
    match kinetics {
        Kinetics::Rate(rate) => check_membrane_flux_rate(rate, species, regions),
        Kinetics::Reaction(reaction) => pinned_region(reaction).map(|_| ()),
        Kinetics::MultiCompartment(mcr) => check_membrane(mcr, regions),
    }
}

/// The one region a single-compartment reaction is pinned to, if any
fn pinned_region(reaction: &Reaction) -> Result<Option<RegionId>> {
    let mut pinned: Vec<RegionId> = reaction.lhs.iter().chain(&reaction.rhs).filter_map(|(s, _)| s.region).collect();
    pinned.sort();
    pinned.dedup();
    if pinned.len() > 1 {
        return Err(RxdError::InvalidReaction(
            "reaction spans several regions; use a multi-compartment reaction".into(),
        ));
    }
    Ok(pinned.first().copied())
}

fn rate_anchors(rate: &Rate, species: &Species) -> Vec<RegionId> {
    match (&rate.regions, rate.species.region) {
        (Some(regions), _) => regions.clone(),
        (None, Some(region)) => vec![region],
        (None, None) => species.regions().to_vec(),
    }
}

fn check_membrane_flux_rate(rate: &Rate, species: &Arena<Species>, regions: &Arena<Region>) -> Result<()> {
    if !rate.membrane_flux {
        return Ok(());
    }
    let target = species.get(rate.species.species)?;
    for anchor in rate_anchors(rate, target) {
        if !target.regions().contains(&anchor) {
            continue;
        }
        let region = regions.get(anchor)?;
        if target.name().is_none() || region.tag().is_none() {
            return Err(RxdError::InvalidReaction(
                "rate has a membrane flux but its species is unnamed or its region untagged".into(),
            ));
        }
        if !region.is_1d() {
            return Err(RxdError::InvalidReaction("membrane flux is only supported on 1D regions".into()));
        }
    }
    Ok(())
}

fn check_membrane(mcr: &MultiCompartmentReaction, regions: &Arena<Region>) -> Result<()> {
    let membrane = regions.get(mcr.membrane)?;
    if !membrane.is_area() {
        return Err(RxdError::InvalidReaction(format!(
            "multi-compartment reaction: membrane {} is not an area geometry",
            membrane.name()
        )));
    }
    if !membrane.is_1d() {
        return Err(RxdError::InvalidReaction(format!(
            "multi-compartment reaction: membrane {} must be 1D",
            membrane.name()
        )));
    }
    let rate = mcr.rate();
    let refs = rate.species_refs().into_iter().chain(mcr.lhs.iter().chain(&mcr.rhs).map(|(s, _)| *s));
    for species in refs {
        if let Some(region) = species.region
            && regions.get(region)?.voxel_dx().is_some()
        {
            return Err(RxdError::InvalidReaction(
                "multi-compartment reaction: 3D intracellular regions are not supported".into(),
            ));
        }
    }
    Ok(())
}

// =================================================================================================
// Planning
// =================================================================================================

fn plan(id: ReactionId, kinetics: &Kinetics, input: &CompileInput<'_>) -> Result<Vec<Plan>> {
    match kinetics {
        Kinetics::Rate(rate) => plan_rate(id, rate, input),
        Kinetics::Reaction(reaction) => plan_reaction(id, reaction, input),
        Kinetics::MultiCompartment(mcr) => plan_multi_compartment(id, mcr, input).map(|p| p.into_iter().collect()),
    }
}

fn plan_rate(id: ReactionId, rate: &Rate, input: &CompileInput<'_>) -> Result<Vec<Plan>> {
    let species = input.species.get(rate.species.species)?;
    check_membrane_flux_rate(rate, input.species, input.regions)?;
    let anchors = rate_anchors(rate, species);
    if species.kind() == FieldKind::Parameter {
        warn!("rate {id:?} targets parameter {:?}; it will not change", rate.species.species);
    }

    let mut refs = rate.rate.species_refs();
    refs.push(SpeciesRef::from(rate.species.species));

    let mut plans = Vec::new();
    for anchor in anchors {
        if !available(input, &refs, anchor)? {
            warn!("rate {id:?}: species missing on region {anchor:?}, skipped there");
            continue;
        }
        let target = SpeciesRef::on(rate.species.species, anchor);
        let mut currents = Vec::new();
        if rate.membrane_flux
            && let (Some(name), Some(side)) = (species.name(), input.regions.get(anchor)?.tag())
        {
            let factor = side.current_sign() * species.charge() as f64 * FARADAY * 1e-4;
            currents.push((name.to_string(), factor, Some(target)));
        }
        plans.push(Plan {
            anchor,
            rate: rate.rate.clone(),
            targets: vec![(target, 1.0)],
            scaling: Scaling::Concentration,
            currents,
        });
    }
    Ok(plans)
}

fn plan_reaction(id: ReactionId, reaction: &Reaction, input: &CompileInput<'_>) -> Result<Vec<Plan>> {
    let sides: Vec<SpeciesRef> = reaction.lhs.iter().chain(&reaction.rhs).map(|(s, _)| *s).collect();

    let anchors = match (&reaction.regions, pinned_region(reaction)?) {
        (Some(regions), _) => regions.clone(),
        (None, Some(region)) => vec![region],
        (None, None) => {
            // regions shared by every participant
            let mut common: Option<Vec<RegionId>> = None;
            for species in &sides {
                let regions = input.species.get(species.species)?.regions().to_vec();
                common = Some(match common {
                    None => regions,
                    Some(acc) => acc.into_iter().filter(|r| regions.contains(r)).collect(),
                });
            }
            common.unwrap_or_default()
        }
    };

    for (species, change) in net_stoichiometry(&reaction.lhs, &reaction.rhs) {
        if input.species.get(species.species)?.kind() == FieldKind::Parameter && change != 0.0 {
            warn!("reaction {id:?} changes parameter {:?}; it will not change", species.species);
        }
    }

    let rate = reaction.rate();
    let mut refs = rate.species_refs();
    refs.extend(sides.iter().copied());

    let mut plans = Vec::new();
    for anchor in anchors {
        if !available(input, &refs, anchor)? {
            warn!("reaction {id:?}: species missing on region {anchor:?}, skipped there");
            continue;
        }
        plans.push(Plan {
            anchor,
            rate: rate.clone(),
            targets: net_stoichiometry(&reaction.lhs, &reaction.rhs),
            scaling: Scaling::Concentration,
            currents: Vec::new(),
        });
    }
    if plans.is_empty() {
        warn!("reaction {id:?} runs nowhere");
    }
    Ok(plans)
}

fn plan_multi_compartment(
    id: ReactionId,
    mcr: &MultiCompartmentReaction,
    input: &CompileInput<'_>,
) -> Result<Option<Plan>> {
    check_membrane(mcr, input.regions)?;

    let rate = mcr.rate();
    let mut refs = rate.species_refs();
    refs.extend(mcr.lhs.iter().chain(&mcr.rhs).map(|(s, _)| *s));
    if !available(input, &refs, mcr.membrane)? {
        warn!("multi-compartment reaction {id:?}: species missing on its regions, skipped");
        return Ok(None);
    }

    let targets = net_stoichiometry(&mcr.lhs, &mcr.rhs);
    let currents = if mcr.membrane_flux { membrane_currents(id, &targets, input)? } else { Vec::new() };

    Ok(Some(Plan {
        anchor: mcr.membrane,
        rate,
        targets,
        scaling: if mcr.scale_by_area { Scaling::PerArea } else { Scaling::Concentration },
        currents,
    }))
}

/// Charge carriers of a membrane-flux reaction, taken from the inside when possible
fn membrane_currents(
    id: ReactionId,
    targets: &[(SpeciesRef, f64)],
    input: &CompileInput<'_>,
) -> Result<Vec<(String, f64, Option<SpeciesRef>)>> {
    let mut carriers = Vec::new();
    for (species_ref, change) in targets {
        let species = input.species.get(species_ref.species)?;
        let side = match species_ref.region {
            Some(region) => input.regions.get(region)?.tag(),
            None => None,
        };
        if let (Some(name), Some(side)) = (species.name(), side)
            && species.charge() != 0
        {
            carriers.push((side, name.to_string(), species.charge() as f64 * change));
        }
    }

    let inside: Vec<_> = carriers.iter().filter(|(side, ..)| *side == IonSide::Inside).collect();
    let chosen = if inside.is_empty() { carriers.iter().collect() } else { inside };
    if chosen.is_empty() {
        return Err(RxdError::InvalidReaction(format!(
            "multi-compartment reaction {id:?}: no named, charged species on a tagged region carries its current"
        )));
    }
    Ok(chosen
        .into_iter()
        .map(|(side, name, zv)| {
            (name.clone(), side.current_sign() * zv * FARADAY / (1e4 * MOLECULES_PER_MM_UM3), None)
        })
        .collect())
}

// =================================================================================================
// Drafts: slot tables and loci
// =================================================================================================

struct Draft {
    anchor: RegionId,
    slots: Vec<(SpeciesId, RegionId)>,
    kernels: Vec<Kernel>,
}

impl Draft {
    fn new(anchor: RegionId) -> Self {
        Self { anchor, slots: Vec::new(), kernels: Vec::new() }
    }

    fn slot(&mut self, key: (SpeciesId, RegionId)) -> usize {
        match self.slots.iter().position(|s| *s == key) {
            Some(slot) => slot,
            None => {
                self.slots.push(key);
                self.slots.len() - 1
            }
        }
    }

    fn add(&mut self, reaction: ReactionId, plan: Plan) -> Result<()> {
        let local = plan.rate.lower(&mut |species| Ok(self.slot(plan.qualify(species))))?;
        let targets: Vec<Target> = plan
            .targets
            .iter()
            .map(|(species, stoichiometry)| Target { slot: self.slot(plan.qualify(*species)), stoichiometry: *stoichiometry })
            .collect();

        let mut required: Vec<usize> = (0..self.slots.len()).filter(|&s| local.depends_on(s)).collect();
        required.extend(targets.iter().map(|t| t.slot));
        required.sort_unstable();
        required.dedup();

        let derivatives = (0..self.slots.len())
            .filter(|&s| local.depends_on(s))
            .map(|s| (s, Program::compile(&local.derivative(s))))
            .collect();

        let currents = plan
            .currents
            .iter()
            .map(|(ion, factor, volume_of)| IonCurrent {
                ion: ion.clone(),
                factor: *factor,
                scale: match volume_of {
                    Some(species) => CurrentScale::Volume(self.slot(plan.qualify(*species))),
                    None => CurrentScale::AreaRatio,
                },
            })
            .collect();

        self.kernels.push(Kernel {
            reaction,
            rate: Program::compile(&local),
            derivatives,
            targets,
            required,
            scaling: plan.scaling,
            currents,
        });
        Ok(())
    }

    fn finish(self, key: GroupKey, input: &CompileInput<'_>) -> Result<ReactionGroup> {
        let sites = sites(self.anchor, input)?;
        let morphology = input.host.morphology();
        let membrane = input.regions.get(self.anchor)?;
        let needs_area = self.kernels.iter().any(|k| k.scaling == Scaling::PerArea || !k.currents.is_empty());

        let mut membrane_areas: BTreeMap<SectionId, Vec<f64>> = BTreeMap::new();
        let mut loci = Vec::with_capacity(sites.len());
        for site in sites {
            let nodes = self
                .slots
                .iter()
                .map(|&(species, region)| resolve(input, species, region, self.anchor, &site))
                .collect();
            let segment = site.segment();

            let (membrane_area, host_area) = match (segment, needs_area) {
                (Some(segment), true) => {
                    if !membrane_areas.contains_key(&segment.section) {
                        let areas = match membrane.geometry() {
                            Some(geometry) if membrane.is_area() => geometry.volumes1d(morphology, segment.section)?,
                            _ => Vec::new(),
                        };
                        membrane_areas.insert(segment.section, areas);
                    }
                    let area = membrane_areas
                        .get(&segment.section)
                        .and_then(|areas| areas.get(segment.index).copied())
                        .unwrap_or(0.0);
                    (area, input.host.segment_area(segment))
                }
                _ => (0.0, 0.0),
            };
            loci.push(Locus { segment, nodes, membrane_area, host_area });
        }

        if loci.is_empty() {
            warn!("reaction group {key:?} has no evaluation sites");
        }
        Ok(ReactionGroup { key, slots: self.slots, kernels: self.kernels, loci })
    }
}

/// Evaluation site on the anchor region
enum Site {
    Segment(SegmentRef, [f64; 3]),
    Voxel(usize, SegmentRef),
    Grid([usize; 3]),
}

impl Site {
    fn segment(&self) -> Option<SegmentRef> {
        match self {
            Site::Segment(segment, _) | Site::Voxel(_, segment) => Some(*segment),
            Site::Grid(_) => None,
        }
    }
}

fn sites(anchor: RegionId, input: &CompileInput<'_>) -> Result<Vec<Site>> {
    let region = input.regions.get(anchor)?;
    let morphology: &Morphology = input.host.morphology();

    if region.is_1d() {
        let mut sites = Vec::new();
        for id in region.ordered_sections(morphology)? {
            let section = morphology.section(id)?;
            for index in 0..section.nseg() {
                sites.push(Site::Segment(SegmentRef::new(id, index), section.position(section.segment_center(index))));
            }
        }
        return Ok(sites);
    }

    for instance in input.instances.iter().filter(|i| i.region() == anchor) {
        match instance {
            Instance::ThreeD(voxels) => {
                return Ok((0..voxels.voxels.len()).map(|l| Site::Voxel(l, voxels.voxels.owner(l))).collect());
            }
            Instance::Extracellular(grid) => {
                return Ok((0..grid.grid.voxel_count()).map(|i| Site::Grid(grid.grid.voxel(i))).collect());
            }
            Instance::OneD(_) => {}
        }
    }
    Ok(Vec::new())
}

fn resolve(input: &CompileInput<'_>, species: SpeciesId, region: RegionId, anchor: RegionId, site: &Site) -> Option<usize> {
    let instance = input.instances.iter().find(|i| i.species() == species && i.region() == region)?;
    match (instance, site) {
        (Instance::OneD(one_d), Site::Segment(segment, _)) => one_d.segment_node(*segment),
        (Instance::Extracellular(ecs), Site::Segment(_, position)) => ecs.node_containing(*position),
        (Instance::ThreeD(voxels), Site::Voxel(local, _)) if region == anchor => Some(voxels.node(*local)),
        (Instance::OneD(one_d), Site::Voxel(_, segment)) => one_d.segment_node(*segment),
        (Instance::Extracellular(ecs), Site::Grid(voxel)) if region == anchor => Some(ecs.node(*voxel)),
        _ => None,
    }
}
