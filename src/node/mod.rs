//! Node / state vector
//!
//! Every scalar unknown of the discretized system is a *node*: an index into a set of flat,
//! parallel arrays shared by all species.
//!
//! ```text
//!  index      0     1     2     3   ...   n-1
//!           ┌─────┬─────┬─────┬─────┬───┬─────┐
//!  volume   │ 0.0 │ 1.2 │ 1.2 │ 0.9 │   │ 8.0 │   µm³ (0 for ghosts)
//!  surface  │ 0.0 │ 3.1 │ 3.1 │ 2.7 │   │ 0.0 │   µm²
//!  diff     │  D  │  D  │  D  │  D  │   │  D  │   µm²/ms, one value per axis
//!  state    │ 0.0 │ 0.1 │ 0.1 │ 0.1 │   │ 2.0 │   mM
//!           └─────┴─────┴─────┴─────┴───┴─────┘
//!            └──── species A, region R ────┘ └── ...
//! ```
//!
//! A discretization instance (one species on one region) owns a contiguous range. Removing a
//! range compacts the arrays; the node-flux side table is re-indexed accordingly.

use std::ops::Range;

use nalgebra::DVector;

use crate::morphology::{SectionId, SegmentRef};
use crate::region::RegionId;
use crate::species::SpeciesId;

/// Molecules per (mM · µm³)
pub const MOLECULES_PER_MM_UM3: f64 = 602_214.076;

/// Where a node sits in space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLocation {
    /// Zero-volume node at the `x = 0` end of a region-root section
    Ghost { section: SectionId },
    /// Center of a 1D segment
    Segment(SegmentRef),
    /// Intracellular voxel, with the segment it was assigned to
    Voxel { voxel: [usize; 3], segment: SegmentRef },
    /// Extracellular voxel
    Extracellular { voxel: [usize; 3] },
}

impl NodeLocation {
    /// Segment this node belongs to, if any
    pub fn segment(&self) -> Option<SegmentRef> {
        match self {
            NodeLocation::Segment(segment) | NodeLocation::Voxel { segment, .. } => Some(*segment),
            _ => None,
        }
    }
}

/// Per-node data passed to [`NodeStore::allocate`]
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub volume: f64,
    pub surface_area: f64,
    pub diff: [f64; 3],
    pub position: [f64; 3],
    pub state: f64,
    /// Held constant by the solvers (parameters, Dirichlet borders)
    pub fixed: bool,
    pub location: NodeLocation,
}

/// Public view of one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRef {
    pub index: usize,
    pub species: SpeciesId,
    pub region: RegionId,
    pub location: NodeLocation,
    pub position: [f64; 3],
    pub volume: f64,
}

/// Units of a user-attached node flux
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxUnits {
    /// Concentration rate (mM/ms)
    MillimolarPerMs,
    /// Amount rate (molecules/ms), divided by the node volume when applied
    MoleculesPerMs,
}

/// Constant source attached to one node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeFlux {
    pub node: usize,
    pub rate: f64,
    pub units: FluxUnits,
}

// =================================================================================================
// Store
// =================================================================================================

/// Flat parallel arrays over every node of every species
#[derive(Debug, Clone)]
pub struct NodeStore {
    volumes: Vec<f64>,
    surface_areas: Vec<f64>,
    diffs: Vec<[f64; 3]>,
    positions: Vec<[f64; 3]>,
    fixed: Vec<bool>,
    locations: Vec<NodeLocation>,
    states: DVector<f64>,
    fluxes: Vec<NodeFlux>,
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore {
    pub fn new() -> Self {
        Self {
            volumes: Vec::new(),
            surface_areas: Vec::new(),
            diffs: Vec::new(),
            positions: Vec::new(),
            fixed: Vec::new(),
            locations: Vec::new(),
            states: DVector::zeros(0),
            fluxes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Append `nodes`; returns the index of the first one (the previous length)
    pub fn allocate(&mut self, nodes: Vec<NodeData>) -> usize {
        let start = self.len();
        let count = nodes.len();

        let states = std::mem::replace(&mut self.states, DVector::zeros(0));
        let mut states = states.resize_vertically(start + count, 0.0);

        for (offset, node) in nodes.into_iter().enumerate() {
            self.volumes.push(node.volume);
            self.surface_areas.push(node.surface_area);
            self.diffs.push(node.diff);
            self.positions.push(node.position);
            self.fixed.push(node.fixed);
            self.locations.push(node.location);
            states[start + offset] = node.state;
        }
        self.states = states;
        start
    }

    /// Remove a contiguous range, shifting every later node down
    ///
    /// Fluxes on removed nodes are dropped; fluxes on later nodes are re-indexed.
    pub fn remove(&mut self, range: Range<usize>) {
        let range = range.start.min(self.len())..range.end.min(self.len());
        if range.is_empty() {
            return;
        }
        let count = range.len();

        self.volumes.drain(range.clone());
        self.surface_areas.drain(range.clone());
        self.diffs.drain(range.clone());
        self.positions.drain(range.clone());
        self.fixed.drain(range.clone());
        self.locations.drain(range.clone());

        let states = std::mem::replace(&mut self.states, DVector::zeros(0));
        self.states = states.remove_rows(range.start, count);

        self.fluxes.retain(|flux| !range.contains(&flux.node));
        for flux in &mut self.fluxes {
            if flux.node >= range.end {
                flux.node -= count;
            }
        }
    }

    // ========================================= Accessors =========================================

    pub fn states(&self) -> &DVector<f64> {
        &self.states
    }

    pub fn states_mut(&mut self) -> &mut DVector<f64> {
        &mut self.states
    }

    pub fn volumes(&self) -> &[f64] {
        &self.volumes
    }

    pub fn surface_areas(&self) -> &[f64] {
        &self.surface_areas
    }

    pub fn diffs(&self) -> &[[f64; 3]] {
        &self.diffs
    }

    pub(crate) fn diffs_mut(&mut self) -> &mut [[f64; 3]] {
        &mut self.diffs
    }

    /// Node centers (µm)
    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    pub fn locations(&self) -> &[NodeLocation] {
        &self.locations
    }

    pub fn is_fixed(&self, node: usize) -> bool {
        self.fixed.get(node).copied().unwrap_or(false)
    }

    /// Zero-volume algebraic node
    pub fn is_ghost(&self, node: usize) -> bool {
        matches!(self.locations.get(node), Some(NodeLocation::Ghost { .. }))
    }

    /// Total amount Σ state·volume over `range` (mM·µm³)
    pub fn amount(&self, range: Range<usize>) -> f64 {
        range.map(|i| self.states[i] * self.volumes[i]).sum()
    }

    // ======================================== Flux table =========================================

    pub fn add_flux(&mut self, flux: NodeFlux) {
        self.fluxes.push(flux);
    }

    pub fn fluxes(&self) -> &[NodeFlux] {
        &self.fluxes
    }

    pub fn clear_fluxes(&mut self) {
        self.fluxes.clear();
    }

    /// Rewrite flux targets after a relayout; fluxes mapped to `None` are dropped
    pub(crate) fn remap_fluxes(&mut self, map: impl Fn(usize) -> Option<usize>) {
        self.fluxes = self
            .fluxes
            .iter()
            .filter_map(|flux| map(flux.node).map(|node| NodeFlux { node, ..*flux }))
            .collect();
    }

    /// Add every flux, converted to mM/ms, into `rhs`
    pub(crate) fn accumulate_fluxes(&self, rhs: &mut DVector<f64>) {
        for flux in &self.fluxes {
            if flux.node >= rhs.len() || self.fixed[flux.node] {
                continue;
            }
            rhs[flux.node] += match flux.units {
                FluxUnits::MillimolarPerMs => flux.rate,
                FluxUnits::MoleculesPerMs => {
                    let volume = self.volumes[flux.node];
                    if volume > 0.0 { flux.rate / (volume * MOLECULES_PER_MM_UM3) } else { 0.0 }
                }
            };
        }
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_node(index: usize, volume: f64, state: f64) -> NodeData {
        NodeData {
            volume,
            surface_area: 0.0,
            diff: [1.0; 3],
            position: [index as f64, 0.0, 0.0],
            state,
            fixed: false,
            location: NodeLocation::Segment(SegmentRef::new(SectionId(0), index)),
        }
    }

    #[test]
    fn test_allocate_returns_previous_length() {
        let mut store = NodeStore::new();
        assert_eq!(store.allocate(vec![segment_node(0, 1.0, 0.5); 3]), 0);
        assert_eq!(store.allocate(vec![segment_node(0, 2.0, 1.5); 2]), 3);
        assert_eq!(store.len(), 5);
        assert_eq!(store.states()[4], 1.5);
    }

    #[test]
    fn test_remove_compacts_and_reindexes_fluxes() {
        let mut store = NodeStore::new();
        store.allocate((0..6).map(|i| segment_node(i, 1.0, i as f64)).collect());
        store.add_flux(NodeFlux { node: 1, rate: 1.0, units: FluxUnits::MillimolarPerMs });
        store.add_flux(NodeFlux { node: 5, rate: 2.0, units: FluxUnits::MillimolarPerMs });

        store.remove(1..3);

        assert_eq!(store.len(), 4);
        assert_eq!(store.states().as_slice(), &[0.0, 3.0, 4.0, 5.0]);
        assert_eq!(store.fluxes().len(), 1);
        assert_eq!(store.fluxes()[0].node, 3);
    }

    #[test]
    fn test_molecule_flux_divided_by_volume() {
        let mut store = NodeStore::new();
        store.allocate(vec![segment_node(0, 2.0, 0.0)]);
        store.add_flux(NodeFlux { node: 0, rate: 2.0 * MOLECULES_PER_MM_UM3, units: FluxUnits::MoleculesPerMs });

        let mut rhs = DVector::zeros(1);
        store.accumulate_fluxes(&mut rhs);
        assert!((rhs[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ghost_detection() {
        let mut store = NodeStore::new();
        store.allocate(vec![
            NodeData {
                volume: 0.0,
                surface_area: 0.0,
                diff: [1.0; 3],
                position: [0.0; 3],
                state: 0.0,
                fixed: false,
                location: NodeLocation::Ghost { section: SectionId(0) },
            },
            segment_node(0, 1.0, 1.0),
        ]);
        assert!(store.is_ghost(0));
        assert!(!store.is_ghost(1));
        assert_eq!(store.amount(0..2), 1.0);
    }
}
