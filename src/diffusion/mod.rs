//! Diffusion matrix assembly
//!
//! Builds the sparse operator `D` such that `d(state)/dt = D·state` for diffusion alone.
//!
//! # Passes
//!
//! ```text
//!  NodeStore + instances
//!        │
//!        ├─► one_d     parent/child links along the section tree, root ghosts
//!        ├─► three_d   6-neighbor voxel links (intracellular and extracellular)
//!        ├─► hybrid    1D node ↔ 3D voxels at 1D/3D junctions
//!        │
//!        ▼
//!   TriMat ──► CsMat (CSR) ───┬─► TreeMatrix         (pure 1D: O(n) sweep)
//!                             ├─► ILU(0) + BiCGSTAB  (anything with voxels)
//!                             └─► GhostSubstitution  (variable step)
//! ```
//!
//! # Coupling two nodes
//!
//! Every link is a conductance `w = D_eff · area / distance` (µm³/ms). For real nodes the entries
//! are divided by the node volume, which keeps the operator conservative:
//!
//! ```text
//!   D[a, b] += w / vol_a      D[a, a] -= w / vol_a
//!   D[b, a] += w / vol_b      D[b, b] -= w / vol_b
//! ```
//!
//! Ghost rows keep `w` undivided: they are constraints, not balances. Rows of fixed nodes stay
//! empty.

pub mod ghost;
pub mod hybrid;
pub mod one_d;
pub mod three_d;
pub mod tree;

pub use ghost::GhostSubstitution;
pub use tree::TreeMatrix;

use log::debug;
use nalgebra::DVector;
use sprs::{CsMat, TriMat};

use crate::arena::Arena;
use crate::error::{Result, RxdError};
use crate::linalg::{bicgstab, mat_vec, shifted, Ilu0, LinearSolverOptions};
use crate::morphology::Morphology;
use crate::node::NodeStore;
use crate::region::Region;
use crate::species::Instance;

/// Triplet collector shared by the assembly passes
pub(crate) struct Assembler<'a> {
    nodes: &'a NodeStore,
    triplets: TriMat<f64>,
    tree: Option<TreeMatrix>,
}

impl<'a> Assembler<'a> {
    fn new(nodes: &'a NodeStore, with_tree: bool) -> Self {
        let n = nodes.len();
        Self { nodes, triplets: TriMat::new((n, n)), tree: with_tree.then(|| TreeMatrix::new(n)) }
    }

    pub(crate) fn nodes(&self) -> &NodeStore {
        self.nodes
    }

    /// Link nodes `a` and `b` with conductance `w`
    pub(crate) fn couple(&mut self, a: usize, b: usize, w: f64) -> Result<()> {
        for (row, col) in [(a, b), (b, a)] {
            if self.nodes.is_fixed(row) {
                continue;
            }
            let scale = if self.nodes.is_ghost(row) {
                1.0
            } else {
                let volume = self.nodes.volumes()[row];
                if volume <= 0.0 || !volume.is_finite() {
                    return Err(RxdError::InvalidRegion(format!("node {row} has no volume but is not a ghost")));
                }
                1.0 / volume
            };
            self.triplets.add_triplet(row, col, w * scale);
            self.triplets.add_triplet(row, row, -w * scale);
            if let Some(tree) = &mut self.tree {
                tree.add(row, col, w * scale)?;
                tree.add(row, row, -w * scale)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> (CsMat<f64>, Option<TreeMatrix>) {
        (self.triplets.to_csr(), self.tree)
    }
}

// =================================================================================================
// Assembled matrices
// =================================================================================================

struct FactorCache {
    dt: f64,
    system: CsMat<f64>,
    ilu: Ilu0,
}

impl FactorCache {
    fn new(operator: &CsMat<f64>, dt: f64, identity: &[f64]) -> Result<Self> {
        let system = shifted(operator, dt, identity);
        let ilu = Ilu0::factor(&system)?;
        debug!("ILU(0) refactored for dt = {dt} ({} nonzeros)", system.nnz());
        Ok(Self { dt, system, ilu })
    }
}

/// Diffusion operator of one structure epoch plus everything derived from it
pub struct DiffusionMatrices {
    operator: CsMat<f64>,
    tree: Option<TreeMatrix>,
    identity: Vec<f64>,
    substitution: GhostSubstitution,
    factor: Option<FactorCache>,
}

impl std::fmt::Debug for DiffusionMatrices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffusionMatrices")
            .field("nodes", &self.identity.len())
            .field("nnz", &self.operator.nnz())
            .field("tree", &self.tree.is_some())
            .field("ghosts", &self.substitution.ghosts().len())
            .finish()
    }
}

impl DiffusionMatrices {
    /// Run every assembly pass over the current layout
    pub fn assemble(
        nodes: &NodeStore,
        instances: &[Instance],
        regions: &Arena<Region>,
        morphology: &Morphology,
    ) -> Result<Self> {
        let couplings = hybrid::find_couplings(instances, regions, morphology, nodes)?;
        let pure_1d = couplings.is_empty() && instances.iter().all(|i| matches!(i, Instance::OneD(_)));

        let mut assembler = Assembler::new(nodes, pure_1d);
        for instance in instances {
            match instance {
                Instance::OneD(one_d) => {
                    one_d::assemble(one_d, regions.get(one_d.region)?, morphology, &mut assembler)?
                }
                Instance::ThreeD(voxels) => three_d::assemble_voxels(voxels, &mut assembler)?,
                Instance::Extracellular(grid) => three_d::assemble_extracellular(grid, &mut assembler)?,
            }
        }
        hybrid::assemble(&couplings, &mut assembler)?;

        let (operator, tree) = assembler.finish();
        let identity = (0..nodes.len())
            .map(|i| {
                let diagonal = operator.get(i, i).copied().unwrap_or(0.0);
                if nodes.is_ghost(i) && diagonal != 0.0 { 0.0 } else { 1.0 }
            })
            .collect();
        let substitution = GhostSubstitution::build(&operator, nodes);

        debug!(
            "diffusion matrix rebuilt: {} nodes, {} nonzeros, {} hybrid links, {}",
            nodes.len(),
            operator.nnz(),
            couplings.len(),
            if tree.is_some() { "tree solve" } else { "BiCGSTAB" }
        );

        Ok(Self { operator, tree, identity, substitution, factor: None })
    }

    /// `D` as assembled
    pub fn operator(&self) -> &CsMat<f64> {
        &self.operator
    }

    pub fn tree(&self) -> Option<&TreeMatrix> {
        self.tree.as_ref()
    }

    /// Diagonal of `C`: 0 for constrained ghosts, 1 otherwise
    pub fn identity(&self) -> &[f64] {
        &self.identity
    }

    pub fn substitution(&self) -> &GhostSubstitution {
        &self.substitution
    }

    pub fn len(&self) -> usize {
        self.identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_empty()
    }

    /// `D·x`
    pub fn apply(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(mat_vec(&self.operator, x.as_slice()))
    }

    /// Solve `(C - dt·D) x = rhs` in place; returns the iteration count (0 for the tree sweep)
    pub fn solve(&mut self, dt: f64, rhs: &mut [f64], options: &LinearSolverOptions) -> Result<usize> {
        if let Some(tree) = &self.tree {
            tree.solve(dt, &self.identity, rhs)?;
            return Ok(0);
        }

        let cache = match self.factor.take() {
            Some(cache) if cache.dt == dt => cache,
            _ => FactorCache::new(&self.operator, dt, &self.identity)?,
        };
        let b = rhs.to_vec();
        let mut x = cache.ilu.apply(&b);
        let result = bicgstab(&cache.system, &b, &mut x, &cache.ilu, options.tolerance, options.max_iterations);
        self.factor = Some(cache);

        let iterations = result?;
        rhs.copy_from_slice(&x);
        Ok(iterations)
    }
}
