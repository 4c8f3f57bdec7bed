//! Zero-volume node elimination
//!
//! A ghost row of the operator is an algebraic constraint, `D[g, :]·x = 0`. Solving it for the
//! ghost gives the substitution
//!
//! ```text
//!   x[g] = Σ Z[g, j]·x[j]        Z[g, j] = -D[g, j] / D[g, g]
//! ```
//!
//! which lets the variable-step integrator work on the real nodes only.

use nalgebra::DVector;
use sprs::CsMat;

use crate::node::NodeStore;

/// Ghost substitution `ghost = Z · real`
#[derive(Debug, Clone, PartialEq)]
pub struct GhostSubstitution {
    real: Vec<usize>,
    ghosts: Vec<usize>,
    rows: Vec<Vec<(usize, f64)>>,
}

impl GhostSubstitution {
    pub fn build(operator: &CsMat<f64>, nodes: &NodeStore) -> Self {
        let (ghosts, real): (Vec<usize>, Vec<usize>) = (0..nodes.len()).partition(|&i| nodes.is_ghost(i));
        let rows = ghosts
            .iter()
            .map(|&g| {
                let diagonal = operator.get(g, g).copied().unwrap_or(0.0);
                let Some(row) = operator.outer_view(g).filter(|_| diagonal != 0.0) else {
                    return Vec::new();
                };
                row.iter().filter(|&(col, _)| col != g).map(|(col, value)| (col, -value / diagonal)).collect()
            })
            .collect();
        Self { real, ghosts, rows }
    }

    /// Indices of the non-ghost nodes, in node order
    pub fn real(&self) -> &[usize] {
        &self.real
    }

    pub fn ghosts(&self) -> &[usize] {
        &self.ghosts
    }

    /// Recompute every ghost from the real nodes
    pub fn reconstruct(&self, states: &mut DVector<f64>) {
        for (g, row) in self.ghosts.iter().zip(&self.rows) {
            states[*g] = row.iter().map(|(j, z)| z * states[*j]).sum();
        }
    }

    /// Copy the real entries of `states` into `y`
    pub fn gather(&self, states: &DVector<f64>, y: &mut [f64]) {
        for (slot, &node) in y.iter_mut().zip(&self.real) {
            *slot = states[node];
        }
    }

    /// Write `y` into the real entries of `states`
    pub fn scatter(&self, y: &[f64], states: &mut DVector<f64>) {
        for (value, &node) in y.iter().zip(&self.real) {
            states[node] = *value;
        }
    }
}
