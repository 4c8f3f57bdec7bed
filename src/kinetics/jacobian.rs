//! Per-locus reaction Jacobian
//!
//! Reactions only couple nodes that share a locus, so `I − dt·J` is block diagonal. Each block is
//! small (one row per species touched at the site) and is factored once per `jacobian` call with
//! a dense LU.

use nalgebra::{DMatrix, DVector, Dyn};
use nalgebra::linalg::LU;

use crate::error::{Result, RxdError};
use crate::morphology::CompartmentalHost;
use crate::node::NodeStore;

use super::compiler::{Locus, ReactionGroup, ReactionSystem};

/// How the reaction Jacobian is obtained in variable-step mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JacobianMode {
    /// Diffusion-only preconditioning
    #[default]
    Disabled,
    /// Forward differences of the compiled rates
    FiniteDifference,
    /// Symbolic derivatives compiled alongside each rate
    Analytic,
}

struct Block {
    nodes: Vec<usize>,
    lu: LU<f64, Dyn, Dyn>,
}

/// Factored `I − dt·J` blocks
pub struct ReactionJacobian {
    dt: f64,
    blocks: Vec<Block>,
}

impl std::fmt::Debug for ReactionJacobian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionJacobian").field("dt", &self.dt).field("blocks", &self.blocks.len()).finish()
    }
}

impl ReactionJacobian {
    /// Factor every locus block at `states`; `None` when the mode is disabled
    pub fn build(
        system: &ReactionSystem,
        mode: JacobianMode,
        fd_step: f64,
        dt: f64,
        states: &[f64],
        nodes: &NodeStore,
        host: &dyn CompartmentalHost,
    ) -> Result<Option<Self>> {
        if mode == JacobianMode::Disabled {
            return Ok(None);
        }

        let mut blocks = Vec::new();
        for group in system.groups() {
            let voltages = group.voltages(host);
            for (locus, &v) in group.loci().iter().zip(&voltages) {
                let active = active_slots(group, locus, nodes);
                if active.is_empty() {
                    continue;
                }
                let jacobian = match mode {
                    JacobianMode::Analytic => analytic(group, locus, &active, states, nodes.volumes(), v),
                    _ => finite_difference(group, locus, &active, states, nodes.volumes(), v, fd_step),
                };

                let k = active.len();
                let system_matrix = DMatrix::identity(k, k) - jacobian * dt;
                let lu = system_matrix.lu();
                let block_nodes: Vec<usize> = active.iter().map(|&(_, node)| node).collect();
                if !lu.is_invertible() {
                    return Err(RxdError::SingularMatrix { row: block_nodes[0] });
                }
                blocks.push(Block { nodes: block_nodes, lu });
            }
        }
        Ok(Some(Self { dt, blocks }))
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// `x ← (I − dt·J)⁻¹ x`, block by block
    pub fn solve(&self, x: &mut [f64]) -> Result<()> {
        for block in &self.blocks {
            let b = DVector::from_iterator(block.nodes.len(), block.nodes.iter().map(|&n| x[n]));
            let solved = block.lu.solve(&b).ok_or(RxdError::SingularMatrix { row: block.nodes[0] })?;
            for (&node, value) in block.nodes.iter().zip(solved.iter()) {
                x[node] = *value;
            }
        }
        Ok(())
    }
}

/// `(slot, node)` of every evolving node some kernel writes to at this locus
fn active_slots(group: &ReactionGroup, locus: &Locus, nodes: &NodeStore) -> Vec<(usize, usize)> {
    let mut active: Vec<(usize, usize)> = Vec::new();
    for kernel in group.kernels().iter().filter(|k| group.runs_at(k, locus)) {
        for target in &kernel.targets {
            if let Some(node) = locus.nodes[target.slot]
                && !nodes.is_fixed(node)
                && !active.iter().any(|&(slot, _)| slot == target.slot)
            {
                active.push((target.slot, node));
            }
        }
    }
    active
}

/// Reaction rates of the active slots at this locus
fn local_rates(group: &ReactionGroup, locus: &Locus, active: &[(usize, usize)], values: &[f64], volumes: &[f64], v: f64) -> Vec<f64> {
    let mut rates = vec![0.0; active.len()];
    for kernel in group.kernels().iter().filter(|k| group.runs_at(k, locus)) {
        let rate = kernel.rate.eval(values, v);
        for target in &kernel.targets {
            if let Some(row) = active.iter().position(|&(slot, _)| slot == target.slot) {
                rates[row] += group.multiplier(kernel, target, locus, volumes) * rate;
            }
        }
    }
    rates
}

fn analytic(group: &ReactionGroup, locus: &Locus, active: &[(usize, usize)], states: &[f64], volumes: &[f64], v: f64) -> DMatrix<f64> {
    let values = group.slot_values(locus, states);
    let k = active.len();
    let mut jacobian = DMatrix::zeros(k, k);
    for kernel in group.kernels().iter().filter(|k| group.runs_at(k, locus)) {
        for target in &kernel.targets {
            let Some(row) = active.iter().position(|&(slot, _)| slot == target.slot) else { continue };
            let multiplier = group.multiplier(kernel, target, locus, volumes);
            for (slot, derivative) in &kernel.derivatives {
                if let Some(col) = active.iter().position(|&(s, _)| s == *slot) {
                    jacobian[(row, col)] += multiplier * derivative.eval(&values, v);
                }
            }
        }
    }
    jacobian
}

fn finite_difference(
    group: &ReactionGroup,
    locus: &Locus,
    active: &[(usize, usize)],
    states: &[f64],
    volumes: &[f64],
    v: f64,
    step: f64,
) -> DMatrix<f64> {
    let mut values = group.slot_values(locus, states);
    let base = local_rates(group, locus, active, &values, volumes, v);
    let k = active.len();
    let mut jacobian = DMatrix::zeros(k, k);
    for (col, &(slot, _)) in active.iter().enumerate() {
        let original = values[slot];
        let h = step * original.abs().max(1.0);
        values[slot] = original + h;
        let perturbed = local_rates(group, locus, active, &values, volumes, v);
        values[slot] = original;
        for row in 0..k {
            jacobian[(row, col)] = (perturbed[row] - base[row]) / h;
        }
    }
    jacobian
}
