//! Tree matrix and O(n) sweep
//!
//! In a pure 1D model every node couples only to its parent and its children, and the parent
//! always has the smaller index. The implicit system `(C - dt·D) x = r` can then be solved by
//! Gaussian elimination from the leaves up followed by a substitution from the roots down.
//!
//! ```text
//!   row i:   lower[i]·x[parent(i)] + diag[i]·x[i] + Σ upper[c]·x[c] = r[i]
//!                                                   c child of i
//!   upper[c] = A[parent(c), c]      lower[c] = A[c, parent(c)]
//! ```

use crate::error::{Result, RxdError};

const PIVOT_EPSILON: f64 = 1e-300;

/// Diffusion operator restricted to a forest
#[derive(Debug, Clone, PartialEq)]
pub struct TreeMatrix {
    parent: Vec<Option<usize>>,
    /// D[i, i]
    diag: Vec<f64>,
    /// D[parent(i), i]
    upper: Vec<f64>,
    /// D[i, parent(i)]
    lower: Vec<f64>,
}

impl TreeMatrix {
    /// Operator of `n` uncoupled nodes
    pub fn new(n: usize) -> Self {
        Self { parent: vec![None; n], diag: vec![0.0; n], upper: vec![0.0; n], lower: vec![0.0; n] }
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    pub fn parent(&self, i: usize) -> Option<usize> {
        self.parent[i]
    }

    /// Accumulate `value` at `D[row, col]`
    ///
    /// Off-diagonal entries must link a node with its parent; the parent link is established by
    /// the first entry seen between two nodes.
    pub fn add(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        if row == col {
            self.diag[row] += value;
            return Ok(());
        }
        let (child, parent) = if row > col { (row, col) } else { (col, row) };
        match self.parent[child] {
            None => self.parent[child] = Some(parent),
            Some(existing) if existing == parent => {}
            Some(existing) => {
                return Err(RxdError::StructuralConflict(format!(
                    "node {child} is linked to {existing} and {parent}: not a tree"
                )));
            }
        }
        if row == child {
            self.lower[child] += value;
        } else {
            self.upper[child] += value;
        }
        Ok(())
    }

    /// Solve `(C - dt·D) x = rhs` in place
    ///
    /// `identity[i]` is the diagonal of `C`.
    pub fn solve(&self, dt: f64, identity: &[f64], rhs: &mut [f64]) -> Result<()> {
        let n = self.len();
        let mut diag: Vec<f64> = (0..n).map(|i| identity[i] - dt * self.diag[i]).collect();

        // leaves up
        for i in (0..n).rev() {
            if let Some(p) = self.parent[i] {
                if diag[i].abs() < PIVOT_EPSILON {
                    return Err(RxdError::SingularMatrix { row: i });
                }
                let a_pi = -dt * self.upper[i];
                let a_ip = -dt * self.lower[i];
                let factor = a_pi / diag[i];
                diag[p] -= factor * a_ip;
                rhs[p] -= factor * rhs[i];
            }
        }

        // roots down
        for i in 0..n {
            if let Some(p) = self.parent[i] {
                rhs[i] -= -dt * self.lower[i] * rhs[p];
            }
            if diag[i].abs() < PIVOT_EPSILON {
                return Err(RxdError::SingularMatrix { row: i });
            }
            rhs[i] /= diag[i];
        }
        Ok(())
    }

    /// `y = D·x`
    pub fn mul(&self, x: &[f64]) -> Vec<f64> {
        let mut y: Vec<f64> = self.diag.iter().zip(x).map(|(d, v)| d * v).collect();
        for (i, parent) in self.parent.iter().enumerate() {
            if let Some(p) = *parent {
                y[i] += self.lower[i] * x[p];
                y[p] += self.upper[i] * x[i];
            }
        }
        y
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};

    /// Small branched operator:  0 ─ 1 ─ 2
    ///                                 └ 3
    fn branched() -> TreeMatrix {
        let mut tree = TreeMatrix::new(4);
        for (a, b, w) in [(0, 1, 1.0), (1, 2, 0.5), (1, 3, 2.0)] {
            tree.add(a, b, w).unwrap();
            tree.add(a, a, -w).unwrap();
            tree.add(b, a, w).unwrap();
            tree.add(b, b, -w).unwrap();
        }
        tree
    }

    fn dense(tree: &TreeMatrix) -> DMatrix<f64> {
        let n = tree.len();
        let mut m = DMatrix::zeros(n, n);
        for j in 0..n {
            let mut e = vec![0.0; n];
            e[j] = 1.0;
            for (i, v) in tree.mul(&e).into_iter().enumerate() {
                m[(i, j)] = v;
            }
        }
        m
    }

    #[test]
    fn test_sweep_matches_dense_solve() {
        let tree = branched();
        let dt = 0.3;
        let identity = [1.0, 1.0, 1.0, 1.0];
        let rhs = [1.0, -2.0, 0.5, 3.0];

        let mut x = rhs.to_vec();
        tree.solve(dt, &identity, &mut x).unwrap();

        let a = DMatrix::identity(4, 4) - dense(&tree) * dt;
        let expected = a.lu().solve(&DVector::from_row_slice(&rhs)).unwrap();
        for i in 0..4 {
            assert!((x[i] - expected[i]).abs() < 1e-12, "row {i}: {} vs {}", x[i], expected[i]);
        }
    }

    #[test]
    fn test_zero_identity_row() {
        // node 0 algebraic: D[0,:]·x = 0 forces x0 = x1
        let mut tree = TreeMatrix::new(2);
        tree.add(0, 1, 2.0).unwrap();
        tree.add(0, 0, -2.0).unwrap();
        tree.add(1, 0, 2.0).unwrap();
        tree.add(1, 1, -2.0).unwrap();

        let mut x = vec![0.0, 1.0];
        tree.solve(1.0, &[0.0, 1.0], &mut x).unwrap();
        assert!((x[0] - x[1]).abs() < 1e-12);
    }

    #[test]
    fn test_not_a_tree() {
        let mut tree = TreeMatrix::new(3);
        tree.add(2, 0, 1.0).unwrap();
        assert!(tree.add(2, 1, 1.0).is_err());
    }

    #[test]
    fn test_singular() {
        let tree = TreeMatrix::new(2);
        let mut x = vec![1.0, 1.0];
        assert_eq!(tree.solve(1.0, &[0.0, 1.0], &mut x), Err(RxdError::SingularMatrix { row: 0 }));
    }
}
