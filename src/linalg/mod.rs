//! Sparse linear algebra
//!
//! Everything works on `sprs` CSR matrices with sorted column indices, as produced by
//! `TriMat::to_csr`.
//!
//! - [`Ilu0`]: incomplete LU with the sparsity pattern of the matrix
//! - [`bicgstab`]: preconditioned BiCGSTAB
//! - [`dense_solve`]: small dense systems (per-locus reaction Jacobians) through nalgebra

use log::trace;
use nalgebra::{DMatrix, DVector};
use sprs::{CsMat, TriMat};

use crate::error::{Result, RxdError};

const PIVOT_EPSILON: f64 = 1e-300;

/// Settings of the iterative solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSolverOptions {
    /// Relative residual at which BiCGSTAB stops
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for LinearSolverOptions {
    fn default() -> Self {
        Self { tolerance: 1e-10, max_iterations: 1000 }
    }
}

impl LinearSolverOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(RxdError::InvalidConfiguration(format!(
                "linear tolerance must lie in (0, 1), got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(RxdError::InvalidConfiguration("max_iterations must be positive".into()));
        }
        Ok(())
    }
}

/// `y = A·x` for a CSR matrix
pub fn mat_vec(matrix: &CsMat<f64>, x: &[f64]) -> Vec<f64> {
    matrix
        .outer_iterator()
        .map(|row| row.iter().map(|(col, value)| value * x[col]).sum::<f64>())
        .collect()
}

/// `diag(identity) - dt·A` in CSR, with every diagonal entry stored
pub fn shifted(matrix: &CsMat<f64>, dt: f64, identity: &[f64]) -> CsMat<f64> {
    let n = matrix.rows();
    let mut triplets = TriMat::with_capacity((n, n), matrix.nnz() + n);
    for (row, vector) in matrix.outer_iterator().enumerate() {
        for (col, value) in vector.iter() {
            triplets.add_triplet(row, col, -dt * value);
        }
    }
    for (row, &c) in identity.iter().enumerate() {
        triplets.add_triplet(row, row, c);
    }
    triplets.to_csr()
}

// =================================================================================================
// ILU(0)
// =================================================================================================

/// Incomplete LU factorization without fill-in
///
/// The factors overwrite a copy of the matrix values; the sparsity pattern is the matrix's own.
#[derive(Debug, Clone)]
pub struct Ilu0 {
    lu: CsMat<f64>,
    indptr: Vec<usize>,
    diagonal: Vec<usize>,
}

impl Ilu0 {
    /// Factor a CSR matrix with sorted column indices
    pub fn factor(matrix: &CsMat<f64>) -> Result<Self> {
        let mut lu = if matrix.is_csr() { matrix.clone() } else { matrix.to_csr() };
        let n = lu.rows();
        let indptr: Vec<usize> = lu.proper_indptr().to_vec();
        let indices: Vec<usize> = lu.indices().to_vec();
        let position = |row: usize, col: usize| {
            indices[indptr[row]..indptr[row + 1]].binary_search(&col).ok().map(|offset| indptr[row] + offset)
        };
        let diagonal = (0..n)
            .map(|i| position(i, i).ok_or(RxdError::SingularMatrix { row: i }))
            .collect::<Result<Vec<usize>>>()?;

        let data = lu.data_mut();
        for i in 0..n {
            for kk in indptr[i]..diagonal[i] {
                let k = indices[kk];
                let pivot = data[diagonal[k]];
                if pivot.abs() < PIVOT_EPSILON {
                    return Err(RxdError::SingularMatrix { row: k });
                }
                data[kk] /= pivot;
                let factor = data[kk];

                for jj in diagonal[k] + 1..indptr[k + 1] {
                    if let Some(target) = position(i, indices[jj]) {
                        data[target] -= factor * data[jj];
                    }
                }
            }
            if data[diagonal[i]].abs() < PIVOT_EPSILON {
                return Err(RxdError::SingularMatrix { row: i });
            }
        }
        Ok(Self { lu, indptr, diagonal })
    }

    /// `z = (LU)⁻¹ r`
    pub fn apply(&self, r: &[f64]) -> Vec<f64> {
        let (indices, data) = (self.lu.indices(), self.lu.data());
        let mut z = r.to_vec();
        for i in 0..z.len() {
            let mut value = z[i];
            for kk in self.indptr[i]..self.diagonal[i] {
                value -= data[kk] * z[indices[kk]];
            }
            z[i] = value;
        }
        for i in (0..z.len()).rev() {
            let mut value = z[i];
            for jj in self.diagonal[i] + 1..self.indptr[i + 1] {
                value -= data[jj] * z[indices[jj]];
            }
            z[i] = value / data[self.diagonal[i]];
        }
        z
    }
}

// =================================================================================================
// BiCGSTAB
// =================================================================================================

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// Solve `A x = b` starting from `x`; returns the iteration count
///
/// Convergence is declared when `‖r‖ / ‖b‖ < tolerance`.
pub fn bicgstab(
    matrix: &CsMat<f64>,
    b: &[f64],
    x: &mut [f64],
    preconditioner: &Ilu0,
    tolerance: f64,
    max_iterations: usize,
) -> Result<usize> {
    let b_norm = norm(b);
    if b_norm == 0.0 {
        x.iter_mut().for_each(|v| *v = 0.0);
        return Ok(0);
    }

    let ax = mat_vec(matrix, x);
    let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();
    let mut residual = norm(&r) / b_norm;
    if residual < tolerance {
        return Ok(0);
    }

    let r_hat = r.clone();
    let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);
    let mut v = vec![0.0; b.len()];
    let mut p = vec![0.0; b.len()];

    for iteration in 1..=max_iterations {
        let rho_next = dot(&r_hat, &r);
        if rho_next == 0.0 || omega == 0.0 {
            return Err(RxdError::SolverDivergence { iterations: iteration, residual });
        }
        let beta = (rho_next / rho) * (alpha / omega);
        for i in 0..p.len() {
            p[i] = r[i] + beta * (p[i] - omega * v[i]);
        }

        let p_hat = preconditioner.apply(&p);
        v = mat_vec(matrix, &p_hat);
        let denominator = dot(&r_hat, &v);
        if denominator == 0.0 {
            return Err(RxdError::SolverDivergence { iterations: iteration, residual });
        }
        alpha = rho_next / denominator;

        let s: Vec<f64> = r.iter().zip(&v).map(|(ri, vi)| ri - alpha * vi).collect();
        if norm(&s) / b_norm < tolerance {
            x.iter_mut().zip(&p_hat).for_each(|(xi, pi)| *xi += alpha * pi);
            trace!("bicgstab converged in {iteration} iterations");
            return Ok(iteration);
        }

        let s_hat = preconditioner.apply(&s);
        let t = mat_vec(matrix, &s_hat);
        let tt = dot(&t, &t);
        omega = if tt > 0.0 { dot(&t, &s) / tt } else { 0.0 };

        for i in 0..x.len() {
            x[i] += alpha * p_hat[i] + omega * s_hat[i];
            r[i] = s[i] - omega * t[i];
        }
        residual = norm(&r) / b_norm;
        if residual < tolerance {
            trace!("bicgstab converged in {iteration} iterations");
            return Ok(iteration);
        }
        rho = rho_next;
    }

    Err(RxdError::SolverDivergence { iterations: max_iterations, residual })
}

/// Solve a small dense system
pub fn dense_solve(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
    matrix.lu().solve(rhs).ok_or(RxdError::SingularMatrix { row: 0 })
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// 1D Laplacian-like operator on `n` nodes
    fn chain(n: usize) -> CsMat<f64> {
        let mut tri = TriMat::new((n, n));
        for i in 0..n - 1 {
            tri.add_triplet(i, i + 1, 1.0);
            tri.add_triplet(i + 1, i, 1.0);
            tri.add_triplet(i, i, -1.0);
            tri.add_triplet(i + 1, i + 1, -1.0);
        }
        tri.to_csr()
    }

    #[test]
    fn test_shifted_inserts_diagonal() {
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 1, 2.0);
        let shifted = shifted(&tri.to_csr(), 0.5, &[1.0, 1.0]);

        assert_eq!(shifted.get(0, 0), Some(&1.0));
        assert_eq!(shifted.get(0, 1), Some(&-1.0));
        assert_eq!(shifted.get(1, 1), Some(&1.0));
    }

    #[test]
    fn test_mat_vec() {
        let y = mat_vec(&chain(3), &[1.0, 2.0, 4.0]);
        assert_eq!(y, vec![1.0, 1.0, -2.0]);
    }

    #[test]
    fn test_ilu_is_exact_on_tridiagonal() {
        let a = shifted(&chain(6), 0.7, &[1.0; 6]);
        let ilu = Ilu0::factor(&a).unwrap();
        let b = vec![1.0, 0.0, -2.0, 0.5, 0.0, 3.0];

        let x = ilu.apply(&b);
        let ax = mat_vec(&a, &x);
        for i in 0..6 {
            assert!((ax[i] - b[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bicgstab_converges() {
        let a = shifted(&chain(50), 2.0, &[1.0; 50]);
        let ilu = Ilu0::factor(&shifted(&chain(50), 0.5, &[1.0; 50])).unwrap();
        let b: Vec<f64> = (0..50).map(|i| (i as f64).sin()).collect();
        let mut x = vec![0.0; 50];

        bicgstab(&a, &b, &mut x, &ilu, 1e-12, 200).unwrap();
        let ax = mat_vec(&a, &x);
        for i in 0..50 {
            assert!((ax[i] - b[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_breakdown_reports_its_iteration() {
        // [[0, 1], [1, 0]] with b = e0: r̂·A·p vanishes on the first iteration
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 1, 1.0);
        tri.add_triplet(1, 0, 1.0);
        let a = tri.to_csr();
        let identity = Ilu0::factor(&shifted(&chain(2), 0.0, &[1.0, 1.0])).unwrap();
        let mut x = vec![0.0; 2];

        let err = bicgstab(&a, &[1.0, 0.0], &mut x, &identity, 1e-12, 50).unwrap_err();
        assert!(matches!(err, RxdError::SolverDivergence { iterations: 1, .. }), "{err}");
    }

    #[test]
    fn test_zero_pivot_reported() {
        let tri: TriMat<f64> = TriMat::new((2, 2));
        let a = shifted(&tri.to_csr(), 1.0, &[1.0, 0.0]);
        assert_eq!(Ilu0::factor(&a).unwrap_err(), RxdError::SingularMatrix { row: 1 });
    }

    #[test]
    fn test_dense_solve() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let x = dense_solve(m, &DVector::from_vec(vec![3.0, 5.0])).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12 && (x[1] - 1.4).abs() < 1e-12);
    }
}
