//! Extracellular space
//!
//! A box `[lo, hi)` cut into a regular lattice with edge `dx` per axis. The voxel count along an
//! axis is `ceil((hi - lo) / dx)`.
//!
//! Transport through the space is hindered by two per-voxel fields:
//!
//! - the **volume fraction** `α`: free volume over total volume
//! - the **permeability** `1/λ²`, where `λ` is the tortuosity
//!
//! The effective flux between neighbors is `D · perm · α · A / dx`, with `perm` and `α` averaged
//! over the two voxels.

use ndarray::Array3;

use crate::error::{Result, RxdError};

/// Scalar field over the voxel lattice
#[derive(Debug, Clone, PartialEq)]
pub enum GridField {
    Uniform(f64),
    PerVoxel(Array3<f64>),
}

impl GridField {
    pub fn at(&self, i: usize, j: usize, k: usize) -> f64 {
        match self {
            GridField::Uniform(value) => *value,
            GridField::PerVoxel(values) => values[[i, j, k]],
        }
    }

    fn check(&self, what: &str, shape: (usize, usize, usize), valid: impl Fn(f64) -> bool) -> Result<()> {
        match self {
            GridField::Uniform(value) if !valid(*value) => {
                Err(RxdError::InvalidRegion(format!("invalid {what}: {value}")))
            }
            GridField::PerVoxel(values) if values.dim() != shape => Err(RxdError::InvalidRegion(format!(
                "{what} grid has shape {:?}, expected {shape:?}",
                values.dim()
            ))),
            GridField::PerVoxel(values) if values.iter().any(|v| !valid(*v)) => {
                Err(RxdError::InvalidRegion(format!("invalid value in {what} grid")))
            }
            _ => Ok(()),
        }
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> GridField {
        match self {
            GridField::Uniform(value) => GridField::Uniform(f(*value)),
            GridField::PerVoxel(values) => GridField::PerVoxel(values.mapv(f)),
        }
    }
}

/// Condition at the faces of the box
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BoundaryCondition {
    /// Reflective (no flux)
    #[default]
    Neumann,
    /// Border voxels held at a fixed concentration (mM)
    Dirichlet(f64),
}

/// Regular lattice of extracellular voxels
#[derive(Debug, Clone, PartialEq)]
pub struct ExtracellularBox {
    lo: [f64; 3],
    hi: [f64; 3],
    dx: [f64; 3],
    volume_fraction: GridField,
    permeability: GridField,
    tortuosity_given: bool,
    permeability_given: bool,
    boundary: BoundaryCondition,
}

impl ExtracellularBox {
    /// Free space (`α = 1`, `λ = 1`) with reflective borders
    pub fn new(lo: [f64; 3], hi: [f64; 3], dx: [f64; 3]) -> Result<Self> {
        for axis in 0..3 {
            if !(dx[axis] > 0.0 && dx[axis].is_finite()) {
                return Err(RxdError::InvalidRegion(format!("extracellular dx must be positive, got {:?}", dx)));
            }
            if !(hi[axis] > lo[axis]) {
                return Err(RxdError::InvalidRegion(format!("extracellular box is empty along axis {axis}")));
            }
        }
        Ok(Self {
            lo,
            hi,
            dx,
            volume_fraction: GridField::Uniform(1.0),
            permeability: GridField::Uniform(1.0),
            tortuosity_given: false,
            permeability_given: false,
            boundary: BoundaryCondition::Neumann,
        })
    }

    /// Volume fraction `α`, in `(0, 1]`
    pub fn with_volume_fraction(mut self, alpha: GridField) -> Result<Self> {
        alpha.check("volume fraction", self.shape(), |a| a > 0.0 && a <= 1.0)?;
        self.volume_fraction = alpha;
        Ok(self)
    }

    /// Tortuosity `λ ≥ 1`; stored as the permeability `1/λ²`
    pub fn with_tortuosity(mut self, lambda: GridField) -> Result<Self> {
        if self.permeability_given {
            return Err(RxdError::InvalidRegion("give either tortuosity or permeability, not both".into()));
        }
        lambda.check("tortuosity", self.shape(), |l| l >= 1.0 && l.is_finite())?;
        self.permeability = lambda.map(|l| 1.0 / (l * l));
        self.tortuosity_given = true;
        Ok(self)
    }

    /// Permeability `1/λ²`, in `(0, 1]`
    pub fn with_permeability(mut self, permeability: GridField) -> Result<Self> {
        if self.tortuosity_given {
            return Err(RxdError::InvalidRegion("give either tortuosity or permeability, not both".into()));
        }
        permeability.check("permeability", self.shape(), |p| p > 0.0 && p <= 1.0)?;
        self.permeability = permeability;
        self.permeability_given = true;
        Ok(self)
    }

    pub fn with_boundary(mut self, boundary: BoundaryCondition) -> Self {
        self.boundary = boundary;
        self
    }

    // ========================================== Queries ==========================================

    pub fn lo(&self) -> [f64; 3] {
        self.lo
    }

    pub fn dx(&self) -> [f64; 3] {
        self.dx
    }

    pub fn boundary(&self) -> BoundaryCondition {
        self.boundary
    }

    /// Voxel counts per axis
    pub fn shape(&self) -> (usize, usize, usize) {
        let count = |axis: usize| ((self.hi[axis] - self.lo[axis]) / self.dx[axis]).ceil().max(1.0) as usize;
        (count(0), count(1), count(2))
    }

    pub fn voxel_count(&self) -> usize {
        let (nx, ny, nz) = self.shape();
        nx * ny * nz
    }

    /// Lexicographic position of voxel `(i, j, k)`
    pub fn linear_index(&self, i: usize, j: usize, k: usize) -> usize {
        let (_, ny, nz) = self.shape();
        (i * ny + j) * nz + k
    }

    /// Voxel of lexicographic position `index`
    pub fn voxel(&self, index: usize) -> [usize; 3] {
        let (_, ny, nz) = self.shape();
        [index / (ny * nz), (index / nz) % ny, index % nz]
    }

    pub fn center(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        [
            self.lo[0] + (i as f64 + 0.5) * self.dx[0],
            self.lo[1] + (j as f64 + 0.5) * self.dx[1],
            self.lo[2] + (k as f64 + 0.5) * self.dx[2],
        ]
    }

    /// Voxel containing `point`, if inside the box
    pub fn voxel_at(&self, point: [f64; 3]) -> Option<[usize; 3]> {
        let (nx, ny, nz) = self.shape();
        let mut voxel = [0usize; 3];
        for (axis, n) in [nx, ny, nz].into_iter().enumerate() {
            let offset = (point[axis] - self.lo[axis]) / self.dx[axis];
            if !(offset >= 0.0) || offset as usize >= n {
                return None;
            }
            voxel[axis] = offset as usize;
        }
        Some(voxel)
    }

    /// Total volume of one voxel (µm³)
    pub fn voxel_volume(&self) -> f64 {
        self.dx[0] * self.dx[1] * self.dx[2]
    }

    pub fn alpha(&self, i: usize, j: usize, k: usize) -> f64 {
        self.volume_fraction.at(i, j, k)
    }

    pub fn permeability(&self, i: usize, j: usize, k: usize) -> f64 {
        self.permeability.at(i, j, k)
    }

    /// Voxel on a face of the box
    pub fn is_border(&self, i: usize, j: usize, k: usize) -> bool {
        let (nx, ny, nz) = self.shape();
        i == 0 || j == 0 || k == 0 || i + 1 == nx || j + 1 == ny || k + 1 == nz
    }
}

// =================================================================================================
// Tests
// =================================================================================================
