//! rxd-rs: Reaction-Diffusion Engine for Neuronal Morphologies
//!
//! Discretizes chemical species over a branched neuron (1D cable nodes, 3D voxels, or both) and
//! over an optional extracellular box, assembles the diffusion operator, compiles reaction
//! kinetics to per-node bytecode, and advances concentrations alongside a compartmental host.
//!
//! # Architecture
//!
//! rxd-rs is built on two core principles:
//!
//! 1. **Separation of Model and Numerics**
//!    - Regions, species and reactions declare the system (what to solve)
//!    - Diffusion assembly, the reaction compiler and the solvers provide methods (how to solve)
//!
//! 2. **One flat state vector**
//!    - Every species instance owns a contiguous range of nodes
//!    - Matrices, reaction groups and membrane currents are caches keyed by structure epochs
//!
//! ```text
//!   Morphology ──► Region ──► Species ──► NodeStore ──► DiffusionMatrices ─┐
//!   (host)         geometry   instances   (states)      tree / sparse      ├─► Solver
//!                                            ▲          ReactionSystem ────┘
//!                                            └──────────── transfer ◄──── CompartmentalHost
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use rxd_rs::prelude::*;
//!
//! # fn main() -> rxd_rs::error::Result<()> {
//! // 1. Morphology and host
//! let mut morphology = Morphology::new();
//! let soma = morphology.add_section(Section::cylinder("soma", [0.0; 3], 10.0, 10.0, 1)?);
//! let host = StaticHost::new(morphology);
//!
//! // 2. Regions, species, reactions
//! let mut context = ReactionDiffusionContext::new();
//! let cyt = context.add_region(Region::new("cyt", vec![soma], Geometry::Inside)?)?;
//! let a = context.add_species(Species::new(vec![cyt]).with_initial(InitialValue::Constant(1.0)))?;
//! let b = context.add_species(Species::new(vec![cyt]))?;
//! context.add_reaction(Reaction::new(vec![(a, 1)], vec![(b, 1)], 0.5))?;
//!
//! // 3. Run
//! let mut scenario = Scenario::new(context, Box::new(host))?;
//! scenario.initialize()?;
//! let result = FixedStepSolver::new().solve(&mut scenario, &SolverConfiguration::fixed_step(1.0, 100))?;
//!
//! // 4. Mass is conserved between A and B
//! let total = scenario.context.total_amount(a)? + scenario.context.total_amount(b)?;
//! assert!(result.len() == 101 && total > 0.0);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`morphology`]: sections, segments and the compartmental host interface
//! - [`geometry`]: volume/area descriptors and voxelization
//! - [`region`], [`species`]: what lives where
//! - [`node`]: the state vector and its side tables
//! - [`diffusion`], [`linalg`]: operator assembly and linear solves
//! - [`kinetics`]: expressions, reactions and the compiler
//! - [`context`]: the registry tying everything together
//! - [`solver`]: fixed- and variable-step drivers

pub mod arena;
pub mod context;
pub mod diffusion;
pub mod error;
pub mod geometry;
pub mod kinetics;
pub mod linalg;
pub mod morphology;
pub mod node;
pub mod region;
pub mod solver;
pub mod species;

pub mod prelude {
    //! Convenient imports for common usage
    //!
    //! ```rust
    //!
    //! use rxd_rs::prelude::*;
    //! ```
    pub use crate::context::{ContextOptions, ReactionDiffusionContext, Snapshot};
    pub use crate::error::{Result, RxdError};
    pub use crate::geometry::Geometry;
    pub use crate::kinetics::{Expr, JacobianMode, MultiCompartmentReaction, Rate, Reaction};
    pub use crate::morphology::{
        CompartmentalHost, IonSide, Morphology, Section, SectionId, SegmentRef, StaticHost,
    };
    pub use crate::node::FluxUnits;
    pub use crate::region::{BoundaryCondition, ExtracellularBox, Region};
    pub use crate::species::{InitialValue, Species, SpeciesId};
    pub use crate::solver::{
        FixedStepSolver, OdeHooks, Scenario, SimulationResult, Solver, SolverConfiguration, SolverType,
        VariableStepSolver,
    };
}
