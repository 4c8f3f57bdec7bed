//! Time integration
//!
//! # Core Concepts
//!
//! The solver layer separates concerns into three pieces:
//!
//! 1. **Scenario** (`Scenario`) - WHAT to solve
//!    - reaction-diffusion context (regions, species, reactions, node states)
//!    - compartmental host (morphology, voltages, currents)
//!
//! 2. **Configuration** (`SolverConfiguration`) - HOW to solve
//!    - drive mode (fixed or variable step) and its parameters
//!    - linear-solver tolerance and Jacobian mode
//!
//! 3. **Solver** (`Solver` trait) - the time integrator
//!    - advances the scenario in place
//!    - returns the sampled trajectory
//!
//! # Module Organization
//!
//! - **`traits`**: `Solver`, `SolverType`, `SolverConfiguration`, `SimulationResult`
//! - **`scenario`**: `Scenario`
//! - **`hooks`**: `OdeHooks`, the CVode-style interface implemented by the context
//! - **`methods`**: `FixedStepSolver`, `VariableStepSolver`
//!
//! # Workflow Diagram
//!
//! ```text
//! ┌──────────────────────────┐   ┌────────────────────┐
//! │ ReactionDiffusionContext │   │ CompartmentalHost  │
//! └────────────┬─────────────┘   └─────────┬──────────┘
//!              └──────────────┬────────────┘
//!                    ┌────────▼────────┐
//!                    │    Scenario     │ ← WHAT to solve
//!                    └────────┬────────┘
//!                    ┌────────▼─────────────┐
//!                    │ SolverConfiguration  │ ← HOW to solve
//!                    └────────┬─────────────┘
//!                    ┌────────▼────────────────────────┐
//!                    │ FixedStepSolver                 │ advance(dt) × N
//!                    │ VariableStepSolver              │ OdeHooks + error control
//!                    └────────┬────────────────────────┘
//!                    ┌────────▼────────────┐
//!                    │ SimulationResult    │ ← trajectory + metadata
//!                    └─────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use rxd_rs::prelude::*;
//!
//! # fn main() -> rxd_rs::error::Result<()> {
//! let mut morphology = Morphology::new();
//! let dend = morphology.add_section(Section::cylinder("dend", [0.0; 3], 20.0, 1.0, 10)?);
//!
//! let mut context = ReactionDiffusionContext::new();
//! let cyt = context.add_region(Region::new("cyt", vec![dend], Geometry::Inside)?)?;
//! context.add_species(Species::new(vec![cyt]).with_diffusion(1.0).with_initial(InitialValue::Constant(1.0)))?;
//!
//! let mut scenario = Scenario::new(context, Box::new(StaticHost::new(morphology)))?;
//! scenario.initialize()?;
//!
//! let config = SolverConfiguration::fixed_step(1.0, 40);
//! let result = FixedStepSolver::new().solve(&mut scenario, &config)?;
//! assert_eq!(result.len(), 41);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Every solver returns [`crate::error::Result`]. Common failures:
//! - invalid configuration (non-positive time, zero steps)
//! - `NonFiniteState` when a step produces NaN or Inf
//! - `SolverDivergence` when BiCGSTAB or the step-size controller gives up

// =================================================================================================
// Module Declarations
// =================================================================================================
mod hooks;
mod methods;
mod scenario;
mod traits;

// =================================================================================================
// Parallel Execution Threshold
// =================================================================================================
//
// Deciding *when* to hand per-locus reaction work to Rayon is an execution concern, so it lives
// here rather than in the kinetics module.
//
// The threshold is stored in an AtomicUsize so that it can be changed at runtime (useful in
// benchmarks and tests) without a mutex on every evaluation. Relaxed ordering is sufficient: the
// value is a performance hint, not a synchronisation point.
// =================================================================================================

use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of reaction loci above which evaluation switches to parallel iteration.
const DEFAULT_PARALLEL_THRESHOLD: usize = 999;

/// Runtime-configurable parallel-execution threshold.
///
/// Read via [`parallel_threshold()`], written via [`set_parallel_threshold()`].
static PARALLEL_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_PARALLEL_THRESHOLD);

/// Return the current parallel-execution threshold.
///
/// Reaction groups with fewer loci than this value are evaluated sequentially; larger groups use
/// Rayon, but only when the crate is compiled with the `parallel` feature.
///
/// # Example
///
/// ```rust
/// use rxd_rs::solver::parallel_threshold;
///
/// assert!(parallel_threshold() > 0);
/// ```
pub fn parallel_threshold() -> usize {
    PARALLEL_THRESHOLD.load(Ordering::Relaxed)
}

/// Set the parallel-execution threshold to a new value.
///
/// # Panics
///
/// Panics when `threshold == 0`.
///
/// # Example
///
/// ```rust
/// use rxd_rs::solver::{parallel_threshold, set_parallel_threshold};
///
/// let previous = parallel_threshold();
/// set_parallel_threshold(2048);
/// assert_eq!(parallel_threshold(), 2048);
///
/// // Restore so other tests are not affected.
/// set_parallel_threshold(previous);
/// ```
pub fn set_parallel_threshold(threshold: usize) {
    assert!(threshold > 0, "parallel threshold must be at least 1");
    PARALLEL_THRESHOLD.store(threshold, Ordering::Relaxed);
}

/// RAII guard that saves the current threshold on construction and restores it on drop.
///
/// Only compiled in test builds.
#[cfg(test)]
pub(crate) struct ThresholdGuard {
    previous: usize,
}

#[cfg(test)]
impl ThresholdGuard {
    /// Set the threshold to `new_value` and return a guard that will restore the previous value.
    pub(crate) fn save(new_value: usize) -> Self {
        let previous = parallel_threshold();
        set_parallel_threshold(new_value);
        Self { previous }
    }
}

#[cfg(test)]
impl Drop for ThresholdGuard {
    fn drop(&mut self) {
        // Bypass the public setter so that restoring never panics.
        PARALLEL_THRESHOLD.store(self.previous, Ordering::Relaxed);
    }
}

// =================================================================================================
// Public Re-exports
// =================================================================================================

pub use hooks::OdeHooks;
pub use methods::{FixedStepSolver, VariableStepSolver};
pub use scenario::Scenario;
pub use traits::{SimulationResult, Solver, SolverConfiguration, SolverType};

// =================================================================================================
// Helper Functions
// =================================================================================================

use nalgebra::DVector;

use crate::error::{Result, RxdError};

/// Validate node states for numerical issues
///
/// NaN arises from 0/0 or Inf - Inf in a rate expression; Inf from overflow or a zero-volume
/// division. Either is reported with the first offending node and the step it appeared at.
pub(crate) fn validate_state(state: &DVector<f64>, step: usize) -> Result<()> {
    match state.iter().position(|x| !x.is_finite()) {
        Some(node) => Err(RxdError::NonFiniteState { node, step }),
        None => Ok(()),
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold_value() {
        assert_eq!(DEFAULT_PARALLEL_THRESHOLD, 999);
    }

    #[test]
    fn test_get_and_set_threshold() {
        let _guard = ThresholdGuard::save(500);
        assert_eq!(parallel_threshold(), 500);
    }

    #[test]
    #[should_panic(expected = "parallel threshold must be at least 1")]
    fn test_zero_threshold_panics() {
        set_parallel_threshold(0);
    }

    #[test]
    fn test_threshold_guard_restores_previous_value() {
        let before = parallel_threshold();
        {
            let _guard = ThresholdGuard::save(42);
            assert_eq!(parallel_threshold(), 42);
        }
        assert_eq!(parallel_threshold(), before);
    }

    #[test]
    fn test_threshold_is_visible_across_threads() {
        use std::thread;

        let _guard = ThresholdGuard::save(1234);

        let handles: Vec<_> = (0..8).map(|_| thread::spawn(parallel_threshold)).collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1234);
        }
    }

    #[test]
    fn test_validate_state_reports_first_bad_node() {
        assert!(validate_state(&DVector::from_vec(vec![0.0, 1.0, -2.0]), 3).is_ok());

        let err = validate_state(&DVector::from_vec(vec![0.0, f64::NAN, f64::INFINITY]), 7).unwrap_err();
        assert!(matches!(err, RxdError::NonFiniteState { node: 1, step: 7 }));

        let err = validate_state(&DVector::from_vec(vec![f64::NEG_INFINITY]), 1).unwrap_err();
        assert!(err.is_numerical());
    }
}
