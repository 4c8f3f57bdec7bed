//! Time integrators
//!
//! Concrete implementations of the [`Solver`](crate::solver::Solver) trait.
//!
//! - **[`FixedStepSolver`]**: backward Euler with a constant step
//!   - one linear solve per step (tree sweep for pure 1D, ILU(0)/BiCGSTAB otherwise)
//!   - reactions, currents and fluxes explicit; diffusion implicit
//!   - unconditionally stable for diffusion
//!
//! - **[`VariableStepSolver`]**: adaptive backward Euler driven through [`OdeHooks`]
//!   - modified Newton iteration preconditioned by `(C − dt·D)` and the reaction Jacobian
//!   - local error estimated from the predictor/corrector difference
//!   - step size adapted to `rtol`/`atol`
//!
//! Both solvers are stateless and advance the scenario in place.
//!
//! [`OdeHooks`]: crate::solver::OdeHooks

mod fixed_step;
mod variable_step;

pub use fixed_step::FixedStepSolver;
pub use variable_step::VariableStepSolver;
