//! Variable-step integrator interface
//!
//! The hooks a CVode-style integrator drives. Unknowns are the non-ghost nodes in node order;
//! ghosts are eliminated through the substitution `ghost = Z·real` and never appear in `y`.
//!
//! ```text
//!   count ─► reinit(y) ─┬─► fun(t, y, ydot)                ydot = f(y)
//!                       ├─► jacobian(dt, t, ypred)         refactor per-locus I − dt·J
//!                       ├─► solve(dt, b)                   b ← (C − dt·D)⁻¹ (I − dt·J)⁻¹ b
//!                       └─► commit(y)                      accepted step → states + host
//! ```

use crate::error::Result;
use crate::morphology::CompartmentalHost;

pub trait OdeHooks {
    /// Number of unknowns; brings matrices and compiled reactions up to date
    fn count(&mut self, host: &dyn CompartmentalHost) -> Result<usize>;

    /// Copy the current states into `y`
    fn reinit(&mut self, host: &dyn CompartmentalHost, y: &mut [f64]) -> Result<()>;

    /// Right-hand side at `y`
    fn fun(&mut self, host: &dyn CompartmentalHost, t: f64, y: &[f64], ydot: &mut [f64]) -> Result<()>;

    /// Approximately solve `(I − dt·∂f/∂y)·x = b` in place
    fn solve(&mut self, dt: f64, b: &mut [f64]) -> Result<()>;

    /// Refresh the reaction Jacobian at the predicted state
    fn jacobian(&mut self, host: &dyn CompartmentalHost, dt: f64, t: f64, ypred: &[f64]) -> Result<()>;

    /// Per-unknown absolute-tolerance scale
    fn atol_scale(&self, scales: &mut [f64]) -> Result<()>;

    /// Accept `y` as the new state and hand concentrations to the host
    fn commit(&mut self, host: &mut dyn CompartmentalHost, y: &[f64]) -> Result<()>;
}
