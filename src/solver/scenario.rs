//! Simulation scenario definition
//!
//! A scenario pairs the reaction-diffusion context with the compartmental host it runs against.

use crate::context::ReactionDiffusionContext;
use crate::error::Result;
use crate::morphology::CompartmentalHost;

/// Simulation scenario
///
/// This is the "WHAT to solve": the same scenario can be advanced by either solver.
///
/// ```rust,ignore
/// let mut scenario = Scenario::new(context, Box::new(host))?;
/// scenario.initialize()?;
/// let result = FixedStepSolver::new().solve(&mut scenario, &config)?;
/// ```
pub struct Scenario {
    pub context: ReactionDiffusionContext,
    pub host: Box<dyn CompartmentalHost>,
}

impl Scenario {
    /// Build a scenario; the context is brought up to date with the host immediately
    pub fn new(mut context: ReactionDiffusionContext, host: Box<dyn CompartmentalHost>) -> Result<Self> {
        context.ensure_current(host.as_ref())?;
        Ok(Self { context, host })
    }

    /// Apply initial values and push them to the host
    pub fn initialize(&mut self) -> Result<()> {
        self.context.initialize(self.host.as_mut())
    }

    /// Check that the layout still matches the host
    pub fn validate(&mut self) -> Result<()> {
        self.context.ensure_current(self.host.as_ref())
    }

    pub fn node_count(&self) -> usize {
        self.context.node_store().len()
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("context", &self.context)
            .field("sections", &self.host.morphology().len())
            .field("t", &self.host.t())
            .finish()
    }
}

// ================================================================================================
// Tests
// ================================================================================================
