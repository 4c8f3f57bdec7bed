//! Fixed-step solver
//!
//! # Scheme
//!
//! Every step solves
//!
//! ```text
//! (C − dt·D)·Δ = dt·(D·s + R(s) + I + F)
//! s ← s + Δ
//! ```
//!
//! with diffusion `D` implicit and reactions `R`, membrane currents `I` and node fluxes `F`
//! explicit. Diffusion alone is unconditionally stable and conserves Σ c·vol exactly (up to the
//! linear-solver tolerance).
//!
//! # Example
//!
//! ```rust,ignore
//! use rxd_rs::solver::{FixedStepSolver, Solver, SolverConfiguration};
//!
//! let config = SolverConfiguration::fixed_step(10.0, 400);   // dt = 0.025 ms
//! let result = FixedStepSolver::new().solve(&mut scenario, &config)?;
//! println!("final time: {:?}", result.time_points.last());
//! ```

use log::debug;

use crate::error::{Result, RxdError};
use crate::solver::{Scenario, SimulationResult, Solver, SolverConfiguration, SolverType};

// =================================================================================================
// Fixed-step solver
// =================================================================================================

/// Backward-Euler stepping with `dt = total_time / time_steps`
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedStepSolver;

impl FixedStepSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Solver for FixedStepSolver {
    fn solve(&self, scenario: &mut Scenario, config: &SolverConfiguration) -> Result<SimulationResult> {
        // ====== Step 1: Validation ======

        config.validate()?;
        let (total_time, time_steps) = match &config.solver_type {
            SolverType::FixedStep { total_time, time_steps } => (*total_time, *time_steps),
            other => {
                return Err(RxdError::InvalidConfiguration(format!(
                    "FixedStepSolver only supports FixedStep configuration, got {}",
                    other.name()
                )));
            }
        };
        scenario.context.set_linear_options(config.linear.clone())?;
        scenario.validate()?;

        // ====== Step 2: Setup ======

        let dt = total_time / time_steps as f64;
        let mut time_points = Vec::with_capacity(time_steps + 1);
        let mut state_trajectory = Vec::with_capacity(time_steps + 1);
        time_points.push(0.0);
        state_trajectory.push(scenario.context.states().clone());

        // ====== Step 3: Time Integration ======

        for step in 0..time_steps {
            scenario.context.advance(scenario.host.as_mut(), dt)?;
            state_trajectory.push(scenario.context.states().clone());
            // from the index, not t += dt, so the last point is exactly total_time
            time_points.push((step as f64 + 1.0) * dt);
        }
        debug!("fixed step: {time_steps} steps of {dt} ms over {} nodes", scenario.node_count());

        // ====== Step 4: Build Result ======

        let final_state = scenario.context.states().clone();
        let mut result = SimulationResult::new(time_points, state_trajectory, final_state);
        result.add_metadata("solver", self.name());
        result.add_metadata("time steps", &time_steps.to_string());
        result.add_metadata("dt", &dt.to_string());
        result.add_metadata("total time", &total_time.to_string());
        result.add_metadata("nodes", &scenario.node_count().to_string());
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "Fixed Step"
    }
}

// =================================================================================================
// Tests
// =================================================================================================
