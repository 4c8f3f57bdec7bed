//! Solver traits and types
//!
//! # Design
//!
//! - `SolverType` says WHICH drive mode runs and carries its parameters
//! - `SolverConfiguration` wraps it together with the linear-solver and Jacobian tunables
//! - `SimulationResult` carries the sampled trajectory and free-form metadata
//!
//! Every solver works on a [`Scenario`] (context + host) and returns a [`SimulationResult`].

use std::collections::HashMap;

use nalgebra::DVector;

use crate::error::{Result, RxdError};
use crate::kinetics::JacobianMode;
use crate::linalg::LinearSolverOptions;
use crate::solver::Scenario;

// =================================================================================================
// Solver trait
// =================================================================================================

/// A time integrator for reaction-diffusion scenarios
///
/// Solvers are stateless: all state lives in the scenario, which they advance in place.
pub trait Solver {
    fn solve(&self, scenario: &mut Scenario, config: &SolverConfiguration) -> Result<SimulationResult>;

    fn name(&self) -> &'static str;
}

// =================================================================================================
// Solver type
// =================================================================================================

/// Drive mode and its parameters
///
/// # Examples
///
/// ```rust
/// use rxd_rs::solver::SolverType;
///
/// let fixed = SolverType::FixedStep { total_time: 10.0, time_steps: 400 };
/// assert!(fixed.validate().is_ok());
///
/// let adaptive = SolverType::VariableStep {
///     total_time: 10.0,
///     initial_dt: 0.01,
///     rtol: 1e-4,
///     atol: 1e-8,
///     max_steps: 100_000,
/// };
/// assert_eq!(adaptive.name(), "VariableStep");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum SolverType {
    /// `time_steps` backward-Euler steps of `total_time / time_steps` (ms)
    FixedStep { total_time: f64, time_steps: usize },

    /// Adaptive step over `total_time` (ms)
    ///
    /// - `initial_dt`: first trial step
    /// - `rtol`, `atol`: local error tolerances (`atol` scaled per species)
    /// - `max_steps`: attempted steps (accepted or rejected) before giving up
    VariableStep { total_time: f64, initial_dt: f64, rtol: f64, atol: f64, max_steps: usize },
}

impl SolverType {
    pub fn name(&self) -> &str {
        match self {
            SolverType::FixedStep { .. } => "FixedStep",
            SolverType::VariableStep { .. } => "VariableStep",
        }
    }

    pub fn total_time(&self) -> f64 {
        match self {
            SolverType::FixedStep { total_time, .. } | SolverType::VariableStep { total_time, .. } => *total_time,
        }
    }

    /// Validate that parameters are meaningful
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RxdError::InvalidConfiguration(msg));
        match self {
            SolverType::FixedStep { total_time, time_steps } => {
                if !(*total_time > 0.0 && total_time.is_finite()) {
                    return invalid(format!("total time must be positive, got {total_time}"));
                }
                if *time_steps == 0 {
                    return invalid("time steps must be greater than 0".into());
                }
                Ok(())
            }
            SolverType::VariableStep { total_time, initial_dt, rtol, atol, max_steps } => {
                if !(*total_time > 0.0 && total_time.is_finite()) {
                    return invalid(format!("total time must be positive, got {total_time}"));
                }
                if !(*initial_dt > 0.0 && initial_dt.is_finite()) {
                    return invalid(format!("initial dt must be positive, got {initial_dt}"));
                }
                if !(*rtol >= 0.0 && *atol >= 0.0) || (*rtol == 0.0 && *atol == 0.0) {
                    return invalid(format!("tolerances must be non-negative and not both zero (rtol {rtol}, atol {atol})"));
                }
                if *max_steps == 0 {
                    return invalid("max steps must be positive".into());
                }
                Ok(())
            }
        }
    }
}

// =================================================================================================
// Solver configuration
// =================================================================================================

/// Configuration for a solver run
///
/// # Examples
///
/// ```rust
/// use rxd_rs::kinetics::JacobianMode;
/// use rxd_rs::solver::SolverConfiguration;
///
/// let config = SolverConfiguration::fixed_step(5.0, 200).with_linear_tolerance(1e-12);
/// assert!(config.validate().is_ok());
///
/// let config = SolverConfiguration::variable_step(5.0, 0.01, 1e-5, 1e-9)
///     .with_jacobian(JacobianMode::Analytic);
/// assert_eq!(config.jacobian, JacobianMode::Analytic);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SolverConfiguration {
    pub solver_type: SolverType,
    /// BiCGSTAB settings for non-tree diffusion systems
    pub linear: LinearSolverOptions,
    /// Reaction Jacobian used by the variable-step solver
    pub jacobian: JacobianMode,
}

impl SolverConfiguration {
    pub fn new(solver_type: SolverType) -> Self {
        Self { solver_type, linear: LinearSolverOptions::default(), jacobian: JacobianMode::Disabled }
    }

    pub fn fixed_step(total_time: f64, time_steps: usize) -> Self {
        Self::new(SolverType::FixedStep { total_time, time_steps })
    }

    /// Adaptive step with a default cap of 1 000 000 attempted steps
    pub fn variable_step(total_time: f64, initial_dt: f64, rtol: f64, atol: f64) -> Self {
        Self::new(SolverType::VariableStep { total_time, initial_dt, rtol, atol, max_steps: 1_000_000 })
    }

    pub fn with_linear_tolerance(mut self, tolerance: f64) -> Self {
        self.linear.tolerance = tolerance;
        self
    }

    pub fn with_max_linear_iterations(mut self, max_iterations: usize) -> Self {
        self.linear.max_iterations = max_iterations;
        self
    }

    pub fn with_jacobian(mut self, mode: JacobianMode) -> Self {
        self.jacobian = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.solver_type.validate()?;
        self.linear.validate()
    }
}

// =================================================================================================
// Simulation result
// =================================================================================================

/// Sampled trajectory of a run
#[derive(Clone, Debug)]
pub struct SimulationResult {
    /// Sample times (ms), starting at 0
    pub time_points: Vec<f64>,
    /// Full node state at every sample
    pub state_trajectory: Vec<DVector<f64>>,
    pub final_state: DVector<f64>,
    pub metadata: HashMap<String, String>,
}

impl SimulationResult {
    pub fn new(time_points: Vec<f64>, state_trajectory: Vec<DVector<f64>>, final_state: DVector<f64>) -> Self {
        Self { time_points, state_trajectory, final_state, metadata: HashMap::new() }
    }

    pub fn add_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.time_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_step_validation() {
        assert!(SolverType::FixedStep { total_time: 1.0, time_steps: 10 }.validate().is_ok());
        assert!(SolverType::FixedStep { total_time: 0.0, time_steps: 10 }.validate().is_err());
        assert!(SolverType::FixedStep { total_time: 1.0, time_steps: 0 }.validate().is_err());
    }

    #[test]
    fn test_variable_step_validation() {
        let valid = SolverType::VariableStep { total_time: 1.0, initial_dt: 0.01, rtol: 1e-4, atol: 0.0, max_steps: 10 };
        assert!(valid.validate().is_ok());

        let no_tolerance = SolverType::VariableStep { total_time: 1.0, initial_dt: 0.01, rtol: 0.0, atol: 0.0, max_steps: 10 };
        assert!(no_tolerance.validate().is_err());

        let bad_dt = SolverType::VariableStep { total_time: 1.0, initial_dt: -1.0, rtol: 1e-4, atol: 1e-8, max_steps: 10 };
        assert!(bad_dt.validate().is_err());
    }

    #[test]
    fn test_configuration_builders() {
        let config = SolverConfiguration::fixed_step(2.0, 20)
            .with_linear_tolerance(1e-8)
            .with_max_linear_iterations(50)
            .with_jacobian(JacobianMode::FiniteDifference);
        assert_eq!(config.linear.tolerance, 1e-8);
        assert_eq!(config.linear.max_iterations, 50);
        assert_eq!(config.jacobian, JacobianMode::FiniteDifference);
        assert_eq!(config.solver_type.total_time(), 2.0);

        assert!(SolverConfiguration::fixed_step(2.0, 20).with_linear_tolerance(2.0).validate().is_err());
    }

    #[test]
    fn test_result_metadata() {
        let mut result = SimulationResult::new(vec![0.0], vec![DVector::zeros(2)], DVector::zeros(2));
        result.add_metadata("solver", "test");
        assert_eq!(result.metadata.get("solver").map(String::as_str), Some("test"));
        assert_eq!(result.len(), 1);
        assert!(!result.is_empty());
    }
}
