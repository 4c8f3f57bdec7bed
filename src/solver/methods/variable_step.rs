//! Variable-step solver
//!
//! Adaptive backward Euler over the non-ghost unknowns, driven entirely through [`OdeHooks`].
//!
//! # Step
//!
//! ```text
//!   predictor   y⁽⁰⁾ = y + h·f(y)
//!   Jacobian    refreshed at (t + h, y⁽⁰⁾)
//!   corrector   z ← z + P⁻¹·(y + h·f(z) − z)        P = (C − h·D)(I − h·J)
//!   error       e = ½·‖z − y⁽⁰⁾‖_wrms                  weights rtol·|y| + atol·scale
//! ```
//!
//! A step is accepted when `e ≤ 1`; the next step is scaled by `0.9/√e`, clamped to `[0.2, 2]`.
//! A corrector that fails to converge quarters the step.

use log::{debug, trace};

use crate::error::{Result, RxdError};
use crate::solver::{OdeHooks, Scenario, SimulationResult, Solver, SolverConfiguration, SolverType};

const MAX_NEWTON_ITERATIONS: usize = 4;
const NEWTON_TOLERANCE: f64 = 0.1;
const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 2.0;
const NEWTON_FAILURE_FACTOR: f64 = 0.25;

/// Adaptive backward-Euler integrator
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableStepSolver;

impl VariableStepSolver {
    pub fn new() -> Self {
        Self
    }
}

/// Weighted RMS norm; a component with zero weight counts only if it is nonzero
fn wrms(values: &[f64], weights: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values
        .iter()
        .zip(weights)
        .map(|(v, w)| {
            if *w > 0.0 {
                (v / w).powi(2)
            } else if *v == 0.0 {
                0.0
            } else {
                f64::INFINITY
            }
        })
        .sum();
    (sum / values.len() as f64).sqrt()
}

impl Solver for VariableStepSolver {
    fn solve(&self, scenario: &mut Scenario, config: &SolverConfiguration) -> Result<SimulationResult> {
        // ====== Step 1: Validation ======

        config.validate()?;
        let (total_time, initial_dt, rtol, atol, max_steps) = match &config.solver_type {
            SolverType::VariableStep { total_time, initial_dt, rtol, atol, max_steps } => {
                (*total_time, *initial_dt, *rtol, *atol, *max_steps)
            }
            other => {
                return Err(RxdError::InvalidConfiguration(format!(
                    "VariableStepSolver only supports VariableStep configuration, got {}",
                    other.name()
                )));
            }
        };
        scenario.context.set_linear_options(config.linear.clone())?;
        scenario.context.set_jacobian_mode(config.jacobian);
        scenario.validate()?;

        // ====== Step 2: Setup ======

        let context = &mut scenario.context;
        let host = scenario.host.as_mut();

        let n = context.count(&*host)?;
        let mut y = vec![0.0; n];
        context.reinit(&*host, &mut y)?;
        let mut scales = vec![1.0; n];
        context.atol_scale(&mut scales)?;

        let mut ydot = vec![0.0; n];
        let mut predicted = vec![0.0; n];
        let mut z = vec![0.0; n];
        let mut residual = vec![0.0; n];
        let mut weights = vec![0.0; n];

        let mut time_points = vec![0.0];
        let mut state_trajectory = vec![context.states().clone()];

        let mut t = 0.0;
        let mut h = initial_dt.min(total_time);
        let mut attempts = 0;
        let mut rejected = 0;
        let mut last_error = 0.0;

        // ====== Step 3: Time Integration ======

        while total_time - t > total_time * 1e-12 {
            if attempts >= max_steps {
                return Err(RxdError::SolverDivergence { iterations: attempts, residual: last_error });
            }
            attempts += 1;
            h = h.min(total_time - t);

            for ((w, yi), s) in weights.iter_mut().zip(&y).zip(&scales) {
                *w = rtol * yi.abs() + atol * s;
            }

            context.fun(&*host, t, &y, &mut ydot)?;
            for ((p, yi), fi) in predicted.iter_mut().zip(&y).zip(&ydot) {
                *p = yi + h * fi;
            }
            context.jacobian(&*host, h, t + h, &predicted)?;

            z.copy_from_slice(&predicted);
            let mut converged = false;
            for _ in 0..MAX_NEWTON_ITERATIONS {
                context.fun(&*host, t + h, &z, &mut ydot)?;
                for (((r, yi), fi), zi) in residual.iter_mut().zip(&y).zip(&ydot).zip(&z) {
                    *r = yi + h * fi - zi;
                }
                context.solve(h, &mut residual)?;
                for (zi, r) in z.iter_mut().zip(&residual) {
                    *zi += r;
                }
                let norm = wrms(&residual, &weights);
                if !norm.is_finite() {
                    break;
                }
                if norm < NEWTON_TOLERANCE {
                    converged = true;
                    break;
                }
            }
            if !converged {
                trace!("corrector failed at t = {t} with h = {h}");
                rejected += 1;
                h *= NEWTON_FAILURE_FACTOR;
                continue;
            }

            for ((r, zi), p) in residual.iter_mut().zip(&z).zip(&predicted) {
                *r = zi - p;
            }
            let error = 0.5 * wrms(&residual, &weights);
            last_error = error;

            if error <= 1.0 {
                t += h;
                y.copy_from_slice(&z);
                context.commit(host, &y)?;
                time_points.push(t);
                state_trajectory.push(context.states().clone());
            } else {
                rejected += 1;
            }

            let factor = if error > 0.0 { (SAFETY / error.sqrt()).clamp(MIN_FACTOR, MAX_FACTOR) } else { MAX_FACTOR };
            h *= factor;
        }

        let accepted = time_points.len() - 1;
        debug!("variable step: {accepted} accepted, {rejected} rejected steps over {n} unknowns");

        // ====== Step 4: Build Result ======

        let final_state = context.states().clone();
        let mut result = SimulationResult::new(time_points, state_trajectory, final_state);
        result.add_metadata("solver", self.name());
        result.add_metadata("accepted steps", &accepted.to_string());
        result.add_metadata("rejected steps", &rejected.to_string());
        result.add_metadata("rtol", &rtol.to_string());
        result.add_metadata("atol", &atol.to_string());
        result.add_metadata("total time", &total_time.to_string());
        result.add_metadata("unknowns", &n.to_string());
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "Variable Step"
    }
}

// =================================================================================================
// Tests
// =================================================================================================
