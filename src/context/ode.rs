//! Variable-step hooks over the non-ghost nodes

use log::trace;
use nalgebra::DVector;

use crate::error::{Result, RxdError};
use crate::kinetics::ReactionJacobian;
use crate::morphology::CompartmentalHost;
use crate::solver::{validate_state, OdeHooks};

use super::{not_ready, ReactionDiffusionContext};

impl ReactionDiffusionContext {
    /// Full state vector with `y` on the real nodes and ghosts reconstructed
    fn expand(&self, y: &[f64]) -> Result<DVector<f64>> {
        let (matrices, _, _) = self.cached()?;
        let substitution = matrices.substitution();
        check_len(y.len(), substitution.real().len())?;
        let mut states = self.nodes.states().clone();
        substitution.scatter(y, &mut states);
        substitution.reconstruct(&mut states);
        Ok(states)
    }
}

fn check_len(got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(RxdError::InvalidConfiguration(format!("expected {expected} unknowns, got {got}")))
    }
}

impl OdeHooks for ReactionDiffusionContext {
    fn count(&mut self, host: &dyn CompartmentalHost) -> Result<usize> {
        self.ensure_current(host)?;
        Ok(self.matrices.as_ref().map(|(_, m)| m.substitution().real().len()).unwrap_or(0))
    }

    fn reinit(&mut self, host: &dyn CompartmentalHost, y: &mut [f64]) -> Result<()> {
        self.ensure_current(host)?;
        let (matrices, _, _) = self.cached()?;
        check_len(y.len(), matrices.substitution().real().len())?;
        matrices.substitution().gather(self.nodes.states(), y);
        self.jacobian = None;
        Ok(())
    }

    fn fun(&mut self, host: &dyn CompartmentalHost, t: f64, y: &[f64], ydot: &mut [f64]) -> Result<()> {
        let states = self.expand(y)?;
        let rates = self.rates(&states, host)?;
        let (matrices, _, _) = self.cached()?;
        check_len(ydot.len(), y.len())?;
        matrices.substitution().gather(&rates, ydot);
        trace!("fun at t = {t}: {} unknowns", y.len());
        Ok(())
    }

    fn solve(&mut self, dt: f64, b: &mut [f64]) -> Result<()> {
        let (_, matrices) = self.matrices.as_mut().ok_or_else(not_ready)?;
        let real = matrices.substitution().real().to_vec();
        check_len(b.len(), real.len())?;

        let mut full = vec![0.0; matrices.len()];
        for (value, &node) in b.iter().zip(&real) {
            full[node] = *value;
        }
        matrices.solve(dt, &mut full, &self.options.linear)?;
        if let Some(jacobian) = &self.jacobian {
            jacobian.solve(&mut full)?;
        }
        for (value, &node) in b.iter_mut().zip(&real) {
            *value = full[node];
        }
        Ok(())
    }

    fn jacobian(&mut self, host: &dyn CompartmentalHost, dt: f64, _t: f64, ypred: &[f64]) -> Result<()> {
        let states = self.expand(ypred)?;
        let (_, system, _) = self.cached()?;
        self.jacobian = ReactionJacobian::build(
            system,
            self.options.jacobian,
            self.options.finite_difference_step,
            dt,
            states.as_slice(),
            &self.nodes,
            host,
        )?;
        Ok(())
    }

    fn atol_scale(&self, scales: &mut [f64]) -> Result<()> {
        let (matrices, _, _) = self.cached()?;
        let real = matrices.substitution().real();
        check_len(scales.len(), real.len())?;
        for (scale, &node) in scales.iter_mut().zip(real) {
            *scale = match self.instance_containing(node) {
                Some(instance) => self.species.get(instance.species())?.atol_scale(),
                None => 1.0,
            };
        }
        Ok(())
    }

    fn commit(&mut self, host: &mut dyn CompartmentalHost, y: &[f64]) -> Result<()> {
        let mut states = self.expand(y)?;
        let (matrices, _, _) = self.cached()?;
        for &ghost in matrices.substitution().ghosts() {
            states[ghost] = 0.0;
        }
        *self.nodes.states_mut() = states;
        self.steps += 1;
        validate_state(self.nodes.states(), self.steps)?;
        self.transfer(host)
    }
}
