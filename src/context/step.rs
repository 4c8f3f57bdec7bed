//! Fixed-step advance
//!
//! ```text
//!   b      = D·s + reactions(s) + currents + fluxes        (0 at fixed nodes)
//!   (C − dt·D)·Δ = dt·b                                    tree sweep or ILU(0)/BiCGSTAB
//!   s     += Δ,  s[ghost] = 0
//! ```
//!
//! `C` is 1 on real nodes and 0 on constrained ghosts, so each ghost row enforces
//! `D[g, :]·(s + Δ) = 0` and the step is exactly backward Euler on the real nodes.

use log::trace;

use crate::error::{Result, RxdError};
use crate::morphology::CompartmentalHost;
use crate::solver::validate_state;

use super::{not_ready, ReactionDiffusionContext};

impl ReactionDiffusionContext {
    /// Advance every node by one backward-Euler step of `dt` (ms), then transfer to the host
    pub fn advance(&mut self, host: &mut dyn CompartmentalHost, dt: f64) -> Result<()> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(RxdError::InvalidConfiguration(format!("time step must be positive, got {dt}")));
        }
        self.ensure_current(&*host)?;

        let mut delta = self.rates(self.nodes.states(), &*host)? * dt;
        self.apply_induced_currents(host)?;

        let (_, matrices) = self.matrices.as_mut().ok_or_else(not_ready)?;
        let iterations = matrices.solve(dt, delta.as_mut_slice(), &self.options.linear)?;
        trace!("step {}: {iterations} linear iterations", self.steps + 1);

        let states = self.nodes.states_mut();
        *states += &delta;
        for &ghost in matrices.substitution().ghosts() {
            states[ghost] = 0.0;
        }

        self.steps += 1;
        validate_state(self.nodes.states(), self.steps)?;
        self.transfer(host)
    }

    /// Add the currents of membrane-flux kinetics at the present state to the host
    pub fn apply_induced_currents(&mut self, host: &mut dyn CompartmentalHost) -> Result<()> {
        self.ensure_current(&*host)?;
        let (_, system, _) = self.cached()?;
        let currents = system.induced_currents(self.nodes.states().as_slice(), &self.nodes, &*host);
        for ((ion, segment), value) in currents {
            host.add_induced_current(&ion, segment, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::context::ReactionDiffusionContext;
    use crate::geometry::Geometry;
    use crate::kinetics::{Expr, Rate, Reaction};
    use crate::morphology::{Morphology, Section, SectionId, StaticHost};
    use crate::node::FluxUnits;
    use crate::region::Region;
    use crate::species::{InitialValue, Species};

    fn rod(nseg: usize, length: f64) -> (StaticHost, SectionId) {
        let mut morphology = Morphology::new();
        let dend = morphology.add_section(Section::cylinder("dend", [0.0; 3], length, 1.0, nseg).unwrap());
        (StaticHost::new(morphology), dend)
    }

    #[test]
    fn test_two_segment_exchange() {
        // two unit-volume compartments, unit face area, unit spacing
        let (mut host, dend) = rod(2, 2.0);
        let mut ctx = ReactionDiffusionContext::new();
        let geometry = Geometry::fixed_cross_section(1.0, 0.0).unwrap();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], geometry).unwrap()).unwrap();
        let a = ctx.add_species(Species::new(vec![cyt]).with_diffusion(1.0)).unwrap();
        ctx.initialize(&mut host).unwrap();

        let left = ctx.node_by_location(a, dend, 0.25).unwrap().unwrap();
        let right = ctx.node_by_location(a, dend, 0.75).unwrap().unwrap();
        ctx.set_concentration(left, 1.0).unwrap();

        ctx.advance(&mut host, 1.0).unwrap();
        let (l, r) = (ctx.concentration(left).unwrap(), ctx.concentration(right).unwrap());
        assert!((l - 2.0 / 3.0).abs() < 1e-12);
        assert!((r - 1.0 / 3.0).abs() < 1e-12);

        let mut previous = l;
        for _ in 0..20 {
            ctx.advance(&mut host, 1.0).unwrap();
            let (l, r) = (ctx.concentration(left).unwrap(), ctx.concentration(right).unwrap());
            assert!((l + r - 1.0).abs() < 1e-12);
            assert!(l < previous && l > 0.5);
            previous = l;
        }
    }

    #[test]
    fn test_decay_rate_matches_backward_euler() {
        let (mut host, dend) = rod(1, 10.0);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let x = ctx
            .add_species(Species::new(vec![cyt]).with_initial(InitialValue::Constant(1.0)))
            .unwrap();
        ctx.add_reaction(Rate::new(x, Expr::species(x) * -0.5)).unwrap();
        ctx.initialize(&mut host).unwrap();

        let node = ctx.node_by_location(x, dend, 0.5).unwrap().unwrap();
        ctx.advance(&mut host, 0.1).unwrap();
        // explicit reaction term: 1 + dt·(-0.5)
        assert!((ctx.concentration(node).unwrap() - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_reaction_conserves_total() {
        let (mut host, dend) = rod(3, 6.0);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let a = ctx
            .add_species(Species::new(vec![cyt]).with_diffusion(0.5).with_initial(InitialValue::Constant(1.0)))
            .unwrap();
        let b = ctx.add_species(Species::new(vec![cyt]).with_diffusion(0.1)).unwrap();
        ctx.add_reaction(
            Reaction::new(vec![(a, 1)], vec![(b, 1)], Expr::constant(0.3)).with_backward(Expr::constant(0.1)),
        )
        .unwrap();
        ctx.initialize(&mut host).unwrap();

        let total = ctx.total_amount(a).unwrap() + ctx.total_amount(b).unwrap();
        for _ in 0..50 {
            ctx.advance(&mut host, 0.05).unwrap();
        }
        let after = ctx.total_amount(a).unwrap() + ctx.total_amount(b).unwrap();
        assert!((after - total).abs() < 1e-10 * total);
        assert!(ctx.total_amount(b).unwrap() > 0.0);
        assert_eq!(ctx.steps(), 50);
    }

    #[test]
    fn test_node_flux_adds_amount() {
        let (mut host, dend) = rod(2, 4.0);
        let mut ctx = ReactionDiffusionContext::new();
        let cyt = ctx.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
        let x = ctx.add_species(Species::new(vec![cyt]).with_diffusion(1.0)).unwrap();
        ctx.initialize(&mut host).unwrap();

        let node = ctx.node_by_location(x, dend, 0.25).unwrap().unwrap();
        ctx.add_node_flux(node, 1000.0, FluxUnits::MoleculesPerMs).unwrap();
        ctx.advance(&mut host, 0.5).unwrap();

        let molecules = ctx.total_amount(x).unwrap() * crate::node::MOLECULES_PER_MM_UM3;
        assert!((molecules - 500.0).abs() < 1e-8);
    }

    #[test]
    fn test_rejects_bad_step() {
        let (mut host, _) = rod(1, 1.0);
        let mut ctx = ReactionDiffusionContext::new();
        assert!(ctx.advance(&mut host, 0.0).is_err());
        assert!(ctx.advance(&mut host, f64::NAN).is_err());
    }
}
