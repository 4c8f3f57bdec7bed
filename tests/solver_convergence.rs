//! Convergence tests for the time integrators
//!
//! Backward Euler is first order: halving the step halves the error, and tightening the
//! variable-step tolerance tightens the result.

use rxd_rs::prelude::*;

mod common;
use common::{compute_l2_error, relative_error, rod};

/// Single compartment with `x' = -k·x`, `x(0) = 1`
fn decay(k: f64) -> (Scenario, SpeciesId) {
    let (morphology, dend) = rod(10.0, 2.0, 1);
    let mut context = ReactionDiffusionContext::new();
    let cyt = context.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
    let x = context
        .add_species(Species::new(vec![cyt]).with_initial(InitialValue::Constant(1.0)))
        .unwrap();
    context.add_reaction(Rate::new(x, Expr::species(x) * -k)).unwrap();
    let mut scenario = Scenario::new(context, Box::new(StaticHost::new(morphology))).unwrap();
    scenario.initialize().unwrap();
    (scenario, x)
}

fn value(scenario: &Scenario, x: SpeciesId) -> f64 {
    let node = scenario.context.nodes(x).unwrap().last().unwrap().index;
    scenario.context.concentration(node).unwrap()
}

#[test]
fn test_fixed_step_first_order_convergence() {
    // error ~ O(dt): dt → dt/2 gives error → error/2
    let decay_rate: f64 = 0.3;
    let total_time = 10.0;
    let exact = (-decay_rate * total_time).exp();

    let mut errors = Vec::new();
    for steps in [100, 200, 400, 800] {
        let (mut scenario, x) = decay(decay_rate);
        FixedStepSolver::new()
            .solve(&mut scenario, &SolverConfiguration::fixed_step(total_time, steps))
            .unwrap();
        errors.push((value(&scenario, x) - exact).abs());
    }

    for i in 0..errors.len() - 1 {
        let ratio = errors[i] / errors[i + 1];
        assert!(ratio > 1.8 && ratio < 2.2, "Convergence ratio {} not first-order", ratio);
    }
}

#[test]
fn test_variable_step_tolerance_controls_error() {
    let decay_rate: f64 = 0.3;
    let total_time = 10.0;
    let exact = (-decay_rate * total_time).exp();

    let mut errors = Vec::new();
    let mut accepted = Vec::new();
    for rtol in [1e-3, 1e-5, 1e-7] {
        let (mut scenario, x) = decay(decay_rate);
        let result = VariableStepSolver::new()
            .solve(&mut scenario, &SolverConfiguration::variable_step(total_time, 0.01, rtol, 1e-12))
            .unwrap();
        errors.push(relative_error(value(&scenario, x), exact));
        accepted.push(result.len());
    }

    assert!(errors[0] > errors[1] && errors[1] > errors[2], "{errors:?}");
    assert!(errors[2] < 2e-3);
    assert!(accepted[0] < accepted[1] && accepted[1] < accepted[2], "{accepted:?}");
}

#[test]
fn test_variable_step_trajectory_tracks_fixed_step() {
    let (mut fixed, _) = decay(0.5);
    let fixed_result = FixedStepSolver::new()
        .solve(&mut fixed, &SolverConfiguration::fixed_step(4.0, 8000))
        .unwrap();

    let (mut adaptive, _) = decay(0.5);
    let adaptive_result = VariableStepSolver::new()
        .solve(&mut adaptive, &SolverConfiguration::variable_step(4.0, 0.001, 1e-7, 1e-12))
        .unwrap();

    assert!(compute_l2_error(&adaptive_result.final_state, &fixed_result.final_state) < 1e-3);
    assert_eq!(adaptive_result.metadata.get("solver").map(String::as_str), Some("Variable Step"));
}
