//! Helper functions for integration tests

use nalgebra::DVector;
use rxd_rs::context::ReactionDiffusionContext;
use rxd_rs::node::NodeLocation;
use rxd_rs::species::SpeciesId;

/// Route `log` output through the test harness (`RUST_LOG=debug cargo test`)
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Assert that two state vectors are close (within tolerance)
pub fn assert_states_close(state1: &DVector<f64>, state2: &DVector<f64>, tolerance: f64, message: &str) {
    assert_eq!(state1.len(), state2.len(), "{}: Dimension mismatch", message);

    for (i, (&v1, &v2)) in state1.iter().zip(state2.iter()).enumerate() {
        let diff = (v1 - v2).abs();
        assert!(
            diff < tolerance,
            "{}: Element {} differs by {} (tolerance {})",
            message, i, diff, tolerance
        );
    }
}

/// Compute RMS error between two state vectors
pub fn compute_l2_error(state1: &DVector<f64>, state2: &DVector<f64>) -> f64 {
    if state1.is_empty() {
        return 0.0;
    }
    ((state1 - state2).norm_squared() / state1.len() as f64).sqrt()
}

/// Compute relative error: |actual - expected| / |expected|
pub fn relative_error(actual: f64, expected: f64) -> f64 {
    if expected.abs() < 1e-10 {
        (actual - expected).abs()
    } else {
        (actual - expected).abs() / expected.abs()
    }
}

/// Concentrations of the non-ghost nodes of a species, in node order
pub fn profile(context: &ReactionDiffusionContext, species: SpeciesId) -> Vec<f64> {
    context
        .nodes(species)
        .unwrap()
        .iter()
        .filter(|node| !matches!(node.location, NodeLocation::Ghost { .. }))
        .map(|node| context.concentration(node.index).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_error() {
        assert!((relative_error(1.0, 1.0) - 0.0).abs() < 1e-10);
        assert!((relative_error(1.1, 1.0) - 0.1).abs() < 1e-10);
        assert!((relative_error(0.9, 1.0) - 0.1).abs() < 1e-10);
    }
}
