//! Error types
//!
//! Every fallible operation in the crate returns [`Result<T>`], an alias over [`RxdError`].
//!
//! # Error Categories
//!
//! ```text
//! ┌──────────────────────┬────────────────────────────────────────────────────────┐
//! │ Construction         │ rejected synchronously when a geometry, region,       │
//! │                      │ species, reaction or configuration is declared        │
//! ├──────────────────────┼────────────────────────────────────────────────────────┤
//! │ Structural conflict  │ detected while laying out nodes or assembling the     │
//! │                      │ matrices (dx mismatch, name collision, ...)           │
//! ├──────────────────────┼────────────────────────────────────────────────────────┤
//! │ Numerical            │ raised by a solve; the caller may retry, e.g. with a  │
//! │                      │ smaller step                                          │
//! └──────────────────────┴────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, RxdError>;

/// Typed failure conditions of the reaction-diffusion engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RxdError {
    // ====== Construction ======
    /// Invalid geometry parameters (e.g. a shell without thickness)
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Invalid region declaration
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// Invalid species, parameter or state declaration
    #[error("invalid species: {0}")]
    InvalidSpecies(String),

    /// Invalid reaction (bad scheme, inconsistent regions, ...)
    #[error("invalid reaction: {0}")]
    InvalidReaction(String),

    /// Rate expression that cannot be compiled
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// Solver or context configuration outside of its valid range
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Handle whose entity was destroyed (or never existed)
    #[error("stale {kind} handle (slot {index}, generation {generation})")]
    StaleHandle {
        kind: &'static str,
        index: u32,
        generation: u32,
    },

    // ====== Structural consistency ======
    /// Conflicting structure discovered during layout or assembly
    #[error("structural conflict: {0}")]
    StructuralConflict(String),

    // ====== Numerical ======
    /// Iterative linear solver did not reach the requested tolerance
    #[error("linear solver diverged after {iterations} iterations (relative residual {residual:e})")]
    SolverDivergence { iterations: usize, residual: f64 },

    /// Zero (or vanishing) pivot
    #[error("singular system: zero pivot at row {row}")]
    SingularMatrix { row: usize },

    /// NaN or infinity found in the state vector
    #[error("non-finite state at node {node} after step {step}")]
    NonFiniteState { node: usize, step: usize },

    // ====== Persistence ======
    /// Snapshot (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RxdError {
    /// Rejected at declaration time
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            RxdError::InvalidGeometry(_)
                | RxdError::InvalidRegion(_)
                | RxdError::InvalidSpecies(_)
                | RxdError::InvalidReaction(_)
                | RxdError::InvalidExpression(_)
                | RxdError::InvalidConfiguration(_)
                | RxdError::StaleHandle { .. }
        )
    }

    /// Detected during layout or matrix assembly
    pub fn is_structural(&self) -> bool {
        matches!(self, RxdError::StructuralConflict(_))
    }

    /// Raised by a solve; recoverable by the caller
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            RxdError::SolverDivergence { .. }
                | RxdError::SingularMatrix { .. }
                | RxdError::NonFiniteState { .. }
        )
    }
}

impl From<serde_json::Error> for RxdError {
    fn from(error: serde_json::Error) -> Self {
        RxdError::Serialization(error.to_string())
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_disjoint() {
        let errors = [
            RxdError::InvalidGeometry("shell".into()),
            RxdError::StructuralConflict("dx".into()),
            RxdError::SolverDivergence { iterations: 10, residual: 1.0 },
        ];

        for error in &errors {
            let flags = [error.is_construction(), error.is_structural(), error.is_numerical()];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1, "{error}");
        }
    }

    #[test]
    fn test_display_mentions_row() {
        let message = RxdError::SingularMatrix { row: 7 }.to_string();
        assert!(message.contains("row 7"));
    }
}
