//! Common utilities for integration tests

#![allow(dead_code)]

pub mod fixtures;
pub mod test_helpers;

// Re-export commonly used items
pub use fixtures::{branched_cell, rod, soma_with_dendrites};
pub use test_helpers::{
    assert_states_close,
    compute_l2_error,
    init_logging,
    profile,
    relative_error,
};
