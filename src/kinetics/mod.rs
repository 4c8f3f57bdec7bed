//! Reaction kinetics
//!
//! From user-declared schemes to evaluable per-group programs:
//!
//! ```text
//!  Rate / Reaction / MultiCompartmentReaction       (reaction)
//!        │  rate expression over species refs         (expr::Expr)
//!        ▼
//!  ReactionSystem::compile                          (compiler)
//!        │  group by anchor + region set, dense slots
//!        │  lower Expr → LocalExpr, differentiate
//!        ▼
//!  Program bytecode per kernel + derivatives        (bytecode)
//!        │
//!        ├─► ReactionGroup::evaluate     rhs += ν · rate at every locus
//!        ├─► induced_currents            membrane-flux kinetics → host currents
//!        └─► ReactionJacobian            per-locus (I − dt·J) blocks
//! ```

pub mod bytecode;
pub mod compiler;
pub mod expr;
pub mod jacobian;
pub mod reaction;

pub use bytecode::{Op, Program};
pub use compiler::{CompileInput, GroupKey, Kernel, Locus, ReactionGroup, ReactionSystem, Target};
pub use expr::{BinaryOp, Expr, Func, LocalExpr, SpeciesRef};
pub use jacobian::{JacobianMode, ReactionJacobian};
pub use reaction::{Kinetics, MultiCompartmentReaction, Rate, Reaction, ReactionId};

/// Faraday constant (C/mol)
pub const FARADAY: f64 = 96_485.332_12;
