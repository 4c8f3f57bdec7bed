//! Rate expression IR
//!
//! [`Expr`] is what users build: arithmetic over species concentrations, the local membrane
//! potential and constants. Operators are overloaded so rates read like the chemistry:
//!
//! ```rust
//! use rxd_rs::kinetics::Expr;
//! # use rxd_rs::arena::Arena;
//! # use rxd_rs::species::Species;
//! # let mut arena = Arena::new("species");
//! # let ca = arena.insert(Species::new(vec![]));
//! let km = 0.002;
//! let pump = Expr::species(ca) * 0.1 / (Expr::species(ca) + km);
//! ```
//!
//! Once every species reference is resolved to a slot of a reaction group the expression becomes
//! a [`LocalExpr`], which can be differentiated symbolically and compiled to bytecode.

use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::error::{Result, RxdError};
use crate::region::RegionId;
use crate::species::SpeciesId;

/// A species, optionally pinned to one of its regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeciesRef {
    pub species: SpeciesId,
    pub region: Option<RegionId>,
}

impl SpeciesRef {
    /// `species[region]`
    pub fn on(species: SpeciesId, region: RegionId) -> Self {
        Self { species, region: Some(region) }
    }
}

impl From<SpeciesId> for SpeciesRef {
    fn from(species: SpeciesId) -> Self {
        Self { species, region: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }
}

/// Unary functions available in rate expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Exp,
    Log,
    Sqrt,
    Abs,
    Sin,
    Cos,
    Tanh,
}

impl Func {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Sqrt => x.sqrt(),
            Func::Abs => x.abs(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tanh => x.tanh(),
        }
    }
}

// =================================================================================================
// User-facing expressions
// =================================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Species(SpeciesRef),
    /// Membrane potential of the segment the reaction is evaluated at (mV)
    Voltage,
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    pub fn species(species: impl Into<SpeciesRef>) -> Self {
        Expr::Species(species.into())
    }

    pub fn voltage() -> Self {
        Expr::Voltage
    }

    pub fn pow(self, exponent: impl Into<Expr>) -> Self {
        Expr::Binary(BinaryOp::Pow, Box::new(self), Box::new(exponent.into()))
    }

    pub fn exp(self) -> Self {
        Expr::Call(Func::Exp, Box::new(self))
    }

    pub fn log(self) -> Self {
        Expr::Call(Func::Log, Box::new(self))
    }

    pub fn sqrt(self) -> Self {
        Expr::Call(Func::Sqrt, Box::new(self))
    }

    pub fn abs(self) -> Self {
        Expr::Call(Func::Abs, Box::new(self))
    }

    pub fn sin(self) -> Self {
        Expr::Call(Func::Sin, Box::new(self))
    }

    pub fn cos(self) -> Self {
        Expr::Call(Func::Cos, Box::new(self))
    }

    pub fn tanh(self) -> Self {
        Expr::Call(Func::Tanh, Box::new(self))
    }

    /// Every species reference, in first-appearance order, without duplicates
    pub fn species_refs(&self) -> Vec<SpeciesRef> {
        let mut refs = Vec::new();
        self.visit(&mut |expr| {
            if let Expr::Species(species) = expr
                && !refs.contains(species)
            {
                refs.push(*species);
            }
        });
        refs
    }

    pub fn uses_voltage(&self) -> bool {
        let mut found = false;
        self.visit(&mut |expr| found |= matches!(expr, Expr::Voltage));
        found
    }

    /// Reject non-finite constants
    pub fn validate(&self) -> Result<()> {
        let mut bad = None;
        self.visit(&mut |expr| {
            if let Expr::Const(value) = expr
                && !value.is_finite()
            {
                bad = Some(*value);
            }
        });
        match bad {
            Some(value) => Err(RxdError::InvalidExpression(format!("non-finite constant {value}"))),
            None => Ok(()),
        }
    }

    fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Neg(a) | Expr::Call(_, a) => a.visit(f),
            Expr::Binary(_, a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Expr::Const(_) | Expr::Species(_) | Expr::Voltage => {}
        }
    }

    /// Replace species references by slots; `resolve` decides the slot of each reference
    pub fn lower(&self, resolve: &mut impl FnMut(SpeciesRef) -> Result<usize>) -> Result<LocalExpr> {
        Ok(match self {
            Expr::Const(value) => LocalExpr::Const(*value),
            Expr::Species(species) => LocalExpr::Slot(resolve(*species)?),
            Expr::Voltage => LocalExpr::Voltage,
            Expr::Neg(a) => LocalExpr::Neg(Box::new(a.lower(resolve)?)),
            Expr::Binary(op, a, b) => LocalExpr::Binary(*op, Box::new(a.lower(resolve)?), Box::new(b.lower(resolve)?)),
            Expr::Call(func, a) => LocalExpr::Call(*func, Box::new(a.lower(resolve)?)),
        })
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl From<SpeciesId> for Expr {
    fn from(species: SpeciesId) -> Self {
        Expr::species(species)
    }
}

impl From<SpeciesRef> for Expr {
    fn from(species: SpeciesRef) -> Self {
        Expr::Species(species)
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                Expr::Binary($op, Box::new(self), Box::new(rhs.into()))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::Binary($op, Box::new(Expr::Const(self)), Box::new(rhs))
            }
        }
    };
}

binary_operator!(Add, add, BinaryOp::Add);
binary_operator!(Sub, sub, BinaryOp::Sub);
binary_operator!(Mul, mul, BinaryOp::Mul);
binary_operator!(Div, div, BinaryOp::Div);

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

// =================================================================================================
// Resolved expressions
// =================================================================================================

/// Expression over the dense slots of one reaction group
#[derive(Debug, Clone, PartialEq)]
pub enum LocalExpr {
    Const(f64),
    Slot(usize),
    Voltage,
    Neg(Box<LocalExpr>),
    Binary(BinaryOp, Box<LocalExpr>, Box<LocalExpr>),
    Call(Func, Box<LocalExpr>),
}

impl LocalExpr {
    fn is_const(&self, value: f64) -> bool {
        matches!(self, LocalExpr::Const(c) if *c == value)
    }

    fn add(a: LocalExpr, b: LocalExpr) -> LocalExpr {
        match (a, b) {
            (LocalExpr::Const(x), LocalExpr::Const(y)) => LocalExpr::Const(x + y),
            (a, b) if a.is_const(0.0) => b,
            (a, b) if b.is_const(0.0) => a,
            (a, b) => LocalExpr::Binary(BinaryOp::Add, Box::new(a), Box::new(b)),
        }
    }

    fn sub(a: LocalExpr, b: LocalExpr) -> LocalExpr {
        match (a, b) {
            (LocalExpr::Const(x), LocalExpr::Const(y)) => LocalExpr::Const(x - y),
            (a, b) if b.is_const(0.0) => a,
            (a, b) if a.is_const(0.0) => LocalExpr::Neg(Box::new(b)),
            (a, b) => LocalExpr::Binary(BinaryOp::Sub, Box::new(a), Box::new(b)),
        }
    }

    fn mul(a: LocalExpr, b: LocalExpr) -> LocalExpr {
        match (a, b) {
            (LocalExpr::Const(x), LocalExpr::Const(y)) => LocalExpr::Const(x * y),
            (a, _) | (_, a) if a.is_const(0.0) => LocalExpr::Const(0.0),
            (a, b) if a.is_const(1.0) => b,
            (a, b) if b.is_const(1.0) => a,
            (a, b) => LocalExpr::Binary(BinaryOp::Mul, Box::new(a), Box::new(b)),
        }
    }

    fn div(a: LocalExpr, b: LocalExpr) -> LocalExpr {
        match (a, b) {
            (a, _) if a.is_const(0.0) => LocalExpr::Const(0.0),
            (a, b) if b.is_const(1.0) => a,
            (a, b) => LocalExpr::Binary(BinaryOp::Div, Box::new(a), Box::new(b)),
        }
    }

    fn call(func: Func, a: LocalExpr) -> LocalExpr {
        LocalExpr::Call(func, Box::new(a))
    }

    /// Largest slot index referenced, if any
    pub fn max_slot(&self) -> Option<usize> {
        match self {
            LocalExpr::Slot(slot) => Some(*slot),
            LocalExpr::Const(_) | LocalExpr::Voltage => None,
            LocalExpr::Neg(a) | LocalExpr::Call(_, a) => a.max_slot(),
            LocalExpr::Binary(_, a, b) => a.max_slot().max(b.max_slot()),
        }
    }

    pub fn depends_on(&self, slot: usize) -> bool {
        match self {
            LocalExpr::Slot(s) => *s == slot,
            LocalExpr::Const(_) | LocalExpr::Voltage => false,
            LocalExpr::Neg(a) | LocalExpr::Call(_, a) => a.depends_on(slot),
            LocalExpr::Binary(_, a, b) => a.depends_on(slot) || b.depends_on(slot),
        }
    }

    /// Partial derivative with respect to `slot`
    pub fn derivative(&self, slot: usize) -> LocalExpr {
        if !self.depends_on(slot) {
            return LocalExpr::Const(0.0);
        }
        match self {
            LocalExpr::Slot(_) => LocalExpr::Const(1.0),
            LocalExpr::Const(_) | LocalExpr::Voltage => LocalExpr::Const(0.0),
            LocalExpr::Neg(a) => match a.derivative(slot) {
                LocalExpr::Const(c) => LocalExpr::Const(-c),
                da => LocalExpr::Neg(Box::new(da)),
            },
            LocalExpr::Binary(op, a, b) => {
                let (a, b) = (a.as_ref().clone(), b.as_ref().clone());
                let (da, db) = (a.derivative(slot), b.derivative(slot));
                match op {
                    BinaryOp::Add => Self::add(da, db),
                    BinaryOp::Sub => Self::sub(da, db),
                    BinaryOp::Mul => Self::add(Self::mul(da, b.clone()), Self::mul(a, db)),
                    BinaryOp::Div => Self::div(
                        Self::sub(Self::mul(da, b.clone()), Self::mul(a, db)),
                        Self::mul(b.clone(), b),
                    ),
                    BinaryOp::Pow => match b {
                        LocalExpr::Const(n) => Self::mul(
                            Self::mul(
                                LocalExpr::Const(n),
                                LocalExpr::Binary(BinaryOp::Pow, Box::new(a), Box::new(LocalExpr::Const(n - 1.0))),
                            ),
                            da,
                        ),
                        b => {
                            // d(a^b) = a^b · (b' ln a + b a'/a)
                            let power = LocalExpr::Binary(BinaryOp::Pow, Box::new(a.clone()), Box::new(b.clone()));
                            let inner = Self::add(
                                Self::mul(db, Self::call(Func::Log, a.clone())),
                                Self::div(Self::mul(b, da), a),
                            );
                            Self::mul(power, inner)
                        }
                    },
                }
            }
            LocalExpr::Call(func, a) => {
                let a = a.as_ref().clone();
                let da = a.derivative(slot);
                let outer = match func {
                    Func::Exp => Self::call(Func::Exp, a),
                    Func::Log => Self::div(LocalExpr::Const(1.0), a),
                    Func::Sqrt => Self::div(LocalExpr::Const(0.5), Self::call(Func::Sqrt, a)),
                    Func::Abs => Self::div(a.clone(), Self::call(Func::Abs, a)),
                    Func::Sin => Self::call(Func::Cos, a),
                    Func::Cos => LocalExpr::Neg(Box::new(Self::call(Func::Sin, a))),
                    Func::Tanh => {
                        let t = Self::call(Func::Tanh, a);
                        Self::sub(LocalExpr::Const(1.0), Self::mul(t.clone(), t))
                    }
                };
                Self::mul(outer, da)
            }
        }
    }

    /// Direct tree-walking evaluation
    pub fn eval(&self, slots: &[f64], voltage: f64) -> f64 {
        match self {
            LocalExpr::Const(value) => *value,
            LocalExpr::Slot(slot) => slots[*slot],
            LocalExpr::Voltage => voltage,
            LocalExpr::Neg(a) => -a.eval(slots, voltage),
            LocalExpr::Binary(op, a, b) => op.apply(a.eval(slots, voltage), b.eval(slots, voltage)),
            LocalExpr::Call(func, a) => func.apply(a.eval(slots, voltage)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::species::Species;

    fn ids() -> (SpeciesId, SpeciesId) {
        let mut arena = Arena::new("species");
        (arena.insert(Species::new(vec![])), arena.insert(Species::new(vec![])))
    }

    #[test]
    fn test_operators_build_tree() {
        let (a, b) = ids();
        let expr = 2.0 * Expr::species(a) + Expr::species(b) / 4.0;
        assert_eq!(expr.species_refs(), vec![SpeciesRef::from(a), SpeciesRef::from(b)]);
        assert!(!expr.uses_voltage());
    }

    #[test]
    fn test_validate_rejects_nan() {
        let (a, _) = ids();
        assert!((Expr::species(a) * f64::NAN).validate().is_err());
        assert!((Expr::species(a) * 2.0).validate().is_ok());
    }

    #[test]
    fn test_lower_and_eval() {
        let (a, b) = ids();
        let expr = (Expr::species(a) * Expr::species(b)).pow(2.0) - Expr::voltage();
        let local = expr
            .lower(&mut |r| Ok(if r.species == a { 0 } else { 1 }))
            .unwrap();
        assert_eq!(local.max_slot(), Some(1));
        assert!((local.eval(&[2.0, 3.0], 10.0) - 26.0).abs() < 1e-12);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let (a, b) = ids();
        let exprs = vec![
            Expr::species(a) * Expr::species(b) / (Expr::species(a) + 0.5),
            Expr::species(a).pow(3.0) - Expr::species(b).sqrt(),
            Expr::species(a).exp() * Expr::species(b).log(),
            Expr::species(a).pow(Expr::species(b)),
            (Expr::species(a) * 0.3).tanh() + Expr::species(b).sin() - Expr::species(a).cos(),
            -(Expr::species(a) - 2.0).abs(),
        ];
        let point = [0.7, 1.3];
        for expr in exprs {
            let local = expr.lower(&mut |r| Ok(if r.species == a { 0 } else { 1 })).unwrap();
            for slot in 0..2 {
                let h = 1e-6;
                let mut up = point;
                let mut down = point;
                up[slot] += h;
                down[slot] -= h;
                let numeric = (local.eval(&up, 0.0) - local.eval(&down, 0.0)) / (2.0 * h);
                let analytic = local.derivative(slot).eval(&point, 0.0);
                assert!((numeric - analytic).abs() < 1e-6, "{expr:?} slot {slot}: {numeric} vs {analytic}");
            }
        }
    }

    #[test]
    fn test_derivative_of_independent_slot_is_zero() {
        let local = LocalExpr::Binary(BinaryOp::Mul, Box::new(LocalExpr::Slot(0)), Box::new(LocalExpr::Voltage));
        assert_eq!(local.derivative(1), LocalExpr::Const(0.0));
    }
}
