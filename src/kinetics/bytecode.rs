//! Stack-machine bytecode for compiled rates
//!
//! ```text
//!   k · a / (a + km)        Const(k) Load(0) Mul Load(0) Const(km) Add Div
//! ```
//!
//! Programs are flat op vectors evaluated against the slot values of one locus. The maximum stack
//! depth is computed at compile time so evaluation can reuse a single buffer.

use super::expr::{BinaryOp, Func, LocalExpr};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Const(f64),
    Load(usize),
    Voltage,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Call(Func),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    ops: Vec<Op>,
    depth: usize,
}

impl Program {
    pub fn compile(expr: &LocalExpr) -> Self {
        let mut ops = Vec::new();
        emit(expr, &mut ops);

        let mut depth = 0usize;
        let mut max_depth = 0usize;
        for op in &ops {
            match op {
                Op::Const(_) | Op::Load(_) | Op::Voltage => depth += 1,
                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => depth -= 1,
                Op::Neg | Op::Call(_) => {}
            }
            max_depth = max_depth.max(depth);
        }
        Self { ops, depth: max_depth }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Stack slots needed to evaluate
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_constant(&self) -> bool {
        self.ops.iter().all(|op| !matches!(op, Op::Load(_) | Op::Voltage))
    }

    pub fn eval(&self, slots: &[f64], voltage: f64) -> f64 {
        let mut stack = Vec::with_capacity(self.depth);
        self.eval_with(slots, voltage, &mut stack)
    }

    /// Evaluate reusing `stack` as scratch space
    pub fn eval_with(&self, slots: &[f64], voltage: f64, stack: &mut Vec<f64>) -> f64 {
        stack.clear();
        for op in &self.ops {
            match *op {
                Op::Const(value) => stack.push(value),
                Op::Load(slot) => stack.push(slots[slot]),
                Op::Voltage => stack.push(voltage),
                Op::Neg => {
                    if let Some(top) = stack.last_mut() {
                        *top = -*top;
                    }
                }
                Op::Call(func) => {
                    if let Some(top) = stack.last_mut() {
                        *top = func.apply(*top);
                    }
                }
                binary => {
                    let b = stack.pop().unwrap_or(f64::NAN);
                    let a = stack.pop().unwrap_or(f64::NAN);
                    let op = match binary {
                        Op::Add => BinaryOp::Add,
                        Op::Sub => BinaryOp::Sub,
                        Op::Mul => BinaryOp::Mul,
                        Op::Div => BinaryOp::Div,
                        _ => BinaryOp::Pow,
                    };
                    stack.push(op.apply(a, b));
                }
            }
        }
        stack.pop().unwrap_or(0.0)
    }
}

fn emit(expr: &LocalExpr, ops: &mut Vec<Op>) {
    match expr {
        LocalExpr::Const(value) => ops.push(Op::Const(*value)),
        LocalExpr::Slot(slot) => ops.push(Op::Load(*slot)),
        LocalExpr::Voltage => ops.push(Op::Voltage),
        LocalExpr::Neg(a) => {
            emit(a, ops);
            ops.push(Op::Neg);
        }
        LocalExpr::Call(func, a) => {
            emit(a, ops);
            ops.push(Op::Call(*func));
        }
        LocalExpr::Binary(op, a, b) => {
            emit(a, ops);
            emit(b, ops);
            ops.push(match op {
                BinaryOp::Add => Op::Add,
                BinaryOp::Sub => Op::Sub,
                BinaryOp::Mul => Op::Mul,
                BinaryOp::Div => Op::Div,
                BinaryOp::Pow => Op::Pow,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn michaelis_menten() -> LocalExpr {
        // 0.1 · a / (a + 0.002)
        LocalExpr::Binary(
            BinaryOp::Div,
            Box::new(LocalExpr::Binary(BinaryOp::Mul, Box::new(LocalExpr::Const(0.1)), Box::new(LocalExpr::Slot(0)))),
            Box::new(LocalExpr::Binary(BinaryOp::Add, Box::new(LocalExpr::Slot(0)), Box::new(LocalExpr::Const(0.002)))),
        )
    }

    #[test]
    fn test_compile_emits_postfix() {
        let program = Program::compile(&michaelis_menten());
        assert_eq!(
            program.ops(),
            &[Op::Const(0.1), Op::Load(0), Op::Mul, Op::Load(0), Op::Const(0.002), Op::Add, Op::Div]
        );
        assert_eq!(program.depth(), 3);
        assert!(!program.is_constant());
    }

    #[test]
    fn test_bytecode_agrees_with_tree_walk() {
        let expr = LocalExpr::Binary(
            BinaryOp::Sub,
            Box::new(LocalExpr::Call(Func::Exp, Box::new(LocalExpr::Neg(Box::new(LocalExpr::Slot(1)))))),
            Box::new(LocalExpr::Binary(BinaryOp::Pow, Box::new(michaelis_menten()), Box::new(LocalExpr::Voltage))),
        );
        let program = Program::compile(&expr);
        let mut stack = Vec::new();
        for (slots, v) in [([0.5, 0.1], 2.0), ([1e-3, 4.0], 0.5), ([2.0, 0.0], 1.0)] {
            let expected = expr.eval(&slots, v);
            assert_eq!(program.eval(&slots, v), expected);
            assert_eq!(program.eval_with(&slots, v, &mut stack), expected);
        }
    }

    #[test]
    fn test_constant_program() {
        let program = Program::compile(&LocalExpr::Const(3.5));
        assert!(program.is_constant());
        assert_eq!(program.eval(&[], 0.0), 3.5);
    }
}
