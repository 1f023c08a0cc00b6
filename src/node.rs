//! Immutable scalar expression graph.
//!
//! An [`Expr`] is a cheap handle to a reference-counted node. Building an
//! expression from shared subexpressions produces a DAG, never a tree copy:
//! cloning a handle bumps a refcount. Nodes are never mutated after
//! construction, so handles can be shared freely across threads.
//!
//! Arithmetic on `Expr` goes through guarded simplification: constant
//! subtrees fold immediately and trivial identities (`x + 0`, `x * 1`,
//! `x - x`, ...) collapse before a node is allocated. The guards only fire on
//! exact constants and pointer-identical operands. The operand-erasing
//! rewrites (`x * 0 -> 0`, `x - x -> 0`, `x / x -> 1`) assume finite
//! operands: the erased subexpression's runtime value never reaches the
//! result, so a NaN or Inf in it is dropped rather than propagated.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use crate::float::Float;
use crate::opcode::{self, OpCode};

/// Handle to one node of a scalar expression DAG.
///
/// Two handles compare identical (for the purposes of linearization and
/// traversal) iff they point at the same node; structural equality is not
/// defined on `Expr` itself.
#[derive(Clone)]
pub struct Expr<F: Float>(Arc<Node<F>>);

struct Node<F: Float> {
    op: OpCode,
    deps: Vec<Expr<F>>,
    payload: Payload<F>,
}

enum Payload<F> {
    None,
    Const(F),
    Sym(Arc<str>),
}

/// Traversal interface shared by the scalar and matrix node layers.
///
/// The topological sorts in `linearize` are generic over this trait; a node
/// exposes its identity key and its direct dependencies and nothing else.
pub(crate) trait DagNode: Clone {
    /// Stable identity of the node (pointer-derived, unique while alive).
    fn key(&self) -> usize;
    fn ndep(&self) -> usize;
    fn dep(&self, i: usize) -> Self;
}

impl<F: Float> DagNode for Expr<F> {
    #[inline]
    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
    #[inline]
    fn ndep(&self) -> usize {
        self.0.deps.len()
    }
    #[inline]
    fn dep(&self, i: usize) -> Self {
        self.0.deps[i].clone()
    }
}

impl<F: Float> Expr<F> {
    /// New free symbol.
    pub fn sym(name: impl Into<String>) -> Self {
        Expr(Arc::new(Node {
            op: OpCode::Sym,
            deps: Vec::new(),
            payload: Payload::Sym(Arc::from(name.into())),
        }))
    }

    /// Vector of `n` fresh symbols named `name_0 .. name_{n-1}`.
    pub fn sym_vec(name: &str, n: usize) -> Vec<Self> {
        (0..n).map(|i| Expr::sym(format!("{name}_{i}"))).collect()
    }

    /// New constant node.
    pub fn constant(value: F) -> Self {
        Expr(Arc::new(Node {
            op: OpCode::Const,
            deps: Vec::new(),
            payload: Payload::Const(value),
        }))
    }

    #[inline]
    pub(crate) fn op(&self) -> OpCode {
        self.0.op
    }

    /// Constant value if this node is a constant.
    pub fn as_const(&self) -> Option<F> {
        match self.0.payload {
            Payload::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Symbol name if this node is a free symbol.
    pub fn sym_name(&self) -> Option<&str> {
        match &self.0.payload {
            Payload::Sym(name) => Some(name),
            _ => None,
        }
    }

    /// True if the two handles point at the same node.
    #[inline]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn raw(op: OpCode, deps: Vec<Expr<F>>) -> Self {
        Expr(Arc::new(Node {
            op,
            deps,
            payload: Payload::None,
        }))
    }

    /// Unary node with constant folding.
    fn unary(op: OpCode, a: Expr<F>) -> Self {
        if let Some(v) = a.as_const() {
            return Expr::constant(opcode::eval(op, v, F::zero()));
        }
        // neg(neg(x)) = x
        if op == OpCode::Neg && a.op() == OpCode::Neg {
            return a.dep(0);
        }
        Expr::raw(op, vec![a])
    }

    /// Binary node with constant folding and guarded identity collapse.
    fn binary(op: OpCode, a: Expr<F>, b: Expr<F>) -> Self {
        if let (Some(va), Some(vb)) = (a.as_const(), b.as_const()) {
            return Expr::constant(opcode::eval(op, va, vb));
        }
        let a_const = a.as_const();
        let b_const = b.as_const();
        let is = |c: Option<F>, v: F| c.map_or(false, |x| x == v);
        match op {
            OpCode::Add => {
                if is(a_const, F::zero()) {
                    return b;
                }
                if is(b_const, F::zero()) {
                    return a;
                }
            }
            OpCode::Sub => {
                if is(b_const, F::zero()) {
                    return a;
                }
                if a.same(&b) {
                    return Expr::constant(F::zero());
                }
                if is(a_const, F::zero()) {
                    return -b;
                }
            }
            OpCode::Mul => {
                if is(a_const, F::one()) {
                    return b;
                }
                if is(b_const, F::one()) {
                    return a;
                }
                if is(a_const, F::zero()) || is(b_const, F::zero()) {
                    return Expr::constant(F::zero());
                }
            }
            OpCode::Div => {
                if is(b_const, F::one()) {
                    return a;
                }
                if a.same(&b) {
                    return Expr::constant(F::one());
                }
            }
            OpCode::Pow => {
                if is(b_const, F::one()) {
                    return a;
                }
                if is(b_const, F::zero()) {
                    return Expr::constant(F::one());
                }
                if is(b_const, -F::one()) {
                    return a.recip();
                }
            }
            OpCode::Min | OpCode::Max => {
                if a.same(&b) {
                    return a;
                }
            }
            _ => {}
        }
        Expr::raw(op, vec![a, b])
    }

    pub fn powf(&self, exp: Expr<F>) -> Self {
        Expr::binary(OpCode::Pow, self.clone(), exp)
    }
    pub fn pow_const(&self, exp: F) -> Self {
        Expr::binary(OpCode::Pow, self.clone(), Expr::constant(exp))
    }
    pub fn atan2(&self, x: Expr<F>) -> Self {
        Expr::binary(OpCode::Atan2, self.clone(), x)
    }
    pub fn min(&self, other: Expr<F>) -> Self {
        Expr::binary(OpCode::Min, self.clone(), other)
    }
    pub fn max(&self, other: Expr<F>) -> Self {
        Expr::binary(OpCode::Max, self.clone(), other)
    }

    pub fn recip(&self) -> Self {
        Expr::unary(OpCode::Recip, self.clone())
    }
    pub fn sqrt(&self) -> Self {
        Expr::unary(OpCode::Sqrt, self.clone())
    }
    pub fn exp(&self) -> Self {
        Expr::unary(OpCode::Exp, self.clone())
    }
    pub fn ln(&self) -> Self {
        Expr::unary(OpCode::Ln, self.clone())
    }
    pub fn log10(&self) -> Self {
        Expr::unary(OpCode::Log10, self.clone())
    }
    pub fn sin(&self) -> Self {
        Expr::unary(OpCode::Sin, self.clone())
    }
    pub fn cos(&self) -> Self {
        Expr::unary(OpCode::Cos, self.clone())
    }
    pub fn tan(&self) -> Self {
        Expr::unary(OpCode::Tan, self.clone())
    }
    pub fn asin(&self) -> Self {
        Expr::unary(OpCode::Asin, self.clone())
    }
    pub fn acos(&self) -> Self {
        Expr::unary(OpCode::Acos, self.clone())
    }
    pub fn atan(&self) -> Self {
        Expr::unary(OpCode::Atan, self.clone())
    }
    pub fn sinh(&self) -> Self {
        Expr::unary(OpCode::Sinh, self.clone())
    }
    pub fn cosh(&self) -> Self {
        Expr::unary(OpCode::Cosh, self.clone())
    }
    pub fn tanh(&self) -> Self {
        Expr::unary(OpCode::Tanh, self.clone())
    }
    pub fn abs(&self) -> Self {
        Expr::unary(OpCode::Abs, self.clone())
    }
    pub fn signum(&self) -> Self {
        Expr::unary(OpCode::Signum, self.clone())
    }
    pub fn floor(&self) -> Self {
        Expr::unary(OpCode::Floor, self.clone())
    }
    pub fn ceil(&self) -> Self {
        Expr::unary(OpCode::Ceil, self.clone())
    }
}

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<F: Float> $trait for Expr<F> {
            type Output = Expr<F>;
            fn $method(self, rhs: Expr<F>) -> Expr<F> {
                Expr::binary($op, self, rhs)
            }
        }
        impl<F: Float> $trait<&Expr<F>> for Expr<F> {
            type Output = Expr<F>;
            fn $method(self, rhs: &Expr<F>) -> Expr<F> {
                Expr::binary($op, self, rhs.clone())
            }
        }
        impl<F: Float> $trait<Expr<F>> for &Expr<F> {
            type Output = Expr<F>;
            fn $method(self, rhs: Expr<F>) -> Expr<F> {
                Expr::binary($op, self.clone(), rhs)
            }
        }
        impl<F: Float> $trait for &Expr<F> {
            type Output = Expr<F>;
            fn $method(self, rhs: &Expr<F>) -> Expr<F> {
                Expr::binary($op, self.clone(), rhs.clone())
            }
        }
        impl<F: Float> $trait<F> for Expr<F> {
            type Output = Expr<F>;
            fn $method(self, rhs: F) -> Expr<F> {
                Expr::binary($op, self, Expr::constant(rhs))
            }
        }
        impl<F: Float> $trait<F> for &Expr<F> {
            type Output = Expr<F>;
            fn $method(self, rhs: F) -> Expr<F> {
                Expr::binary($op, self.clone(), Expr::constant(rhs))
            }
        }
    };
}

impl_binop!(Add, add, OpCode::Add);
impl_binop!(Sub, sub, OpCode::Sub);
impl_binop!(Mul, mul, OpCode::Mul);
impl_binop!(Div, div, OpCode::Div);

impl<F: Float> Neg for Expr<F> {
    type Output = Expr<F>;
    fn neg(self) -> Expr<F> {
        Expr::unary(OpCode::Neg, self)
    }
}

impl<F: Float> Neg for &Expr<F> {
    type Output = Expr<F>;
    fn neg(self) -> Expr<F> {
        Expr::unary(OpCode::Neg, self.clone())
    }
}

impl<F: Float> fmt::Debug for Expr<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.payload {
            Payload::Const(v) => write!(f, "{v:?}"),
            Payload::Sym(name) => write!(f, "{name}"),
            Payload::None => {
                let op = self.op();
                if op.ndeps() == 1 {
                    write!(f, "{}({:?})", op.name(), self.0.deps[0])
                } else if op.is_infix() {
                    write!(f, "({:?} {} {:?})", self.0.deps[0], op.name(), self.0.deps[1])
                } else {
                    write!(f, "{}({:?}, {:?})", op.name(), self.0.deps[0], self.0.deps[1])
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_folding_collapses_closed_subtrees() {
        let e = Expr::constant(2.0) * Expr::constant(3.0) + Expr::constant(1.0);
        assert_eq!(e.as_const(), Some(7.0));
    }

    #[test]
    fn guarded_identities_skip_node_allocation() {
        let x = Expr::<f64>::sym("x");
        assert!((&x + 0.0).same(&x));
        assert!((&x * 1.0).same(&x));
        assert!((&x - &x).as_const() == Some(0.0));
        assert!((&x / &x).as_const() == Some(1.0));
        assert!(x.pow_const(1.0).same(&x));
        assert_eq!(x.pow_const(-1.0).op(), OpCode::Recip);
        assert_eq!((&x * 0.0).as_const(), Some(0.0));
    }

    #[test]
    fn shared_subexpressions_stay_shared() {
        let x = Expr::<f64>::sym("x");
        let s = x.sin();
        let e = &s * &s;
        assert!(e.dep(0).same(&e.dep(1)));
    }

    #[test]
    fn double_negation_cancels() {
        let x = Expr::<f64>::sym("x");
        assert!((-(-&x)).same(&x));
    }
}
