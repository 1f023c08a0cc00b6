//! Matrix-level expression graph.
//!
//! A [`MatExpr`] node stands for a whole elementwise array operation and
//! carries a cached [`Sparsity`] pattern. Matrix graphs stay tiny compared to
//! their scalar expansion; they are lowered to scalar [`Expr`] subgraphs on
//! demand, with sharing preserved (a matrix node reached through two parents
//! lowers once).
//!
//! Semantics are elementwise throughout, with 1×1 nodes broadcasting over
//! the other operand. Structural zeros lower to constant-zero scalars, so
//! the scalar layer's folding erases them wherever they cancel.

use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::ConstructError;
use crate::float::Float;
use crate::function::{Function, Options};
use crate::linearize::sort_depth_first;
use crate::node::{DagNode, Expr};
use crate::opcode::OpCode;
use crate::sparsity::Sparsity;

/// Handle to one matrix-level node.
#[derive(Clone)]
pub struct MatExpr<F: Float>(Arc<MatNode<F>>);

struct MatNode<F: Float> {
    op: OpCode,
    deps: Vec<MatExpr<F>>,
    sparsity: Sparsity,
    payload: MatPayload<F>,
}

enum MatPayload<F> {
    None,
    /// Dense row-major values.
    Const(Vec<F>),
    Sym(Arc<str>),
}

impl<F: Float> DagNode for MatExpr<F> {
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

/// True if the operation maps zero to zero, so a sparse operand's pattern
/// survives it.
fn zero_preserving(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Neg
            | OpCode::Sqrt
            | OpCode::Sin
            | OpCode::Tan
            | OpCode::Asin
            | OpCode::Atan
            | OpCode::Sinh
            | OpCode::Tanh
            | OpCode::Abs
            | OpCode::Signum
            | OpCode::Floor
            | OpCode::Ceil
    )
}

impl<F: Float> MatExpr<F> {
    /// Dense nrow × ncol symbolic matrix. Elements are independent symbols
    /// named `name_r_c`.
    pub fn sym(name: &str, nrow: usize, ncol: usize) -> Self {
        Self::sym_with_sparsity(name, Sparsity::dense(nrow, ncol))
    }

    /// Symbolic matrix with the given pattern; entries outside the pattern
    /// are structural zeros.
    pub fn sym_with_sparsity(name: &str, sparsity: Sparsity) -> Self {
        MatExpr(Arc::new(MatNode {
            op: OpCode::Sym,
            deps: Vec::new(),
            sparsity,
            payload: MatPayload::Sym(Arc::from(name)),
        }))
    }

    /// Constant matrix from dense row-major values.
    pub fn from_dense(nrow: usize, ncol: usize, values: &[F]) -> Self {
        assert_eq!(values.len(), nrow * ncol);
        let trips: Vec<(usize, usize)> = (0..nrow)
            .flat_map(|r| (0..ncol).map(move |c| (r, c)))
            .filter(|&(r, c)| !values[r * ncol + c].is_zero())
            .collect();
        MatExpr(Arc::new(MatNode {
            op: OpCode::Const,
            deps: Vec::new(),
            sparsity: Sparsity::from_triplets(nrow, ncol, &trips),
            payload: MatPayload::Const(values.to_vec()),
        }))
    }

    /// 1×1 constant, broadcasting over any operand.
    pub fn scalar(value: F) -> Self {
        Self::from_dense(1, 1, &[value])
    }

    pub fn nrow(&self) -> usize {
        self.0.sparsity.nrow()
    }

    pub fn ncol(&self) -> usize {
        self.0.sparsity.ncol()
    }

    pub fn sparsity(&self) -> &Sparsity {
        &self.0.sparsity
    }

    fn is_scalar(&self) -> bool {
        self.nrow() == 1 && self.ncol() == 1
    }

    fn map(&self, op: OpCode) -> Self {
        let sparsity = if zero_preserving(op) {
            self.0.sparsity.clone()
        } else {
            Sparsity::dense(self.nrow(), self.ncol())
        };
        MatExpr(Arc::new(MatNode {
            op,
            deps: vec![self.clone()],
            sparsity,
            payload: MatPayload::None,
        }))
    }

    fn zip(&self, op: OpCode, rhs: &MatExpr<F>) -> Self {
        let (nrow, ncol) = if self.is_scalar() {
            (rhs.nrow(), rhs.ncol())
        } else {
            (self.nrow(), self.ncol())
        };
        assert!(
            (self.nrow() == nrow && self.ncol() == ncol || self.is_scalar())
                && (rhs.nrow() == nrow && rhs.ncol() == ncol || rhs.is_scalar()),
            "elementwise operation on {}x{} and {}x{}",
            self.nrow(),
            self.ncol(),
            rhs.nrow(),
            rhs.ncol()
        );
        let broadcast = |m: &MatExpr<F>| {
            if m.is_scalar() && (nrow, ncol) != (1, 1) {
                if m.0.sparsity.nnz() == 0 {
                    Sparsity::empty(nrow, ncol)
                } else {
                    Sparsity::dense(nrow, ncol)
                }
            } else {
                m.0.sparsity.clone()
            }
        };
        let sa = broadcast(self);
        let sb = broadcast(rhs);
        let sparsity = match op {
            OpCode::Mul => sa.intersect(&sb),
            OpCode::Add | OpCode::Sub => sa.union(&sb),
            // Quotients, powers and the like follow the dense side.
            _ => Sparsity::dense(nrow, ncol),
        };
        MatExpr(Arc::new(MatNode {
            op,
            deps: vec![self.clone(), rhs.clone()],
            sparsity,
            payload: MatPayload::None,
        }))
    }

    pub fn sin(&self) -> Self {
        self.map(OpCode::Sin)
    }
    pub fn cos(&self) -> Self {
        self.map(OpCode::Cos)
    }
    pub fn exp(&self) -> Self {
        self.map(OpCode::Exp)
    }
    pub fn ln(&self) -> Self {
        self.map(OpCode::Ln)
    }
    pub fn sqrt(&self) -> Self {
        self.map(OpCode::Sqrt)
    }
    pub fn tanh(&self) -> Self {
        self.map(OpCode::Tanh)
    }
    pub fn abs(&self) -> Self {
        self.map(OpCode::Abs)
    }

    /// Lower to dense row-major scalar expressions, sharing preserved.
    ///
    /// Symbols are minted per lowering pass. To bind several matrices to one
    /// consistent set of scalar symbols, lower them together
    /// ([`lower_all`] / [`Function::from_matrix`]), not one by one.
    pub fn lower(&self) -> Vec<Expr<F>> {
        let mut map = lower_all(&[self.clone()]);
        map.remove(&self.key()).unwrap_or_default()
    }

    fn lower_one(&self, lowered: &FxHashMap<usize, Vec<Expr<F>>>) -> Vec<Expr<F>> {
        let nrow = self.nrow();
        let ncol = self.ncol();
        match (&self.0.payload, self.0.op) {
            (MatPayload::Sym(name), _) => {
                let mut out = vec![Expr::constant(F::zero()); nrow * ncol];
                for (r, c) in self.0.sparsity.triplets() {
                    out[r * ncol + c] = Expr::sym(format!("{name}_{r}_{c}"));
                }
                out
            }
            (MatPayload::Const(values), _) => values.iter().map(|&v| Expr::constant(v)).collect(),
            (MatPayload::None, op) if op.ndeps() == 1 => {
                lowered[&self.dep(0).key()].iter().map(|e| unary_expr(op, e)).collect()
            }
            (MatPayload::None, op) => {
                let a = &lowered[&self.dep(0).key()];
                let b = &lowered[&self.dep(1).key()];
                let pick = |elems: &[Expr<F>], idx: usize| {
                    if elems.len() == 1 {
                        elems[0].clone()
                    } else {
                        elems[idx].clone()
                    }
                };
                (0..nrow * ncol)
                    .map(|i| binary_expr(op, pick(a, i), pick(b, i)))
                    .collect()
            }
        }
    }

    /// Lowered scalar expressions at this node's pattern nonzeros, in
    /// storage order, drawn from a shared lowering map.
    fn nonzeros_from(&self, lowered: &FxHashMap<usize, Vec<Expr<F>>>) -> Vec<Expr<F>> {
        let dense = &lowered[&self.key()];
        let ncol = self.ncol();
        self.0
            .sparsity
            .triplets()
            .into_iter()
            .map(|(r, c)| dense[r * ncol + c].clone())
            .collect()
    }
}

/// Lower a whole family of matrix roots in one pass, so matrices sharing
/// subgraphs (or the same symbolic leaves) lower to shared scalar nodes.
pub fn lower_all<F: Float>(roots: &[MatExpr<F>]) -> FxHashMap<usize, Vec<Expr<F>>> {
    let topo = sort_depth_first(roots);
    let mut lowered: FxHashMap<usize, Vec<Expr<F>>> = FxHashMap::default();
    for node in &topo {
        let elems = node.lower_one(&lowered);
        lowered.insert(node.key(), elems);
    }
    lowered
}

fn unary_expr<F: Float>(op: OpCode, a: &Expr<F>) -> Expr<F> {
    match op {
        OpCode::Neg => -a,
        OpCode::Recip => a.recip(),
        OpCode::Sqrt => a.sqrt(),
        OpCode::Exp => a.exp(),
        OpCode::Ln => a.ln(),
        OpCode::Log10 => a.log10(),
        OpCode::Sin => a.sin(),
        OpCode::Cos => a.cos(),
        OpCode::Tan => a.tan(),
        OpCode::Asin => a.asin(),
        OpCode::Acos => a.acos(),
        OpCode::Atan => a.atan(),
        OpCode::Sinh => a.sinh(),
        OpCode::Cosh => a.cosh(),
        OpCode::Tanh => a.tanh(),
        OpCode::Abs => a.abs(),
        OpCode::Signum => a.signum(),
        OpCode::Floor => a.floor(),
        OpCode::Ceil => a.ceil(),
        _ => unreachable!("not a unary opcode"),
    }
}

fn binary_expr<F: Float>(op: OpCode, a: Expr<F>, b: Expr<F>) -> Expr<F> {
    match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Pow => a.powf(b),
        OpCode::Atan2 => a.atan2(b),
        OpCode::Min => a.min(b),
        OpCode::Max => a.max(b),
        _ => unreachable!("not a binary opcode"),
    }
}

macro_rules! impl_mat_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<F: Float> $trait for &MatExpr<F> {
            type Output = MatExpr<F>;
            fn $method(self, rhs: &MatExpr<F>) -> MatExpr<F> {
                self.zip($op, rhs)
            }
        }
        impl<F: Float> $trait for MatExpr<F> {
            type Output = MatExpr<F>;
            fn $method(self, rhs: MatExpr<F>) -> MatExpr<F> {
                self.zip($op, &rhs)
            }
        }
    };
}

impl_mat_binop!(Add, add, OpCode::Add);
impl_mat_binop!(Sub, sub, OpCode::Sub);
impl_mat_binop!(Mul, mul, OpCode::Mul);
impl_mat_binop!(Div, div, OpCode::Div);

impl<F: Float> Neg for &MatExpr<F> {
    type Output = MatExpr<F>;
    fn neg(self) -> MatExpr<F> {
        self.map(OpCode::Neg)
    }
}

impl<F: Float> Function<F> {
    /// Compile a matrix-level graph by lowering it to scalars.
    ///
    /// Input matrices must be symbolic; each becomes one input vector over
    /// its pattern nonzeros, and each output matrix becomes one output vector
    /// over its pattern nonzeros (structural zeros carry no instructions).
    pub fn from_matrix(
        inputs: &[MatExpr<F>],
        outputs: &[MatExpr<F>],
        opts: Options,
    ) -> Result<Self, ConstructError> {
        let mut roots: Vec<MatExpr<F>> = inputs.to_vec();
        roots.extend_from_slice(outputs);
        let lowered = lower_all(&roots);
        let in_vecs: Vec<Vec<Expr<F>>> =
            inputs.iter().map(|m| m.nonzeros_from(&lowered)).collect();
        let out_vecs: Vec<Vec<Expr<F>>> =
            outputs.iter().map(|m| m.nonzeros_from(&lowered)).collect();
        Function::with_options(&in_vecs, &out_vecs, opts)
    }
}
