//! Expression-graph compilation and sparse algorithmic differentiation.
//!
//! gradir builds immutable expression DAGs ([`Expr`] for scalars,
//! [`MatExpr`] for elementwise matrix graphs), compiles them into a flat
//! work-slot [`Algorithm`], and interprets that algorithm for values, batched
//! forward/adjoint directional derivatives, bit-vector sparsity detection and
//! graph-coloring-compressed sparse Jacobians.
//!
//! ```
//! use gradir::{Expr, Function};
//!
//! let x = Expr::<f64>::sym("x");
//! let y = Expr::<f64>::sym("y");
//! let f = &x * &y + x.sin();
//!
//! let func = Function::new(&[vec![x, y]], &[vec![f]]).unwrap();
//! let out = func.eval(&[&[2.0, 3.0]]).unwrap();
//! assert!((out[0][0] - (6.0 + 2.0_f64.sin())).abs() < 1e-12);
//!
//! // One adjoint sweep gives the full gradient.
//! let (_, _, asens) = func
//!     .eval_derivs(&[&[2.0, 3.0]], &[], &[vec![vec![1.0]]])
//!     .unwrap();
//! assert!((asens[0][0][0] - (3.0 + 2.0_f64.cos())).abs() < 1e-12);
//! ```
//!
//! Sparse Jacobians go through [`Function::jacobian`]: the pattern is
//! detected by word-batched dependency propagation, compressed by
//! unidirectional (or, for symmetric blocks, star) coloring, and each
//! evaluation runs one derivative sweep per color.

mod algorithm;
mod error;
mod float;
mod function;
mod jacobian;
mod linearize;
mod matrix;
mod node;
mod opcode;
#[cfg(feature = "parallel")]
mod parallel;
mod sparsity;
mod sprop;
mod sweep;

pub use algorithm::{Algorithm, Instr};
pub use error::{ConstructError, EvalError};
pub use float::Float;
pub use function::{Function, Options};
pub use jacobian::{AdMode, Jacobian};
pub use linearize::Ordering;
pub use matrix::{lower_all, MatExpr};
pub use node::Expr;
pub use opcode::OpCode;
pub use sparsity::Sparsity;
pub use sweep::Workspace;
