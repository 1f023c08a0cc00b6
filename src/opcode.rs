//! Operation codes shared by graph nodes and linearized instructions.
//!
//! The table here is the single source of truth for value evaluation
//! ([`eval`]) and the local partial derivatives recorded on the tape
//! ([`partials`]). Keeping both in one module guarantees the value pass and
//! the derivative sweeps agree on the semantics of every opcode.

use crate::float::Float;

/// Sentinel for an unused operand slot (unary operations leave `arg[1]` at
/// this value).
pub const UNUSED: u32 = u32::MAX;

/// Elementary operation codes.
///
/// The four structural codes never reach the numeric table: `Sym` exists only
/// on graph nodes (linearization rewrites declared symbols into `Input`
/// markers and rejects the rest as free variables), while `Input`, `Output`
/// and `Const` are handled directly by the sweep loops.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpCode {
    // ── Structural ──
    /// Copy one element of a caller input buffer into a work slot.
    Input,
    /// Copy a work slot into one element of a caller output buffer.
    Output,
    /// Load a constant from the constant pool.
    Const,
    /// Free symbolic leaf (graph only, never present in a valid algorithm).
    Sym,

    // ── Binary ──
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Atan2,
    Min,
    Max,

    // ── Unary ──
    Neg,
    Recip,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Abs,
    Signum,
    Floor,
    Ceil,
}

impl OpCode {
    /// Number of operand slots this opcode reads (0 for `Const`/`Sym`,
    /// 1 for `Output` and unary ops, 2 for binary ops).
    #[inline]
    pub fn ndeps(self) -> usize {
        use OpCode::*;
        match self {
            Input | Const | Sym => 0,
            Output | Neg | Recip | Sqrt | Exp | Ln | Log10 | Sin | Cos | Tan | Asin | Acos
            | Atan | Sinh | Cosh | Tanh | Abs | Signum | Floor | Ceil => 1,
            Add | Sub | Mul | Div | Pow | Atan2 | Min | Max => 2,
        }
    }

    /// True for the structural marker codes.
    #[inline]
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            OpCode::Input | OpCode::Output | OpCode::Const | OpCode::Sym
        )
    }

    /// True if the operation has a kink or jump where the derivative is
    /// undefined or misleading.
    #[inline]
    pub fn is_nonsmooth(self) -> bool {
        matches!(
            self,
            OpCode::Abs
                | OpCode::Min
                | OpCode::Max
                | OpCode::Signum
                | OpCode::Floor
                | OpCode::Ceil
        )
    }

    /// Operation name as used by the algorithm printer.
    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Input => "input",
            Output => "output",
            Const => "const",
            Sym => "sym",
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Pow => "pow",
            Atan2 => "atan2",
            Min => "min",
            Max => "max",
            Neg => "neg",
            Recip => "recip",
            Sqrt => "sqrt",
            Exp => "exp",
            Ln => "ln",
            Log10 => "log10",
            Sin => "sin",
            Cos => "cos",
            Tan => "tan",
            Asin => "asin",
            Acos => "acos",
            Atan => "atan",
            Sinh => "sinh",
            Cosh => "cosh",
            Tanh => "tanh",
            Abs => "abs",
            Signum => "sign",
            Floor => "floor",
            Ceil => "ceil",
        }
    }

    /// True if the printer renders this binary opcode infix (`@a + @b`)
    /// rather than prefix (`pow(@a, @b)`).
    pub(crate) fn is_infix(self) -> bool {
        matches!(self, OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div)
    }
}

/// Evaluate a single numeric opcode.
///
/// For binary ops, `a` and `b` are the operand values. For unary ops `b` is
/// ignored. Structural codes are dispatched by the sweep loops and must not
/// end up here.
#[inline]
pub fn eval<F: Float>(op: OpCode, a: F, b: F) -> F {
    match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Pow => a.powf(b),
        OpCode::Atan2 => a.atan2(b),
        OpCode::Min => {
            if a <= b {
                a
            } else {
                b
            }
        }
        OpCode::Max => {
            if a >= b {
                a
            } else {
                b
            }
        }

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

        OpCode::Input | OpCode::Output | OpCode::Const | OpCode::Sym => {
            unreachable!("structural opcode in numeric dispatch")
        }
    }
}

/// Local partial derivatives `(∂r/∂a, ∂r/∂b)` of a single opcode.
///
/// `a`, `b` are the operand values and `r` the already-computed result —
/// several rules (`exp`, `sqrt`, `pow`) are cheapest expressed through `r`.
/// For unary ops the second partial is zero.
#[inline]
pub fn partials<F: Float>(op: OpCode, a: F, b: F, r: F) -> (F, F) {
    let zero = F::zero();
    let one = F::one();
    match op {
        OpCode::Add => (one, one),
        OpCode::Sub => (one, -one),
        OpCode::Mul => (b, a),
        OpCode::Div => {
            let inv = one / b;
            (inv, -a * inv * inv)
        }
        OpCode::Pow => {
            // d/da a^b = b * a^(b-1),  d/db a^b = a^b * ln(a)
            (b * a.powf(b - one), r * a.ln())
        }
        OpCode::Atan2 => {
            let denom = a * a + b * b;
            (b / denom, -a / denom)
        }
        OpCode::Min => {
            if a <= b {
                (one, zero)
            } else {
                (zero, one)
            }
        }
        OpCode::Max => {
            if a >= b {
                (one, zero)
            } else {
                (zero, one)
            }
        }

        OpCode::Neg => (-one, zero),
        OpCode::Recip => {
            let inv = one / a;
            (-inv * inv, zero)
        }
        OpCode::Sqrt => {
            let two = one + one;
            (one / (two * r), zero)
        }
        OpCode::Exp => (r, zero),
        OpCode::Ln => (one / a, zero),
        OpCode::Log10 => (one / (a * F::LN_10()), zero),
        OpCode::Sin => (a.cos(), zero),
        OpCode::Cos => (-a.sin(), zero),
        OpCode::Tan => {
            let c = a.cos();
            (one / (c * c), zero)
        }
        OpCode::Asin => (one / (one - a * a).sqrt(), zero),
        OpCode::Acos => (-one / (one - a * a).sqrt(), zero),
        OpCode::Atan => (one / (one + a * a), zero),
        OpCode::Sinh => (a.cosh(), zero),
        OpCode::Cosh => (a.sinh(), zero),
        OpCode::Tanh => {
            let c = a.cosh();
            (one / (c * c), zero)
        }
        OpCode::Abs => (a.signum(), zero),
        OpCode::Signum | OpCode::Floor | OpCode::Ceil => (zero, zero),

        OpCode::Input | OpCode::Output | OpCode::Const | OpCode::Sym => {
            unreachable!("structural opcode in derivative dispatch")
        }
    }
}
