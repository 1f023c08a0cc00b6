//! Linearized form of an expression graph.
//!
//! An [`Algorithm`] is a flat, topologically ordered instruction list over a
//! reusable work vector. It is the unit every evaluator consumes: the value
//! and derivative sweeps, the bit-vector dependency propagation, and the
//! compressed Jacobian driver all walk the same instruction stream.

use std::fmt;

use crate::float::Float;
use crate::opcode::OpCode;

/// One linearized instruction.
///
/// Operand encoding by opcode:
/// - `Input`: `arg = [input index, element]`, `res` = destination work slot
/// - `Output`: `arg = [source work slot, element]`, `res` = output index
/// - `Const`: `arg[0]` = constant pool index, `res` = destination work slot
/// - numeric ops: `arg` = operand work slots (`arg[1] == UNUSED` for unary),
///   `res` = result work slot, which may alias an operand slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instr {
    pub op: OpCode,
    pub arg: [u32; 2],
    pub res: u32,
}

/// A compiled expression graph: instructions, constant pool and buffer
/// geometry. Immutable once built; evaluation state lives in
/// [`Workspace`](crate::sweep::Workspace), so one `Algorithm` can serve many
/// concurrent evaluations.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Algorithm<F: Float> {
    pub(crate) instrs: Vec<Instr>,
    pub(crate) constants: Vec<F>,
    /// Length of the work vector (peak live slots when reuse is on).
    pub(crate) worksize: usize,
    /// Number of taped (non-structural) instructions.
    pub(crate) n_tape: usize,
    pub(crate) in_shapes: Vec<usize>,
    pub(crate) out_shapes: Vec<usize>,
}

impl<F: Float> Algorithm<F> {
    pub fn n_in(&self) -> usize {
        self.in_shapes.len()
    }

    pub fn n_out(&self) -> usize {
        self.out_shapes.len()
    }

    /// Length of input vector `iind`.
    pub fn in_size(&self, iind: usize) -> usize {
        self.in_shapes[iind]
    }

    /// Length of output vector `oind`.
    pub fn out_size(&self, oind: usize) -> usize {
        self.out_shapes[oind]
    }

    /// Total number of input elements across all input vectors.
    pub fn nz_in(&self) -> usize {
        self.in_shapes.iter().sum()
    }

    /// Total number of output elements across all output vectors.
    pub fn nz_out(&self) -> usize {
        self.out_shapes.iter().sum()
    }

    pub fn num_instructions(&self) -> usize {
        self.instrs.len()
    }

    /// Work vector length required to run this algorithm.
    pub fn worksize(&self) -> usize {
        self.worksize
    }

    /// False if any instruction has a kink or jump (abs, min, max, sign,
    /// floor, ceil) making the tape derivative one-sided at the crease.
    pub fn is_smooth(&self) -> bool {
        self.instrs.iter().all(|ins| !ins.op.is_nonsmooth())
    }

    /// Check structural soundness: every slot is written before it is read,
    /// all indices are in range and `Sym` never appears. Panics on violation;
    /// meant for tests and debug assertions, not the hot path.
    pub fn validate(&self) {
        let mut written = vec![false; self.worksize];
        for (pos, ins) in self.instrs.iter().enumerate() {
            match ins.op {
                OpCode::Sym => panic!("instruction {pos}: free symbol survived linearization"),
                OpCode::Input => {
                    let iind = ins.arg[0] as usize;
                    assert!(iind < self.n_in(), "instruction {pos}: input index");
                    assert!(
                        (ins.arg[1] as usize) < self.in_shapes[iind],
                        "instruction {pos}: input element"
                    );
                    written[ins.res as usize] = true;
                }
                OpCode::Output => {
                    let oind = ins.res as usize;
                    assert!(oind < self.n_out(), "instruction {pos}: output index");
                    assert!(
                        (ins.arg[1] as usize) < self.out_shapes[oind],
                        "instruction {pos}: output element"
                    );
                    assert!(
                        written[ins.arg[0] as usize],
                        "instruction {pos}: output reads unwritten slot"
                    );
                }
                OpCode::Const => {
                    assert!(
                        (ins.arg[0] as usize) < self.constants.len(),
                        "instruction {pos}: constant pool index"
                    );
                    written[ins.res as usize] = true;
                }
                op => {
                    for k in 0..op.ndeps() {
                        assert!(
                            written[ins.arg[k] as usize],
                            "instruction {pos}: operand {k} reads unwritten slot"
                        );
                    }
                    written[ins.res as usize] = true;
                }
            }
        }
    }
}

impl<F: Float> fmt::Display for Algorithm<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ins in &self.instrs {
            match ins.op {
                OpCode::Input => writeln!(
                    f,
                    "@{} = input[{}][{}]",
                    ins.res, ins.arg[0], ins.arg[1]
                )?,
                OpCode::Output => writeln!(
                    f,
                    "output[{}][{}] = @{}",
                    ins.res, ins.arg[1], ins.arg[0]
                )?,
                OpCode::Const => {
                    writeln!(f, "@{} = {}", ins.res, self.constants[ins.arg[0] as usize])?
                }
                op if op.ndeps() == 1 => {
                    writeln!(f, "@{} = {}(@{})", ins.res, op.name(), ins.arg[0])?
                }
                op if op.is_infix() => writeln!(
                    f,
                    "@{} = @{} {} @{}",
                    ins.res,
                    ins.arg[0],
                    op.name(),
                    ins.arg[1]
                )?,
                op => writeln!(
                    f,
                    "@{} = {}(@{}, @{})",
                    ins.res,
                    op.name(),
                    ins.arg[0],
                    ins.arg[1]
                )?,
            }
        }
        Ok(())
    }
}
