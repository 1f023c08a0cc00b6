//! Sweep virtual machine: value pass with taping, batched forward sweeps and
//! reverse (adjoint) sweeps over the tape.
//!
//! The value pass records, per numeric instruction, the two local partials of
//! its result with respect to its operands. Forward and adjoint sweeps then
//! replay the instruction stream (forward or reversed) doing only
//! multiply-adds against that tape, so a bundle of directions costs far less
//! than re-evaluating the function per direction.
//!
//! Slot reuse makes in-place instructions legal (`res` may alias an operand
//! slot): every rule here reads its operand slots into locals before writing
//! the result slot. The adjoint sweep zeroes each accumulator as soon as its
//! content has been propagated, which both makes reuse safe across directions
//! and yields the checkable invariant that the whole accumulator buffer is
//! exactly zero when a sweep finishes.

use log::warn;

use crate::algorithm::Algorithm;
use crate::float::Float;
use crate::opcode::{self, OpCode};

/// Reusable per-evaluation state: work vector, tape of local partials and the
/// directional buffer. One workspace per concurrent evaluation; the
/// [`Algorithm`] itself is never written.
#[derive(Clone, Debug)]
pub struct Workspace<F: Float> {
    work: Vec<F>,
    tape: Vec<[F; 2]>,
    /// Direction-major buffer for forward/adjoint sweeps, grown on demand.
    dwork: Vec<F>,
}

impl<F: Float> Workspace<F> {
    pub fn new(alg: &Algorithm<F>) -> Self {
        Workspace {
            work: vec![F::zero(); alg.worksize],
            tape: vec![[F::zero(); 2]; alg.n_tape],
            dwork: Vec::new(),
        }
    }

    fn ensure_dirs(&mut self, worksize: usize, ndir: usize) {
        let need = worksize * ndir;
        if self.dwork.len() < need {
            self.dwork.resize(need, F::zero());
        }
    }
}

/// Value pass. Fills `outputs` (pre-shaped) from `inputs`; when `with_tape`
/// is set, also records local partials for later derivative sweeps.
pub(crate) fn sweep_value<F: Float>(
    alg: &Algorithm<F>,
    ws: &mut Workspace<F>,
    inputs: &[&[F]],
    outputs: &mut [Vec<F>],
    with_tape: bool,
    check_irregular: bool,
) {
    let work = &mut ws.work;
    let mut tp = 0usize;
    for (pos, ins) in alg.instrs.iter().enumerate() {
        match ins.op {
            OpCode::Input => {
                work[ins.res as usize] = inputs[ins.arg[0] as usize][ins.arg[1] as usize];
            }
            OpCode::Output => {
                outputs[ins.res as usize][ins.arg[1] as usize] = work[ins.arg[0] as usize];
            }
            OpCode::Const => {
                work[ins.res as usize] = alg.constants[ins.arg[0] as usize];
            }
            op => {
                let a = work[ins.arg[0] as usize];
                let b = if op.ndeps() == 2 {
                    work[ins.arg[1] as usize]
                } else {
                    F::zero()
                };
                let r = opcode::eval(op, a, b);
                if with_tape {
                    let (da, db) = opcode::partials(op, a, b, r);
                    ws.tape[tp] = [da, db];
                }
                tp += 1;
                if check_irregular && !r.is_finite() {
                    warn!("irregular value {r} at instruction {pos} ({})", op.name());
                }
                work[ins.res as usize] = r;
            }
        }
    }
}

/// True if every element of a seed bundle is exactly zero.
fn seed_is_zero<F: Float>(seed: &[Vec<F>]) -> bool {
    seed.iter().all(|v| v.iter().all(|x| x.is_zero()))
}

/// Forward sweeps over a recorded tape.
///
/// `fseed` and `fsens` are direction-major: `fseed[d][iind]` matches input
/// `iind`, `fsens[d][oind]` (pre-shaped) receives output `oind`. All-zero
/// directions are compressed out before the pass and reconstructed as zeros.
pub(crate) fn sweep_forward<F: Float>(
    alg: &Algorithm<F>,
    ws: &mut Workspace<F>,
    fseed: &[Vec<Vec<F>>],
    fsens: &mut [Vec<Vec<F>>],
) {
    let mut active: Vec<usize> = Vec::with_capacity(fseed.len());
    for (d, seed) in fseed.iter().enumerate() {
        if seed_is_zero(seed) {
            for out in fsens[d].iter_mut() {
                out.iter_mut().for_each(|x| *x = F::zero());
            }
        } else {
            active.push(d);
        }
    }
    if active.is_empty() {
        return;
    }

    let n = alg.worksize;
    let ndir = active.len();
    ws.ensure_dirs(n, ndir);
    let dwork = &mut ws.dwork;

    let mut tp = 0usize;
    for ins in &alg.instrs {
        match ins.op {
            OpCode::Input => {
                for (k, &d) in active.iter().enumerate() {
                    dwork[k * n + ins.res as usize] =
                        fseed[d][ins.arg[0] as usize][ins.arg[1] as usize];
                }
            }
            OpCode::Output => {
                for (k, &d) in active.iter().enumerate() {
                    fsens[d][ins.res as usize][ins.arg[1] as usize] =
                        dwork[k * n + ins.arg[0] as usize];
                }
            }
            OpCode::Const => {
                for k in 0..ndir {
                    dwork[k * n + ins.res as usize] = F::zero();
                }
            }
            op => {
                let [da, db] = ws.tape[tp];
                tp += 1;
                if op.ndeps() == 2 {
                    for k in 0..ndir {
                        let base = k * n;
                        let sa = dwork[base + ins.arg[0] as usize];
                        let sb = dwork[base + ins.arg[1] as usize];
                        dwork[base + ins.res as usize] = da * sa + db * sb;
                    }
                } else {
                    for k in 0..ndir {
                        let base = k * n;
                        let sa = dwork[base + ins.arg[0] as usize];
                        dwork[base + ins.res as usize] = da * sa;
                    }
                }
            }
        }
    }
}

/// Adjoint sweeps over a recorded tape, reversed instruction order.
///
/// `aseed[d][oind]` seeds output `oind`; `asens[d][iind]` (pre-shaped)
/// receives the input sensitivities. Seeding the same output element more
/// than once in a direction accumulates. Every accumulator slot is zeroed as
/// it is consumed, so the buffer ends the sweep at exactly zero.
pub(crate) fn sweep_adjoint<F: Float>(
    alg: &Algorithm<F>,
    ws: &mut Workspace<F>,
    aseed: &[Vec<Vec<F>>],
    asens: &mut [Vec<Vec<F>>],
) {
    for sens in asens.iter_mut() {
        for inp in sens.iter_mut() {
            inp.iter_mut().for_each(|x| *x = F::zero());
        }
    }

    let mut active: Vec<usize> = Vec::with_capacity(aseed.len());
    for (d, seed) in aseed.iter().enumerate() {
        if !seed_is_zero(seed) {
            active.push(d);
        }
    }
    if active.is_empty() {
        return;
    }

    let n = alg.worksize;
    let ndir = active.len();
    ws.ensure_dirs(n, ndir);
    for x in ws.dwork[..n * ndir].iter_mut() {
        *x = F::zero();
    }
    let dwork = &mut ws.dwork;

    let mut tp = alg.n_tape;
    for ins in alg.instrs.iter().rev() {
        match ins.op {
            OpCode::Output => {
                for (k, &d) in active.iter().enumerate() {
                    let slot = k * n + ins.arg[0] as usize;
                    dwork[slot] = dwork[slot] + aseed[d][ins.res as usize][ins.arg[1] as usize];
                }
            }
            OpCode::Input => {
                for (k, &d) in active.iter().enumerate() {
                    let slot = k * n + ins.res as usize;
                    asens[d][ins.arg[0] as usize][ins.arg[1] as usize] = dwork[slot];
                    dwork[slot] = F::zero();
                }
            }
            OpCode::Const => {
                for k in 0..ndir {
                    dwork[k * n + ins.res as usize] = F::zero();
                }
            }
            op => {
                tp -= 1;
                let [da, db] = ws.tape[tp];
                for k in 0..ndir {
                    let base = k * n;
                    let ar = dwork[base + ins.res as usize];
                    dwork[base + ins.res as usize] = F::zero();
                    dwork[base + ins.arg[0] as usize] =
                        dwork[base + ins.arg[0] as usize] + da * ar;
                    if op.ndeps() == 2 {
                        dwork[base + ins.arg[1] as usize] =
                            dwork[base + ins.arg[1] as usize] + db * ar;
                    }
                }
            }
        }
    }
    debug_assert!(
        dwork[..n * ndir].iter().all(|x| x.is_zero()),
        "adjoint accumulators not closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linearize::{linearize, LinearizeOpts, Ordering};
    use crate::node::Expr;

    fn product_algorithm() -> Algorithm<f64> {
        let x = Expr::<f64>::sym("x");
        let y = Expr::<f64>::sym("y");
        let f = &x * &y + x.sin();
        linearize(
            &[vec![x, y]],
            &[vec![f]],
            &LinearizeOpts {
                ordering: Ordering::DepthFirst,
                live_variables: true,
            },
        )
        .unwrap()
    }

    #[test]
    fn adjoint_sweep_closes_all_accumulators() {
        let alg = product_algorithm();
        let mut ws = Workspace::new(&alg);
        let mut out = vec![vec![0.0]];
        sweep_value(&alg, &mut ws, &[&[2.0, 3.0]], &mut out, true, false);

        let aseed = vec![vec![vec![1.5]]];
        let mut asens = vec![vec![vec![0.0; 2]]];
        sweep_adjoint(&alg, &mut ws, &aseed, &mut asens);
        // Every accumulator slot must have been drained or zeroed.
        assert!(ws.dwork.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn all_zero_forward_directions_are_skipped() {
        let alg = product_algorithm();
        let mut ws = Workspace::new(&alg);
        let mut out = vec![vec![0.0]];
        sweep_value(&alg, &mut ws, &[&[2.0, 3.0]], &mut out, true, false);

        let fseed = vec![vec![vec![0.0, 0.0]], vec![vec![1.0, 0.0]]];
        let mut fsens = vec![vec![vec![7.0]], vec![vec![7.0]]];
        sweep_forward(&alg, &mut ws, &fseed, &mut fsens);
        assert_eq!(fsens[0][0][0], 0.0);
        assert!((fsens[1][0][0] - (3.0 + 2.0_f64.cos())).abs() < 1e-14);
    }
}
