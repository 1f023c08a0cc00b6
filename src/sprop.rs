//! Dependency propagation over the algorithm in a bit-vector domain.
//!
//! Each work slot holds a machine word whose bits mark "depends on seed k".
//! Numeric rules degenerate to bitwise OR, so one sweep carries up to 64 seed
//! directions and a full m × n Jacobian pattern costs `ceil(n/64)` forward or
//! `ceil(m/64)` backward sweeps instead of one numeric sweep per column.

use log::debug;

use crate::algorithm::Algorithm;
use crate::float::Float;
use crate::opcode::OpCode;
use crate::sparsity::Sparsity;

/// Seed directions carried per propagation sweep.
pub(crate) const WORD_BITS: usize = 64;

/// Forward propagation: seeds sit on input elements, dependencies surface on
/// outputs. `osens` must be pre-shaped; every element is overwritten.
pub(crate) fn sp_forward<F: Float>(
    alg: &Algorithm<F>,
    bwork: &mut Vec<u64>,
    iseed: &[Vec<u64>],
    osens: &mut [Vec<u64>],
) {
    bwork.clear();
    bwork.resize(alg.worksize(), 0);
    for ins in &alg.instrs {
        match ins.op {
            OpCode::Input => {
                bwork[ins.res as usize] = iseed[ins.arg[0] as usize][ins.arg[1] as usize];
            }
            OpCode::Output => {
                osens[ins.res as usize][ins.arg[1] as usize] = bwork[ins.arg[0] as usize];
            }
            OpCode::Const => {
                bwork[ins.res as usize] = 0;
            }
            op => {
                let mut r = bwork[ins.arg[0] as usize];
                if op.ndeps() == 2 {
                    r |= bwork[ins.arg[1] as usize];
                }
                bwork[ins.res as usize] = r;
            }
        }
    }
}

/// Backward propagation: seeds sit on output elements, dependencies surface
/// on inputs. `isens` must be pre-shaped and zeroed; bits are OR-accumulated.
pub(crate) fn sp_backward<F: Float>(
    alg: &Algorithm<F>,
    bwork: &mut Vec<u64>,
    oseed: &[Vec<u64>],
    isens: &mut [Vec<u64>],
) {
    bwork.clear();
    bwork.resize(alg.worksize(), 0);
    for ins in alg.instrs.iter().rev() {
        match ins.op {
            OpCode::Output => {
                bwork[ins.arg[0] as usize] |= oseed[ins.res as usize][ins.arg[1] as usize];
            }
            OpCode::Input => {
                let slot = ins.res as usize;
                isens[ins.arg[0] as usize][ins.arg[1] as usize] |= bwork[slot];
                bwork[slot] = 0;
            }
            OpCode::Const => {
                bwork[ins.res as usize] = 0;
            }
            op => {
                let r = bwork[ins.res as usize];
                bwork[ins.res as usize] = 0;
                bwork[ins.arg[0] as usize] |= r;
                if op.ndeps() == 2 {
                    bwork[ins.arg[1] as usize] |= r;
                }
            }
        }
    }
}

/// Word-batched Jacobian block pattern for the pair (`iind`, `oind`).
///
/// Propagates forward when the input side is the narrower one, backward
/// otherwise; `force_forward` overrides the policy. Conservative: every true
/// numeric dependency is present, extra entries are possible on graphs where
/// structure and value diverge (for example `x - x` written through distinct
/// nodes).
pub(crate) fn jac_sparsity_plain<F: Float>(
    alg: &Algorithm<F>,
    iind: usize,
    oind: usize,
    force_forward: Option<bool>,
) -> Sparsity {
    let n = alg.in_size(iind);
    let m = alg.out_size(oind);
    if n == 0 || m == 0 {
        return Sparsity::empty(m, n);
    }
    let forward = force_forward.unwrap_or(n <= m);
    let sweeps = if forward {
        n.div_ceil(WORD_BITS)
    } else {
        m.div_ceil(WORD_BITS)
    };
    debug!(
        "sparsity block ({iind},{oind}): {m}x{n}, {} propagation, {sweeps} sweeps",
        if forward { "forward" } else { "backward" }
    );

    let mut bwork: Vec<u64> = Vec::new();
    let mut trips: Vec<(usize, usize)> = Vec::new();

    if forward {
        let mut iseed: Vec<Vec<u64>> = alg_in_words(alg);
        let mut osens: Vec<Vec<u64>> = alg_out_words(alg);
        for s in 0..sweeps {
            for w in iseed[iind].iter_mut() {
                *w = 0;
            }
            let base = s * WORD_BITS;
            for b in 0..WORD_BITS.min(n - base) {
                iseed[iind][base + b] = 1u64 << b;
            }
            sp_forward(alg, &mut bwork, &iseed, &mut osens);
            for (r, &word) in osens[oind].iter().enumerate() {
                let mut word = word;
                while word != 0 {
                    let b = word.trailing_zeros() as usize;
                    word &= word - 1;
                    trips.push((r, base + b));
                }
            }
        }
    } else {
        let mut oseed: Vec<Vec<u64>> = alg_out_words(alg);
        let mut isens: Vec<Vec<u64>> = alg_in_words(alg);
        for s in 0..sweeps {
            for w in oseed[oind].iter_mut() {
                *w = 0;
            }
            for v in isens.iter_mut() {
                v.iter_mut().for_each(|w| *w = 0);
            }
            let base = s * WORD_BITS;
            for b in 0..WORD_BITS.min(m - base) {
                oseed[oind][base + b] = 1u64 << b;
            }
            sp_backward(alg, &mut bwork, &oseed, &mut isens);
            for (c, &word) in isens[iind].iter().enumerate() {
                let mut word = word;
                while word != 0 {
                    let b = word.trailing_zeros() as usize;
                    word &= word - 1;
                    trips.push((base + b, c));
                }
            }
        }
    }
    Sparsity::from_triplets(m, n, &trips)
}

fn alg_in_words<F: Float>(alg: &Algorithm<F>) -> Vec<Vec<u64>> {
    (0..alg.n_in()).map(|i| vec![0u64; alg.in_size(i)]).collect()
}

fn alg_out_words<F: Float>(alg: &Algorithm<F>) -> Vec<Vec<u64>> {
    (0..alg.n_out()).map(|o| vec![0u64; alg.out_size(o)]).collect()
}
