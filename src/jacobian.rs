//! Compressed sparse Jacobian evaluation.
//!
//! A Jacobian block is planned once: detect the pattern (word-batched plain
//! propagation, or hierarchical block refinement for wide blocks), color it
//! (unidirectional for general blocks, star for symmetric ones), pick the
//! sweep direction, and precompute the scatter maps. Evaluating the block
//! then costs one value pass plus one batched derivative sweep carrying one
//! direction per color, whose results are scattered straight into the
//! nonzero array.

use std::sync::Arc;

use log::debug;

use crate::error::EvalError;
use crate::float::Float;
use crate::function::Inner;
use crate::sparsity::Sparsity;
use crate::sprop::{self, WORD_BITS};
use crate::sweep::{self, Workspace};

/// Derivative sweep direction policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdMode {
    /// Pick the direction with the fewer colors, adjoint cost scaled by the
    /// configured penalty.
    #[default]
    Automatic,
    Forward,
    Reverse,
}

/// Precomputed evaluation plan for one Jacobian block.
pub(crate) struct Plan {
    pub forward: bool,
    pub symmetric: bool,
    /// One row per color listing the member columns (forward) or rows
    /// (adjoint) riding that seed direction.
    pub seed: Sparsity,
    /// Pattern transpose plus the map from transpose nonzeros back into
    /// pattern nonzeros; drives the forward-mode scatter.
    pub trans: Sparsity,
    pub trans_map: Vec<usize>,
    /// Symmetric only: per pattern nonzero, whether the entry is recoverable
    /// directly from its column's color (no collision in its row).
    pub direct_ok: Vec<bool>,
    /// Symmetric only: color per vertex.
    pub color_of: Vec<usize>,
}

/// Choose a sweep direction and coloring for `pattern`.
pub(crate) fn get_partition(
    pattern: &Sparsity,
    symmetric: bool,
    ad_mode: AdMode,
    adjoint_penalty: f64,
) -> Plan {
    let (trans, trans_map) = pattern.transpose_with_mapping();

    // Symmetric assembly only makes sense on square blocks; anything else
    // falls through to the unidirectional path.
    if symmetric && pattern.nrow() == pattern.ncol() {
        let seed = pattern.star_coloring();
        let mut color_of = vec![0usize; pattern.ncol()];
        for d in 0..seed.nrow() {
            for &v in seed.row(d) {
                color_of[v] = d;
            }
        }
        // An entry (i, j) is direct when j is the only member of its color
        // among the nonzero columns of row i; otherwise the transposed entry
        // must be direct, which star coloring guarantees.
        let mut direct_ok = vec![false; pattern.nnz()];
        let mut k = 0;
        for i in 0..pattern.nrow() {
            let row = pattern.row(i);
            for &j in row {
                let hits = row.iter().filter(|&&c| color_of[c] == color_of[j]).count();
                direct_ok[k] = hits == 1;
                k += 1;
            }
        }
        debug!(
            "symmetric block {}x{}: {} star colors",
            pattern.nrow(),
            pattern.ncol(),
            seed.nrow()
        );
        return Plan {
            forward: true,
            symmetric: true,
            seed,
            trans,
            trans_map,
            direct_ok,
            color_of,
        };
    }

    // Tiny blocks skip coloring: one direct sweep.
    if pattern.nrow() <= 1 && pattern.ncol() <= 1 {
        let seed = Sparsity::dense(usize::from(pattern.ncol() > 0), pattern.ncol());
        return Plan {
            forward: true,
            symmetric: false,
            seed,
            trans,
            trans_map,
            direct_ok: Vec::new(),
            color_of: Vec::new(),
        };
    }

    let d_fwd = pattern.uni_coloring(&trans);
    let d_adj = trans.uni_coloring(pattern);
    let forward = match ad_mode {
        AdMode::Forward => true,
        AdMode::Reverse => false,
        AdMode::Automatic => (d_fwd.nrow() as f64) <= adjoint_penalty * (d_adj.nrow() as f64),
    };
    debug!(
        "block {}x{}: {} forward / {} adjoint colors, using {}",
        pattern.nrow(),
        pattern.ncol(),
        d_fwd.nrow(),
        d_adj.nrow(),
        if forward { "forward" } else { "adjoint" }
    );
    Plan {
        forward,
        symmetric: false,
        seed: if forward { d_fwd } else { d_adj },
        trans,
        trans_map,
        direct_ok: Vec::new(),
        color_of: Vec::new(),
    }
}

/// Pattern of the (`iind`, `oind`) block: hierarchical refinement for wide
/// forward-propagated blocks, word-batched plain propagation otherwise.
pub(crate) fn jac_sparsity<F: Float>(inner: &Inner<F>, iind: usize, oind: usize) -> Sparsity {
    let n = inner.alg.in_size(iind);
    let m = inner.alg.out_size(oind);
    if n == 0 || m == 0 {
        return Sparsity::empty(m, n);
    }
    if n <= m && n > 4 * WORD_BITS {
        jac_sparsity_hierarchical(inner, iind, oind)
    } else {
        sprop::jac_sparsity_plain(&inner.alg, iind, oind, None)
    }
}

/// Block-refined pattern detection.
///
/// The input dimension starts as a single coarse block; each round colors the
/// current coarse pattern, runs one bit-vector sweep per color with every
/// member block split into up to 64 sub-blocks, and rebuilds the pattern at
/// the finer granularity. Coloring keeps the sweep count at the number of
/// structurally independent block groups rather than `n / 64`.
fn jac_sparsity_hierarchical<F: Float>(inner: &Inner<F>, iind: usize, oind: usize) -> Sparsity {
    let alg = &inner.alg;
    let n = alg.in_size(iind);
    let m = alg.out_size(oind);

    // Current granularity: column ranges plus the known m x nblocks pattern.
    let mut blocks: Vec<(usize, usize)> = vec![(0, n)];
    let mut coarse = Sparsity::dense(m, 1);
    let mut total_sweeps = 0usize;

    let mut bwork: Vec<u64> = Vec::new();
    let mut iseed: Vec<Vec<u64>> = (0..alg.n_in()).map(|i| vec![0u64; alg.in_size(i)]).collect();
    let mut osens: Vec<Vec<u64>> = (0..alg.n_out())
        .map(|o| vec![0u64; alg.out_size(o)])
        .collect();

    while blocks.iter().any(|&(lo, hi)| hi - lo > 1) {
        let (trans, _) = coarse.transpose_with_mapping();
        let seed = coarse.uni_coloring(&trans);

        // Subdivide every block; remember each block's children.
        let mut next_blocks: Vec<(usize, usize)> = Vec::new();
        let mut children: Vec<(usize, usize)> = Vec::with_capacity(blocks.len());
        for &(lo, hi) in &blocks {
            let first = next_blocks.len();
            let parts = (hi - lo).min(WORD_BITS);
            for p in 0..parts {
                let a = lo + (hi - lo) * p / parts;
                let b = lo + (hi - lo) * (p + 1) / parts;
                next_blocks.push((a, b));
            }
            children.push((first, next_blocks.len()));
        }

        let mut trips: Vec<(usize, usize)> = Vec::new();
        for d in 0..seed.nrow() {
            for w in iseed[iind].iter_mut() {
                *w = 0;
            }
            for &b in seed.row(d) {
                let (first, last) = children[b];
                for (bit, sub) in (first..last).enumerate() {
                    let (a, z) = next_blocks[sub];
                    for e in a..z {
                        iseed[iind][e] = 1u64 << bit;
                    }
                }
            }
            sprop::sp_forward(alg, &mut bwork, &iseed, &mut osens);
            total_sweeps += 1;

            // A row touches at most one member block of this color, so its
            // result bits are unambiguous once that member is identified.
            for r in 0..m {
                let word = osens[oind][r];
                if word == 0 {
                    continue;
                }
                let Some(owner) = coarse
                    .row(r)
                    .iter()
                    .copied()
                    .find(|b| seed.row(d).contains(b))
                else {
                    continue;
                };
                let (first, _) = children[owner];
                let mut word = word;
                while word != 0 {
                    let bit = word.trailing_zeros() as usize;
                    word &= word - 1;
                    trips.push((r, first + bit));
                }
            }
        }

        blocks = next_blocks;
        coarse = Sparsity::from_triplets(m, blocks.len(), &trips);
    }
    debug!(
        "hierarchical sparsity ({iind},{oind}): {m}x{n} in {total_sweeps} sweeps"
    );
    coarse
}

/// Handle evaluating one compressed Jacobian block.
///
/// Produced by [`Function::jacobian`](crate::Function::jacobian); evaluation
/// returns the block's nonzero values in the storage order of
/// [`pattern`](Jacobian::pattern).
pub struct Jacobian<F: Float> {
    pub(crate) inner: Arc<Inner<F>>,
    pub(crate) iind: usize,
    pub(crate) oind: usize,
    pub(crate) pattern: Sparsity,
    pub(crate) plan: Arc<Plan>,
}

impl<F: Float> Jacobian<F> {
    /// Nonzero structure of the block (rows = output elements, columns =
    /// input elements).
    pub fn pattern(&self) -> &Sparsity {
        &self.pattern
    }

    /// Number of derivative sweeps one evaluation performs.
    pub fn n_sweeps(&self) -> usize {
        self.plan.seed.nrow()
    }

    /// Evaluate the block; values align with `pattern().triplets()`.
    pub fn eval(&self, inputs: &[&[F]]) -> Result<Vec<F>, EvalError> {
        self.inner.check_inputs(inputs)?;
        let nnz = self.pattern.nnz();
        if nnz == 0 {
            return Ok(Vec::new());
        }
        let alg = &self.inner.alg;
        let mut ws = Workspace::new(alg);
        let mut outputs: Vec<Vec<F>> = (0..alg.n_out())
            .map(|o| vec![F::zero(); alg.out_size(o)])
            .collect();
        sweep::sweep_value(
            alg,
            &mut ws,
            inputs,
            &mut outputs,
            true,
            self.inner.check_irregular,
        );

        let mut jac = vec![F::zero(); nnz];
        let ndir = self.plan.seed.nrow();
        if self.plan.forward {
            let dirs: Vec<Vec<F>> = self.plan.seed.seed_directions();
            let fseed: Vec<Vec<Vec<F>>> = dirs
                .into_iter()
                .map(|dir| {
                    (0..alg.n_in())
                        .map(|i| {
                            if i == self.iind {
                                dir.clone()
                            } else {
                                vec![F::zero(); alg.in_size(i)]
                            }
                        })
                        .collect()
                })
                .collect();
            let mut fsens: Vec<Vec<Vec<F>>> = (0..ndir)
                .map(|_| {
                    (0..alg.n_out())
                        .map(|o| vec![F::zero(); alg.out_size(o)])
                        .collect()
                })
                .collect();
            sweep::sweep_forward(alg, &mut ws, &fseed, &mut fsens);

            if self.plan.symmetric {
                self.scatter_symmetric(&fsens, &mut jac);
            } else {
                // Column c was carried by its color's direction; its nonzero
                // rows are the transpose row of c, mapped back to pattern
                // storage order.
                for d in 0..ndir {
                    for &c in self.plan.seed.row(d) {
                        let (lo, hi) = self.plan.trans.row_range(c);
                        for k in lo..hi {
                            let r = self.plan.trans.col_at(k);
                            jac[self.plan.trans_map[k]] = fsens[d][self.oind][r];
                        }
                    }
                }
            }
        } else {
            let dirs: Vec<Vec<F>> = self.plan.seed.seed_directions();
            let aseed: Vec<Vec<Vec<F>>> = dirs
                .into_iter()
                .map(|dir| {
                    (0..alg.n_out())
                        .map(|o| {
                            if o == self.oind {
                                dir.clone()
                            } else {
                                vec![F::zero(); alg.out_size(o)]
                            }
                        })
                        .collect()
                })
                .collect();
            let mut asens: Vec<Vec<Vec<F>>> = (0..ndir)
                .map(|_| {
                    (0..alg.n_in())
                        .map(|i| vec![F::zero(); alg.in_size(i)])
                        .collect()
                })
                .collect();
            sweep::sweep_adjoint(alg, &mut ws, &aseed, &mut asens);

            for d in 0..ndir {
                for &r in self.plan.seed.row(d) {
                    let (lo, hi) = self.pattern.row_range(r);
                    for k in lo..hi {
                        let c = self.pattern.col_at(k);
                        jac[k] = asens[d][self.iind][c];
                    }
                }
            }
        }
        Ok(jac)
    }

    /// Star-coloring recovery: direct entries read their column's color at
    /// their own row; colliding entries read the transposed position, whose
    /// directness the coloring guarantees.
    fn scatter_symmetric(&self, fsens: &[Vec<Vec<F>>], jac: &mut [F]) {
        let mut k = 0;
        for i in 0..self.pattern.nrow() {
            for &j in self.pattern.row(i) {
                jac[k] = if self.plan.direct_ok[k] {
                    fsens[self.plan.color_of[j]][self.oind][i]
                } else {
                    fsens[self.plan.color_of[i]][self.oind][j]
                };
                k += 1;
            }
        }
    }
}
