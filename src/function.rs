//! The public function object: declaration, evaluation entry points and the
//! lazily filled sparsity/partition caches.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::algorithm::Algorithm;
use crate::error::{ConstructError, EvalError};
use crate::float::Float;
use crate::jacobian::{self, AdMode, Jacobian, Plan};
use crate::linearize::{self, LinearizeOpts, Ordering};
use crate::node::Expr;
use crate::sparsity::Sparsity;
use crate::sweep::{self, Workspace};

/// Construction and evaluation options.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    pub ordering: Ordering,
    /// Reuse work slots once their last consumer has run. Disable to give
    /// every value its own slot (traceability at the cost of memory).
    pub live_variables: bool,
    /// Log NaN/Inf values with their instruction position during value
    /// passes. Diagnostic only; evaluation continues.
    pub check_irregular: bool,
    /// Sweep direction policy for Jacobian blocks.
    pub ad_mode: AdMode,
    /// Cost multiplier applied to the adjoint color count when choosing a
    /// direction automatically; values above one favor forward sweeps.
    pub adjoint_penalty: f64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            ordering: Ordering::DepthFirst,
            live_variables: true,
            check_irregular: false,
            ad_mode: AdMode::Automatic,
            adjoint_penalty: 2.0,
        }
    }
}

type BlockKey = (usize, usize, bool, bool);

pub(crate) struct Inner<F: Float> {
    pub alg: Algorithm<F>,
    pub check_irregular: bool,
    pub ad_mode: AdMode,
    pub adjoint_penalty: f64,
    sparsity_cache: Mutex<FxHashMap<BlockKey, Sparsity>>,
    plan_cache: Mutex<FxHashMap<BlockKey, Arc<Plan>>>,
}

impl<F: Float> Inner<F> {
    pub(crate) fn check_inputs(&self, inputs: &[&[F]]) -> Result<(), EvalError> {
        if inputs.len() != self.alg.n_in() {
            return Err(EvalError::InputCount {
                expected: self.alg.n_in(),
                got: inputs.len(),
            });
        }
        for (index, inp) in inputs.iter().enumerate() {
            if inp.len() != self.alg.in_size(index) {
                return Err(EvalError::InputShape {
                    index,
                    expected: self.alg.in_size(index),
                    got: inp.len(),
                });
            }
        }
        Ok(())
    }

    fn alloc_outputs(&self) -> Vec<Vec<F>> {
        (0..self.alg.n_out())
            .map(|o| vec![F::zero(); self.alg.out_size(o)])
            .collect()
    }
}

/// An immutable compiled function: shared, cheap to clone, safe to evaluate
/// from many threads at once (each evaluation uses its own [`Workspace`]).
pub struct Function<F: Float> {
    inner: Arc<Inner<F>>,
}

impl<F: Float> Clone for Function<F> {
    fn clone(&self) -> Self {
        Function {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Float> std::fmt::Debug for Function<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("n_in", &self.n_in())
            .field("n_out", &self.n_out())
            .field("instructions", &self.inner.alg.num_instructions())
            .field("worksize", &self.inner.alg.worksize())
            .finish()
    }
}

impl<F: Float> Function<F> {
    /// Compile input/output expression vectors with default [`Options`].
    pub fn new(
        inputs: &[Vec<Expr<F>>],
        outputs: &[Vec<Expr<F>>],
    ) -> Result<Self, ConstructError> {
        Self::with_options(inputs, outputs, Options::default())
    }

    pub fn with_options(
        inputs: &[Vec<Expr<F>>],
        outputs: &[Vec<Expr<F>>],
        opts: Options,
    ) -> Result<Self, ConstructError> {
        let alg = linearize::linearize(
            inputs,
            outputs,
            &LinearizeOpts {
                ordering: opts.ordering,
                live_variables: opts.live_variables,
            },
        )?;
        Ok(Self::from_algorithm(alg, opts))
    }

    pub(crate) fn from_algorithm(alg: Algorithm<F>, opts: Options) -> Self {
        Function {
            inner: Arc::new(Inner {
                alg,
                check_irregular: opts.check_irregular,
                ad_mode: opts.ad_mode,
                adjoint_penalty: opts.adjoint_penalty,
                sparsity_cache: Mutex::new(FxHashMap::default()),
                plan_cache: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    pub fn n_in(&self) -> usize {
        self.inner.alg.n_in()
    }

    pub fn n_out(&self) -> usize {
        self.inner.alg.n_out()
    }

    pub fn in_size(&self, iind: usize) -> usize {
        self.inner.alg.in_size(iind)
    }

    pub fn out_size(&self, oind: usize) -> usize {
        self.inner.alg.out_size(oind)
    }

    /// The compiled instruction sequence (printable via `Display`).
    pub fn algorithm(&self) -> &Algorithm<F> {
        &self.inner.alg
    }

    /// False if any instruction has a non-differentiable kink or jump.
    pub fn is_smooth(&self) -> bool {
        self.inner.alg.is_smooth()
    }

    /// Fresh reusable evaluation workspace sized for this function.
    pub fn workspace(&self) -> Workspace<F> {
        Workspace::new(&self.inner.alg)
    }

    /// Evaluate output values.
    pub fn eval(&self, inputs: &[&[F]]) -> Result<Vec<Vec<F>>, EvalError> {
        let mut ws = self.workspace();
        self.eval_with(&mut ws, inputs)
    }

    /// Evaluate output values reusing a caller-held workspace.
    pub fn eval_with(
        &self,
        ws: &mut Workspace<F>,
        inputs: &[&[F]],
    ) -> Result<Vec<Vec<F>>, EvalError> {
        self.inner.check_inputs(inputs)?;
        let mut outputs = self.inner.alloc_outputs();
        sweep::sweep_value(
            &self.inner.alg,
            ws,
            inputs,
            &mut outputs,
            false,
            self.inner.check_irregular,
        );
        Ok(outputs)
    }

    /// Evaluate values plus forward and adjoint directional derivatives.
    ///
    /// `fseed[d][iind]` seeds input `iind` in forward direction `d`;
    /// `aseed[d][oind]` seeds output `oind` in adjoint direction `d`. Either
    /// bundle may be empty. Returns `(outputs, fsens, asens)` with sensitivity
    /// shapes mirroring the seeds: `fsens[d][oind]`, `asens[d][iind]`.
    #[allow(clippy::type_complexity)]
    pub fn eval_derivs(
        &self,
        inputs: &[&[F]],
        fseed: &[Vec<Vec<F>>],
        aseed: &[Vec<Vec<F>>],
    ) -> Result<(Vec<Vec<F>>, Vec<Vec<Vec<F>>>, Vec<Vec<Vec<F>>>), EvalError> {
        self.inner.check_inputs(inputs)?;
        let alg = &self.inner.alg;
        for (dir, seed) in fseed.iter().enumerate() {
            for index in 0..alg.n_in() {
                let got = seed.get(index).map_or(0, Vec::len);
                if seed.len() != alg.n_in() || got != alg.in_size(index) {
                    return Err(EvalError::ForwardSeedShape {
                        dir,
                        index,
                        expected: alg.in_size(index),
                        got,
                    });
                }
            }
        }
        for (dir, seed) in aseed.iter().enumerate() {
            for index in 0..alg.n_out() {
                let got = seed.get(index).map_or(0, Vec::len);
                if seed.len() != alg.n_out() || got != alg.out_size(index) {
                    return Err(EvalError::AdjointSeedShape {
                        dir,
                        index,
                        expected: alg.out_size(index),
                        got,
                    });
                }
            }
        }

        let with_tape = !fseed.is_empty() || !aseed.is_empty();
        let mut ws = self.workspace();
        let mut outputs = self.inner.alloc_outputs();
        sweep::sweep_value(
            alg,
            &mut ws,
            inputs,
            &mut outputs,
            with_tape,
            self.inner.check_irregular,
        );

        let mut fsens: Vec<Vec<Vec<F>>> = (0..fseed.len())
            .map(|_| self.inner.alloc_outputs())
            .collect();
        if !fseed.is_empty() {
            sweep::sweep_forward(alg, &mut ws, fseed, &mut fsens);
        }

        let mut asens: Vec<Vec<Vec<F>>> = (0..aseed.len())
            .map(|_| {
                (0..alg.n_in())
                    .map(|i| vec![F::zero(); alg.in_size(i)])
                    .collect()
            })
            .collect();
        if !aseed.is_empty() {
            sweep::sweep_adjoint(alg, &mut ws, aseed, &mut asens);
        }

        Ok((outputs, fsens, asens))
    }

    fn check_block(&self, iind: usize, oind: usize) -> Result<(), EvalError> {
        if iind >= self.n_in() || oind >= self.n_out() {
            return Err(EvalError::NoSuchBlock {
                iind,
                oind,
                n_in: self.n_in(),
                n_out: self.n_out(),
            });
        }
        Ok(())
    }

    /// Sparsity pattern of the Jacobian block `d output[oind] / d input[iind]`.
    ///
    /// Computed on first request and cached per (iind, oind, compact,
    /// symmetric) key. Inputs and outputs are dense vectors, so the compact
    /// flag does not change the pattern here; it is part of the cache key for
    /// interface stability. With `symmetric`, a square pattern is unioned
    /// with its transpose before use.
    pub fn sparsity(
        &self,
        iind: usize,
        oind: usize,
        compact: bool,
        symmetric: bool,
    ) -> Result<Sparsity, EvalError> {
        self.check_block(iind, oind)?;
        let key = (iind, oind, compact, symmetric);
        let mut cache = self
            .inner
            .sparsity_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(sp) = cache.get(&key) {
            return Ok(sp.clone());
        }
        let mut sp = jacobian::jac_sparsity(&self.inner, iind, oind);
        if symmetric && sp.nrow() == sp.ncol() {
            let (at, _) = sp.transpose_with_mapping();
            let mut trips = sp.triplets();
            trips.extend(at.triplets());
            sp = Sparsity::from_triplets(sp.nrow(), sp.ncol(), &trips);
        }
        cache.insert(key, sp.clone());
        Ok(sp)
    }

    /// Handle for repeated evaluation of one compressed Jacobian block.
    pub fn jacobian(
        &self,
        iind: usize,
        oind: usize,
        compact: bool,
        symmetric: bool,
    ) -> Result<Jacobian<F>, EvalError> {
        let pattern = self.sparsity(iind, oind, compact, symmetric)?;
        let key = (iind, oind, compact, symmetric);
        let plan = {
            let mut cache = self
                .inner
                .plan_cache
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match cache.get(&key) {
                Some(p) => Arc::clone(p),
                None => {
                    let p = Arc::new(jacobian::get_partition(
                        &pattern,
                        symmetric,
                        self.inner.ad_mode,
                        self.inner.adjoint_penalty,
                    ));
                    cache.insert(key, Arc::clone(&p));
                    p
                }
            }
        };
        Ok(Jacobian {
            inner: Arc::clone(&self.inner),
            iind,
            oind,
            pattern,
            plan,
        })
    }
}
