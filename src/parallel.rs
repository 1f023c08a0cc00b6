//! Data-parallel batch evaluation (feature `parallel`).
//!
//! The algorithm is immutable and every job owns its workspace, so points
//! split across the rayon pool with no shared mutable state.

use rayon::prelude::*;

use crate::error::EvalError;
use crate::float::Float;
use crate::function::Function;
use crate::sweep::Workspace;

impl<F: Float> Function<F> {
    /// Evaluate the function at many input points in parallel.
    ///
    /// `points[p]` holds one input-vector set; the result keeps the same
    /// order. The first shape error aborts the batch.
    pub fn eval_batch(&self, points: &[Vec<Vec<F>>]) -> Result<Vec<Vec<Vec<F>>>, EvalError> {
        points
            .par_iter()
            .map_init(
                || Workspace::new(self.algorithm()),
                |ws, inputs| {
                    let refs: Vec<&[F]> = inputs.iter().map(Vec::as_slice).collect();
                    self.eval_with(ws, &refs)
                },
            )
            .collect()
    }
}
