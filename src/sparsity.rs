//! Compressed row storage boolean patterns and the seed-compression
//! colorings built on them.
//!
//! Patterns are kept sorted and duplicate-free by construction: triplet
//! ingestion sorts, the transpose counting pass emits in order, and the
//! coloring constructors append group members in ascending vertex order.
//! Value equality (`==`) over dimensions and index arrays is what the
//! Jacobian caches key on.

use crate::float::Float;

/// Boolean nrow × ncol pattern in compressed row storage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sparsity {
    nrow: usize,
    ncol: usize,
    rowptr: Vec<usize>,
    col: Vec<usize>,
}

impl Sparsity {
    /// Pattern with no nonzeros.
    pub fn empty(nrow: usize, ncol: usize) -> Self {
        Sparsity {
            nrow,
            ncol,
            rowptr: vec![0; nrow + 1],
            col: Vec::new(),
        }
    }

    /// Fully dense pattern.
    pub fn dense(nrow: usize, ncol: usize) -> Self {
        let mut rowptr = Vec::with_capacity(nrow + 1);
        let mut col = Vec::with_capacity(nrow * ncol);
        rowptr.push(0);
        for _ in 0..nrow {
            col.extend(0..ncol);
            rowptr.push(col.len());
        }
        Sparsity {
            nrow,
            ncol,
            rowptr,
            col,
        }
    }

    /// Build from (row, col) pairs; duplicates collapse, order is arbitrary.
    pub fn from_triplets(nrow: usize, ncol: usize, entries: &[(usize, usize)]) -> Self {
        let mut entries: Vec<(usize, usize)> = entries.to_vec();
        entries.sort_unstable();
        entries.dedup();
        let mut rowptr = vec![0usize; nrow + 1];
        let mut col = Vec::with_capacity(entries.len());
        for &(r, c) in &entries {
            debug_assert!(r < nrow && c < ncol);
            rowptr[r + 1] += 1;
            col.push(c);
        }
        for r in 0..nrow {
            rowptr[r + 1] += rowptr[r];
        }
        Sparsity {
            nrow,
            ncol,
            rowptr,
            col,
        }
    }

    /// Build from per-row sorted column lists.
    pub(crate) fn from_rows(ncol: usize, rows: &[Vec<usize>]) -> Self {
        let mut rowptr = Vec::with_capacity(rows.len() + 1);
        let mut col = Vec::new();
        rowptr.push(0);
        for r in rows {
            debug_assert!(r.windows(2).all(|w| w[0] < w[1]));
            col.extend_from_slice(r);
            rowptr.push(col.len());
        }
        Sparsity {
            nrow: rows.len(),
            ncol,
            rowptr,
            col,
        }
    }

    pub fn nrow(&self) -> usize {
        self.nrow
    }

    pub fn ncol(&self) -> usize {
        self.ncol
    }

    pub fn nnz(&self) -> usize {
        self.col.len()
    }

    pub fn is_dense(&self) -> bool {
        self.nnz() == self.nrow * self.ncol
    }

    /// Column indices of row `r`, ascending.
    pub fn row(&self, r: usize) -> &[usize] {
        &self.col[self.rowptr[r]..self.rowptr[r + 1]]
    }

    /// Storage range `[lo, hi)` of row `r`.
    pub fn row_range(&self, r: usize) -> (usize, usize) {
        (self.rowptr[r], self.rowptr[r + 1])
    }

    /// Column index of the nonzero at storage position `k`.
    pub fn col_at(&self, k: usize) -> usize {
        self.col[k]
    }

    /// Flat nonzero index of entry (r, c), if present.
    pub fn nz_index(&self, r: usize, c: usize) -> Option<usize> {
        let row = self.row(r);
        row.binary_search(&c).ok().map(|k| self.rowptr[r] + k)
    }

    /// (row, col) pairs in storage order.
    pub fn triplets(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(self.nnz());
        for r in 0..self.nrow {
            for &c in self.row(r) {
                out.push((r, c));
            }
        }
        out
    }

    /// Entrywise union of two same-shaped patterns.
    pub fn union(&self, other: &Sparsity) -> Sparsity {
        debug_assert_eq!((self.nrow, self.ncol), (other.nrow, other.ncol));
        let mut trips = self.triplets();
        trips.extend(other.triplets());
        Sparsity::from_triplets(self.nrow, self.ncol, &trips)
    }

    /// Entrywise intersection of two same-shaped patterns.
    pub fn intersect(&self, other: &Sparsity) -> Sparsity {
        debug_assert_eq!((self.nrow, self.ncol), (other.nrow, other.ncol));
        let mut trips = Vec::new();
        for r in 0..self.nrow {
            let a = self.row(r);
            for &c in other.row(r) {
                if a.binary_search(&c).is_ok() {
                    trips.push((r, c));
                }
            }
        }
        Sparsity::from_triplets(self.nrow, self.ncol, &trips)
    }

    /// Transpose, plus for each transpose nonzero the index of the matching
    /// nonzero in `self` (the scatter map used by compressed assembly).
    pub fn transpose_with_mapping(&self) -> (Sparsity, Vec<usize>) {
        let nnz = self.nnz();
        let mut rowptr = vec![0usize; self.ncol + 1];
        for &c in &self.col {
            rowptr[c + 1] += 1;
        }
        for c in 0..self.ncol {
            rowptr[c + 1] += rowptr[c];
        }
        let mut col = vec![0usize; nnz];
        let mut mapping = vec![0usize; nnz];
        let mut cursor = rowptr.clone();
        for r in 0..self.nrow {
            for k in self.rowptr[r]..self.rowptr[r + 1] {
                let c = self.col[k];
                let dst = cursor[c];
                cursor[c] += 1;
                col[dst] = r;
                mapping[dst] = k;
            }
        }
        (
            Sparsity {
                nrow: self.ncol,
                ncol: self.nrow,
                rowptr,
                col,
            },
            mapping,
        )
    }

    /// Unidirectional (distance-2 greedy) column coloring.
    ///
    /// `self` is the pattern being compressed and `trans` its transpose. Two
    /// columns get the same color only if they share no nonzero row, so the
    /// columns of one color can ride a single seed direction. Returns the
    /// seed pattern: one row per color listing the member columns.
    pub fn uni_coloring(&self, trans: &Sparsity) -> Sparsity {
        debug_assert_eq!(self.nrow, trans.ncol);
        debug_assert_eq!(self.ncol, trans.nrow);
        let n = self.ncol;
        let mut color = vec![usize::MAX; n];
        let mut forbidden = vec![usize::MAX; n];
        let mut ncolor = 0usize;
        for v in 0..n {
            for &r in trans.row(v) {
                for &w in self.row(r) {
                    if color[w] != usize::MAX {
                        forbidden[color[w]] = v;
                    }
                }
            }
            let mut c = 0;
            while forbidden[c] == v {
                c += 1;
            }
            color[v] = c;
            ncolor = ncolor.max(c + 1);
        }
        Self::groups_to_seed(n, &color, ncolor)
    }

    /// Greedy star coloring for a symmetric pattern.
    ///
    /// Beyond distance-1 conflicts, a vertex may not take the color of a
    /// two-hop neighbor `x` when the connecting vertex `w` is already colored
    /// and some other neighbor of `x` repeats `w`'s color; the resulting
    /// coloring leaves every two-colored path of length three non-alternating,
    /// which is what makes one triangular half of a symmetric Jacobian
    /// recoverable from the compressed sweeps.
    pub fn star_coloring(&self) -> Sparsity {
        debug_assert_eq!(self.nrow, self.ncol);
        let n = self.nrow;
        let mut color = vec![usize::MAX; n];
        let mut forbidden = vec![usize::MAX; n.max(1)];
        let mut ncolor = 0usize;
        for v in 0..n {
            for &w in self.row(v) {
                if w == v {
                    continue;
                }
                if color[w] != usize::MAX {
                    forbidden[color[w]] = v;
                }
                for &x in self.row(w) {
                    if x == v || x == w || color[x] == usize::MAX {
                        continue;
                    }
                    if color[w] == usize::MAX {
                        forbidden[color[x]] = v;
                    } else {
                        for &y in self.row(x) {
                            if y == w || y == x || color[y] == usize::MAX {
                                continue;
                            }
                            if color[y] == color[w] {
                                forbidden[color[x]] = v;
                                break;
                            }
                        }
                    }
                }
            }
            let mut c = 0;
            while c < forbidden.len() && forbidden[c] == v {
                c += 1;
            }
            color[v] = c;
            ncolor = ncolor.max(c + 1);
        }
        Self::groups_to_seed(n, &color, ncolor)
    }

    fn groups_to_seed(n: usize, color: &[usize], ncolor: usize) -> Sparsity {
        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); ncolor];
        for v in 0..n {
            groups[color[v]].push(v);
        }
        Self::from_rows(n, &groups)
    }

    /// Numeric seed bundles from a seed pattern: direction `d` carries value
    /// one at every member of color `d` and zero elsewhere.
    pub(crate) fn seed_directions<F: Float>(&self) -> Vec<Vec<F>> {
        (0..self.nrow)
            .map(|d| {
                let mut seed = vec![F::zero(); self.ncol];
                for &v in self.row(d) {
                    seed[v] = F::one();
                }
                seed
            })
            .collect()
    }
}
