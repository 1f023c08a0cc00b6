use gradir::{Expr, Function, Sparsity};

fn mixed_graph() -> Function<f64> {
    let x = Expr::sym_vec("x", 3);
    let s = x[0].sin() * x[1].cosh();
    let f0 = &s + &x[2] / (&x[0] + 2.0);
    let f1 = s.exp() - x[1].atan();
    let f2 = x[2].tanh();
    Function::new(&[x], &[vec![f0, f1, f2]]).unwrap()
}

#[test]
fn propagated_pattern_covers_every_numeric_nonzero() {
    let func = mixed_graph();
    let pattern = func.sparsity(0, 0, false, false).unwrap();
    let inputs: &[&[f64]] = &[&[0.4, -0.9, 1.7]];
    for c in 0..3 {
        let mut seed = vec![0.0; 3];
        seed[c] = 1.0;
        let (_, fsens, _) = func.eval_derivs(inputs, &[vec![seed]], &[]).unwrap();
        for r in 0..3 {
            if fsens[0][0][r] != 0.0 {
                assert!(
                    pattern.nz_index(r, c).is_some(),
                    "numeric nonzero ({r},{c}) missing from pattern"
                );
            }
        }
    }
}

#[test]
fn pattern_matches_the_graph_structure_exactly() {
    let func = mixed_graph();
    let pattern = func.sparsity(0, 0, false, false).unwrap();
    let expected = Sparsity::from_triplets(
        3,
        3,
        &[(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (2, 2)],
    );
    assert_eq!(pattern, expected);
}

#[test]
fn tall_and_wide_blocks_agree_on_transposed_structure() {
    // The same coupling expressed both ways round; the propagator picks
    // forward for the tall block and backward for the wide one.
    let x = Expr::<f64>::sym_vec("x", 2);
    let tall = Function::new(
        &[x.clone()],
        &[vec![x[0].sin(), &x[0] + &x[1], x[1].exp()]],
    )
    .unwrap();
    let y = Expr::<f64>::sym_vec("y", 3);
    let wide = Function::new(
        &[y.clone()],
        &[vec![y[0].sin() + &y[1], &y[1] + y[2].exp()]],
    )
    .unwrap();

    let sp_tall = tall.sparsity(0, 0, false, false).unwrap();
    let sp_wide = wide.sparsity(0, 0, false, false).unwrap();
    assert_eq!(sp_tall.triplets(), vec![(0, 0), (1, 0), (1, 1), (2, 1)]);
    assert_eq!(sp_wide.triplets(), vec![(0, 0), (0, 1), (1, 1), (1, 2)]);
}

#[test]
fn seeds_beyond_one_word_are_carried_in_extra_sweeps() {
    // 70 inputs: the first column is dense and the rest is diagonal, so
    // both words of the seed space carry structure.
    let n = 70;
    let x = Expr::sym_vec("x", n);
    let f: Vec<Expr<f64>> = (0..n).map(|i| &x[0] * &x[i] + x[i].sin()).collect();
    let func = Function::new(&[x], &[f]).unwrap();
    let pattern = func.sparsity(0, 0, false, false).unwrap();
    for i in 0..n {
        assert!(pattern.nz_index(i, 0).is_some());
        assert!(pattern.nz_index(i, i).is_some());
    }
    assert_eq!(pattern.nnz(), 2 * n - 1);
}

#[test]
fn hierarchical_refinement_recovers_a_banded_pattern() {
    // 300 columns crosses the plain-propagation threshold; the block-refined
    // path must land on the same circulant band.
    let n = 300;
    let x = Expr::sym_vec("x", n);
    let f: Vec<Expr<f64>> = (0..n)
        .map(|i| &x[i] * &x[i] + x[(i + 1) % n].sin())
        .collect();
    let func = Function::new(&[x], &[f]).unwrap();
    let pattern = func.sparsity(0, 0, false, false).unwrap();
    assert_eq!(pattern.nnz(), 2 * n);
    for i in 0..n {
        assert!(pattern.nz_index(i, i).is_some());
        assert!(pattern.nz_index(i, (i + 1) % n).is_some());
    }
}

#[test]
fn sparsity_results_are_cached_per_block_key() {
    let func = mixed_graph();
    let first = func.sparsity(0, 0, false, false).unwrap();
    let again = func.sparsity(0, 0, false, false).unwrap();
    assert_eq!(first, again);
    // The symmetric variant keys separately and symmetrizes the pattern.
    let sym = func.sparsity(0, 0, false, true).unwrap();
    assert!(sym.nz_index(0, 2).is_some());
    assert!(sym.nz_index(2, 0).is_some());
}
